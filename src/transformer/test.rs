use super::multipart::{Reader, SpoolSink, Writer};
use super::*;
use http::HeaderMap;
use serde_json::json;

fn encode(t: &dyn Transformer, value: &Value) -> (Vec<u8>, HeaderMap) {
    let mut buf = Vec::new();
    let mut headers = HeaderMap::new();
    t.encode_to(&mut buf, value, &mut headers).unwrap();
    (buf, headers)
}

fn decode(t: &dyn Transformer, bytes: &[u8]) -> Value {
    let mut r = bytes;
    t.decode_from(&mut r, &HeaderMap::new()).unwrap()
}

// ===== json =====

#[test]
fn json_round_trip() {
    let t = JsonTransformer::default();
    let value = json!({"name": "al", "tags": [1, 2]});
    let (buf, headers) = encode(&t, &value);
    assert_eq!(headers[http::header::CONTENT_TYPE], "application/json");
    assert_eq!(decode(&t, &buf), value);
}

// ===== xml =====

#[test]
fn xml_encodes_under_result_root() {
    let t = XmlTransformer::default();
    let (buf, _) = encode(&t, &json!({"country": "US"}));
    assert_eq!(
        std::str::from_utf8(&buf).unwrap(),
        "<result><country>US</country></result>"
    );
}

#[test]
fn xml_arrays_repeat_elements() {
    let t = XmlTransformer::default();
    let (buf, _) = encode(&t, &json!({"tag": ["a", "b"]}));
    assert_eq!(
        std::str::from_utf8(&buf).unwrap(),
        "<result><tag>a</tag><tag>b</tag></result>"
    );
}

#[test]
fn xml_escapes_text() {
    let t = XmlTransformer::default();
    let (buf, _) = encode(&t, &json!({"q": "a<b&c"}));
    assert_eq!(
        std::str::from_utf8(&buf).unwrap(),
        "<result><q>a&lt;b&amp;c</q></result>"
    );
}

#[test]
fn xml_decode_round_trips() {
    let t = XmlTransformer::default();
    let v = decode(&t, b"<result><country>US</country><tag>a</tag><tag>b</tag></result>");
    assert_eq!(v, json!({"country": "US", "tag": ["a", "b"]}));
}

#[test]
fn xml_decode_keeps_attributes() {
    let t = XmlTransformer::default();
    let v = decode(&t, br#"<result><user id="7">al</user></result>"#);
    assert_eq!(v, json!({"user": {"@id": "7", "#text": "al"}}));
}

// ===== form =====

#[test]
fn form_encodes_pairs() {
    let t = FormUrlEncoded::default();
    let (buf, headers) = encode(&t, &json!({"user": "al", "id": [1, 2]}));
    assert_eq!(
        headers[http::header::CONTENT_TYPE],
        "application/x-www-form-urlencoded"
    );
    let body = std::str::from_utf8(&buf).unwrap();
    assert!(body.contains("user=al"), "got {body:?}");
    assert!(body.contains("id=1") && body.contains("id=2"), "got {body:?}");
}

#[test]
fn form_decode_groups_repeats() {
    let t = FormUrlEncoded::default();
    let v = decode(&t, b"user=al&id=1&id=2");
    assert_eq!(v, json!({"user": "al", "id": ["1", "2"]}));
}

// ===== plain and octet =====

#[test]
fn plain_text_passes_scalars() {
    let t = PlainText::default();
    let (buf, _) = encode(&t, &json!("hello"));
    assert_eq!(buf, b"hello");
    assert_eq!(decode(&t, b"hello"), json!("hello"));
}

#[test]
fn plain_text_rejects_structures() {
    let t = PlainText::default();
    let mut buf = Vec::new();
    let mut headers = HeaderMap::new();
    assert!(t.encode_to(&mut buf, &json!({"a": 1}), &mut headers).is_err());
}

// ===== mgr =====

#[test]
fn unknown_mime_is_an_encode_error() {
    let mgr = TransformerMgr::new();
    assert!(matches!(
        mgr.for_encode("application/x-nope"),
        Err(TransformError::Unsupported(_)),
    ));
}

#[test]
fn decode_falls_back_to_octet() {
    let mgr = TransformerMgr::new();
    let t = mgr.for_decode(Some("application/x-nope"));
    assert_eq!(t.content_type().essence_str(), "application/octet-stream");
    let t = mgr.for_decode(None);
    assert_eq!(t.content_type().essence_str(), "application/octet-stream");
}

#[test]
fn negotiate_walks_accept_in_order() {
    let mgr = TransformerMgr::new();

    let t = mgr.negotiate(Some("application/xml, application/json")).unwrap();
    assert_eq!(t.content_type().essence_str(), "application/xml");

    // first acceptable entry wins even when later ones also match
    let t = mgr
        .negotiate(Some("application/x-nope, application/xml;q=0.5, application/json"))
        .unwrap();
    assert_eq!(t.content_type().essence_str(), "application/xml");
}

#[test]
fn negotiate_wildcard_and_absence_mean_json() {
    let mgr = TransformerMgr::new();
    let t = mgr.negotiate(Some("*/*")).unwrap();
    assert_eq!(t.content_type().essence_str(), "application/json");
    let t = mgr.negotiate(None).unwrap();
    assert_eq!(t.content_type().essence_str(), "application/json");
}

#[test]
fn negotiate_with_no_match_is_none() {
    let mgr = TransformerMgr::new();
    assert!(mgr.negotiate(Some("application/x-nope")).is_none());
}

#[test]
fn registration_overrides_by_essence() {
    let mgr = TransformerMgr::new();
    mgr.register(Arc::new(PlainText::default()));
    let t = mgr.get(mime::TEXT_PLAIN.as_ref()).unwrap();
    assert_eq!(t.content_type().essence_str(), "text/plain");
}

// ===== multipart =====

#[test]
fn multipart_writer_reader_round_trip() {
    let mut body = Vec::new();
    let boundary = {
        let mut w = Writer::new(&mut body);
        w.text("caption", "hi there").unwrap();
        w.part("meta", "application/json", br#"{"k":1}"#).unwrap();
        let up = Upload::from_bytes("a.bin", "application/octet-stream", vec![0u8, 1, 2]);
        w.file("data", &up).unwrap();
        let b = w.boundary().to_owned();
        w.finish().unwrap();
        b
    };

    let mut r = &body[..];
    let mut reader = Reader::new(&mut r, &boundary);

    let head = reader.next_part().unwrap().unwrap();
    assert_eq!(head.name, "caption");
    assert_eq!(head.filename, None);
    let mut buf = Vec::new();
    reader.read_body(&mut buf).unwrap();
    assert_eq!(buf, b"hi there");

    let head = reader.next_part().unwrap().unwrap();
    assert_eq!(head.name, "meta");
    assert_eq!(head.content_type.as_deref(), Some("application/json"));
    let mut buf = Vec::new();
    reader.read_body(&mut buf).unwrap();
    assert_eq!(buf, br#"{"k":1}"#);

    let head = reader.next_part().unwrap().unwrap();
    assert_eq!(head.name, "data");
    assert_eq!(head.filename.as_deref(), Some("a.bin"));
    let mut buf = Vec::new();
    reader.read_body(&mut buf).unwrap();
    assert_eq!(buf, [0u8, 1, 2]);

    assert!(reader.next_part().unwrap().is_none());
}

#[test]
fn multipart_skipped_part_is_drained() {
    let mut body = Vec::new();
    let boundary = {
        let mut w = Writer::new(&mut body);
        w.text("a", "one").unwrap();
        w.text("b", "two").unwrap();
        let b = w.boundary().to_owned();
        w.finish().unwrap();
        b
    };

    let mut r = &body[..];
    let mut reader = Reader::new(&mut r, &boundary);
    // skip "a" without reading its body
    assert_eq!(reader.next_part().unwrap().unwrap().name, "a");
    let head = reader.next_part().unwrap().unwrap();
    assert_eq!(head.name, "b");
    let mut buf = Vec::new();
    reader.read_body(&mut buf).unwrap();
    assert_eq!(buf, b"two");
}

#[test]
fn spool_sink_spills_past_threshold() {
    let mut sink = SpoolSink::with_threshold(8);
    std::io::Write::write_all(&mut sink, b"0123456789abcdef").unwrap();
    let up = sink.finish("big.bin".into(), "application/octet-stream".into()).unwrap();
    assert!(up.is_spooled());
    assert_eq!(up.len(), 16);
    assert_eq!(up.bytes().unwrap(), b"0123456789abcdef".to_vec());
}

#[test]
fn spool_sink_stays_in_memory_below_threshold() {
    let mut sink = SpoolSink::with_threshold(64);
    std::io::Write::write_all(&mut sink, b"small").unwrap();
    let up = sink.finish("s.bin".into(), String::new()).unwrap();
    assert!(!up.is_spooled());
    assert_eq!(up.content_type(), "application/octet-stream");
}

#[test]
fn form_data_transformer_round_trips_values() {
    let t = FormData::default();
    let value = json!({"caption": "hi", "meta": {"k": 1}});
    let mut buf = Vec::new();
    let mut headers = HeaderMap::new();
    t.encode_to(&mut buf, &value, &mut headers).unwrap();
    let ct = headers[http::header::CONTENT_TYPE].to_str().unwrap();
    assert!(ct.starts_with("multipart/form-data; boundary="), "got {ct:?}");

    let mut r = &buf[..];
    let back = t.decode_from(&mut r, &headers).unwrap();
    assert_eq!(back, value);
}
