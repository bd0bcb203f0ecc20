//! Full-turn tests over the public surface: entity declaration, server
//! handle with negotiation, the error envelope and the blocking client.

use bytes::Bytes;
use portage::http::{Method, Request, StatusCode, header};
use portage::{
    Compose, Context, Entity, Operation, RequestTransformerMgr, StatusError, entity,
};
use serde_json::{Value, json};

entity! {
    pub struct GetCountry {
        method = GET;
        path = "/country/{code}";
        { code: String, in: path, name: "code", validate: "@string[2,2]" }
    }
}

impl Operation for GetCountry {
    fn output(self, _ctx: &Context) -> Result<Compose, StatusError> {
        if self.code == "XX" {
            return Err(StatusError::with_code(
                401_000_001,
                "Unauthorized",
                "Unauthorized",
            ));
        }
        Ok(Compose::ok(json!({ "country": self.code })))
    }
}

entity! {
    pub struct Boom {
        method = GET;
        path = "/boom";
    }
}

impl Operation for Boom {
    fn output(self, _ctx: &Context) -> Result<Compose, StatusError> {
        panic!("blew up");
    }
}

fn get(uri: &str) -> Request<Bytes> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Bytes::new())
        .unwrap()
}

#[test]
fn assembled_request_fills_the_template() {
    let mgr = RequestTransformerMgr::new();
    let req = mgr.new_request(&GetCountry { code: "US".into() }).unwrap();
    assert_eq!(req.method(), Method::GET);
    assert_eq!(req.uri().path(), "/country/US");
}

#[test]
fn full_turn_defaults_to_json() {
    let mgr = RequestTransformerMgr::new();
    let res = mgr.handle::<GetCountry>(get("/country/US"));

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(res.headers()["x-operation-id"], "GetCountry");
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body, json!({"country": "US"}));
}

#[test]
fn accept_header_switches_the_encoding() {
    let mgr = RequestTransformerMgr::new();
    let req = Request::builder()
        .uri("/country/US")
        .header(header::ACCEPT, "application/xml")
        .body(Bytes::new())
        .unwrap();
    let res = mgr.handle::<GetCountry>(req);

    assert_eq!(res.headers()[header::CONTENT_TYPE], "application/xml");
    assert_eq!(
        std::str::from_utf8(res.body()).unwrap(),
        "<result><country>US</country></result>"
    );
}

#[test]
fn unacceptable_accept_is_406() {
    let mgr = RequestTransformerMgr::new();
    let req = Request::builder()
        .uri("/country/US")
        .header(header::ACCEPT, "application/x-nope")
        .body(Bytes::new())
        .unwrap();
    let res = mgr.handle::<GetCountry>(req);

    assert_eq!(res.status(), StatusCode::NOT_ACCEPTABLE);
    let envelope: StatusError = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(envelope.key, "NotAcceptable");
}

#[test]
fn error_envelope_keeps_the_canonical_shape() {
    let mgr = RequestTransformerMgr::new();
    let res = mgr.handle::<GetCountry>(get("/country/XX"));

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(
        body,
        json!({
            "key": "Unauthorized",
            "code": 401000001i64,
            "msg": "Unauthorized",
            "canBeTalk": true
        })
    );
}

#[test]
fn binding_failures_point_at_fields() {
    let mgr = RequestTransformerMgr::new();
    let res = mgr.handle::<GetCountry>(get("/country/X"));

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let envelope: StatusError = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(envelope.error_fields.len(), 1);
    assert_eq!(envelope.error_fields[0].field, "code");
    assert_eq!(envelope.error_fields[0].location, "path");
}

#[test]
fn request_id_is_echoed() {
    let mgr = RequestTransformerMgr::new();
    let req = Request::builder()
        .uri("/country/US")
        .header("x-request-id", "req-7")
        .body(Bytes::new())
        .unwrap();
    let res = mgr.handle::<GetCountry>(req);
    assert_eq!(res.headers()["x-request-id"], "req-7");
}

#[test]
fn panics_become_500_envelopes() {
    let mgr = RequestTransformerMgr::new();
    let res = mgr.handle::<Boom>(get("/boom"));

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let envelope: StatusError = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(envelope.key, "InternalServerError");
    assert!(!envelope.can_be_talk);
}

// ===== client =====

#[cfg(feature = "client")]
mod client {
    use super::*;
    use portage::Client;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    /// Answers the first connection with one canned response.
    fn canned_server(status_line: &str, content_type: &str, body: &str) -> String {
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn client_binds_a_success_body() {
        let base = canned_server("200 OK", "application/json", r#"{"country":"US"}"#);
        let client = Client::new(base).unwrap();
        let result = client.call(&GetCountry { code: "US".into() }).unwrap();

        assert_eq!(result.status(), StatusCode::OK);
        let body: Value = result.bind().unwrap();
        assert_eq!(body, json!({"country": "US"}));
    }

    #[test]
    fn client_surfaces_the_error_envelope() {
        let base = canned_server(
            "401 Unauthorized",
            "application/json",
            r#"{"key":"Unauthorized","code":401000001,"msg":"Unauthorized","canBeTalk":true}"#,
        );
        let client = Client::new(base).unwrap();
        let err = client.call(&GetCountry { code: "US".into() }).unwrap_err();

        let status = err.status_error().expect("expected an envelope");
        assert_eq!(status.key, "Unauthorized");
        assert_eq!(status.code, 401_000_001);
        assert_eq!(status.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn client_wraps_plain_error_bodies() {
        let base = canned_server("503 Service Unavailable", "text/plain", "down for maintenance");
        let client = Client::new(base).unwrap();
        let err = client.call(&GetCountry { code: "US".into() }).unwrap_err();

        let status = err.status_error().expect("expected an envelope");
        assert_eq!(status.key, "UpstreamError");
        assert_eq!(status.msg, "down for maintenance");
        assert_eq!(status.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn client_times_out_against_a_stalled_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            // accept and hold the connection open without answering
            if let Ok(conn) = listener.accept() {
                thread::sleep(Duration::from_secs(3));
                drop(conn);
            }
        });

        let client = Client::new(format!("http://{addr}"))
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let err = client.call(&GetCountry { code: "US".into() }).unwrap_err();
        assert!(err.to_string().contains("timeout"), "got {err}");
    }
}
