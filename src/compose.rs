//! Response composition.
//!
//! Operations return a [`Compose`]: status, headers and a payload that is
//! either already-encoded bytes or a pivot value rendered through content
//! negotiation at the last moment.

use crate::entity::pivot;
use crate::status::StatusError;
use crate::transformer::TransformerMgr;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, header};
use mime::Mime;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::time::Duration;

// ===== Compose =====

/// A response under construction.
#[derive(Debug)]
pub struct Compose {
    status: StatusCode,
    headers: HeaderMap,
    payload: Payload,
}

/// What travels in the response body.
#[derive(Debug)]
enum Payload {
    Empty,
    /// Encoded by the negotiated transformer when the response is written.
    Pivot(Value),
    /// Pre-encoded bytes, exempt from negotiation.
    Raw(Bytes, Mime),
}

impl Compose {
    /// 200 with a negotiable payload.
    pub fn ok(value: impl Serialize) -> Self {
        Self::with_status(StatusCode::OK, value)
    }

    /// Arbitrary status with a negotiable payload.
    pub fn with_status(status: StatusCode, value: impl Serialize) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            payload: Payload::Pivot(pivot(&value)),
        }
    }

    /// 204 with no body.
    pub fn empty() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            payload: Payload::Empty,
        }
    }

    /// Pre-encoded bytes under a fixed media type, skipping negotiation.
    pub fn raw(bytes: impl Into<Bytes>, mime: Mime) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            payload: Payload::Raw(bytes.into(), mime),
        }
    }

    /// 303 redirect to `location`.
    pub fn redirect(location: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(location) {
            headers.insert(header::LOCATION, v);
        }
        Self {
            status: StatusCode::SEE_OTHER,
            headers,
            payload: Payload::Empty,
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set one response header. Invalid names or values are dropped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Attach a `Set-Cookie` header.
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        if let Ok(v) = HeaderValue::from_str(&cookie.render()) {
            self.headers.append(header::SET_COOKIE, v);
        }
        self
    }

    /// Mark the payload as a download with the given filename.
    pub fn attachment(self, filename: &str) -> Self {
        let value = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
        self.header(header::CONTENT_DISPOSITION.as_str(), &value)
    }
}

// ===== Cookie =====

/// A `Set-Cookie` value builder.
#[derive(Debug, Clone, Default)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<Duration>,
    secure: bool,
    http_only: bool,
    same_site: Option<&'static str>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), ..Self::default() }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// `Strict`, `Lax` or `None`.
    pub fn same_site(mut self, mode: &'static str) -> Self {
        self.same_site = Some(mode);
        self
    }

    fn render(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            let _ = write!(out, "; Path={path}");
        }
        if let Some(domain) = &self.domain {
            let _ = write!(out, "; Domain={domain}");
        }
        if let Some(max_age) = self.max_age {
            let _ = write!(out, "; Max-Age={}", max_age.as_secs());
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(mode) = self.same_site {
            let _ = write!(out, "; SameSite={mode}");
        }
        out
    }
}

// ===== writing =====

/// Render a compose into a wire response, negotiating the payload's
/// encoding against the request's `Accept`.
pub(crate) fn write_response(
    compose: Compose,
    accept: Option<&str>,
    transformers: &TransformerMgr,
) -> Response<Bytes> {
    let Compose { status, headers, payload } = compose;

    let (body, mut headers) = match payload {
        Payload::Empty => (Bytes::new(), headers),
        Payload::Raw(bytes, mime) => {
            let mut headers = headers;
            if let Ok(v) = HeaderValue::from_str(mime.as_ref()) {
                headers.insert(header::CONTENT_TYPE, v);
            }
            (bytes, headers)
        }
        Payload::Pivot(value) => {
            // an explicitly set content type beats negotiation
            let explicit = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let t = match &explicit {
                Some(ct) => match transformers.get(ct) {
                    Some(t) => t,
                    None => {
                        return error_response(
                            StatusError::internal(format!("no transformer for {ct:?}")),
                            accept,
                            transformers,
                        );
                    }
                },
                None => match transformers.negotiate(accept) {
                    Some(t) => t,
                    None => {
                        return error_response(
                            StatusError::not_acceptable("no acceptable representation"),
                            None,
                            transformers,
                        );
                    }
                },
            };
            let mut headers = headers;
            let mut buf = Vec::new();
            if let Err(e) = t.encode_to(&mut buf, &value, &mut headers) {
                return error_response(
                    StatusError::internal(format!("response encode failed: {e}")),
                    accept,
                    transformers,
                );
            }
            (Bytes::from(buf), headers)
        }
    };

    finish(status, &mut headers, body)
}

/// Render a structured error envelope, honoring `Accept` so error bodies
/// negotiate like any other payload.
pub(crate) fn error_response(
    err: StatusError,
    accept: Option<&str>,
    transformers: &TransformerMgr,
) -> Response<Bytes> {
    let status = err.status_code();
    let value = pivot(&err);
    let mut headers = HeaderMap::new();

    let mut buf = Vec::new();
    let encoded = transformers
        .negotiate(accept)
        .and_then(|t| t.encode_to(&mut buf, &value, &mut headers).ok());
    if encoded.is_none() {
        // last resort, the envelope must always reach the caller
        buf = value.to_string().into_bytes();
        headers.clear();
        if let Ok(v) = HeaderValue::from_str(mime::APPLICATION_JSON.as_ref()) {
            headers.insert(header::CONTENT_TYPE, v);
        }
    }

    finish(status, &mut headers, Bytes::from(buf))
}

fn finish(status: StatusCode, headers: &mut HeaderMap, body: Bytes) -> Response<Bytes> {
    if status == StatusCode::NO_CONTENT {
        headers.remove(header::CONTENT_TYPE);
        let mut res = Response::new(Bytes::new());
        *res.status_mut() = status;
        *res.headers_mut() = std::mem::take(headers);
        return res;
    }
    let mut res = Response::new(body);
    *res.status_mut() = status;
    *res.headers_mut() = std::mem::take(headers);
    res
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn mgr() -> TransformerMgr {
        TransformerMgr::new()
    }

    #[test]
    fn cookie_renders_attributes() {
        let c = Cookie::new("sid", "abc")
            .path("/")
            .max_age(Duration::from_secs(3600))
            .secure()
            .http_only()
            .same_site("Lax");
        assert_eq!(
            c.render(),
            "sid=abc; Path=/; Max-Age=3600; Secure; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn set_cookie_lands_on_the_response() {
        let res = write_response(
            Compose::ok(json!({})).cookie(Cookie::new("sid", "abc").http_only()),
            None,
            &mgr(),
        );
        assert_eq!(res.headers()[header::SET_COOKIE], "sid=abc; HttpOnly");
    }

    #[test]
    fn redirect_sets_location() {
        let res = write_response(Compose::redirect("/next"), None, &mgr());
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers()[header::LOCATION], "/next");
        assert!(res.body().is_empty());
    }

    #[test]
    fn empty_is_204_without_body() {
        let res = write_response(Compose::empty(), None, &mgr());
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(res.body().is_empty());
        assert!(res.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn raw_payload_skips_negotiation() {
        let res = write_response(
            Compose::raw(&b"\x89PNG"[..], mime::IMAGE_PNG).attachment("a.png"),
            Some("application/json"),
            &mgr(),
        );
        assert_eq!(res.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            res.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"a.png\""
        );
        assert_eq!(&res.body()[..], b"\x89PNG");
    }

    #[test]
    fn explicit_content_type_beats_accept() {
        let res = write_response(
            Compose::ok(json!({"a": 1})).header("content-type", "application/xml"),
            Some("application/json"),
            &mgr(),
        );
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/xml");
        assert_eq!(
            std::str::from_utf8(res.body()).unwrap(),
            "<result><a>1</a></result>"
        );
    }

    #[test]
    fn no_acceptable_encoding_is_406() {
        let res = write_response(
            Compose::ok(json!({"a": 1})),
            Some("application/x-nope"),
            &mgr(),
        );
        assert_eq!(res.status(), StatusCode::NOT_ACCEPTABLE);
    }
}
