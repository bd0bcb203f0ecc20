//! Canonical status-error envelope.
//!
//! Every non-2xx response body is decodable as [`StatusError`], the wire
//! shape `{key, code, msg, canBeTalk, sources?, errorFields?}`. The HTTP
//! status is encoded in the leading digits of `code`: `401000001` means
//! `401`. Codes that do not decode to a valid status degrade to `500`.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured application error carried across the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusError {
    /// Stable machine key, e.g. `Unauthorized`.
    pub key: String,
    /// Status-encoded error code, HTTP status is `code / 1_000_000`.
    pub code: i64,
    /// Human readable message.
    pub msg: String,
    /// Whether the message is suitable to show to an end user.
    #[serde(rename = "canBeTalk")]
    pub can_be_talk: bool,
    /// Upstream sources the error passed through.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    /// Per-field failures for binding errors.
    #[serde(rename = "errorFields", default, skip_serializing_if = "Vec::is_empty")]
    pub error_fields: Vec<ErrorField>,
}

/// One failing field inside a [`StatusError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorField {
    /// Wire name of the field.
    pub field: String,
    /// What went wrong.
    pub msg: String,
    /// Placement of the field: `path`, `query`, `header`, `cookie`,
    /// `body` or `formData`.
    #[serde(rename = "in")]
    pub location: String,
}

impl StatusError {
    /// Create a [`StatusError`] from an HTTP status, a key and a message.
    pub fn new(status: StatusCode, key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            code: i64::from(status.as_u16()) * 1_000_000,
            msg: msg.into(),
            can_be_talk: true,
            sources: Vec::new(),
            error_fields: Vec::new(),
        }
    }

    /// Create a [`StatusError`] from a raw status-encoded code.
    pub fn with_code(code: i64, key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            code,
            msg: msg.into(),
            can_be_talk: true,
            sources: Vec::new(),
            error_fields: Vec::new(),
        }
    }

    /// `400 Bad Request`.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", msg)
    }

    /// `401 Unauthorized`.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", msg)
    }

    /// `404 Not Found`.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFound", msg)
    }

    /// `406 Not Acceptable`.
    pub fn not_acceptable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_ACCEPTABLE, "NotAcceptable", msg)
    }

    /// `500 Internal Server Error` with a generic, non-talkable message.
    pub fn internal(msg: impl Into<String>) -> Self {
        let mut e = Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError", msg);
        e.can_be_talk = false;
        e
    }

    /// The HTTP status encoded in `code`.
    pub fn status_code(&self) -> StatusCode {
        let status = self.code / 1_000_000;
        u16::try_from(status)
            .ok()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Append an upstream source, e.g. a service name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Append a failing field.
    pub fn with_field(
        mut self,
        field: impl Into<String>,
        msg: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        self.error_fields.push(ErrorField {
            field: field.into(),
            msg: msg.into(),
            location: location.into(),
        });
        self
    }

    /// Extend the message in place.
    pub fn append_msg(mut self, extra: impl AsRef<str>) -> Self {
        if !self.msg.is_empty() {
            self.msg.push_str("; ");
        }
        self.msg.push_str(extra.as_ref());
        self
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{} {}", self.code, self.key, self.msg)?;
        for field in &self.error_fields {
            write!(f, "; {} in {}: {}", field.field, field.location, field.msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for StatusError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_derivation() {
        assert_eq!(
            StatusError::with_code(401000001, "Unauthorized", "Unauthorized").status_code(),
            StatusCode::UNAUTHORIZED,
        );
        assert_eq!(
            StatusError::bad_request("nope").status_code(),
            StatusCode::BAD_REQUEST,
        );
        // malformed codes degrade to 500
        assert_eq!(StatusError::with_code(7, "X", "x").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(StatusError::with_code(-1_000_000, "X", "x").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn envelope_wire_shape() {
        let err = StatusError::with_code(401000001, "Unauthorized", "Unauthorized");
        let body = serde_json::to_string(&err).unwrap();
        assert_eq!(
            body,
            r#"{"key":"Unauthorized","code":401000001,"msg":"Unauthorized","canBeTalk":true}"#,
        );

        let back: StatusError = serde_json::from_str(&body).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn envelope_with_fields() {
        let err = StatusError::bad_request("invalid parameters")
            .with_field("name", "too short", "body");
        let body = serde_json::to_value(&err).unwrap();
        assert_eq!(body["errorFields"][0]["field"], "name");
        assert_eq!(body["errorFields"][0]["in"], "body");

        let back: StatusError = serde_json::from_value(body).unwrap();
        assert_eq!(back.error_fields.len(), 1);
    }
}
