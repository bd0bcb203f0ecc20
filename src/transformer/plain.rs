use http::HeaderMap;
use mime::Mime;
use serde_json::Value;
use std::io;

use super::{Transformer, TransformError, set_content_type};
use crate::common;

/// `text/plain` scalar pass-through.
#[derive(Debug, Clone)]
pub struct PlainText {
    mime: Mime,
}

impl Default for PlainText {
    fn default() -> Self {
        Self { mime: mime::TEXT_PLAIN }
    }
}

impl Transformer for PlainText {
    fn content_type(&self) -> &Mime {
        &self.mime
    }

    fn encode_to(
        &self,
        w: &mut dyn io::Write,
        value: &Value,
        headers: &mut HeaderMap,
    ) -> Result<(), TransformError> {
        if value.is_object() || value.is_array() {
            return Err(TransformError::malformed(self.mime.as_ref(), "expected a scalar payload"));
        }
        set_content_type(headers, self.mime.as_ref());
        w.write_all(common::atom(value).as_bytes())?;
        Ok(())
    }

    fn decode_from(
        &self,
        r: &mut dyn io::Read,
        _headers: &HeaderMap,
    ) -> Result<Value, TransformError> {
        let mut text = String::new();
        r.read_to_string(&mut text)?;
        Ok(Value::String(text))
    }
}

/// `application/octet-stream` byte pass-through, also the universal
/// decode fallback for unknown MIMEs.
#[derive(Debug, Clone)]
pub struct OctetStream {
    mime: Mime,
}

impl Default for OctetStream {
    fn default() -> Self {
        Self { mime: mime::APPLICATION_OCTET_STREAM }
    }
}

impl Transformer for OctetStream {
    fn content_type(&self) -> &Mime {
        &self.mime
    }

    fn encode_to(
        &self,
        w: &mut dyn io::Write,
        value: &Value,
        headers: &mut HeaderMap,
    ) -> Result<(), TransformError> {
        if value.is_object() || value.is_array() {
            return Err(TransformError::malformed(self.mime.as_ref(), "expected a scalar payload"));
        }
        set_content_type(headers, self.mime.as_ref());
        w.write_all(common::atom(value).as_bytes())?;
        Ok(())
    }

    fn decode_from(
        &self,
        r: &mut dyn io::Read,
        _headers: &HeaderMap,
    ) -> Result<Value, TransformError> {
        let mut raw = Vec::new();
        r.read_to_end(&mut raw)?;
        Ok(Value::String(String::from_utf8_lossy(&raw).into_owned()))
    }
}

/// A typed media wrapper: a zero-configuration transformer whose only
/// role is to pin a preset `Content-Type` on an arbitrary byte buffer.
#[derive(Debug, Clone)]
pub struct MediaTransformer {
    mime: Mime,
}

impl MediaTransformer {
    /// Build a wrapper for a preset media type string.
    pub fn preset(mime: &str) -> Option<Self> {
        Some(Self { mime: mime.parse().ok()? })
    }
}

impl Transformer for MediaTransformer {
    fn content_type(&self) -> &Mime {
        &self.mime
    }

    fn encode_to(
        &self,
        w: &mut dyn io::Write,
        value: &Value,
        headers: &mut HeaderMap,
    ) -> Result<(), TransformError> {
        let Some(text) = value.as_str() else {
            return Err(TransformError::malformed(self.mime.as_ref(), "expected a byte payload"));
        };
        set_content_type(headers, self.mime.as_ref());
        w.write_all(text.as_bytes())?;
        Ok(())
    }

    fn decode_from(
        &self,
        r: &mut dyn io::Read,
        _headers: &HeaderMap,
    ) -> Result<Value, TransformError> {
        let mut raw = Vec::new();
        r.read_to_end(&mut raw)?;
        Ok(Value::String(String::from_utf8_lossy(&raw).into_owned()))
    }
}
