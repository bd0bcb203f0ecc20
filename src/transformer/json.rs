use http::HeaderMap;
use mime::Mime;
use serde_json::Value;
use std::io;

use super::{Transformer, TransformError, set_content_type};

/// `application/json`, the canonical body encoding.
#[derive(Debug, Clone)]
pub struct JsonTransformer {
    mime: Mime,
}

impl Default for JsonTransformer {
    fn default() -> Self {
        Self { mime: mime::APPLICATION_JSON }
    }
}

impl Transformer for JsonTransformer {
    fn content_type(&self) -> &Mime {
        &self.mime
    }

    fn named_by_tag(&self) -> &'static str {
        "json"
    }

    fn encode_to(
        &self,
        w: &mut dyn io::Write,
        value: &Value,
        headers: &mut HeaderMap,
    ) -> Result<(), TransformError> {
        set_content_type(headers, self.mime.as_ref());
        serde_json::to_writer(w, value)?;
        Ok(())
    }

    fn decode_from(
        &self,
        r: &mut dyn io::Read,
        _headers: &HeaderMap,
    ) -> Result<Value, TransformError> {
        Ok(serde_json::from_reader(r)?)
    }
}
