use http::HeaderMap;
use mime::Mime;
use serde_json::{Map, Value};
use std::io;

use super::{Transformer, TransformError, set_content_type};
use crate::common;

/// `application/x-www-form-urlencoded`.
///
/// Scalars become one pair, arrays repeated pairs, anything nested is
/// carried as its JSON text.
#[derive(Debug, Clone)]
pub struct FormUrlEncoded {
    mime: Mime,
}

impl Default for FormUrlEncoded {
    fn default() -> Self {
        Self { mime: mime::APPLICATION_WWW_FORM_URLENCODED }
    }
}

pub(crate) fn pairs(value: &Value, mime: &str) -> Result<Vec<(String, String)>, TransformError> {
    let Some(map) = value.as_object() else {
        return Err(TransformError::malformed(mime, "expected an object payload"));
    };
    let mut pairs = Vec::with_capacity(map.len());
    for (key, member) in map {
        match member {
            Value::Array(items) if items.iter().any(|i| i.is_object() || i.is_array()) => {
                pairs.push((key.clone(), member.to_string()));
            }
            Value::Object(_) => pairs.push((key.clone(), member.to_string())),
            _ => {
                for atom in common::atoms(member) {
                    pairs.push((key.clone(), atom));
                }
            }
        }
    }
    Ok(pairs)
}

pub(crate) fn collect(pairs: Vec<(String, String)>) -> Value {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            None => {
                map.insert(key, Value::String(value));
            }
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    Value::Object(map)
}

impl Transformer for FormUrlEncoded {
    fn content_type(&self) -> &Mime {
        &self.mime
    }

    fn encode_to(
        &self,
        w: &mut dyn io::Write,
        value: &Value,
        headers: &mut HeaderMap,
    ) -> Result<(), TransformError> {
        set_content_type(headers, self.mime.as_ref());
        let pairs = pairs(value, self.mime.as_ref())?;
        let encoded = serde_urlencoded::to_string(&pairs)
            .map_err(|e| TransformError::malformed(self.mime.as_ref(), e.to_string()))?;
        w.write_all(encoded.as_bytes())?;
        Ok(())
    }

    fn decode_from(
        &self,
        r: &mut dyn io::Read,
        _headers: &HeaderMap,
    ) -> Result<Value, TransformError> {
        let mut raw = String::new();
        r.read_to_string(&mut raw)?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&raw)
            .map_err(|e| TransformError::malformed(self.mime.as_ref(), e.to_string()))?;
        Ok(collect(pairs))
    }
}
