//! Per-MIME transformers.
//!
//! A [`Transformer`] encodes and decodes one in-memory pivot value against
//! one media type. [`TransformerMgr`] is the process-lifetime registry:
//! MIME essence to shared instance, with octet-stream as the universal
//! decode fallback and an error for unknown encode targets.

use fnv::FnvHashMap;
use http::HeaderMap;
use mime::Mime;
use serde_json::Value;
use std::{
    fmt, io,
    sync::{Arc, PoisonError, RwLock},
};

mod form;
mod json;
pub mod multipart;
mod plain;
mod xml;

#[cfg(test)]
mod test;

pub use form::FormUrlEncoded;
pub use json::JsonTransformer;
pub use multipart::{FormData, Upload};
pub use plain::{MediaTransformer, OctetStream, PlainText};
pub use xml::XmlTransformer;

// ===== TransformError =====

/// An encode or decode failure.
#[derive(Debug)]
pub enum TransformError {
    Io(io::Error),
    Json(serde_json::Error),
    /// No transformer registered for the requested encode MIME.
    Unsupported(String),
    /// The payload does not conform to the MIME's framing.
    Malformed { mime: String, msg: String },
    /// The request deadline expired during a long read.
    Canceled,
}

impl TransformError {
    pub(crate) fn malformed(mime: &str, msg: impl Into<String>) -> Self {
        Self::Malformed { mime: mime.to_owned(), msg: msg.into() }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "i/o failure: {e}"),
            Self::Json(e) => write!(f, "json failure: {e}"),
            Self::Unsupported(mime) => write!(f, "no transformer registered for {mime:?}"),
            Self::Malformed { mime, msg } => write!(f, "malformed {mime} payload: {msg}"),
            Self::Canceled => f.write_str("deadline expired during decode"),
        }
    }
}

impl std::error::Error for TransformError {}

impl From<io::Error> for TransformError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

// ===== Transformer =====

/// Codec for one media type over the pivot value.
pub trait Transformer: Send + Sync {
    /// The media type this transformer serves.
    fn content_type(&self) -> &Mime;

    /// Which struct-field tag drives member naming for this MIME:
    /// `"json"`, `"xml"` or `"name"`.
    fn named_by_tag(&self) -> &'static str {
        "name"
    }

    /// Encode `value` into `w`. The transformer owns the `Content-Type`
    /// it writes into `headers` (multipart adds its boundary there).
    fn encode_to(
        &self,
        w: &mut dyn io::Write,
        value: &Value,
        headers: &mut HeaderMap,
    ) -> Result<(), TransformError>;

    /// Decode one pivot value out of `r`, honoring framing parameters
    /// carried in `headers`.
    fn decode_from(&self, r: &mut dyn io::Read, headers: &HeaderMap)
    -> Result<Value, TransformError>;
}

pub(crate) fn set_content_type(headers: &mut HeaderMap, value: &str) {
    if let Ok(v) = http::HeaderValue::from_str(value) {
        headers.insert(http::header::CONTENT_TYPE, v);
    }
}

// ===== TransformerMgr =====

/// Media-type keyed transformer registry.
///
/// Lookups are by MIME essence (`type/subtype`, parameters stripped).
/// Registration is expected during the initialization window; lookups are
/// plain read-lock hits afterwards.
pub struct TransformerMgr {
    table: RwLock<FnvHashMap<String, Arc<dyn Transformer>>>,
}

impl fmt::Debug for TransformerMgr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TransformerMgr")
            .field("mimes", &table.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for TransformerMgr {
    fn default() -> Self {
        let mgr = Self::empty();
        mgr.register(Arc::new(JsonTransformer::default()));
        mgr.register(Arc::new(XmlTransformer::default()));
        mgr.register(Arc::new(FormUrlEncoded::default()));
        mgr.register(Arc::new(FormData::default()));
        mgr.register(Arc::new(PlainText::default()));
        mgr.register(Arc::new(OctetStream::default()));
        for preset in ["image/png", "image/jpeg", "image/gif", "audio/ogg", "audio/mpeg", "video/mp4"] {
            if let Some(wrapper) = MediaTransformer::preset(preset) {
                mgr.register(Arc::new(wrapper));
            }
        }
        mgr
    }
}

impl TransformerMgr {
    /// A mgr with the standard MIME set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mgr with nothing registered.
    pub fn empty() -> Self {
        Self { table: RwLock::new(FnvHashMap::default()) }
    }

    /// Register a transformer under its content type's essence.
    pub fn register(&self, t: Arc<dyn Transformer>) {
        let key = t.content_type().essence_str().to_owned();
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, t);
    }

    /// Exact essence lookup.
    pub fn get(&self, mime: &str) -> Option<Arc<dyn Transformer>> {
        let essence = mime.parse::<Mime>().ok()?;
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(essence.essence_str())
            .cloned()
    }

    /// The transformer to encode with; unknown MIMEs are an error.
    pub fn for_encode(&self, mime: &str) -> Result<Arc<dyn Transformer>, TransformError> {
        self.get(mime)
            .ok_or_else(|| TransformError::Unsupported(mime.to_owned()))
    }

    /// The transformer to decode with; unknown or absent MIMEs fall back
    /// to octet-stream.
    pub fn for_decode(&self, mime: Option<&str>) -> Arc<dyn Transformer> {
        mime.and_then(|m| self.get(m))
            .or_else(|| self.get(mime::APPLICATION_OCTET_STREAM.as_ref()))
            .unwrap_or_else(|| Arc::new(OctetStream::default()))
    }

    /// Content negotiation: the first `Accept` entry with a registered
    /// transformer wins; `*/*` and an absent header fall back to JSON.
    /// `None` means nothing acceptable is served (a `406`).
    pub fn negotiate(&self, accept: Option<&str>) -> Option<Arc<dyn Transformer>> {
        let Some(accept) = accept else {
            return self.get(mime::APPLICATION_JSON.as_ref());
        };
        for entry in accept.split(',') {
            let essence = entry.split(';').next().unwrap_or("").trim();
            if essence.is_empty() {
                continue;
            }
            if essence == "*/*" {
                if let Some(t) = self.get(mime::APPLICATION_JSON.as_ref()) {
                    return Some(t);
                }
                continue;
            }
            if let Some(t) = self.get(essence) {
                return Some(t);
            }
        }
        None
    }
}
