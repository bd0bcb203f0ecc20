//! Blocking HTTP client over assembled entities.
//!
//! Wraps `reqwest::blocking`: an entity is assembled through the shared
//! [`RequestTransformerMgr`], sent against a base URL, and the response
//! comes back as a [`TransformResult`] that decodes lazily through the
//! same transformer registry.

use crate::entity::{Entity, from_pivot};
use crate::error::Error;
use crate::mgr::RequestTransformerMgr;
use crate::status::StatusError;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, header};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// An entity-aware blocking client.
#[derive(Debug, Clone)]
pub struct Client {
    base: String,
    mgr: Arc<RequestTransformerMgr>,
    http: reqwest::blocking::Client,
    timeout: Option<Duration>,
}

impl Client {
    /// A client against `base`, e.g. `http://localhost:8080`.
    pub fn new(base: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::blocking::Client::builder()
            .build()
            .map_err(Error::request)?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_owned(),
            mgr: Arc::new(RequestTransformerMgr::new()),
            http,
            timeout: None,
        })
    }

    /// Cap each request, connect included, at `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Share a preconfigured mgr, e.g. one with extra transformers.
    pub fn with_mgr(mut self, mgr: Arc<RequestTransformerMgr>) -> Self {
        self.mgr = mgr;
        self
    }

    pub fn mgr(&self) -> &RequestTransformerMgr {
        &self.mgr
    }

    /// Assemble, send and wait for the response.
    ///
    /// Non-2xx responses are parsed as error envelopes and surface as
    /// [`Error::Status`]; a body that is not an envelope still becomes
    /// one, so callers always get the canonical shape.
    pub fn call<E: Entity>(&self, entity: &E) -> Result<TransformResult, Error> {
        let req = self.mgr.new_request(entity)?;
        let url = format!("{}{}", self.base, req.uri());

        let mut builder = self
            .http
            .request(req.method().clone(), &url)
            .headers(req.headers().clone())
            .body(req.body().to_vec());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let res = builder.send().map_err(|e| {
            if e.is_timeout() {
                Error::request(format!("timeout calling {url}: {e}"))
            } else {
                Error::request(format!("calling {url}: {e}"))
            }
        })?;

        let status = res.status();
        let headers = res.headers().clone();
        let body = res.bytes().map_err(|e| {
            if e.is_timeout() {
                Error::read(format!("timeout reading response from {url}: {e}"))
            } else {
                Error::read(format!("reading response from {url}: {e}"))
            }
        })?;

        if !status.is_success() {
            return Err(Error::Status(envelope_of(status, &body)));
        }

        Ok(TransformResult {
            status,
            headers,
            body,
            mgr: Arc::clone(&self.mgr),
        })
    }
}

/// Recover the canonical envelope from an error response, wrapping plain
/// bodies into one when the server spoke something else.
fn envelope_of(status: StatusCode, body: &[u8]) -> StatusError {
    if let Ok(e) = serde_json::from_slice::<StatusError>(body) {
        return e;
    }
    let msg = String::from_utf8_lossy(body);
    let msg = msg.trim();
    let msg = if msg.is_empty() {
        status.canonical_reason().unwrap_or("request failed")
    } else {
        msg
    };
    StatusError::new(status, "UpstreamError", msg)
}

// ===== TransformResult =====

/// A successful response, held encoded until the caller binds it.
#[derive(Debug)]
pub struct TransformResult {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    mgr: Arc<RequestTransformerMgr>,
}

impl TransformResult {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw response body.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// The response `Content-Type`, when present.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Decode the body through the transformer matching its
    /// `Content-Type` and bind it into `T`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let t = self.mgr.transformers().for_decode(self.content_type());
        let mut r = &self.body[..];
        let value = t.decode_from(&mut r, &self.headers).map_err(Error::read)?;
        from_pivot(value).map_err(Error::read)
    }
}
