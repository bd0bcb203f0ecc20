//! The request transformer manager.
//!
//! One shared object owning the transformer and validator registries,
//! with the two symmetric operations on top: `new_request` assembles an
//! entity into a wire request, `dissolve` binds a wire request back into
//! an entity. [`handle`](RequestTransformerMgr::handle) runs the full
//! server turn for one operation.

use crate::compose::{error_response, write_response};
use crate::entity::{Context, Entity, Operation};
use crate::error::Error;
use crate::common::log;
use crate::status::StatusError;
use crate::transformer::TransformerMgr;
use crate::validator::ValidatorMgr;
use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, Uri, header};
use std::panic::{AssertUnwindSafe, catch_unwind};

pub(crate) const X_REQUEST_ID: &str = "x-request-id";
pub(crate) const X_OPERATION_ID: &str = "x-operation-id";

/// Shared transformer and validator registries plus the operations that
/// use them.
#[derive(Debug, Default)]
pub struct RequestTransformerMgr {
    transformers: TransformerMgr,
    validators: ValidatorMgr,
}

impl RequestTransformerMgr {
    /// A mgr with the built-in transformers and validator kinds.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transformers(&self) -> &TransformerMgr {
        &self.transformers
    }

    pub fn validators(&self) -> &ValidatorMgr {
        &self.validators
    }

    /// Assemble `entity` into an outbound request.
    pub fn new_request<E: Entity>(&self, entity: &E) -> Result<Request<Bytes>, Error> {
        let plan = E::plan()?;
        let mut req = plan.assemble(entity, &self.transformers, &self.validators)?;
        if let Ok(v) = HeaderValue::from_str(E::ID) {
            req.headers_mut().insert(X_OPERATION_ID, v);
        }
        Ok(req)
    }

    /// Assemble with a caller-supplied method and URL base instead of the
    /// entity's own declaration.
    pub fn new_request_with<E: Entity>(
        &self,
        method: Method,
        base: &str,
        entity: &E,
    ) -> Result<Request<Bytes>, Error> {
        let mut req = self.new_request(entity)?;
        *req.method_mut() = method;
        let base = base.trim_end_matches('/');
        if !base.is_empty() {
            let pq = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let uri: Uri = format!("{base}{pq}").parse().map_err(Error::transform)?;
            *req.uri_mut() = uri;
        }
        Ok(req)
    }

    /// Bind an inbound request into an entity.
    pub fn dissolve<E: Entity>(
        &self,
        req: &Request<Bytes>,
        ctx: &Context,
    ) -> Result<E, StatusError> {
        let plan = E::plan()
            .map_err(|e| StatusError::internal(format!("invalid plan for {}: {e}", E::ID)))?;
        plan.dissolve(req, &self.transformers, &self.validators, ctx)
    }

    /// Run one full server turn: dissolve, execute, compose.
    ///
    /// Panics inside the operation are caught and answered with a 500
    /// envelope instead of tearing the worker down.
    pub fn handle<O: Operation>(&self, req: Request<Bytes>) -> Response<Bytes> {
        let accept = req
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let accept = accept.as_deref();

        let request_id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut ctx = Context::new(O::ID).with_metadata(req.headers().clone());
        if let Some(id) = &request_id {
            ctx = ctx.with_request_id(id);
        }

        let mut res = match self.dissolve::<O>(&req, &ctx) {
            Ok(op) => match catch_unwind(AssertUnwindSafe(|| op.output(&ctx))) {
                Ok(Ok(compose)) => write_response(compose, accept, &self.transformers),
                Ok(Err(status)) => error_response(status, accept, &self.transformers),
                Err(panic) => {
                    let msg = panic_message(&panic);
                    log!("operation {} panicked: {msg}", O::ID);
                    error_response(
                        StatusError::internal("operation failed"),
                        accept,
                        &self.transformers,
                    )
                }
            },
            Err(status) => error_response(status, accept, &self.transformers),
        };

        if let Ok(v) = HeaderValue::from_str(O::ID) {
            res.headers_mut().insert(X_OPERATION_ID, v);
        }
        if let Some(id) = request_id {
            if let Ok(v) = HeaderValue::from_str(&id) {
                res.headers_mut().insert(X_REQUEST_ID, v);
            }
        }
        res
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
