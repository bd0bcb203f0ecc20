//! Error taxonomy.
//!
//! Errors are values throughout: plan construction reports [`PlanError`]
//! before first use, the client surface wraps its failures in [`Error`],
//! and server-side binding collects [`BindError`]s which the dissolve step
//! aggregates into one 400 [`StatusError`](crate::StatusError) envelope.

use crate::entity::Placement;
use std::fmt;

// ===== PlanError =====

/// A configuration error detected while building a request plan.
///
/// These are fatal: the entity declaration itself is wrong and no request
/// can be assembled or dissolved from it.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    /// The path template failed to parse.
    Template { path: String, msg: String },
    /// A field's validate rule failed to parse.
    Rule { field: &'static str, msg: String },
    /// A `body` field and `formData` fields were both declared.
    BodyFormConflict,
    /// More than one `body` field was declared.
    MultipleBodyFields,
    /// A `{name}` template placeholder has no matching path field.
    MissingPathField { name: String },
    /// A path-placed field does not appear in the template.
    DanglingPathField { name: String },
    /// Two fields share a wire name within one placement.
    DuplicateName { place: Placement, name: String },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template { path, msg } => write!(f, "invalid path template {path:?}: {msg}"),
            Self::Rule { field, msg } => write!(f, "invalid validate rule on field {field:?}: {msg}"),
            Self::BodyFormConflict => f.write_str("body and formData fields are mutually exclusive"),
            Self::MultipleBodyFields => f.write_str("at most one body field is allowed"),
            Self::MissingPathField { name } => {
                write!(f, "path template parameter {{{name}}} has no matching path field")
            }
            Self::DanglingPathField { name } => {
                write!(f, "path field {name:?} does not appear in the path template")
            }
            Self::DuplicateName { place, name } => {
                write!(f, "duplicate wire name {name:?} in {place}")
            }
        }
    }
}

impl std::error::Error for PlanError {}

// ===== BindError =====

/// One server-side field failure: missing value, coercion failure or a
/// validator rejection. Carries the wire name and placement so the
/// aggregated envelope can point at the offending input.
#[derive(Debug, Clone)]
pub struct BindError {
    pub field: String,
    pub place: Placement,
    pub msg: String,
}

impl BindError {
    pub(crate) fn new(field: &str, place: Placement, msg: impl Into<String>) -> Self {
        Self { field: field.to_owned(), place, msg: msg.into() }
    }

    pub(crate) fn missing(field: &str, place: Placement) -> Self {
        Self::new(field, place, format!("missing required {place} parameter {field:?}"))
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}: {}", self.field, self.place, self.msg)
    }
}

impl std::error::Error for BindError {}

// ===== Error =====

/// A client-side failure.
#[derive(Debug)]
pub enum Error {
    /// The outbound request could not be built: unfilled path parameter,
    /// validator rejected an outgoing value, encode failure.
    RequestTransformFailed(String),
    /// The transport failed: connect, write, read or timeout.
    RequestFailed(String),
    /// The response body could not be decoded.
    ReadFailed(String),
    /// The server answered with a structured error envelope.
    Status(crate::StatusError),
}

impl Error {
    pub(crate) fn transform(cause: impl fmt::Display) -> Self {
        Self::RequestTransformFailed(cause.to_string())
    }

    pub(crate) fn request(cause: impl fmt::Display) -> Self {
        Self::RequestFailed(cause.to_string())
    }

    pub(crate) fn read(cause: impl fmt::Display) -> Self {
        Self::ReadFailed(cause.to_string())
    }

    /// The structured envelope, when the server returned one.
    pub fn status_error(&self) -> Option<&crate::StatusError> {
        match self {
            Self::Status(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestTransformFailed(msg) => write!(f, "request transform failed: {msg}"),
            Self::RequestFailed(msg) => write!(f, "request failed: {msg}"),
            Self::ReadFailed(msg) => write!(f, "read failed: {msg}"),
            Self::Status(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<PlanError> for Error {
    fn from(e: PlanError) -> Self {
        Self::transform(e)
    }
}
