//! Entity contract.
//!
//! A request entity is a typed value describing one HTTP operation: its
//! fields carry placement annotations, and the same description drives
//! client-side assemble and server-side dissolve. Entities are declared
//! with the [`entity!`](crate::entity!) macro, which generates the struct
//! and its cached [`Plan`](crate::plan::Plan).

use http::{HeaderMap, Method};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::{
    compose::Compose,
    error::PlanError,
    plan::Plan,
    status::StatusError,
    transformer::Upload,
};

mod macros;

// ===== Placement =====

/// Where a field lives on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    Path,
    Query,
    Header,
    Cookie,
    Body,
    FormData,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
            Self::Body => "body",
            Self::FormData => "formData",
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===== Field =====

/// One annotated field's contract within a plan.
pub struct Field<E> {
    pub(crate) name: &'static str,
    pub(crate) place: Placement,
    pub(crate) required: bool,
    pub(crate) omit_empty: bool,
    pub(crate) default_value: Option<&'static str>,
    pub(crate) rule: Option<&'static str>,
    pub(crate) mime: Option<&'static str>,
    pub(crate) bind: Bind<E>,
}

/// Typed access to a field, through the pivot value or as a file.
pub enum Bind<E> {
    Value {
        get: fn(&E) -> Value,
        set: fn(&mut E, Value) -> Result<(), serde_json::Error>,
    },
    File {
        get: fn(&E) -> Option<&Upload>,
        set: fn(&mut E, Upload),
    },
}

impl<E> fmt::Debug for Field<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("in", &self.place)
            .field("required", &self.required)
            .field("validate", &self.rule)
            .finish()
    }
}

impl<E> Field<E> {
    /// A value field bound through the pivot.
    pub fn value(
        name: &'static str,
        place: Placement,
        get: fn(&E) -> Value,
        set: fn(&mut E, Value) -> Result<(), serde_json::Error>,
    ) -> Self {
        Self {
            name,
            place,
            // path parameters are always required
            required: place == Placement::Path,
            omit_empty: false,
            default_value: None,
            rule: None,
            mime: None,
            bind: Bind::Value { get, set },
        }
    }

    /// A file field, always `formData`-placed.
    pub fn file(
        name: &'static str,
        get: fn(&E) -> Option<&Upload>,
        set: fn(&mut E, Upload),
    ) -> Self {
        Self {
            name,
            place: Placement::FormData,
            required: false,
            omit_empty: false,
            default_value: None,
            rule: None,
            mime: None,
            bind: Bind::File { get, set },
        }
    }

    /// Override the wire name (defaults to the struct field name).
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn omit_empty(mut self) -> Self {
        self.omit_empty = true;
        self
    }

    /// Default applied when the wire carries no value.
    pub fn default_value(mut self, value: &'static str) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Validate rule in the tag grammar.
    pub fn validate(mut self, rule: &'static str) -> Self {
        self.rule = Some(rule);
        self
    }

    /// MIME hint for body fields.
    pub fn mime(mut self, mime: &'static str) -> Self {
        self.mime = Some(mime);
        self
    }

    pub fn wire_name(&self) -> &'static str {
        self.name
    }

    pub fn placement(&self) -> Placement {
        self.place
    }
}

// ===== Entity =====

/// A typed request entity. Implemented by [`entity!`](crate::entity!).
pub trait Entity: Default + Sized + 'static {
    /// Operation identifier, carried as `X-Operation-Id`.
    const ID: &'static str;

    /// HTTP method of the operation.
    fn method() -> Method {
        Method::GET
    }

    /// Path template with `{name}` placeholders.
    fn path() -> &'static str {
        ""
    }

    /// The cached plan for this entity type. Built on first use, cached
    /// forever; configuration errors surface here before first use.
    fn plan() -> Result<&'static Plan<Self>, PlanError>;
}

/// Server-side response producer of an entity.
pub trait Operation: Entity {
    fn output(self, ctx: &Context) -> Result<Compose, StatusError>;
}

// ===== Context =====

/// Request-scoped context handed to [`Operation::output`].
#[derive(Debug, Clone, Default)]
pub struct Context {
    operation_id: String,
    request_id: Option<String>,
    deadline: Option<Instant>,
    metadata: HeaderMap,
}

impl Context {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self { operation_id: operation_id.into(), ..Self::default() }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has passed. Long decode loops poll this.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Propagated operation metadata (header-shaped, case-insensitive).
    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }
}

// ===== pivot =====

/// Serialize a field value into the pivot. Serialization of plain data
/// types is infallible; anything exotic degrades to `null`.
pub fn pivot<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Deserialize a field value out of the pivot.
///
/// Wire atoms arrive as strings; when the direct attempt fails the value
/// is loosened once (strings that read as JSON scalars become scalars)
/// and retried, so `"42"` still lands in an integer field.
pub fn from_pivot<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    match serde_json::from_value(value.clone()) {
        Ok(v) => Ok(v),
        Err(first) => serde_json::from_value(loosen(value)).map_err(|_| first),
    }
}

fn loosen(value: Value) -> Value {
    match value {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => Value::String(s),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(loosen).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, loosen(v))).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn pivot_round_trip() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Pair {
            name: String,
            age: u8,
        }

        let v = pivot(&Pair { name: "al".into(), age: 7 });
        assert_eq!(v, json!({"name": "al", "age": 7}));
        let back: Pair = from_pivot(v).unwrap();
        assert_eq!(back, Pair { name: "al".into(), age: 7 });
    }

    #[test]
    fn from_pivot_loosens_atoms() {
        let n: u64 = from_pivot(json!("42")).unwrap();
        assert_eq!(n, 42);

        let s: String = from_pivot(json!("42")).unwrap();
        assert_eq!(s, "42");

        let b: bool = from_pivot(json!("true")).unwrap();
        assert!(b);

        let v: Vec<u16> = from_pivot(json!(["1", "2"])).unwrap();
        assert_eq!(v, vec![1, 2]);

        assert!(from_pivot::<u64>(json!("nope")).is_err());
    }

    #[test]
    fn context_deadline() {
        let ctx = Context::new("Op");
        assert!(!ctx.is_expired());

        let ctx = Context::new("Op").with_timeout(Duration::ZERO);
        assert!(ctx.is_expired());
    }
}
