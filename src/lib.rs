//! Declarative HTTP transport.
//!
//! Request and response shapes are declared once as annotated entities;
//! the transformer pipeline assembles them onto the wire, dissolves them
//! back off it, validates fields against `@kind` rules and negotiates
//! response encodings. Errors travel in one canonical envelope in both
//! directions.
//!
//! ```
//! use portage::{RequestTransformerMgr, entity};
//!
//! entity! {
//!     pub struct GetUser {
//!         method = GET;
//!         path = "/user/{userID}";
//!         { user_id: u64, in: path, name: "userID", validate: "@uint[1,]" }
//!     }
//! }
//!
//! let mgr = RequestTransformerMgr::new();
//! let req = mgr.new_request(&GetUser { user_id: 42 }).unwrap();
//! assert_eq!(req.uri().path(), "/user/42");
//! ```

#![warn(missing_debug_implementations)]

pub use http;

mod common;

pub mod compose;
pub mod entity;
pub mod error;
pub mod mgr;
pub mod plan;
pub mod status;
pub mod transformer;
pub mod validator;

#[cfg(feature = "client")]
pub mod client;

pub use compose::{Compose, Cookie};
pub use entity::{Context, Entity, Operation, Placement};
pub use error::{Error, PlanError};
pub use mgr::RequestTransformerMgr;
pub use status::StatusError;
pub use transformer::{Transformer, TransformerMgr, Upload};
pub use validator::{Validator, ValidatorMgr};

#[cfg(feature = "client")]
pub use client::{Client, TransformResult};
