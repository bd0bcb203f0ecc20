//! Request plans.
//!
//! A [`Plan`] is the compiled contract of one entity: its method, path
//! template and annotated fields, checked for internal consistency once
//! and then reused for every assemble and dissolve.

use crate::entity::{Bind, Field, Placement};
use crate::error::PlanError;
use crate::validator::rule::Rule;
use http::Method;
use std::fmt;

pub mod template;

mod assemble;
mod dissolve;


pub use template::PathTemplate;

/// The compiled request contract of an entity.
pub struct Plan<E> {
    method: Method,
    template: PathTemplate,
    fields: Vec<Field<E>>,
    /// Index of the single `body` field, when one is declared.
    body: Option<usize>,
    has_form: bool,
    has_file: bool,
}

impl<E> Plan<E> {
    /// Compile a plan, rejecting inconsistent declarations before any
    /// request is touched.
    pub fn build(
        method: Method,
        path: &str,
        fields: Vec<Field<E>>,
    ) -> Result<Self, PlanError> {
        let template = PathTemplate::parse(path)?;

        let mut body = None;
        let mut has_form = false;
        let mut has_file = false;

        for (i, field) in fields.iter().enumerate() {
            if let Some(rule) = field.rule {
                Rule::parse(rule).map_err(|e| PlanError::Rule {
                    field: field.name,
                    msg: e.to_string(),
                })?;
            }
            match field.place {
                Placement::Body => {
                    if body.replace(i).is_some() {
                        return Err(PlanError::MultipleBodyFields);
                    }
                }
                Placement::FormData => {
                    has_form = true;
                    if matches!(field.bind, Bind::File { .. }) {
                        has_file = true;
                    }
                }
                _ => {}
            }
            for other in &fields[..i] {
                if other.place == field.place && other.name == field.name {
                    return Err(PlanError::DuplicateName {
                        place: field.place,
                        name: field.name.to_owned(),
                    });
                }
            }
        }

        if body.is_some() && has_form {
            return Err(PlanError::BodyFormConflict);
        }

        // template parameters and path fields must match both ways
        for param in template.params() {
            if !fields
                .iter()
                .any(|f| f.place == Placement::Path && f.name == param)
            {
                return Err(PlanError::MissingPathField { name: param.to_owned() });
            }
        }
        for field in &fields {
            if field.place == Placement::Path && !template.params().any(|p| p == field.name) {
                return Err(PlanError::DanglingPathField { name: field.name.to_owned() });
            }
        }

        Ok(Self { method, template, fields, body, has_form, has_file })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[Field<E>] {
        &self.fields
    }

    pub(crate) fn body_field(&self) -> Option<&Field<E>> {
        self.body.map(|i| &self.fields[i])
    }

    pub(crate) fn has_form(&self) -> bool {
        self.has_form
    }

    /// Whether the form carries a file and thus must travel as multipart.
    pub(crate) fn has_file(&self) -> bool {
        self.has_file
    }

    pub(crate) fn fields_in(&self, place: Placement) -> impl Iterator<Item = &Field<E>> {
        self.fields.iter().filter(move |f| f.place == place)
    }
}

impl<E> fmt::Debug for Plan<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("method", &self.method)
            .field("path", &self.template)
            .field("fields", &self.fields)
            .finish()
    }
}
