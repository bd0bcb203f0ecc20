//! Client-side request assembly.
//!
//! Walks the plan's fields in declaration order, pulls each value out of
//! the entity, applies defaults, runs validators against outgoing values
//! and distributes everything into its place on the wire.

use crate::common::{atom, atoms, is_empty};
use crate::entity::{Bind, Field, Placement};
use crate::error::Error;
use crate::plan::Plan;
use crate::transformer::{TransformerMgr, Upload, multipart, set_content_type};
use crate::validator::{Validator, ValidatorMgr};
use bytes::Bytes;
use fnv::FnvHashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Uri, header};
use serde_json::{Map, Value};

impl<E> Plan<E> {
    /// Build the outbound request for `entity`.
    pub fn assemble(
        &self,
        entity: &E,
        transformers: &TransformerMgr,
        validators: &ValidatorMgr,
    ) -> Result<Request<Bytes>, Error> {
        let mut headers = HeaderMap::new();
        let mut path_vals = FnvHashMap::<&'static str, String>::default();
        let mut query = Vec::<(String, String)>::new();
        let mut cookies = Vec::<String>::new();
        let mut form = Map::new();
        let mut uploads = Vec::<(&'static str, &Upload)>::new();
        let mut body_val = None;

        for field in self.fields() {
            let (get, _) = match &field.bind {
                Bind::Value { get, set } => (get, set),
                Bind::File { get, .. } => {
                    match get(entity) {
                        Some(upload) => uploads.push((field.name, upload)),
                        None if field.required => {
                            return Err(Error::transform(format!(
                                "missing required file {:?}",
                                field.name
                            )));
                        }
                        None => {}
                    }
                    continue;
                }
            };

            let validator = match field.rule {
                Some(rule) => Some(validators.get(rule).map_err(Error::transform)?),
                None => None,
            };

            let Some(value) = resolve(field_parts(field), get(entity), validator.as_deref())?
            else {
                continue;
            };

            match field.place {
                Placement::Path => {
                    path_vals.insert(field.name, atom(&value));
                }
                Placement::Query => {
                    let vals = atoms(&value);
                    if vals.is_empty() {
                        query.push((field.name.to_owned(), String::new()));
                    } else {
                        query.extend(vals.into_iter().map(|v| (field.name.to_owned(), v)));
                    }
                }
                Placement::Header => {
                    let name = HeaderName::from_bytes(field.name.as_bytes())
                        .map_err(Error::transform)?;
                    for v in atoms(&value) {
                        let val = HeaderValue::from_str(&v).map_err(Error::transform)?;
                        headers.append(name.clone(), val);
                    }
                }
                Placement::Cookie => {
                    cookies.push(format!("{}={}", field.name, atom(&value)));
                }
                Placement::Body => body_val = Some((value, field.mime)),
                Placement::FormData => {
                    form.insert(field.name.to_owned(), value);
                }
            }
        }

        let path = self
            .template()
            .fill(|name| path_vals.get(name).map(String::as_str))
            .map_err(|name| {
                Error::transform(format!("unfilled path parameter {name:?}"))
            })?;

        let uri = if query.is_empty() {
            path
        } else {
            let qs = serde_urlencoded::to_string(&query).map_err(Error::transform)?;
            format!("{path}?{qs}")
        };
        let uri: Uri = uri.parse().map_err(Error::transform)?;

        if !cookies.is_empty() {
            let val = HeaderValue::from_str(&cookies.join("; ")).map_err(Error::transform)?;
            headers.insert(header::COOKIE, val);
        }

        let body = if let Some((value, mime)) = body_val {
            let mime = mime.unwrap_or("application/json");
            let t = transformers.for_encode(mime).map_err(Error::transform)?;
            let mut buf = Vec::new();
            t.encode_to(&mut buf, &value, &mut headers)
                .map_err(Error::transform)?;
            Bytes::from(buf)
        } else if self.has_file() {
            encode_multipart(&form, &uploads, &mut headers)?
        } else if self.has_form() {
            let t = transformers
                .for_encode(mime::APPLICATION_WWW_FORM_URLENCODED.as_ref())
                .map_err(Error::transform)?;
            let mut buf = Vec::new();
            t.encode_to(&mut buf, &Value::Object(form), &mut headers)
                .map_err(Error::transform)?;
            Bytes::from(buf)
        } else {
            Bytes::new()
        };

        let mut req = Request::new(body);
        *req.method_mut() = self.method().clone();
        *req.uri_mut() = uri;
        *req.headers_mut() = headers;
        Ok(req)
    }
}

struct FieldParts<'f> {
    name: &'static str,
    required: bool,
    omit_empty: bool,
    default_value: Option<&'f str>,
}

fn field_parts<E>(field: &Field<E>) -> FieldParts<'_> {
    FieldParts {
        name: field.name,
        required: field.required,
        omit_empty: field.omit_empty,
        default_value: field.default_value,
    }
}

/// Apply defaults, the empty policy and the validator to one outgoing
/// value. `None` means the field is omitted from the wire.
fn resolve(
    field: FieldParts<'_>,
    value: Value,
    validator: Option<&Validator>,
) -> Result<Option<Value>, Error> {
    let value = if is_empty(&value) {
        match field.default_value {
            Some(d) => match validator {
                Some(v) => v.coerce_atom(d).map_err(Error::transform)?,
                None => Value::String(d.to_owned()),
            },
            None if field.required => {
                return Err(Error::transform(format!(
                    "missing required field {:?}",
                    field.name
                )));
            }
            None if field.omit_empty => return Ok(None),
            None => value,
        }
    } else {
        value
    };

    // empty optionals travel as-is without being held to the rule
    if let Some(v) = validator {
        if !is_empty(&value) || field.required {
            v.validate(&value).map_err(|e| {
                Error::transform(format!("field {:?}: {e}", field.name))
            })?;
        }
    }
    Ok(Some(value))
}

fn encode_multipart(
    form: &Map<String, Value>,
    uploads: &[(&'static str, &Upload)],
    headers: &mut HeaderMap,
) -> Result<Bytes, Error> {
    let mut buf = Vec::new();
    let mut w = multipart::Writer::new(&mut buf);
    for (name, value) in form {
        match value {
            Value::Object(_) => {
                let json = serde_json::to_vec(value).map_err(Error::transform)?;
                w.part(name, mime::APPLICATION_JSON.as_ref(), &json)
                    .map_err(Error::transform)?;
            }
            Value::Array(_) => {
                for item in atoms(value) {
                    w.text(name, &item).map_err(Error::transform)?;
                }
            }
            other => w.text(name, &atom(other)).map_err(Error::transform)?,
        }
    }
    for (name, upload) in uploads {
        w.file(name, upload).map_err(Error::transform)?;
    }
    let content_type = format!("multipart/form-data; boundary={}", w.boundary());
    w.finish().map_err(Error::transform)?;
    set_content_type(headers, &content_type);
    Ok(Bytes::from(buf))
}
