//! Server-side request binding.
//!
//! The mirror of assemble: pulls each field's raw value out of the
//! request, coerces wire atoms through the field's validator, runs the
//! rules and sets the typed struct members. Failures are collected per
//! field and aggregated into one 400 envelope so a caller sees every
//! problem at once.

use crate::common::is_empty;
use crate::entity::{Bind, Context, Field, Placement};
use crate::error::BindError;
use crate::plan::Plan;
use crate::status::StatusError;
use crate::transformer::{TransformError, TransformerMgr, Upload, multipart};
use crate::validator::{Validator, ValidatorMgr};
use bytes::Bytes;
use fnv::FnvHashMap;
use http::{HeaderMap, Request, StatusCode, header};
use percent_encoding::percent_decode_str;
use serde_json::Value;
use std::io::BufRead;
use std::sync::Arc;

/// Raw multi-source form content, either urlencoded pairs or collected
/// multipart parts.
#[derive(Default)]
struct FormParts {
    texts: FnvHashMap<String, Vec<String>>,
    values: FnvHashMap<String, Value>,
    files: FnvHashMap<String, Upload>,
}

impl<E: Default> Plan<E> {
    /// Bind an incoming request into a fresh entity.
    ///
    /// Field failures never short-circuit: every field is attempted and
    /// all failures land in one 400 envelope with `errorFields` entries.
    pub fn dissolve(
        &self,
        req: &Request<Bytes>,
        transformers: &TransformerMgr,
        validators: &ValidatorMgr,
        ctx: &Context,
    ) -> Result<E, StatusError> {
        let mut body = &req.body()[..];
        self.dissolve_stream(req, &mut body, transformers, validators, ctx)
    }

    /// Bind from a request head plus a streaming body reader.
    ///
    /// Multipart bodies are consumed through the fixed-window reader so a
    /// large upload spools to disk without the body ever being collected
    /// in memory. `head`'s own body is ignored.
    pub fn dissolve_stream<B>(
        &self,
        head: &Request<B>,
        body: &mut dyn BufRead,
        transformers: &TransformerMgr,
        validators: &ValidatorMgr,
        ctx: &Context,
    ) -> Result<E, StatusError> {
        let path = head.uri().path();
        let Some(path_params) = self.template().match_path(path) else {
            return Err(StatusError::not_found(format!("no route for {path:?}")));
        };
        let path_params: FnvHashMap<String, String> = path_params.into_iter().collect();

        let query = match head.uri().query() {
            Some(q) => query_pairs(q)?,
            None => Vec::new(),
        };

        let cookies = cookie_pairs(head.headers());

        let content_type = head
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());

        let has_body = !body
            .fill_buf()
            .map_err(|e| StatusError::bad_request(format!("reading request body: {e}")))?
            .is_empty();

        let mut form = if self.has_form() && has_body {
            read_form(head.headers(), content_type, &mut *body, ctx)?
        } else {
            FormParts::default()
        };

        let mut body_value = match self.body_field() {
            Some(field) if has_body => {
                let t = transformers.for_decode(content_type.or(field.mime));
                Some(t.decode_from(&mut *body, head.headers()).map_err(|e| {
                    StatusError::bad_request(format!("malformed request body: {e}"))
                })?)
            }
            _ => None,
        };

        let mut entity = E::default();
        let mut errors = Vec::new();

        for field in self.fields() {
            // a rule that fails to compile is a configuration error, not
            // the caller's fault
            let validator = match field.rule {
                Some(rule) => match validators.get(rule) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        return Err(StatusError::internal(format!(
                            "invalid validate rule on field {:?}: {e}",
                            field.name
                        )));
                    }
                },
                None => None,
            };

            match field.place {
                Placement::Path => {
                    let raw = path_params.get(field.name).cloned().into_iter().collect();
                    bind_atoms(field, raw, validator, &mut entity, &mut errors);
                }
                Placement::Query => {
                    let raw = query
                        .iter()
                        .filter(|(k, _)| k == field.name)
                        .map(|(_, v)| v.clone())
                        .collect();
                    bind_atoms(field, raw, validator, &mut entity, &mut errors);
                }
                Placement::Header => {
                    let raw = head
                        .headers()
                        .get_all(field.name)
                        .iter()
                        .filter_map(|v| v.to_str().ok())
                        .map(str::to_owned)
                        .collect();
                    bind_atoms(field, raw, validator, &mut entity, &mut errors);
                }
                Placement::Cookie => {
                    let raw = cookies.get(field.name).cloned().into_iter().collect();
                    bind_atoms(field, raw, validator, &mut entity, &mut errors);
                }
                Placement::Body => match (body_value.take(), &field.bind) {
                    (Some(value), Bind::Value { set, .. }) => {
                        if let Some(v) = &validator {
                            if let Err(e) = v.validate(&value) {
                                errors.push(BindError::new(
                                    field.name,
                                    field.place,
                                    e.to_string(),
                                ));
                                continue;
                            }
                        }
                        if let Err(e) = set(&mut entity, value) {
                            errors.push(BindError::new(
                                field.name,
                                field.place,
                                format!("invalid value: {e}"),
                            ));
                        }
                    }
                    (None, _) if field.required => {
                        errors.push(BindError::missing(field.name, field.place));
                    }
                    _ => {}
                },
                Placement::FormData => match &field.bind {
                    Bind::File { set, .. } => match form.files.remove(field.name) {
                        Some(upload) => set(&mut entity, upload),
                        None if field.required => {
                            errors.push(BindError::missing(field.name, field.place));
                        }
                        None => {}
                    },
                    Bind::Value { set, .. } => {
                        if let Some(value) = form.values.remove(field.name) {
                            if let Some(v) = &validator {
                                if let Err(e) = v.validate(&value) {
                                    errors.push(BindError::new(
                                        field.name,
                                        field.place,
                                        e.to_string(),
                                    ));
                                    continue;
                                }
                            }
                            if let Err(e) = set(&mut entity, value) {
                                errors.push(BindError::new(
                                    field.name,
                                    field.place,
                                    format!("invalid value: {e}"),
                                ));
                            }
                        } else {
                            let raw = form.texts.remove(field.name).unwrap_or_default();
                            bind_atoms(field, raw, validator, &mut entity, &mut errors);
                        }
                    }
                },
            }
        }

        if errors.is_empty() {
            return Ok(entity);
        }
        let mut status = StatusError::bad_request("request validation failed");
        for e in errors {
            status = status.with_field(e.field, e.msg, e.place.as_str());
        }
        Err(status)
    }
}

/// Coerce raw wire atoms through the validator and set the field.
fn bind_atoms<E>(
    field: &Field<E>,
    mut raw: Vec<String>,
    validator: Option<Arc<Validator>>,
    entity: &mut E,
    errors: &mut Vec<BindError>,
) {
    let Bind::Value { set, .. } = &field.bind else {
        return;
    };

    if raw.is_empty() || raw.iter().all(String::is_empty) {
        if let Some(d) = field.default_value {
            raw = vec![d.to_owned()];
        } else if field.required {
            errors.push(BindError::missing(field.name, field.place));
            return;
        } else {
            return;
        }
    }

    let value = match &validator {
        Some(v) if v.is_slice() => {
            let mut items = Vec::with_capacity(raw.len());
            for s in &raw {
                match v.coerce_atom(s) {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        errors.push(BindError::new(field.name, field.place, e.to_string()));
                        return;
                    }
                }
            }
            Value::Array(items)
        }
        Some(v) => match v.coerce_atom(&raw[0]) {
            Ok(value) => value,
            Err(e) => {
                errors.push(BindError::new(field.name, field.place, e.to_string()));
                return;
            }
        },
        None if raw.len() > 1 => {
            Value::Array(raw.into_iter().map(Value::String).collect())
        }
        None => Value::String(raw.swap_remove(0)),
    };

    if let Some(v) = &validator {
        if !is_empty(&value) || field.required {
            if let Err(e) = v.validate(&value) {
                errors.push(BindError::new(field.name, field.place, e.to_string()));
                return;
            }
        }
    }

    if let Err(e) = set(entity, value) {
        errors.push(BindError::new(
            field.name,
            field.place,
            format!("invalid value: {e}"),
        ));
    }
}

/// Split the raw query into decoded pairs. Undecodable components are a
/// client error, not an absent query.
fn query_pairs(raw: &str) -> Result<Vec<(String, String)>, StatusError> {
    let mut out = Vec::new();
    for seg in raw.split('&').filter(|s| !s.is_empty()) {
        let (k, v) = seg.split_once('=').unwrap_or((seg, ""));
        out.push((query_component(k)?, query_component(v)?));
    }
    Ok(out)
}

fn query_component(s: &str) -> Result<String, StatusError> {
    let s = s.replace('+', " ");
    match percent_decode_str(&s).decode_utf8() {
        Ok(decoded) => Ok(decoded.into_owned()),
        Err(_) => Err(StatusError::bad_request(format!(
            "malformed query component {s:?}"
        ))),
    }
}

fn cookie_pairs(headers: &HeaderMap) -> FnvHashMap<String, String> {
    let mut out = FnvHashMap::default();
    for header in headers.get_all(header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((k, v)) = pair.trim().split_once('=') {
                out.insert(k.to_owned(), v.to_owned());
            }
        }
    }
    out
}

/// Read the form body, streaming multipart parts so large uploads spool
/// to disk instead of living in memory.
fn read_form(
    headers: &HeaderMap,
    content_type: Option<&str>,
    body: &mut dyn BufRead,
    ctx: &Context,
) -> Result<FormParts, StatusError> {
    let ct = content_type.unwrap_or("");

    if ct.starts_with(mime::APPLICATION_WWW_FORM_URLENCODED.as_ref()) {
        // urlencoded forms are small, collect them whole
        let mut raw = String::new();
        body.read_to_string(&mut raw)
            .map_err(|_| StatusError::bad_request("form body is not valid UTF-8"))?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&raw)
            .map_err(|e| StatusError::bad_request(format!("malformed form body: {e}")))?;
        let mut form = FormParts::default();
        for (k, v) in pairs {
            form.texts.entry(k).or_default().push(v);
        }
        return Ok(form);
    }

    if ct.starts_with("multipart/form-data") {
        let Some(boundary) = multipart::boundary_of(headers) else {
            return Err(StatusError::bad_request("multipart body without boundary"));
        };
        return read_multipart(body, &boundary, ctx);
    }

    Err(StatusError::bad_request(format!(
        "unsupported form content type {ct:?}"
    )))
}

fn read_multipart(
    mut body: &mut dyn BufRead,
    boundary: &str,
    ctx: &Context,
) -> Result<FormParts, StatusError> {
    let expired = || {
        StatusError::new(
            StatusCode::REQUEST_TIMEOUT,
            "RequestTimeout",
            "deadline exceeded while reading form data",
        )
    };
    let malformed =
        |e: TransformError| StatusError::bad_request(format!("malformed multipart body: {e}"));

    let mut reader = multipart::Reader::new(&mut body, boundary);
    let mut form = FormParts::default();

    while let Some(head) = reader.next_part().map_err(malformed)? {
        if ctx.is_expired() {
            return Err(expired());
        }
        if let Some(filename) = head.filename {
            let mut sink = multipart::SpoolSink::new();
            reader.read_body(&mut sink).map_err(malformed)?;
            let content_type = head
                .content_type
                .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
            let upload = sink.finish(filename, content_type).map_err(|e| {
                StatusError::internal(format!("form data spool failed: {e}"))
            })?;
            form.files.insert(head.name, upload);
            continue;
        }

        let mut buf = Vec::new();
        reader.read_body(&mut buf).map_err(malformed)?;
        let is_json = head
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with(mime::APPLICATION_JSON.as_ref()));
        if is_json {
            let value = serde_json::from_slice(&buf)
                .map_err(|e| StatusError::bad_request(format!("malformed form part: {e}")))?;
            form.values.insert(head.name, value);
        } else {
            let text = String::from_utf8_lossy(&buf).into_owned();
            form.texts.entry(head.name).or_default().push(text);
        }
    }
    Ok(form)
}
