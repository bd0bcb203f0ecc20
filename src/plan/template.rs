//! Path templates.
//!
//! A template is a slash-separated path where a whole segment may be a
//! parameter, written either `{name}` or `:name`. `fill` renders the
//! client-side path with percent-encoded values, `match_path` does the
//! reverse for an incoming request path.

use crate::error::PlanError;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::fmt;

/// Bytes escaped when a parameter value lands inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed path template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template, accepting both `{name}` and `:name` parameter
    /// segments. Parameters must span a whole segment.
    pub fn parse(path: &str) -> Result<Self, PlanError> {
        let err = |msg: String| PlanError::Template { path: path.to_owned(), msg };

        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let mut segments = Vec::new();

        if !trimmed.is_empty() {
            for seg in trimmed.split('/') {
                if let Some(name) = seg.strip_prefix(':') {
                    if name.is_empty() {
                        return Err(err("empty parameter name".into()));
                    }
                    segments.push(Segment::Param(name.to_owned()));
                } else if let Some(rest) = seg.strip_prefix('{') {
                    let Some(name) = rest.strip_suffix('}') else {
                        return Err(err(format!("unclosed parameter in segment {seg:?}")));
                    };
                    if name.is_empty() {
                        return Err(err("empty parameter name".into()));
                    }
                    if name.contains(['{', '}']) {
                        return Err(err(format!("malformed parameter in segment {seg:?}")));
                    }
                    segments.push(Segment::Param(name.to_owned()));
                } else if seg.contains(['{', '}']) {
                    return Err(err(format!(
                        "parameters must span a whole segment, got {seg:?}"
                    )));
                } else {
                    segments.push(Segment::Literal(seg.to_owned()));
                }
            }
        }

        let mut seen = Vec::new();
        for seg in &segments {
            if let Segment::Param(name) = seg {
                if seen.contains(&name.as_str()) {
                    return Err(err(format!("duplicate parameter {name:?}")));
                }
                seen.push(name);
            }
        }

        Ok(Self { raw: path.to_owned(), segments })
    }

    /// The template exactly as declared.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parameter names in declaration order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Render a concrete path, resolving each parameter through `value`.
    /// Values are percent-encoded per segment. Returns the parameter name
    /// when `value` has nothing for it.
    pub fn fill<'a, F>(&self, mut value: F) -> Result<String, &str>
    where
        F: FnMut(&str) -> Option<&'a str>,
    {
        let mut out = String::with_capacity(self.raw.len());
        for seg in &self.segments {
            out.push('/');
            match seg {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Param(name) => {
                    let raw = value(name).ok_or(name.as_str())?;
                    for chunk in utf8_percent_encode(raw, SEGMENT) {
                        out.push_str(chunk);
                    }
                }
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        Ok(out)
    }

    /// Match a concrete request path against the template, returning the
    /// percent-decoded parameter values in declaration order.
    pub fn match_path(&self, path: &str) -> Option<Vec<(String, String)>> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let parts: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };
        let mut parts = parts.into_iter();

        let mut params = Vec::new();
        for seg in &self.segments {
            let part = parts.next()?;
            match seg {
                Segment::Literal(lit) => {
                    if *lit != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let decoded = percent_decode_str(part).decode_utf8().ok()?;
                    params.push((name.clone(), decoded.into_owned()));
                }
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

/// Displays in colon form: `/user/{id}` renders as `/user/:id`.
impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for seg in &self.segments {
            f.write_str("/")?;
            match seg {
                Segment::Literal(lit) => f.write_str(lit)?,
                Segment::Param(name) => write!(f, ":{name}")?,
            }
        }
        Ok(())
    }
}
