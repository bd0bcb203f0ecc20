//! `application/xml` over the pivot value.
//!
//! Element/attribute discipline: object members named `@foo` become
//! attributes, `#text` the text node, everything else child elements.
//! Arrays render as repeated sibling elements; the root element is
//! `<result>`. The decoder inverts the same conventions: an element with
//! only text collapses to a string, repeated sibling names collect into
//! an array.

use http::HeaderMap;
use mime::Mime;
use serde_json::{Map, Value};
use std::io;

use super::{Transformer, TransformError, set_content_type};
use crate::common;

const ROOT: &str = "result";

#[derive(Debug, Clone)]
pub struct XmlTransformer {
    mime: Mime,
}

impl Default for XmlTransformer {
    fn default() -> Self {
        // mime has no application/xml constant
        Self { mime: "application/xml".parse().unwrap_or(mime::TEXT_XML) }
    }
}

impl Transformer for XmlTransformer {
    fn content_type(&self) -> &Mime {
        &self.mime
    }

    fn named_by_tag(&self) -> &'static str {
        "xml"
    }

    fn encode_to(
        &self,
        w: &mut dyn io::Write,
        value: &Value,
        headers: &mut HeaderMap,
    ) -> Result<(), TransformError> {
        set_content_type(headers, self.mime.as_ref());
        let mut out = String::new();
        write_element(&mut out, ROOT, value);
        w.write_all(out.as_bytes())?;
        Ok(())
    }

    fn decode_from(
        &self,
        r: &mut dyn io::Read,
        _headers: &HeaderMap,
    ) -> Result<Value, TransformError> {
        let mut raw = String::new();
        r.read_to_string(&mut raw)?;
        let mut parser = Parser { b: raw.as_bytes(), pos: 0 };
        parser
            .document()
            .map_err(|msg| TransformError::malformed(self.mime.as_ref(), msg))
    }
}

// ===== encode =====

fn write_element(out: &mut String, name: &str, value: &Value) {
    if let Value::Array(items) = value {
        for item in items {
            write_element(out, name, item);
        }
        return;
    }

    out.push('<');
    out.push_str(name);

    match value {
        Value::Object(map) => {
            for (key, member) in map {
                if let Some(attr) = key.strip_prefix('@') {
                    out.push(' ');
                    out.push_str(attr);
                    out.push_str("=\"");
                    escape_into(out, &common::atom(member));
                    out.push('"');
                }
            }
            out.push('>');
            for (key, member) in map {
                if key.starts_with('@') {
                    continue;
                }
                if key == "#text" {
                    escape_into(out, &common::atom(member));
                } else {
                    write_element(out, key, member);
                }
            }
        }
        Value::Null => out.push('>'),
        scalar => {
            out.push('>');
            escape_into(out, &common::atom(scalar));
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
}

// ===== decode =====

struct Parser<'a> {
    b: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn document(&mut self) -> Result<Value, String> {
        self.skip_misc();
        let (_, value) = self.element()?;
        self.skip_misc();
        if self.pos != self.b.len() {
            return Err("trailing content after document element".to_owned());
        }
        Ok(value)
    }

    fn skip_ws(&mut self) {
        while matches!(self.b.get(self.pos), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Skip whitespace, the XML declaration and comments.
    fn skip_misc(&mut self) {
        loop {
            self.skip_ws();
            if self.starts_with(b"<?") {
                match self.find(b"?>") {
                    Some(end) => self.pos = end + 2,
                    None => {
                        self.pos = self.b.len();
                        return;
                    }
                }
            } else if self.starts_with(b"<!--") {
                match self.find(b"-->") {
                    Some(end) => self.pos = end + 3,
                    None => {
                        self.pos = self.b.len();
                        return;
                    }
                }
            } else {
                return;
            }
        }
    }

    fn starts_with(&self, pat: &[u8]) -> bool {
        self.b[self.pos..].starts_with(pat)
    }

    fn find(&self, pat: &[u8]) -> Option<usize> {
        self.b[self.pos..]
            .windows(pat.len())
            .position(|w| w == pat)
            .map(|i| i + self.pos)
    }

    fn name(&mut self) -> Result<String, String> {
        let start = self.pos;
        while let Some(&b) = self.b.get(self.pos) {
            if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(format!("expected a name at offset {}", self.pos));
        }
        String::from_utf8(self.b[start..self.pos].to_vec()).map_err(|_| "non-UTF-8 name".to_owned())
    }

    fn element(&mut self) -> Result<(String, Value), String> {
        if self.b.get(self.pos) != Some(&b'<') {
            return Err(format!("expected `<` at offset {}", self.pos));
        }
        self.pos += 1;
        let name = self.name()?;

        let mut attrs = Map::new();
        loop {
            self.skip_ws();
            match self.b.get(self.pos) {
                Some(b'/') => {
                    self.pos += 1;
                    if self.b.get(self.pos) != Some(&b'>') {
                        return Err("expected `>` after `/`".to_owned());
                    }
                    self.pos += 1;
                    return Ok((name, finish(attrs, Map::new(), String::new())));
                }
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let key = self.name()?;
                    self.skip_ws();
                    if self.b.get(self.pos) != Some(&b'=') {
                        return Err(format!("expected `=` after attribute {key:?}"));
                    }
                    self.pos += 1;
                    self.skip_ws();
                    let value = self.quoted()?;
                    attrs.insert(format!("@{key}"), Value::String(value));
                }
                None => return Err("unterminated start tag".to_owned()),
            }
        }

        let mut children: Map<String, Value> = Map::new();
        let mut text = String::new();
        loop {
            let chunk_start = self.pos;
            while self.b.get(self.pos).is_some_and(|&b| b != b'<') {
                self.pos += 1;
            }
            if self.pos > chunk_start {
                let chunk = std::str::from_utf8(&self.b[chunk_start..self.pos])
                    .map_err(|_| "non-UTF-8 text".to_owned())?;
                text.push_str(&unescape(chunk)?);
            }
            if self.starts_with(b"<!--") {
                match self.find(b"-->") {
                    Some(end) => self.pos = end + 3,
                    None => return Err("unterminated comment".to_owned()),
                }
                continue;
            }
            if self.starts_with(b"</") {
                self.pos += 2;
                let close = self.name()?;
                if close != name {
                    return Err(format!("mismatched close tag: expected {name:?}, found {close:?}"));
                }
                self.skip_ws();
                if self.b.get(self.pos) != Some(&b'>') {
                    return Err("expected `>` in close tag".to_owned());
                }
                self.pos += 1;
                return Ok((name, finish(attrs, children, text)));
            }
            if self.pos >= self.b.len() {
                return Err(format!("unterminated element {name:?}"));
            }
            let (child_name, child) = self.element()?;
            match children.get_mut(&child_name) {
                None => {
                    children.insert(child_name, child);
                }
                Some(Value::Array(items)) => items.push(child),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, child]);
                }
            }
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        let quote = match self.b.get(self.pos) {
            Some(&q @ (b'"' | b'\'')) => q,
            _ => return Err("expected a quoted attribute value".to_owned()),
        };
        self.pos += 1;
        let start = self.pos;
        while self.b.get(self.pos).is_some_and(|&b| b != quote) {
            self.pos += 1;
        }
        if self.pos >= self.b.len() {
            return Err("unterminated attribute value".to_owned());
        }
        let raw = std::str::from_utf8(&self.b[start..self.pos])
            .map_err(|_| "non-UTF-8 attribute".to_owned())?;
        self.pos += 1;
        unescape(raw)
    }
}

fn finish(attrs: Map<String, Value>, children: Map<String, Value>, text: String) -> Value {
    let trimmed = text.trim();
    if attrs.is_empty() && children.is_empty() {
        return Value::String(trimmed.to_owned());
    }
    let mut map = attrs;
    map.extend(children);
    if !trimmed.is_empty() {
        map.insert("#text".to_owned(), Value::String(trimmed.to_owned()));
    }
    Value::Object(map)
}

fn unescape(raw: &str) -> Result<String, String> {
    if !raw.contains('&') {
        return Ok(raw.to_owned());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else {
            return Err("bare `&` in text".to_owned());
        };
        let entity = &rest[1..semi];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => match entity.strip_prefix('#').and_then(|n| n.parse::<u32>().ok()).and_then(char::from_u32) {
                Some(c) => out.push(c),
                None => return Err(format!("unknown entity &{entity};")),
            },
        }
        rest = &rest[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
