//! `multipart/form-data` framing per RFC 7578.
//!
//! [`Writer`] emits parts against any `io::Write`. [`Reader`] is a
//! streaming parser over `io::Read` with a fixed window: part bodies are
//! handed to a sink incrementally, so a 64 MiB file part never sits in
//! memory. Received files land in an [`Upload`], which spools from memory
//! to a temp file past a threshold.

use http::HeaderMap;
use mime::Mime;
use serde_json::{Map, Value};
use std::{
    fmt, fs,
    io::{self, Read, Write},
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use super::{Transformer, TransformError, set_content_type};
use crate::common;

/// Window size for the streaming parser.
const WINDOW: usize = 8 * 1024;

/// Bytes an [`Upload`] holds in memory before spooling to disk.
const SPOOL_THRESHOLD: usize = 256 * 1024;

static UNIQUE: AtomicU64 = AtomicU64::new(0);

fn unique_suffix() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    UNIQUE.fetch_add(1, Ordering::Relaxed) ^ (nanos << 20)
}

// ===== Upload =====

/// A file travelling through a `formData` field.
#[derive(Debug, Default)]
pub struct Upload {
    filename: String,
    content_type: String,
    spool: Spool,
}

#[derive(Debug)]
enum Spool {
    Memory(Vec<u8>),
    Disk { path: PathBuf, len: u64 },
}

impl Default for Spool {
    fn default() -> Self {
        Self::Memory(Vec::new())
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        if let Self::Disk { path, .. } = self {
            let _ = fs::remove_file(path);
        }
    }
}

impl Upload {
    /// An in-memory upload, the client-side constructor.
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            spool: Spool::Memory(data.into()),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        if self.content_type.is_empty() {
            mime::APPLICATION_OCTET_STREAM.as_ref()
        } else {
            &self.content_type
        }
    }

    pub fn len(&self) -> u64 {
        match &self.spool {
            Spool::Memory(data) => data.len() as u64,
            Spool::Disk { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the body spilled to a temp file.
    pub fn is_spooled(&self) -> bool {
        matches!(self.spool, Spool::Disk { .. })
    }

    /// Materialize the body. Spooled uploads read the temp file.
    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        match &self.spool {
            Spool::Memory(data) => Ok(data.clone()),
            Spool::Disk { path, .. } => fs::read(path),
        }
    }

    /// Stream the body into `w` without materializing it.
    pub fn copy_to(&self, w: &mut dyn Write) -> io::Result<u64> {
        match &self.spool {
            Spool::Memory(data) => {
                w.write_all(data)?;
                Ok(data.len() as u64)
            }
            Spool::Disk { path, .. } => {
                let mut file = fs::File::open(path)?;
                io::copy(&mut file, w)
            }
        }
    }
}

/// Write sink building a [`Spool`], spilling past the threshold.
pub(crate) struct SpoolSink {
    threshold: usize,
    memory: Vec<u8>,
    disk: Option<(PathBuf, fs::File, u64)>,
}

impl SpoolSink {
    pub(crate) fn new() -> Self {
        Self::with_threshold(SPOOL_THRESHOLD)
    }

    pub(crate) fn with_threshold(threshold: usize) -> Self {
        Self { threshold, memory: Vec::new(), disk: None }
    }

    pub(crate) fn finish(
        mut self,
        filename: String,
        content_type: String,
    ) -> io::Result<Upload> {
        let spool = match self.disk.take() {
            Some((path, file, len)) => {
                drop(file);
                Spool::Disk { path, len }
            }
            None => Spool::Memory(std::mem::take(&mut self.memory)),
        };
        Ok(Upload { filename, content_type, spool })
    }
}

impl Drop for SpoolSink {
    fn drop(&mut self) {
        if let Some((path, file, _)) = self.disk.take() {
            drop(file);
            let _ = fs::remove_file(path);
        }
    }
}

impl Write for SpoolSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some((_, file, len)) = &mut self.disk {
            file.write_all(buf)?;
            *len += buf.len() as u64;
            return Ok(buf.len());
        }
        if self.memory.len() + buf.len() <= self.threshold {
            self.memory.extend_from_slice(buf);
            return Ok(buf.len());
        }
        // spill
        let path = std::env::temp_dir().join(format!(
            "portage-upload-{}-{:x}",
            std::process::id(),
            unique_suffix(),
        ));
        let mut file = fs::File::create(&path)?;
        file.write_all(&self.memory)?;
        file.write_all(buf)?;
        let len = (self.memory.len() + buf.len()) as u64;
        self.memory = Vec::new();
        self.disk = Some((path, file, len));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some((_, file, _)) = &mut self.disk {
            file.flush()?;
        }
        Ok(())
    }
}

// ===== Writer =====

/// Multipart body writer.
pub struct Writer<'w> {
    w: &'w mut dyn Write,
    boundary: String,
}

impl fmt::Debug for Writer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer").field("boundary", &self.boundary).finish()
    }
}

impl<'w> Writer<'w> {
    pub fn new(w: &'w mut dyn Write) -> Self {
        let boundary = format!("portage-{:016x}{:08x}", unique_suffix(), std::process::id());
        Self { w, boundary }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// A plain text part.
    pub fn text(&mut self, name: &str, value: &str) -> io::Result<()> {
        write!(
            self.w,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            self.boundary, name, value,
        )
    }

    /// A part with an explicit content type, used for JSON-valued parts.
    pub fn part(&mut self, name: &str, content_type: &str, body: &[u8]) -> io::Result<()> {
        write!(
            self.w,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary, name, content_type,
        )?;
        self.w.write_all(body)?;
        self.w.write_all(b"\r\n")
    }

    /// A file part, streamed from the upload's spool.
    pub fn file(&mut self, name: &str, upload: &Upload) -> io::Result<()> {
        write!(
            self.w,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary,
            name,
            upload.filename(),
            upload.content_type(),
        )?;
        upload.copy_to(self.w)?;
        self.w.write_all(b"\r\n")
    }

    /// Close the body with the final boundary.
    pub fn finish(self) -> io::Result<()> {
        write!(self.w, "--{}--\r\n", self.boundary)
    }
}

// ===== Reader =====

/// Head of one received part.
#[derive(Debug, Clone, PartialEq)]
pub struct PartHead {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Streaming multipart parser.
///
/// Call [`next_part`](Self::next_part) to advance to the next part head,
/// then [`read_body`](Self::read_body) to stream that part's bytes into a
/// sink. Skipping `read_body` drains the body.
pub struct Reader<'r> {
    r: &'r mut dyn Read,
    /// `\r\n--boundary`
    delim: Vec<u8>,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
    in_body: bool,
    done: bool,
}

impl fmt::Debug for Reader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader").field("done", &self.done).finish()
    }
}

const MIME: &str = "multipart/form-data";

impl<'r> Reader<'r> {
    pub fn new(r: &'r mut dyn Read, boundary: &str) -> Self {
        let mut delim = Vec::with_capacity(boundary.len() + 4);
        delim.extend_from_slice(b"\r\n--");
        delim.extend_from_slice(boundary.as_bytes());
        // a virtual leading CRLF lets the first boundary match the same
        // delimiter as every later one
        let mut buf = vec![0u8; WINDOW.max(delim.len() * 4)];
        buf[..2].copy_from_slice(b"\r\n");
        Self { r, delim, buf, start: 0, end: 2, eof: false, in_body: false, done: false }
    }

    /// Advance to the next part. `None` after the closing boundary.
    pub fn next_part(&mut self) -> Result<Option<PartHead>, TransformError> {
        if self.done {
            return Ok(None);
        }
        if self.in_body {
            self.stream_body(&mut io::sink())?;
        }

        // find the boundary delimiter
        loop {
            if let Some(i) = find(&self.buf[self.start..self.end], &self.delim) {
                self.start += i + self.delim.len();
                break;
            }
            self.compact();
            if !self.fill()? {
                return Err(TransformError::malformed(MIME, "missing boundary"));
            }
        }

        // `--` closes the stream, CRLF opens a part
        loop {
            if self.end - self.start >= 2 {
                break;
            }
            if !self.fill()? {
                return Err(TransformError::malformed(MIME, "truncated boundary line"));
            }
        }
        if &self.buf[self.start..self.start + 2] == b"--" {
            self.done = true;
            return Ok(None);
        }

        // tolerate transport padding before the CRLF
        loop {
            match self.buf[self.start..self.end].windows(2).position(|w| w == b"\r\n") {
                Some(i) => {
                    self.start += i + 2;
                    break;
                }
                None => {
                    self.compact();
                    if !self.fill()? {
                        return Err(TransformError::malformed(MIME, "truncated boundary line"));
                    }
                }
            }
        }

        let head = self.headers()?;
        self.in_body = true;
        Ok(Some(head))
    }

    /// Stream the current part's body into `sink`.
    pub fn read_body(&mut self, sink: &mut dyn Write) -> Result<(), TransformError> {
        if !self.in_body {
            return Err(TransformError::malformed(MIME, "no current part"));
        }
        self.stream_body(sink)
    }

    fn stream_body(&mut self, sink: &mut dyn Write) -> Result<(), TransformError> {
        loop {
            if let Some(i) = find(&self.buf[self.start..self.end], &self.delim) {
                sink.write_all(&self.buf[self.start..self.start + i])?;
                self.start += i;
                self.in_body = false;
                return Ok(());
            }

            // everything before a possible partial delimiter match at the
            // tail is body content
            let held = self.delim.len() - 1;
            let available = self.end - self.start;
            if available > held {
                let safe = available - held;
                sink.write_all(&self.buf[self.start..self.start + safe])?;
                self.start += safe;
            }
            self.compact();
            if !self.fill()? {
                return Err(TransformError::malformed(MIME, "unterminated part body"));
            }
        }
    }

    fn headers(&mut self) -> Result<PartHead, TransformError> {
        let mut head = PartHead { name: String::new(), filename: None, content_type: None };
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                if head.name.is_empty() {
                    return Err(TransformError::malformed(MIME, "part without a field name"));
                }
                return Ok(head);
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(TransformError::malformed(MIME, "malformed part header"));
            };
            let value = value.trim();
            if key.eq_ignore_ascii_case("content-disposition") {
                for param in value.split(';').skip(1) {
                    let param = param.trim();
                    if let Some(v) = param.strip_prefix("name=") {
                        head.name = unquote(v);
                    } else if let Some(v) = param.strip_prefix("filename=") {
                        head.filename = Some(unquote(v));
                    }
                }
            } else if key.eq_ignore_ascii_case("content-type") {
                head.content_type = Some(value.to_owned());
            }
        }
    }

    fn read_line(&mut self) -> Result<String, TransformError> {
        loop {
            if let Some(i) = self.buf[self.start..self.end].windows(2).position(|w| w == b"\r\n") {
                let line = std::str::from_utf8(&self.buf[self.start..self.start + i])
                    .map_err(|_| TransformError::malformed(MIME, "non-UTF-8 part header"))?
                    .to_owned();
                self.start += i + 2;
                return Ok(line);
            }
            self.compact();
            if !self.fill()? {
                return Err(TransformError::malformed(MIME, "truncated part headers"));
            }
        }
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }

    /// Read more bytes into the window. Returns `false` at EOF with no
    /// new data.
    fn fill(&mut self) -> Result<bool, TransformError> {
        if self.eof {
            return Ok(false);
        }
        if self.end == self.buf.len() {
            // window full without progress: the caller holds a partial
            // match that can never complete in place
            let grow = self.buf.len() * 2;
            self.buf.resize(grow, 0);
        }
        let n = self.r.read(&mut self.buf[self.end..])?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        self.end += n;
        Ok(true)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn unquote(raw: &str) -> String {
    raw.trim().trim_matches('"').to_owned()
}

// ===== FormData transformer =====

/// `multipart/form-data` as a registered transformer.
///
/// Object members become text parts; nested members travel as JSON-valued
/// parts. File parts belong to the parameter layer (`formData` fields of
/// upload type), which drives [`Writer`]/[`Reader`] directly.
#[derive(Debug, Clone)]
pub struct FormData {
    mime: Mime,
}

impl Default for FormData {
    fn default() -> Self {
        Self { mime: mime::MULTIPART_FORM_DATA }
    }
}

impl Transformer for FormData {
    fn content_type(&self) -> &Mime {
        &self.mime
    }

    fn encode_to(
        &self,
        w: &mut dyn io::Write,
        value: &Value,
        headers: &mut HeaderMap,
    ) -> Result<(), TransformError> {
        let Some(map) = value.as_object() else {
            return Err(TransformError::malformed(self.mime.as_ref(), "expected an object payload"));
        };
        let mut writer = Writer::new(w);
        set_content_type(
            headers,
            &format!("multipart/form-data; boundary={}", writer.boundary()),
        );
        for (key, member) in map {
            match member {
                Value::Object(_) | Value::Array(_) => {
                    writer.part(key, mime::APPLICATION_JSON.as_ref(), member.to_string().as_bytes())?;
                }
                scalar => writer.text(key, &common::atom(scalar))?,
            }
        }
        writer.finish()?;
        Ok(())
    }

    fn decode_from(
        &self,
        r: &mut dyn io::Read,
        headers: &HeaderMap,
    ) -> Result<Value, TransformError> {
        let boundary = boundary_of(headers).ok_or_else(|| {
            TransformError::malformed(self.mime.as_ref(), "missing boundary parameter")
        })?;
        let mut reader = Reader::new(r, &boundary);
        let mut map = Map::new();
        while let Some(part) = reader.next_part()? {
            let mut body = Vec::new();
            reader.read_body(&mut body)?;
            let value = part_value(&part, body);
            match map.get_mut(&part.name) {
                None => {
                    map.insert(part.name, value);
                }
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            }
        }
        Ok(Value::Object(map))
    }
}

fn part_value(part: &PartHead, body: Vec<u8>) -> Value {
    let is_json = part
        .content_type
        .as_deref()
        .and_then(|ct| ct.parse::<Mime>().ok())
        .is_some_and(|m| m.essence_str() == mime::APPLICATION_JSON.essence_str());
    if is_json {
        if let Ok(v) = serde_json::from_slice(&body) {
            return v;
        }
    }
    Value::String(String::from_utf8_lossy(&body).into_owned())
}

/// Extract the boundary parameter from a `Content-Type` header.
pub(crate) fn boundary_of(headers: &HeaderMap) -> Option<String> {
    let ct = headers.get(http::header::CONTENT_TYPE)?.to_str().ok()?;
    let mime: Mime = ct.parse().ok()?;
    mime.get_param(mime::BOUNDARY).map(|b| b.as_str().to_owned())
}
