//! String-format validators.
//!
//! Each format is a compiled regular expression registered under a stable
//! name plus a synonym set. The default table covers the common formats;
//! [`ValidatorMgr::register_format`](super::ValidatorMgr::register_format)
//! adds new ones at runtime.

use fnv::FnvHashMap;
use regex::Regex;
use std::sync::Arc;

use crate::common::log;

/// The built-in formats: `(canonical name, aliases, pattern)`.
const BUILTIN: &[(&str, &[&str], &str)] = &[
    (
        "uuid",
        &[],
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    ),
    ("email", &["e-mail"], r"^[^@\s]+@[^@\s]+\.[^@\s]+$"),
    (
        "hostname",
        &[],
        r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    ),
    ("hex-color", &["hexcolor"], r"^#([0-9a-fA-F]{3}|[0-9a-fA-F]{6})$"),
    (
        "ipv4",
        &[],
        r"^((25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9]?[0-9])\.){3}(25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9]?[0-9])$",
    ),
    ("alpha", &[], r"^[a-zA-Z]+$"),
    ("alnum", &["alphanumeric"], r"^[a-zA-Z0-9]+$"),
    ("base64", &[], r"^[A-Za-z0-9+/]*={0,2}$"),
];

/// A named, compiled string format.
#[derive(Debug, Clone)]
pub struct StrFmt {
    pub name: String,
    pub pattern: Arc<Regex>,
}

impl StrFmt {
    pub(crate) fn matches(&self, value: &str) -> bool {
        self.pattern.is_match(value)
    }
}

/// Format table: every alias maps to the shared compiled pattern.
#[derive(Debug, Default)]
pub(crate) struct FormatTable {
    table: FnvHashMap<String, StrFmt>,
}

impl FormatTable {
    pub(crate) fn builtin() -> Self {
        let mut formats = Self::default();
        for (name, aliases, pattern) in BUILTIN {
            if let Err(_err) = formats.register(name, aliases, pattern) {
                log!("builtin format {name:?} failed to compile: {_err}");
            }
        }
        formats
    }

    pub(crate) fn register(
        &mut self,
        name: &str,
        aliases: &[&str],
        pattern: &str,
    ) -> Result<(), regex::Error> {
        let compiled = Arc::new(Regex::new(pattern)?);
        let fmt = StrFmt { name: name.to_owned(), pattern: compiled };
        self.table.insert(name.to_owned(), fmt.clone());
        for alias in aliases {
            self.table.insert((*alias).to_owned(), fmt.clone());
        }
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<StrFmt> {
        self.table.get(name).cloned()
    }
}
