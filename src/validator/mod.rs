//! Validator layer.
//!
//! Compiles the rule tag grammar into reusable value checkers over the
//! pivot [`Value`]. Compiled validators are cached per rule string in
//! [`ValidatorMgr`]; a child mgr falls back to its parent on a string
//! format miss, so framework instances can layer their own formats over a
//! shared default set.

use fnv::FnvHashMap;
use serde_json::Value;
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

pub mod rule;
mod strfmt;

#[cfg(test)]
mod test;

pub use rule::{Rule, RuleError, RuleParam, RuleRange};
pub use strfmt::StrFmt;

use rule::Rule as ParsedRule;
use strfmt::FormatTable;

// ===== ValidateError =====

/// A value rejected by a validator. Carries the rule text and a message
/// that names the offending value and the violated constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateError {
    pub rule: String,
    pub msg: String,
}

impl ValidateError {
    fn new(rule: &str, msg: impl Into<String>) -> Self {
        Self { rule: rule.to_owned(), msg: msg.into() }
    }
}

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)?;
        if !self.rule.is_empty() {
            write!(f, " (rule {})", self.rule)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidateError {}

// ===== CompileError =====

/// A rule string that parsed but could not be compiled, or did not parse
/// at all.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    Parse(RuleError),
    UnknownKind(String),
    BadBound { rule: String, msg: String },
    BadPattern { rule: String, msg: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => e.fmt(f),
            Self::UnknownKind(name) => write!(f, "unknown rule kind or string format {name:?}"),
            Self::BadBound { rule, msg } => write!(f, "invalid bound in rule {rule:?}: {msg}"),
            Self::BadPattern { rule, msg } => write!(f, "invalid pattern in rule {rule:?}: {msg}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<RuleError> for CompileError {
    fn from(e: RuleError) -> Self {
        Self::Parse(e)
    }
}

// ===== Validator =====

/// A compiled value predicate.
#[derive(Debug, Clone)]
pub enum Validator {
    /// The empty rule: accepts everything.
    Any,
    Int(IntRule),
    Uint(UintRule),
    Float(FloatRule),
    Str(StrRule),
    /// A named string format.
    Fmt { raw: String, fmt: StrFmt, len: LenRange },
    Slice { raw: String, elem: Box<Validator>, len: LenRange },
    Map {
        raw: String,
        key: Option<Box<Validator>>,
        value: Option<Box<Validator>>,
        len: LenRange,
    },
    Struct { raw: String, members: Vec<(String, Validator)> },
}

/// Inclusive integer value bounds plus whitelist.
#[derive(Debug, Clone, Default)]
pub struct IntRule {
    raw: String,
    min: Option<i64>,
    max: Option<i64>,
    choices: Vec<i64>,
}

/// Inclusive unsigned value bounds plus whitelist.
#[derive(Debug, Clone, Default)]
pub struct UintRule {
    raw: String,
    min: Option<u64>,
    max: Option<u64>,
    choices: Vec<u64>,
}

/// Float value bounds, exclusivity preserved.
#[derive(Debug, Clone, Default)]
pub struct FloatRule {
    raw: String,
    min: Option<f64>,
    max: Option<f64>,
    excl_min: bool,
    excl_max: bool,
}

/// Rune-count bounds, optional pattern, whitelist.
#[derive(Debug, Clone, Default)]
pub struct StrRule {
    raw: String,
    len: LenRange,
    pattern: Option<Arc<regex::Regex>>,
    choices: Vec<String>,
}

/// Inclusive length bounds for strings, slices and maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenRange {
    min: Option<u64>,
    max: Option<u64>,
}

impl LenRange {
    fn check(&self, raw: &str, what: &str, len: u64) -> Result<(), ValidateError> {
        if let Some(min) = self.min {
            if len < min {
                return Err(ValidateError::new(
                    raw,
                    format!("{what} {len} is out of bound, must be at least {min}"),
                ));
            }
        }
        if let Some(max) = self.max {
            if len > max {
                return Err(ValidateError::new(
                    raw,
                    format!("{what} {len} is out of bound, must be at most {max}"),
                ));
            }
        }
        Ok(())
    }
}

macro_rules! check_num {
    ($me:expr, $v:expr) => {{
        let me = $me;
        let v = $v;
        if let Some(min) = me.min {
            if v < min {
                return Err(ValidateError::new(
                    &me.raw,
                    format!("{v} is out of bound, must be at least {min}"),
                ));
            }
        }
        if let Some(max) = me.max {
            if v > max {
                return Err(ValidateError::new(
                    &me.raw,
                    format!("{v} is out of bound, must be at most {max}"),
                ));
            }
        }
        if !me.choices.is_empty() && !me.choices.contains(&v) {
            return Err(ValidateError::new(&me.raw, format!("{v} is not in the whitelist")));
        }
        Ok(())
    }};
}

impl Validator {
    /// The rule text this validator was compiled from.
    pub fn raw(&self) -> &str {
        match self {
            Self::Any => "",
            Self::Int(r) => &r.raw,
            Self::Uint(r) => &r.raw,
            Self::Float(r) => &r.raw,
            Self::Str(r) => &r.raw,
            Self::Fmt { raw, .. } => raw,
            Self::Slice { raw, .. } => raw,
            Self::Map { raw, .. } => raw,
            Self::Struct { raw, .. } => raw,
        }
    }

    /// Check one pivot value. Deterministic, never panics; `null` is
    /// rejected by typed validators and accepted by [`Validator::Any`]
    /// (requiredness is the parameter layer's concern).
    pub fn validate(&self, v: &Value) -> Result<(), ValidateError> {
        match self {
            Self::Any => Ok(()),
            Self::Int(r) => match v.as_i64() {
                Some(n) => check_num!(r, n),
                None => Err(ValidateError::new(&r.raw, format!("{v} is not an integer"))),
            },
            Self::Uint(r) => match v.as_u64() {
                Some(n) => check_num!(r, n),
                None => Err(ValidateError::new(&r.raw, format!("{v} is not an unsigned integer"))),
            },
            Self::Float(r) => match v.as_f64() {
                Some(n) => r.check(n),
                None => Err(ValidateError::new(&r.raw, format!("{v} is not a number"))),
            },
            Self::Str(r) => match v.as_str() {
                Some(s) => r.check(s),
                None => Err(ValidateError::new(&r.raw, format!("{v} is not a string"))),
            },
            Self::Fmt { raw, fmt, len } => match v.as_str() {
                Some(s) => {
                    len.check(raw, "length", s.chars().count() as u64)?;
                    if fmt.matches(s) {
                        Ok(())
                    } else {
                        Err(ValidateError::new(raw, format!("{s:?} is not a valid {}", fmt.name)))
                    }
                }
                None => Err(ValidateError::new(raw, format!("{v} is not a string"))),
            },
            Self::Slice { raw, elem, len } => match v.as_array() {
                Some(items) => {
                    len.check(raw, "length", items.len() as u64)?;
                    for (i, item) in items.iter().enumerate() {
                        if let Err(e) = elem.validate(item) {
                            return Err(ValidateError::new(raw, format!("[{i}]: {e}")));
                        }
                    }
                    Ok(())
                }
                None => Err(ValidateError::new(raw, format!("{v} is not an array"))),
            },
            Self::Map { raw, key, value, len } => match v.as_object() {
                Some(map) => {
                    len.check(raw, "size", map.len() as u64)?;
                    for (k, item) in map {
                        if let Some(kv) = key {
                            if let Err(e) = kv.validate(&Value::String(k.clone())) {
                                return Err(ValidateError::new(raw, format!("key {k:?}: {e}")));
                            }
                        }
                        if let Some(vv) = value {
                            if let Err(e) = vv.validate(item) {
                                return Err(ValidateError::new(raw, format!("{k:?}: {e}")));
                            }
                        }
                    }
                    Ok(())
                }
                None => Err(ValidateError::new(raw, format!("{v} is not an object"))),
            },
            Self::Struct { raw, members } => match v.as_object() {
                Some(map) => {
                    let mut failures = Vec::new();
                    for (name, validator) in members {
                        match map.get(name) {
                            Some(member) => {
                                if let Err(e) = validator.validate(member) {
                                    failures.push(format!("{name}: {e}"));
                                }
                            }
                            None => failures.push(format!("{name}: missing required field")),
                        }
                    }
                    if failures.is_empty() {
                        Ok(())
                    } else {
                        Err(ValidateError::new(raw, failures.join("; ")))
                    }
                }
                None => Err(ValidateError::new(raw, format!("{v} is not an object"))),
            },
        }
    }

    /// Coerce a wire atom into the pivot shape this rule checks: numeric
    /// kinds parse a number, string kinds keep the text.
    pub fn coerce_atom(&self, s: &str) -> Result<Value, ValidateError> {
        match self {
            Self::Int(r) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| ValidateError::new(&r.raw, format!("{s:?} is not an integer"))),
            Self::Uint(r) => s
                .parse::<u64>()
                .map(Value::from)
                .map_err(|_| ValidateError::new(&r.raw, format!("{s:?} is not an unsigned integer"))),
            Self::Float(r) => s
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| ValidateError::new(&r.raw, format!("{s:?} is not a number"))),
            Self::Slice { elem, .. } => elem.coerce_atom(s),
            _ => Ok(Value::String(s.to_owned())),
        }
    }

    /// Whether values of this rule arrive as repeated atoms.
    pub fn is_slice(&self) -> bool {
        matches!(self, Self::Slice { .. })
    }
}

impl FloatRule {
    fn check(&self, v: f64) -> Result<(), ValidateError> {
        if let Some(min) = self.min {
            let ok = if self.excl_min { v > min } else { v >= min };
            if !ok {
                return Err(ValidateError::new(
                    &self.raw,
                    format!("{v} is out of bound, must be {} {min}", if self.excl_min { ">" } else { ">=" }),
                ));
            }
        }
        if let Some(max) = self.max {
            let ok = if self.excl_max { v < max } else { v <= max };
            if !ok {
                return Err(ValidateError::new(
                    &self.raw,
                    format!("{v} is out of bound, must be {} {max}", if self.excl_max { "<" } else { "<=" }),
                ));
            }
        }
        Ok(())
    }
}

impl StrRule {
    fn check(&self, s: &str) -> Result<(), ValidateError> {
        self.len.check(&self.raw, "length", s.chars().count() as u64)?;
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(s) {
                return Err(ValidateError::new(
                    &self.raw,
                    format!("{s:?} does not match {:?}", pattern.as_str()),
                ));
            }
        }
        if !self.choices.is_empty() && !self.choices.iter().any(|c| c == s) {
            return Err(ValidateError::new(&self.raw, format!("{s:?} is not in the whitelist")));
        }
        Ok(())
    }
}

// ===== ValidatorMgr =====

/// Rule-string keyed validator registry.
///
/// Read-mostly: compiled validators are cached forever, registration is
/// expected during process start. A child mgr created with
/// [`with_parent`](Self::with_parent) falls back to the parent's string
/// formats on a miss.
#[derive(Debug)]
pub struct ValidatorMgr {
    parent: Option<Arc<ValidatorMgr>>,
    formats: RwLock<FormatTable>,
    cache: RwLock<FnvHashMap<String, Arc<Validator>>>,
}

impl Default for ValidatorMgr {
    fn default() -> Self {
        Self {
            parent: None,
            formats: RwLock::new(FormatTable::builtin()),
            cache: RwLock::new(FnvHashMap::default()),
        }
    }
}

impl ValidatorMgr {
    /// A mgr pre-loaded with the builtin string formats.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mgr with no formats of its own, deferring to `parent`.
    pub fn with_parent(parent: Arc<ValidatorMgr>) -> Self {
        Self {
            parent: Some(parent),
            formats: RwLock::new(FormatTable::default()),
            cache: RwLock::new(FnvHashMap::default()),
        }
    }

    /// Register a string format under `name` and its aliases.
    pub fn register_format(
        &self,
        name: &str,
        aliases: &[&str],
        pattern: &str,
    ) -> Result<(), regex::Error> {
        self.formats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name, aliases, pattern)
    }

    fn lookup_format(&self, name: &str) -> Option<StrFmt> {
        let found = self
            .formats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name);
        match found {
            Some(fmt) => Some(fmt),
            None => self.parent.as_ref()?.lookup_format(name),
        }
    }

    /// Fetch (or compile and cache) the validator for a rule string.
    pub fn get(&self, rule: &str) -> Result<Arc<Validator>, CompileError> {
        if let Some(v) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rule)
        {
            return Ok(v.clone());
        }

        let parsed = ParsedRule::parse(rule)?;
        let compiled = Arc::new(self.compile(&parsed)?);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rule.to_owned(), compiled.clone());
        Ok(compiled)
    }

    fn compile(&self, rule: &ParsedRule) -> Result<Validator, CompileError> {
        if rule.is_empty() {
            return Ok(Validator::Any);
        }
        match rule.name.as_str() {
            "int" => Ok(Validator::Int(IntRule {
                raw: rule.raw.clone(),
                min: bound(rule, |r| r.lo.as_deref(), |r| r.lo_exclusive, 1)?,
                max: bound(rule, |r| r.hi.as_deref(), |r| r.hi_exclusive, -1)?,
                choices: parse_choices(rule)?,
            })),
            "uint" => Ok(Validator::Uint(UintRule {
                raw: rule.raw.clone(),
                min: bound(rule, |r| r.lo.as_deref(), |r| r.lo_exclusive, 1)?,
                max: bound(rule, |r| r.hi.as_deref(), |r| r.hi_exclusive, -1)?,
                choices: parse_choices(rule)?,
            })),
            "float" | "double" => {
                let range = rule.range.clone().unwrap_or_default();
                Ok(Validator::Float(FloatRule {
                    raw: rule.raw.clone(),
                    min: float_bound(rule, range.lo.as_deref())?,
                    max: float_bound(rule, range.hi.as_deref())?,
                    excl_min: range.lo_exclusive,
                    excl_max: range.hi_exclusive,
                }))
            }
            "string" | "str" => {
                let pattern = match rule.params.first() {
                    Some(RuleParam::Lit(p)) if !p.is_empty() => Some(Arc::new(
                        regex::Regex::new(p).map_err(|e| CompileError::BadPattern {
                            rule: rule.raw.clone(),
                            msg: e.to_string(),
                        })?,
                    )),
                    _ => None,
                };
                Ok(Validator::Str(StrRule {
                    raw: rule.raw.clone(),
                    len: len_range(rule)?,
                    pattern,
                    choices: rule.choices.clone(),
                }))
            }
            "slice" | "array" => {
                let elem = match rule.params.first() {
                    Some(RuleParam::Rule(inner)) => self.compile(inner)?,
                    _ => Validator::Any,
                };
                Ok(Validator::Slice {
                    raw: rule.raw.clone(),
                    elem: Box::new(elem),
                    len: len_range(rule)?,
                })
            }
            "map" => {
                let mut params = rule.params.iter();
                let key = match params.next() {
                    Some(RuleParam::Rule(inner)) => Some(Box::new(self.compile(inner)?)),
                    _ => None,
                };
                let value = match params.next() {
                    Some(RuleParam::Rule(inner)) => Some(Box::new(self.compile(inner)?)),
                    _ => None,
                };
                Ok(Validator::Map { raw: rule.raw.clone(), key, value, len: len_range(rule)? })
            }
            "struct" => {
                let mut members = Vec::with_capacity(rule.params.len());
                for param in &rule.params {
                    if let RuleParam::Named { key, rule: inner } = param {
                        members.push((key.clone(), self.compile(inner)?));
                    }
                }
                Ok(Validator::Struct { raw: rule.raw.clone(), members })
            }
            name => match self.lookup_format(name) {
                Some(fmt) => Ok(Validator::Fmt {
                    raw: rule.raw.clone(),
                    fmt,
                    len: len_range(rule)?,
                }),
                None => Err(CompileError::UnknownKind(name.to_owned())),
            },
        }
    }
}

/// Parse an integer-kind bound, folding exclusivity into the inclusive
/// bound (`(0,` becomes `min 1`).
fn bound<T>(
    rule: &ParsedRule,
    pick: impl Fn(&RuleRange) -> Option<&str>,
    exclusive: impl Fn(&RuleRange) -> bool,
    shift: i64,
) -> Result<Option<T>, CompileError>
where
    T: TryFrom<i128>,
{
    let Some(range) = &rule.range else { return Ok(None) };
    let Some(text) = pick(range) else { return Ok(None) };
    let n: i128 = text.parse().map_err(|_| CompileError::BadBound {
        rule: rule.raw.clone(),
        msg: format!("{text:?} is not an integer"),
    })?;
    let n = if exclusive(range) { n + i128::from(shift) } else { n };
    T::try_from(n).map(Some).map_err(|_| CompileError::BadBound {
        rule: rule.raw.clone(),
        msg: format!("{n} does not fit the rule kind"),
    })
}

fn float_bound(rule: &ParsedRule, text: Option<&str>) -> Result<Option<f64>, CompileError> {
    match text {
        None => Ok(None),
        Some(t) => t.parse().map(Some).map_err(|_| CompileError::BadBound {
            rule: rule.raw.clone(),
            msg: format!("{t:?} is not a number"),
        }),
    }
}

fn len_range(rule: &ParsedRule) -> Result<LenRange, CompileError> {
    Ok(LenRange {
        min: bound(rule, |r| r.lo.as_deref(), |r| r.lo_exclusive, 1)?,
        max: bound(rule, |r| r.hi.as_deref(), |r| r.hi_exclusive, -1)?,
    })
}

fn parse_choices<T: std::str::FromStr>(rule: &ParsedRule) -> Result<Vec<T>, CompileError> {
    rule.choices
        .iter()
        .map(|c| {
            c.parse().map_err(|_| CompileError::BadBound {
                rule: rule.raw.clone(),
                msg: format!("enum choice {c:?} does not fit the rule kind"),
            })
        })
        .collect()
}
