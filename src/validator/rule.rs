//! Rule tag grammar.
//!
//! Rules take the form `@NAME<P1,P2,..>[MIN,MAX]{E1,E2,..}` or a bare
//! string-format name. `<..>` carries kind-specific parameters, which may
//! themselves be nested rules (`@slice<@int[0,10]>[1,3]`) or `key=@rule`
//! pairs for struct members. `[lo,hi]` is an inclusive range, `(lo,hi)`
//! exclusive, mixed brackets mix exclusivity, an empty bound is unbounded.
//! `{..}` introduces an enum whitelist.
//!
//! The parser is a small recursive-descent over bytes: total, no
//! backtracking, every input either parses or yields a [`RuleError`].

use std::fmt;

/// Parsed form of one rule string.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Kind or string-format name.
    pub name: String,
    /// Whether the rule was spelled with a leading `@`.
    pub tagged: bool,
    /// `<..>` parameters.
    pub params: Vec<RuleParam>,
    /// `[..]` / `(..)` range.
    pub range: Option<RuleRange>,
    /// `{..}` whitelist.
    pub choices: Vec<String>,
    /// The original text, verbatim, for error messages.
    pub raw: String,
}

/// One `<..>` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleParam {
    /// A nested rule, e.g. the element rule of `@slice<@int[0,10]>`.
    Rule(Rule),
    /// A `key=@rule` pair, used for struct members.
    Named { key: String, rule: Rule },
    /// A plain literal, e.g. an integer base or a regex pattern.
    Lit(String),
}

/// A `[lo,hi]` range with per-bound exclusivity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleRange {
    pub lo: Option<String>,
    pub hi: Option<String>,
    pub lo_exclusive: bool,
    pub hi_exclusive: bool,
}

/// A rule string that failed to parse.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleError {
    pub pos: usize,
    pub msg: String,
}

impl RuleError {
    fn new(pos: usize, msg: impl Into<String>) -> Self {
        Self { pos, msg: msg.into() }
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule parse error at offset {}: {}", self.pos, self.msg)
    }
}

impl std::error::Error for RuleError {}

impl Rule {
    /// Parse a complete rule string. The empty string parses into the
    /// accept-everything rule.
    pub fn parse(input: &str) -> Result<Rule, RuleError> {
        let mut parser = Parser { bytes: input.as_bytes(), pos: 0 };
        let rule = parser.rule()?;
        if parser.pos != parser.bytes.len() {
            return Err(RuleError::new(parser.pos, "trailing characters after rule"));
        }
        Ok(rule)
    }

    /// Whether this is the empty, accept-everything rule.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn rule(&mut self) -> Result<Rule, RuleError> {
        let start = self.pos;
        let tagged = self.peek() == Some(b'@');
        if tagged {
            self.pos += 1;
        }

        let name = self.name()?;
        if name.is_empty() {
            if tagged {
                return Err(RuleError::new(self.pos, "expected rule name after `@`"));
            }
            if self.pos != self.bytes.len() {
                return Err(RuleError::new(self.pos, "expected rule name"));
            }
            // empty rule accepts everything
            return Ok(Rule {
                name: String::new(),
                tagged: false,
                params: Vec::new(),
                range: None,
                choices: Vec::new(),
                raw: String::new(),
            });
        }

        let mut rule = Rule {
            name,
            tagged,
            params: Vec::new(),
            range: None,
            choices: Vec::new(),
            raw: String::new(),
        };

        if tagged {
            if self.peek() == Some(b'<') {
                rule.params = self.params()?;
            }
            if matches!(self.peek(), Some(b'[') | Some(b'(')) {
                rule.range = Some(self.range()?);
            }
            if self.peek() == Some(b'{') {
                rule.choices = self.choices()?;
            }
        }

        rule.raw = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        Ok(rule)
    }

    fn name(&mut self) -> Result<String, RuleError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_name_byte(b) {
                self.pos += 1;
            } else {
                break;
            }
        }
        match std::str::from_utf8(&self.bytes[start..self.pos]) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => Err(RuleError::new(start, "rule name is not ASCII")),
        }
    }

    fn params(&mut self) -> Result<Vec<RuleParam>, RuleError> {
        // caller checked for `<`
        self.pos += 1;
        let mut params = Vec::new();
        loop {
            if self.peek() == Some(b'>') {
                self.pos += 1;
                return Ok(params);
            }
            params.push(self.param()?);
            match self.bump() {
                Some(b',') => continue,
                Some(b'>') => return Ok(params),
                _ => return Err(RuleError::new(self.pos, "expected `,` or `>` in parameters")),
            }
        }
    }

    fn param(&mut self) -> Result<RuleParam, RuleError> {
        if self.peek() == Some(b'@') {
            return Ok(RuleParam::Rule(self.nested_rule()?));
        }

        // look ahead for `key=@rule`
        let start = self.pos;
        let key = self.name()?;
        if !key.is_empty() && self.peek() == Some(b'=') {
            self.pos += 1;
            if self.peek() == Some(b'@') {
                return Ok(RuleParam::Named { key, rule: self.nested_rule()? });
            }
            // fall through: `key=literal` stays a literal
        }
        self.pos = start;
        Ok(RuleParam::Lit(self.literal()?))
    }

    fn nested_rule(&mut self) -> Result<Rule, RuleError> {
        let start = self.pos;
        // `@`
        self.pos += 1;
        let name = self.name()?;
        if name.is_empty() {
            return Err(RuleError::new(self.pos, "expected rule name after `@`"));
        }
        let mut rule = Rule {
            name,
            tagged: true,
            params: Vec::new(),
            range: None,
            choices: Vec::new(),
            raw: String::new(),
        };
        if self.peek() == Some(b'<') {
            rule.params = self.params()?;
        }
        if matches!(self.peek(), Some(b'[') | Some(b'(')) {
            rule.range = Some(self.range()?);
        }
        if self.peek() == Some(b'{') {
            rule.choices = self.choices()?;
        }
        rule.raw = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        Ok(rule)
    }

    /// A literal parameter: everything up to a top-level `,` or `>`,
    /// tracking bracket nesting so ranges inside it do not terminate it.
    fn literal(&mut self) -> Result<String, RuleError> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'<' | b'[' | b'{' | b'(' => depth += 1,
                b'>' if depth == 0 => break,
                b',' if depth == 0 => break,
                b'>' | b']' | b'}' | b')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| RuleError::new(self.pos, "unbalanced bracket in parameter"))?;
                }
                _ => {}
            }
            self.pos += 1;
        }
        if depth != 0 {
            return Err(RuleError::new(self.pos, "unterminated bracket in parameter"));
        }
        match std::str::from_utf8(&self.bytes[start..self.pos]) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => Err(RuleError::new(start, "parameter is not valid UTF-8")),
        }
    }

    fn range(&mut self) -> Result<RuleRange, RuleError> {
        let open = self.bump().unwrap_or(b'[');
        let mut range = RuleRange { lo_exclusive: open == b'(', ..RuleRange::default() };

        let lo = self.bound()?;
        match self.bump() {
            Some(b',') => {}
            Some(b']') | Some(b')') => {
                // single-value range `[n]` bounds both sides
                range.hi_exclusive = range.lo_exclusive;
                range.lo = lo.clone();
                range.hi = lo;
                return Ok(range);
            }
            _ => return Err(RuleError::new(self.pos, "expected `,` in range")),
        }
        range.lo = lo;

        range.hi = self.bound()?;
        match self.bump() {
            Some(b']') => range.hi_exclusive = false,
            Some(b')') => range.hi_exclusive = true,
            _ => return Err(RuleError::new(self.pos, "unterminated range")),
        }
        Ok(range)
    }

    fn bound(&mut self) -> Result<Option<String>, RuleError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b',' | b']' | b')' => break,
                b'[' | b'(' | b'{' | b'}' | b'<' | b'>' => {
                    return Err(RuleError::new(self.pos, "unexpected bracket in range bound"));
                }
                _ => self.pos += 1,
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| RuleError::new(start, "range bound is not valid UTF-8"))?
            .trim();
        Ok(if text.is_empty() { None } else { Some(text.to_owned()) })
    }

    fn choices(&mut self) -> Result<Vec<String>, RuleError> {
        // caller checked for `{`
        self.pos += 1;
        let mut choices = Vec::new();
        let mut start = self.pos;
        loop {
            match self.peek() {
                Some(b'}') => {
                    let text = std::str::from_utf8(&self.bytes[start..self.pos])
                        .map_err(|_| RuleError::new(start, "enum choice is not valid UTF-8"))?;
                    if !text.is_empty() || !choices.is_empty() {
                        choices.push(text.to_owned());
                    }
                    self.pos += 1;
                    return Ok(choices);
                }
                Some(b',') => {
                    let text = std::str::from_utf8(&self.bytes[start..self.pos])
                        .map_err(|_| RuleError::new(start, "enum choice is not valid UTF-8"))?;
                    choices.push(text.to_owned());
                    self.pos += 1;
                    start = self.pos;
                }
                Some(_) => self.pos += 1,
                None => return Err(RuleError::new(self.pos, "unterminated enum whitelist")),
            }
        }
    }
}
