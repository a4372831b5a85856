//! Service filter expressions.
//!
//! Services are selected with LDAP-style filter strings, the same query form
//! the runtime's service registry has always accepted:
//!
//! ```text
//! (type=default)
//! (&(objectClass=probe.Invoker)(rank>=10))
//! (|(vendor=acme*)(!(debug=*)))
//! ```
//!
//! Supported operators: `=` (with `*` wildcards and presence), `~=`
//! (case-insensitive equality), `>=`, `<=`, and the composites `&`, `|`,
//! `!`. Attribute names are matched case-insensitively. Ordering comparisons
//! are numeric when both sides parse as integers, lexicographic otherwise.
//! A backslash escapes the next character in a value.

use crate::constants::MAX_FILTER_DEPTH;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Parsed service filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// At least one sub-filter must match.
    Or(Vec<Filter>),
    /// Sub-filter must not match.
    Not(Box<Filter>),
    /// Attribute equals value.
    Equal { key: String, value: String },
    /// Attribute equals value, ignoring case.
    Approx { key: String, value: String },
    /// Attribute is present with any value.
    Present(String),
    /// Attribute matches a `*` pattern; `parts` are the literal segments.
    Substring { key: String, parts: Vec<String> },
    /// Attribute is greater than or equal to value.
    GreaterOrEqual { key: String, value: String },
    /// Attribute is less than or equal to value.
    LessOrEqual { key: String, value: String },
}

impl Filter {
    /// Parses a filter expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFilter`] on malformed input.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            input,
            chars: input.chars().collect(),
            pos: 0,
            depth: 0,
        };
        parser.skip_ws();
        let filter = parser.filter()?;
        parser.skip_ws();
        if parser.pos != parser.chars.len() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(filter)
    }

    /// Evaluates the filter against a property map.
    #[must_use]
    pub fn matches(&self, properties: &BTreeMap<String, String>) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(properties)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(properties)),
            Self::Not(filter) => !filter.matches(properties),
            Self::Present(key) => lookup(properties, key).is_some(),
            Self::Equal { key, value } => lookup(properties, key) == Some(value.as_str()),
            Self::Approx { key, value } => {
                lookup(properties, key).is_some_and(|v| v.trim().eq_ignore_ascii_case(value.trim()))
            }
            Self::Substring { key, parts } => {
                lookup(properties, key).is_some_and(|v| substring_match(v, parts))
            }
            Self::GreaterOrEqual { key, value } => lookup(properties, key)
                .is_some_and(|v| compare(v, value) != std::cmp::Ordering::Less),
            Self::LessOrEqual { key, value } => lookup(properties, key)
                .is_some_and(|v| compare(v, value) != std::cmp::Ordering::Greater),
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn lookup<'a>(properties: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    properties
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn compare(actual: &str, expected: &str) -> std::cmp::Ordering {
    match (actual.trim().parse::<i64>(), expected.trim().parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => actual.cmp(expected),
    }
}

fn substring_match(value: &str, parts: &[String]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return true;
    };
    let Some(mut remaining) = value.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part.as_str()) {
            Some(at) => remaining = &remaining[at + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> Error {
        Error::InvalidFilter {
            filter: self.input.to_string(),
            reason: format!("{reason} at position {}", self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect('(')?;
        self.depth += 1;
        if self.depth > MAX_FILTER_DEPTH {
            return Err(self.error(&format!("nesting deeper than {MAX_FILTER_DEPTH}")));
        }
        self.skip_ws();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.filter_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.filter_list()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_ws();
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_ws();
        self.expect(')')?;
        self.depth -= 1;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        self.skip_ws();
        while self.peek() == Some('(') {
            filters.push(self.filter()?);
            self.skip_ws();
        }
        if filters.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let key: String = self.chars[start..self.pos].iter().collect();
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(c @ ('~' | '<' | '>')) => {
                self.pos += 1;
                self.expect('=')?;
                c
            }
            _ => return Err(self.error("expected operator")),
        };

        let parts = self.value()?;
        match op {
            '=' if parts.len() == 2 && parts.iter().all(String::is_empty) => Ok(Filter::Present(key)),
            '=' if parts.len() > 1 => Ok(Filter::Substring { key, parts }),
            _ if parts.len() > 1 => Err(self.error("wildcard only allowed with '='")),
            _ => {
                let value = parts.into_iter().next().unwrap_or_default();
                Ok(match op {
                    '~' => Filter::Approx { key, value },
                    '>' => Filter::GreaterOrEqual { key, value },
                    '<' => Filter::LessOrEqual { key, value },
                    _ => Filter::Equal { key, value },
                })
            }
        }
    }

    /// Reads a value up to the closing paren, split on unescaped `*`.
    fn value(&mut self) -> Result<Vec<String>> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    self.pos += 1;
                    if let Some(last) = parts.last_mut() {
                        last.push(escaped);
                    }
                }
                Some('*') => {
                    self.pos += 1;
                    parts.push(String::new());
                }
                Some(c) => {
                    self.pos += 1;
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                }
            }
        }
        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_presence_and_substring() {
        assert_eq!(Filter::parse("(a=*)").unwrap(), Filter::Present("a".into()));
        let f = Filter::parse("(name=pro*ker)").unwrap();
        assert!(f.matches(&props(&[("name", "probe-invoker")])));
        assert!(!f.matches(&props(&[("name", "probe-invoked")])));
    }

    #[test]
    fn test_escape() {
        let f = Filter::parse(r"(path=a\*b)").unwrap();
        assert!(f.matches(&props(&[("path", "a*b")])));
        assert!(!f.matches(&props(&[("path", "axxb")])));
    }
}
