//! URL rules.
//!
//! A rule is a path pattern in `matchit` syntax: literal text, `{name}`
//! variables that match one segment, and an optional trailing `{*name}`
//! catch-all. Rules are matched by the router and run backwards here to
//! build URLs for collection members.

use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::error::{Error, Result};
use crate::model::UrlValues;

/// Escaped in catch-all values: everything that would end or alter the path.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Escaped in one-segment values.
const SEGMENT: &AsciiSet = &PATH.add(b'/');

#[derive(Clone, Debug, Eq, PartialEq)]
enum Part {
    Literal(String),
    Var(String),
    CatchAll(String),
}

/// A parsed URL rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rule {
    source: String,
    parts: Vec<Part>,
}

impl Rule {
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Route { rule: source.to_owned(), reason: reason.to_owned() };

        if !source.starts_with('/') {
            return Err(invalid("rules must start with `/`"));
        }

        let mut parts = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_owned()));
            }
            let close = rest[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or_else(|| invalid("unclosed `{`"))?;
            let name = &rest[open + 1..close];
            match name.strip_prefix('*') {
                Some(_) if close + 1 != rest.len() => {
                    return Err(invalid("catch-all must end the rule"));
                }
                Some(tail) if !tail.is_empty() => parts.push(Part::CatchAll(tail.to_owned())),
                None if !name.is_empty() && !name.contains('{') => {
                    parts.push(Part::Var(name.to_owned()))
                }
                _ => return Err(invalid("empty variable name")),
            }
            rest = &rest[close + 1..];
        }
        if rest.contains('}') {
            return Err(invalid("unmatched `}`"));
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_owned()));
        }

        Ok(Self { source: source.to_owned(), parts })
    }

    pub fn as_str(&self) -> &str { &self.source }

    /// Names of the variables in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Var(n) | Part::CatchAll(n) => Some(n.as_str()),
            Part::Literal(_) => None,
        })
    }

    pub fn has_variables(&self) -> bool {
        self.variables().next().is_some()
    }

    /// Fills in the rule's variables, percent-encoding their values. Returns
    /// `None` when a variable has no value or a one-segment variable would
    /// span segments. Values for names the rule doesn't use are ignored.
    pub fn build(&self, values: &UrlValues) -> Option<String> {
        let mut url = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(s) => url.push_str(s),
                Part::Var(n) => {
                    let v = values.get(n)?;
                    if v.is_empty() || v.contains('/') {
                        return None;
                    }
                    url.extend(utf8_percent_encode(v, SEGMENT));
                }
                Part::CatchAll(n) => url.extend(utf8_percent_encode(values.get(n)?, PATH)),
            }
        }
        Some(url)
    }

    /// The rule in `:name` notation, used by resource listings.
    pub fn display_template(&self) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                Part::Literal(s) => s.clone(),
                Part::Var(n) | Part::CatchAll(n) => format!(":{n}"),
            })
            .collect()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
