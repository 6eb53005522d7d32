//! Wildcard name filters shared by catalog enumeration and rule selection.
//!
//! A filter is one of:
//! * `*` – matches every name,
//! * a plain name – matches exactly that name,
//! * a comma separated list (or a `Vec` of names) – set membership,
//! * a name containing `*` such as `prod_*` – glob, where `*` stands for any
//!   run of characters.
//!
//! Matching is case-sensitive. Every character except `*` is literal, so a
//! filter can never smuggle regular expression syntax into a match.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone)]
pub enum NameFilter {
    Any,
    Exact(String),
    OneOf(BTreeSet<String>),
    Pattern(Glob),
}

/// A compiled glob. The original text is kept for display and equality.
#[derive(Debug, Clone)]
pub struct Glob {
    text: String,
    compiled: Regex,
}
impl Glob {
    fn new(text: &str) -> Self {
        let body = text
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        // escaped literals joined by `.*` always form a valid expression
        let compiled = Regex::new(&format!("^{body}$")).unwrap();
        Self { text: text.to_string(), compiled }
    }
    pub fn text(&self) -> &str {
        &self.text
    }
    pub fn is_match(&self, name: &str) -> bool {
        self.compiled.is_match(name)
    }
}
impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl NameFilter {
    pub fn parse(expression: &str) -> Self {
        let expression = expression.trim();
        if expression.is_empty() || expression == "*" {
            return Self::Any;
        }
        if expression.contains(',') {
            return Self::from_names(expression.split(','));
        }
        if expression.contains('*') {
            return Self::Pattern(Glob::new(expression));
        }
        Self::Exact(expression.to_string())
    }
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if names.iter().any(|n| n == "*") {
            return Self::Any;
        }
        match names.len() {
            0 => Self::Any,
            1 => Self::parse(names.iter().next().map(String::as_str).unwrap_or("*")),
            _ => Self::OneOf(names),
        }
    }
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == name,
            Self::OneOf(names) => names.contains(name),
            Self::Pattern(glob) => glob.is_match(name),
        }
    }
    /// Keeps the names accepted by this filter, preserving their order.
    pub fn select<'n, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'n String>,
    {
        names.into_iter().filter(|n| self.matches(n)).cloned().collect()
    }
}

impl Default for NameFilter {
    fn default() -> Self {
        Self::Any
    }
}
impl PartialEq for NameFilter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, Self::Any) => true,
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::OneOf(a), Self::OneOf(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a == b,
            _ => false,
        }
    }
}
impl From<&str> for NameFilter {
    fn from(expression: &str) -> Self {
        Self::parse(expression)
    }
}
impl From<String> for NameFilter {
    fn from(expression: String) -> Self {
        Self::parse(&expression)
    }
}
impl From<Vec<String>> for NameFilter {
    fn from(names: Vec<String>) -> Self {
        Self::from_names(names)
    }
}
impl From<&[&str]> for NameFilter {
    fn from(names: &[&str]) -> Self {
        Self::from_names(names.iter())
    }
}
impl fmt::Display for NameFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(name) => write!(f, "{name}"),
            Self::OneOf(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "{}", names.join(","))
            }
            Self::Pattern(glob) => write!(f, "{}", glob.text()),
        }
    }
}

// Filters travel as their textual form (or a list of names) over the wire.
impl Serialize for NameFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
impl<'de> Deserialize<'de> for NameFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            List(Vec<String>),
        }
        Ok(match Wire::deserialize(deserializer)? {
            Wire::Text(text) => Self::parse(&text),
            Wire::List(names) => Self::from_names(names),
        })
    }
}
