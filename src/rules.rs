//! Pattern rules and the registry holding them.
//!
//! A rule is either a regular expression or a custom predicate. Every rule
//! carries examples it must match and examples it must not match; a rule is
//! only accepted by the registry once it agrees with its own examples.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::datatype::TypeClass;
use crate::error::{DiscoverxError, Result};
use crate::filter::NameFilter;

/// Prefix of the SQL function a query engine must expose for a custom rule.
pub const CUSTOM_FUNCTION_PREFIX: &str = "dx_rule_";

pub type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Regex,
    Custom,
}

#[derive(Clone)]
pub enum RuleDefinition {
    Regex(Regex),
    Custom(Predicate),
}
impl fmt::Debug for RuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Regex(regex) => write!(f, "Regex({})", regex.as_str()),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    description: String,
    definition: RuleDefinition,
    match_examples: Vec<String>,
    nomatch_examples: Vec<String>,
    applies_to: TypeClass,
}

impl Rule {
    pub fn regex(name: &str, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| DiscoverxError::invalid_rule(name, format!("pattern does not compile: {e}")))?;
        Ok(Self::with_definition(name, RuleDefinition::Regex(regex)))
    }
    pub fn custom<F>(name: &str, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::with_definition(name, RuleDefinition::Custom(Arc::new(predicate)))
    }
    fn with_definition(name: &str, definition: RuleDefinition) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            definition,
            match_examples: Vec::new(),
            nomatch_examples: Vec::new(),
            applies_to: TypeClass::String,
        }
    }
    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
    pub fn with_match_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.match_examples.extend(examples.into_iter().map(Into::into));
        self
    }
    pub fn with_nomatch_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nomatch_examples.extend(examples.into_iter().map(Into::into));
        self
    }
    pub fn applies_to(mut self, class: TypeClass) -> Self {
        self.applies_to = class;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn description(&self) -> &str {
        &self.description
    }
    pub fn definition(&self) -> &RuleDefinition {
        &self.definition
    }
    pub fn kind(&self) -> RuleKind {
        match self.definition {
            RuleDefinition::Regex(_) => RuleKind::Regex,
            RuleDefinition::Custom(_) => RuleKind::Custom,
        }
    }
    pub fn pattern(&self) -> Option<&str> {
        match &self.definition {
            RuleDefinition::Regex(regex) => Some(regex.as_str()),
            RuleDefinition::Custom(_) => None,
        }
    }
    pub fn match_examples(&self) -> &[String] {
        &self.match_examples
    }
    pub fn nomatch_examples(&self) -> &[String] {
        &self.nomatch_examples
    }
    pub fn type_class(&self) -> TypeClass {
        self.applies_to
    }
    /// Whether a column of the given engine data type can be tested by this rule.
    pub fn accepts(&self, data_type: &str) -> bool {
        TypeClass::of(data_type) == self.applies_to
    }
    pub fn is_match(&self, value: &str) -> bool {
        match &self.definition {
            RuleDefinition::Regex(regex) => regex.is_match(value),
            RuleDefinition::Custom(predicate) => predicate(value),
        }
    }
    /// Name of the SQL function that evaluates a custom rule inside an engine.
    pub fn sql_function(&self) -> String {
        format!("{CUSTOM_FUNCTION_PREFIX}{}", self.name)
    }

    /// Checks the rule against its own examples.
    pub fn validate(&self) -> Result<()> {
        lazy_static! {
            static ref RULE_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
        }
        if !RULE_NAME.is_match(&self.name) {
            return Err(DiscoverxError::invalid_rule(
                &self.name,
                "names may only contain letters, digits and underscores",
            ));
        }
        if self.match_examples.is_empty() || self.nomatch_examples.is_empty() {
            return Err(DiscoverxError::invalid_rule(
                &self.name,
                "at least one match and one no-match example are required",
            ));
        }
        if let Some(example) = self.match_examples.iter().find(|e| !self.is_match(e)) {
            return Err(DiscoverxError::invalid_rule(
                &self.name,
                format!("match example '{example}' does not match"),
            ));
        }
        if let Some(example) = self.nomatch_examples.iter().find(|e| self.is_match(e)) {
            return Err(DiscoverxError::invalid_rule(
                &self.name,
                format!("no-match example '{example}' matches"),
            ));
        }
        Ok(())
    }

    pub fn info(&self) -> RuleInfo {
        RuleInfo {
            name: self.name.clone(),
            kind: self.kind(),
            description: self.description.clone(),
            definition: self.pattern().map(str::to_string),
            match_examples: self.match_examples.clone(),
            nomatch_examples: self.nomatch_examples.clone(),
            applies_to: self.applies_to,
        }
    }
}

/// Serializable view of a rule, also used to declare regex rules in settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: RuleKind,
    #[serde(default)]
    pub description: String,
    pub definition: Option<String>,
    #[serde(default)]
    pub match_examples: Vec<String>,
    #[serde(default)]
    pub nomatch_examples: Vec<String>,
    #[serde(default)]
    pub applies_to: TypeClass,
}
fn default_kind() -> RuleKind {
    RuleKind::Regex
}

impl TryFrom<RuleInfo> for Rule {
    type Error = DiscoverxError;
    fn try_from(info: RuleInfo) -> Result<Self> {
        let pattern = match (info.kind, info.definition) {
            (RuleKind::Regex, Some(pattern)) => pattern,
            (RuleKind::Regex, None) => {
                return Err(DiscoverxError::invalid_rule(&info.name, "a regex rule needs a definition"));
            }
            (RuleKind::Custom, _) => {
                return Err(DiscoverxError::invalid_rule(
                    &info.name,
                    "custom rules can only be registered from code",
                ));
            }
        };
        Ok(Rule::regex(&info.name, &pattern)?
            .describe(&info.description)
            .with_match_examples(info.match_examples)
            .with_nomatch_examples(info.nomatch_examples)
            .applies_to(info.applies_to))
    }
}

// ------------- Built-in rules -------------
const IP_V4: &str = r"^(([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])\.){3}([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])$";
const IP_V6: &str = concat!(
    r"^(",
    r"([0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}|",
    r"([0-9a-fA-F]{1,4}:){1,7}:|",
    r"([0-9a-fA-F]{1,4}:){1,6}:[0-9a-fA-F]{1,4}|",
    r"([0-9a-fA-F]{1,4}:){1,5}(:[0-9a-fA-F]{1,4}){1,2}|",
    r"([0-9a-fA-F]{1,4}:){1,4}(:[0-9a-fA-F]{1,4}){1,3}|",
    r"([0-9a-fA-F]{1,4}:){1,3}(:[0-9a-fA-F]{1,4}){1,4}|",
    r"([0-9a-fA-F]{1,4}:){1,2}(:[0-9a-fA-F]{1,4}){1,5}|",
    r"[0-9a-fA-F]{1,4}:(:[0-9a-fA-F]{1,4}){1,6}|",
    r":((:[0-9a-fA-F]{1,4}){1,7}|:)|",
    r"fe80:(:[0-9a-fA-F]{0,4}){0,4}%[0-9a-zA-Z]+|",
    r"::(ffff(:0{1,4})?:)?((25[0-5]|(2[0-4]|1?[0-9])?[0-9])\.){3}(25[0-5]|(2[0-4]|1?[0-9])?[0-9])|",
    r"([0-9a-fA-F]{1,4}:){1,4}:((25[0-5]|(2[0-4]|1?[0-9])?[0-9])\.){3}(25[0-5]|(2[0-4]|1?[0-9])?[0-9])",
    r")$"
);
const EMAIL: &str = r"^[^@]+@[^@]+\.[^@]+$";
const URL: &str = r"^(https?|ftp)://[^\s/$.?#].[^\s]*$";
const FQDN: &str = r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}$";
const MAC: &str = r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$";

fn built_in(name: &str, description: &str, pattern: &str, matches: &[&str], nomatches: &[&str]) -> Arc<Rule> {
    let rule = Rule::regex(name, pattern)
        .map(|r| {
            r.describe(description)
                .with_match_examples(matches.iter().copied())
                .with_nomatch_examples(nomatches.iter().copied())
        })
        .and_then(|r| r.validate().map(|_| r));
    match rule {
        Ok(rule) => Arc::new(rule),
        Err(e) => panic!("Built-in rule is malformed: {e}"),
    }
}

lazy_static! {
    static ref BUILT_IN_RULES: Vec<Arc<Rule>> = vec![
        built_in(
            "ip_v4",
            "IP address v4",
            IP_V4,
            &["192.1.1.1", "10.255.0.1", "0.0.0.0"],
            &["192.1.1", "256.1.1.1", "1.1.1.1.1", "a.b.c.d"],
        ),
        built_in(
            "ip_v6",
            "IP address v6",
            IP_V6,
            &["2001:0db8:85a3:0000:0000:8a2e:0370:7334", "::1", "fe80::1ff:fe23:4567:890a"],
            &["192.168.0.1", "2001:db8::g1", "not an address"],
        ),
        built_in(
            "email",
            "Email address",
            EMAIL,
            &["example_email@databricks.com", "first.last@sub.example.org"],
            &["not an email", "a@b", "user@@example.com"],
        ),
        built_in(
            "url",
            "URL",
            URL,
            &["https://www.databricks.com/", "http://example.org/path?q=1", "ftp://files.example.com"],
            &["www.databricks.com", "http://", "mailto:someone@example.com"],
        ),
        built_in(
            "fqdn",
            "Fully qualified domain name",
            FQDN,
            &["databricks.com", "www.example.co.uk"],
            &["localhost", "-bad-.com", "192.168.0.1"],
        ),
        built_in(
            "mac",
            "MAC address",
            MAC,
            &["01:23:45:67:89:ab", "01-23-45-67-89-AB"],
            &["01:23:45:67:89", "0123.4567.89ab", "01:23:45:67:89:zz"],
        ),
    ];
}

// ------------- Registry -------------
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: BTreeMap<String, Arc<Rule>>,
}

impl RuleRegistry {
    /// A registry holding only the built-in rules.
    pub fn new() -> Self {
        let rules = BUILT_IN_RULES
            .iter()
            .map(|rule| (rule.name().to_string(), Arc::clone(rule)))
            .collect();
        Self { rules }
    }
    pub fn with_custom_rules<I>(custom_rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = Rule>,
    {
        let mut registry = Self::new();
        for rule in custom_rules {
            registry.register(rule)?;
        }
        Ok(registry)
    }
    pub fn register(&mut self, rule: Rule) -> Result<Arc<Rule>> {
        rule.validate()?;
        if self.rules.contains_key(rule.name()) {
            return Err(DiscoverxError::invalid_rule(rule.name(), "a rule with this name is already registered"));
        }
        info!(rule = rule.name(), kind = ?rule.kind(), "registered rule");
        let kept = Arc::new(rule);
        self.rules.insert(kept.name().to_string(), Arc::clone(&kept));
        Ok(kept)
    }
    pub fn get(&self, name: &str) -> Option<Arc<Rule>> {
        self.rules.get(name).cloned()
    }
    /// Rules whose name passes the filter, ordered by name.
    pub fn list_rules(&self, filter: &NameFilter) -> Vec<Arc<Rule>> {
        let selected: Vec<Arc<Rule>> = self
            .rules
            .values()
            .filter(|rule| filter.matches(rule.name()))
            .cloned()
            .collect();
        debug!(%filter, selected = selected.len(), "listed rules");
        selected
    }
    pub fn custom_rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values().filter(|rule| rule.kind() == RuleKind::Custom)
    }
    pub fn len(&self) -> usize {
        self.rules.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
