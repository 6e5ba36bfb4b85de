//! Ignore rules.
//!
//! Each rule pairs an entity category (e.g. `exchange`, `queue`) with a
//! regular expression. A metric is ignored when its entity name matches any
//! rule of its category, matching from the start of the name:
//! `^amq\.` ignores `amq.direct` but not `my.amq.direct`, and `amq` alone
//! also ignores `amq.direct`.

use regex_automata::meta::{BuildError, Regex};
use regex_automata::{Anchored, Input};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of an ignore rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    /// Regular expression matched from the start of the entity name.
    Regex,
}

impl RuleType {
    /// Return the configuration name for this rule type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Regex => "Regex",
        }
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Regex" => Ok(RuleType::Regex),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ignore rule as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    /// Entity category the rule applies to (case-sensitive).
    pub category: String,
    /// Rule type.
    pub rule_type: RuleType,
    /// Pattern source.
    pub pattern: String,
}

impl IgnoreRule {
    /// Create a regex rule.
    pub fn regex(category: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            rule_type: RuleType::Regex,
            pattern: pattern.into(),
        }
    }
}

/// Error when compiling an ignore rule.
#[derive(Debug, Clone, Error)]
#[error("Failed to compile {category} pattern '{pattern}': {source}")]
pub struct FilterCompileError {
    /// Category of the failing rule.
    pub category: String,
    /// The pattern that failed to compile.
    pub pattern: String,
    /// Underlying regex error.
    #[source]
    pub source: BuildError,
}

/// A compiled ignore pattern.
#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    fn compile(rule: &IgnoreRule) -> Result<Self, FilterCompileError> {
        match rule.rule_type {
            RuleType::Regex => Regex::new(&rule.pattern)
                .map(|regex| Self {
                    source: rule.pattern.clone(),
                    regex,
                })
                .map_err(|source| FilterCompileError {
                    category: rule.category.clone(),
                    pattern: rule.pattern.clone(),
                    source,
                }),
        }
    }

    /// Match from the start of `name` only.
    fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(Input::new(name).anchored(Anchored::Yes))
    }

    fn as_str(&self) -> &str {
        &self.source
    }
}

/// Compiled ignore rules, grouped by category in declaration order.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    rules: HashMap<String, Vec<CompiledPattern>>,
}

impl IgnoreFilter {
    /// Compile a set of rules. Fails on the first invalid pattern.
    pub fn compile<'a, I>(rules: I) -> Result<Self, FilterCompileError>
    where
        I: IntoIterator<Item = &'a IgnoreRule>,
    {
        let mut compiled: HashMap<String, Vec<CompiledPattern>> = HashMap::new();

        for rule in rules {
            let pattern = CompiledPattern::compile(rule)?;
            compiled
                .entry(rule.category.clone())
                .or_default()
                .push(pattern);
        }

        Ok(Self { rules: compiled })
    }

    /// A filter that ignores nothing.
    pub fn pass_all() -> Self {
        Self::default()
    }

    /// Returns true if the metric for `name` in `category` should be suppressed.
    pub fn is_ignored(&self, category: &str, name: &str) -> bool {
        match self.rules.get(category) {
            Some(patterns) => patterns.iter().any(|p| p.is_match(name)),
            None => false,
        }
    }

    /// True if no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Total number of rules across all categories.
    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Pattern sources registered for a category, in declaration order.
    pub fn patterns(&self, category: &str) -> Vec<&str> {
        self.rules
            .get(category)
            .map(|patterns| patterns.iter().map(CompiledPattern::as_str).collect())
            .unwrap_or_default()
    }
}

impl PartialEq for IgnoreFilter {
    fn eq(&self, other: &Self) -> bool {
        self.rules.len() == other.rules.len()
            && self
                .rules
                .keys()
                .all(|category| self.patterns(category) == other.patterns(category))
    }
}
