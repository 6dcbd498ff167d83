//! Output classification: one line in, at most one rule out.
//!
//! A [`RuleSet`] is an ordered table of [`MatchRule`]s. Every line of
//! bundler output is tested against the rules in order and the first rule
//! whose trigger fires decides the line's [`Classification`]. Lines that
//! match nothing are plain informational output.

mod builtin;

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RuleConfig;

pub use builtin::builtin_rules;

/// Errors raised while building match rules.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid rule pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Known recoverable error signals, each paired with a remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemediableKind {
    /// The OS file-watch / descriptor limit was hit (`ENOSPC`, `EMFILE`).
    FileWatcherLimitExceeded,
    /// A JS module could not be resolved; dependencies need installing.
    ModuleNotFound,
    /// The bundler's transform cache is unusable.
    BundlerCacheCorrupt,
    /// The bundler worker died underneath the dev server.
    BundlerProcessExitedUnexpectedly,
}

impl RemediableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediableKind::FileWatcherLimitExceeded => "file-watcher-limit-exceeded",
            RemediableKind::ModuleNotFound => "module-not-found",
            RemediableKind::BundlerCacheCorrupt => "bundler-cache-corrupt",
            RemediableKind::BundlerProcessExitedUnexpectedly => {
                "bundler-process-exited-unexpectedly"
            }
        }
    }
}

impl fmt::Display for RemediableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule decides about a line once its trigger fires.
///
/// This is also the on-disk form used by `[[rules]]` entries:
/// `outcome = { type = "remediable", kind = "module-not-found" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outcome {
    /// The server is usable; the extracted value is reported to the caller.
    Ready,
    /// A known recoverable error.
    Remediable { kind: RemediableKind },
    /// An error with no chance of self-healing.
    Fatal { kind: String },
    /// A progress phrase worth labelling in the log.
    Info { label: String },
}

/// The test half of a rule.
#[derive(Debug, Clone)]
pub enum Trigger {
    Substring(String),
    Regex(Regex),
}

impl Trigger {
    pub fn substring(text: impl Into<String>) -> Self {
        Trigger::Substring(text.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, RuleError> {
        Regex::new(pattern)
            .map(Trigger::Regex)
            .map_err(|source| RuleError::InvalidRegex {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// Test `line`, returning the extracted value on a hit.
    ///
    /// Regex triggers extract capture group 1 when the pattern has one and
    /// the whole match otherwise. Substring triggers extract the trimmed line.
    pub fn extract<'a>(&self, line: &'a str) -> Option<&'a str> {
        match self {
            Trigger::Substring(text) => line.contains(text.as_str()).then(|| line.trim()),
            Trigger::Regex(re) => {
                let caps = re.captures(line)?;
                caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
            }
        }
    }
}

/// A (trigger, outcome) pair.
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub trigger: Trigger,
    pub outcome: Outcome,
}

impl MatchRule {
    pub fn new(trigger: Trigger, outcome: Outcome) -> Self {
        Self { trigger, outcome }
    }

    pub fn from_config(config: &RuleConfig) -> Result<Self, RuleError> {
        let trigger = if config.regex {
            Trigger::regex(&config.pattern)?
        } else {
            Trigger::substring(config.pattern.clone())
        };
        Ok(Self::new(trigger, config.outcome.clone()))
    }
}

/// The verdict for one line of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Ready(String),
    Remediable(RemediableKind),
    Fatal(String),
    /// Ordinary output; carries the rule label when an info rule matched.
    Informational(Option<String>),
}

/// Ordered rule table. First match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<MatchRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<MatchRule>) -> Self {
        Self { rules }
    }

    /// The built-in table for the Expo / Metro dev server.
    pub fn builtin() -> Result<Self, RuleError> {
        Ok(Self::new(builtin_rules()?))
    }

    /// Build a table from configured rules, optionally followed by the
    /// built-in ones. Configured rules always take precedence.
    pub fn from_config(configured: &[RuleConfig], include_builtin: bool) -> Result<Self, RuleError> {
        let mut rules = configured
            .iter()
            .map(MatchRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        if include_builtin {
            rules.extend(builtin_rules()?);
        }
        Ok(Self::new(rules))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classify one line.
    pub fn classify(&self, line: &str) -> Classification {
        for rule in &self.rules {
            let Some(value) = rule.trigger.extract(line) else {
                continue;
            };
            return match &rule.outcome {
                Outcome::Ready => Classification::Ready(value.to_string()),
                Outcome::Remediable { kind } => Classification::Remediable(*kind),
                Outcome::Fatal { kind } => Classification::Fatal(kind.clone()),
                Outcome::Info { label } => Classification::Informational(Some(label.clone())),
            };
        }
        Classification::Informational(None)
    }
}
