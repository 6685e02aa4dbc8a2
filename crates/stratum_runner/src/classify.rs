//! Failure classification rules.
//!
//! A failed attempt is matched against an ordered list of rules; the first
//! matching rule decides whether the failure is worth retrying. Text that no
//! rule recognizes is treated as permanent.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RunnerError, RunnerResult};
use crate::runner::CommandResult;

/// Why an attempt failed, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Likely to succeed if run again unchanged
    Transient,
    /// Will fail the same way every time
    Permanent,
    /// Killed after exceeding its time bound
    Timeout,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `(pattern, class)` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub id: String,
    /// Case-insensitive regular expression
    pub pattern: String,
    pub class: FailureClass,
    #[serde(default)]
    pub description: String,
}

impl ClassificationRule {
    pub fn new(id: impl Into<String>, pattern: impl Into<String>, class: FailureClass) -> Self {
        Self {
            id: id.into(),
            pattern: pattern.into(),
            class,
            description: String::new(),
        }
    }

    pub fn transient(id: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(id, pattern, FailureClass::Transient)
    }

    pub fn permanent(id: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(id, pattern, FailureClass::Permanent)
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    fn compile(&self) -> RunnerResult<Regex> {
        RegexBuilder::new(&self.pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| RunnerError::InvalidPattern {
                pattern: self.pattern.clone(),
                source,
            })
    }
}

/// Default rule list.
///
/// Permanent rules come first so that, for example, an invalid argument
/// named `lock_timeout` is not mistaken for lock contention.
pub fn standard_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::permanent(
            "invalid-configuration",
            r"invalid configuration|configuration is invalid|unsupported argument|unsupported block type|missing required argument|invalid value for",
        )
        .with_description("Configuration rejected by the tool"),
        ClassificationRule::permanent(
            "syntax-error",
            r"syntax error|invalid expression|invalid character|unterminated|argument or block definition required",
        )
        .with_description("HCL that does not parse"),
        ClassificationRule::permanent(
            "authentication",
            r"no valid credential|invalid ?credentials|access ?denied|unauthori[sz]ed|authentication failed|invalidclienttokenid|expiredtoken|signaturedoesnotmatch",
        )
        .with_description("Credentials missing, expired or rejected"),
        ClassificationRule::permanent(
            "invalid-argument",
            r"flag provided but not defined|invalid argument|too many command line arguments|unknown command",
        )
        .with_description("Bad command line"),
        ClassificationRule::permanent(
            "not-initialized",
            r#"please run "terraform init"|module not installed|required plugins are not installed|backend initialization required"#,
        )
        .with_description("Working directory needs init first"),
        ClassificationRule::transient(
            "state-lock",
            r"error acquiring the state lock|state lock|\block(ed|ing)?\b|conditionalcheckfailed",
        )
        .with_description("Another process holds the state lock"),
        ClassificationRule::transient(
            "timeout",
            r"timeout|timed out|deadline exceeded",
        )
        .with_description("Network or API timeout"),
        ClassificationRule::transient(
            "network",
            r"connection (reset|refused|closed)|no such host|network is unreachable|temporary failure in name resolution|unexpected eof|broken pipe|dial tcp",
        )
        .with_description("Connectivity problem"),
        ClassificationRule::transient(
            "rate-limit",
            r"rate ?limit|throttl|too many requests|\b429\b|request limit exceeded|slow ?down",
        )
        .with_description("Provider API throttling"),
        ClassificationRule::transient(
            "server-unavailable",
            r"\b50[234]\b|service unavailable|bad gateway|temporarily unavailable",
        )
        .with_description("Remote service temporarily down"),
        ClassificationRule::transient("try-again", r"try again|retry later|please wait")
            .with_description("Tool explicitly suggests retrying"),
    ]
}

/// Ordered, first-match-wins classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<(ClassificationRule, Regex)>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::standard()
    }
}

impl Classifier {
    /// Compile a rule list, failing on the first invalid pattern.
    pub fn new(rules: Vec<ClassificationRule>) -> RunnerResult<Self> {
        let compiled = rules
            .into_iter()
            .map(|rule| rule.compile().map(|regex| (rule, regex)))
            .collect::<RunnerResult<Vec<_>>>()?;
        Ok(Self { rules: compiled })
    }

    /// Classifier over [`standard_rules`].
    pub fn standard() -> Self {
        let rules = standard_rules()
            .into_iter()
            .filter_map(|rule| match rule.compile() {
                Ok(regex) => Some((rule, regex)),
                Err(e) => {
                    warn!("Skipping classification rule {}: {}", rule.id, e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Place extra rules ahead of the existing ones.
    pub fn with_rules(mut self, rules: Vec<ClassificationRule>) -> RunnerResult<Self> {
        let extra = Self::new(rules)?;
        let mut merged = extra.rules;
        merged.append(&mut self.rules);
        self.rules = merged;
        Ok(self)
    }

    pub fn rules(&self) -> impl Iterator<Item = &ClassificationRule> {
        self.rules.iter().map(|(rule, _)| rule)
    }

    /// First rule whose pattern occurs in `text`.
    pub fn matching_rule(&self, text: &str) -> Option<&ClassificationRule> {
        self.rules
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(rule, _)| rule)
    }

    pub fn classify_text(&self, text: &str) -> FailureClass {
        self.matching_rule(text)
            .map(|rule| rule.class)
            .unwrap_or(FailureClass::Permanent)
    }

    /// Rule that decides a failed attempt, matched over stderr then stdout.
    /// Timed-out attempts never consult the rules.
    pub fn rule_for(&self, result: &CommandResult) -> Option<&ClassificationRule> {
        if result.timed_out {
            return None;
        }
        self.matching_rule(&format!("{}\n{}", result.stderr, result.stdout))
    }

    /// Classify a failed attempt. Timeouts are reported as such before any
    /// text matching.
    pub fn classify(&self, result: &CommandResult) -> FailureClass {
        if result.timed_out {
            return FailureClass::Timeout;
        }
        self.rule_for(result)
            .map(|rule| rule.class)
            .unwrap_or(FailureClass::Permanent)
    }
}
