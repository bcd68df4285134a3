//! Shared-package rules.
//!
//! A shared package is provided by the host at load time and must never end
//! up in the plugin's private dependency tree. The rule set is composed from
//! include and exclude matchers; a name is shared when some include rule
//! matches it and no exclude rule does.

use anyhow::{Context, Result};
use regex::Regex;

/// Matcher over package names.
#[derive(Debug, Clone)]
pub enum NameMatcher {
    /// Exact name equality.
    Literal(String),
    /// Compiled regular expression.
    Pattern(Regex),
}

impl NameMatcher {
    /// Whether the matcher accepts `name`.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Literal(literal) => literal == name,
            NameMatcher::Pattern(re) => re.is_match(name),
        }
    }
}

/// Ordered include/exclude rules over package names.
#[derive(Debug, Clone)]
pub struct SharedPackagesRules {
    include: Vec<NameMatcher>,
    exclude: Vec<NameMatcher>,
}

/// The host framework scope shared by default.
const DEFAULT_INCLUDE_PATTERN: &str = r"@backstage/";

impl SharedPackagesRules {
    /// The default rule set: every package in the host framework scope.
    pub fn host_default() -> Self {
        SharedPackagesRules {
            include: vec![NameMatcher::Pattern(
                Regex::new(DEFAULT_INCLUDE_PATTERN).expect("default include pattern is valid"),
            )],
            exclude: Vec::new(),
        }
    }

    /// Build rules from raw CLI values.
    ///
    /// A leading `!` turns the entry into an exclude rule; a value wrapped in
    /// `/.../` compiles to a regular expression. The `/.../` convention exists
    /// only here; matchers themselves are tagged and never sniff strings.
    /// When no include entries are given, the host default include applies.
    pub fn from_cli_values(values: &[String]) -> Result<Self> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for value in values {
            let (target, raw) = match value.strip_prefix('!') {
                Some(rest) => (&mut exclude, rest),
                None => (&mut include, value.as_str()),
            };
            target.push(parse_matcher(raw)?);
        }

        if include.is_empty() {
            include = SharedPackagesRules::host_default().include;
        }

        Ok(SharedPackagesRules { include, exclude })
    }

    /// Whether `name` is shared under these rules.
    pub fn is_shared(&self, name: &str) -> bool {
        self.include.iter().any(|m| m.matches(name))
            && !self.exclude.iter().any(|m| m.matches(name))
    }
}

impl Default for SharedPackagesRules {
    fn default() -> Self {
        Self::host_default()
    }
}

fn parse_matcher(raw: &str) -> Result<NameMatcher> {
    if raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/') {
        let pattern = &raw[1..raw.len() - 1];
        let re = Regex::new(pattern)
            .with_context(|| format!("invalid shared-package pattern: {}", raw))?;
        return Ok(NameMatcher::Pattern(re));
    }
    Ok(NameMatcher::Literal(raw.to_string()))
}
