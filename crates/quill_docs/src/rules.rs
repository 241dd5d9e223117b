use anyhow::Result;
use quill_core::QuillError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::sheet::DataRow;
use crate::text::{clean_keyword, clean_text, strip_xml_invalid};

/// Bracket pairs kept in place by [`ReplaceScope::BracketContents`].
const BRACKET_PAIRS: [(char, char); 4] = [('【', '】'), ('（', '）'), ('(', ')'), ('〔', '〕')];

/// A keyword bound to the spreadsheet column that supplies its value.
///
/// Serialized as `{"keyword": "...", "excel_column": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementRule {
    pub keyword: String,
    #[serde(rename = "excel_column")]
    pub column: String,
}

impl ReplacementRule {
    pub fn new(keyword: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            column: column.into(),
        }
    }

    /// Parse a command-line rule of the form `KEYWORD=COLUMN`. The last `=`
    /// separates the two, so keywords may themselves contain `=`.
    pub fn parse_cli(spec: &str) -> Result<Self> {
        let Some((keyword, column)) = spec.rsplit_once('=') else {
            return Err(QuillError::InvalidRules(format!(
                "expected KEYWORD=COLUMN, got \"{spec}\""
            ))
            .into());
        };
        let rule = Self::new(keyword, column.trim());
        rule.validate()?;
        Ok(rule)
    }

    fn validate(&self) -> Result<()> {
        if clean_keyword(&self.keyword).is_empty() {
            return Err(QuillError::InvalidRules("keyword must not be empty".into()).into());
        }
        if self.column.trim().is_empty() {
            return Err(QuillError::InvalidRules(format!(
                "rule \"{}\" has no column",
                self.keyword
            ))
            .into());
        }
        Ok(())
    }
}

/// How much of a matched keyword is replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplaceScope {
    /// Replace the whole keyword.
    #[default]
    Full,
    /// Keep a surrounding bracket pair and replace only what is inside.
    #[serde(rename = "brackets")]
    BracketContents,
}

impl FromStr for ReplaceScope {
    type Err = QuillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "brackets" | "bracket" => Ok(Self::BracketContents),
            other => Err(QuillError::InvalidRules(format!(
                "unknown replace scope \"{other}\" (expected full or brackets)"
            ))),
        }
    }
}

impl fmt::Display for ReplaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::BracketContents => f.write_str("brackets"),
        }
    }
}

/// Outcome of adding a rule to a [`RuleSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Added,
    /// The keyword was already bound; the new column replaced the old one.
    Replaced { previous_column: String },
    /// Identical rule already present.
    Duplicate,
}

/// Ordered replacement rules plus the scope they are applied with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<ReplacementRule>,
    scope: ReplaceScope,
}

impl RuleSet {
    pub fn new(scope: ReplaceScope) -> Self {
        Self {
            rules: Vec::new(),
            scope,
        }
    }

    pub fn from_pairs<'a>(
        scope: ReplaceScope,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut set = Self::new(scope);
        for (keyword, column) in pairs {
            set.push(ReplacementRule::new(keyword, column))?;
        }
        Ok(set)
    }

    pub fn rules(&self) -> &[ReplacementRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn scope(&self) -> ReplaceScope {
        self.scope
    }

    /// Add a rule. A rule whose cleaned keyword is already bound replaces the
    /// earlier binding in place: the later rule wins.
    pub fn push(&mut self, rule: ReplacementRule) -> Result<PushOutcome> {
        rule.validate()?;
        let key = clean_keyword(&rule.keyword);
        match self
            .rules
            .iter_mut()
            .find(|existing| clean_keyword(&existing.keyword) == key)
        {
            Some(existing) if existing.column == rule.column => Ok(PushOutcome::Duplicate),
            Some(existing) => {
                warn!(
                    "Keyword \"{}\" rebound from column \"{}\" to \"{}\"",
                    rule.keyword, existing.column, rule.column
                );
                let previous_column = std::mem::replace(existing, rule).column;
                Ok(PushOutcome::Replaced { previous_column })
            }
            None => {
                self.rules.push(rule);
                Ok(PushOutcome::Added)
            }
        }
    }

    /// Merge rules from a JSON array of `{"keyword", "excel_column"}` objects.
    ///
    /// Entries that are not objects with both string fields are skipped.
    /// Returns the number of valid entries found.
    pub fn import_json(&mut self, json: &str) -> Result<usize> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| QuillError::InvalidRules(format!("invalid JSON: {e}")))?;
        let Some(entries) = value.as_array() else {
            return Err(QuillError::InvalidRules("expected a JSON array of rules".into()).into());
        };

        let mut valid = 0;
        for entry in entries {
            let (Some(keyword), Some(column)) = (
                entry.get("keyword").and_then(|v| v.as_str()),
                entry.get("excel_column").and_then(|v| v.as_str()),
            ) else {
                warn!("Skipping malformed rule entry: {entry}");
                continue;
            };
            match self.push(ReplacementRule::new(keyword, column)) {
                Ok(_) => valid += 1,
                Err(e) => warn!("Skipping rule entry: {e}"),
            }
        }
        Ok(valid)
    }

    /// Pretty JSON array; non-ASCII text is written as-is.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rules)?)
    }

    /// Columns referenced by the rules that `columns` does not contain,
    /// compared the way [`DataRow::get`] looks columns up.
    pub fn missing_columns<'a>(&'a self, columns: &[String]) -> Vec<&'a str> {
        let mut missing: Vec<&str> = Vec::new();
        for rule in &self.rules {
            let wanted = clean_text(&rule.column);
            let found = columns
                .iter()
                .any(|c| c == &rule.column || clean_text(c) == wanted);
            if !found && !missing.contains(&rule.column.as_str()) {
                missing.push(&rule.column);
            }
        }
        missing
    }

    /// Replacement value for every rule, in rule order, for one data row.
    pub fn values_for(&self, row: &DataRow<'_>) -> Result<Vec<String>> {
        self.rules
            .iter()
            .map(|rule| {
                let value = row.require(&rule.column)?;
                Ok(self.wrap_value(&rule.keyword, value))
            })
            .collect()
    }

    fn wrap_value(&self, keyword: &str, value: &str) -> String {
        let value = strip_xml_invalid(value);
        if self.scope == ReplaceScope::Full {
            return value.into_owned();
        }
        let cleaned = clean_keyword(keyword);
        match bracket_pair(&cleaned) {
            Some((open, close)) => format!("{open}{value}{close}"),
            None => value.into_owned(),
        }
    }
}

/// The bracket pair wrapping `keyword`, if any.
fn bracket_pair(keyword: &str) -> Option<(char, char)> {
    if keyword.chars().count() < 2 {
        return None;
    }
    BRACKET_PAIRS
        .iter()
        .copied()
        .find(|(open, close)| keyword.starts_with(*open) && keyword.ends_with(*close))
}
