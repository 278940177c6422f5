use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use ledger_ingest::{ColumnRules, IngestOptions};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub artifacts_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub profile_path: Option<PathBuf>,
    pub as_of: Option<NaiveDate>,
    pub max_parallel_sheets: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("./artifacts"),
            reports_dir: PathBuf::from("./reports"),
            profile_path: None,
            as_of: None,
            max_parallel_sheets: 4,
        }
    }
}

impl ImportConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            artifacts_dir: std::env::var("LEDGER_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            reports_dir: std::env::var("LEDGER_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.reports_dir),
            profile_path: std::env::var("LEDGER_PROFILE").ok().map(PathBuf::from),
            as_of: std::env::var("LEDGER_AS_OF").ok().and_then(|v| {
                let parsed = NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok();
                if parsed.is_none() {
                    warn!(value = %v, "ignoring LEDGER_AS_OF, expected YYYY-MM-DD");
                }
                parsed
            }),
            max_parallel_sheets: std::env::var("LEDGER_MAX_PARALLEL_SHEETS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_parallel_sheets),
        }
    }

    pub fn as_of_or_today(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Per-team import settings kept next to the workbooks they describe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportProfile {
    pub name: Option<String>,
    /// Sheet names to import; empty means every sheet.
    pub include_sheets: Vec<String>,
    pub exclude_sheets: Vec<String>,
    /// Replaces the built-in column vocabulary when present.
    pub columns: Option<ColumnRules>,
}

impl ImportProfile {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing import profile")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading import profile {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Sheet names compare trimmed and case-insensitively; exclusion wins.
    pub fn accepts_sheet(&self, sheet: &str) -> bool {
        let matches = |names: &[String]| {
            names
                .iter()
                .any(|n| n.trim().eq_ignore_ascii_case(sheet.trim()))
        };
        if matches(&self.exclude_sheets) {
            return false;
        }
        self.include_sheets.is_empty() || matches(&self.include_sheets)
    }

    pub fn ingest_options(&self, as_of: NaiveDate) -> IngestOptions {
        let opts = IngestOptions::new(as_of);
        match &self.columns {
            Some(rules) => opts.with_rules(rules.clone()),
            None => opts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_filters_sheets() {
        let profile = ImportProfile::from_yaml_str(
            r#"
name: q1
include_sheets: ["Team A", "Team B"]
exclude_sheets: ["team b"]
"#,
        )
        .unwrap();
        assert!(profile.accepts_sheet("team a "));
        assert!(!profile.accepts_sheet("Team B"));
        assert!(!profile.accepts_sheet("Summary"));
        assert!(ImportProfile::default().accepts_sheet("Anything"));
    }

    #[test]
    fn profile_column_rules_replace_defaults() {
        let profile = ImportProfile::from_yaml_str(
            r#"
columns:
  rules:
    - field: candidateName
      primary:
        - all_of: ["applicant"]
"#,
        )
        .unwrap();
        let as_of = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let opts = profile.ingest_options(as_of);
        assert_eq!(opts.rules.rules.len(), 1);
        assert_eq!(opts.as_of, as_of);
        assert_eq!(
            ImportProfile::default().ingest_options(as_of).rules,
            ColumnRules::default()
        );
    }
}
