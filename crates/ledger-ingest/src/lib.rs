//! Tabular ledger ingestion: raw sheet rows in, normalized placement and
//! summary records out.
//!
//! The engine is synchronous and owns no state between calls, so sheets can be
//! parsed in parallel by the caller.

pub mod aggregate;
pub mod classify;
pub mod columns;
pub mod header;
pub mod machine;
pub mod normalize;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use ledger_core::{ImportResult, RawSheet};
use thiserror::Error;
use tracing::debug_span;

pub use aggregate::Aggregator;
pub use columns::{map_columns, map_header_row, ColumnRule, ColumnRules, HeaderMap, Matcher, SheetField};
pub use header::{locate_header, normalize_header, HeaderLocation};
pub use machine::{step, BlockContext, BlockKind, BlockState, RowOutcome};

pub const CRATE_NAME: &str = "ledger-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no header row with candidate and recruiter/lead columns in sheet `{sheet}` ({rows_scanned} rows scanned)")]
    HeaderNotFound { sheet: String, rows_scanned: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub rules: ColumnRules,
    /// Reference date for tenure when a placement has no quit date.
    pub as_of: NaiveDate,
}

impl IngestOptions {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            rules: ColumnRules::default(),
            as_of,
        }
    }

    pub fn with_rules(mut self, rules: ColumnRules) -> Self {
        self.rules = rules;
        self
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::new(Utc::now().date_naive())
    }
}

/// Parse one sheet. Only a missing header aborts; every row-level problem is
/// reported as a diagnostic in the result.
pub fn parse_sheet(sheet: &RawSheet, opts: &IngestOptions) -> Result<ImportResult, IngestError> {
    let header = locate_header(sheet)?;
    let span = debug_span!("parse_sheet", sheet = %sheet.name, header_row = header.row_index);
    let _guard = span.enter();

    let mut aggregator = Aggregator::new(&sheet.name, header.row_index);
    let mut ctx = BlockContext::default();
    for (row_index, row) in sheet.rows.iter().enumerate() {
        let (next, outcome) = step(ctx, row_index, row, opts);
        ctx = next;
        aggregator.push(outcome);
    }
    Ok(aggregator.finish(sheet.row_count()))
}

/// Load a sheet stored as JSON (`{"name": .., "rows": [[..], ..]}`).
pub fn load_sheet_json(path: impl AsRef<Path>) -> Result<RawSheet> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{BillingStatus, CellValue, DiagnosticReason, IdentitySource, SheetDate};

    fn row(cells: &[&str]) -> Vec<CellValue> {
        cells.iter().map(|c| CellValue::from(*c)).collect()
    }

    fn opts() -> IngestOptions {
        IngestOptions::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    #[test]
    fn scenario_a_identity_line_feeds_placement() {
        let sheet = RawSheet::new(
            "A",
            vec![
                row(&["Team", "Recruiter Name"]),
                vec![CellValue::Empty, "Asha Rao".into()],
                row(&["Recruiter Name", "Candidate Name", "DOJ", "Client", "Revenue (USD)", "Billing Status"]),
                row(&["", "John Doe", "2024-01-10", "Acme", "50000", "Completed"]),
            ],
        );
        let result = parse_sheet(&sheet, &opts()).unwrap();
        assert_eq!(result.header_row, 2);
        assert_eq!(result.placements.len(), 1);
        assert!(result.diagnostics.is_empty());
        let p = &result.placements[0];
        assert_eq!(p.recruiter_identity, "Asha Rao");
        assert_eq!(p.identity_source, IdentitySource::Propagated);
        assert_eq!(p.candidate_name, "John Doe");
        assert_eq!(p.client_name.as_deref(), Some("Acme"));
        assert_eq!(p.billing_status, BillingStatus::Billed);
        assert_eq!(p.revenue, 50000.0);
        assert_eq!(
            p.join_date,
            SheetDate::Date(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap())
        );
        assert_eq!(p.period_targets, None);
    }

    #[test]
    fn scenario_b_code_only_row_is_summary() {
        let sheet = RawSheet::new(
            "B",
            vec![
                row(&["VB Code", "Recruiter Name", "Candidate Name", "Yearly Placement Target"]),
                row(&["VB002", "", "", "10"]),
            ],
        );
        let result = parse_sheet(&sheet, &opts()).unwrap();
        assert!(result.placements.is_empty());
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.summaries.len(), 1);
        assert_eq!(result.summaries[0].subject_identity, "VB002");
        assert_eq!(result.summaries[0].yearly_placement_target, Some(10.0));
    }

    #[test]
    fn scenario_c_explicit_no_is_recomputed() {
        let sheet = RawSheet::new(
            "C",
            vec![
                row(&["Recruiter Name", "Candidate Name", "Days Completed", "Billing Status", "Qualifier"]),
                row(&["Asha Rao", "John Doe", "95", "Done", "No"]),
            ],
        );
        let result = parse_sheet(&sheet, &opts()).unwrap();
        let p = &result.placements[0];
        assert_eq!(p.days_completed, Some(95));
        assert_eq!(p.explicit_qualifier.as_deref(), Some("No"));
        assert!(p.qualifier);
    }

    #[test]
    fn scenario_d_unresolvable_identity_is_a_diagnostic() {
        let sheet = RawSheet::new(
            "D",
            vec![
                row(&["Recruiter Name", "Candidate Name", "Client"]),
                row(&["", "John Doe", "Acme"]),
            ],
        );
        let result = parse_sheet(&sheet, &opts()).unwrap();
        assert!(result.placements.is_empty());
        assert!(result.summaries.is_empty());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].reason, DiagnosticReason::MissingIdentity);
        assert_eq!(result.diagnostics[0].row_index, 1);
        assert_eq!(result.counts.skipped, 1);
    }

    #[test]
    fn identity_propagates_until_next_sentinel() {
        let sheet = RawSheet::new(
            "flat",
            vec![
                row(&["Recruiter Name", "Candidate Name", "Client"]),
                row(&["Asha Rao", "C1", "Acme"]),
                row(&["", "C2", "Acme"]),
                row(&["", "C3", "Globex"]),
                row(&["", "", ""]),
                row(&["", "C4", "Initech"]),
                row(&["Team", "Recruiter Name"]),
                row(&["", "Ravi Kumar"]),
                row(&["Recruiter Name", "Candidate Name", "Client"]),
                row(&["", "C5", "Acme"]),
            ],
        );
        let result = parse_sheet(&sheet, &opts()).unwrap();
        let identities = result
            .placements
            .iter()
            .map(|p| (p.candidate_name.as_str(), p.recruiter_identity.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            identities,
            vec![
                ("C1", "Asha Rao"),
                ("C2", "Asha Rao"),
                ("C3", "Asha Rao"),
                ("C4", "Asha Rao"),
                ("C5", "Ravi Kumar"),
            ]
        );
    }

    #[test]
    fn sheet_without_header_fails_whole() {
        let sheet = RawSheet::new("notes", vec![row(&["Team", "Recruiter Name"])]);
        assert!(matches!(
            parse_sheet(&sheet, &opts()),
            Err(IngestError::HeaderNotFound { .. })
        ));
    }

    #[test]
    fn block_without_candidate_column_is_skipped_but_parse_continues() {
        let rules = ColumnRules::from_yaml_str(
            r#"
rules:
  - field: candidateName
    primary:
      - equals: "candidate name"
  - field: recruiterName
    primary:
      - all_of: ["recruiter name"]
"#,
        )
        .unwrap();
        let opts = opts().with_rules(rules);
        let sheet = RawSheet::new(
            "mixed",
            vec![
                row(&["Team", "Recruiter Name"]),
                row(&["", "Asha Rao"]),
                row(&["Recruiter Name", "Candidate Name (Full)"]),
                row(&["", "John Doe"]),
                row(&["", "Jane Roe"]),
                row(&["Team", "Recruiter Name"]),
                row(&["", "Ravi Kumar"]),
                row(&["Recruiter Name", "Candidate Name"]),
                row(&["", "Sam Poe"]),
            ],
        );
        let result = parse_sheet(&sheet, &opts).unwrap();
        let reasons = result.diagnostics.iter().map(|d| d.reason).collect::<Vec<_>>();
        assert_eq!(
            reasons,
            vec![
                DiagnosticReason::MissingCandidateColumn,
                DiagnosticReason::BlockUnparseable,
                DiagnosticReason::BlockUnparseable,
            ]
        );
        assert_eq!(result.placements.len(), 1);
        assert_eq!(result.placements[0].recruiter_identity, "Ravi Kumar");
        assert_eq!(result.counts.skipped, 2);
    }

    #[test]
    fn json_sheets_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.json");
        fs::write(&path, r#"{"name":"S","rows":[["Recruiter Name","Candidate Name"],[null,"X"]]}"#).unwrap();
        let sheet = load_sheet_json(&path).unwrap();
        assert_eq!(sheet.name, "S");
        assert_eq!(sheet.cell(1, 0), &CellValue::Empty);
    }
}
