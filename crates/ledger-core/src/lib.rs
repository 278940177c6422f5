//! Core data model for placement ledger imports.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ledger-core";

/// Namespace for deterministic placement ids. Stable across releases.
const PLACEMENT_NAMESPACE: Uuid = Uuid::from_u128(0x5d1c_44a0_8f0e_4bb3_9a55_1f0c_2c7e_a9d1);

/// One raw cell exactly as decoded from the workbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    #[default]
    Empty,
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// Trimmed textual rendering; `None` for blank cells.
    pub fn text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            CellValue::Number(n) => Some(render_number(*n)),
        }
    }
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Empty)
    }
}

static EMPTY_CELL: CellValue = CellValue::Empty;

/// The full grid of one worksheet, uninterpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawSheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cell lookup that treats ragged rows as padded with empty cells.
    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }
}

/// Outcome of date normalization. `NotApplicable` is an explicit "NA" in the
/// sheet and is kept apart from cells that could not be read at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SheetDate {
    Date(NaiveDate),
    NotApplicable,
    Missing,
    Invalid,
}

impl SheetDate {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            SheetDate::Date(d) => Some(*d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    Pending,
    Billed,
    Cancelled,
    Hold,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Pending => "PENDING",
            BillingStatus::Billed => "BILLED",
            BillingStatus::Cancelled => "CANCELLED",
            BillingStatus::Hold => "HOLD",
        }
    }
}

/// Yearly targets declared on an L2 info line; attached to every record of the block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PeriodTargets {
    pub yearly_placement_target: Option<f64>,
    pub yearly_revenue_target: Option<f64>,
}

impl PeriodTargets {
    pub fn is_empty(&self) -> bool {
        self.yearly_placement_target.is_none() && self.yearly_revenue_target.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// Taken from the row's own recruiter cell.
    Explicit,
    /// Carried forward from an earlier identity-bearing row of the block.
    Propagated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub record_id: Uuid,
    pub row_index: usize,
    pub candidate_name: String,
    pub recruiter_identity: String,
    pub identity_source: IdentitySource,
    pub lead_identity: Option<String>,
    pub client_name: Option<String>,
    pub join_date: SheetDate,
    pub quit_date: SheetDate,
    pub invoice_date: SheetDate,
    pub days_completed: Option<i64>,
    pub revenue: f64,
    pub total_revenue: Option<f64>,
    pub revenue_as_lead: Option<f64>,
    pub billing_status: BillingStatus,
    pub placement_type: Option<String>,
    pub incentive_amount_inr: f64,
    pub incentive_paid: bool,
    pub explicit_qualifier: Option<String>,
    pub qualifier: bool,
    pub period_targets: Option<PeriodTargets>,
}

impl PlacementRecord {
    /// Key a downstream store upserts on: person, candidate, client.
    pub fn upsert_key(&self) -> (String, String, String) {
        (
            self.recruiter_identity.clone(),
            self.candidate_name.clone(),
            self.client_name.clone().unwrap_or_default(),
        )
    }
}

/// Deterministic id over the upsert key, case and whitespace insensitive.
pub fn placement_record_id(identity: &str, candidate: &str, client: Option<&str>) -> Uuid {
    let key = format!(
        "{}\u{1f}{}\u{1f}{}",
        fold_key(identity),
        fold_key(candidate),
        fold_key(client.unwrap_or_default())
    );
    Uuid::new_v5(&PLACEMENT_NAMESPACE, key.as_bytes())
}

fn fold_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub row_index: usize,
    pub subject_identity: String,
    pub subject_code: Option<String>,
    pub subject_name: Option<String>,
    pub yearly_placement_target: Option<f64>,
    pub yearly_revenue_target: Option<f64>,
    pub placements_achieved: Option<f64>,
    pub revenue_achieved: Option<f64>,
    pub placement_achievement_pct: Option<f64>,
    pub revenue_achievement_pct: Option<f64>,
    pub slab_qualified: Option<String>,
    pub total_incentive_inr: Option<f64>,
    pub total_incentive_paid_inr: Option<f64>,
    pub period_targets: Option<PeriodTargets>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticReason {
    /// Placement row with no own identity and nothing propagated.
    MissingIdentity,
    /// A (re)declared header lacks a candidate-name column.
    MissingCandidateColumn,
    /// Row belongs to a block whose header could not be used.
    BlockUnparseable,
    /// Placement header reached before the block's identity line.
    BlockIdentityMissing,
    /// "Team" row that declares neither a recruiter nor an L2 column.
    SentinelWithoutIdentityColumn,
}

impl DiagnosticReason {
    pub fn code(&self) -> &'static str {
        match self {
            DiagnosticReason::MissingIdentity => "MissingIdentity",
            DiagnosticReason::MissingCandidateColumn => "MissingCandidateColumn",
            DiagnosticReason::BlockUnparseable => "BlockUnparseable",
            DiagnosticReason::BlockIdentityMissing => "BlockIdentityMissing",
            DiagnosticReason::SentinelWithoutIdentityColumn => "SentinelWithoutIdentityColumn",
        }
    }

    /// Whether the row carrying this diagnostic was dropped from the output.
    pub fn skips_row(&self) -> bool {
        matches!(
            self,
            DiagnosticReason::MissingIdentity | DiagnosticReason::BlockUnparseable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub row_index: usize,
    pub reason: DiagnosticReason,
    pub raw_excerpt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImportCounts {
    pub rows_scanned: usize,
    pub placements: usize,
    pub summaries: usize,
    pub skipped: usize,
}

/// Everything one sheet parse produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImportResult {
    pub sheet_name: String,
    pub header_row: usize,
    pub placements: Vec<PlacementRecord>,
    pub summaries: Vec<SummaryRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub counts: ImportCounts,
}

impl ImportResult {
    pub fn diagnostics_with(&self, reason: DiagnosticReason) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.reason == reason)
    }
}
