//! Row classification inside a placement table.

use ledger_core::{
    placement_record_id, CellValue, Diagnostic, DiagnosticReason, IdentitySource, PlacementRecord,
    SummaryRecord,
};

use crate::columns::{HeaderMap, SheetField};
use crate::header::normalize_cell;
use crate::machine::{BlockContext, BlockKind};
use crate::normalize::{
    days_completed, derive_qualifier, normalize_billing_status, parse_currency,
    parse_optional_amount, parse_percent, parse_sheet_date, parse_flag,
};
use crate::IngestOptions;

const EXCERPT_LIMIT: usize = 120;

#[derive(Debug, Clone, PartialEq)]
pub enum RowClass {
    /// Header repeated inside the data.
    HeaderEcho,
    Summary(SummaryRecord),
    Placement(PlacementRecord),
    Skipped(Diagnostic),
    /// Blank or unrecognized; dropped silently.
    Blank,
}

/// Classification plus the identity the row asserts for the rest of the block.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class: RowClass,
    pub adopted_identity: Option<String>,
}

impl Classification {
    fn only(class: RowClass) -> Self {
        Self {
            class,
            adopted_identity: None,
        }
    }
}

/// Non-blank cells joined for diagnostics, truncated.
pub fn excerpt(row: &[CellValue]) -> String {
    let joined = row
        .iter()
        .filter_map(CellValue::text)
        .collect::<Vec<_>>()
        .join(" | ");
    if joined.chars().count() <= EXCERPT_LIMIT {
        joined
    } else {
        let mut cut = joined.chars().take(EXCERPT_LIMIT).collect::<String>();
        cut.push('…');
        cut
    }
}

struct RowView<'a> {
    row: &'a [CellValue],
    columns: &'a HeaderMap,
}

impl<'a> RowView<'a> {
    fn cell(&self, field: SheetField) -> &'a CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.columns
            .get(field)
            .and_then(|idx| self.row.get(idx))
            .unwrap_or(&EMPTY)
    }

    fn text(&self, field: SheetField) -> Option<String> {
        self.cell(field).text()
    }

    fn amount(&self, field: SheetField) -> Option<f64> {
        if !self.columns.contains(field) {
            return None;
        }
        parse_optional_amount(self.cell(field))
    }

    fn has_identity_cell(&self) -> bool {
        [SheetField::VbCode, SheetField::RecruiterName, SheetField::LeadName]
            .into_iter()
            .any(|f| self.text(f).is_some())
    }

    /// Recruiter name, else VB code, else lead name.
    fn own_identity(&self) -> Option<String> {
        self.text(SheetField::RecruiterName)
            .or_else(|| self.text(SheetField::VbCode))
            .or_else(|| self.text(SheetField::LeadName))
    }
}

pub fn classify_row(
    row_index: usize,
    row: &[CellValue],
    columns: &HeaderMap,
    ctx: &BlockContext,
    opts: &IngestOptions,
) -> Classification {
    let view = RowView { row, columns };
    let candidate = view.cell(SheetField::CandidateName);

    if normalize_cell(candidate) == "candidate name" {
        return Classification::only(RowClass::HeaderEcho);
    }

    if candidate.is_blank() {
        if view.has_identity_cell() {
            return Classification::only(RowClass::Summary(build_summary(row_index, &view, ctx)));
        }
        return Classification::only(RowClass::Blank);
    }

    let (identity, source) = match view.own_identity() {
        Some(own) => (own, IdentitySource::Explicit),
        None => match &ctx.identity {
            Some(carried) => (carried.clone(), IdentitySource::Propagated),
            None => {
                return Classification::only(RowClass::Skipped(Diagnostic {
                    row_index,
                    reason: DiagnosticReason::MissingIdentity,
                    raw_excerpt: excerpt(row),
                }))
            }
        },
    };

    let adopted_identity = (source == IdentitySource::Explicit).then(|| identity.clone());
    let record = build_placement(row_index, &view, ctx, opts, identity, source);
    Classification {
        class: RowClass::Placement(record),
        adopted_identity,
    }
}

fn build_placement(
    row_index: usize,
    view: &RowView<'_>,
    ctx: &BlockContext,
    opts: &IngestOptions,
    recruiter_identity: String,
    identity_source: IdentitySource,
) -> PlacementRecord {
    let candidate_name = view.text(SheetField::CandidateName).unwrap_or_default();
    let client_name = view.text(SheetField::ClientName);
    let lead_identity = view.text(SheetField::LeadName).or_else(|| {
        (ctx.block_kind == Some(BlockKind::L2))
            .then(|| ctx.lead_identity.clone())
            .flatten()
    });

    let join_date = parse_sheet_date(view.cell(SheetField::JoinDate));
    let quit_date = parse_sheet_date(view.cell(SheetField::QuitDate));
    let invoice_date = parse_sheet_date(view.cell(SheetField::InvoiceDate));
    let days = days_completed(
        view.cell(SheetField::DaysCompleted),
        join_date,
        quit_date,
        opts.as_of,
    );
    let billing_status = normalize_billing_status(view.cell(SheetField::BillingStatus));
    let explicit_qualifier = view.text(SheetField::Qualifier);
    let qualifier = derive_qualifier(explicit_qualifier.as_deref(), days, billing_status);

    PlacementRecord {
        record_id: placement_record_id(&recruiter_identity, &candidate_name, client_name.as_deref()),
        row_index,
        candidate_name,
        recruiter_identity,
        identity_source,
        lead_identity,
        client_name,
        join_date,
        quit_date,
        invoice_date,
        days_completed: days,
        revenue: parse_currency(view.cell(SheetField::Revenue)),
        total_revenue: view.amount(SheetField::TotalRevenue),
        revenue_as_lead: view.amount(SheetField::RevenueAsLead),
        billing_status,
        placement_type: view.text(SheetField::PlacementType),
        incentive_amount_inr: parse_currency(view.cell(SheetField::IncentiveAmountInr)),
        incentive_paid: parse_flag(view.cell(SheetField::IncentivePaid)),
        explicit_qualifier,
        qualifier,
        period_targets: ctx.period_targets,
    }
}

fn build_summary(row_index: usize, view: &RowView<'_>, ctx: &BlockContext) -> SummaryRecord {
    let subject_code = view.text(SheetField::VbCode);
    let recruiter_is_code = view.columns.get(SheetField::RecruiterName).is_some()
        && view.columns.get(SheetField::RecruiterName) == view.columns.get(SheetField::VbCode);
    let subject_name = if recruiter_is_code {
        None
    } else {
        view.text(SheetField::RecruiterName)
    }
    .or_else(|| view.text(SheetField::LeadName));
    let subject_identity = subject_code
        .clone()
        .or_else(|| subject_name.clone())
        .unwrap_or_default();

    SummaryRecord {
        row_index,
        subject_identity,
        subject_code,
        subject_name,
        yearly_placement_target: view.amount(SheetField::YearlyPlacementTarget),
        yearly_revenue_target: view.amount(SheetField::YearlyRevenueTarget),
        placements_achieved: view.amount(SheetField::PlacementsAchieved),
        revenue_achieved: view
            .amount(SheetField::RevenueAchieved)
            .or_else(|| view.amount(SheetField::TotalRevenue)),
        placement_achievement_pct: view
            .columns
            .contains(SheetField::PlacementAchievementPct)
            .then(|| parse_percent(view.cell(SheetField::PlacementAchievementPct)))
            .flatten(),
        revenue_achievement_pct: view
            .columns
            .contains(SheetField::RevenueAchievementPct)
            .then(|| parse_percent(view.cell(SheetField::RevenueAchievementPct)))
            .flatten(),
        slab_qualified: view.text(SheetField::SlabQualified),
        total_incentive_inr: view.amount(SheetField::TotalIncentiveInr),
        total_incentive_paid_inr: view.amount(SheetField::TotalIncentivePaidInr),
        period_targets: ctx.period_targets,
    }
}
