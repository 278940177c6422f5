//! Block state machine.
//!
//! Sheets repeat a structure per person:
//!
//! ```text
//! Team | Recruiter Name | ...          <- sentinel, declares identity column
//!      | Asha Rao       | ...          <- identity line
//! Recruiter Name | Candidate Name | ...<- placement table header
//!      | John Doe       | ...          <- placements and summary rows
//! ```
//!
//! The context is threaded through [`step`] by value; nothing outlives one
//! parse call.

use ledger_core::{CellValue, Diagnostic, DiagnosticReason, PeriodTargets};
use serde::Serialize;
use tracing::{debug, warn};

use crate::classify::{classify_row, excerpt, RowClass};
use crate::columns::{closest_token, map_columns, map_header_row, HeaderMap, SheetField};
use crate::header::{is_header_row, normalize_cell, normalize_row, token_matches};
use crate::normalize::parse_optional_amount;
use crate::IngestOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockKind {
    Recruiter,
    L2,
}

/// Target columns declared on an L2 sentinel row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetColumns {
    pub placement: Option<usize>,
    pub revenue: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementTable {
    Mapped(HeaderMap),
    /// Header lacked a candidate column; every row of the block is skipped.
    Unparseable,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum BlockState {
    #[default]
    Scanning,
    ExpectRecruiterInfo {
        identity_col: usize,
    },
    ExpectL2Info {
        identity_col: usize,
        targets: TargetColumns,
    },
    ExpectPlacementHeader,
    ReadingPlacements(PlacementTable),
}

impl BlockState {
    pub fn name(&self) -> &'static str {
        match self {
            BlockState::Scanning => "SCANNING",
            BlockState::ExpectRecruiterInfo { .. } => "EXPECT_RECRUITER_INFO",
            BlockState::ExpectL2Info { .. } => "EXPECT_L2_INFO",
            BlockState::ExpectPlacementHeader => "EXPECT_PLACEMENT_HEADER",
            BlockState::ReadingPlacements(_) => "READING_PLACEMENTS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockContext {
    pub state: BlockState,
    pub identity: Option<String>,
    pub block_kind: Option<BlockKind>,
    /// Identity from an L2 info line; survives explicit recruiter cells in the table.
    pub lead_identity: Option<String>,
    pub period_targets: Option<PeriodTargets>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Sentinel, identity line or table header consumed by a transition.
    Structure(Option<Diagnostic>),
    /// Row outside a placement table that triggered nothing.
    Scaffolding,
    Classified(RowClass),
}

#[derive(Debug, Clone, PartialEq)]
enum Sentinel {
    Recruiter { identity_col: usize },
    L2 { identity_col: usize, targets: TargetColumns },
    Undeclared,
}

#[derive(Debug, Clone, PartialEq)]
enum RowShape {
    Sentinel(Sentinel),
    PlacementHeader,
    Other,
}

const L2_TOKENS: &[&str] = &["l2 name", "lead name"];
const RECRUITER_TOKENS: &[&str] = &["recruiter name", "vb code"];

fn find_declared(tokens: &[String], needles: &[&str]) -> Option<usize> {
    tokens
        .iter()
        .skip(1)
        .position(|t| needles.iter().any(|n| token_matches(t, n)))
        .map(|i| i + 1)
}

fn shape_of(row: &[CellValue], opts: &IngestOptions) -> RowShape {
    let tokens = normalize_row(row);
    if is_sentinel(row) {
        let l2_col = find_declared(&tokens, L2_TOKENS);
        let recruiter_col = find_declared(&tokens, RECRUITER_TOKENS);
        // the leftmost declared identity column decides the block kind
        return RowShape::Sentinel(match (l2_col, recruiter_col) {
            (Some(l2), Some(recruiter)) if recruiter < l2 => Sentinel::Recruiter {
                identity_col: recruiter,
            },
            (Some(identity_col), _) => {
                let declared = map_columns(&tokens, &opts.rules);
                Sentinel::L2 {
                    identity_col,
                    targets: TargetColumns {
                        placement: declared.get(SheetField::YearlyPlacementTarget),
                        revenue: declared.get(SheetField::YearlyRevenueTarget),
                    },
                }
            }
            (None, Some(identity_col)) => Sentinel::Recruiter { identity_col },
            (None, None) => Sentinel::Undeclared,
        });
    }
    let exact_pair = tokens.first().map(String::as_str) == Some("recruiter name")
        && tokens.get(1).map(String::as_str) == Some("candidate name");
    if exact_pair || is_header_row(row) {
        return RowShape::PlacementHeader;
    }
    RowShape::Other
}

fn open_table(row_index: usize, row: &[CellValue], opts: &IngestOptions) -> (PlacementTable, Option<Diagnostic>) {
    let columns = map_header_row(row, &opts.rules);
    if columns.contains(SheetField::CandidateName) {
        return (PlacementTable::Mapped(columns), None);
    }
    let tokens = normalize_row(row);
    let hint = closest_token(&tokens, "candidate name")
        .map(|(token, score)| format!(" (closest header `{token}`, similarity {score:.2})"))
        .unwrap_or_default();
    warn!(row_index, "placement header has no candidate column{hint}");
    (
        PlacementTable::Unparseable,
        Some(Diagnostic {
            row_index,
            reason: DiagnosticReason::MissingCandidateColumn,
            raw_excerpt: format!("{}{hint}", excerpt(row)),
        }),
    )
}

fn identity_at(row: &[CellValue], col: usize) -> Option<String> {
    row.get(col).and_then(CellValue::text)
}

fn target_at(row: &[CellValue], col: Option<usize>) -> Option<f64> {
    col.and_then(|c| row.get(c))
        .and_then(parse_optional_amount)
}

/// Advance the machine by one row.
pub fn step(
    mut ctx: BlockContext,
    row_index: usize,
    row: &[CellValue],
    opts: &IngestOptions,
) -> (BlockContext, RowOutcome) {
    let shape = shape_of(row, opts);
    let from = ctx.state.name();

    let outcome = match (std::mem::take(&mut ctx.state), shape) {
        (state, RowShape::Sentinel(Sentinel::Undeclared)) => {
            ctx.state = state;
            RowOutcome::Structure(Some(Diagnostic {
                row_index,
                reason: DiagnosticReason::SentinelWithoutIdentityColumn,
                raw_excerpt: excerpt(row),
            }))
        }
        (_, RowShape::Sentinel(Sentinel::Recruiter { identity_col })) => {
            ctx.period_targets = None;
            ctx.state = BlockState::ExpectRecruiterInfo { identity_col };
            RowOutcome::Structure(None)
        }
        (_, RowShape::Sentinel(Sentinel::L2 {
            identity_col,
            targets,
        })) => {
            ctx.state = BlockState::ExpectL2Info {
                identity_col,
                targets,
            };
            RowOutcome::Structure(None)
        }
        (BlockState::ReadingPlacements(_), RowShape::PlacementHeader) => {
            let (table, diagnostic) = open_table(row_index, row, opts);
            ctx.state = BlockState::ReadingPlacements(table);
            match diagnostic {
                Some(d) => RowOutcome::Structure(Some(d)),
                None => RowOutcome::Classified(RowClass::HeaderEcho),
            }
        }
        (BlockState::ReadingPlacements(PlacementTable::Mapped(columns)), RowShape::Other) => {
            let classification = classify_row(row_index, row, &columns, &ctx, opts);
            if let Some(identity) = classification.adopted_identity {
                ctx.identity = Some(identity);
            }
            ctx.state = BlockState::ReadingPlacements(PlacementTable::Mapped(columns));
            RowOutcome::Classified(classification.class)
        }
        (BlockState::ReadingPlacements(PlacementTable::Unparseable), RowShape::Other) => {
            ctx.state = BlockState::ReadingPlacements(PlacementTable::Unparseable);
            if row.iter().all(CellValue::is_blank) {
                RowOutcome::Classified(RowClass::Blank)
            } else {
                RowOutcome::Classified(RowClass::Skipped(Diagnostic {
                    row_index,
                    reason: DiagnosticReason::BlockUnparseable,
                    raw_excerpt: excerpt(row),
                }))
            }
        }
        (
            BlockState::ExpectRecruiterInfo { .. } | BlockState::ExpectL2Info { .. },
            RowShape::PlacementHeader,
        ) => {
            let (table, diagnostic) = open_table(row_index, row, opts);
            ctx.state = BlockState::ReadingPlacements(table);
            RowOutcome::Structure(diagnostic.or_else(|| {
                Some(Diagnostic {
                    row_index,
                    reason: DiagnosticReason::BlockIdentityMissing,
                    raw_excerpt: excerpt(row),
                })
            }))
        }
        (BlockState::Scanning | BlockState::ExpectPlacementHeader, RowShape::PlacementHeader) => {
            let (table, diagnostic) = open_table(row_index, row, opts);
            ctx.state = BlockState::ReadingPlacements(table);
            RowOutcome::Structure(diagnostic)
        }
        (BlockState::ExpectRecruiterInfo { identity_col }, RowShape::Other) => {
            match identity_at(row, identity_col) {
                Some(identity) => {
                    ctx.identity = Some(identity);
                    ctx.block_kind = Some(BlockKind::Recruiter);
                    ctx.lead_identity = None;
                    ctx.state = BlockState::ExpectPlacementHeader;
                    RowOutcome::Structure(None)
                }
                None => {
                    ctx.state = BlockState::ExpectRecruiterInfo { identity_col };
                    RowOutcome::Scaffolding
                }
            }
        }
        (
            BlockState::ExpectL2Info {
                identity_col,
                targets,
            },
            RowShape::Other,
        ) => match identity_at(row, identity_col) {
            Some(identity) => {
                let captured = PeriodTargets {
                    yearly_placement_target: target_at(row, targets.placement),
                    yearly_revenue_target: target_at(row, targets.revenue),
                };
                ctx.lead_identity = Some(identity.clone());
                ctx.identity = Some(identity);
                ctx.block_kind = Some(BlockKind::L2);
                ctx.period_targets = (!captured.is_empty()).then_some(captured);
                ctx.state = BlockState::ExpectPlacementHeader;
                RowOutcome::Structure(None)
            }
            None => {
                ctx.state = BlockState::ExpectL2Info {
                    identity_col,
                    targets,
                };
                RowOutcome::Scaffolding
            }
        },
        (state @ (BlockState::Scanning | BlockState::ExpectPlacementHeader), RowShape::Other) => {
            ctx.state = state;
            RowOutcome::Scaffolding
        }
    };

    if ctx.state.name() != from {
        debug!(row_index, from, to = ctx.state.name(), "block state transition");
    }
    if let RowOutcome::Structure(Some(d)) | RowOutcome::Classified(RowClass::Skipped(d)) = &outcome {
        debug!(row_index, reason = d.reason.code(), "row diagnostic");
    }

    (ctx, outcome)
}

/// Whether a normalized first cell marks a block sentinel.
pub fn is_sentinel(row: &[CellValue]) -> bool {
    row.first().map(normalize_cell).as_deref() == Some("team")
}
