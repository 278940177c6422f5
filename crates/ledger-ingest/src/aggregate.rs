//! Collects row outcomes into an [`ImportResult`].

use ledger_core::{Diagnostic, ImportCounts, ImportResult};
use tracing::warn;

use crate::classify::RowClass;
use crate::machine::RowOutcome;

#[derive(Debug, Default)]
pub struct Aggregator {
    result: ImportResult,
}

impl Aggregator {
    pub fn new(sheet_name: &str, header_row: usize) -> Self {
        Self {
            result: ImportResult {
                sheet_name: sheet_name.to_string(),
                header_row,
                ..Default::default()
            },
        }
    }

    pub fn push(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Structure(Some(diagnostic)) => self.note(diagnostic),
            RowOutcome::Structure(None) | RowOutcome::Scaffolding => {}
            RowOutcome::Classified(class) => match class {
                RowClass::Placement(record) => self.result.placements.push(record),
                RowClass::Summary(record) => self.result.summaries.push(record),
                RowClass::Skipped(diagnostic) => self.note(diagnostic),
                RowClass::HeaderEcho | RowClass::Blank => {}
            },
        }
    }

    fn note(&mut self, diagnostic: Diagnostic) {
        if diagnostic.reason.skips_row() {
            self.result.counts.skipped += 1;
        }
        self.result.diagnostics.push(diagnostic);
    }

    pub fn finish(mut self, rows_scanned: usize) -> ImportResult {
        self.result.counts = ImportCounts {
            rows_scanned,
            placements: self.result.placements.len(),
            summaries: self.result.summaries.len(),
            skipped: self.result.counts.skipped,
        };
        if !self.result.diagnostics.is_empty() {
            warn!(
                sheet = %self.result.sheet_name,
                diagnostics = self.result.diagnostics.len(),
                skipped = self.result.counts.skipped,
                "sheet parsed with diagnostics"
            );
        }
        self.result
    }
}
