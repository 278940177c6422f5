//! Header row detection.
//!
//! Exports drift between teams ("Candidate" vs "Candidate Name", "Lead" vs
//! "Lead Name"), so detection works on normalized tokens and tolerates a cell
//! that is a leading-word abbreviation of the expected token.

use ledger_core::{CellValue, RawSheet};
use serde::Serialize;

use crate::IngestError;

const CANDIDATE_TOKENS: &[&str] = &["candidate name"];
const IDENTITY_TOKENS: &[&str] = &["recruiter name", "lead name", "l2 name"];

/// Lowercase, drop everything but alphanumerics and spaces, collapse whitespace.
pub fn normalize_header(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_cell(cell: &CellValue) -> String {
    cell.text().map(|t| normalize_header(&t)).unwrap_or_default()
}

pub fn normalize_row(row: &[CellValue]) -> Vec<String> {
    row.iter().map(normalize_cell).collect()
}

/// A normalized cell matches a token when it contains the token, or when its
/// words are the leading words of the token ("lead" matches "lead name").
pub fn token_matches(cell: &str, token: &str) -> bool {
    if cell.is_empty() {
        return false;
    }
    if cell.contains(token) {
        return true;
    }
    let cell_words = cell.split(' ').collect::<Vec<_>>();
    let token_words = token.split(' ').collect::<Vec<_>>();
    cell_words.len() < token_words.len() && token_words.starts_with(&cell_words)
}

fn any_token(cells: &[String], tokens: &[&str]) -> bool {
    cells
        .iter()
        .any(|cell| tokens.iter().any(|token| token_matches(cell, token)))
}

/// Whether a row declares placement columns: a candidate token plus a
/// recruiter or lead token.
pub fn is_header_row(row: &[CellValue]) -> bool {
    let cells = normalize_row(row);
    any_token(&cells, CANDIDATE_TOKENS) && any_token(&cells, IDENTITY_TOKENS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderLocation {
    pub row_index: usize,
    pub tokens: Vec<String>,
}

/// First row of the sheet that declares column names.
pub fn locate_header(sheet: &RawSheet) -> Result<HeaderLocation, IngestError> {
    sheet
        .rows
        .iter()
        .position(|row| is_header_row(row))
        .map(|row_index| HeaderLocation {
            row_index,
            tokens: normalize_row(&sheet.rows[row_index]),
        })
        .ok_or_else(|| IngestError::HeaderNotFound {
            sheet: sheet.name.clone(),
            rows_scanned: sheet.row_count(),
        })
}
