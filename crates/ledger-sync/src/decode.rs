//! Workbook decoding: file on disk to uninterpreted [`RawSheet`] grids.

use std::path::Path;

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use ledger_core::{CellValue, RawSheet};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookFormat {
    /// xlsx, xlsm, xlsb, xls, ods; handled by calamine.
    Spreadsheet,
    Csv,
    /// Sheets already captured as JSON grids.
    Json,
}

impl WorkbookFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonWorkbook {
    Many(Vec<RawSheet>),
    One(RawSheet),
}

/// Decode every sheet of a workbook, keeping absolute row and column positions.
pub fn decode_workbook(path: &Path) -> Result<Vec<RawSheet>> {
    let Some(format) = WorkbookFormat::from_path(path) else {
        bail!("unsupported workbook type: {}", path.display());
    };
    match format {
        WorkbookFormat::Spreadsheet => decode_spreadsheet(path),
        WorkbookFormat::Csv => {
            let bytes =
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("sheet");
            Ok(vec![decode_csv(name, &bytes)?])
        }
        WorkbookFormat::Json => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            decode_json(&text).with_context(|| format!("parsing {}", path.display()))
        }
    }
}

fn decode_spreadsheet(path: &Path) -> Result<Vec<RawSheet>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("opening workbook {}", path.display()))?;
    let names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook
            .worksheet_range(&name)
            .with_context(|| format!("reading sheet `{name}` of {}", path.display()))?;
        // range iterators are relative to the first used cell
        let (row0, col0) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        let mut rows = vec![Vec::new(); row0];
        for row in range.rows() {
            let mut cells = vec![CellValue::Empty; col0];
            cells.extend(row.iter().map(convert_cell));
            rows.push(cells);
        }
        sheets.push(RawSheet::new(name, rows));
    }
    Ok(sheets)
}

fn convert_cell(value: &Data) -> CellValue {
    match value {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::Int(v) => CellValue::Number(*v as f64),
        Data::Float(v) => CellValue::Number(*v),
        Data::String(v) => CellValue::Text(v.clone()),
        Data::Bool(v) => CellValue::Text(if *v { "TRUE" } else { "FALSE" }.to_string()),
        Data::DateTime(v) => CellValue::Number(v.as_f64()),
        Data::DateTimeIso(v) | Data::DurationIso(v) => CellValue::Text(v.clone()),
    }
}

/// CSV exports carry no header guarantees, so every line is kept as a row.
pub fn decode_csv(name: &str, bytes: &[u8]) -> Result<RawSheet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading csv `{name}` line {}", line + 1))?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(RawSheet::new(name, rows))
}

pub fn decode_json(text: &str) -> Result<Vec<RawSheet>> {
    let workbook: JsonWorkbook = serde_json::from_str(text).context("decoding sheet json")?;
    Ok(match workbook {
        JsonWorkbook::Many(sheets) => sheets,
        JsonWorkbook::One(sheet) => vec![sheet],
    })
}
