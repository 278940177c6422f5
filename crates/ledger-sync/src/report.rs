//! Run reports: markdown brief, JSON delta, parquet snapshots and their manifest.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use ledger_core::{ImportResult, SheetDate};
use ledger_ingest::normalize::format_currency;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::{ImportRunRecord, WorkbookImport};

pub const BRIEF_FILE: &str = "import_brief.md";
pub const DELTA_FILE: &str = "import_delta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
}

/// One sheet result with the workbook it came from.
struct SheetRef<'a> {
    workbook: &'a str,
    result: &'a ImportResult,
}

fn sheet_refs(workbooks: &[WorkbookImport]) -> Vec<SheetRef<'_>> {
    workbooks
        .iter()
        .flat_map(|w| {
            w.sheets.iter().map(move |result| SheetRef {
                workbook: w.source_path.as_str(),
                result,
            })
        })
        .collect()
}

pub async fn write_reports(
    reports_root: &Path,
    record: &ImportRunRecord,
    workbooks: &[WorkbookImport],
) -> Result<PathBuf> {
    let reports_dir = reports_root.join(record.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    fs::write(reports_dir.join(BRIEF_FILE), render_brief(record, workbooks))
        .await
        .with_context(|| format!("writing {BRIEF_FILE}"))?;

    let delta_json = serde_json::to_vec_pretty(&serde_json::json!({
        "import_run": record,
        "workbooks": workbooks,
    }))
    .context("serializing import delta")?;
    fs::write(reports_dir.join(DELTA_FILE), delta_json)
        .await
        .with_context(|| format!("writing {DELTA_FILE}"))?;

    Ok(reports_dir)
}

pub fn render_brief(record: &ImportRunRecord, workbooks: &[WorkbookImport]) -> String {
    let sheets = sheet_refs(workbooks);
    let mut reasons: BTreeMap<&'static str, usize> = BTreeMap::new();
    for sheet in &sheets {
        for d in &sheet.result.diagnostics {
            *reasons.entry(d.reason.code()).or_default() += 1;
        }
    }
    let revenue: f64 = sheets
        .iter()
        .flat_map(|s| s.result.placements.iter())
        .map(|p| p.revenue)
        .sum();
    let qualified = sheets
        .iter()
        .flat_map(|s| s.result.placements.iter())
        .filter(|p| p.qualifier)
        .count();

    let mut out = vec![
        "# Placement Import Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", record.run_id),
        format!("- Started: {}", record.started_at),
        format!("- Finished: {}", record.finished_at),
        format!("- As of: {}", record.as_of),
        format!("- Status: {}", record.status),
    ];
    if let Some(profile) = &record.profile {
        out.push(format!("- Profile: {profile}"));
    }
    out.push(format!("- Workbooks: {}", workbooks.len()));
    out.push(format!("- Revenue parsed: {}", format_currency(revenue)));
    out.push(format!("- Qualified placements: {qualified}"));
    out.push(String::new());

    out.push("## Sheets".to_string());
    out.push(String::new());
    out.push("| Workbook | Sheet | Header row | Rows | Placements | Summaries | Skipped |".to_string());
    out.push("|---|---|---|---|---|---|---|".to_string());
    for sheet in &sheets {
        let c = &sheet.result.counts;
        out.push(format!(
            "| {} | {} | {} | {} | {} | {} | {} |",
            sheet.workbook,
            sheet.result.sheet_name,
            sheet.result.header_row + 1,
            c.rows_scanned,
            c.placements,
            c.summaries,
            c.skipped
        ));
    }
    out.push(String::new());

    if !reasons.is_empty() {
        out.push("## Diagnostics".to_string());
        for (code, count) in &reasons {
            out.push(format!("- {code}: {count}"));
        }
        out.push(String::new());
    }

    let failed = workbooks
        .iter()
        .flat_map(|w| w.failed_sheets.iter().map(move |f| (w, f)))
        .collect::<Vec<_>>();
    if !failed.is_empty() {
        out.push("## Failed Sheets".to_string());
        for (w, f) in failed {
            out.push(format!("- {} / {}: {}", w.source_path, f.sheet, f.error));
        }
        out.push(String::new());
    }

    out.join("\n")
}

pub async fn export_parquet_snapshots(
    reports_dir: &Path,
    workbooks: &[WorkbookImport],
) -> Result<PathBuf> {
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let sheets = sheet_refs(workbooks);
    let placements_path = snapshot_dir.join("placements.parquet");
    let summaries_path = snapshot_dir.join("summaries.parquet");
    let diagnostics_path = snapshot_dir.join("diagnostics.parquet");

    let placement_rows = write_placements_parquet(&placements_path, &sheets)?;
    let summary_rows = write_summaries_parquet(&summaries_path, &sheets)?;
    let diagnostic_rows = write_diagnostics_parquet(&diagnostics_path, &sheets)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("placements", reports_dir, &placements_path, placement_rows)?,
            manifest_entry("summaries", reports_dir, &summaries_path, summary_rows)?,
            manifest_entry("diagnostics", reports_dir, &diagnostics_path, diagnostic_rows)?,
        ],
    };

    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<usize> {
    let rows = batch.num_rows();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(rows)
}

fn date_text(date: SheetDate) -> Option<String> {
    match date {
        SheetDate::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        SheetDate::NotApplicable => Some("NA".to_string()),
        SheetDate::Invalid => Some("invalid".to_string()),
        SheetDate::Missing => None,
    }
}

fn strings<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<_>>()))
}

fn owned_strings(values: impl Iterator<Item = Option<String>>) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<_>>()))
}

fn floats(values: impl Iterator<Item = Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values.collect::<Vec<_>>()))
}

fn row_indices(values: impl Iterator<Item = usize>) -> ArrayRef {
    Arc::new(UInt32Array::from(
        values.map(|i| i as u32).collect::<Vec<_>>(),
    ))
}

fn write_placements_parquet(path: &Path, sheets: &[SheetRef<'_>]) -> Result<usize> {
    let rows = sheets
        .iter()
        .flat_map(|s| s.result.placements.iter().map(move |p| (s, p)))
        .collect::<Vec<_>>();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("workbook", DataType::Utf8, false),
        ArrowField::new("sheet", DataType::Utf8, false),
        ArrowField::new("row_index", DataType::UInt32, false),
        ArrowField::new("record_id", DataType::Utf8, false),
        ArrowField::new("candidate_name", DataType::Utf8, false),
        ArrowField::new("recruiter_identity", DataType::Utf8, false),
        ArrowField::new("identity_source", DataType::Utf8, false),
        ArrowField::new("lead_identity", DataType::Utf8, true),
        ArrowField::new("client_name", DataType::Utf8, true),
        ArrowField::new("join_date", DataType::Utf8, true),
        ArrowField::new("quit_date", DataType::Utf8, true),
        ArrowField::new("invoice_date", DataType::Utf8, true),
        ArrowField::new("days_completed", DataType::Int64, true),
        ArrowField::new("revenue", DataType::Float64, false),
        ArrowField::new("total_revenue", DataType::Float64, true),
        ArrowField::new("revenue_as_lead", DataType::Float64, true),
        ArrowField::new("billing_status", DataType::Utf8, false),
        ArrowField::new("placement_type", DataType::Utf8, true),
        ArrowField::new("incentive_amount_inr", DataType::Float64, false),
        ArrowField::new("incentive_paid", DataType::Boolean, false),
        ArrowField::new("qualifier", DataType::Boolean, false),
        ArrowField::new("yearly_placement_target", DataType::Float64, true),
        ArrowField::new("yearly_revenue_target", DataType::Float64, true),
    ]));

    let columns: Vec<ArrayRef> = vec![
        strings(rows.iter().map(|(s, _)| Some(s.workbook))),
        strings(rows.iter().map(|(s, _)| Some(s.result.sheet_name.as_str()))),
        row_indices(rows.iter().map(|(_, p)| p.row_index)),
        owned_strings(rows.iter().map(|(_, p)| Some(p.record_id.to_string()))),
        strings(rows.iter().map(|(_, p)| Some(p.candidate_name.as_str()))),
        strings(rows.iter().map(|(_, p)| Some(p.recruiter_identity.as_str()))),
        owned_strings(
            rows.iter()
                .map(|(_, p)| Some(format!("{:?}", p.identity_source).to_lowercase())),
        ),
        strings(rows.iter().map(|(_, p)| p.lead_identity.as_deref())),
        strings(rows.iter().map(|(_, p)| p.client_name.as_deref())),
        owned_strings(rows.iter().map(|(_, p)| date_text(p.join_date))),
        owned_strings(rows.iter().map(|(_, p)| date_text(p.quit_date))),
        owned_strings(rows.iter().map(|(_, p)| date_text(p.invoice_date))),
        Arc::new(Int64Array::from(
            rows.iter().map(|(_, p)| p.days_completed).collect::<Vec<_>>(),
        )),
        floats(rows.iter().map(|(_, p)| Some(p.revenue))),
        floats(rows.iter().map(|(_, p)| p.total_revenue)),
        floats(rows.iter().map(|(_, p)| p.revenue_as_lead)),
        strings(rows.iter().map(|(_, p)| Some(p.billing_status.as_str()))),
        strings(rows.iter().map(|(_, p)| p.placement_type.as_deref())),
        floats(rows.iter().map(|(_, p)| Some(p.incentive_amount_inr))),
        Arc::new(BooleanArray::from(
            rows.iter().map(|(_, p)| p.incentive_paid).collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(
            rows.iter().map(|(_, p)| p.qualifier).collect::<Vec<_>>(),
        )),
        floats(rows.iter().map(|(_, p)| {
            p.period_targets.and_then(|t| t.yearly_placement_target)
        })),
        floats(rows.iter().map(|(_, p)| {
            p.period_targets.and_then(|t| t.yearly_revenue_target)
        })),
    ];

    let batch =
        RecordBatch::try_new(schema, columns).context("building placements record batch")?;
    write_parquet(path, batch)
}

fn write_summaries_parquet(path: &Path, sheets: &[SheetRef<'_>]) -> Result<usize> {
    let rows = sheets
        .iter()
        .flat_map(|s| s.result.summaries.iter().map(move |r| (s, r)))
        .collect::<Vec<_>>();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("workbook", DataType::Utf8, false),
        ArrowField::new("sheet", DataType::Utf8, false),
        ArrowField::new("row_index", DataType::UInt32, false),
        ArrowField::new("subject_identity", DataType::Utf8, false),
        ArrowField::new("subject_code", DataType::Utf8, true),
        ArrowField::new("subject_name", DataType::Utf8, true),
        ArrowField::new("yearly_placement_target", DataType::Float64, true),
        ArrowField::new("yearly_revenue_target", DataType::Float64, true),
        ArrowField::new("placements_achieved", DataType::Float64, true),
        ArrowField::new("revenue_achieved", DataType::Float64, true),
        ArrowField::new("placement_achievement_pct", DataType::Float64, true),
        ArrowField::new("revenue_achievement_pct", DataType::Float64, true),
        ArrowField::new("slab_qualified", DataType::Utf8, true),
        ArrowField::new("total_incentive_inr", DataType::Float64, true),
        ArrowField::new("total_incentive_paid_inr", DataType::Float64, true),
    ]));

    let columns: Vec<ArrayRef> = vec![
        strings(rows.iter().map(|(s, _)| Some(s.workbook))),
        strings(rows.iter().map(|(s, _)| Some(s.result.sheet_name.as_str()))),
        row_indices(rows.iter().map(|(_, r)| r.row_index)),
        strings(rows.iter().map(|(_, r)| Some(r.subject_identity.as_str()))),
        strings(rows.iter().map(|(_, r)| r.subject_code.as_deref())),
        strings(rows.iter().map(|(_, r)| r.subject_name.as_deref())),
        floats(rows.iter().map(|(_, r)| r.yearly_placement_target)),
        floats(rows.iter().map(|(_, r)| r.yearly_revenue_target)),
        floats(rows.iter().map(|(_, r)| r.placements_achieved)),
        floats(rows.iter().map(|(_, r)| r.revenue_achieved)),
        floats(rows.iter().map(|(_, r)| r.placement_achievement_pct)),
        floats(rows.iter().map(|(_, r)| r.revenue_achievement_pct)),
        strings(rows.iter().map(|(_, r)| r.slab_qualified.as_deref())),
        floats(rows.iter().map(|(_, r)| r.total_incentive_inr)),
        floats(rows.iter().map(|(_, r)| r.total_incentive_paid_inr)),
    ];

    let batch =
        RecordBatch::try_new(schema, columns).context("building summaries record batch")?;
    write_parquet(path, batch)
}

fn write_diagnostics_parquet(path: &Path, sheets: &[SheetRef<'_>]) -> Result<usize> {
    let rows = sheets
        .iter()
        .flat_map(|s| s.result.diagnostics.iter().map(move |d| (s, d)))
        .collect::<Vec<_>>();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("workbook", DataType::Utf8, false),
        ArrowField::new("sheet", DataType::Utf8, false),
        ArrowField::new("row_index", DataType::UInt32, false),
        ArrowField::new("reason", DataType::Utf8, false),
        ArrowField::new("raw_excerpt", DataType::Utf8, false),
    ]));

    let columns: Vec<ArrayRef> = vec![
        strings(rows.iter().map(|(s, _)| Some(s.workbook))),
        strings(rows.iter().map(|(s, _)| Some(s.result.sheet_name.as_str()))),
        row_indices(rows.iter().map(|(_, d)| d.row_index)),
        strings(rows.iter().map(|(_, d)| Some(d.reason.code()))),
        strings(rows.iter().map(|(_, d)| Some(d.raw_excerpt.as_str()))),
    ];

    let batch =
        RecordBatch::try_new(schema, columns).context("building diagnostics record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path, rows: usize) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
        rows,
    })
}

/// Markdown digest of the most recent `runs` import runs under `reports_root`.
pub fn report_recent_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter(|entry| entry.path().join(DELTA_FILE).exists())
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();
    let dirs = dirs.into_iter().take(runs.max(1)).collect::<Vec<_>>();

    let mut lines = vec!["# Recent Placement Imports".to_string(), String::new()];
    for dir in dirs {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let delta_path = dir.path().join(DELTA_FILE);
        let brief_path = dir.path().join(BRIEF_FILE);
        let manifest_path = dir.path().join("snapshots").join("manifest.json");

        let delta: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&delta_path)
                .with_context(|| format!("reading {}", delta_path.display()))?,
        )
        .with_context(|| format!("parsing {}", delta_path.display()))?;

        let workbooks = delta
            .get("workbooks")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let sheets = workbooks
            .iter()
            .filter_map(|w| w.get("sheets").and_then(|s| s.as_array()))
            .flatten()
            .collect::<Vec<_>>();
        let count = |field: &str| {
            sheets
                .iter()
                .filter_map(|s| s.get("counts").and_then(|c| c.get(field)).and_then(|v| v.as_u64()))
                .sum::<u64>()
        };
        let failed = workbooks
            .iter()
            .filter_map(|w| w.get("failed_sheets").and_then(|f| f.as_array()))
            .map(|f| f.len())
            .sum::<usize>();
        let started = delta
            .get("import_run")
            .and_then(|r| r.get("started_at"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- started: {started}"));
        lines.push(format!("- workbooks: {}", workbooks.len()));
        lines.push(format!("- sheets parsed: {}", sheets.len()));
        lines.push(format!("- sheets failed: {failed}"));
        lines.push(format!("- placements: {}", count("placements")));
        lines.push(format!("- summaries: {}", count("summaries")));
        lines.push(format!("- skipped rows: {}", count("skipped")));
        lines.push(format!("- delta: `{}`", delta_path.display()));
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        if brief_path.exists() {
            lines.push(format!("- brief: `{}`", brief_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}
