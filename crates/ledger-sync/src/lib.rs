//! Batch import pipeline: archive workbooks, decode sheets, parse them in
//! parallel and write the run reports.

pub mod config;
pub mod decode;
pub mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::{ImportResult, RawSheet};
use ledger_ingest::{parse_sheet, IngestError, IngestOptions};
use ledger_storage::{ArchivedWorkbook, WorkbookArchive};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{ImportConfig, ImportProfile};
pub use decode::{decode_csv, decode_workbook, WorkbookFormat};
pub use report::{report_recent_markdown, ParquetManifest, ParquetManifestFile};

pub const CRATE_NAME: &str = "ledger-sync";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub as_of: NaiveDate,
    pub status: String,
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSheet {
    pub sheet: String,
    pub error: String,
}

/// Everything one workbook contributed to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookImport {
    pub source_path: String,
    pub archive: ArchivedWorkbook,
    pub sheets: Vec<ImportResult>,
    pub failed_sheets: Vec<FailedSheet>,
    /// Sheets the profile filtered out.
    pub skipped_sheets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workbooks: usize,
    pub sheets_parsed: usize,
    pub sheets_failed: usize,
    pub placements: usize,
    pub summaries: usize,
    pub diagnostics: usize,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

pub struct ImportPipeline {
    config: ImportConfig,
    profile: ImportProfile,
    archive: WorkbookArchive,
}

impl ImportPipeline {
    pub fn new(config: ImportConfig) -> Result<Self> {
        let profile = match &config.profile_path {
            Some(path) => ImportProfile::load(path)?,
            None => ImportProfile::default(),
        };
        let archive = WorkbookArchive::new(config.artifacts_dir.clone());
        Ok(Self {
            config,
            profile,
            archive,
        })
    }

    pub fn with_profile(mut self, profile: ImportProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Import every workbook, then write one report set for the whole batch.
    pub async fn import_paths(&self, paths: &[PathBuf]) -> Result<ImportRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let as_of = self.config.as_of_or_today();
        let opts = Arc::new(self.profile.ingest_options(as_of));
        let span = info_span!("import_run", %run_id, workbooks = paths.len());

        let workbooks = async {
            let mut workbooks = Vec::with_capacity(paths.len());
            for path in paths {
                workbooks.push(self.import_workbook(started_at, path, opts.clone()).await?);
            }
            Ok::<_, anyhow::Error>(workbooks)
        }
        .instrument(span)
        .await?;

        let finished_at = Utc::now();
        let sheets_failed = workbooks.iter().map(|w| w.failed_sheets.len()).sum::<usize>();
        let status = if sheets_failed == 0 {
            "completed"
        } else {
            "completed_with_failures"
        };
        let record = ImportRunRecord {
            run_id,
            started_at,
            finished_at,
            as_of,
            status: status.to_string(),
            profile: self.profile.name.clone(),
        };

        let reports_dir = report::write_reports(&self.config.reports_dir, &record, &workbooks).await?;
        let manifest_path = report::export_parquet_snapshots(&reports_dir, &workbooks).await?;

        let results = workbooks.iter().flat_map(|w| w.sheets.iter());
        let summary = ImportRunSummary {
            run_id,
            started_at,
            finished_at,
            workbooks: workbooks.len(),
            sheets_parsed: results.clone().count(),
            sheets_failed,
            placements: results.clone().map(|r| r.placements.len()).sum(),
            summaries: results.clone().map(|r| r.summaries.len()).sum(),
            diagnostics: results.map(|r| r.diagnostics.len()).sum(),
            reports_dir: reports_dir.display().to_string(),
            parquet_manifest: manifest_path.display().to_string(),
        };
        info!(
            %run_id,
            sheets = summary.sheets_parsed,
            failed = summary.sheets_failed,
            placements = summary.placements,
            "import run finished"
        );
        Ok(summary)
    }

    async fn import_workbook(
        &self,
        imported_at: DateTime<Utc>,
        path: &Path,
        opts: Arc<IngestOptions>,
    ) -> Result<WorkbookImport> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading workbook {}", path.display()))?;
        let source_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("workbook");
        let archive = self
            .archive
            .store_workbook(source_name, imported_at, &bytes)
            .await
            .with_context(|| format!("archiving {}", path.display()))?;

        let decode_path = path.to_path_buf();
        let sheets = tokio::task::spawn_blocking(move || decode_workbook(&decode_path))
            .await
            .context("workbook decode task panicked")??;

        let (sheets, skipped_sheets): (Vec<RawSheet>, Vec<RawSheet>) = sheets
            .into_iter()
            .partition(|s| self.profile.accepts_sheet(&s.name));
        info!(
            workbook = %path.display(),
            sheets = sheets.len(),
            skipped = skipped_sheets.len(),
            deduplicated = archive.deduplicated,
            "decoded workbook"
        );

        let (parsed, failed_sheets) = self.parse_sheets(sheets, opts).await?;
        Ok(WorkbookImport {
            source_path: path.display().to_string(),
            archive,
            sheets: parsed,
            failed_sheets,
            skipped_sheets: skipped_sheets.into_iter().map(|s| s.name).collect(),
        })
    }

    /// Parse sheets on the blocking pool, bounded by `max_parallel_sheets`.
    /// Results come back in workbook order.
    async fn parse_sheets(
        &self,
        sheets: Vec<RawSheet>,
        opts: Arc<IngestOptions>,
    ) -> Result<(Vec<ImportResult>, Vec<FailedSheet>)> {
        let limit = Arc::new(Semaphore::new(self.config.max_parallel_sheets.max(1)));
        let mut tasks = JoinSet::new();
        for (position, sheet) in sheets.into_iter().enumerate() {
            let limit = limit.clone();
            let opts = opts.clone();
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await.context("parse limiter closed")?;
                let name = sheet.name.clone();
                let outcome = tokio::task::spawn_blocking(move || parse_sheet(&sheet, &opts))
                    .await
                    .with_context(|| format!("parse task for sheet `{name}` panicked"))?;
                Ok::<_, anyhow::Error>((position, name, outcome))
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.context("sheet task failed to join")??);
        }
        outcomes.sort_by_key(|(position, _, _)| *position);

        let mut parsed = Vec::new();
        let mut failed = Vec::new();
        for (_, name, outcome) in outcomes {
            match outcome {
                Ok(result) => parsed.push(result),
                Err(err) => {
                    warn!(sheet = %name, error = %err, "sheet skipped");
                    failed.push(FailedSheet {
                        sheet: name,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok((parsed, failed))
    }
}

pub async fn import_from_env(paths: &[PathBuf]) -> Result<ImportRunSummary> {
    let pipeline = ImportPipeline::new(ImportConfig::from_env())?;
    pipeline.import_paths(paths).await
}

pub type SheetOutcome = (String, Result<ImportResult, IngestError>);

/// Parse one decoded workbook without archiving or reports.
pub fn inspect_workbook(
    path: &Path,
    profile: &ImportProfile,
    as_of: NaiveDate,
) -> Result<Vec<SheetOutcome>> {
    let opts = profile.ingest_options(as_of);
    Ok(decode_workbook(path)?
        .into_iter()
        .filter(|s| profile.accepts_sheet(&s.name))
        .map(|s| {
            let outcome = parse_sheet(&s, &opts);
            (s.name, outcome)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BLOCK_CSV: &str = "\
Team,Recruiter Name
,Asha Rao
Recruiter Name,Candidate Name,Client,DOJ,Revenue (USD),Billing Status
,John Doe,Acme,2024-01-10,\"$50,000\",Completed
,Jane Roe,Globex,2024-05-01,1200,Pending
,,,,,
Team,Recruiter Name
,Ravi Kumar
Recruiter Name,Candidate Name,Client,DOJ,Revenue (USD),Billing Status
,Sam Poe,Initech,2024-02-01,4000,Done
";

    fn config(root: &Path) -> ImportConfig {
        ImportConfig {
            artifacts_dir: root.join("artifacts"),
            reports_dir: root.join("reports"),
            profile_path: None,
            as_of: NaiveDate::from_ymd_opt(2024, 6, 1),
            max_parallel_sheets: 2,
        }
    }

    #[tokio::test]
    async fn csv_batch_produces_reports_and_archive() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("q1-team.csv");
        std::fs::write(&input, BLOCK_CSV).expect("write csv");
        let notes = dir.path().join("notes.csv");
        std::fs::write(&notes, "Remarks\nnothing to see\n").expect("write csv");

        let pipeline = ImportPipeline::new(config(dir.path())).expect("pipeline");
        let summary = pipeline
            .import_paths(&[input.clone(), notes])
            .await
            .expect("import");

        assert_eq!(summary.workbooks, 2);
        assert_eq!(summary.sheets_parsed, 1);
        assert_eq!(summary.sheets_failed, 1);
        assert_eq!(summary.placements, 3);
        assert_eq!(summary.diagnostics, 0);

        let reports_dir = PathBuf::from(&summary.reports_dir);
        assert!(reports_dir.join("import_brief.md").exists());
        assert!(reports_dir.join("import_delta.json").exists());
        for name in ["placements", "summaries", "diagnostics"] {
            assert!(reports_dir.join("snapshots").join(format!("{name}.parquet")).exists());
        }

        let manifest: ParquetManifest = serde_json::from_str(
            &std::fs::read_to_string(&summary.parquet_manifest).expect("manifest"),
        )
        .expect("manifest json");
        assert_eq!(manifest.files.len(), 3);
        assert_eq!(manifest.files[0].rows, 3);
        assert!(manifest.files.iter().all(|f| f.sha256.len() == 64));

        let brief = std::fs::read_to_string(reports_dir.join("import_brief.md")).expect("brief");
        assert!(brief.contains("## Failed Sheets"));
        assert!(brief.contains("notes"));
        assert!(brief.contains("$55,200.00"));

        let digest = report_recent_markdown(5, &dir.path().join("reports")).expect("digest");
        assert!(digest.contains(&summary.run_id.to_string()));
        assert!(digest.contains("- placements: 3"));
        assert!(digest.contains("- sheets failed: 1"));

        let archived = dir.path().join("artifacts");
        assert!(std::fs::read_dir(&archived).expect("archive root").next().is_some());
    }

    #[tokio::test]
    async fn profile_excludes_sheets_before_parsing() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("sheets.json");
        let book = serde_json::json!([
            {"name": "Team A", "rows": [["Recruiter Name", "Candidate Name"], ["Asha Rao", "John Doe"]]},
            {"name": "Archive", "rows": [["Recruiter Name", "Candidate Name"], ["Ravi Kumar", "Old Deal"]]}
        ]);
        std::fs::write(&input, serde_json::to_vec(&book).expect("json")).expect("write json");

        let profile = ImportProfile {
            name: Some("team-a".into()),
            exclude_sheets: vec!["archive".into()],
            ..Default::default()
        };
        let pipeline = ImportPipeline::new(config(dir.path()))
            .expect("pipeline")
            .with_profile(profile);
        let summary = pipeline.import_paths(&[input]).await.expect("import");
        assert_eq!(summary.sheets_parsed, 1);
        assert_eq!(summary.placements, 1);

        let delta: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(PathBuf::from(&summary.reports_dir).join("import_delta.json"))
                .expect("delta"),
        )
        .expect("delta json");
        assert_eq!(delta["import_run"]["profile"], "team-a");
        assert_eq!(delta["workbooks"][0]["skipped_sheets"][0], "Archive");
    }

    #[test]
    fn inspect_reports_each_sheet_outcome() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("team.csv");
        std::fs::write(&input, BLOCK_CSV).expect("write csv");
        let outcomes = inspect_workbook(
            &input,
            &ImportProfile::default(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
        .expect("inspect");
        assert_eq!(outcomes.len(), 1);
        let (name, result) = &outcomes[0];
        assert_eq!(name, "team");
        let result = result.as_ref().expect("parsed");
        assert_eq!(result.header_row, 2);
        assert_eq!(result.placements[2].recruiter_identity, "Ravi Kumar");
    }
}
