use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use ledger_core::ImportResult;
use ledger_sync::{ImportConfig, ImportPipeline, ImportProfile};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ledger-cli")]
#[command(about = "Placement ledger importer command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Archive and parse workbooks, then write the run reports.
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// YAML import profile; overrides LEDGER_PROFILE.
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Tenure reference date (YYYY-MM-DD); overrides LEDGER_AS_OF.
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Parse one workbook and print what each sheet yields. Writes nothing.
    Inspect {
        path: PathBuf,
        #[arg(long)]
        profile: Option<PathBuf>,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// List every diagnostic instead of a count.
        #[arg(long)]
        diagnostics: bool,
    },
    /// Summarize the most recent import runs.
    Report {
        #[arg(long, default_value_t = 1)]
        runs: usize,
        #[arg(long)]
        reports_dir: Option<PathBuf>,
    },
}

fn init_tracing() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();
}

fn load_profile(path: Option<&PathBuf>) -> Result<ImportProfile> {
    match path {
        Some(p) => ImportProfile::load(p),
        None => Ok(ImportProfile::default()),
    }
}

fn print_sheet(result: &ImportResult, diagnostics: bool) {
    let c = &result.counts;
    println!(
        "sheet `{}`: header_row={} rows={} placements={} summaries={} skipped={} diagnostics={}",
        result.sheet_name,
        result.header_row,
        c.rows_scanned,
        c.placements,
        c.summaries,
        c.skipped,
        result.diagnostics.len()
    );
    if diagnostics {
        for d in &result.diagnostics {
            println!("  row {:>5} {:<30} {}", d.row_index, d.reason.code(), d.raw_excerpt);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Import {
            paths,
            profile,
            as_of,
            json,
        } => {
            let mut config = ImportConfig::from_env();
            if profile.is_some() {
                config.profile_path = profile;
            }
            if as_of.is_some() {
                config.as_of = as_of;
            }
            let summary = ImportPipeline::new(config)?.import_paths(&paths).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary).context("serializing run summary")?
                );
            } else {
                println!(
                    "import complete: run_id={} workbooks={} sheets={} failed={} placements={} summaries={} diagnostics={} reports={}",
                    summary.run_id,
                    summary.workbooks,
                    summary.sheets_parsed,
                    summary.sheets_failed,
                    summary.placements,
                    summary.summaries,
                    summary.diagnostics,
                    summary.reports_dir
                );
            }
        }
        Commands::Inspect {
            path,
            profile,
            as_of,
            diagnostics,
        } => {
            let config = ImportConfig::from_env();
            let profile = load_profile(profile.as_ref().or(config.profile_path.as_ref()))?;
            let as_of = as_of.unwrap_or_else(|| config.as_of_or_today());
            for (name, outcome) in ledger_sync::inspect_workbook(&path, &profile, as_of)? {
                match outcome {
                    Ok(result) => print_sheet(&result, diagnostics),
                    Err(err) => println!("sheet `{name}`: skipped ({err})"),
                }
            }
        }
        Commands::Report { runs, reports_dir } => {
            let root = reports_dir.unwrap_or_else(|| ImportConfig::from_env().reports_dir);
            println!("{}", ledger_sync::report_recent_markdown(runs, &root)?);
        }
    }

    Ok(())
}
