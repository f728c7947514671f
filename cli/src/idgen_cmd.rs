//! Identifier pool administration
//!
//! Every subcommand works on one identifier database, chosen either by
//! service name (`--service`, resolved through the booster config) or by
//! path (`--db`). Without either, the `id_gen` service is used.
//!
//! ## Commands
//!
//! - `rbutils id-gen load PROJECT FILE` - Add fresh identifiers (one per line)
//! - `rbutils id-gen import PROJECT FILE` - Seed an empty pool from an `id,record` CSV
//! - `rbutils id-gen export PROJECT` - Write the pool as an `id,record` CSV
//! - `rbutils id-gen correct PROJECT FILE` - Apply a `current_id,corrected_id` batch
//! - `rbutils id-gen update-records PROJECT FILE` - Rewrite record keys from an `id,record` CSV
//! - `rbutils id-gen list-projects` - Projects present in the database
//! - `rbutils id-gen stats PROJECT` - Total, bound and available counts
//!
//! ## Exit Codes
//!
//! - 0: Success
//! - 1: Input rejected (bad file, duplicates, failed post-condition); nothing was changed
//! - 2: Environment error (missing config or service, unreadable database)

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use booster_idpool::{
    IdPoolError, IdentifierStore, ProjectId, RemapOptions, RemappingEngine, tabular,
};
use booster_service::BoosterConfig;
use clap::{Args, Parser, Subcommand};

/// Service used when neither `--service` nor `--db` is given
pub const DEFAULT_SERVICE: &str = "id_gen";

/// Exit codes for id-gen commands
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const INPUT_ERROR: i32 = 1;
    pub const ENVIRONMENT_ERROR: i32 = 2;
}

#[derive(Debug, Parser)]
pub struct IdGenCli {
    /// Service whose identifier database to use
    #[arg(long, value_name = "NAME", conflicts_with = "db")]
    pub service: Option<String>,

    /// Identifier database path, bypassing the configuration
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: IdGenSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum IdGenSubcommand {
    /// Load fresh identifiers from a file with one identifier per line
    ///
    /// Identifiers already in the pool are skipped. Duplicates within the
    /// file reject the whole load.
    Load(LoadArgs),

    /// Seed an empty pool from an `id,record` CSV
    ///
    /// Used when migrating existing assignments. Refused if the project
    /// already has identifiers.
    Import(FileArgs),

    /// Export the pool as an `id,record` CSV in allocation order
    Export(ExportArgs),

    /// Move records between identifiers from a `current_id,corrected_id` CSV
    ///
    /// The batch is applied atomically and audited. Identifiers that are
    /// not in the pool are skipped with a warning unless `--strict`.
    Correct(CorrectArgs),

    /// Overwrite the record bound to each identifier from an `id,record` CSV
    UpdateRecords(UpdateRecordsArgs),

    /// List projects that have identifiers in the database
    ListProjects(JsonArgs),

    /// Show pool counts for a project
    Stats(StatsArgs),
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    pub project: ProjectId,
    pub file: PathBuf,

    /// Allocate in random order instead of file order
    #[arg(long)]
    pub random: bool,
}

#[derive(Debug, Args)]
pub struct FileArgs {
    pub project: ProjectId,
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    pub project: ProjectId,

    /// Write to this file instead of stdout
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Leave out identifiers that are not yet assigned
    #[arg(long)]
    pub bound_only: bool,
}

#[derive(Debug, Args)]
pub struct CorrectArgs {
    pub project: ProjectId,
    pub file: PathBuf,

    /// Reject the batch if any identifier is unknown
    #[arg(long)]
    pub strict: bool,

    /// Validate and report without committing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct UpdateRecordsArgs {
    pub project: ProjectId,
    pub file: PathBuf,

    /// Validate and report without committing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct JsonArgs {
    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    pub project: ProjectId,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

impl IdGenCli {
    pub fn run(self, config_path: Option<&Path>) -> i32 {
        let store = match self.open_store(config_path) {
            Ok(store) => store,
            Err(e) => {
                eprintln!("Error: {e:#}");
                return exit_codes::ENVIRONMENT_ERROR;
            }
        };

        let result = match self.command {
            IdGenSubcommand::Load(args) => run_load(&store, args),
            IdGenSubcommand::Import(args) => run_import(&store, args),
            IdGenSubcommand::Export(args) => run_export(&store, args),
            IdGenSubcommand::Correct(args) => run_correct(store, args),
            IdGenSubcommand::UpdateRecords(args) => run_update_records(store, args),
            IdGenSubcommand::ListProjects(args) => run_list_projects(&store, args),
            IdGenSubcommand::Stats(args) => run_stats(&store, args),
        };

        match result {
            Ok(()) => exit_codes::SUCCESS,
            Err(e) => report_error(&e),
        }
    }

    fn db_path(&self, config_path: Option<&Path>) -> anyhow::Result<PathBuf> {
        if let Some(db) = &self.db {
            return Ok(db.clone());
        }
        let config = BoosterConfig::load(config_path).context("loading configuration")?;
        let service = self.service.as_deref().unwrap_or(DEFAULT_SERVICE);
        Ok(config.db_path(service)?)
    }

    fn open_store(&self, config_path: Option<&Path>) -> anyhow::Result<IdentifierStore> {
        let path = self.db_path(config_path)?;
        tracing::debug!(path = %path.display(), "opening identifier database");
        IdentifierStore::open(&path)
            .with_context(|| format!("opening identifier database {}", path.display()))
    }
}

fn report_error(err: &IdPoolError) -> i32 {
    tracing::info!(category = err.category().as_str(), error = %err, "command failed");
    eprintln!("Error: {err}");
    if let IdPoolError::Consistency { failures } = err {
        for failure in failures {
            eprintln!("  {failure}");
        }
    }
    if err.category().is_input_error() {
        exit_codes::INPUT_ERROR
    } else {
        exit_codes::ENVIRONMENT_ERROR
    }
}

fn run_load(store: &IdentifierStore, args: LoadArgs) -> Result<(), IdPoolError> {
    let identifiers = tabular::read_identifier_list(tabular::open_file(&args.file)?)?;
    let summary = store.load(&args.project, &identifiers, args.random)?;
    tracing::info!(
        project = %args.project,
        inserted = summary.inserted,
        skipped = summary.already_present,
        "loaded identifiers"
    );
    println!(
        "Loaded {} identifiers into project {} ({} already present)",
        summary.inserted, args.project, summary.already_present
    );
    Ok(())
}

fn run_import(store: &IdentifierStore, args: FileArgs) -> Result<(), IdPoolError> {
    let pairs = tabular::read_id_map(tabular::open_file(&args.file)?)?;
    let imported = store.import_map(&args.project, &pairs)?;
    tracing::info!(project = %args.project, imported, "imported identifier map");
    println!("Imported {imported} assignments into project {}", args.project);
    Ok(())
}

fn run_export(store: &IdentifierStore, args: ExportArgs) -> Result<(), IdPoolError> {
    let rows = store.export(&args.project)?;
    match &args.output {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                IdPoolError::io_with_source(format!("failed to create {}", path.display()), e)
            })?;
            let written = tabular::write_id_map(file, &rows, args.bound_only)?;
            println!("Exported {written} rows to {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let written = tabular::write_id_map(stdout.lock(), &rows, args.bound_only)?;
            // stdout carries the CSV
            eprintln!("Exported {written} rows");
        }
    }
    Ok(())
}

fn run_correct(store: IdentifierStore, args: CorrectArgs) -> Result<(), IdPoolError> {
    let entries = tabular::read_corrections(tabular::open_file(&args.file)?)?;
    let engine = RemappingEngine::new(store);
    let report = engine.apply(
        &args.project,
        &entries,
        RemapOptions {
            strict: args.strict,
            dry_run: args.dry_run,
        },
    )?;

    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    let verb = if report.dry_run { "Would apply" } else { "Applied" };
    println!(
        "{verb} {} corrections to project {} (batch {})",
        report.applied.len(),
        args.project,
        report.batch_id
    );
    for applied in &report.applied {
        println!(
            "  {} -> {}: {}",
            applied.current_id,
            applied.corrected_id,
            applied.record.as_deref().unwrap_or("<unbound>")
        );
    }
    if !report.released.is_empty() {
        println!("Released: {}", report.released.join(", "));
    }
    Ok(())
}

fn run_update_records(store: IdentifierStore, args: UpdateRecordsArgs) -> Result<(), IdPoolError> {
    let updates = tabular::read_record_updates(tabular::open_file(&args.file)?)?;
    let engine = RemappingEngine::new(store);
    let report = engine.update_records(&args.project, &updates, args.dry_run)?;

    for warning in &report.missing {
        eprintln!("warning: {warning}");
    }
    let verb = if report.dry_run { "Would update" } else { "Updated" };
    println!(
        "{verb} {} records in project {} (batch {})",
        report.updated.len(),
        args.project,
        report.batch_id
    );
    for change in &report.updated {
        println!(
            "  {}: {} -> {}",
            change.identifier,
            change.previous_record.as_deref().unwrap_or("<unbound>"),
            change.new_record
        );
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct ProjectSummary {
    project: String,
    #[serde(flatten)]
    stats: booster_idpool::PoolStats,
}

fn run_list_projects(store: &IdentifierStore, args: JsonArgs) -> Result<(), IdPoolError> {
    let mut summaries = Vec::new();
    for project in store.projects()? {
        let stats = store.stats(&project)?;
        summaries.push(ProjectSummary {
            project: project.as_str().to_string(),
            stats,
        });
    }

    if args.json {
        print_json(&summaries);
    } else if summaries.is_empty() {
        println!("No projects in {}", store.path().display());
    } else {
        for s in &summaries {
            println!(
                "{}\t{} total, {} bound, {} available",
                s.project, s.stats.total, s.stats.bound, s.stats.available
            );
        }
    }
    Ok(())
}

fn run_stats(store: &IdentifierStore, args: StatsArgs) -> Result<(), IdPoolError> {
    let stats = store.stats(&args.project)?;
    if args.json {
        print_json(&ProjectSummary {
            project: args.project.as_str().to_string(),
            stats,
        });
    } else {
        println!(
            "Project {}: {} total, {} bound, {} available",
            args.project, stats.total, stats.bound, stats.available
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    let mut stdout = std::io::stdout().lock();
    let _ = serde_json::to_writer_pretty(&mut stdout, value);
    let _ = writeln!(stdout);
}
