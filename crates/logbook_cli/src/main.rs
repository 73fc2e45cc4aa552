//! Logbook CLI
//!
//! Runs the background controller against a JSON-lines journal and prints
//! the notifications it emits.
//!
//! # Collaborators
//!
//! - Journal: a `.jsonl` file (or the newest one in a directory), tailed for new lines
//! - Settings: a flat JSON object, by default `settings.json` next to the journal
//! - Catalogs: optional local JSON-lines dumps
//!
//! With `--dry-run` the catalogs and settings are in-memory stand-ins and
//! nothing is written to disk.

mod catalog;
mod journal_file;
mod output;
mod settings;

use catalog::LocalCatalog;
use clap::Parser;
use journal_file::{is_journal, FileHistoryLoader, FileLogMonitor, JournalFile};
use logbook_core::mock::{MemoryPersistence, MockCatalog};
use logbook_core::{
    CatalogClient, Collaborators, Controller, ControllerConfig, ControllerEvent, Persistence,
    CURRENT_COMMANDER_KEY,
};
use output::Format;
use settings::JsonSettings;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const CLOSE_POLL: Duration = Duration::from_millis(100);

/// Journal history controller.
#[derive(Parser)]
#[command(name = "logbook")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Journal file, or a directory holding journals
    journal: PathBuf,

    /// Settings file (defaults to settings.json beside the journal)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Local dump of the primary catalog
    #[arg(long)]
    catalog_a: Option<PathBuf>,

    /// Local dump of the secondary catalog
    #[arg(long)]
    catalog_b: Option<PathBuf>,

    /// Commander to load, saved for later runs
    #[arg(short, long)]
    commander: Option<i64>,

    /// Grid cells to sync (repeatable; all cells when omitted)
    #[arg(long = "grid")]
    grids: Vec<u32>,

    /// Disable catalog synchronization
    #[arg(long)]
    no_sync: bool,

    /// Request a full sync of both catalogs after the startup sync
    #[arg(long, conflicts_with = "no_sync")]
    resync: bool,

    /// Add UI events to the history
    #[arg(long)]
    show_ui_events: bool,

    /// Seconds to run before shutting down
    #[arg(short, long, default_value = "10")]
    run_for: u64,

    /// Journal poll interval in milliseconds
    #[arg(long, default_value = "250")]
    poll_ms: u64,

    /// Use in-memory settings and catalogs
    #[arg(long)]
    dry_run: bool,

    /// Output format (text, json)
    #[arg(short, long, value_enum, default_value = "text")]
    format: Format,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Picks the most recently modified journal in `path` if it is a directory.
fn resolve_journal(path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(path)? {
        let candidate = entry?.path();
        if !candidate.is_file() || !is_journal(&candidate) {
            continue;
        }
        let modified = candidate.metadata()?.modified()?;
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, candidate));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| format!("No journal found in {}", path.display()).into())
}

fn config(cli: &Cli) -> ControllerConfig {
    ControllerConfig::new()
        .with_sync_enabled(!cli.no_sync)
        .with_show_ui_events(cli.show_ui_events)
        .with_grid_filter(cli.grids.iter().copied())
}

fn collaborators(cli: &Cli, journal: PathBuf) -> Result<Collaborators, Box<dyn std::error::Error>> {
    let settings: Arc<dyn Persistence> = if cli.dry_run {
        Arc::new(MemoryPersistence::new())
    } else {
        let path = match &cli.settings {
            Some(path) => path.clone(),
            None => journal
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("settings.json"),
        };
        Arc::new(JsonSettings::open(path)?)
    };
    if let Some(commander) = cli.commander {
        settings.put_setting(CURRENT_COMMANDER_KEY, &commander.to_string())?;
    }

    let (catalog_a, catalog_b): (Arc<dyn CatalogClient>, Arc<dyn CatalogClient>) = if cli.dry_run {
        (
            Arc::new(MockCatalog::new("catalog-a").with_fresh_records()),
            Arc::new(MockCatalog::new("catalog-b")),
        )
    } else {
        (
            Arc::new(LocalCatalog::new("catalog-a", cli.catalog_a.clone(), Arc::clone(&settings))),
            Arc::new(LocalCatalog::new("catalog-b", cli.catalog_b.clone(), Arc::clone(&settings))),
        )
    };

    let journal = Arc::new(JournalFile::new(journal));
    let monitor = FileLogMonitor::new(Arc::clone(&journal), Duration::from_millis(cli.poll_ms));
    let loader = FileHistoryLoader::new(journal, cli.show_ui_events);

    Ok(Collaborators::new(
        Arc::new(monitor),
        Arc::new(loader),
        catalog_a,
        catalog_b,
        settings,
    ))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let journal = resolve_journal(&cli.journal)?;
    tracing::info!(journal = %journal.display(), "starting");

    let controller = Controller::new(config(&cli), collaborators(&cli, journal)?);
    let events = controller.subscribe();
    controller.start()?;
    controller.begin_initial_load();
    controller.mark_init_complete();

    let deadline = Instant::now() + Duration::from_secs(cli.run_for);
    let mut closing = false;
    let mut resync = cli.resync;
    loop {
        let wait = if closing {
            CLOSE_POLL
        } else {
            deadline.saturating_duration_since(Instant::now())
        };
        let event = match events.recv_timeout(wait) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) if !closing => {
                controller.shutdown();
                closing = true;
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if let Some(line) = output::render(&event, cli.format) {
            println!("{line}");
        }
        match event {
            // The startup sync holds the sync flag, so ask once it is done.
            ControllerEvent::SyncComplete if resync => {
                resync = false;
                if !controller.request_sync(true, true) {
                    tracing::info!("sync already running, resync not requested");
                }
            }
            ControllerEvent::FinalClose => break,
            _ => {}
        }
    }

    controller.join()?;
    Ok(())
}
