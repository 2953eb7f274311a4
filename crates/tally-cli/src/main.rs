//! tally CLI: document access counters kept in markdown frontmatter
//!
//! Commands: open, track, show, stats, completions

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser, ValueEnum};
use clap_complete::{generate, Shell};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use tally_core::{DocumentRef, ProcessResult, TrackerConfig};
use tally_report::{format_summary, AccessSummary, OutputFormat};
use tally_tracker::{AccessOutcome, AccessTracker};
use tally_vault::FrontmatterStore;

#[derive(Parser)]
#[command(name = "tally")]
#[command(version)]
#[command(about = "Count document opens in markdown frontmatter")]
struct Cli {
    /// Vault root directory
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Args, Default)]
struct Overrides {
    /// Frontmatter field holding the counter
    #[arg(long)]
    field: Option<String>,
    /// Minimum time between two counted opens of one document
    #[arg(long)]
    min_interval_ms: Option<u64>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Record one open of each given document
    Open {
        #[arg(required = true)]
        paths: Vec<String>,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Read document paths from stdin, one open per line, until EOF
    Track {
        #[command(flatten)]
        overrides: Overrides,
        /// Periodic flush interval
        #[arg(long)]
        flush_interval_ms: Option<u64>,
    },
    /// Print the counter of a document
    Show {
        path: String,
        /// Frontmatter field holding the counter
        #[arg(long)]
        field: Option<String>,
        /// Print the whole header instead
        #[arg(long)]
        all: bool,
    },
    /// Access statistics for the vault
    Stats {
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
        /// Entries in the most/least accessed rankings
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Frontmatter field holding the counter
        #[arg(long)]
        field: Option<String>,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Csv,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Table => OutputFormat::Table,
            Format::Csv => OutputFormat::Csv,
            Format::Json => OutputFormat::Json,
        }
    }
}

#[derive(Default)]
struct Tally {
    queued: usize,
    filtered: usize,
    throttled: usize,
    paused: usize,
}

impl Tally {
    fn record(&mut self, outcome: AccessOutcome) {
        match outcome {
            AccessOutcome::Queued => self.queued += 1,
            AccessOutcome::Filtered => self.filtered += 1,
            AccessOutcome::Throttled => self.throttled += 1,
            AccessOutcome::Paused => self.paused += 1,
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(vault: &Path, overrides: &Overrides) -> Result<TrackerConfig> {
    let mut config = TrackerConfig::load(vault)
        .with_context(|| format!("loading {}", TrackerConfig::path_in(vault).display()))?;
    if let Some(field) = &overrides.field {
        config.counter_field_name = field.clone();
    }
    if let Some(ms) = overrides.min_interval_ms {
        config.min_interval_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

fn field_name(vault: &Path, field: Option<String>) -> Result<String> {
    match field {
        Some(field) => Ok(field),
        None => Ok(TrackerConfig::load(vault)?.counter_field_name),
    }
}

fn open_vault(vault: &Path) -> Result<FrontmatterStore> {
    if !vault.is_dir() {
        bail!("vault directory {} does not exist", vault.display());
    }
    Ok(FrontmatterStore::new(vault))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn failures_json(result: &ProcessResult) -> serde_json::Value {
    result
        .failures
        .iter()
        .map(|f| {
            json!({
                "path": f.operation.path(),
                "retry": f.operation.retry_count,
                "error": f.error_message,
            })
        })
        .collect()
}

async fn cmd_open(vault: &Path, paths: Vec<String>, overrides: Overrides) -> Result<()> {
    let store = open_vault(vault)?;
    let config = load_config(vault, &overrides)?;
    let field = config.counter_field_name.clone();
    let mut tracker = AccessTracker::new(config, store.clone())?;

    let mut tally = Tally::default();
    for path in &paths {
        let doc = store
            .document(path)
            .await
            .unwrap_or_else(|_| DocumentRef::new(path.as_str()));
        tally.record(tracker.notify_access(doc));
    }
    let result = tracker.stop().await;

    let mut counts = serde_json::Map::new();
    for path in &paths {
        if let Ok(count) = store.read_field(&DocumentRef::new(path.as_str()), &field).await {
            counts.insert(path.clone(), json!(count));
        }
    }
    print_json(&json!({
        "field": field,
        "queued": tally.queued,
        "filtered": tally.filtered,
        "throttled": tally.throttled,
        "paused": tally.paused,
        "applied": result.success_count,
        "failures": failures_json(&result),
        "counts": counts,
    }))?;

    if result.success_count < tally.queued {
        bail!(
            "{} update(s) could not be applied",
            tally.queued - result.success_count
        );
    }
    Ok(())
}

async fn cmd_track(vault: &Path, overrides: Overrides, flush_interval_ms: Option<u64>) -> Result<()> {
    let store = open_vault(vault)?;
    let mut config = load_config(vault, &overrides)?;
    if let Some(ms) = flush_interval_ms {
        config.flush_interval_ms = ms;
    }
    config.validate()?;
    let mut tracker = AccessTracker::new(config, store.clone())?;

    let applied = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let _subscription = {
        let applied = Arc::clone(&applied);
        let failed = Arc::clone(&failed);
        tracker.on_flush_complete(move |result| {
            applied.fetch_add(result.success_count, Ordering::Relaxed);
            failed.fetch_add(result.failure_count, Ordering::Relaxed);
            tracing::info!(
                applied = result.success_count,
                failed = result.failure_count,
                "batch flushed"
            );
        })
    };
    tracker.start();

    let mut tally = Tally::default();
    let mut notifications = 0usize;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let path = line.trim();
        if path.is_empty() {
            continue;
        }
        notifications += 1;
        let doc = store
            .document(path)
            .await
            .unwrap_or_else(|_| DocumentRef::new(path));
        tally.record(tracker.notify_access(doc));
    }

    let result = tracker.stop().await;
    print_json(&json!({
        "notifications": notifications,
        "queued": tally.queued,
        "filtered": tally.filtered,
        "throttled": tally.throttled,
        "paused": tally.paused,
        "applied": applied.load(Ordering::Relaxed),
        "failed_attempts": failed.load(Ordering::Relaxed),
        "failures": failures_json(&result),
    }))
}

async fn cmd_show(vault: &Path, path: &str, field: Option<String>, all: bool) -> Result<()> {
    let store = open_vault(vault)?;
    let doc = DocumentRef::new(path);
    if all {
        let header = store.read_all(&doc).await?;
        return print_json(&header.map_or(serde_json::Value::Null, |h| h.to_json()));
    }
    let field = field_name(vault, field)?;
    let count = store.read_field(&doc, &field).await?;
    print_json(&json!({ "path": path, "field": field, "count": count }))
}

async fn cmd_stats(vault: &Path, format: Format, top: usize, field: Option<String>) -> Result<()> {
    let store = open_vault(vault)?;
    let field = field_name(vault, field)?;
    let counts = store.scan(&field).await;
    let summary = AccessSummary::from_counts(&counts, Utc::now(), top);
    let output = format_summary(&summary, format.into());
    print!("{output}");
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Open { paths, overrides }) => cmd_open(&cli.vault, paths, overrides).await,
        Some(Commands::Track {
            overrides,
            flush_interval_ms,
        }) => cmd_track(&cli.vault, overrides, flush_interval_ms).await,
        Some(Commands::Show { path, field, all }) => cmd_show(&cli.vault, &path, field, all).await,
        Some(Commands::Stats { format, top, field }) => cmd_stats(&cli.vault, format, top, field).await,
        Some(Commands::Completions { shell }) => {
            generate(shell, &mut Cli::command(), "tally", &mut io::stdout());
            Ok(())
        }
        None => {
            println!(
                "tally v{}: document access counters in frontmatter",
                env!("CARGO_PKG_VERSION")
            );
            println!("Run `tally --help` for usage.");
            Ok(())
        }
    }
}
