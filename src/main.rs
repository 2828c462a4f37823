use chrono::Local;
use clap::{Parser, ValueEnum};
use filmsync::{
    plan_update, CatalogStore, CatalogSync, ConsoleNotifier, ExecutionStage, LogNotifier, Notifier,
    SqliteStore, SyncConfig, SyncOutcome, SyncStatus, UpdateMode, UpdatePlan, UpdateState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Stage {
    /// Download, decompress and import
    All,
    /// Download and decompress only
    Download,
    /// Import an already decompressed film list
    Import,
}

impl From<Stage> for ExecutionStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::All => ExecutionStage::All,
            Stage::Download => ExecutionStage::DownloadOnly,
            Stage::Import => ExecutionStage::ImportOnly,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "filmsync")]
#[command(about = "Keep a local catalog of the MediathekView film list up to date", long_about = None)]
#[command(version)]
struct Args {
    /// Working directory for downloaded film lists
    #[arg(long, default_value = ".filmsync")]
    data_dir: PathBuf,

    /// SQLite catalog database
    #[arg(long, default_value = "filmsync.db")]
    database: PathBuf,

    /// Path to the xz binary, used when none is found in the standard locations
    #[arg(long)]
    xz: Option<PathBuf>,

    /// Always run a full update
    #[arg(long)]
    full: bool,

    /// Update even if the last update is more recent than --interval
    #[arg(long)]
    force: bool,

    /// Minimum time between two updates (e.g. "2h", "30m")
    #[arg(long, default_value = "2h")]
    interval: humantime::Duration,

    /// Stages to execute
    #[arg(long, value_enum, default_value_t = Stage::All)]
    stage: Stage,

    /// Manifest URL of the full film list
    #[arg(long, default_value = filmsync::types::FULL_MANIFEST_URL)]
    full_manifest_url: String,

    /// Manifest URL of the differential film list
    #[arg(long, default_value = filmsync::types::DIFF_MANIFEST_URL)]
    diff_manifest_url: String,

    /// Keep downloaded film lists after the import
    #[arg(long)]
    keep: bool,

    /// Print the stored sync status as JSON and exit
    #[arg(long)]
    status: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("filmsync={}", log_level))
        .init();

    let store = Arc::new(SqliteStore::new(&args.database)?);

    if args.status {
        println!("{}", serde_json::to_string_pretty(&store.status()?)?);
        return Ok(());
    }

    info!("🎬 FilmSync - MediathekView catalog sync");
    info!("Database: {:?}", args.database);
    info!("Working directory: {:?}", args.data_dir);

    let stage = ExecutionStage::from(args.stage);
    let mode = match plan(store.as_ref(), &args)? {
        Some(mode) => mode,
        None => {
            info!("Catalog is up to date, nothing to do");
            return Ok(());
        }
    };
    info!("Running {:?} update ({:?})", mode, stage);

    let config = SyncConfig {
        full_manifest_url: args.full_manifest_url,
        diff_manifest_url: args.diff_manifest_url,
        data_dir: args.data_dir,
        xz_override: args.xz,
        keep_artifacts: args.keep,
        ..SyncConfig::default()
    };

    let notifier: Arc<dyn Notifier> = if atty::is(atty::Stream::Stderr) {
        Arc::new(ConsoleNotifier::new())
    } else {
        Arc::new(LogNotifier::new())
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping...");
            interrupt.cancel();
        }
    });

    let sync = CatalogSync::new(config, store)
        .with_notifier(notifier)
        .with_cancellation(cancel);

    match sync.run(mode, stage).await {
        Ok(SyncOutcome::Completed(summary)) => {
            info!(
                "✅ Catalog updated: {} records, added {}, deleted {}",
                summary.records, summary.added, summary.deleted
            );
            Ok(())
        }
        Ok(SyncOutcome::Aborted(summary)) => {
            warn!("Update aborted after {} records", summary.records);
            Ok(())
        }
        Ok(SyncOutcome::Downloaded(path)) => {
            info!("✅ Film list downloaded to {}", path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Picks the update mode, or `None` when the catalog needs no update.
fn plan(store: &SqliteStore, args: &Args) -> Result<Option<UpdateMode>, Box<dyn std::error::Error>> {
    let interval = *args.interval;
    let force = args.force || !matches!(args.stage, Stage::All);

    let now = Local::now();
    let mut status = store.status()?;
    let mut plan = plan_update(&status, &now, interval, force);

    if plan == UpdatePlan::RecoverStale {
        warn!("Previous update did not finish, marking it aborted");
        status = SyncStatus {
            state: UpdateState::Aborted,
            description: "Stale update recovered".to_string(),
            modified: now.timestamp(),
            ..status
        };
        store.persist_status(&status)?;
        plan = plan_update(&status, &now, interval, force);
    }

    Ok(match plan {
        UpdatePlan::Skip => None,
        UpdatePlan::Differential if !args.full => Some(UpdateMode::Differential),
        _ => Some(UpdateMode::Full),
    })
}
