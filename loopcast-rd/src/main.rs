//! LoopCast rotation daemon (loopcast-rd) - Main entry point
//!
//! Keeps `<root>/media/current_stream.mp4` fed for an external looping
//! player and serves the operator API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use loopcast_common::config::{resolve_root_folder, RootFolderInitializer, TomlConfig};
use loopcast_rd::api::{self, AppContext};
use loopcast_rd::catalog::{CatalogSource, SqliteCatalog};
use loopcast_rd::config::{RotationConfig, SlotAssignment};
use loopcast_rd::db::RotationState;
use loopcast_rd::download::archive::ArchiveOrgDownloader;
use loopcast_rd::download::{Downloader, HttpDownloader};
use loopcast_rd::playback::{supervise, Collaborators, CoordinatorFactory, CoordinatorHandle, RestartPolicy};
use loopcast_rd::probe::FfprobeProbe;
use loopcast_rd::state::SharedState;
use loopcast_rd::swap::{StdFs, SwapExecutor};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Where item files are fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Source {
    /// Fetch each item's remote URI as-is
    Direct,
    /// Resolve archive.org metadata to the smallest fitting .mp4
    Archive,
}

/// Command-line arguments for loopcast-rd
#[derive(Parser, Debug)]
#[command(name = "loopcast-rd")]
#[command(about = "Media rotation daemon for LoopCast")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5750", env = "LOOPCAST_RD_PORT")]
    port: u16,

    /// Root folder holding the database and media slots
    #[arg(short, long, env = "LOOPCAST_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Catalog database (defaults to <root>/catalog.db)
    #[arg(long, env = "LOOPCAST_CATALOG_DB")]
    catalog_db: Option<PathBuf>,

    /// Download source
    #[arg(long, value_enum, default_value_t = Source::Archive, env = "LOOPCAST_SOURCE")]
    source: Source,

    /// Start streaming immediately
    #[arg(long, env = "LOOPCAST_AUTOSTART")]
    autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file_config = TomlConfig::load();

    // Initialize tracing; RUST_LOG overrides the config file's log_level
    let default_filter = file_config
        .log_level
        .clone()
        .unwrap_or_else(|| "loopcast_rd=info,tower_http=info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting LoopCast Rotation Daemon (loopcast-rd) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Root folder and database
    let root_folder = resolve_root_folder(args.root_folder.as_deref(), "LOOPCAST_ROOT_FOLDER");
    info!("Root folder: {}", root_folder.display());

    let initializer = RootFolderInitializer::new(root_folder.clone());
    initializer
        .ensure_directories()
        .context("Failed to create root folder layout")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = loopcast_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    let rotation = Arc::new(RotationState::new(pool));

    let config = RotationConfig::load(&rotation)
        .await
        .context("Failed to load rotation settings")?;

    // Catalog
    let catalog_path = args
        .catalog_db
        .clone()
        .or(file_config.catalog_db)
        .unwrap_or_else(|| root_folder.join("catalog.db"));
    info!("Catalog: {}", catalog_path.display());
    let catalog: Arc<dyn CatalogSource> = Arc::new(
        SqliteCatalog::open(&catalog_path)
            .await
            .with_context(|| format!("Failed to open catalog {}", catalog_path.display()))?
            .with_max_item_bytes(config.max_item_bytes),
    );

    // Downloader
    let http = HttpDownloader::new();
    let downloader: Arc<dyn Downloader> = match args.source {
        Source::Direct => Arc::new(http),
        Source::Archive => Arc::new(ArchiveOrgDownloader::new(http)),
    };
    info!(source = ?args.source, "Downloader ready");

    // Slots: undo whatever an earlier crash left behind
    let slots = SlotAssignment::in_dir(&initializer.media_dir());
    match SwapExecutor::new(slots.clone()).recover() {
        Ok(report) => info!(?report, "Slot recovery complete"),
        Err(e) => warn!(error = %e, "Slot recovery failed"),
    }

    // Coordinator under supervision
    let shared = Arc::new(SharedState::new());
    let factory = Arc::new(CoordinatorFactory {
        collaborators: Collaborators {
            catalog: Arc::clone(&catalog),
            downloader,
            probe: Arc::new(FfprobeProbe::default()),
            slot_fs: Arc::new(StdFs),
        },
        state: Arc::clone(&rotation),
        shared: Arc::clone(&shared),
        slots,
        autostart: args.autostart,
    });

    // Each coordinator run attaches its own receiver
    let (handle, unattached) = CoordinatorHandle::channel();
    drop(unattached);
    let supervised_handle = handle.clone();
    let mut supervisor = tokio::spawn(async move {
        supervise("coordinator", RestartPolicy::default(), move |attempt| {
            Arc::clone(&factory).run_once(supervised_handle.clone(), attempt)
        })
        .await
    });

    // HTTP API
    let ctx = AppContext {
        state: shared,
        coordinator: handle.clone(),
        rotation,
        catalog,
        root_folder,
    };

    tokio::select! {
        result = api::run(ctx, args.port, shutdown_signal()) => {
            result.context("Server error")?;
        }
        result = &mut supervisor => {
            return match result {
                Ok(Ok(_)) => Err(anyhow!("Coordinator exited unexpectedly")),
                Ok(Err(e)) => Err(anyhow!(e)).context("Coordinator could not be kept running"),
                Err(e) => Err(anyhow!(e)).context("Supervisor task failed"),
            };
        }
    }

    // Let the coordinator finish its current step
    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Coordinator already stopped");
    }
    if tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .is_err()
    {
        warn!("Coordinator did not stop within 5s");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
