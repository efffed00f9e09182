use anyhow::{Context as _, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use feedsync::api::ApiClient;
use feedsync::cache::CacheEngine;
use feedsync::config::Config;
use feedsync::context::Context;
use feedsync::events::{Event, Notifier};
use feedsync::network::ManualNetwork;
use feedsync::storage::{Database, DatabaseError};
use feedsync::sync::Synchronizer;

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsync"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedsync",
    about = "Offline sync and image cache for a Tiny Tiny RSS server"
)]
struct Args {
    /// Config file (default: ~/.config/feedsync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,

    /// Update the local mirror without downloading images
    #[arg(long)]
    only_articles: bool,

    /// Print local store statistics and exit
    #[arg(long)]
    status: bool,

    /// Delete every cached image and exit
    #[arg(long)]
    clear_cache: bool,
}

/// Log notifications from the sync and cache layers.
async fn log_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::Refreshed(key) => tracing::debug!(?key, "Refreshed"),
            Event::StatusSynchronized {
                replayed,
                remaining,
            } => tracing::info!(replayed, remaining, "Offline edits synchronized"),
            Event::CacheStarted => tracing::info!("Cache run started"),
            Event::CacheProgress { done, total } => {
                tracing::info!(done, total, "Caching images")
            }
            Event::CacheFinished(report) => tracing::info!(?report, "Cache run finished"),
            Event::CacheInterrupted(report) => {
                tracing::warn!(?report, "Cache run interrupted")
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // User-only access: the directory holds the database and cached media
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let db_path = config_dir.join("feedsync.db");
    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    if args.status {
        let stats = db.stats().await.context("Failed to read store statistics")?;
        println!("Categories:     {}", stats.categories);
        println!("Feeds:          {}", stats.feeds);
        println!("Articles:       {} ({} unread)", stats.articles, stats.unread);
        println!("Pending edits:  {}", stats.pending_marks);
        println!(
            "Cached images:  {} ({} KiB)",
            stats.cached_files,
            stats.cached_bytes / 1024
        );
        return Ok(());
    }

    let api_settings = config.server.api_settings()?;
    let api = Arc::new(ApiClient::new(api_settings).context("Failed to build API client")?);
    let network = Arc::new(ManualNetwork::new(config.network));

    let (event_tx, event_rx) = mpsc::channel::<Event>(32);
    let logger = tokio::spawn(log_events(event_rx));

    let ctx = Context::new(db.clone(), api.clone(), network, Notifier::new(event_tx));
    let sync = Arc::new(Synchronizer::new(ctx, config.sync.sync_settings()));
    let cache_settings = config
        .cache
        .cache_settings(&config_dir.join("cache"), &config.server);
    let engine = CacheEngine::new(sync.clone(), cache_settings)
        .context("Failed to build download client")?;

    if args.clear_cache {
        let removed = engine.clear_cache().await.context("Failed to clear cache")?;
        println!("Removed {} cached files.", removed);
    } else {
        let cancel = engine.cancel_flag();
        let run = engine.run(args.only_articles);
        tokio::pin!(run);

        let report = tokio::select! {
            report = &mut run => report,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, stopping cache run");
                cancel.cancel();
                run.await
            }
        }
        .context("Cache run failed")?;

        println!(
            "{:?}: {} articles scanned, {} images downloaded ({} KiB), {} evicted",
            report.phase,
            report.articles_scanned,
            report.files_downloaded,
            report.bytes_downloaded / 1024,
            report.files_evicted
        );
    }

    api.logout().await;
    drop(engine);
    drop(sync);
    if let Err(e) = logger.await {
        tracing::debug!(error = %e, "Event logger task failed");
    }
    Ok(())
}
