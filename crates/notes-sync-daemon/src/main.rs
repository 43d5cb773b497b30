//! notes-sync-daemon: Headless sync for notes and to-do lists.
//!
//! Uses the same sync-core as the app, but runs as a native binary that keeps
//! a local JSON copy of one user's records and logs notifications.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use notes_sync_daemon::persist::persisting_callbacks;
use notes_sync_daemon::{DaemonConfig, HttpRemote, JsonFileStore, JsonRecordStore, RealtimeClient};

use notes_sync_core::{Note, OwnerId, RecordStore, SessionDeps, SyncSession, TodoList};

#[derive(Parser, Debug)]
#[command(name = "notes-sync-daemon")]
#[command(about = "Headless sync for notes and to-do lists")]
struct Args {
    /// Directory holding config.json (default: <platform config dir>/notes-sync)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// User whose records are synced
    #[arg(long, env = "NOTES_SYNC_OWNER")]
    owner: Option<String>,

    /// Backend base URL
    #[arg(long, env = "NOTES_SYNC_API_URL")]
    api_url: Option<String>,

    /// Backend API key
    #[arg(long, env = "NOTES_SYNC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Access token of the signed-in user
    #[arg(long, env = "NOTES_SYNC_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Poll only, without realtime change feeds
    #[arg(long)]
    no_realtime: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    /// Command-line values take precedence over the config file.
    fn apply_to(&self, config: &mut DaemonConfig) {
        if let Some(owner) = &self.owner {
            config.owner_id = Some(owner.clone());
        }
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = api_key.clone();
        }
        if let Some(token) = &self.access_token {
            config.access_token = Some(token.clone());
        }
        if self.no_realtime {
            config.realtime = false;
        }
    }
}

/// Resolves on each SIGHUP; never resolves where the signal does not exist.
struct RefreshSignal {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl RefreshSignal {
    fn new() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            hangup: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                .context("Failed to listen for SIGHUP")?,
        })
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            self.hangup.recv().await;
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,notes_sync_daemon=debug,notes_sync_core=debug"
    } else {
        "info,notes_sync_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting notes-sync-daemon");

    let config_dir = match &args.config_dir {
        Some(dir) => dir.clone(),
        None => dirs::config_dir()
            .context("No platform config directory, pass --config-dir")?
            .join("notes-sync"),
    };

    let mut config = DaemonConfig::load(&config_dir)?;
    args.apply_to(&mut config);

    let owner = config
        .owner_id
        .as_deref()
        .context("No owner configured, pass --owner or set owner_id in config.json")?;
    let owner = OwnerId::new(owner)?;

    let data_dir = config.data_dir_or(&config_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    info!("Owner: {}", owner);
    info!("Backend: {}", config.api_url);
    info!("Data directory: {:?}", data_dir);

    // Local copies
    let notes_store = Arc::new(
        JsonRecordStore::<Note>::open(&data_dir)
            .await
            .context("Failed to open local notes")?,
    );
    let todos_store = Arc::new(
        JsonRecordStore::<TodoList>::open(&data_dir)
            .await
            .context("Failed to open local to-do lists")?,
    );
    let notes = notes_store.list_ordered().await?;
    let todos = todos_store.list_ordered().await?;
    info!("Loaded {} notes and {} to-do lists", notes.len(), todos.len());

    // Remote
    let mut remote = HttpRemote::new(&config.api_url, &config.api_key)?;
    if let Some(token) = &config.access_token {
        remote = remote.with_access_token(token.clone());
    }
    if config.realtime {
        remote = remote.with_realtime(RealtimeClient::new(config.realtime_endpoint()));
    }

    let (callbacks, persister) =
        persisting_callbacks(Arc::clone(&notes_store), Arc::clone(&todos_store));
    let deps = SessionDeps::new(remote, JsonFileStore::new(&data_dir));
    let session = SyncSession::new(owner, config.sync.clone(), deps, callbacks);

    let _status_logger = session.status_tracker().subscribe(|active| {
        if active {
            debug!("Sync succeeded");
        } else {
            warn!("Sync inactive");
        }
    });

    session.initialize_previous_state(notes, todos);
    session.start_polling();
    if config.realtime {
        session.subscribe_to_changes();
    }

    info!("Daemon running. Press Ctrl+C to stop, send SIGHUP to sync now.");

    let mut refresh = RefreshSignal::new()?;

    loop {
        tokio::select! {
            _ = refresh.recv() => {
                info!("Manual sync requested");
                session.sync_now().await;
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    session.stop();
    drop(session);

    // Let queued collections reach disk.
    if tokio::time::timeout(Duration::from_secs(5), persister).await.is_err() {
        warn!("Timed out waiting for local writes to finish");
    }

    Ok(())
}
