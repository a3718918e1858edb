use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use siasync_core::SiaClient;
use siasync_integrations::ids::DEFAULT_API_URL;
use tokio::task::JoinHandle;

use crate::sync::emblems::{EmblemApplier, GioEmblemWriter, emblem_channel};
use crate::sync::engine::{
    DEFAULT_DURATION_BLOCKS, DEFAULT_FILE_SYNC_LIMIT, DEFAULT_MAX_QUEUED_FILES,
    DEFAULT_PATH_JOINER, DEFAULT_REMOTE_PREFIX, DEFAULT_STALL_BLOCKS_PER_GB,
    DEFAULT_SYNC_RECURSION_LIMIT, DEFAULT_URGENT_THRESHOLD_BLOCKS, ReconciliationEngine,
    SyncConfig,
};
use crate::sync::scheduler::{Scheduler, TickOutcome};

const DEFAULT_SYNC_DIR_NAME: &str = "Sia";
const DEFAULT_INTERVAL_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub sync_root: PathBuf,
    pub api_url: String,
    pub api_password: Option<String>,
    pub interval: Duration,
    pub sync: SyncConfig,
    pub enable_emblems: bool,
    pub start_paused: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let sync_root = std::env::var("SIASYNC_SYNC_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_SYNC_DIR_NAME));
        let api_url =
            std::env::var("SIASYNC_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_password = std::env::var("SIASYNC_API_PASSWORD")
            .ok()
            .filter(|value| !value.is_empty());
        let interval = Duration::from_secs(read_u64_env(
            "SIASYNC_INTERVAL_SECS",
            DEFAULT_INTERVAL_SECS,
        ));

        let sync = SyncConfig {
            remote_prefix: std::env::var("SIASYNC_REMOTE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_REMOTE_PREFIX.to_string()),
            path_joiner: std::env::var("SIASYNC_PATH_JOINER")
                .ok()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_PATH_JOINER.to_string()),
            file_sync_limit: read_usize_env("SIASYNC_FILE_SYNC_LIMIT", DEFAULT_FILE_SYNC_LIMIT),
            sync_recursion_limit: read_usize_env(
                "SIASYNC_RECURSION_LIMIT",
                DEFAULT_SYNC_RECURSION_LIMIT,
            ),
            max_queued_files: read_usize_env("SIASYNC_MAX_QUEUED_FILES", DEFAULT_MAX_QUEUED_FILES),
            default_duration_blocks: read_u64_env(
                "SIASYNC_UPLOAD_DURATION_BLOCKS",
                DEFAULT_DURATION_BLOCKS,
            ),
            renew: read_bool_env("SIASYNC_RENEW", true),
            urgent_threshold_blocks: read_u64_env(
                "SIASYNC_URGENT_BLOCKS",
                DEFAULT_URGENT_THRESHOLD_BLOCKS,
            ),
            stall_blocks_per_gb: read_u64_env(
                "SIASYNC_STALL_BLOCKS_PER_GB",
                DEFAULT_STALL_BLOCKS_PER_GB,
            ),
        };

        Ok(Self {
            sync_root,
            api_url,
            api_password,
            interval,
            sync,
            enable_emblems: read_bool_env("SIASYNC_ENABLE_EMBLEMS", true),
            start_paused: read_bool_env("SIASYNC_START_PAUSED", false),
        })
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    scheduler: Arc<Scheduler>,
    emblem_handle: Option<JoinHandle<usize>>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.sync_root)
            .await
            .with_context(|| format!("failed to create sync root at {:?}", config.sync_root))?;

        let mut client = SiaClient::with_base_url(&config.api_url)
            .with_context(|| format!("invalid renter api url: {}", config.api_url))?;
        if let Some(password) = &config.api_password {
            client = client.with_api_password(password.clone());
        }

        let mut engine = ReconciliationEngine::new(client, config.sync.clone());
        let emblem_handle = if config.enable_emblems {
            let (tx, rx) = emblem_channel();
            engine = engine.with_emblems(tx);
            Some(EmblemApplier::new(GioEmblemWriter::new(), rx).spawn())
        } else {
            None
        };

        let scheduler = Scheduler::new(engine, config.sync_root.clone(), config.interval)
            .with_paused(config.start_paused);

        Ok(Self {
            config,
            scheduler: Arc::new(scheduler),
            emblem_handle,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            sync_root = %self.config.sync_root.display(),
            api_url = %self.config.api_url,
            remote_prefix = %self.config.sync.remote_prefix,
            interval_secs = self.config.interval.as_secs(),
            emblems = self.config.enable_emblems,
            paused = self.config.start_paused,
            "started"
        );

        let pause_handle = spawn_pause_toggle(Arc::clone(&self.scheduler))?;
        let scheduler_handle = Arc::clone(&self.scheduler).spawn();

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        tracing::info!("shutting down");

        self.scheduler.shutdown();
        if let Err(err) = scheduler_handle.await {
            tracing::warn!(error = %err, "scheduler task ended abnormally");
        }
        if let Some(handle) = pause_handle {
            handle.abort();
        }
        if let Some(handle) = self.emblem_handle {
            handle.abort();
        }
        Ok(())
    }

    /// Runs a single cycle and waits for its emblems to be written.
    pub async fn run_once(self) -> anyhow::Result<TickOutcome> {
        let outcome = self.scheduler.tick().await.context("sync cycle failed")?;
        // Dropping the scheduler closes the emblem queue so the applier can finish.
        drop(self.scheduler);
        if let Some(handle) = self.emblem_handle {
            let applied = handle.await.context("emblem applier panicked")?;
            tracing::debug!(applied, "emblems applied");
        }
        Ok(outcome)
    }
}

#[cfg(unix)]
fn spawn_pause_toggle(scheduler: Arc<Scheduler>) -> anyhow::Result<Option<JoinHandle<()>>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut signals =
        signal(SignalKind::user_defined1()).context("failed to listen for SIGUSR1")?;
    Ok(Some(tokio::spawn(async move {
        while signals.recv().await.is_some() {
            let paused = scheduler.toggle_pause();
            tracing::info!(paused, "sync pause toggled");
        }
    })))
}

#[cfg(not(unix))]
fn spawn_pause_toggle(_scheduler: Arc<Scheduler>) -> anyhow::Result<Option<JoinHandle<()>>> {
    Ok(None)
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
