use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use siasync_core::{RemoteStore, SiaClient, SiaError};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::{CycleReport, EngineError, ReconciliationEngine, SyncContext};
use super::summary::RenterSummary;

#[derive(Debug, Error)]
pub enum TickError {
    #[error("remote service error: {0}")]
    Remote(#[from] SiaError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl TickError {
    pub fn is_transport(&self) -> bool {
        matches!(self, TickError::Remote(err) if err.is_transport())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// A previous cycle is still running.
    Busy,
    Paused,
    Locked,
    Completed {
        report: CycleReport,
        summary: RenterSummary,
    },
}

/// Marks a cycle as in flight until dropped.
pub struct CycleGuard {
    flag: Arc<AtomicBool>,
}

impl CycleGuard {
    pub fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    engine: ReconciliationEngine<SiaClient>,
    sync_root: PathBuf,
    interval: Duration,
    paused: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    shutdown: Notify,
}

impl Scheduler {
    pub fn new(
        engine: ReconciliationEngine<SiaClient>,
        sync_root: PathBuf,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            sync_root,
            interval,
            paused: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            shutdown: Notify::new(),
        }
    }

    pub fn with_paused(self, paused: bool) -> Self {
        self.paused.store(paused, Ordering::SeqCst);
        self
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Flips the pause flag and returns the new state.
    pub fn toggle_pause(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn in_flight_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.in_flight)
    }

    pub async fn tick(&self) -> Result<TickOutcome, TickError> {
        let Some(_guard) = CycleGuard::try_acquire(&self.in_flight) else {
            tracing::debug!("previous sync cycle still running, skipping tick");
            return Ok(TickOutcome::Busy);
        };
        let paused = self.is_paused();
        if paused {
            return Ok(TickOutcome::Paused);
        }

        let client = self.engine.remote();
        let wallet = client.get_wallet().await?;
        if !wallet.unlocked {
            tracing::debug!("wallet is locked, not syncing");
            return Ok(TickOutcome::Locked);
        }
        let consensus = client.get_consensus().await?;
        if !consensus.synced {
            tracing::debug!(height = consensus.height, "consensus is not synced yet");
        }
        let listing = client.list_files().await?;

        let summary = RenterSummary::from_listing(&listing);
        tracing::info!(
            files_available = summary.files_available,
            files_total = summary.files_total,
            gb_used = summary.gigabytes_used(),
            "renter status"
        );

        let ctx = SyncContext {
            unlocked: wallet.unlocked,
            paused,
            current_height: consensus.height,
        };
        let report = self
            .engine
            .run_cycle(&self.sync_root, &listing, &ctx)
            .await?;
        if report.files_started > 0 {
            tracing::info!(files = report.files_started, "uploaded {} files", report.files_started);
        }
        if report.failed > 0 {
            tracing::warn!(failed = report.failed, "some files could not be processed");
        }
        Ok(TickOutcome::Completed { report, summary })
    }

    /// Stops the ticker started by [`Scheduler::spawn`]. A cycle already
    /// running is allowed to finish before the ticker task returns.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Fires a tick every interval. Each cycle runs on its own task so a
    /// stuck cycle makes later ticks report busy instead of queueing up.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut current: Option<JoinHandle<()>> = None;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.shutdown.notified() => break,
                }
                if current.as_ref().is_some_and(|handle| !handle.is_finished()) {
                    tracing::debug!("previous sync cycle still running, skipping tick");
                    continue;
                }
                let scheduler = Arc::clone(&self);
                current = Some(tokio::spawn(async move {
                    if let Err(err) = scheduler.tick().await {
                        if err.is_transport() {
                            tracing::warn!(error = %err, "renter is unreachable, retrying next tick");
                        } else {
                            tracing::error!(error = %err, "sync cycle failed");
                        }
                    }
                }));
            }
            if let Some(handle) = current {
                if let Err(err) = handle.await {
                    tracing::warn!(error = %err, "sync cycle task ended abnormally");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::engine::SyncConfig;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_scheduler(base_url: &str, sync_root: PathBuf) -> Scheduler {
        let client = SiaClient::with_base_url(base_url).unwrap();
        let engine = ReconciliationEngine::new(client, SyncConfig::default());
        Scheduler::new(engine, sync_root, Duration::from_secs(10))
    }

    async fn mount_wallet(server: &MockServer, unlocked: bool) {
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "encrypted": true,
                "unlocked": unlocked
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn guard_is_exclusive_until_dropped() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = CycleGuard::try_acquire(&flag).unwrap();
        assert!(CycleGuard::try_acquire(&flag).is_none());
        drop(guard);
        assert!(CycleGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn toggle_pause_returns_new_state() {
        let dir = tempdir().unwrap();
        let scheduler = make_scheduler("http://localhost:9980", dir.path().to_path_buf());
        assert!(!scheduler.is_paused());
        assert!(scheduler.toggle_pause());
        assert!(scheduler.is_paused());
        assert!(!scheduler.toggle_pause());
    }

    #[tokio::test]
    async fn tick_runs_a_full_cycle() {
        let server = MockServer::start().await;
        mount_wallet(&server, true).await;
        Mock::given(method("GET"))
            .and(path("/consensus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "synced": true,
                "height": 5000
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/renter/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {
                        "siapath": "Sia/old.txt",
                        "filesize": 3,
                        "available": true,
                        "uploadprogress": 100,
                        "expiration": 9000
                    }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/renter/upload/Sia/new.txt"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), b"abc").unwrap();
        std::fs::write(dir.path().join("new.txt"), b"hello").unwrap();
        let scheduler = make_scheduler(&server.uri(), dir.path().to_path_buf());

        match scheduler.tick().await.unwrap() {
            TickOutcome::Completed { report, summary } => {
                assert_eq!(report.files_started, 1);
                assert_eq!(report.skipped, 1);
                assert_eq!(summary.files_total, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!scheduler.in_flight_flag().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn locked_wallet_skips_listing() {
        let server = MockServer::start().await;
        mount_wallet(&server, false).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/(renter/files|consensus)$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let scheduler = make_scheduler(&server.uri(), dir.path().to_path_buf());
        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Locked);
    }

    #[tokio::test]
    async fn paused_scheduler_makes_no_requests() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let scheduler =
            make_scheduler(&server.uri(), dir.path().to_path_buf()).with_paused(true);

        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Paused);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tick_is_skipped_while_a_cycle_is_in_flight() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let scheduler = make_scheduler(&server.uri(), dir.path().to_path_buf());
        let flag = scheduler.in_flight_flag();
        let _guard = CycleGuard::try_acquire(&flag).unwrap();

        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Busy);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_renter_aborts_tick_and_releases_guard() {
        let dir = tempdir().unwrap();
        let scheduler = make_scheduler("http://127.0.0.1:1", dir.path().to_path_buf());

        let err = scheduler.tick().await.unwrap_err();
        assert!(err.is_transport());
        assert!(!scheduler.in_flight_flag().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_running_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "encrypted": true, "unlocked": true }))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/consensus"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "synced": true, "height": 10 })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/renter/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let scheduler = Arc::new(make_scheduler(&server.uri(), dir.path().to_path_buf()));
        let handle = Arc::clone(&scheduler).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.in_flight_flag().load(Ordering::SeqCst));

        scheduler.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(!scheduler.in_flight_flag().load(Ordering::SeqCst));
        let listed = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .any(|request| request.url.path() == "/renter/files");
        assert!(listed);
    }
}
