//! # Sync Agent
//!
//! Main orchestrator for one kiosk. Owns the link monitor and the sync
//! loop, and is the entry point for capture.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncAgentHandle                             │  │
//! │  │  capture() · sync_now() · status() · rejected() · shutdown()     │  │
//! │  └───────────┬───────────────────────┬──────────────────────────────┘  │
//! │              │                       │                                  │
//! │              ▼                       ▼                                  │
//! │  ┌────────────────────┐   ┌────────────────────┐   ┌────────────────┐  │
//! │  │ TransactionCapture │   │    SyncEngine      │   │  LinkMonitor   │  │
//! │  │                    │   │                    │   │  (task)        │  │
//! │  │ validate, write    │   │ drain queue into   │◄──│ probe + auth   │  │
//! │  │ direct or enqueue  │   │ central ledger     │   │ BecameUp edge  │  │
//! │  └────────────────────┘   └─────────▲──────────┘   └────────────────┘  │
//! │                                     │                                   │
//! │                           ┌─────────┴──────────┐                        │
//! │                           │   sync loop (task) │                        │
//! │                           │ link up · interval │                        │
//! │                           │ · backoff retry    │                        │
//! │                           └────────────────────┘                        │
//! │                                                                         │
//! │  STATUS EVENTS (to the kiosk UI):                                       │
//! │  "sync://status"   - { link: "up", pending_count: 3, ... }              │
//! │  "sync://progress" - { pending: 0, synced: 3 }                          │
//! │  "sync://error"    - { message: "...", retryable: true }                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Strategy
//! A pass with transient failures schedules a retry with exponential
//! backoff (initial → max, doubling). A clean pass resets the backoff; the
//! link going down cancels any scheduled retry until it comes back up.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use kiosk_core::{CandidateTransaction, SyncState, TransactionRecord};
use kiosk_db::{Database, TransactionQueueRepository};

use crate::auth::{AuthProvider, StaticAuth};
use crate::capture::{CaptureReceipt, TransactionCapture};
use crate::config::SyncConfig;
use crate::engine::{SyncEngine, SyncPassOutcome, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::ledger::CentralLedger;
use crate::link::{LinkEvent, LinkMonitor, LinkState};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatus {
    /// Current link state.
    pub link: LinkState,

    /// Records waiting in the local queue (including rejected ones).
    pub pending_count: i64,

    /// Records the central ledger refused.
    pub rejected_count: i64,

    /// When the last pass completed.
    #[ts(as = "Option<String>")]
    pub last_sync: Option<DateTime<Utc>>,

    /// Counts from the last completed pass.
    pub last_report: Option<SyncReport>,

    /// Last error message (if any).
    pub last_error: Option<String>,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for emitting sync events to the kiosk UI.
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits a sync progress event.
    fn emit_progress(&self, pending: i64, synced: i64);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _pending: i64, _synced: i64) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the handle and the background tasks.
struct Shared {
    capture: TransactionCapture,
    engine: Arc<SyncEngine>,
    link: Arc<LinkMonitor>,
    queue: TransactionQueueRepository,
    status: RwLock<SyncStatus>,
    emitter: Arc<dyn SyncEventEmitter>,
    cancel: CancellationToken,
}

impl Shared {
    /// Runs one pass and publishes its result.
    async fn run_pass(&self) -> SyncResult<SyncPassOutcome> {
        let result = self.engine.run_pass(&self.cancel).await;

        let (pending, rejected) = self.queue_counts().await;
        let snapshot = {
            let mut s = self.status.write().await;
            s.link = self.link.state();
            s.pending_count = pending;
            s.rejected_count = rejected;
            match &result {
                Ok(SyncPassOutcome::Completed(report)) => {
                    s.last_sync = Some(Utc::now());
                    s.last_report = Some(report.clone());
                    s.last_error = None;
                }
                Ok(SyncPassOutcome::Coalesced) => {}
                Err(e) => s.last_error = Some(e.to_string()),
            }
            s.clone()
        };

        match &result {
            Ok(SyncPassOutcome::Completed(report)) => {
                self.emitter
                    .emit_progress(pending, i64::from(report.resolved()));
                for key in &report.stuck {
                    self.emitter.emit_error(
                        &format!("Transaction {} is still unsynced after repeated attempts", key),
                        true,
                    );
                }
                if report.rejected > 0 {
                    self.emitter.emit_error(
                        &format!("{} transaction(s) rejected by the central ledger", report.rejected),
                        false,
                    );
                }
            }
            Ok(SyncPassOutcome::Coalesced) => {}
            Err(e) => {
                error!(error = %e, "Sync pass failed");
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
            }
        }

        self.emitter.emit_status(&snapshot);
        result
    }

    async fn set_link(&self, link: LinkState) {
        let snapshot = {
            let mut s = self.status.write().await;
            s.link = link;
            s.clone()
        };
        self.emitter.emit_status(&snapshot);
    }

    async fn refresh_counts(&self) {
        let (pending, rejected) = self.queue_counts().await;
        let mut s = self.status.write().await;
        s.pending_count = pending;
        s.rejected_count = rejected;
    }

    async fn queue_counts(&self) -> (i64, i64) {
        let pending = match self.queue.count_pending().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Could not count pending transactions");
                0
            }
        };
        let rejected = match self.queue.list_rejected().await {
            Ok(records) => records.len() as i64,
            Err(e) => {
                warn!(error = %e, "Could not list rejected transactions");
                0
            }
        };
        (pending, rejected)
    }
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Main sync agent for one kiosk terminal.
pub struct SyncAgent {
    /// Sync configuration.
    config: Arc<SyncConfig>,

    /// Local database holding the queue.
    db: Database,

    /// Central ledger.
    ledger: Arc<dyn CentralLedger>,

    /// Session provider.
    auth: Arc<dyn AuthProvider>,

    /// Event emitter for UI notifications.
    emitter: Arc<dyn SyncEventEmitter>,
}

impl SyncAgent {
    /// Creates a new sync agent with a static session.
    pub fn new(config: SyncConfig, db: Database, ledger: Arc<dyn CentralLedger>) -> Self {
        let auth = Arc::new(StaticAuth::new(config.terminal_id()));
        Self::with_parts(config, db, ledger, auth, Arc::new(NoOpEmitter))
    }

    /// Creates a new sync agent from all of its parts.
    pub fn with_parts(
        config: SyncConfig,
        db: Database,
        ledger: Arc<dyn CentralLedger>,
        auth: Arc<dyn AuthProvider>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        SyncAgent {
            config: Arc::new(config),
            db,
            ledger,
            auth,
            emitter,
        }
    }

    /// Starts the link monitor and the sync loop.
    ///
    /// Records left IN_FLIGHT by a previous run are returned to PENDING
    /// before anything else touches the queue, and resolution log entries
    /// older than the retention window are pruned.
    pub async fn start(self) -> SyncResult<SyncAgentHandle> {
        self.config.validate()?;

        if self.auth.terminal_id() != self.config.terminal_id() {
            return Err(SyncError::InvalidConfig(format!(
                "auth provider is for terminal {}, config is for {}",
                self.auth.terminal_id(),
                self.config.terminal_id()
            )));
        }

        info!(
            terminal = %self.config.terminal_id(),
            currency = %self.config.currency(),
            "Starting sync agent"
        );

        let queue = self.db.queue();
        let recovered = queue.recover_in_flight().await?;
        if recovered > 0 {
            warn!(recovered, "Previous run was interrupted mid-sync");
        }
        queue
            .prune_resolutions(Utc::now() - self.config.resolution_retention())
            .await?;

        let link = Arc::new(
            LinkMonitor::new(&self.config, self.auth.clone(), self.ledger.clone())
                .with_queue(queue.clone()),
        );
        let engine = Arc::new(SyncEngine::new(&self.config, queue.clone(), self.ledger.clone()));
        let capture =
            TransactionCapture::new(&self.config, queue.clone(), self.ledger.clone(), link.watch());

        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            capture,
            engine,
            link: link.clone(),
            queue,
            status: RwLock::new(SyncStatus::default()),
            emitter: self.emitter.clone(),
            cancel: cancel.clone(),
        });
        shared.refresh_counts().await;

        // Subscribe before the monitor can publish its first edge.
        let events = link.subscribe();

        let link_task = tokio::spawn({
            let cancel = cancel.clone();
            async move { link.run(cancel).await }
        });
        let sync_task = tokio::spawn(sync_loop(
            shared.clone(),
            events,
            self.config.sync_interval(),
            retry_backoff(&self.config),
        ));

        info!("Sync agent started");

        Ok(SyncAgentHandle {
            shared,
            tasks: Arc::new(Mutex::new(vec![link_task, sync_task])),
        })
    }
}

fn retry_backoff(config: &SyncConfig) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: config.initial_backoff(),
        max_interval: config.max_backoff(),
        multiplier: 2.0,
        max_elapsed_time: None, // Retry while the link stays up
        ..Default::default()
    }
}

async fn sleep_until_retry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Triggers passes on link-up, on the interval and on scheduled retries.
async fn sync_loop(
    shared: Arc<Shared>,
    mut events: broadcast::Receiver<LinkEvent>,
    sync_interval: Duration,
    mut backoff: ExponentialBackoff,
) {
    let mut ticker = interval(sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut retry_at: Option<Instant> = None;

    loop {
        let trigger = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => "interval",
            _ = sleep_until_retry(retry_at) => "retry",
            event = events.recv() => match event {
                Ok(LinkEvent::BecameUp) => {
                    shared.set_link(LinkState::Up).await;
                    "link_up"
                }
                Ok(LinkEvent::BecameDown) => {
                    shared.set_link(LinkState::Down).await;
                    retry_at = None;
                    backoff.reset();
                    continue;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Link events lagged");
                    shared.set_link(shared.link.state()).await;
                    "lagged"
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if !shared.link.state().is_up() {
            debug!(trigger, "Link not up, skipping sync");
            continue;
        }

        retry_at = None;
        debug!(trigger, "Sync triggered");

        let needs_retry = match shared.run_pass().await {
            Ok(SyncPassOutcome::Completed(report)) => report.transient_failures() > 0,
            Ok(SyncPassOutcome::Coalesced) => false,
            Err(e) => e.is_retryable() || matches!(e, SyncError::Storage(_)),
        };

        if needs_retry {
            if let Some(delay) = backoff.next_backoff() {
                debug!(delay_ms = delay.as_millis() as u64, "Scheduling sync retry");
                retry_at = Some(Instant::now() + delay);
            }
        } else {
            backoff.reset();
        }
    }

    info!("Sync loop stopped");
}

// =============================================================================
// Agent Handle
// =============================================================================

/// Handle for controlling a running agent.
///
/// Cheap to clone; every clone controls the same agent.
#[derive(Clone)]
pub struct SyncAgentHandle {
    shared: Arc<Shared>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SyncAgentHandle {
    /// Captures a completed sale.
    pub async fn capture(&self, candidate: CandidateTransaction) -> SyncResult<CaptureReceipt> {
        if self.shared.cancel.is_cancelled() {
            return Err(SyncError::ShuttingDown);
        }

        let receipt = self.shared.capture.capture(candidate).await?;
        if receipt.outcome.is_queued() {
            self.shared.refresh_counts().await;
        }
        Ok(receipt)
    }

    /// Runs a pass now.
    ///
    /// Probes first if the link is not known to be up. Returns `LinkDown`
    /// when the probe fails, and `Coalesced` if a pass is already running.
    pub async fn sync_now(&self) -> SyncResult<SyncPassOutcome> {
        if self.shared.cancel.is_cancelled() {
            return Err(SyncError::ShuttingDown);
        }

        let mut link = self.shared.link.state();
        if !link.is_up() {
            link = self.shared.link.probe_once().await;
        }
        if !link.is_up() {
            info!("Manual sync requested while offline");
            return Err(SyncError::LinkDown);
        }

        self.shared.run_pass().await
    }

    /// Gets the current sync status.
    pub async fn status(&self) -> SyncStatus {
        let mut status = self.shared.status.read().await.clone();
        status.link = self.shared.link.state();
        status
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.link.state()
    }

    pub async fn pending_count(&self) -> SyncResult<i64> {
        Ok(self.shared.queue.count_pending().await?)
    }

    /// Records the central ledger refused, for operator review.
    pub async fn rejected(&self) -> SyncResult<Vec<TransactionRecord>> {
        Ok(self.shared.queue.list_rejected().await?)
    }

    /// Sync state of a captured sale known to this kiosk.
    pub async fn record_state(&self, key: &str) -> SyncResult<Option<SyncState>> {
        Ok(self.shared.queue.sync_state(key).await?)
    }

    /// The agent's engine, for registration with a fleet.
    pub fn engine(&self) -> Arc<SyncEngine> {
        self.shared.engine.clone()
    }

    /// Signals the agent to shut down and waits for its tasks.
    ///
    /// A pass in progress stops after the record it is pushing.
    pub async fn shutdown(&self) {
        info!("Shutting down sync agent");
        self.shared.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Sync task ended abnormally");
            }
        }

        info!("Sync agent stopped");
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating SyncAgent with options.
pub struct SyncAgentBuilder {
    config: SyncConfig,
    db: Option<Database>,
    ledger: Option<Arc<dyn CentralLedger>>,
    auth: Option<Arc<dyn AuthProvider>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            db: None,
            ledger: None,
            auth: None,
            emitter: None,
        }
    }

    /// Sets the local database.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the central ledger.
    pub fn with_ledger(mut self, ledger: Arc<dyn CentralLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Sets the session provider. Defaults to a static session.
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the SyncAgent.
    pub fn build(self) -> SyncResult<SyncAgent> {
        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let ledger = self
            .ledger
            .ok_or_else(|| SyncError::InvalidConfig("Central ledger required".into()))?;

        let terminal_id = self.config.terminal_id().to_string();
        let auth = self
            .auth
            .unwrap_or_else(|| Arc::new(StaticAuth::new(terminal_id)));
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncAgent::with_parts(self.config, db, ledger, auth, emitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureOutcome;
    use crate::ledger::SqliteLedger;
    use crate::testing::{candidate, offline_record, test_db};
    use kiosk_core::ResolvedOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingEmitter {
        statuses: AtomicUsize,
        progress: AtomicUsize,
        errors: AtomicUsize,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, _status: &SyncStatus) {
            self.statuses.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_progress(&self, _pending: i64, _synced: i64) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_error(&self, _message: &str, _retryable: bool) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> SyncConfig {
        let mut config = SyncConfig::for_terminal("kiosk-01");
        config.link.probe_interval_secs = 1;
        config.link.probe_timeout_ms = 500;
        config.sync.interval_secs = 60;
        config.sync.initial_backoff_ms = 100;
        config.sync.max_backoff_secs = 1;
        config
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check().await {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[test]
    fn test_sync_status_default() {
        let status = SyncStatus::default();
        assert_eq!(status.link, LinkState::Unknown);
        assert_eq!(status.pending_count, 0);
        assert!(status.last_report.is_none());
    }

    #[test]
    fn test_sync_status_json_shape() {
        let status = SyncStatus {
            link: LinkState::Down,
            pending_count: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["link"], "down");
        assert_eq!(json["pending_count"], 2);
        assert!(json["last_report"].is_null());
    }

    #[tokio::test]
    async fn test_builder_requires_ledger() {
        let db = test_db().await;
        let result = SyncAgentBuilder::new(fast_config()).with_database(db).build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_foreign_auth() {
        let db = test_db().await;
        let ledger = Arc::new(SqliteLedger::new(db.ledger()));
        let agent = SyncAgentBuilder::new(fast_config())
            .with_database(db)
            .with_ledger(ledger)
            .with_auth(Arc::new(StaticAuth::new("kiosk-02")))
            .build()
            .unwrap();

        assert!(matches!(agent.start().await, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_offline_sales_sync_after_reconnect() {
        let db = test_db().await;
        let ledger = Arc::new(SqliteLedger::new(db.ledger()));
        ledger.set_reachable(false);

        let handle = SyncAgent::new(fast_config(), db, ledger.clone())
            .start()
            .await
            .unwrap();
        let h = &handle;
        wait_for(|| async move { h.link_state() == LinkState::Down }).await;

        let mut keys = Vec::new();
        for _ in 0..3 {
            let receipt = handle.capture(candidate()).await.unwrap();
            assert_eq!(receipt.outcome, CaptureOutcome::QueuedOffline);
            keys.push(receipt.idempotency_key);
        }
        assert_eq!(handle.status().await.pending_count, 3);

        ledger.set_reachable(true);
        wait_for(|| async move { h.pending_count().await.unwrap() == 0 }).await;

        let entries = ledger.repository().list_entries().await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.synced_from_offline));
        for key in &keys {
            assert_eq!(handle.record_state(key).await.unwrap(), Some(SyncState::Synced));
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_now_while_offline_is_refused() {
        let db = test_db().await;
        let ledger = Arc::new(SqliteLedger::new(db.ledger()));
        ledger.set_reachable(false);

        let handle = SyncAgent::new(fast_config(), db, ledger).start().await.unwrap();

        assert!(matches!(handle.sync_now().await, Err(SyncError::LinkDown)));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_interrupted_pass_is_recovered_at_start() {
        let db = test_db().await;
        let queue = db.queue();
        queue.enqueue(&offline_record("kiosk-01", "k1")).await.unwrap();
        queue.mark_in_flight("k1").await.unwrap();

        let ledger = Arc::new(SqliteLedger::new(db.ledger()));
        ledger.set_reachable(false);
        let handle = SyncAgent::new(fast_config(), db, ledger).start().await.unwrap();

        assert_eq!(handle.record_state("k1").await.unwrap(), Some(SyncState::Pending));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_resolutions_are_pruned_at_start() {
        let db = test_db().await;
        let queue = db.queue();
        for key in ["old", "recent"] {
            queue.enqueue(&offline_record("kiosk-01", key)).await.unwrap();
            queue.mark_resolved(key, ResolvedOutcome::Synced).await.unwrap();
        }
        sqlx::query("UPDATE resolution_log SET resolved_at = ?1 WHERE idempotency_key = 'old'")
            .bind("2020-01-01T00:00:00.000000Z")
            .execute(db.pool())
            .await
            .unwrap();

        let ledger = Arc::new(SqliteLedger::new(db.ledger()));
        ledger.set_reachable(false);
        let handle = SyncAgent::new(fast_config(), db, ledger).start().await.unwrap();

        assert_eq!(handle.record_state("old").await.unwrap(), None);
        assert_eq!(handle.record_state("recent").await.unwrap(), Some(SyncState::Synced));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_sync_emits_progress() {
        let db = test_db().await;
        db.queue().enqueue(&offline_record("kiosk-01", "k1")).await.unwrap();
        let ledger = Arc::new(SqliteLedger::new(db.ledger()));
        let emitter = Arc::new(RecordingEmitter::default());

        let handle = SyncAgentBuilder::new(fast_config())
            .with_database(db)
            .with_ledger(ledger)
            .with_emitter(emitter.clone())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        handle.sync_now().await.unwrap();
        let (h, e) = (&handle, &emitter);
        wait_for(|| async move { h.pending_count().await.unwrap() == 0 }).await;
        wait_for(|| async move { e.progress.load(Ordering::SeqCst) > 0 }).await;

        let status = handle.status().await;
        assert_eq!(status.link, LinkState::Up);
        assert!(emitter.statuses.load(Ordering::SeqCst) > 0);
        assert_eq!(emitter.errors.load(Ordering::SeqCst), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_capture_after_shutdown_is_refused() {
        let db = test_db().await;
        let ledger = Arc::new(SqliteLedger::new(db.ledger()));
        let handle = SyncAgent::new(fast_config(), db, ledger).start().await.unwrap();

        handle.shutdown().await;

        assert!(matches!(
            handle.capture(candidate()).await,
            Err(SyncError::ShuttingDown)
        ));
    }
}
