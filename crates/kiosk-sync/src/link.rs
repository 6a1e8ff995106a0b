//! # Link Monitor
//!
//! Tracks whether the kiosk can currently reach the central ledger.
//!
//! ## State Machine
//! ```text
//!                 probe ok + authenticated
//!   ┌─────────┐ ─────────────────────────────► ┌──────┐
//!   │ UNKNOWN │                                │  UP  │
//!   └─────────┘ ─────────┐          ┌───────── └──────┘
//!                        │          │ probe failed,    ▲
//!       probe failed,    │          │ timed out or     │ probe ok +
//!       timed out or     ▼          ▼ logged out       │ authenticated
//!       logged out     ┌──────────────┐                │
//!                      │     DOWN     │ ───────────────┘
//!                      └──────────────┘
//! ```
//!
//! Session validity and reachability are folded into one fact: the link is
//! UP only when the kiosk is authenticated AND the last probe answered in
//! time. Every probe carries a [`Heartbeat`] so the central side sees the
//! kiosk's queue depth.
//!
//! Readers get the current state from a `watch` channel. Transitions are
//! also published as [`LinkEvent`]s on a broadcast channel; the sync loop
//! uses `BecameUp` to start draining the queue.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ts_rs::TS;

use kiosk_core::Heartbeat;
use kiosk_db::TransactionQueueRepository;

use crate::auth::AuthProvider;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::ledger::CentralLedger;

const EVENT_CAPACITY: usize = 16;

/// Connectivity to the central ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No probe has completed yet.
    #[default]
    Unknown,
    Up,
    Down,
}

impl LinkState {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Up)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Unknown => write!(f, "unknown"),
            LinkState::Up => write!(f, "up"),
            LinkState::Down => write!(f, "down"),
        }
    }
}

/// Edge published when the link state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    BecameUp,
    BecameDown,
}

/// Periodic prober owning the kiosk's link state.
pub struct LinkMonitor {
    auth: Arc<dyn AuthProvider>,
    ledger: Arc<dyn CentralLedger>,
    queue: Option<TransactionQueueRepository>,
    probe_interval: Duration,
    probe_timeout: Duration,
    state_tx: watch::Sender<LinkState>,
    events_tx: broadcast::Sender<LinkEvent>,
}

impl LinkMonitor {
    pub fn new(
        config: &SyncConfig,
        auth: Arc<dyn AuthProvider>,
        ledger: Arc<dyn CentralLedger>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Unknown);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        LinkMonitor {
            auth,
            ledger,
            queue: None,
            probe_interval: config.probe_interval(),
            probe_timeout: config.probe_timeout(),
            state_tx,
            events_tx,
        }
    }

    /// Reports the queue's depth and last sync time in heartbeats.
    pub fn with_queue(mut self, queue: TransactionQueueRepository) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Receiver that always holds the latest state.
    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Receiver for transition edges.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events_tx.subscribe()
    }

    /// Runs one probe and applies the result. Returns the new state.
    pub async fn probe_once(&self) -> LinkState {
        let next = match self.probe().await {
            Ok(()) => LinkState::Up,
            Err(e) => {
                debug!(error = %e, "Link probe failed");
                LinkState::Down
            }
        };
        self.apply(next);
        next
    }

    /// Probes every `probe_interval` until cancelled. The first probe runs
    /// immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_ms = self.probe_interval.as_millis() as u64,
            timeout_ms = self.probe_timeout.as_millis() as u64,
            "Link monitor started"
        );

        let mut ticker = interval(self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
            }
        }

        info!("Link monitor stopped");
    }

    async fn probe(&self) -> SyncResult<()> {
        let timeout_ms = self.probe_timeout.as_millis() as u64;

        timeout(self.probe_timeout, async {
            if !self.auth.is_authenticated().await {
                return Err(SyncError::AuthFailed("no valid session".into()));
            }
            let heartbeat = self.heartbeat().await;
            self.ledger.probe(&heartbeat).await
        })
        .await
        .map_err(|_| SyncError::Timeout(timeout_ms))?
    }

    async fn heartbeat(&self) -> Heartbeat {
        let (pending_count, last_synced_at) = match &self.queue {
            Some(queue) => {
                let pending = queue.count_pending().await.unwrap_or_else(|e| {
                    warn!(error = %e, "Could not count pending transactions");
                    0
                });
                let last = queue.last_resolved_at().await.unwrap_or_else(|e| {
                    warn!(error = %e, "Could not read last sync time");
                    None
                });
                (pending, last)
            }
            None => (0, None),
        };

        Heartbeat {
            terminal_id: self.auth.terminal_id().to_string(),
            pending_count,
            last_synced_at,
            sent_at: Utc::now(),
        }
    }

    fn apply(&self, next: LinkState) {
        let previous = self.state_tx.send_replace(next);
        if previous == next {
            return;
        }

        let event = match next {
            LinkState::Up => LinkEvent::BecameUp,
            LinkState::Down => LinkEvent::BecameDown,
            LinkState::Unknown => return,
        };

        match event {
            LinkEvent::BecameUp => info!(from = %previous, "Link up"),
            LinkEvent::BecameDown => warn!(from = %previous, "Link down"),
        }

        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::testing::{offline_record, test_db, ScriptedLedger};

    fn monitor(auth: Arc<StaticAuth>, ledger: Arc<ScriptedLedger>) -> LinkMonitor {
        let mut config = SyncConfig::for_terminal("kiosk-01");
        config.link.probe_interval_secs = 1;
        config.link.probe_timeout_ms = 200;
        LinkMonitor::new(&config, auth, ledger)
    }

    #[tokio::test]
    async fn test_starts_unknown_and_goes_up() {
        let ledger = Arc::new(ScriptedLedger::new());
        let link = monitor(Arc::new(StaticAuth::new("kiosk-01")), ledger.clone());
        let mut events = link.subscribe();

        assert_eq!(link.state(), LinkState::Unknown);
        assert_eq!(link.probe_once().await, LinkState::Up);
        assert_eq!(events.try_recv().unwrap(), LinkEvent::BecameUp);
        assert_eq!(ledger.probe_calls(), 1);

        // No edge when nothing changes.
        link.probe_once().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreachable_ledger_means_down() {
        let ledger = Arc::new(ScriptedLedger::new());
        let link = monitor(Arc::new(StaticAuth::new("kiosk-01")), ledger.clone());
        let mut events = link.subscribe();

        link.probe_once().await;
        ledger.set_unreachable(true);
        assert_eq!(link.probe_once().await, LinkState::Down);

        assert_eq!(events.try_recv().unwrap(), LinkEvent::BecameUp);
        assert_eq!(events.try_recv().unwrap(), LinkEvent::BecameDown);
    }

    #[tokio::test]
    async fn test_logged_out_kiosk_is_down_without_probing() {
        let auth = Arc::new(StaticAuth::new("kiosk-01"));
        let ledger = Arc::new(ScriptedLedger::new());
        let link = monitor(auth.clone(), ledger.clone());

        auth.set_authenticated(false);
        assert_eq!(link.probe_once().await, LinkState::Down);
        assert_eq!(ledger.probe_calls(), 0);

        auth.set_authenticated(true);
        assert_eq!(link.probe_once().await, LinkState::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out() {
        let ledger = Arc::new(ScriptedLedger::new());
        ledger.set_probe_delay(Duration::from_secs(5));
        let link = monitor(Arc::new(StaticAuth::new("kiosk-01")), ledger);

        assert_eq!(link.probe_once().await, LinkState::Down);
    }

    #[tokio::test]
    async fn test_heartbeat_reports_queue_depth() {
        let db = test_db().await;
        let queue = db.queue();
        queue.enqueue(&offline_record("kiosk-01", "k1")).await.unwrap();
        queue.enqueue(&offline_record("kiosk-01", "k2")).await.unwrap();

        let ledger = Arc::new(ScriptedLedger::new());
        let link = monitor(Arc::new(StaticAuth::new("kiosk-01")), ledger.clone()).with_queue(queue);
        link.probe_once().await;

        let heartbeat = ledger.last_heartbeat().unwrap();
        assert_eq!(heartbeat.terminal_id, "kiosk-01");
        assert_eq!(heartbeat.pending_count, 2);
        assert_eq!(heartbeat.last_synced_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probes_until_cancelled() {
        let ledger = Arc::new(ScriptedLedger::new());
        let link = Arc::new(monitor(Arc::new(StaticAuth::new("kiosk-01")), ledger.clone()));
        let mut state = link.watch();
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let link = link.clone();
            let cancel = cancel.clone();
            async move { link.run(cancel).await }
        });

        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), LinkState::Up);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(ledger.probe_calls() >= 3);

        cancel.cancel();
        task.await.unwrap();
    }
}
