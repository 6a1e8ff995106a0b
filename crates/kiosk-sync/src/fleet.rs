//! # Sync Fleet
//!
//! Registry of per-terminal sync engines, for hosts that run many kiosks
//! (a store back-office or a test rig).
//!
//! ```text
//!   SyncFleet ── sync_all() ──┬── kiosk-01 engine ── pass ──┐
//!                             ├── kiosk-02 engine ── pass ──┼── join_all
//!                             └── kiosk-03 engine ── pass ──┘
//! ```
//!
//! Terminals never share a lock: each engine guards only its own passes,
//! so one slow kiosk does not hold up the others.

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{SyncEngine, SyncPassOutcome};
use crate::error::SyncResult;

#[derive(Default)]
pub struct SyncFleet {
    engines: RwLock<HashMap<String, Arc<SyncEngine>>>,
}

impl SyncFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an engine under its terminal id, replacing any previous one.
    pub async fn register(&self, engine: Arc<SyncEngine>) {
        let terminal_id = engine.terminal_id().to_string();
        let previous = self
            .engines
            .write()
            .await
            .insert(terminal_id.clone(), engine);
        if previous.is_some() {
            warn!(terminal = %terminal_id, "Replaced registered sync engine");
        } else {
            info!(terminal = %terminal_id, "Sync engine registered");
        }
    }

    pub async fn unregister(&self, terminal_id: &str) -> bool {
        self.engines.write().await.remove(terminal_id).is_some()
    }

    /// Registered terminal ids, sorted.
    pub async fn terminals(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Runs one pass on the given terminal. `None` if it is not registered.
    pub async fn sync_terminal(
        &self,
        terminal_id: &str,
        cancel: &CancellationToken,
    ) -> Option<SyncResult<SyncPassOutcome>> {
        let engine = self.engines.read().await.get(terminal_id).cloned()?;
        Some(engine.run_pass(cancel).await)
    }

    /// Runs one pass on every registered terminal concurrently.
    ///
    /// Results are sorted by terminal id.
    pub async fn sync_all(
        &self,
        cancel: &CancellationToken,
    ) -> Vec<(String, SyncResult<SyncPassOutcome>)> {
        // Release the registry before any pass starts.
        let engines: Vec<Arc<SyncEngine>> = self.engines.read().await.values().cloned().collect();

        let mut results = join_all(engines.into_iter().map(|engine| async move {
            let result = engine.run_pass(cancel).await;
            (engine.terminal_id().to_string(), result)
        }))
        .await;

        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::engine::SyncReport;
    use crate::testing::{offline_record, test_db, ScriptedLedger};
    use std::time::Duration;

    async fn engine_with(
        terminal_id: &str,
        keys: &[&str],
        ledger: Arc<ScriptedLedger>,
    ) -> Arc<SyncEngine> {
        let db = test_db().await;
        let queue = db.queue();
        for key in keys {
            queue.enqueue(&offline_record(terminal_id, key)).await.unwrap();
        }
        Arc::new(SyncEngine::new(&SyncConfig::for_terminal(terminal_id), queue, ledger))
    }

    fn completed(result: &SyncResult<SyncPassOutcome>) -> SyncReport {
        match result {
            Ok(SyncPassOutcome::Completed(report)) => report.clone(),
            other => panic!("expected completed pass, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registry() {
        let fleet = SyncFleet::new();
        let ledger = Arc::new(ScriptedLedger::new());
        fleet.register(engine_with("kiosk-02", &[], ledger.clone()).await).await;
        fleet.register(engine_with("kiosk-01", &[], ledger.clone()).await).await;

        assert_eq!(fleet.terminals().await, vec!["kiosk-01", "kiosk-02"]);
        assert!(fleet.unregister("kiosk-02").await);
        assert!(!fleet.unregister("kiosk-02").await);
        assert!(fleet
            .sync_terminal("kiosk-02", &CancellationToken::new())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_sync_all_runs_every_terminal() {
        let fleet = SyncFleet::new();
        let ledger = Arc::new(ScriptedLedger::new());
        fleet.register(engine_with("kiosk-01", &["a1", "a2"], ledger.clone()).await).await;
        fleet.register(engine_with("kiosk-02", &["b1"], ledger.clone()).await).await;

        let results = fleet.sync_all(&CancellationToken::new()).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "kiosk-01");
        assert_eq!(completed(&results[0].1).pushed, 2);
        assert_eq!(completed(&results[1].1).pushed, 1);
        assert_eq!(ledger.entry_count(), 3);
    }

    #[tokio::test]
    async fn test_terminals_sync_in_parallel() {
        let fleet = SyncFleet::new();
        let ledger = Arc::new(ScriptedLedger::new());
        ledger.set_insert_delay(Duration::from_millis(300));
        for (terminal, key) in [("kiosk-01", "a1"), ("kiosk-02", "b1"), ("kiosk-03", "c1")] {
            fleet.register(engine_with(terminal, &[key], ledger.clone()).await).await;
        }

        let started = tokio::time::Instant::now();
        let results = fleet.sync_all(&CancellationToken::new()).await;

        assert!(results.iter().all(|(_, r)| completed(r).pushed == 1));
        assert!(started.elapsed() < Duration::from_millis(800));
    }
}
