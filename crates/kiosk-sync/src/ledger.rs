//! # Central Ledger Interface
//!
//! The central store of record. Kiosks write to it directly while online
//! and push their queue to it after an outage.
//!
//! ## Contract
//! ```text
//! insert(record, origin)
//!   ├── Accepted          stored for the first time
//!   ├── AlreadyExists     idempotency key already present (safe replay)
//!   ├── Rejected(reason)  record is malformed; retrying will not help
//!   └── Unreachable(why)  transient; try again later
//!
//! probe(heartbeat)       liveness check carrying the kiosk's queue depth
//! ```
//!
//! Inserting the same idempotency key twice never creates a second entry.
//! The ledger never validates against kiosk-local state.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use kiosk_core::validation::verify_record;
use kiosk_core::{Heartbeat, TransactionRecord, WriteOrigin};
use kiosk_db::{LedgerInsert, LedgerRepository};

use crate::error::{SyncError, SyncResult};

/// Result of a ledger insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Accepted,
    AlreadyExists,
    Rejected(String),
    Unreachable(String),
}

/// The central ledger as seen from a kiosk.
#[async_trait]
pub trait CentralLedger: Send + Sync {
    /// Idempotent insert keyed by `record.idempotency_key`.
    async fn insert(&self, record: &TransactionRecord, origin: WriteOrigin) -> InsertOutcome;

    /// Liveness probe. Records the heartbeat on success.
    async fn probe(&self, heartbeat: &Heartbeat) -> SyncResult<()>;
}

// =============================================================================
// SQLite-backed Ledger
// =============================================================================

/// Ledger backed by the `ledger_entries` table.
///
/// Can be taken offline for maintenance, in which case every call answers
/// as unreachable.
pub struct SqliteLedger {
    repo: LedgerRepository,
    reachable: AtomicBool,
}

impl SqliteLedger {
    pub fn new(repo: LedgerRepository) -> Self {
        SqliteLedger {
            repo,
            reachable: AtomicBool::new(true),
        }
    }

    /// Puts the ledger in or out of maintenance.
    pub fn set_reachable(&self, reachable: bool) {
        let was = self.reachable.swap(reachable, Ordering::SeqCst);
        if was != reachable {
            debug!(reachable, "Central ledger availability changed");
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Read access for dashboards.
    pub fn repository(&self) -> &LedgerRepository {
        &self.repo
    }
}

#[async_trait]
impl CentralLedger for SqliteLedger {
    async fn insert(&self, record: &TransactionRecord, origin: WriteOrigin) -> InsertOutcome {
        if !self.is_reachable() {
            return InsertOutcome::Unreachable("ledger in maintenance".into());
        }

        if let Err(e) = verify_record(record) {
            warn!(key = %record.idempotency_key, error = %e, "Ledger rejected record");
            return InsertOutcome::Rejected(e.to_string());
        }

        match self.repo.insert(record, origin.is_from_offline()).await {
            Ok(LedgerInsert::Inserted) => InsertOutcome::Accepted,
            Ok(LedgerInsert::AlreadyExists) => InsertOutcome::AlreadyExists,
            Err(e) => {
                warn!(key = %record.idempotency_key, error = %e, "Ledger storage failed");
                InsertOutcome::Unreachable(e.to_string())
            }
        }
    }

    async fn probe(&self, heartbeat: &Heartbeat) -> SyncResult<()> {
        if !self.is_reachable() {
            return Err(SyncError::Unreachable("ledger in maintenance".into()));
        }

        self.repo
            .record_heartbeat(heartbeat, Utc::now())
            .await
            .map_err(|e| SyncError::Unreachable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{offline_record, test_db};

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let db = test_db().await;
        let ledger = SqliteLedger::new(db.ledger());
        let record = offline_record("kiosk-01", "key-1");

        assert_eq!(ledger.insert(&record, WriteOrigin::Queued).await, InsertOutcome::Accepted);
        assert_eq!(
            ledger.insert(&record, WriteOrigin::Direct).await,
            InsertOutcome::AlreadyExists
        );

        let entries = ledger.repository().list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].synced_from_offline);
    }

    #[tokio::test]
    async fn test_insert_rejects_inconsistent_total() {
        let db = test_db().await;
        let ledger = SqliteLedger::new(db.ledger());
        let mut record = offline_record("kiosk-01", "key-1");
        record.total_amount = record.total_amount + kiosk_core::Money::from_minor(1);

        assert!(matches!(
            ledger.insert(&record, WriteOrigin::Queued).await,
            InsertOutcome::Rejected(_)
        ));
        assert!(ledger.repository().list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_makes_ledger_unreachable() {
        let db = test_db().await;
        let ledger = SqliteLedger::new(db.ledger());
        ledger.set_reachable(false);

        let record = offline_record("kiosk-01", "key-1");
        assert!(matches!(
            ledger.insert(&record, WriteOrigin::Queued).await,
            InsertOutcome::Unreachable(_)
        ));

        let heartbeat = Heartbeat {
            terminal_id: "kiosk-01".into(),
            pending_count: 1,
            last_synced_at: None,
            sent_at: Utc::now(),
        };
        assert!(matches!(
            ledger.probe(&heartbeat).await,
            Err(SyncError::Unreachable(_))
        ));

        ledger.set_reachable(true);
        ledger.probe(&heartbeat).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_stamps_central_receive_time() {
        let db = test_db().await;
        let ledger = SqliteLedger::new(db.ledger());
        let heartbeat = Heartbeat {
            terminal_id: "kiosk-01".into(),
            pending_count: 0,
            last_synced_at: None,
            sent_at: Utc::now() - chrono::Duration::hours(3),
        };

        let before = Utc::now();
        ledger.probe(&heartbeat).await.unwrap();

        let kiosks = ledger.repository().kiosk_metrics(Utc::now()).await.unwrap();
        assert_eq!(kiosks[0].status, kiosk_core::KioskStatus::Online);
        assert!(kiosks[0].last_heartbeat_at.unwrap() >= before - chrono::Duration::milliseconds(1));
    }
}
