//! # Transaction Capture
//!
//! Entry point for a completed sale at the kiosk.
//!
//! ## Flow
//! ```text
//! CandidateTransaction
//!        │
//!        ▼
//!  validate + recompute total ──── invalid ───► Err(InvalidTransaction)
//!        │                                      (nothing stored or sent)
//!        ▼
//!  assign idempotency key
//!        │
//!        ├── link UP ──► ledger.insert(Direct) ─── accepted / exists ──► WrittenDirect
//!        │                      │
//!        │                      └── rejected / unreachable / timeout
//!        │                                     │
//!        │                                     ▼
//!        │                              enqueue ──────────────────────► QueuedAfterDirectFailure
//!        │
//!        └── link DOWN / UNKNOWN ──► enqueue ─────────────────────────► QueuedOffline
//! ```
//!
//! Capture never blocks on connectivity longer than the direct-write
//! timeout, and a sale that passed validation is never lost: it is either
//! in the central ledger or durably queued before `capture` returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use kiosk_core::validation::{validate_idempotency_key, validate_transaction};
use kiosk_core::{
    new_idempotency_key, CandidateTransaction, CoreError, Money, TransactionRecord, WriteOrigin,
};
use kiosk_db::TransactionQueueRepository;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::ledger::{CentralLedger, InsertOutcome};
use crate::link::LinkState;

/// Where a captured sale ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// Stored in the central ledger.
    WrittenDirect,
    /// Link was up but the direct write failed; queued for sync.
    QueuedAfterDirectFailure,
    /// Link was not up; queued for sync.
    QueuedOffline,
    /// The caller's idempotency key is already known on this kiosk.
    AlreadyCaptured,
}

impl CaptureOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            CaptureOutcome::QueuedAfterDirectFailure | CaptureOutcome::QueuedOffline
        )
    }
}

/// Returned to the kiosk UI after capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CaptureReceipt {
    pub idempotency_key: String,
    pub outcome: CaptureOutcome,
    /// Total recomputed from the lines.
    pub total_amount: Money,
    #[ts(as = "String")]
    pub captured_at: DateTime<Utc>,
}

/// Validates sales and routes them to the ledger or the local queue.
pub struct TransactionCapture {
    terminal_id: String,
    currency: String,
    direct_write_timeout: Duration,
    queue: TransactionQueueRepository,
    ledger: Arc<dyn CentralLedger>,
    link: watch::Receiver<LinkState>,
}

impl TransactionCapture {
    pub fn new(
        config: &SyncConfig,
        queue: TransactionQueueRepository,
        ledger: Arc<dyn CentralLedger>,
        link: watch::Receiver<LinkState>,
    ) -> Self {
        TransactionCapture {
            terminal_id: config.terminal_id().to_string(),
            currency: config.currency().to_string(),
            direct_write_timeout: config.direct_write_timeout(),
            queue,
            ledger,
            link,
        }
    }

    /// Captures a completed sale.
    ///
    /// ## Errors
    /// - `InvalidTransaction` if the candidate fails validation
    /// - `Storage` if the local queue cannot be written
    pub async fn capture(&self, candidate: CandidateTransaction) -> SyncResult<CaptureReceipt> {
        let total = validate_transaction(&candidate.currency, &candidate.lines, &self.currency)?;

        if let Some(claimed) = candidate.claimed_total {
            if claimed != total {
                warn!(
                    claimed = %claimed,
                    computed = %total,
                    "Claimed total differs from line sum, using computed total"
                );
            }
        }

        let key = match candidate.idempotency_key {
            Some(key) => {
                validate_idempotency_key(&key).map_err(CoreError::from)?;
                if self.queue.sync_state(&key).await?.is_some() {
                    debug!(key = %key, "Idempotency key already captured");
                    return Ok(self.receipt(key, CaptureOutcome::AlreadyCaptured, total, Utc::now()));
                }
                key
            }
            None => new_idempotency_key(),
        };

        let record = TransactionRecord::pending(
            key,
            &self.terminal_id,
            candidate.currency,
            candidate.payment_method,
            candidate.lines,
            total,
            Utc::now(),
        );

        let link = *self.link.borrow();
        if !link.is_up() {
            let outcome = self.enqueue(&record, CaptureOutcome::QueuedOffline).await?;
            return Ok(self.receipt_for(&record, outcome));
        }

        let outcome = match self.write_direct(&record).await {
            Ok(()) => {
                info!(
                    key = %record.idempotency_key,
                    total = %record.total_amount,
                    "Sale written to central ledger"
                );
                CaptureOutcome::WrittenDirect
            }
            Err(reason) => {
                warn!(
                    key = %record.idempotency_key,
                    reason = %reason,
                    "Direct write failed, queueing sale"
                );
                self.enqueue(&record, CaptureOutcome::QueuedAfterDirectFailure)
                    .await?
            }
        };

        Ok(self.receipt_for(&record, outcome))
    }

    async fn write_direct(&self, record: &TransactionRecord) -> Result<(), String> {
        match timeout(
            self.direct_write_timeout,
            self.ledger.insert(record, WriteOrigin::Direct),
        )
        .await
        {
            Ok(InsertOutcome::Accepted) | Ok(InsertOutcome::AlreadyExists) => Ok(()),
            Ok(InsertOutcome::Rejected(reason)) => Err(format!("rejected: {}", reason)),
            Ok(InsertOutcome::Unreachable(reason)) => Err(format!("unreachable: {}", reason)),
            Err(_) => Err(format!(
                "timed out after {} ms",
                self.direct_write_timeout.as_millis()
            )),
        }
    }

    async fn enqueue(
        &self,
        record: &TransactionRecord,
        outcome: CaptureOutcome,
    ) -> SyncResult<CaptureOutcome> {
        match self.queue.enqueue(record).await {
            Ok(_) => {
                info!(
                    key = %record.idempotency_key,
                    total = %record.total_amount,
                    outcome = ?outcome,
                    "Sale queued for sync"
                );
                Ok(outcome)
            }
            Err(e) if e.is_duplicate_key() => {
                debug!(key = %record.idempotency_key, "Sale already queued or resolved");
                Ok(CaptureOutcome::AlreadyCaptured)
            }
            Err(e) => {
                error!(key = %record.idempotency_key, error = %e, "Failed to queue sale");
                Err(SyncError::Storage(e))
            }
        }
    }

    fn receipt_for(&self, record: &TransactionRecord, outcome: CaptureOutcome) -> CaptureReceipt {
        self.receipt(
            record.idempotency_key.clone(),
            outcome,
            record.total_amount,
            record.captured_at,
        )
    }

    fn receipt(
        &self,
        idempotency_key: String,
        outcome: CaptureOutcome,
        total_amount: Money,
        captured_at: DateTime<Utc>,
    ) -> CaptureReceipt {
        CaptureReceipt {
            idempotency_key,
            outcome,
            total_amount,
            captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, test_db, ScriptedLedger};
    use kiosk_core::{SyncState, TransactionLine};

    struct Fixture {
        capture: TransactionCapture,
        queue: TransactionQueueRepository,
        ledger: Arc<ScriptedLedger>,
        link: watch::Sender<LinkState>,
    }

    async fn fixture(link: LinkState) -> Fixture {
        let db = test_db().await;
        let queue = db.queue();
        let ledger = Arc::new(ScriptedLedger::new());
        let (link_tx, link_rx) = watch::channel(link);

        let mut config = SyncConfig::for_terminal("kiosk-01");
        config.capture.direct_write_timeout_ms = 200;

        let capture = TransactionCapture::new(&config, queue.clone(), ledger.clone(), link_rx);
        Fixture {
            capture,
            queue,
            ledger,
            link: link_tx,
        }
    }

    #[tokio::test]
    async fn test_online_capture_writes_direct() {
        let f = fixture(LinkState::Up).await;

        let receipt = f.capture.capture(candidate()).await.unwrap();

        assert_eq!(receipt.outcome, CaptureOutcome::WrittenDirect);
        assert_eq!(receipt.total_amount, Money::from_minor(13000));
        assert_eq!(f.ledger.origin_of(&receipt.idempotency_key), Some(WriteOrigin::Direct));
        assert_eq!(f.queue.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_capture_queues_without_contacting_ledger() {
        let f = fixture(LinkState::Down).await;

        let receipt = f.capture.capture(candidate()).await.unwrap();

        assert_eq!(receipt.outcome, CaptureOutcome::QueuedOffline);
        assert_eq!(f.ledger.insert_calls(), 0);
        assert_eq!(
            f.queue.sync_state(&receipt.idempotency_key).await.unwrap(),
            Some(SyncState::Pending)
        );
    }

    #[tokio::test]
    async fn test_unknown_link_counts_as_offline() {
        let f = fixture(LinkState::Unknown).await;
        let receipt = f.capture.capture(candidate()).await.unwrap();
        assert_eq!(receipt.outcome, CaptureOutcome::QueuedOffline);
    }

    #[tokio::test]
    async fn test_failed_direct_write_falls_back_to_queue() {
        let f = fixture(LinkState::Up).await;
        f.ledger.set_unreachable(true);

        let receipt = f.capture.capture(candidate()).await.unwrap();

        assert_eq!(receipt.outcome, CaptureOutcome::QueuedAfterDirectFailure);
        assert_eq!(f.queue.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_slow_direct_write_falls_back_to_queue() {
        let f = fixture(LinkState::Up).await;
        f.ledger.set_insert_delay(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        let receipt = f.capture.capture(candidate()).await.unwrap();

        assert_eq!(receipt.outcome, CaptureOutcome::QueuedAfterDirectFailure);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(f.queue.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejected_direct_write_is_queued() {
        let f = fixture(LinkState::Up).await;
        let mut sale = candidate();
        sale.idempotency_key = Some("sale-rejected".into());
        f.ledger
            .script("sale-rejected", InsertOutcome::Rejected("bad sku".into()));

        let receipt = f.capture.capture(sale).await.unwrap();

        assert_eq!(receipt.outcome, CaptureOutcome::QueuedAfterDirectFailure);
        assert!(!f.ledger.contains("sale-rejected"));
    }

    #[tokio::test]
    async fn test_invalid_candidate_is_not_stored() {
        let f = fixture(LinkState::Up).await;

        let mut empty = candidate();
        empty.lines.clear();
        assert!(matches!(
            f.capture.capture(empty).await,
            Err(SyncError::InvalidTransaction(CoreError::EmptyTransaction))
        ));

        let mut bad_quantity = candidate();
        bad_quantity.lines[0].quantity = 0;
        assert!(matches!(
            f.capture.capture(bad_quantity).await,
            Err(SyncError::InvalidTransaction(CoreError::InvalidLine { index: 0, .. }))
        ));

        let mut too_many = candidate();
        too_many.lines = (0..101)
            .map(|i| TransactionLine {
                sku: format!("SKU-{}", i),
                name: "Item".into(),
                unit_price: Money::from_minor(100),
                quantity: 1,
            })
            .collect();
        assert!(matches!(
            f.capture.capture(too_many).await,
            Err(SyncError::InvalidTransaction(CoreError::TooManyLines { .. }))
        ));

        let mut foreign = candidate();
        foreign.currency = "EUR".into();
        assert!(matches!(
            f.capture.capture(foreign).await,
            Err(SyncError::InvalidTransaction(CoreError::CurrencyMismatch { .. }))
        ));

        assert_eq!(f.ledger.insert_calls(), 0);
        assert_eq!(f.queue.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claimed_total_is_replaced_by_computed_total() {
        let f = fixture(LinkState::Down).await;
        let mut sale = candidate();
        sale.claimed_total = Some(Money::from_minor(1));

        let receipt = f.capture.capture(sale).await.unwrap();
        let stored = f.queue.get(&receipt.idempotency_key).await.unwrap().unwrap();

        assert_eq!(receipt.total_amount, Money::from_minor(13000));
        assert_eq!(stored.total_amount, Money::from_minor(13000));
    }

    #[tokio::test]
    async fn test_repeated_caller_key_is_captured_once() {
        let f = fixture(LinkState::Down).await;
        let mut sale = candidate();
        sale.idempotency_key = Some("register-42".into());

        let first = f.capture.capture(sale.clone()).await.unwrap();
        let second = f.capture.capture(sale).await.unwrap();

        assert_eq!(first.outcome, CaptureOutcome::QueuedOffline);
        assert_eq!(second.outcome, CaptureOutcome::AlreadyCaptured);
        assert_eq!(second.idempotency_key, "register-42");
        assert_eq!(f.queue.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_generated_keys_are_unique() {
        let f = fixture(LinkState::Down).await;

        let a = f.capture.capture(candidate()).await.unwrap();
        let b = f.capture.capture(candidate()).await.unwrap();

        assert_ne!(a.idempotency_key, b.idempotency_key);
        assert_eq!(f.queue.count_pending().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_follows_link_changes() {
        let f = fixture(LinkState::Down).await;
        let offline = f.capture.capture(candidate()).await.unwrap();

        f.link.send_replace(LinkState::Up);
        let online = f.capture.capture(candidate()).await.unwrap();

        assert_eq!(offline.outcome, CaptureOutcome::QueuedOffline);
        assert_eq!(online.outcome, CaptureOutcome::WrittenDirect);
    }
}
