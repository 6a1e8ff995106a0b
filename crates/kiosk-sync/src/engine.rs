//! # Sync Engine
//!
//! Drains the local queue into the central ledger.
//!
//! ## One Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. try to take the pass guard ───── held ──► Coalesced (no work)       │
//! │  2. snapshot the queue, oldest first                                    │
//! │  3. for each record:                                                    │
//! │       cancelled? ──► stop, report so far                                │
//! │       claim IN_FLIGHT ── not claimable ──► skip                         │
//! │       ledger.insert(record, Queued)  (bounded by push timeout)          │
//! │         Accepted       ──► resolve SYNCED     pushed     += 1           │
//! │         AlreadyExists  ──► resolve DUPLICATE  duplicates += 1           │
//! │         Rejected       ──► FAILED, kept       failed     += 1           │
//! │         Unreachable    ──► back to PENDING    failed     += 1           │
//! │  4. report { pushed, duplicates, failed }                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failure on one record never stops the pass; the next record is still
//! attempted. Records captured while a pass runs are picked up by the next
//! pass. At most one pass runs per engine at a time; a trigger that arrives
//! while a pass is running is coalesced into it. Engines sharing one queue
//! never push the same record twice: a record is pushed only by the pass
//! that claimed it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ts_rs::TS;

use kiosk_core::{ResolvedOutcome, TransactionRecord, WriteOrigin};
use kiosk_db::TransactionQueueRepository;

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::ledger::{CentralLedger, InsertOutcome};

/// Counts from one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncReport {
    /// Newly stored in the central ledger.
    pub pushed: u32,
    /// Already present centrally; resolved as duplicates.
    pub duplicates: u32,
    /// Not resolved this pass (rejected or unreachable).
    pub failed: u32,
    /// Subset of `failed` the ledger refused outright.
    pub rejected: u32,
    /// The pass stopped early on cancellation.
    pub cancelled: bool,
    /// Keys whose attempt count reached the alert threshold.
    pub stuck: Vec<String>,
}

impl SyncReport {
    /// Records that failed for reasons that may clear on retry.
    pub fn transient_failures(&self) -> u32 {
        self.failed.saturating_sub(self.rejected)
    }

    pub fn resolved(&self) -> u32 {
        self.pushed + self.duplicates
    }
}

/// Result of asking the engine for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPassOutcome {
    Completed(SyncReport),
    /// Another pass was already running and will cover this request.
    Coalesced,
}

/// Pushes one kiosk's queued sales to the central ledger.
pub struct SyncEngine {
    terminal_id: String,
    queue: TransactionQueueRepository,
    ledger: Arc<dyn CentralLedger>,
    push_timeout: Duration,
    alert_after_attempts: i64,
    pass_guard: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        queue: TransactionQueueRepository,
        ledger: Arc<dyn CentralLedger>,
    ) -> Self {
        SyncEngine {
            terminal_id: config.terminal_id().to_string(),
            queue,
            ledger,
            push_timeout: config.push_timeout(),
            alert_after_attempts: config.sync.alert_after_attempts,
            pass_guard: Mutex::new(()),
        }
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    /// Runs one pass over the queue.
    ///
    /// Storage errors abort the pass; ledger failures never do.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> SyncResult<SyncPassOutcome> {
        let _guard = match self.pass_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(terminal = %self.terminal_id, "Sync pass already running, coalescing");
                return Ok(SyncPassOutcome::Coalesced);
            }
        };

        let pending = self.queue.list_pending().await?;
        if pending.is_empty() {
            debug!(terminal = %self.terminal_id, "Nothing to sync");
            return Ok(SyncPassOutcome::Completed(SyncReport::default()));
        }

        info!(
            terminal = %self.terminal_id,
            count = pending.len(),
            "Sync pass started"
        );

        let mut report = SyncReport::default();

        for record in pending {
            if cancel.is_cancelled() {
                info!(terminal = %self.terminal_id, "Sync pass cancelled");
                report.cancelled = true;
                break;
            }

            self.push(&record, &mut report).await?;
        }

        info!(
            terminal = %self.terminal_id,
            pushed = report.pushed,
            duplicates = report.duplicates,
            failed = report.failed,
            "Sync pass finished"
        );

        Ok(SyncPassOutcome::Completed(report))
    }

    async fn push(&self, record: &TransactionRecord, report: &mut SyncReport) -> SyncResult<()> {
        let key = record.idempotency_key.as_str();
        if !self.queue.mark_in_flight(key).await? {
            debug!(key, "Claimed by another pass");
            return Ok(());
        }

        let push = self.ledger.insert(record, WriteOrigin::Queued);
        let outcome = match timeout(self.push_timeout, push).await {
            Ok(outcome) => outcome,
            Err(_) => InsertOutcome::Unreachable(format!(
                "push timed out after {} ms",
                self.push_timeout.as_millis()
            )),
        };

        match outcome {
            InsertOutcome::Accepted => {
                self.queue.mark_resolved(key, ResolvedOutcome::Synced).await?;
                debug!(key, "Pushed");
                report.pushed += 1;
            }
            InsertOutcome::AlreadyExists => {
                self.queue.mark_resolved(key, ResolvedOutcome::Duplicate).await?;
                debug!(key, "Already in ledger");
                report.duplicates += 1;
            }
            InsertOutcome::Rejected(reason) => {
                let updated = self.queue.mark_rejected(key, &reason).await?;
                warn!(
                    key,
                    reason = %reason,
                    attempts = updated.attempt_count,
                    "Ledger rejected transaction"
                );
                report.failed += 1;
                report.rejected += 1;
                self.check_stuck(&updated, report);
            }
            InsertOutcome::Unreachable(reason) => {
                let updated = self.queue.mark_failed(key, &reason).await?;
                debug!(key, reason = %reason, attempts = updated.attempt_count, "Push failed");
                report.failed += 1;
                self.check_stuck(&updated, report);
            }
        }

        Ok(())
    }

    fn check_stuck(&self, record: &TransactionRecord, report: &mut SyncReport) {
        if record.attempt_count >= self.alert_after_attempts {
            warn!(
                key = %record.idempotency_key,
                attempts = record.attempt_count,
                last_error = record.last_error.as_deref().unwrap_or(""),
                "Transaction still unsynced"
            );
            report.stuck.push(record.idempotency_key.clone());
        }
    }
}
