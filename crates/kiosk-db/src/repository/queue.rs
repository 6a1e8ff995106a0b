//! # Transaction Queue Repository
//!
//! Durable local queue of captured sales awaiting the central ledger.
//!
//! ## Record Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Queue Transitions (all atomic)                       │
//! │                                                                         │
//! │  enqueue ─────────► pending ◄──────────── mark_failed (+1 attempt)     │
//! │                       │  ▲                     ▲                        │
//! │        mark_in_flight │  │ recover_in_flight   │ unreachable/timeout   │
//! │                       ▼  │ (startup)           │                        │
//! │                     in_flight ─────────────────┘                        │
//! │                       │   │                                             │
//! │                       │   └──► failed  mark_rejected (+1, retained)    │
//! │                       ▼                                                 │
//! │  mark_resolved (+1) ──► synced | duplicate                              │
//! │       ┌─────────────────────────────────────────────────────────┐      │
//! │       │ SINGLE TRANSACTION                                      │      │
//! │       │  1. UPDATE transaction_queue ... RETURNING              │      │
//! │       │  2. INSERT INTO resolution_log                          │      │
//! │       │  3. DELETE FROM transaction_queue                       │      │
//! │       └─────────────────────────────────────────────────────────┘      │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • One row per idempotency key (UNIQUE + resolution log check)         │
//! │  • A row is deleted only together with its resolution log entry        │
//! │  • Nothing ever expires a queued row                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation is either a single statement or a write-first SQLite
//! transaction, so a concurrent reader sees the record before or after a
//! transition, never in between.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use kiosk_core::{
    PaymentMethod, ResolutionEntry, ResolvedOutcome, SyncState, TransactionLine,
    TransactionRecord,
};

/// Columns selected for a [`TransactionRecord`], in [`QueueRow`] order.
const RECORD_COLUMNS: &str = "idempotency_key, terminal_id, currency, total_amount, \
     payment_method, lines, captured_at, sync_state, attempt_count, last_error, last_attempt_at";

/// Timestamps are stored as fixed-width RFC 3339 so TEXT ordering is
/// chronological.
pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct QueueRow {
    idempotency_key: String,
    terminal_id: String,
    currency: String,
    total_amount: i64,
    payment_method: PaymentMethod,
    lines: String,
    captured_at: DateTime<Utc>,
    sync_state: SyncState,
    attempt_count: i64,
    last_error: Option<String>,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueueRow> for TransactionRecord {
    type Error = DbError;

    fn try_from(row: QueueRow) -> DbResult<Self> {
        let lines: Vec<TransactionLine> = serde_json::from_str(&row.lines)?;

        Ok(TransactionRecord {
            idempotency_key: row.idempotency_key,
            terminal_id: row.terminal_id,
            currency: row.currency,
            total_amount: kiosk_core::Money::from_minor(row.total_amount),
            payment_method: row.payment_method,
            lines,
            captured_at: row.captured_at,
            sync_state: row.sync_state,
            attempt_count: row.attempt_count,
            last_error: row.last_error,
            last_attempt_at: row.last_attempt_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ResolutionRow {
    idempotency_key: String,
    terminal_id: String,
    outcome: ResolvedOutcome,
    attempt_count: i64,
    resolved_at: DateTime<Utc>,
}

impl From<ResolutionRow> for ResolutionEntry {
    fn from(row: ResolutionRow) -> Self {
        ResolutionEntry {
            idempotency_key: row.idempotency_key,
            terminal_id: row.terminal_id,
            outcome: row.outcome,
            attempt_count: row.attempt_count,
            resolved_at: row.resolved_at,
        }
    }
}

fn into_records(rows: Vec<QueueRow>) -> DbResult<Vec<TransactionRecord>> {
    rows.into_iter().map(TransactionRecord::try_from).collect()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the kiosk transaction queue and its resolution log.
#[derive(Debug, Clone)]
pub struct TransactionQueueRepository {
    pool: SqlitePool,
}

impl TransactionQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransactionQueueRepository { pool }
    }

    /// Appends a record in PENDING state.
    ///
    /// The stored record always starts with `attempt_count = 0` and no
    /// diagnostics, whatever the argument carries.
    ///
    /// ## Errors
    /// * `DbError::DuplicateKey` - the key is queued already or was resolved
    ///   earlier. Callers treat this as a no-op.
    pub async fn enqueue(&self, record: &TransactionRecord) -> DbResult<TransactionRecord> {
        let lines = serde_json::to_string(&record.lines)?;

        debug!(
            key = %record.idempotency_key,
            total = %record.total_amount,
            lines = record.lines.len(),
            "Enqueuing transaction"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO transaction_queue (
                idempotency_key, terminal_id, currency, total_amount,
                payment_method, lines, captured_at, sync_state, attempt_count
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0
            WHERE NOT EXISTS (
                SELECT 1 FROM resolution_log WHERE idempotency_key = ?1
            )
            ON CONFLICT(idempotency_key) DO NOTHING
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(&record.terminal_id)
        .bind(&record.currency)
        .bind(record.total_amount.minor())
        .bind(record.payment_method)
        .bind(lines)
        .bind(timestamp(&record.captured_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(key = %record.idempotency_key, "Key already known, enqueue skipped");
            return Err(DbError::duplicate_key(&record.idempotency_key));
        }

        let mut stored = record.clone();
        stored.sync_state = SyncState::Pending;
        stored.attempt_count = 0;
        stored.last_error = None;
        stored.last_attempt_at = None;
        Ok(stored)
    }

    /// All queued records, oldest capture first. Ties keep insertion order.
    pub async fn list_pending(&self) -> DbResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM transaction_queue \
             WHERE sync_state NOT IN ('synced', 'duplicate') \
             ORDER BY captured_at ASC, seq ASC"
        );

        let rows: Vec<QueueRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        into_records(rows)
    }

    /// Records the ledger rejected, kept for an operator to inspect.
    pub async fn list_rejected(&self) -> DbResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM transaction_queue \
             WHERE sync_state = 'failed' \
             ORDER BY captured_at ASC, seq ASC"
        );

        let rows: Vec<QueueRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        into_records(rows)
    }

    /// Gets a queued record by key.
    pub async fn get(&self, key: &str) -> DbResult<Option<TransactionRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM transaction_queue WHERE idempotency_key = ?1");

        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TransactionRecord::try_from).transpose()
    }

    /// Gets the resolution log entry for a key that left the queue.
    pub async fn resolution(&self, key: &str) -> DbResult<Option<ResolutionEntry>> {
        let row: Option<ResolutionRow> = sqlx::query_as(
            r#"
            SELECT idempotency_key, terminal_id, outcome, attempt_count, resolved_at
            FROM resolution_log
            WHERE idempotency_key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ResolutionEntry::from))
    }

    /// Current state of a key: from the queue while it is there, from the
    /// resolution log afterwards. `None` if the key was never enqueued.
    pub async fn sync_state(&self, key: &str) -> DbResult<Option<SyncState>> {
        let queued: Option<SyncState> =
            sqlx::query_scalar("SELECT sync_state FROM transaction_queue WHERE idempotency_key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        if queued.is_some() {
            return Ok(queued);
        }

        Ok(self.resolution(key).await?.map(|r| r.outcome.into()))
    }

    /// Number of records still in the queue.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transaction_queue")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Time of the most recent resolution, if any.
    pub async fn last_resolved_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT resolved_at FROM resolution_log ORDER BY resolved_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(at)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Claims a PENDING or FAILED record for a push.
    ///
    /// Returns `false` when the record is already in flight elsewhere or has
    /// left the queue; the caller must not push it then.
    pub async fn mark_in_flight(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transaction_queue SET sync_state = 'in_flight'
            WHERE idempotency_key = ?1 AND sync_state IN ('pending', 'failed')
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        if claimed {
            debug!(key = %key, "Marked in flight");
        } else {
            debug!(key = %key, "Record not claimable, skipped");
        }
        Ok(claimed)
    }

    /// Resolves a record: counts the attempt, writes the resolution log and
    /// removes the record, in one transaction. Returns the final record.
    pub async fn mark_resolved(
        &self,
        key: &str,
        outcome: ResolvedOutcome,
    ) -> DbResult<TransactionRecord> {
        let now = Utc::now();
        let state = SyncState::from(outcome);

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE transaction_queue SET \
                 sync_state = ?2, \
                 attempt_count = attempt_count + 1, \
                 last_error = NULL, \
                 last_attempt_at = ?3 \
             WHERE idempotency_key = ?1 \
             RETURNING {RECORD_COLUMNS}"
        );

        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(key)
            .bind(state)
            .bind(timestamp(&now))
            .fetch_optional(&mut *tx)
            .await?;

        let record = match row {
            Some(row) => TransactionRecord::try_from(row)?,
            None => return Err(DbError::not_found("Transaction", key)),
        };

        sqlx::query(
            r#"
            INSERT INTO resolution_log (idempotency_key, terminal_id, outcome, attempt_count, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(&record.terminal_id)
        .bind(outcome)
        .bind(record.attempt_count)
        .bind(timestamp(&now))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM transaction_queue WHERE idempotency_key = ?1")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            key = %key,
            outcome = %state,
            attempts = record.attempt_count,
            "Transaction resolved"
        );

        Ok(record)
    }

    /// Records a transient failure and returns the record to PENDING.
    pub async fn mark_failed(&self, key: &str, reason: &str) -> DbResult<TransactionRecord> {
        self.record_attempt(key, SyncState::Pending, reason).await
    }

    /// Records a permanent rejection; the record stays queued as FAILED.
    pub async fn mark_rejected(&self, key: &str, reason: &str) -> DbResult<TransactionRecord> {
        self.record_attempt(key, SyncState::Failed, reason).await
    }

    async fn record_attempt(
        &self,
        key: &str,
        state: SyncState,
        reason: &str,
    ) -> DbResult<TransactionRecord> {
        let sql = format!(
            "UPDATE transaction_queue SET \
                 sync_state = ?2, \
                 attempt_count = attempt_count + 1, \
                 last_error = ?3, \
                 last_attempt_at = ?4 \
             WHERE idempotency_key = ?1 \
             RETURNING {RECORD_COLUMNS}"
        );

        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(key)
            .bind(state)
            .bind(reason)
            .bind(timestamp(&Utc::now()))
            .fetch_optional(&self.pool)
            .await?;

        let record = match row {
            Some(row) => TransactionRecord::try_from(row)?,
            None => return Err(DbError::not_found("Transaction", key)),
        };

        debug!(
            key = %key,
            state = %state,
            attempts = record.attempt_count,
            reason = %reason,
            "Push attempt recorded"
        );

        Ok(record)
    }

    /// Returns records left IN_FLIGHT by an interrupted pass to PENDING.
    ///
    /// Called once at startup before any pass runs. Returns the number of
    /// recovered records.
    pub async fn recover_in_flight(&self) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE transaction_queue SET sync_state = 'pending' WHERE sync_state = 'in_flight'",
        )
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(recovered, "Recovered in-flight transactions");
        }

        Ok(recovered)
    }

    /// Deletes resolution log entries resolved before `cutoff`.
    ///
    /// A pruned key is no longer recognized locally; a later replay of it is
    /// caught by the ledger's idempotent insert instead. Returns the number of
    /// removed entries.
    pub async fn prune_resolutions(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM resolution_log WHERE resolved_at < ?1")
            .bind(timestamp(&cutoff))
            .execute(&self.pool)
            .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            info!(pruned, cutoff = %cutoff, "Pruned resolution log");
        }

        Ok(pruned)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
