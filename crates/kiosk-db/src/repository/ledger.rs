//! # Ledger Repository
//!
//! Central-side storage: the authoritative ledger of sales and the
//! registry of kiosks that report heartbeats.
//!
//! ## Idempotent Insert
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  INSERT INTO ledger_entries (...) VALUES (...)                         │
//! │  ON CONFLICT(idempotency_key) DO NOTHING                               │
//! │                                                                         │
//! │  rows_affected = 1  ──► LedgerInsert::Inserted                          │
//! │  rows_affected = 0  ──► LedgerInsert::AlreadyExists                     │
//! │                                                                         │
//! │  The same key submitted any number of times, from the direct path or   │
//! │  from the offline queue, leaves exactly one row.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::error::DbResult;
use crate::repository::queue::timestamp;
use kiosk_core::{
    CurrencyTotal, FleetOverview, Heartbeat, KioskMetrics, KioskStatus, LedgerEntry, Money,
    TransactionRecord,
};

/// A kiosk counts as online while its last heartbeat is at most this old.
pub const ONLINE_WINDOW_SECS: i64 = 30;

/// Result of an idempotent ledger insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerInsert {
    Inserted,
    AlreadyExists,
}

#[derive(Debug, FromRow)]
struct EntryRow {
    idempotency_key: String,
    terminal_id: String,
    currency: String,
    total_amount: i64,
    item_count: i64,
    synced_from_offline: bool,
    captured_at: DateTime<Utc>,
    received_at: DateTime<Utc>,
}

impl From<EntryRow> for LedgerEntry {
    fn from(row: EntryRow) -> Self {
        LedgerEntry {
            idempotency_key: row.idempotency_key,
            terminal_id: row.terminal_id,
            currency: row.currency,
            total_amount: Money::from_minor(row.total_amount),
            item_count: row.item_count,
            synced_from_offline: row.synced_from_offline,
            captured_at: row.captured_at,
            received_at: row.received_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TerminalRow {
    terminal_id: String,
    last_seen_at: DateTime<Utc>,
    pending_sync_count: i64,
    last_synced_at: Option<DateTime<Utc>>,
}

/// Repository for the central ledger and kiosk registry.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Inserts a sale unless its idempotency key is already present.
    ///
    /// The record is stored as given; validation is the caller's job.
    pub async fn insert(
        &self,
        record: &TransactionRecord,
        synced_from_offline: bool,
    ) -> DbResult<LedgerInsert> {
        let lines = serde_json::to_string(&record.lines)?;

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                idempotency_key, terminal_id, currency, total_amount,
                payment_method, item_count, lines, synced_from_offline,
                captured_at, received_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(idempotency_key) DO NOTHING
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(&record.terminal_id)
        .bind(&record.currency)
        .bind(record.total_amount.minor())
        .bind(record.payment_method)
        .bind(record.item_count())
        .bind(lines)
        .bind(synced_from_offline)
        .bind(timestamp(&record.captured_at))
        .bind(timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(key = %record.idempotency_key, "Ledger already has key");
            return Ok(LedgerInsert::AlreadyExists);
        }

        info!(
            key = %record.idempotency_key,
            terminal = %record.terminal_id,
            total = %record.total_amount,
            offline = synced_from_offline,
            "Ledger entry stored"
        );

        Ok(LedgerInsert::Inserted)
    }

    /// Gets a ledger entry by key.
    pub async fn get_entry(&self, key: &str) -> DbResult<Option<LedgerEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(
            r#"
            SELECT idempotency_key, terminal_id, currency, total_amount, item_count,
                   synced_from_offline, captured_at, received_at
            FROM ledger_entries
            WHERE idempotency_key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(LedgerEntry::from))
    }

    /// All ledger entries in arrival order.
    pub async fn list_entries(&self) -> DbResult<Vec<LedgerEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT idempotency_key, terminal_id, currency, total_amount, item_count,
                   synced_from_offline, captured_at, received_at
            FROM ledger_entries
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(LedgerEntry::from).collect())
    }

    /// Registers a kiosk heartbeat received at `received_at`.
    ///
    /// Liveness is judged on the central clock, so `last_seen_at` is the
    /// receive time, never the kiosk's `sent_at`. A heartbeat without
    /// `last_synced_at` keeps the previously known value.
    pub async fn record_heartbeat(
        &self,
        heartbeat: &Heartbeat,
        received_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO terminals (terminal_id, last_seen_at, pending_sync_count, last_synced_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(terminal_id) DO UPDATE SET
                last_seen_at = excluded.last_seen_at,
                pending_sync_count = excluded.pending_sync_count,
                last_synced_at = COALESCE(excluded.last_synced_at, terminals.last_synced_at)
            "#,
        )
        .bind(&heartbeat.terminal_id)
        .bind(timestamp(&received_at))
        .bind(heartbeat.pending_count)
        .bind(heartbeat.last_synced_at.as_ref().map(timestamp))
        .execute(&self.pool)
        .await?;

        debug!(
            terminal = %heartbeat.terminal_id,
            pending = heartbeat.pending_count,
            "Heartbeat recorded"
        );

        Ok(())
    }

    // =========================================================================
    // Dashboard Queries
    // =========================================================================

    /// Per-kiosk metrics for every kiosk that sent a heartbeat or has
    /// ledger entries, ordered by terminal id.
    ///
    /// `central_order_amount` sums all currencies of a kiosk; a kiosk is
    /// configured with a single currency.
    pub async fn kiosk_metrics(&self, now: DateTime<Utc>) -> DbResult<Vec<KioskMetrics>> {
        let terminals: Vec<TerminalRow> = sqlx::query_as(
            r#"
            SELECT terminal_id, last_seen_at, pending_sync_count, last_synced_at
            FROM terminals
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let orders: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT terminal_id, COUNT(*), COALESCE(SUM(total_amount), 0)
            FROM ledger_entries
            GROUP BY terminal_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let online_after = now - Duration::seconds(ONLINE_WINDOW_SECS);
        let mut metrics: Vec<KioskMetrics> = terminals
            .into_iter()
            .map(|t| KioskMetrics {
                status: if t.last_seen_at >= online_after {
                    KioskStatus::Online
                } else {
                    KioskStatus::Offline
                },
                terminal_id: t.terminal_id,
                central_order_count: 0,
                central_order_amount: Money::zero(),
                pending_sync: t.pending_sync_count,
                last_heartbeat_at: Some(t.last_seen_at),
                last_synced_at: t.last_synced_at,
            })
            .collect();

        for (terminal_id, count, amount) in orders {
            match metrics.iter_mut().find(|m| m.terminal_id == terminal_id) {
                Some(m) => {
                    m.central_order_count = count;
                    m.central_order_amount = Money::from_minor(amount);
                }
                None => metrics.push(KioskMetrics {
                    terminal_id,
                    status: KioskStatus::Offline,
                    central_order_count: count,
                    central_order_amount: Money::from_minor(amount),
                    pending_sync: 0,
                    last_heartbeat_at: None,
                    last_synced_at: None,
                }),
            }
        }

        metrics.sort_by(|a, b| a.terminal_id.cmp(&b.terminal_id));
        Ok(metrics)
    }

    /// Fleet-wide aggregates for the operator dashboard.
    pub async fn fleet_overview(&self, now: DateTime<Utc>) -> DbResult<FleetOverview> {
        let kiosks = self.kiosk_metrics(now).await?;

        let revenue: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT currency, COALESCE(SUM(total_amount), 0)
            FROM ledger_entries
            GROUP BY currency
            ORDER BY currency
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let online = kiosks
            .iter()
            .filter(|k| k.status == KioskStatus::Online)
            .count() as i64;
        let total = kiosks.len() as i64;

        Ok(FleetOverview {
            total_kiosks: total,
            online_kiosks: online,
            offline_kiosks: total - online,
            pending_sync_orders: kiosks.iter().map(|k| k.pending_sync).sum(),
            central_orders: kiosks.iter().map(|k| k.central_order_count).sum(),
            central_revenue: revenue
                .into_iter()
                .map(|(currency, amount)| CurrencyTotal {
                    currency,
                    amount: Money::from_minor(amount),
                })
                .collect(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use kiosk_core::{PaymentMethod, TransactionLine};

    async fn setup() -> LedgerRepository {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.ledger()
    }

    fn record(key: &str, terminal: &str, currency: &str, price: i64) -> TransactionRecord {
        TransactionRecord::pending(
            key,
            terminal,
            currency,
            PaymentMethod::Mobile,
            vec![TransactionLine {
                sku: "BUN".to_string(),
                name: "Cinnamon bun".to_string(),
                unit_price: Money::from_minor(price),
                quantity: 1,
            }],
            Money::from_minor(price),
            Utc::now(),
        )
    }

    fn heartbeat(terminal: &str, pending: i64) -> Heartbeat {
        Heartbeat {
            terminal_id: terminal.to_string(),
            pending_count: pending,
            last_synced_at: None,
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let repo = setup().await;
        let rec = record("k1", "kiosk-01", "SEK", 2500);

        assert_eq!(repo.insert(&rec, true).await.unwrap(), LedgerInsert::Inserted);
        assert_eq!(repo.insert(&rec, false).await.unwrap(), LedgerInsert::AlreadyExists);

        let entries = repo.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].synced_from_offline);
        assert_eq!(entries[0].item_count, 1);
        assert!(repo.get_entry("k1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_last_synced_at() {
        let repo = setup().await;
        let now = Utc::now();

        let mut hb = heartbeat("kiosk-01", 3);
        hb.last_synced_at = Some(now);
        repo.record_heartbeat(&hb, now).await.unwrap();
        repo.record_heartbeat(&heartbeat("kiosk-01", 0), now).await.unwrap();

        let metrics = repo.kiosk_metrics(now).await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].pending_sync, 0);
        assert!(metrics[0].last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_fleet_overview() {
        let repo = setup().await;
        let now = Utc::now();

        repo.record_heartbeat(&heartbeat("kiosk-01", 2), now).await.unwrap();
        repo.record_heartbeat(&heartbeat("kiosk-02", 5), now - Duration::seconds(120))
            .await
            .unwrap();

        repo.insert(&record("a", "kiosk-01", "SEK", 1000), false).await.unwrap();
        repo.insert(&record("b", "kiosk-01", "SEK", 500), true).await.unwrap();
        repo.insert(&record("c", "kiosk-03", "EUR", 300), false).await.unwrap();

        let overview = repo.fleet_overview(now).await.unwrap();
        assert_eq!(overview.total_kiosks, 3);
        assert_eq!(overview.online_kiosks, 1);
        assert_eq!(overview.offline_kiosks, 2);
        assert_eq!(overview.pending_sync_orders, 7);
        assert_eq!(overview.central_orders, 3);
        assert_eq!(
            overview.central_revenue,
            vec![
                CurrencyTotal { currency: "EUR".to_string(), amount: Money::from_minor(300) },
                CurrencyTotal { currency: "SEK".to_string(), amount: Money::from_minor(1500) },
            ]
        );

        let kiosks = repo.kiosk_metrics(now).await.unwrap();
        let first = &kiosks[0];
        assert_eq!(first.terminal_id, "kiosk-01");
        assert_eq!(first.status, KioskStatus::Online);
        assert_eq!(first.central_order_amount, Money::from_minor(1500));
        assert_eq!(kiosks[2].last_heartbeat_at, None);
    }

    #[tokio::test]
    async fn test_liveness_ignores_kiosk_clock() {
        let repo = setup().await;
        let now = Utc::now();

        let mut lagging = heartbeat("kiosk-01", 0);
        lagging.sent_at = now - Duration::hours(2);
        repo.record_heartbeat(&lagging, now).await.unwrap();

        let kiosks = repo.kiosk_metrics(now).await.unwrap();
        assert_eq!(kiosks[0].status, KioskStatus::Online);
        assert_eq!(
            kiosks[0].last_heartbeat_at.map(|t| t.timestamp_micros()),
            Some(now.timestamp_micros())
        );
    }
}
