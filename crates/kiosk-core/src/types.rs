//! # Domain Types
//!
//! Core domain types shared by the kiosk queue, the sync engine and the
//! central ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────────┐   ┌─────────────────┐   ┌─────────────────┐  │
//! │  │  TransactionRecord   │   │ TransactionLine │   │   SyncState     │  │
//! │  │  ──────────────────  │   │  ─────────────  │   │  ─────────────  │  │
//! │  │  idempotency_key     │   │  sku            │   │  Pending        │  │
//! │  │  terminal_id         │◄──│  name           │   │  InFlight       │  │
//! │  │  currency, total     │   │  unit_price     │   │  Synced  ─┐     │  │
//! │  │  lines               │   │  quantity 1..99 │   │  Duplicate├ gone│  │
//! │  │  captured_at         │   └─────────────────┘   │  Failed   ┘     │  │
//! │  │  sync_state          │                         └─────────────────┘  │
//! │  │  attempt_count       │                                              │
//! │  └──────────────────────┘                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! A sale is identified by its `idempotency_key` everywhere: in the kiosk
//! queue, in the resolution log and in the central ledger. The key is
//! generated once at capture and never regenerated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Payment Method
// =============================================================================

/// Payment method label carried with the sale. No processing happens here.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Card,
    Mobile,
    Cash,
}

// =============================================================================
// Sync State
// =============================================================================

/// Where a captured transaction is in its journey to the central ledger.
///
/// ## State Machine
/// ```text
///   enqueue ──► Pending ──► InFlight ──┬──► Synced     (removed)
///                  ▲                   ├──► Duplicate  (removed)
///                  │   unreachable     │
///                  └───────────────────┤
///                                      └──► Failed     (rejected, retained)
/// ```
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Waiting in the local queue.
    #[default]
    Pending,
    /// A push attempt is outstanding.
    InFlight,
    /// The ledger accepted the record.
    Synced,
    /// The ledger already had the key from an earlier push.
    Duplicate,
    /// The ledger rejected the record; kept for an operator.
    Failed,
}

impl SyncState {
    /// Returns true for states that end a record's life in the queue.
    pub fn is_resolved(&self) -> bool {
        matches!(self, SyncState::Synced | SyncState::Duplicate)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Pending => write!(f, "pending"),
            SyncState::InFlight => write!(f, "in_flight"),
            SyncState::Synced => write!(f, "synced"),
            SyncState::Duplicate => write!(f, "duplicate"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal outcome of a push, the only states that remove a record.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedOutcome {
    Synced,
    Duplicate,
}

impl From<ResolvedOutcome> for SyncState {
    fn from(outcome: ResolvedOutcome) -> Self {
        match outcome {
            ResolvedOutcome::Synced => SyncState::Synced,
            ResolvedOutcome::Duplicate => SyncState::Duplicate,
        }
    }
}

/// How a record reached the central ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrigin {
    /// Written synchronously at capture time.
    Direct,
    /// Drained from the offline queue by a sync pass.
    Queued,
}

impl WriteOrigin {
    pub fn is_from_offline(&self) -> bool {
        matches!(self, WriteOrigin::Queued)
    }
}

// =============================================================================
// Transaction Line
// =============================================================================

/// One line of a sale. Product data is frozen at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransactionLine {
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    /// Quantity in `[1, 99]`.
    pub quantity: i64,
}

impl TransactionLine {
    /// Line extension (unit price × quantity), `None` on overflow.
    #[inline]
    pub fn extension(&self) -> Option<Money> {
        self.unit_price.checked_mul_quantity(self.quantity)
    }
}

// =============================================================================
// Candidate Transaction
// =============================================================================

/// A completed cart handed over by the kiosk UI.
///
/// The UI may pre-generate an idempotency key so that a retried checkout
/// request maps to the same sale. Any total it computed is informational
/// only; the core recomputes it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CandidateTransaction {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    pub lines: Vec<TransactionLine>,
    #[serde(default)]
    pub claimed_total: Option<Money>,
}

// =============================================================================
// Transaction Record
// =============================================================================

/// Generates a fresh idempotency key (UUIDv4).
pub fn new_idempotency_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A captured sale as held in the local queue and sent to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransactionRecord {
    /// Globally unique per logical sale; immutable.
    pub idempotency_key: String,

    /// Kiosk that captured the sale.
    pub terminal_id: String,

    /// ISO-4217 code, e.g. "SEK".
    pub currency: String,

    /// Sum of line extensions, recomputed on every validation.
    pub total_amount: Money,

    pub payment_method: PaymentMethod,

    pub lines: Vec<TransactionLine>,

    /// Set once at capture.
    #[ts(as = "String")]
    pub captured_at: DateTime<Utc>,

    pub sync_state: SyncState,

    /// Number of completed push attempts.
    pub attempt_count: i64,

    /// Diagnostic from the last failed or rejected push.
    pub last_error: Option<String>,

    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// Builds a fresh PENDING record.
    pub fn pending(
        idempotency_key: impl Into<String>,
        terminal_id: impl Into<String>,
        currency: impl Into<String>,
        payment_method: PaymentMethod,
        lines: Vec<TransactionLine>,
        total_amount: Money,
        captured_at: DateTime<Utc>,
    ) -> Self {
        TransactionRecord {
            idempotency_key: idempotency_key.into(),
            terminal_id: terminal_id.into(),
            currency: currency.into(),
            total_amount,
            payment_method,
            lines,
            captured_at,
            sync_state: SyncState::Pending,
            attempt_count: 0,
            last_error: None,
            last_attempt_at: None,
        }
    }

    /// Total number of items across all lines.
    pub fn item_count(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

// =============================================================================
// Resolution Log
// =============================================================================

/// What remains locally after a record left the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ResolutionEntry {
    pub idempotency_key: String,
    pub terminal_id: String,
    pub outcome: ResolvedOutcome,
    pub attempt_count: i64,
    #[ts(as = "String")]
    pub resolved_at: DateTime<Utc>,
}

// =============================================================================
// Central Side
// =============================================================================

/// Liveness report a kiosk sends with every link probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub terminal_id: String,
    pub pending_count: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sent_at: DateTime<Utc>,
}

/// A sale as stored in the central ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerEntry {
    pub idempotency_key: String,
    pub terminal_id: String,
    pub currency: String,
    pub total_amount: Money,
    pub item_count: i64,
    pub synced_from_offline: bool,
    #[ts(as = "String")]
    pub captured_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub received_at: DateTime<Utc>,
}

/// Kiosk liveness as seen from the central side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum KioskStatus {
    Online,
    Offline,
}

/// Per-kiosk metrics for the operator dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct KioskMetrics {
    pub terminal_id: String,
    pub status: KioskStatus,
    pub central_order_count: i64,
    pub central_order_amount: Money,
    pub pending_sync: i64,
    #[ts(as = "Option<String>")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Revenue summed per currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CurrencyTotal {
    pub currency: String,
    pub amount: Money,
}

/// Fleet-wide aggregates for the operator dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FleetOverview {
    pub total_kiosks: i64,
    pub online_kiosks: i64,
    pub offline_kiosks: i64,
    pub pending_sync_orders: i64,
    pub central_orders: i64,
    pub central_revenue: Vec<CurrencyTotal>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price: i64, qty: i64) -> TransactionLine {
        TransactionLine {
            sku: "SKU-1".to_string(),
            name: "Item".to_string(),
            unit_price: Money::from_minor(price),
            quantity: qty,
        }
    }

    #[test]
    fn test_sync_state_default_and_resolution() {
        assert_eq!(SyncState::default(), SyncState::Pending);
        assert!(SyncState::Synced.is_resolved());
        assert!(SyncState::Duplicate.is_resolved());
        assert!(!SyncState::Failed.is_resolved());
        assert!(!SyncState::InFlight.is_resolved());
    }

    #[test]
    fn test_sync_state_serde_names() {
        let json = serde_json::to_string(&SyncState::InFlight).unwrap();
        assert_eq!(json, "\"in_flight\"");
        assert_eq!(SyncState::InFlight.to_string(), "in_flight");
    }

    #[test]
    fn test_resolved_outcome_into_state() {
        assert_eq!(SyncState::from(ResolvedOutcome::Duplicate), SyncState::Duplicate);
    }

    #[test]
    fn test_pending_record() {
        let record = TransactionRecord::pending(
            "key-1",
            "kiosk-01",
            "SEK",
            PaymentMethod::Cash,
            vec![line(1000, 2), line(250, 1)],
            Money::from_minor(2250),
            Utc::now(),
        );
        assert_eq!(record.sync_state, SyncState::Pending);
        assert_eq!(record.attempt_count, 0);
        assert_eq!(record.item_count(), 3);
    }

    #[test]
    fn test_new_idempotency_keys_are_unique() {
        let a = new_idempotency_key();
        let b = new_idempotency_key();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_candidate_defaults_from_json() {
        let candidate: CandidateTransaction = serde_json::from_str(
            r#"{"currency":"SEK","lines":[{"sku":"A","name":"A","unit_price":100,"quantity":1}]}"#,
        )
        .unwrap();
        assert!(candidate.idempotency_key.is_none());
        assert_eq!(candidate.payment_method, PaymentMethod::Card);
        assert_eq!(candidate.lines[0].extension(), Some(Money::from_minor(100)));
    }

    #[test]
    fn test_line_extension_overflow_is_none() {
        let line = TransactionLine {
            sku: "A".into(),
            name: "A".into(),
            unit_price: Money::from_minor(i64::MAX / 2),
            quantity: 3,
        };
        assert!(line.extension().is_none());
    }
}
