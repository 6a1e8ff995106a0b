//! # Repository Module
//!
//! Repository implementations over the shared SQLite pool.
//!
//! ## Available Repositories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Kiosk side                          Central side                      │
//! │  ──────────                          ────────────                      │
//! │  db.queue()                          db.ledger()                       │
//! │  TransactionQueueRepository          LedgerRepository                  │
//! │  ├── enqueue / list_pending          ├── insert (idempotent)           │
//! │  ├── mark_in_flight                  ├── record_heartbeat              │
//! │  ├── mark_resolved / failed          ├── list_entries / get_entry      │
//! │  ├── mark_rejected                   ├── kiosk_metrics                 │
//! │  ├── recover_in_flight               └── fleet_overview                │
//! │  └── prune_resolutions                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod ledger;
pub mod queue;
