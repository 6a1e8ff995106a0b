//! # kiosk-db: Storage Layer for Kiosk Sync
//!
//! SQLite storage for the kiosk's durable transaction queue and for the
//! central ledger, both through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiosk Sync Data Flow                             │
//! │                                                                         │
//! │  kiosk-sync (capture, sync engine, SqliteLedger)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     kiosk-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │  │   │
//! │  │   │               │    │ TransactionQ.. │   │ 001_queue    │  │   │
//! │  │   │ SqlitePool    │◄───│ LedgerRepo     │   │ 002_ledger   │  │   │
//! │  │   │ WAL, FULL     │    │                │   │              │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │   SQLite file per kiosk (queue)  /  per central site (ledger)   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Queue and ledger repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kiosk_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("./kiosk.db")).await?;
//! db.queue().enqueue(&record).await?;
//! let pending = db.queue().list_pending().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::ledger::{LedgerInsert, LedgerRepository, ONLINE_WINDOW_SECS};
pub use repository::queue::TransactionQueueRepository;
