//! # kiosk-sync: Offline-first Capture and Sync for Kiosks
//!
//! This crate keeps sales flowing when a kiosk loses its connection to the
//! central ledger. Sales are written directly while the link is up and
//! queued durably while it is not; the queue is drained once the link
//! returns, with idempotency keys making every replay safe.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiosk Sync Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   SyncAgent (per terminal)                       │  │
//! │  │  recovers IN_FLIGHT records, spawns link monitor + sync loop     │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │    Capture     │  │  LinkMonitor   │  │      SyncEngine        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ validate, key, │  │ auth + probe   │  │ snapshot queue, push   │    │
//! │  │ direct write   │  │ UP/DOWN/UNKNOWN│  │ each record, resolve   │    │
//! │  │ or enqueue     │  │ heartbeats     │  │ or keep for retry      │    │
//! │  └───────┬────────┘  └────────────────┘  └───────────┬────────────┘    │
//! │          │                                           │                  │
//! │          ▼                                           ▼                  │
//! │  ┌────────────────────────┐            ┌─────────────────────────────┐ │
//! │  │ Local queue (kiosk-db) │            │ CentralLedger               │ │
//! │  │ SQLite WAL             │            │ idempotent on key           │ │
//! │  └────────────────────────┘            └─────────────────────────────┘ │
//! │                                                                         │
//! │  STATUS EVENTS (to the kiosk UI):                                       │
//! │  • "sync://status"   - link state, queue depth, last pass               │
//! │  • "sync://progress" - pending vs synced counts                         │
//! │  • "sync://error"    - stuck or rejected transactions                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent` orchestrator and its handle
//! - [`auth`] - Session providers (static, JWT)
//! - [`capture`] - Validation and two-path capture
//! - [`config`] - Terminal configuration (TOML + env)
//! - [`engine`] - Sync passes over the local queue
//! - [`error`] - Sync error types
//! - [`fleet`] - Many terminals synced in parallel
//! - [`ledger`] - Central ledger trait and SQLite implementation
//! - [`link`] - Link state monitor
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kiosk_sync::{SqliteLedger, SyncAgent, SyncConfig};
//! use kiosk_db::{Database, DbConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//! let ledger = Arc::new(SqliteLedger::new(central_db.ledger()));
//!
//! let handle = SyncAgent::new(config, db, ledger).start().await?;
//!
//! let receipt = handle.capture(candidate).await?;
//! println!("{} -> {:?}", receipt.idempotency_key, receipt.outcome);
//!
//! let status = handle.status().await;
//! println!("Link: {}, pending: {}", status.link, status.pending_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod auth;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod ledger;
pub mod link;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{
    NoOpEmitter, SyncAgent, SyncAgentBuilder, SyncAgentHandle, SyncEventEmitter, SyncStatus,
};
pub use auth::{AuthProvider, StaticAuth, TerminalClaims, TokenAuth};
pub use capture::{CaptureOutcome, CaptureReceipt, TransactionCapture};
pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncPassOutcome, SyncReport};
pub use error::{SyncError, SyncResult};
pub use fleet::SyncFleet;
pub use ledger::{CentralLedger, InsertOutcome, SqliteLedger};
pub use link::{LinkEvent, LinkMonitor, LinkState};
