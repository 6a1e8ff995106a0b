//! # kiosk-core: Pure Domain Logic for Kiosk Sync
//!
//! This crate holds the transaction model shared by the kiosk (edge) and the
//! central ledger. Everything here is a pure function or a plain type.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiosk Sync Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             Kiosk UI (external, out of scope)                   │   │
//! │  │    Cart ──► Pay & Checkout ──► "Offline Queue" list             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ capture(candidate)                     │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 kiosk-sync (capture, link, engine)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kiosk-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │   money   │  │ validation│                  │   │
//! │  │   │  Record   │  │   Money   │  │  lines    │                  │   │
//! │  │   │ SyncState │  │           │  │  totals   │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    kiosk-db (Database Layer)                    │   │
//! │  │           Durable queue, resolution log, ledger store           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (TransactionRecord, SyncState, etc.)
//! - [`money`] - Fixed-point money in minor units
//! - [`error`] - Domain error types
//! - [`validation`] - Line and record validation, total recomputation
//!
//! ## Example Usage
//!
//! ```rust
//! use kiosk_core::money::Money;
//! use kiosk_core::types::TransactionLine;
//!
//! let line = TransactionLine {
//!     sku: "MILK-1L".to_string(),
//!     name: "Milk 1L".to_string(),
//!     unit_price: Money::from_minor(1895),
//!     quantity: 2,
//! };
//!
//! assert_eq!(line.extension().map(|m| m.minor()), Some(3790));
//! ```

pub mod error;
pub mod money;
pub mod types;
pub mod validation;

pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single transaction.
pub const MAX_LINES: usize = 100;

/// Quantity bounds for a single line. The kiosk UI clamps to the same range.
pub const MIN_LINE_QUANTITY: i64 = 1;
pub const MAX_LINE_QUANTITY: i64 = 99;

/// Currency used when the terminal configuration does not name one.
pub const DEFAULT_CURRENCY: &str = "SEK";
