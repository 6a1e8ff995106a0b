//! # Sync Error Types
//!
//! Error types for capture, link probing and sync passes.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Link/Ledger   │  │     Capture             │ │
//! │  │                 │  │   (transient)   │  │     (local)             │ │
//! │  │  InvalidConfig  │  │  LinkDown       │  │  InvalidTransaction     │ │
//! │  │  MissingTermId  │  │  Unreachable    │  │                         │ │
//! │  │  ConfigLoad/Save│  │  AuthFailed     │  │                         │ │
//! │  │                 │  │  Timeout        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Storage      │  │     Internal                                │  │
//! │  │                 │  │                                             │  │
//! │  │  Storage(DbErr) │  │  ShuttingDown, ChannelError, Internal       │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transient errors are absorbed by the sync loop and retried. Only
//! `InvalidTransaction` and storage failures reach the capture caller.

use thiserror::Error;

use kiosk_core::CoreError;
use kiosk_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Terminal id is required for capture and heartbeats.
    #[error("Terminal ID not configured. Set [terminal] id or KIOSK_TERMINAL_ID.")]
    MissingTerminalId,

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Capture Errors
    // =========================================================================
    /// The candidate transaction failed validation. Never queued or sent.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] CoreError),

    // =========================================================================
    // Link / Ledger Errors
    // =========================================================================
    /// A manual sync was requested while the link is down.
    #[error("Store is offline: sync postponed")]
    LinkDown,

    /// The central ledger could not be reached.
    #[error("Central ledger unreachable: {0}")]
    Unreachable(String),

    /// The auth provider reports no valid session.
    #[error("Not authenticated: {0}")]
    AuthFailed(String),

    /// A probe or ledger call exceeded its deadline.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Local queue storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later.
    ///
    /// ## Retryable Errors
    /// - Link down, unreachable ledger, failed auth
    /// - Timeouts
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Invalid transactions
    /// - Storage failures
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::LinkDown
                | SyncError::Unreachable(_)
                | SyncError::AuthFailed(_)
                | SyncError::Timeout(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingTerminalId
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
