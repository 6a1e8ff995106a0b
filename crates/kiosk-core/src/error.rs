//! # Error Types
//!
//! Domain-specific error types for kiosk-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kiosk-core errors (this file)                                         │
//! │  ├── CoreError        - Record-level domain errors                     │
//! │  └── ValidationError  - Field validation failures                      │
//! │                                                                         │
//! │  kiosk-db errors                                                       │
//! │  └── DbError          - Storage failures, DuplicateKey                 │
//! │                                                                         │
//! │  kiosk-sync errors                                                     │
//! │  └── SyncError        - Link, ledger, config, InvalidTransaction       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError::InvalidTransaction     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Record-level domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The transaction has no lines.
    #[error("Transaction has no lines")]
    EmptyTransaction,

    /// Too many lines in one transaction.
    #[error("Transaction cannot have more than {max} lines")]
    TooManyLines { max: usize },

    /// The record's currency differs from the terminal's currency.
    #[error("Currency mismatch: terminal uses {expected}, transaction uses {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    /// A stored or received total does not equal the sum of its lines.
    ///
    /// ## When This Occurs
    /// - Central ledger receives a record that was tampered with or corrupted
    ///   on the way; the kiosk itself always overwrites the total.
    #[error("Total mismatch: recorded {recorded}, lines sum to {computed}")]
    TotalMismatch { recorded: i64, computed: i64 },

    /// Line extensions overflowed while summing.
    #[error("Transaction total overflows")]
    AmountOverflow,

    /// Line-level validation failure.
    #[error("Line {index}: {source}")]
    InvalidLine {
        index: usize,
        #[source]
        source: ValidationError,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., currency code, SKU characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::CurrencyMismatch {
            expected: "SEK".to_string(),
            actual: "EUR".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Currency mismatch: terminal uses SEK, transaction uses EUR"
        );

        let err = CoreError::InvalidLine {
            index: 2,
            source: ValidationError::MustBePositive {
                field: "unit_price".to_string(),
            },
        };
        assert_eq!(err.to_string(), "Line 2: unit_price must be positive");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "currency".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
