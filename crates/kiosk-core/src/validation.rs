//! # Validation Module
//!
//! Line, currency and total validation for captured transactions.
//!
//! ## Where Validation Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Points                                  │
//! │                                                                         │
//! │  Kiosk UI (external)                                                   │
//! │  └── Clamps quantity to 0..99, builds cart                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  capture (kiosk-sync)                                                  │
//! │  ├── validate_transaction: lines, currency                             │
//! │  └── total OVERWRITTEN with compute_total                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  central ledger (kiosk-sync / kiosk-db)                                │
//! │  └── verify_record: same rules + stored total must match               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kiosk_core::validation::{validate_currency, validate_quantity};
//!
//! assert!(validate_currency("SEK").is_ok());
//! assert!(validate_quantity(0).is_err());
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{TransactionLine, TransactionRecord};
use crate::{MAX_LINES, MAX_LINE_QUANTITY, MIN_LINE_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_SKU_LEN: usize = 128;
const MAX_NAME_LEN: usize = 200;
const MAX_KEY_LEN: usize = 128;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU: 1 to 128 characters after trimming.
///
/// ## Example
/// ```rust
/// use kiosk_core::validation::validate_sku;
///
/// assert!(validate_sku("MILK-1L").is_ok());
/// assert!(validate_sku("   ").is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    validate_text("sku", sku, MAX_SKU_LEN)
}

/// Validates a line's product name: 1 to 200 characters after trimming.
pub fn validate_line_name(name: &str) -> ValidationResult<()> {
    validate_text("name", name, MAX_NAME_LEN)
}

/// Validates a caller-supplied idempotency key.
///
/// Keys generated by the core are UUIDv4 strings; callers may pass any
/// printable ASCII token up to 128 characters.
pub fn validate_idempotency_key(key: &str) -> ValidationResult<()> {
    validate_text("idempotency_key", key, MAX_KEY_LEN)?;

    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ValidationError::InvalidFormat {
            field: "idempotency_key".to_string(),
            reason: "must be printable ASCII without spaces".to_string(),
        });
    }

    Ok(())
}

/// Validates an ISO-4217 style currency code (three uppercase letters).
pub fn validate_currency(currency: &str) -> ValidationResult<()> {
    if currency.is_empty() {
        return Err(ValidationError::Required {
            field: "currency".to_string(),
        });
    }

    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::InvalidFormat {
            field: "currency".to_string(),
            reason: "expected three uppercase letters".to_string(),
        });
    }

    Ok(())
}

fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity against `[MIN_LINE_QUANTITY, MAX_LINE_QUANTITY]`.
///
/// ## Example
/// ```rust
/// use kiosk_core::validation::validate_quantity;
///
/// assert!(validate_quantity(1).is_ok());
/// assert!(validate_quantity(99).is_ok());
/// assert!(validate_quantity(100).is_err());
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if !(MIN_LINE_QUANTITY..=MAX_LINE_QUANTITY).contains(&qty) {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: MIN_LINE_QUANTITY,
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

/// Unit prices must be strictly positive.
pub fn validate_unit_price(price: Money) -> ValidationResult<()> {
    if !price.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "unit_price".to_string(),
        });
    }
    Ok(())
}

/// Validates one line in isolation.
pub fn validate_line(line: &TransactionLine) -> ValidationResult<()> {
    validate_sku(&line.sku)?;
    validate_line_name(&line.name)?;
    validate_quantity(line.quantity)?;
    validate_unit_price(line.unit_price)?;
    Ok(())
}

// =============================================================================
// Transaction-Level Validation
// =============================================================================

/// Sums line extensions without wrapping.
///
/// ## Example
/// ```rust
/// use kiosk_core::money::Money;
/// use kiosk_core::types::TransactionLine;
/// use kiosk_core::validation::compute_total;
///
/// let lines = vec![TransactionLine {
///     sku: "A".into(),
///     name: "A".into(),
///     unit_price: Money::from_minor(250),
///     quantity: 4,
/// }];
/// assert_eq!(compute_total(&lines).unwrap().minor(), 1000);
/// ```
pub fn compute_total(lines: &[TransactionLine]) -> CoreResult<Money> {
    lines.iter().try_fold(Money::zero(), |acc, line| {
        line.extension()
            .and_then(|ext| acc.checked_add(ext))
            .ok_or(CoreError::AmountOverflow)
    })
}

/// Validates a cart for capture and returns its recomputed total.
///
/// Checks, in order: line count, currency format, currency against the
/// terminal's configured currency, then every line.
pub fn validate_transaction(
    currency: &str,
    lines: &[TransactionLine],
    terminal_currency: &str,
) -> CoreResult<Money> {
    if lines.is_empty() {
        return Err(CoreError::EmptyTransaction);
    }
    if lines.len() > MAX_LINES {
        return Err(CoreError::TooManyLines { max: MAX_LINES });
    }

    validate_currency(currency)?;
    if currency != terminal_currency {
        return Err(CoreError::CurrencyMismatch {
            expected: terminal_currency.to_string(),
            actual: currency.to_string(),
        });
    }

    for (index, line) in lines.iter().enumerate() {
        validate_line(line).map_err(|source| CoreError::InvalidLine { index, source })?;
    }

    compute_total(lines)
}

/// Re-checks a record received by the central ledger.
///
/// Same line rules as capture, plus the stored total must equal the
/// recomputed one. No terminal currency applies here.
pub fn verify_record(record: &TransactionRecord) -> CoreResult<()> {
    validate_idempotency_key(&record.idempotency_key)?;
    if record.terminal_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "terminal_id".to_string(),
        }
        .into());
    }

    let computed = validate_transaction(&record.currency, &record.lines, &record.currency)?;
    if computed != record.total_amount {
        return Err(CoreError::TotalMismatch {
            recorded: record.total_amount.minor(),
            computed: computed.minor(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
