//! # Database Migrations
//!
//! Embedded SQL migrations for the kiosk queue and the central ledger.
//!
//! ## Schema
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  001_transaction_queue.sql   (kiosk side)                              │
//! │  ├── transaction_queue   one row per unresolved sale                   │
//! │  └── resolution_log      one row per key the ledger confirmed          │
//! │                                                                         │
//! │  002_central_ledger.sql      (central side)                            │
//! │  ├── ledger_entries      UNIQUE(idempotency_key)                       │
//! │  └── terminals           heartbeat registry                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both sides run the full set; each side only writes its own tables.
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. **NEVER** modify existing migrations - always add new ones

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the `migrations/sqlite` directory.
///
/// `sqlx::migrate!()` embeds the SQL files at compile time.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations.
///
/// Idempotent; each migration runs in its own transaction, in filename order.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns information about migrations.
///
/// Returns `(total_migrations, applied_migrations)` for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    // Query applied migrations
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
