//! # Seed Data Generator
//!
//! Fills a kiosk database with offline sales for manual sync testing.
//!
//! ## Usage
//! ```bash
//! # Queue 20 offline sales (default)
//! cargo run -p kiosk-db --bin seed
//!
//! # Queue a custom amount for a given terminal
//! cargo run -p kiosk-db --bin seed -- --count 200 --terminal kiosk-07
//!
//! # Specify database path
//! cargo run -p kiosk-db --bin seed -- --db ./data/kiosk.db
//! ```
//!
//! Each sale has 1-4 lines from a small café menu, quantities 1-3, and a
//! capture time spread over the last hour so queue ordering is visible.

use chrono::{Duration, Utc};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kiosk_core::validation::validate_transaction;
use kiosk_core::{new_idempotency_key, Money, PaymentMethod, TransactionLine, TransactionRecord};
use kiosk_db::{Database, DbConfig};

/// Menu items: (sku, name, price in öre)
const MENU: &[(&str, &str, i64)] = &[
    ("COF-BRYG", "Bryggkaffe", 3500),
    ("COF-LATT", "Caffè latte", 4900),
    ("COF-CAPP", "Cappuccino", 4500),
    ("TEA-EARL", "Earl Grey", 3000),
    ("BAK-KANE", "Kanelbulle", 3200),
    ("BAK-KARD", "Kardemummabulle", 3400),
    ("BAK-SEMLA", "Semla", 5500),
    ("SNK-SMOR", "Smörgås ost & skinka", 6900),
    ("DRK-LOKA", "Loka 33cl", 2500),
    ("DRK-JUICE", "Apelsinjuice", 3900),
];

const PAYMENT_METHODS: &[PaymentMethod] =
    &[PaymentMethod::Card, PaymentMethod::Mobile, PaymentMethod::Cash];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kiosk=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 20;
    let mut db_path = String::from("./kiosk_dev.db");
    let mut terminal_id = String::from("kiosk-01");
    let currency = kiosk_core::DEFAULT_CURRENCY;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--terminal" | "-t" => {
                if i + 1 < args.len() {
                    terminal_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Kiosk Sync Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>       Number of offline sales to queue (default: 20)");
                println!("  -d, --db <PATH>       Database file path (default: ./kiosk_dev.db)");
                println!("  -t, --terminal <ID>   Terminal id stamped on sales (default: kiosk-01)");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, terminal = %terminal_id, count, "Seeding offline queue");

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let queue = db.queue();

    let existing = queue.count_pending().await?;
    if existing > 0 {
        warn!(existing, "Queue already holds transactions, appending");
    }

    let now = Utc::now();
    let mut queued = 0;

    for n in 0..count {
        let lines = generate_lines(n);
        let total = validate_transaction(currency, &lines, currency)?;

        // Spread over the last hour, oldest first.
        let captured_at = now - Duration::seconds(3600) + Duration::seconds((n * 3600 / count.max(1)) as i64);

        let record = TransactionRecord::pending(
            new_idempotency_key(),
            &terminal_id,
            currency,
            PAYMENT_METHODS[n % PAYMENT_METHODS.len()],
            lines,
            total,
            captured_at,
        );

        if let Err(e) = queue.enqueue(&record).await {
            warn!(key = %record.idempotency_key, error = %e, "Failed to enqueue");
            continue;
        }
        queued += 1;
    }

    info!(
        queued,
        pending = queue.count_pending().await?,
        "Seed complete"
    );

    Ok(())
}

/// Deterministic cart for sale number `n`.
fn generate_lines(n: usize) -> Vec<TransactionLine> {
    let line_count = 1 + n % 4;

    (0..line_count)
        .map(|j| {
            let (sku, name, price) = MENU[(n * 7 + j * 3) % MENU.len()];
            TransactionLine {
                sku: sku.to_string(),
                name: name.to_string(),
                unit_price: Money::from_minor(price),
                quantity: 1 + ((n + j) % 3) as i64,
            }
        })
        .collect()
}
