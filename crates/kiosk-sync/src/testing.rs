//! Test doubles shared by the sync crate's unit tests.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use kiosk_core::validation::compute_total;
use kiosk_core::{
    CandidateTransaction, Heartbeat, Money, PaymentMethod, TransactionLine, TransactionRecord,
    WriteOrigin,
};
use kiosk_db::{Database, DbConfig};

use crate::auth::TerminalClaims;
use crate::error::{SyncError, SyncResult};
use crate::ledger::{CentralLedger, InsertOutcome};

/// Signs a terminal token the way the central side would.
pub fn issue_token(secret: &[u8], terminal_id: &str, lifetime: chrono::Duration) -> String {
    let now = Utc::now();
    let claims = TerminalClaims {
        sub: terminal_id.to_string(),
        iat: now.timestamp(),
        exp: (now + lifetime).timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
}

pub async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub fn coffee_lines() -> Vec<TransactionLine> {
    vec![
        TransactionLine {
            sku: "COF-LATT".into(),
            name: "Caffè latte".into(),
            unit_price: Money::from_minor(4900),
            quantity: 2,
        },
        TransactionLine {
            sku: "BAK-KANE".into(),
            name: "Kanelbulle".into(),
            unit_price: Money::from_minor(3200),
            quantity: 1,
        },
    ]
}

pub fn candidate() -> CandidateTransaction {
    CandidateTransaction {
        idempotency_key: None,
        currency: "SEK".into(),
        payment_method: PaymentMethod::Card,
        lines: coffee_lines(),
        claimed_total: None,
    }
}

/// A valid pending record as the capture path would build it.
pub fn offline_record(terminal_id: &str, key: &str) -> TransactionRecord {
    let lines = coffee_lines();
    let total = compute_total(&lines).unwrap();
    TransactionRecord::pending(key, terminal_id, "SEK", PaymentMethod::Card, lines, total, Utc::now())
}

/// In-memory ledger with scripted answers.
///
/// Keys without a script behave like a real ledger: accepted once, then
/// `AlreadyExists`.
#[derive(Default)]
pub struct ScriptedLedger {
    entries: Mutex<HashMap<String, WriteOrigin>>,
    scripts: Mutex<HashMap<String, InsertOutcome>>,
    unreachable: AtomicBool,
    insert_delay: Mutex<Duration>,
    probe_delay: Mutex<Duration>,
    insert_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    last_heartbeat: Mutex<Option<Heartbeat>>,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every insert of `key` answers `outcome`.
    pub fn script(&self, key: &str, outcome: InsertOutcome) {
        self.scripts.lock().unwrap().insert(key.to_string(), outcome);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        *self.insert_delay.lock().unwrap() = delay;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = delay;
    }

    /// Seeds an entry as if another path had already written it.
    pub fn preload(&self, key: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), WriteOrigin::Direct);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn origin_of(&self, key: &str) -> Option<WriteOrigin> {
        self.entries.lock().unwrap().get(key).copied()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn last_heartbeat(&self) -> Option<Heartbeat> {
        self.last_heartbeat.lock().unwrap().clone()
    }
}

#[async_trait]
impl CentralLedger for ScriptedLedger {
    async fn insert(&self, record: &TransactionRecord, origin: WriteOrigin) -> InsertOutcome {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.insert_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.load(Ordering::SeqCst) {
            return InsertOutcome::Unreachable("connection refused".into());
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get(&record.idempotency_key)
            .cloned();
        if let Some(outcome) = scripted {
            if outcome == InsertOutcome::Accepted {
                self.entries
                    .lock()
                    .unwrap()
                    .insert(record.idempotency_key.clone(), origin);
            }
            return outcome;
        }

        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&record.idempotency_key) {
            InsertOutcome::AlreadyExists
        } else {
            entries.insert(record.idempotency_key.clone(), origin);
            InsertOutcome::Accepted
        }
    }

    async fn probe(&self, heartbeat: &Heartbeat) -> SyncResult<()> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.probe_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SyncError::Unreachable("connection refused".into()));
        }

        *self.last_heartbeat.lock().unwrap() = Some(heartbeat.clone());
        Ok(())
    }
}
