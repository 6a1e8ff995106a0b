//! # Kiosk Authentication
//!
//! The link to the central ledger counts as up only while the kiosk holds
//! a valid session. Both facts are folded into a single link state by the
//! [`LinkMonitor`](crate::link::LinkMonitor).
//!
//! ## Providers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  AuthProvider                                                          │
//! │  ├── StaticAuth   fixed terminal id, switchable flag (kiosk setups     │
//! │  │                without per-device credentials)                     │
//! │  └── TokenAuth    HS256 JWT issued to the terminal; authenticated      │
//! │                   while the signature verifies, `sub` matches the      │
//! │                   terminal id and `exp` is in the future               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Clock skew tolerated when checking `exp` (seconds).
const EXP_LEEWAY_SECS: u64 = 5;

/// Source of the kiosk's identity and session validity.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// True while the kiosk may talk to the central ledger.
    async fn is_authenticated(&self) -> bool;

    /// Identity stamped on captured sales and heartbeats.
    fn terminal_id(&self) -> &str;
}

// =============================================================================
// Static Auth
// =============================================================================

/// Fixed identity with a switchable session flag.
#[derive(Debug)]
pub struct StaticAuth {
    terminal_id: String,
    authenticated: AtomicBool,
}

impl StaticAuth {
    /// Creates an authenticated provider.
    pub fn new(terminal_id: impl Into<String>) -> Self {
        StaticAuth {
            terminal_id: terminal_id.into(),
            authenticated: AtomicBool::new(true),
        }
    }

    /// Logs the kiosk in or out.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn terminal_id(&self) -> &str {
        &self.terminal_id
    }
}

// =============================================================================
// Token Auth
// =============================================================================

/// JWT claims carried by a terminal token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalClaims {
    /// Terminal id.
    pub sub: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// Session backed by a JWT issued to the terminal.
pub struct TokenAuth {
    terminal_id: String,
    decoding_key: DecodingKey,
    token: RwLock<Option<String>>,
}

impl TokenAuth {
    /// Creates a provider with no token yet.
    pub fn new(terminal_id: impl Into<String>, secret: &[u8]) -> Self {
        TokenAuth {
            terminal_id: terminal_id.into(),
            decoding_key: DecodingKey::from_secret(secret),
            token: RwLock::new(None),
        }
    }

    /// Installs a new token (after login or refresh).
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
        debug!(terminal = %self.terminal_id, "Terminal token updated");
    }

    /// Drops the current token.
    pub async fn clear(&self) {
        *self.token.write().await = None;
    }

    /// Verifies a token against this provider's key and terminal id.
    pub fn verify(&self, token: &str) -> SyncResult<TerminalClaims> {
        let mut validation = Validation::default();
        validation.leeway = EXP_LEEWAY_SECS;

        let data = decode::<TerminalClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| SyncError::AuthFailed(format!("Invalid token: {}", e)))?;

        if data.claims.sub != self.terminal_id {
            return Err(SyncError::AuthFailed(format!(
                "Token issued to {}, not {}",
                data.claims.sub, self.terminal_id
            )));
        }

        Ok(data.claims)
    }
}

#[async_trait]
impl AuthProvider for TokenAuth {
    async fn is_authenticated(&self) -> bool {
        let guard = self.token.read().await;
        match guard.as_deref() {
            Some(token) => match self.verify(token) {
                Ok(_) => true,
                Err(e) => {
                    warn!(terminal = %self.terminal_id, error = %e, "Terminal token rejected");
                    false
                }
            },
            None => false,
        }
    }

    fn terminal_id(&self) -> &str {
        &self.terminal_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::issue_token;
    use chrono::Duration;

    const SECRET: &[u8] = b"kiosk-test-secret";

    #[tokio::test]
    async fn test_static_auth_toggle() {
        let auth = StaticAuth::new("kiosk-01");
        assert!(auth.is_authenticated().await);
        assert_eq!(auth.terminal_id(), "kiosk-01");

        auth.set_authenticated(false);
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_token_auth_valid_token() {
        let auth = TokenAuth::new("kiosk-01", SECRET);
        assert!(!auth.is_authenticated().await);

        let token = issue_token(SECRET, "kiosk-01", Duration::hours(1));
        auth.set_token(token).await;
        assert!(auth.is_authenticated().await);

        auth.clear().await;
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_token_auth_rejects_expired_and_foreign_tokens() {
        let auth = TokenAuth::new("kiosk-01", SECRET);

        let expired = issue_token(SECRET, "kiosk-01", Duration::hours(-1));
        auth.set_token(expired).await;
        assert!(!auth.is_authenticated().await);

        let foreign = issue_token(SECRET, "kiosk-02", Duration::hours(1));
        assert!(matches!(auth.verify(&foreign), Err(SyncError::AuthFailed(_))));

        let wrong_key = issue_token(b"other", "kiosk-01", Duration::hours(1));
        auth.set_token(wrong_key).await;
        assert!(!auth.is_authenticated().await);
    }
}
