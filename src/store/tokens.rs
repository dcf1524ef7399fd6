//! Token store: opaque session token -> (userId, username, expiry)
//!
//! At most one live token per identity: issuing a token first revokes any
//! prior entry for the same (userId, username). Redeeming re-validates the
//! expiry even if the cleanup sweep has not run yet.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth;
use crate::error::AppError;
use crate::store::RecordStore;
use crate::types::UserId;

/// Persisted token record, keyed by the opaque token string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub user_id: UserId,
    pub username: String,
    /// Absolute expiry, epoch seconds.
    pub expires_at: i64,
}

/// Token-keyed session record set over a [`RecordStore`] backend.
pub struct TokenStore {
    store: Arc<dyn RecordStore<TokenRecord>>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(store: Arc<dyn RecordStore<TokenRecord>>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Issue a fresh token for an identity, replacing any prior one.
    ///
    /// The expiry slides: every successful login or redeem goes through
    /// here and gets a full TTL again.
    pub async fn issue(&self, user_id: UserId, username: &str) -> Result<String, AppError> {
        self.revoke(user_id, username).await?;
        let token = auth::generate_token();
        let record = TokenRecord {
            user_id,
            username: username.to_string(),
            expires_at: Self::now() + self.ttl.as_secs() as i64,
        };
        self.store.put(&token, record).await?;
        Ok(token)
    }

    /// Redeem a token, returning the identity it names.
    ///
    /// Absence means invalid; presence alone is not enough — an expired
    /// entry the cleanup sweep has not reached yet is still rejected
    /// (and removed on the spot).
    pub async fn redeem(&self, token: &str) -> Result<TokenRecord, AppError> {
        let Some(record) = self.store.get(token).await? else {
            return Err(AppError::InvalidToken);
        };
        if Self::now() > record.expires_at {
            self.store.delete(token).await?;
            return Err(AppError::TokenExpired);
        }
        Ok(record)
    }

    /// Remove every token held by an identity.
    pub async fn revoke(&self, user_id: UserId, username: &str) -> Result<(), AppError> {
        for (token, record) in self.store.scan().await? {
            if record.user_id == user_id && record.username == username {
                self.store.delete(&token).await?;
            }
        }
        Ok(())
    }

    /// Remove every expired token. Returns how many were purged.
    pub async fn purge_expired(&self) -> Result<usize, AppError> {
        let now = Self::now();
        let mut purged = 0;
        for (token, record) in self.store.scan().await? {
            if now > record.expires_at {
                debug!(username = %record.username, "removing expired token");
                self.store.delete(&token).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}
