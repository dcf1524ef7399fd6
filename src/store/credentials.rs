//! Credential store: username -> (userId, address hint, password hash)
//!
//! Usernames are unique keys. The check-then-insert in [`CredentialStore::register`]
//! is not atomic on its own — the coordinator actor serializes all calls,
//! which is what closes the duplicate-registration race.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::store::RecordStore;
use crate::types::UserId;

/// Persisted credential record, keyed by username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub user_id: UserId,
    /// Last-seen network address, kept as an audit hint only.
    pub address: String,
    pub username: String,
    pub password_hash: String,
}

/// Username-keyed credential set over a [`RecordStore`] backend.
pub struct CredentialStore {
    store: Arc<dyn RecordStore<CredentialRecord>>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn RecordStore<CredentialRecord>>) -> Self {
        Self { store }
    }

    pub async fn is_taken(&self, username: &str) -> Result<bool, AppError> {
        Ok(self.store.get(username).await?.is_some())
    }

    /// Register a new user, assigning a fresh id.
    ///
    /// Fails with [`AppError::UsernameTaken`] if the name exists. Callers
    /// must hold the shared serialization point across this call.
    pub async fn register(
        &self,
        username: &str,
        password_hash: &str,
        address: &str,
    ) -> Result<CredentialRecord, AppError> {
        if self.is_taken(username).await? {
            return Err(AppError::UsernameTaken(username.to_string()));
        }
        let record = CredentialRecord {
            user_id: UserId::new(),
            address: address.to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };
        self.store.put(username, record.clone()).await?;
        Ok(record)
    }

    pub async fn lookup(&self, username: &str) -> Result<Option<CredentialRecord>, AppError> {
        self.store.get(username).await
    }
}
