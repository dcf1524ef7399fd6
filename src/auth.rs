//! Password hashing and session token generation
//!
//! Passwords are hashed with scrypt into PHC strings; verification parses
//! the stored hash and never leaks why it failed. Session tokens are
//! opaque random alphanumeric strings.

use rand::Rng;
use scrypt::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use scrypt::Scrypt;

use crate::error::AppError;

/// Length of generated session tokens
const TOKEN_LEN: usize = 32;

/// Hash a password using scrypt with a fresh random salt.
pub fn hash_password(plain: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut scrypt::password_hash::rand_core::OsRng);
    let hash = Scrypt
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| AppError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Hash a password on the blocking thread pool.
///
/// scrypt is CPU-bound by design; sessions call this before sending the
/// registration command so the coordinator's command loop never pays the
/// hash cost.
pub async fn hash_password_blocking(plain: &str) -> Result<String, AppError> {
    let plain = plain.to_string();
    tokio::task::spawn_blocking(move || hash_password(&plain)).await?
}

/// Verify a password on the blocking thread pool. See
/// [`hash_password_blocking`] for why this runs off the async workers.
pub async fn verify_password_blocking(hash: String, plain: String) -> Result<bool, AppError> {
    Ok(tokio::task::spawn_blocking(move || verify_password(&hash, &plain)).await?)
}

/// Verify a password against a stored PHC hash string.
///
/// Any parse or mismatch failure is reported as `false`; the caller maps
/// it to a generic invalid-credentials outcome.
pub fn verify_password(hash: &str, plain: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Scrypt.verify_password(plain.as_bytes(), &parsed).is_ok()
}

/// Generate a new opaque session token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("pw123").unwrap();
        assert!(verify_password(&hash, "pw123"));
        assert!(!verify_password(&hash, "pw124"));
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(!verify_password("not-a-phc-string", "pw123"));
    }

    #[tokio::test]
    async fn test_blocking_wrappers_match_sync() {
        let hash = hash_password_blocking("pw123").await.unwrap();
        assert!(verify_password_blocking(hash.clone(), "pw123".into()).await.unwrap());
        assert!(!verify_password_blocking(hash, "nope".into()).await.unwrap());
    }

    #[test]
    fn test_token_shape() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_eq!(t1.len(), TOKEN_LEN);
        assert_ne!(t1, t2);
        // Tokens must never contain the envelope separator
        assert!(!t1.contains('|'));
    }
}
