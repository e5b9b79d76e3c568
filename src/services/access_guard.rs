//! Per-object password protection.
//!
//! Passwords are hashed with Argon2id and a random salt. An empty hash marks
//! an unprotected object.

use argon2::{
    Argon2, PasswordHash, PasswordVerifier,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use thiserror::Error;
use tokio::task;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("password hashing task failed: {0}")]
    Join(#[from] task::JoinError),
}

/// Hash `password`; the empty password maps to the empty hash.
pub fn hash_password(password: &str) -> Result<String, GuardError> {
    if password.is_empty() {
        return Ok(String::new());
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GuardError::Hash(e.to_string()))
}

/// Check `candidate` against `stored_hash`.
///
/// Unprotected objects accept any candidate. Malformed hashes never match.
pub fn verify_password(candidate: &str, stored_hash: &str) -> bool {
    if stored_hash.is_empty() {
        return true;
    }
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}

/// [`hash_password`] on the blocking pool; Argon2 is deliberately slow.
pub async fn hash_password_blocking(password: String) -> Result<String, GuardError> {
    task::spawn_blocking(move || hash_password(&password)).await?
}

/// [`verify_password`] on the blocking pool. A failed task counts as a mismatch.
pub async fn verify_password_blocking(candidate: String, stored_hash: String) -> bool {
    if stored_hash.is_empty() {
        return true;
    }
    task::spawn_blocking(move || verify_password(&candidate, &stored_hash))
        .await
        .unwrap_or(false)
}
