//! Password hashing and verification using Argon2id.
//!
//! Hashing is CPU-intensive, so the async entry points run it on the blocking
//! pool instead of stalling the runtime.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use thiserror::Error;
use tokio::task;

use crate::config::SecurityConfig;

#[derive(Debug, Error)]
pub enum HasherError {
    #[error("Password must not be empty")]
    EmptyInput,

    #[error("Invalid Argon2 params: {0}")]
    Params(String),

    #[error("Failed to hash password: {0}")]
    Backend(String),
}

/// One-way password hasher with a fixed work factor.
#[derive(Clone)]
pub struct CredentialHasher {
    params: Params,
}

impl CredentialHasher {
    pub fn new(config: &SecurityConfig) -> Result<Self, HasherError> {
        let params = Params::new(
            config.argon2_memory_cost_kib,
            config.argon2_time_cost,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| HasherError::Params(e.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash `plaintext` into a PHC string. Fails only on empty input.
    pub fn hash_blocking(&self, plaintext: &str) -> Result<String, HasherError> {
        if plaintext.is_empty() {
            return Err(HasherError::EmptyInput);
        }

        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HasherError::Backend(e.to_string()))
    }

    /// Constant-time check of `plaintext` against a stored hash.
    ///
    /// A malformed stored hash simply fails to verify.
    #[must_use]
    pub fn verify_blocking(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };

        // The PHC string carries its own params, so any Argon2 instance verifies it.
        self.argon2()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    pub async fn hash(&self, plaintext: &str) -> Result<String, HasherError> {
        if plaintext.is_empty() {
            return Err(HasherError::EmptyInput);
        }

        let hasher = self.clone();
        let plaintext = plaintext.to_string();
        task::spawn_blocking(move || hasher.hash_blocking(&plaintext))
            .await
            .map_err(|e| HasherError::Backend(format!("Password hashing task panicked: {e}")))?
    }

    pub async fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let hasher = self.clone();
        let plaintext = plaintext.to_string();
        let hash = hash.to_string();
        task::spawn_blocking(move || hasher.verify_blocking(&plaintext, &hash))
            .await
            .unwrap_or(false)
    }
}
