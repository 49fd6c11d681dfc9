//! Password hashing, verification, and strength policy.
//!
//! Hashing uses Argon2id with a fresh random salt per call. The work factor
//! comes from [`SecurityConfig`]; values outside the accepted range fall back
//! to the defaults. Hashing and verification run on the blocking pool because
//! they are deliberately expensive.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use thiserror::Error;
use tokio::task;
use tracing::warn;

use crate::config::SecurityConfig;
use crate::constants::limits::{PASSWORD_MAX_CHARS, PASSWORD_MIN_CHARS};

const DEFAULT_MEMORY_COST_KIB: u32 = 8192;
const DEFAULT_TIME_COST: u32 = 3;
const DEFAULT_PARALLELISM: u32 = 1;

/// Throwaway password hashed once at startup. Verifying against its hash
/// costs the same as a real comparison, which keeps "user not found" and
/// "wrong password" indistinguishable by timing.
const DUMMY_PASSWORD: &str = "DummyHardPassword123!";

const DENYLISTED_TERMS: &[&str] = &["password", "passwort", "123456", "qwertz", "qwerty"];

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

pub struct PasswordService {
    params: Params,
    dummy_hash: String,
}

impl PasswordService {
    pub fn new(config: &SecurityConfig) -> Result<Self, PasswordError> {
        let params = resolve_params(config);
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2_with(params.clone())
            .hash_password(DUMMY_PASSWORD.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?
            .to_string();

        Ok(Self { params, dummy_hash })
    }

    /// Hashes a plaintext password with a fresh random salt.
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let params = self.params.clone();
        let password = password.to_string();

        task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2_with(params)
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| PasswordError::Hashing(e.to_string()))
        })
        .await
        .map_err(|e| PasswordError::Hashing(e.to_string()))?
    }

    /// Verifies a plaintext password against a stored hash.
    ///
    /// A malformed stored hash verifies to `false` rather than erroring; the
    /// caller decides whether that means the record needs repair.
    pub async fn verify(&self, password: &str, hash: &str) -> bool {
        let password = password.to_string();
        let hash = hash.to_string();

        let verified = task::spawn_blocking(move || {
            let Ok(parsed) = PasswordHash::new(&hash) else {
                return false;
            };
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .await;

        match verified {
            Ok(result) => result,
            Err(err) => {
                warn!("password verification task panicked: {err}");
                false
            }
        }
    }

    /// Burns one full-cost comparison against the precomputed dummy hash.
    /// Called whenever the username does not resolve to a user.
    pub async fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, &self.dummy_hash).await;
    }

    /// Whether a stored hash parses as a PHC string at all.
    #[must_use]
    pub fn is_valid_hash(hash: &str) -> bool {
        PasswordHash::new(hash).is_ok()
    }
}

/// Checks a candidate password against every policy rule and reports all
/// violations at once, so the user sees the complete list.
pub fn validate_strength(password: &str) -> Result<(), Vec<String>> {
    if password.trim().is_empty() {
        return Err(vec!["Password must not be empty.".to_string()]);
    }

    let mut errors = Vec::new();

    if password.chars().count() < PASSWORD_MIN_CHARS {
        errors.push(format!("At least {PASSWORD_MIN_CHARS} characters."));
    }
    if password.chars().count() > PASSWORD_MAX_CHARS {
        errors.push(format!("At most {PASSWORD_MAX_CHARS} characters."));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("At least one lowercase letter.".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("At least one uppercase letter.".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("At least one digit.".to_string());
    }
    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && c != '_' && !c.is_whitespace())
    {
        errors.push("At least one special character.".to_string());
    }

    let lowered = password.to_lowercase();
    if DENYLISTED_TERMS.iter().any(|term| lowered.contains(term)) {
        errors.push("Avoid obvious dictionary terms.".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn argon2_with(params: Params) -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

/// Builds Argon2 params from config, falling back to the defaults for any
/// value outside the accepted range.
fn resolve_params(config: &SecurityConfig) -> Params {
    let memory = if (1024..=1_048_576).contains(&config.argon2_memory_cost_kib) {
        config.argon2_memory_cost_kib
    } else {
        warn!(
            configured = config.argon2_memory_cost_kib,
            "argon2_memory_cost_kib out of range, using default"
        );
        DEFAULT_MEMORY_COST_KIB
    };
    let time = if (1..=16).contains(&config.argon2_time_cost) {
        config.argon2_time_cost
    } else {
        warn!(
            configured = config.argon2_time_cost,
            "argon2_time_cost out of range, using default"
        );
        DEFAULT_TIME_COST
    };
    let parallelism = if (1..=16).contains(&config.argon2_parallelism) {
        config.argon2_parallelism
    } else {
        warn!(
            configured = config.argon2_parallelism,
            "argon2_parallelism out of range, using default"
        );
        DEFAULT_PARALLELISM
    };

    Params::new(memory, time, parallelism, None)
        .unwrap_or_else(|_| Params::new(DEFAULT_MEMORY_COST_KIB, DEFAULT_TIME_COST, DEFAULT_PARALLELISM, None).expect("default argon2 params are valid"))
}
