//! Certificate password hashing
//!
//! The vault never stores container passwords. It keeps an Argon2id
//! hash so a caller-supplied password can be checked before the
//! expensive container decrypt is attempted, and so audit trails can
//! record failed attempts without ever seeing plaintext at rest.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::CryptoError;

/// Hash a certificate password with Argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))
}

/// Check a password against a stored hash. Unparseable hashes verify
/// as false rather than erroring.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
