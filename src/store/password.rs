//! Password hashing in the scheme Dovecot expects.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::StoreError;

/// Scheme prefix understood by Dovecot's password database.
pub const PASSWORD_SCHEME: &str = "{ARGON2ID}";

/// Hashes a password as `{ARGON2ID}` followed by a PHC string.
///
/// # Errors
///
/// Returns `StoreError::PasswordHash` if hashing fails.
pub fn hash_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| StoreError::PasswordHash {
            message: e.to_string(),
        })?;
    Ok(format!("{PASSWORD_SCHEME}{hash}"))
}

/// Checks a password against a stored hash, with or without the scheme prefix.
#[must_use]
pub fn verify_password(stored: &str, password: &str) -> bool {
    let phc = stored.strip_prefix(PASSWORD_SCHEME).unwrap_or(stored);
    PasswordHash::new(phc).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_carries_scheme() {
        let hash = hash_password("correct-horse").unwrap();
        assert!(hash.starts_with("{ARGON2ID}$argon2id$"));
        assert!(verify_password(&hash, "correct-horse"));
        assert!(!verify_password(&hash, "wrong"));
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        assert!(!verify_password("{ARGON2ID}not-a-hash", "anything"));
    }
}
