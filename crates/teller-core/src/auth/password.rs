//! Bcrypt password hashing.
//!
//! Hashing is CPU-bound by design; async callers should run these on a
//! blocking thread.

use super::AuthError;

/// Password used for the dummy hash. Never a real credential.
const DUMMY_PASSWORD: &str = "teller-dummy-password-for-timing";

/// Hash a password with bcrypt at the given cost.
///
/// # Errors
///
/// Returns `Internal` if the cost is out of range or hashing fails.
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost)
        .map_err(|e| AuthError::Internal(format!("Password hashing failed: {e}")))
}

/// Verify a password against a bcrypt hash. Malformed hashes never match.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash could not be checked");
            false
        }
    }
}

/// Hash verified in place of a real one when no usable account exists, so
/// unknown and known emails cost the same.
///
/// # Errors
///
/// Returns `Internal` if hashing fails.
pub fn dummy_hash(cost: u32) -> Result<String, AuthError> {
    hash_password(DUMMY_PASSWORD, cost)
}
