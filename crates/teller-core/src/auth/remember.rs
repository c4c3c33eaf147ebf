//! Remember-me tokens.
//!
//! The cookie value is `selector:validator`. Only an Argon2 hash of the
//! validator is stored, next to the selector used to find it. Tokens are
//! written once and never redeemed.

use std::time::Duration;

use argon2::{
    Argon2,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};

use super::AuthError;
use crate::audit::MAX_USER_AGENT_LEN;
use crate::store::RememberTokenRecord;
use crate::types::AccountId;

const SELECTOR_BYTES: usize = 12;
const VALIDATOR_BYTES: usize = 32;

/// Token handed to the client. Holds the only copy of the plaintext validator.
#[derive(Clone)]
pub struct RememberToken {
    selector: String,
    validator: SecretString,
    expires_at: DateTime<Utc>,
}

impl RememberToken {
    /// Mint a token for an account, returning it with the record to store.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the validator cannot be hashed.
    pub fn mint(
        account_id: AccountId,
        lifetime: Duration,
        user_agent: &str,
    ) -> Result<(Self, RememberTokenRecord), AuthError> {
        let selector = hex::encode(random_bytes::<SELECTOR_BYTES>());
        let validator = hex::encode(random_bytes::<VALIDATOR_BYTES>());

        let salt = SaltString::generate(&mut OsRng);
        let validator_hash = Argon2::default()
            .hash_password(validator.as_bytes(), &salt)
            .map_err(|e| AuthError::Internal(format!("Remember token hashing failed: {e}")))?
            .to_string();

        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(lifetime)
                .map_err(|e| AuthError::Internal(format!("Remember lifetime out of range: {e}")))?;

        let record = RememberTokenRecord {
            selector: selector.clone(),
            account_id,
            validator_hash,
            user_agent: user_agent.chars().take(MAX_USER_AGENT_LEN).collect(),
            created_at,
            expires_at,
        };

        let token = Self {
            selector,
            validator: SecretString::from(validator),
            expires_at,
        };

        Ok((token, record))
    }

    /// Value for the remember-me cookie.
    #[must_use]
    pub fn cookie_value(&self) -> String {
        format!("{}:{}", self.selector, self.validator.expose_secret())
    }

    /// Public selector.
    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Expiry time.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl std::fmt::Debug for RememberToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RememberToken")
            .field("selector", &self.selector)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
