//! Credential store: accounts, remember tokens and the audit log.
//!
//! Components receive the store as an `Arc<dyn CredentialStore>` at
//! construction; there is no global handle.

mod sled_store;

pub use sled_store::SledCredentialStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::AuditRecord;
use crate::types::{Account, AccountId, NewAccount};

/// Credential store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage could not be reached or failed mid-operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Another account already uses this email.
    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    /// Referenced account does not exist.
    #[error("Account not found: {0}")]
    NotFound(AccountId),

    /// Stored data could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}

/// Persisted half of a remember-me token. The validator is only kept hashed.
#[derive(Clone, Serialize, Deserialize)]
pub struct RememberTokenRecord {
    /// Public lookup part of the cookie value.
    pub selector: String,
    /// Owning account.
    pub account_id: AccountId,
    /// Argon2 hash of the secret validator.
    pub validator_hash: String,
    /// User agent that requested the token.
    pub user_agent: String,
    /// When the token was issued.
    pub created_at: DateTime<Utc>,
    /// When the token stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for RememberTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RememberTokenRecord")
            .field("selector", &self.selector)
            .field("account_id", &self.account_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Persistent record of accounts, remember tokens and audit records.
///
/// Lookups by email are case-insensitive.
pub trait CredentialStore: Send + Sync {
    /// Find an account by email regardless of status.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Find an account by email, only if it is active.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn find_active_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .find_account_by_email(email)?
            .filter(Account::is_active))
    }

    /// Get an account by id.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// List all accounts in id order.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Count stored accounts.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn account_count(&self) -> Result<usize, StoreError>;

    /// Set an account's last-login time.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account does not exist, or error if storage fails.
    fn record_login(&self, id: AccountId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Insert an account and its audit record in one transaction.
    ///
    /// The audit record's actor is set to the new account id. Either both
    /// writes land or neither does.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateEmail` if the email is taken, or error if storage fails.
    fn insert_account(
        &self,
        account: &NewAccount,
        audit: &AuditRecord,
    ) -> Result<AccountId, StoreError>;

    /// Replace the role and status of an existing account.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account does not exist, or error if storage fails.
    fn update_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Store a remember-me token.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn insert_remember_token(&self, record: &RememberTokenRecord) -> Result<(), StoreError>;

    /// Append an audit record.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Most recent audit records, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn recent_audit_records(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError>;
}
