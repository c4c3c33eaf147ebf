//! Credential store backed by sled.

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};

use super::{CredentialStore, RememberTokenRecord, StoreError};
use crate::audit::AuditRecord;
use crate::config::StoreSettings;
use crate::types::{Account, AccountId, NewAccount, normalize_email};

const ACCOUNTS: &str = "accounts";
const ACCOUNTS_BY_EMAIL: &str = "accounts_by_email";
const REMEMBER_TOKENS: &str = "remember_tokens";
const AUDIT_LOG: &str = "audit_log";

/// Credential store over an embedded sled database.
///
/// Every lookup is a key access on a dedicated tree; there is no query text
/// to build from user input.
pub struct SledCredentialStore {
    db: sled::Db,
    accounts: sled::Tree,
    by_email: sled::Tree,
    remember_tokens: sled::Tree,
    audit: sled::Tree,
}

impl SledCredentialStore {
    /// Open or create a store, retrying with backoff.
    ///
    /// Each failed attempt waits twice as long as the previous one. Gives up
    /// after `connect_attempts` or once the next wait would pass the connect
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the database cannot be opened.
    pub fn open(path: &Path, settings: &StoreSettings) -> Result<Self, StoreError> {
        let deadline = Instant::now() + settings.connect_timeout();
        let mut delay = settings.retry_backoff();
        let mut attempt = 1;

        loop {
            match sled::open(path) {
                Ok(db) => return Self::with_db(db),
                Err(e) => {
                    let out_of_time = Instant::now() + delay > deadline;
                    if attempt >= settings.connect_attempts || out_of_time {
                        return Err(StoreError::Unavailable(format!(
                            "Failed to open store at {} after {attempt} attempt(s): {e}",
                            path.display()
                        )));
                    }
                    tracing::warn!(
                        path = %path.display(),
                        attempt,
                        retry_in_ms = delay.as_millis(),
                        error = %e,
                        "Store open failed, retrying"
                    );
                    std::thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Open or create a store with default connection settings.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the database cannot be opened.
    pub fn open_path(path: &Path) -> Result<Self, StoreError> {
        Self::open(path, &StoreSettings::default())
    }

    /// Create a store over an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if the trees cannot be opened.
    pub fn with_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            accounts: db.open_tree(ACCOUNTS)?,
            by_email: db.open_tree(ACCOUNTS_BY_EMAIL)?,
            remember_tokens: db.open_tree(REMEMBER_TOKENS)?,
            audit: db.open_tree(AUDIT_LOG)?,
            db,
        })
    }

    /// Get the underlying sled database.
    #[must_use]
    pub const fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Number of stored remember tokens.
    #[must_use]
    pub fn remember_token_count(&self) -> usize {
        self.remember_tokens.len()
    }

    fn write_account(&self, account: &Account) -> Result<(), StoreError> {
        let value = serde_json::to_vec(account)?;
        self.accounts.insert(account.id.to_key(), value)?;
        self.accounts.flush()?;
        Ok(())
    }

    fn existing(&self, id: AccountId) -> Result<Account, StoreError> {
        self.get_account(id)?.ok_or(StoreError::NotFound(id))
    }
}

impl CredentialStore for SledCredentialStore {
    fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let key = normalize_email(email);
        match self.by_email.get(key.as_bytes())? {
            Some(id_bytes) => {
                let id = AccountId::from_key(&id_bytes)
                    .ok_or_else(|| StoreError::Corrupt(format!("Bad email index entry for {key}")))?;
                self.get_account(id)
            }
            None => Ok(None),
        }
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        match self.accounts.get(id.to_key())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.accounts
            .iter()
            .values()
            .map(|value| -> Result<Account, StoreError> {
                Ok(serde_json::from_slice(&value?)?)
            })
            .collect()
    }

    fn account_count(&self) -> Result<usize, StoreError> {
        Ok(self.accounts.len())
    }

    fn record_login(&self, id: AccountId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut account = self.existing(id)?;
        account.last_login = Some(at);
        self.write_account(&account)
    }

    fn insert_account(
        &self,
        account: &NewAccount,
        audit: &AuditRecord,
    ) -> Result<AccountId, StoreError> {
        let email = normalize_email(&account.email);
        let id = AccountId(self.db.generate_id()?);
        let audit_key = self.db.generate_id()?.to_be_bytes();

        let stored = account.clone().into_account(id, Utc::now());
        let account_value = serde_json::to_vec(&stored)?;
        let audit_value = serde_json::to_vec(&audit.clone().actor(Some(id)))?;
        let id_key = id.to_key();

        let result = (&self.accounts, &self.by_email, &self.audit).transaction(
            |(accounts, by_email, audit_log)| {
                if by_email.get(email.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(
                        StoreError::DuplicateEmail(email.clone()),
                    ));
                }
                accounts.insert(&id_key[..], account_value.as_slice())?;
                by_email.insert(email.as_bytes(), &id_key[..])?;
                audit_log.insert(&audit_key[..], audit_value.as_slice())?;
                Ok(())
            },
        );

        match result {
            Ok(()) => {
                self.db.flush()?;
                Ok(id)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn update_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut stored = self.existing(account.id)?;
        stored.role = account.role;
        stored.status = account.status;
        self.write_account(&stored)
    }

    fn insert_remember_token(&self, record: &RememberTokenRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(record)?;
        self.remember_tokens
            .insert(record.selector.as_bytes(), value)?;
        Ok(())
    }

    fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let key = self.db.generate_id()?.to_be_bytes();
        let value = serde_json::to_vec(record)?;
        self.audit.insert(key, value)?;
        Ok(())
    }

    fn recent_audit_records(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        self.audit
            .iter()
            .values()
            .rev()
            .take(limit)
            .map(|value| -> Result<AuditRecord, StoreError> {
                Ok(serde_json::from_slice(&value?)?)
            })
            .collect()
    }
}

impl std::fmt::Debug for SledCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledCredentialStore")
            .field("accounts", &self.accounts.len())
            .field("audit_records", &self.audit.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditStatus};
    use crate::types::{AccountStatus, Role};
    use pretty_assertions::assert_eq;

    fn open_temp() -> (tempfile::TempDir, SledCredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledCredentialStore::open_path(dir.path()).unwrap();
        (dir, store)
    }

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            name: "Jane Doe".to_string(),
            email: email.to_string(),
            phone: "5551234567".to_string(),
            password_hash: "$2b$04$notarealhash".to_string(),
            role: Role::Customer,
            status: AccountStatus::Active,
        }
    }

    fn registration_audit() -> AuditRecord {
        AuditRecord::new(AuditAction::Registration, AuditStatus::Success)
            .detail("New user registration")
    }

    #[test]
    fn test_insert_and_find_ignores_case() {
        let (_dir, store) = open_temp();
        let id = store
            .insert_account(&new_account("Jane@Example.com"), &registration_audit())
            .unwrap();

        let found = store
            .find_account_by_email("  jane@EXAMPLE.com")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.email, "Jane@Example.com");
        assert_eq!(store.account_count().unwrap(), 1);
    }

    #[test]
    fn test_insert_writes_audit_with_new_actor() {
        let (_dir, store) = open_temp();
        let id = store
            .insert_account(&new_account("jane@example.com"), &registration_audit())
            .unwrap();

        let records = store.recent_audit_records(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor_id, Some(id));
        assert_eq!(records[0].action, AuditAction::Registration);
    }

    #[test]
    fn test_duplicate_email_writes_nothing() {
        let (_dir, store) = open_temp();
        store
            .insert_account(&new_account("jane@example.com"), &registration_audit())
            .unwrap();

        let result = store.insert_account(&new_account("JANE@example.com"), &registration_audit());
        assert!(matches!(result, Err(StoreError::DuplicateEmail(_))));
        assert_eq!(store.account_count().unwrap(), 1);
        assert_eq!(store.recent_audit_records(10).unwrap().len(), 1);
    }

    #[test]
    fn test_active_lookup_skips_disabled() {
        let (_dir, store) = open_temp();
        let id = store
            .insert_account(&new_account("jane@example.com"), &registration_audit())
            .unwrap();

        let mut account = store.get_account(id).unwrap().unwrap();
        account.status = AccountStatus::Disabled;
        store.update_account(&account).unwrap();

        assert!(store
            .find_active_account_by_email("jane@example.com")
            .unwrap()
            .is_none());
        assert!(store
            .find_account_by_email("jane@example.com")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_record_login() {
        let (_dir, store) = open_temp();
        let id = store
            .insert_account(&new_account("jane@example.com"), &registration_audit())
            .unwrap();
        let at = Utc::now();

        store.record_login(id, at).unwrap();
        assert_eq!(store.get_account(id).unwrap().unwrap().last_login, Some(at));

        let missing = store.record_login(AccountId(999_999), at);
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_recent_audit_newest_first() {
        let (_dir, store) = open_temp();
        for detail in ["first", "second", "third"] {
            store
                .insert_audit_record(
                    &AuditRecord::new(AuditAction::Login, AuditStatus::Failed).detail(detail),
                )
                .unwrap();
        }

        let details: Vec<_> = store
            .recent_audit_records(2)
            .unwrap()
            .into_iter()
            .map(|r| r.detail)
            .collect();
        assert_eq!(details, vec!["third".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_list_accounts_in_id_order() {
        let (_dir, store) = open_temp();
        let first = store
            .insert_account(&new_account("a@example.com"), &registration_audit())
            .unwrap();
        let second = store
            .insert_account(&new_account("b@example.com"), &registration_audit())
            .unwrap();

        let ids: Vec<_> = store.list_accounts().unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_reopen_keeps_accounts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledCredentialStore::open_path(dir.path()).unwrap();
            store
                .insert_account(&new_account("jane@example.com"), &registration_audit())
                .unwrap();
        }

        let store = SledCredentialStore::open_path(dir.path()).unwrap();
        assert!(store
            .find_account_by_email("jane@example.com")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_open_gives_up_after_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-directory");
        std::fs::write(&file, b"plain file").unwrap();

        let settings = StoreSettings {
            data_dir: None,
            connect_attempts: 2,
            retry_backoff_ms: 1,
            connect_timeout_secs: 5,
        };

        let result = SledCredentialStore::open(&file.join("db"), &settings);
        match result {
            Err(StoreError::Unavailable(msg)) => assert!(msg.contains("2 attempt")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
