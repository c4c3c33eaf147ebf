//! Login, registration and logout.
//!
//! `Authenticator` is the boundary where store errors stop: everything it
//! returns is an [`AuthError`], and raw storage failures are logged here and
//! reported as `StoreUnavailable`.

pub mod password;
mod remember;

pub use remember::RememberToken;

use std::sync::Arc;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::audit::{AuditAction, AuditLogger, AuditRecord, AuditStatus};
use crate::config::AuthSettings;
use crate::session::{Session, SessionManager};
use crate::store::{CredentialStore, StoreError};
use crate::types::{Account, AccountId, AccountStatus, NewAccount, RequestMeta, Role};
use crate::validation::{self, ValidationIssue};

/// Authentication errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Submitted input is malformed.
    #[error("{}", validation::join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// Unknown email, wrong password or disabled account.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Email already registered.
    #[error("Email address is already registered")]
    DuplicateEmail,

    /// Referenced account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Credential store could not be used. Details are logged, not shown.
    #[error("Service temporarily unavailable")]
    StoreUnavailable,

    /// Anti-forgery token missing, wrong or expired.
    #[error("Invalid or expired form token")]
    CsrfRejected,

    /// No live session.
    #[error("Authentication required")]
    NotAuthenticated,

    /// Unexpected failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Translate a store error, logging the detail.
    #[must_use]
    pub fn from_store(error: StoreError, context: &str) -> Self {
        match error {
            StoreError::DuplicateEmail(_) => Self::DuplicateEmail,
            StoreError::NotFound(id) => Self::AccountNotFound(id),
            other => {
                tracing::error!(error = %other, context, "Credential store failure");
                Self::StoreUnavailable
            }
        }
    }
}

/// Login form input.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Email address.
    pub identifier: String,
    /// Plaintext password.
    pub password: SecretString,
    /// Issue a remember-me token.
    pub remember: bool,
}

impl Credentials {
    /// Create credentials without remember-me.
    #[must_use]
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: SecretString::from(password.into()),
            remember: false,
        }
    }

    /// Request a remember-me token.
    #[must_use]
    pub const fn remember(mut self, remember: bool) -> Self {
        self.remember = remember;
        self
    }
}

/// Registration form input.
#[derive(Debug, Clone)]
pub struct RegistrationForm {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Phone number.
    pub phone: String,
    /// Plaintext password.
    pub password: SecretString,
    /// Password confirmation.
    pub confirm_password: SecretString,
}

/// Result of a successful login.
#[derive(Debug)]
pub struct LoginSuccess {
    /// New authenticated session with a fresh id.
    pub session: Session,
    /// Remember-me token, when requested.
    pub remember: Option<RememberToken>,
}

/// Outcome of registering and logging in with the same credentials.
#[derive(Debug)]
pub enum Registration {
    /// The new account is logged in.
    LoggedIn(LoginSuccess),
    /// The account exists but the follow-up login could not complete.
    LoginPending(AccountId),
}

/// Verifies credentials and manages account lifecycle events.
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    audit: AuditLogger,
    sessions: SessionManager,
    settings: AuthSettings,
    dummy_hash: String,
}

impl Authenticator {
    /// Create an authenticator. Hashes the dummy password once at the configured cost.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the configured cost cannot be used.
    pub fn new(store: Arc<dyn CredentialStore>, settings: AuthSettings) -> Result<Self, AuthError> {
        let dummy_hash = password::dummy_hash(settings.password_cost)?;
        Ok(Self {
            audit: AuditLogger::new(Arc::clone(&store)),
            sessions: SessionManager::new(settings.session_lifetime()),
            store,
            settings,
            dummy_hash,
        })
    }

    /// Audit logger shared with this authenticator.
    #[must_use]
    pub const fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Session policy in use.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Authenticate with email and password.
    ///
    /// The password is always checked against a bcrypt hash, the dummy one
    /// when the account is unknown or disabled, so every failure looks and
    /// costs the same.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty fields, `InvalidCredentials` for any
    /// rejected login, or `StoreUnavailable` if the store fails.
    pub fn login(
        &self,
        credentials: &Credentials,
        meta: &RequestMeta,
    ) -> Result<LoginSuccess, AuthError> {
        let identifier = credentials.identifier.trim();
        let secret = credentials.password.expose_secret();
        if identifier.is_empty() || secret.is_empty() {
            return Err(AuthError::Validation(vec![ValidationIssue::CredentialsMissing]));
        }

        let found = self
            .store
            .find_account_by_email(identifier)
            .map_err(|e| AuthError::from_store(e, "login lookup"))?;
        let actor = found.as_ref().map(|a| a.id);
        let usable = found.filter(Account::is_active);

        let hash = usable
            .as_ref()
            .map_or(self.dummy_hash.as_str(), |a| a.password_hash.as_str());
        let verified = password::verify_password(secret, hash);

        let Some(account) = usable.filter(|_| verified) else {
            self.audit.record(
                &AuditRecord::new(AuditAction::Login, AuditStatus::Failed)
                    .actor(actor)
                    .detail("Invalid username or password")
                    .request(meta),
            );
            tracing::warn!(email = %identifier, ip = %meta.ip, "Login failed");
            return Err(AuthError::InvalidCredentials);
        };

        let now = Utc::now();
        let session = Session::authenticated(account.identity(now));

        let remember = if credentials.remember {
            let (token, record) = RememberToken::mint(
                account.id,
                self.settings.remember_lifetime(),
                &meta.user_agent,
            )?;
            self.store
                .insert_remember_token(&record)
                .map_err(|e| AuthError::from_store(e, "remember token"))?;
            Some(token)
        } else {
            None
        };

        self.store
            .record_login(account.id, now)
            .map_err(|e| AuthError::from_store(e, "record login"))?;

        self.audit.record(
            &AuditRecord::new(AuditAction::Login, AuditStatus::Success)
                .actor(Some(account.id))
                .detail("User logged in successfully")
                .request(meta),
        );
        tracing::info!(account_id = %account.id, ip = %meta.ip, "Login succeeded");

        Ok(LoginSuccess { session, remember })
    }

    /// Register a customer account.
    ///
    /// The account and its audit record are written in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `Validation` with every problem found, `DuplicateEmail`, or
    /// `StoreUnavailable`.
    pub fn register(
        &self,
        form: &RegistrationForm,
        meta: &RequestMeta,
    ) -> Result<AccountId, AuthError> {
        let audit = AuditRecord::new(AuditAction::Registration, AuditStatus::Success)
            .detail("New user registration")
            .request(meta);
        let id = self.create_account(form, Role::Customer, &audit)?;
        tracing::info!(account_id = %id, ip = %meta.ip, "Account registered");
        Ok(id)
    }

    /// Register, then log in with the same email and password.
    ///
    /// The login goes through the normal path, so it also proves the stored
    /// hash matches the submitted password. Once the account is stored, a
    /// login that fails for any other reason yields `LoginPending`.
    ///
    /// # Errors
    ///
    /// Returns any `register` error, or `Internal` if the stored hash rejects
    /// the submitted password.
    pub fn register_and_login(
        &self,
        form: &RegistrationForm,
        meta: &RequestMeta,
    ) -> Result<Registration, AuthError> {
        let id = self.register(form, meta)?;
        let credentials = Credentials {
            identifier: form.email.clone(),
            password: form.password.clone(),
            remember: false,
        };

        match self.login(&credentials, meta) {
            Ok(success) => Ok(Registration::LoggedIn(success)),
            Err(AuthError::InvalidCredentials) => {
                tracing::error!(account_id = %id, "Registered account failed to authenticate");
                Err(AuthError::Internal(
                    "new account could not authenticate".to_string(),
                ))
            }
            Err(e) => {
                tracing::warn!(account_id = %id, error = %e, "Registered account not logged in");
                Ok(Registration::LoginPending(id))
            }
        }
    }

    /// Log out. Audits only if the session was authenticated; calling again is a no-op.
    ///
    /// Returns whether an authenticated session was ended.
    pub fn logout(&self, session: &mut Session, meta: &RequestMeta) -> bool {
        let ended = session.identity().map(|identity| identity.account_id);

        if let Some(account_id) = ended {
            self.audit.record(
                &AuditRecord::new(AuditAction::Logout, AuditStatus::Success)
                    .actor(Some(account_id))
                    .detail("User logged out")
                    .request(meta),
            );
            tracing::info!(account_id = %account_id, "Logged out");
        }

        self.sessions.destroy(session);
        ended.is_some()
    }

    /// Create an account with any role on an operator's behalf.
    ///
    /// # Errors
    ///
    /// Same as `register`.
    pub fn provision_account(
        &self,
        form: &RegistrationForm,
        role: Role,
        meta: &RequestMeta,
    ) -> Result<AccountId, AuthError> {
        let audit = AuditRecord::new(AuditAction::AccountCreated, AuditStatus::Success)
            .detail(format!("Account created with role {role}"))
            .request(meta);
        let id = self.create_account(form, role, &audit)?;
        tracing::info!(account_id = %id, %role, "Account provisioned");
        Ok(id)
    }

    /// Enable or disable an account.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` or `StoreUnavailable`.
    pub fn set_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        meta: &RequestMeta,
    ) -> Result<Account, AuthError> {
        self.change_account(id, meta, AuditAction::StatusChanged, |account| {
            account.status = status;
            format!("Status set to {status}")
        })
    }

    /// Change an account's role.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` or `StoreUnavailable`.
    pub fn set_account_role(
        &self,
        id: AccountId,
        role: Role,
        meta: &RequestMeta,
    ) -> Result<Account, AuthError> {
        self.change_account(id, meta, AuditAction::RoleChanged, |account| {
            account.role = role;
            format!("Role set to {role}")
        })
    }

    fn create_account(
        &self,
        form: &RegistrationForm,
        role: Role,
        audit: &AuditRecord,
    ) -> Result<AccountId, AuthError> {
        let issues = validation::validate_registration(form, self.settings.min_password_length);
        if !issues.is_empty() {
            return Err(AuthError::Validation(issues));
        }

        let password_hash =
            password::hash_password(form.password.expose_secret(), self.settings.password_cost)?;

        let account = NewAccount {
            name: validation::sanitize_text(&form.name),
            email: form.email.trim().to_string(),
            phone: validation::sanitize_text(&form.phone),
            password_hash,
            role,
            status: AccountStatus::Active,
        };

        self.store
            .insert_account(&account, audit)
            .map_err(|e| AuthError::from_store(e, "insert account"))
    }

    fn change_account(
        &self,
        id: AccountId,
        meta: &RequestMeta,
        action: AuditAction,
        apply: impl FnOnce(&mut Account) -> String,
    ) -> Result<Account, AuthError> {
        let mut account = self
            .store
            .get_account(id)
            .map_err(|e| AuthError::from_store(e, "load account"))?
            .ok_or(AuthError::AccountNotFound(id))?;

        let detail = apply(&mut account);
        self.store
            .update_account(&account)
            .map_err(|e| AuthError::from_store(e, "update account"))?;

        self.audit.record(
            &AuditRecord::new(action, AuditStatus::Success)
                .actor(Some(id))
                .detail(&detail)
                .request(meta),
        );
        tracing::info!(account_id = %id, %detail, "Account updated");
        Ok(account)
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("settings", &self.settings)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}
