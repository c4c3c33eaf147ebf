//! # Teller Core
//!
//! Accounts, sessions and access control for the Teller banking backend.
//!
//! This crate provides:
//! - A credential store over sled (accounts, remember tokens, audit log)
//! - Login, registration and logout with bcrypt password hashing
//! - Idle-expiring server-side sessions with flash messages
//! - Per-session CSRF tokens
//! - Role to permission mapping
//! - Configuration loading and validation (JSON5 format)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod auth;
pub mod authz;
pub mod config;
pub mod csrf;
pub mod session;
pub mod store;
pub mod types;
pub mod validation;

pub use audit::{AuditAction, AuditCategory, AuditLogger, AuditRecord, AuditStatus};
pub use auth::{
    AuthError, Authenticator, Credentials, LoginSuccess, Registration, RegistrationForm,
    RememberToken,
};
pub use authz::AuthorizationGate;
pub use config::{AuthSettings, ConfigError, GatewaySettings, StoreSettings, TellerConfig};
pub use csrf::CsrfGuard;
pub use session::{Flash, FlashKind, Session, SessionId, SessionManager, SessionState, SessionStore};
pub use store::{CredentialStore, RememberTokenRecord, SledCredentialStore, StoreError};
pub use types::{Account, AccountId, AccountStatus, Identity, RequestMeta, Role};
pub use validation::ValidationIssue;
