//! Append-only activity log.
//!
//! Records are written through the credential store. Writing is best-effort:
//! a failed write is logged and counted, and the operation being described
//! carries on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::CredentialStore;
use crate::types::{AccountId, RequestMeta};

/// Longest user agent kept in a record, in characters.
pub const MAX_USER_AGENT_LEN: usize = 255;

/// Area of the system an audit record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    /// Login, logout and registration.
    Authentication,
    /// Account changes made by an operator.
    Administration,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    /// Login attempt.
    Login,
    /// Logout.
    Logout,
    /// Self-service registration.
    Registration,
    /// Account created by an operator.
    AccountCreated,
    /// Account enabled or disabled.
    StatusChanged,
    /// Account role changed.
    RoleChanged,
}

impl AuditAction {
    /// Category this action is filed under.
    #[must_use]
    pub const fn category(self) -> AuditCategory {
        match self {
            Self::Login | Self::Logout | Self::Registration => AuditCategory::Authentication,
            Self::AccountCreated | Self::StatusChanged | Self::RoleChanged => {
                AuditCategory::Administration
            }
        }
    }
}

/// Outcome of the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    /// The action succeeded.
    Success,
    /// The action was refused or failed.
    Failed,
}

/// One immutable audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Acting account, absent for anonymous attempts.
    pub actor_id: Option<AccountId>,
    /// Category.
    pub category: AuditCategory,
    /// Action.
    pub action: AuditAction,
    /// Outcome.
    pub status: AuditStatus,
    /// Free-text detail.
    pub detail: String,
    /// Client IP address.
    pub ip: String,
    /// Client user agent, truncated.
    pub user_agent: String,
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Start a record for an action.
    #[must_use]
    pub fn new(action: AuditAction, status: AuditStatus) -> Self {
        Self {
            actor_id: None,
            category: action.category(),
            action,
            status,
            detail: String::new(),
            ip: "0.0.0.0".to_string(),
            user_agent: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Set the acting account.
    #[must_use]
    pub const fn actor(mut self, actor_id: Option<AccountId>) -> Self {
        self.actor_id = actor_id;
        self
    }

    /// Set the detail text.
    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Copy the client IP and user agent from the request.
    #[must_use]
    pub fn request(mut self, meta: &RequestMeta) -> Self {
        if !meta.ip.is_empty() {
            self.ip.clone_from(&meta.ip);
        }
        self.user_agent = truncate_chars(&meta.user_agent, MAX_USER_AGENT_LEN);
        self
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Best-effort writer of audit records.
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn CredentialStore>,
    dropped: Arc<AtomicU64>,
}

impl AuditLogger {
    /// Create a logger writing to the given store.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append a record. Returns whether it was written; failures never propagate.
    pub fn record(&self, record: &AuditRecord) -> bool {
        match self.store.insert_audit_record(record) {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    action = ?record.action,
                    status = ?record.status,
                    actor = ?record.actor_id,
                    error = %e,
                    "Failed to write audit record"
                );
                false
            }
        }
    }

    /// Number of records that could not be written since start.
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("dropped", &self.dropped_records())
            .finish_non_exhaustive()
    }
}
