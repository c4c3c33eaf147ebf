//! Account, role and identity types shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric account identifier, allocated by the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl AccountId {
    /// Big-endian key bytes, so store iteration follows allocation order.
    #[must_use]
    pub const fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode an id from store key bytes.
    #[must_use]
    pub fn from_key(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(raw)))
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account role for access control.
///
/// Roles are ordered: every role holds the permissions of the roles below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Bank customer using the ATM and web banking screens.
    Customer,
    /// Back-office administrator.
    Admin,
    /// Administrator who can also change system settings.
    SuperAdmin,
}

impl Role {
    /// All roles, lowest privilege first.
    pub const ALL: [Self; 3] = [Self::Customer, Self::Admin, Self::SuperAdmin];

    /// Parse a role name, returning `None` for names that are not roles.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
            "customer" => Some(Self::Customer),
            "admin" => Some(Self::Admin),
            "superadmin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer => write!(f, "Customer"),
            Self::Admin => write!(f, "Admin"),
            Self::SuperAdmin => write!(f, "SuperAdmin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Unknown role: {s}"))
    }
}

/// Whether an account may authenticate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Account may log in.
    #[default]
    Active,
    /// Account is locked out.
    Disabled,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Disabled => write!(f, "Disabled"),
        }
    }
}

/// Stored account record.
#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique account ID.
    pub id: AccountId,
    /// Display name.
    pub name: String,
    /// Email address, unique ignoring case.
    pub email: String,
    /// Contact phone number.
    #[serde(default)]
    pub phone: String,
    /// Bcrypt password hash.
    pub password_hash: String,
    /// Account role.
    pub role: Role,
    /// Account status.
    pub status: AccountStatus,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account last logged in.
    pub last_login: Option<DateTime<Utc>>,
}

impl Account {
    /// Whether the account may authenticate.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Snapshot the identity held by a session for this account.
    #[must_use]
    pub fn identity(&self, authenticated_at: DateTime<Utc>) -> Identity {
        Identity {
            account_id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            authenticated_at,
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Fields for an account that has not been stored yet.
#[derive(Clone)]
pub struct NewAccount {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Phone number.
    pub phone: String,
    /// Bcrypt password hash.
    pub password_hash: String,
    /// Account role.
    pub role: Role,
    /// Initial status.
    pub status: AccountStatus,
}

impl NewAccount {
    /// Attach the allocated id and creation time.
    #[must_use]
    pub fn into_account(self, id: AccountId, created_at: DateTime<Utc>) -> Account {
        Account {
            id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            password_hash: self.password_hash,
            role: self.role,
            status: self.status,
            created_at,
            last_login: None,
        }
    }
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Role, email and name snapshot taken at authentication time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Authenticated account.
    pub account_id: AccountId,
    /// Display name at login.
    pub name: String,
    /// Email at login.
    pub email: String,
    /// Role at login.
    pub role: Role,
    /// When the login happened.
    pub authenticated_at: DateTime<Utc>,
}

/// Caller details recorded alongside audit records and remember tokens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestMeta {
    /// Client IP address.
    pub ip: String,
    /// Raw `User-Agent` header.
    pub user_agent: String,
}

impl RequestMeta {
    /// Create request metadata.
    #[must_use]
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Canonical form of an email used for lookups and uniqueness.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
