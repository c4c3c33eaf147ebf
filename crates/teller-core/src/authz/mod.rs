//! Role to permission mapping.
//!
//! The grant table is configuration. Each role holds its own grants plus
//! everything granted to lower roles, so `Customer ⊂ Admin ⊂ SuperAdmin`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::{Identity, Role};

/// Built-in permission tokens.
pub mod permissions {
    /// View own account details.
    pub const VIEW_ACCOUNT: &str = "view_account";
    /// View transaction history.
    pub const VIEW_TRANSACTIONS: &str = "view_transactions";
    /// Move money between accounts.
    pub const MAKE_TRANSFER: &str = "make_transfer";
    /// Pay bills.
    pub const PAY_BILL: &str = "pay_bill";
    /// Open the admin dashboard.
    pub const VIEW_ADMIN: &str = "view_admin";
    /// Create, disable and re-role accounts.
    pub const MANAGE_USERS: &str = "manage_users";
    /// View reports.
    pub const VIEW_REPORTS: &str = "view_reports";
    /// Change system settings.
    pub const MANAGE_SYSTEM: &str = "manage_system";
}

/// Default grant table, keyed by role name.
#[must_use]
pub fn default_grants() -> BTreeMap<String, Vec<String>> {
    use permissions::{
        MAKE_TRANSFER, MANAGE_SYSTEM, MANAGE_USERS, PAY_BILL, VIEW_ACCOUNT, VIEW_ADMIN,
        VIEW_REPORTS, VIEW_TRANSACTIONS,
    };

    let table: [(Role, &[&str]); 3] = [
        (
            Role::Customer,
            &[VIEW_ACCOUNT, VIEW_TRANSACTIONS, MAKE_TRANSFER, PAY_BILL],
        ),
        (Role::Admin, &[VIEW_ADMIN, MANAGE_USERS, VIEW_REPORTS]),
        (Role::SuperAdmin, &[MANAGE_SYSTEM]),
    ];

    table
        .into_iter()
        .map(|(role, perms)| {
            (
                role.to_string(),
                perms.iter().map(|p| (*p).to_string()).collect(),
            )
        })
        .collect()
}

/// Answers permission queries for identities.
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    effective: HashMap<Role, BTreeSet<String>>,
}

impl AuthorizationGate {
    /// Build the gate from a grant table keyed by role name.
    ///
    /// Keys that do not name a role are ignored.
    #[must_use]
    pub fn from_grants(grants: &BTreeMap<String, Vec<String>>) -> Self {
        let mut own: HashMap<Role, BTreeSet<String>> = HashMap::new();
        for (name, perms) in grants {
            match Role::parse(name) {
                Some(role) => own.entry(role).or_default().extend(perms.iter().cloned()),
                None => tracing::warn!(role = %name, "Ignoring permissions for unknown role"),
            }
        }

        let mut effective = HashMap::new();
        let mut inherited = BTreeSet::new();
        for role in Role::ALL {
            if let Some(perms) = own.get(&role) {
                inherited.extend(perms.iter().cloned());
            }
            effective.insert(role, inherited.clone());
        }

        Self { effective }
    }

    /// Effective permissions of a role.
    #[must_use]
    pub fn permissions_for(&self, role: Role) -> BTreeSet<String> {
        self.effective.get(&role).cloned().unwrap_or_default()
    }

    /// Check whether a role holds a permission.
    #[must_use]
    pub fn role_has(&self, role: Role, permission: &str) -> bool {
        self.effective
            .get(&role)
            .is_some_and(|perms| perms.contains(permission))
    }

    /// Check whether an identity holds a permission.
    #[must_use]
    pub fn has_permission(&self, identity: &Identity, permission: &str) -> bool {
        self.role_has(identity.role, permission)
    }
}

impl Default for AuthorizationGate {
    fn default() -> Self {
        Self::from_grants(&default_grants())
    }
}
