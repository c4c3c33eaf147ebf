//! First-run administrator seeding.

use secrecy::SecretString;

use teller_core::{
    AccountId, AuthError, Authenticator, CredentialStore, RegistrationForm, RequestMeta, Role,
};

/// Name used when `TELLER_ADMIN_NAME` is unset.
const DEFAULT_ADMIN_NAME: &str = "Administrator";
/// Phone used when `TELLER_ADMIN_PHONE` is unset.
const DEFAULT_ADMIN_PHONE: &str = "0000000000";

/// Administrator details for an empty store.
#[derive(Debug, Clone)]
pub struct SeedAdmin {
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Phone number.
    pub phone: String,
    /// Initial password.
    pub password: SecretString,
}

impl SeedAdmin {
    /// Read `TELLER_ADMIN_EMAIL` and `TELLER_ADMIN_PASSWORD`, plus the optional
    /// `TELLER_ADMIN_NAME` and `TELLER_ADMIN_PHONE`.
    ///
    /// Returns `None` unless both required variables are set and non-empty.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let email = var("TELLER_ADMIN_EMAIL")?;
        let password = var("TELLER_ADMIN_PASSWORD")?;

        Some(Self {
            name: var("TELLER_ADMIN_NAME").unwrap_or_else(|| DEFAULT_ADMIN_NAME.to_string()),
            email,
            phone: var("TELLER_ADMIN_PHONE").unwrap_or_else(|| DEFAULT_ADMIN_PHONE.to_string()),
            password: SecretString::from(password),
        })
    }
}

/// Create a super administrator when the store holds no accounts.
///
/// Returns the new account id, or `None` if the store was already populated.
///
/// # Errors
///
/// Returns error if the details fail validation or the store fails.
pub fn seed_admin(
    auth: &Authenticator,
    store: &dyn CredentialStore,
    admin: &SeedAdmin,
) -> Result<Option<AccountId>, AuthError> {
    let count = store
        .account_count()
        .map_err(|e| AuthError::from_store(e, "count accounts"))?;
    if count > 0 {
        return Ok(None);
    }

    let form = RegistrationForm {
        name: admin.name.clone(),
        email: admin.email.clone(),
        phone: admin.phone.clone(),
        password: admin.password.clone(),
        confirm_password: admin.password.clone(),
    };
    let meta = RequestMeta::new("127.0.0.1", "teller-gateway setup");
    let id = auth.provision_account(&form, Role::SuperAdmin, &meta)?;

    tracing::info!(account_id = %id, email = %admin.email, "Administrator created from environment variables");

    Ok(Some(id))
}

/// Seed an administrator from the environment, if configured.
///
/// # Errors
///
/// Same as [`seed_admin`].
pub fn seed_from_env(
    auth: &Authenticator,
    store: &dyn CredentialStore,
) -> Result<Option<AccountId>, AuthError> {
    match SeedAdmin::from_env() {
        Some(admin) => seed_admin(auth, store, &admin),
        None => Ok(None),
    }
}
