//! Admin account management commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use rand::Rng;
use secrecy::SecretString;
use teller_core::{
    Account, AccountStatus, Authenticator, CredentialStore, RegistrationForm, RequestMeta, Role,
    SledCredentialStore,
};

use crate::ui;

/// Length of generated passwords.
const GENERATED_PASSWORD_LENGTH: usize = 16;

/// Arguments for admin commands.
pub struct AdminArgs {
    /// The admin action to perform.
    pub action: AdminAction,
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
}

/// Admin actions.
pub enum AdminAction {
    /// Create an account.
    Create {
        name: String,
        email: String,
        phone: String,
        password: Option<String>,
        role: String,
        generate_password: bool,
    },
    /// List all accounts.
    List,
    /// Enable an account.
    Enable { email: String },
    /// Disable an account.
    Disable { email: String },
    /// Change an account's role.
    SetRole { email: String, role: String },
}

/// Run the admin command.
///
/// # Errors
///
/// Returns error if the operation fails.
pub fn run_admin(args: AdminArgs) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(args.data_dir, &config)?;
    let auth = Authenticator::new(store.clone(), config.auth.clone())
        .context("Failed to initialise authenticator")?;
    let meta = RequestMeta::new("127.0.0.1", "teller-cli");

    match args.action {
        AdminAction::Create {
            name,
            email,
            phone,
            password,
            role,
            generate_password: gen_pwd,
        } => {
            let role = parse_role(&role)?;
            let password = if gen_pwd {
                let pwd = generate_password(GENERATED_PASSWORD_LENGTH);
                ui::success(&format!("Generated password: {pwd}"));
                pwd
            } else {
                password.ok_or_else(|| {
                    anyhow!("Password required. Use --password or --generate-password")
                })?
            };

            let form = RegistrationForm {
                name,
                email: email.clone(),
                phone,
                password: SecretString::from(password.clone()),
                confirm_password: SecretString::from(password),
            };
            let id = auth
                .provision_account(&form, role, &meta)
                .map_err(|e| anyhow!("Failed to create account: {e}"))?;
            ui::success(&format!("Created account {id} '{email}' with role {role}"));
        }
        AdminAction::List => list_accounts(&store)?,
        AdminAction::Enable { email } => {
            let account = find(&store, &email)?;
            auth.set_account_status(account.id, AccountStatus::Active, &meta)
                .map_err(|e| anyhow!("Failed to enable account: {e}"))?;
            ui::success(&format!("Account '{email}' enabled"));
        }
        AdminAction::Disable { email } => {
            let account = find(&store, &email)?;
            auth.set_account_status(account.id, AccountStatus::Disabled, &meta)
                .map_err(|e| anyhow!("Failed to disable account: {e}"))?;
            ui::success(&format!("Account '{email}' disabled"));
        }
        AdminAction::SetRole { email, role } => {
            let role = parse_role(&role)?;
            let account = find(&store, &email)?;
            auth.set_account_role(account.id, role, &meta)
                .map_err(|e| anyhow!("Failed to change role: {e}"))?;
            ui::success(&format!("Account '{email}' is now {role}"));
        }
    }

    Ok(())
}

fn parse_role(name: &str) -> anyhow::Result<Role> {
    Role::parse(name)
        .ok_or_else(|| anyhow!("Invalid role: {name}. Use: customer, admin, or super-admin"))
}

fn find(store: &Arc<SledCredentialStore>, email: &str) -> anyhow::Result<Account> {
    store
        .find_account_by_email(email)
        .context("Failed to look up account")?
        .ok_or_else(|| anyhow!("Account not found: {email}"))
}

fn list_accounts(store: &Arc<SledCredentialStore>) -> anyhow::Result<()> {
    let accounts = store.list_accounts().context("Failed to list accounts")?;

    if accounts.is_empty() {
        ui::info("No accounts.");
        ui::info(
            "Run 'teller admin create --name Admin --email admin@example.com --phone 0000000000 --generate-password' to create one.",
        );
        return Ok(());
    }

    ui::info(&format!("Accounts ({}):", accounts.len()));
    println!();
    ui::table_header(&format!(
        "{:<6} {:<28} {:<12} {:<9} {:<20}",
        "ID", "EMAIL", "ROLE", "STATUS", "LAST LOGIN"
    ));

    for account in accounts {
        let last_login = account.last_login.map_or_else(
            || "never".to_string(),
            |at| at.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        println!(
            "{:<6} {:<28} {:<12} {:<9} {:<20}",
            account.id.to_string(),
            account.email,
            account.role.to_string(),
            account.status.to_string(),
            last_login
        );
    }

    Ok(())
}

/// Generate a random password.
fn generate_password(length: usize) -> String {
    const CHARSET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| char::from(CHARSET[rng.gen_range(0..CHARSET.len())]))
        .collect()
}
