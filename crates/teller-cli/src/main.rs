//! Teller CLI - serve the gateway and manage accounts.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "teller")]
#[command(about = "Teller - ATM banking authentication backend")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Account management
    Admin {
        #[command(subcommand)]
        action: AdminCommands,

        /// Data directory override
        #[arg(long, global = true, env = "TELLER_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Show recent audit records
    Audit {
        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Data directory override
        #[arg(long, env = "TELLER_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create an account
    Create {
        /// Display name
        #[arg(long)]
        name: String,

        /// Login email
        #[arg(long)]
        email: String,

        /// Phone number
        #[arg(long)]
        phone: String,

        /// Password (or use --generate-password)
        #[arg(long)]
        password: Option<String>,

        /// Role: customer, admin or super-admin
        #[arg(long, default_value = "admin")]
        role: String,

        /// Generate a random password
        #[arg(long)]
        generate_password: bool,
    },

    /// List all accounts
    List,

    /// Enable an account
    Enable {
        /// Account email
        #[arg(long)]
        email: String,
    },

    /// Disable an account
    Disable {
        /// Account email
        #[arg(long)]
        email: String,
    },

    /// Change an account's role
    SetRole {
        /// Account email
        #[arg(long)]
        email: String,

        /// Role: customer, admin or super-admin
        #[arg(long)]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port, bind } => {
            commands::run_serve(commands::serve::ServeArgs { port, bind }).await?;
        }

        Commands::Admin { action, data_dir } => {
            let action = match action {
                AdminCommands::Create {
                    name,
                    email,
                    phone,
                    password,
                    role,
                    generate_password,
                } => commands::admin::AdminAction::Create {
                    name,
                    email,
                    phone,
                    password,
                    role,
                    generate_password,
                },
                AdminCommands::List => commands::admin::AdminAction::List,
                AdminCommands::Enable { email } => commands::admin::AdminAction::Enable { email },
                AdminCommands::Disable { email } => {
                    commands::admin::AdminAction::Disable { email }
                }
                AdminCommands::SetRole { email, role } => {
                    commands::admin::AdminAction::SetRole { email, role }
                }
            };
            commands::run_admin(commands::admin::AdminArgs { action, data_dir })?;
        }

        Commands::Audit { limit, data_dir } => {
            commands::run_audit(&commands::audit::AuditArgs { limit, data_dir })?;
        }
    }

    Ok(())
}
