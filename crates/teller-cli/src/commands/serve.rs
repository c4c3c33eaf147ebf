//! Serve command - run the HTTP gateway.

use anyhow::Result;

use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
}

/// Run the gateway until it stops.
///
/// # Errors
///
/// Returns error if configuration is invalid or the server fails.
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut config = super::load_config()?;
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    if let Some(bind) = args.bind {
        config.gateway.bind_address = bind;
    }
    config.validate()?;

    ui::header("Starting Teller Gateway");
    ui::kv(
        "Address",
        &format!("{}:{}", config.gateway.bind_address, config.gateway.port),
    );
    ui::kv("Data", &config.data_dir().display().to_string());
    ui::kv(
        "Session lifetime",
        &format!("{}s", config.auth.session_lifetime_secs),
    );
    if !config.gateway.secure_cookies {
        ui::warning("Cookies are not marked Secure; serve behind HTTPS in production");
    }
    println!();

    teller_gateway::start(config).await?;
    Ok(())
}
