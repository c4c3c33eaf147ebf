//! Configuration loading and validation.
//!
//! Config is JSON5. Location: `$TELLER_STATE_DIR/teller.json`, else `~/.teller/teller.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authz::default_grants;

/// Lowest password hash cost accepted from configuration.
pub const MIN_PASSWORD_COST: u32 = 12;
/// Highest cost bcrypt supports.
pub const MAX_PASSWORD_COST: u32 = 31;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TellerConfig {
    /// Session, CSRF and password settings.
    #[serde(default)]
    pub auth: AuthSettings,

    /// Credential store settings.
    #[serde(default)]
    pub store: StoreSettings,

    /// HTTP gateway settings.
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Role name to permission grants. Each role also inherits the grants of lower roles.
    #[serde(default = "default_grants")]
    pub permissions: BTreeMap<String, Vec<String>>,
}

impl Default for TellerConfig {
    fn default() -> Self {
        Self {
            auth: AuthSettings::default(),
            store: StoreSettings::default(),
            gateway: GatewaySettings::default(),
            permissions: default_grants(),
        }
    }
}

impl TellerConfig {
    /// Load configuration from the default location, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns error if an existing config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid JSON5 or fails validation.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("teller.json")
    }

    /// Get the Teller state directory.
    ///
    /// Uses `TELLER_STATE_DIR` env var if set, otherwise `~/.teller`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TELLER_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".teller")
        } else {
            PathBuf::from(".teller")
        }
    }

    /// Directory holding the credential store.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.store
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("data"))
    }

    /// Apply environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secs) = env_number("TELLER_SESSION_LIFETIME") {
            self.auth.session_lifetime_secs = secs;
        }

        if let Some(cost) = env_number("TELLER_BCRYPT_COST").and_then(|c| u32::try_from(c).ok()) {
            self.auth.password_cost = cost;
        }

        if let Ok(dir) = std::env::var("TELLER_DATA_DIR") {
            if !dir.is_empty() {
                self.store.data_dir = Some(PathBuf::from(dir));
            }
        }

        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()?;

        if self.store.connect_attempts == 0 {
            return Err(ConfigError::Validation(
                "store.connectAttempts must be at least 1".to_string(),
            ));
        }

        if self.gateway.port == 0 {
            return Err(ConfigError::Validation(
                "Gateway port cannot be 0".to_string(),
            ));
        }

        if self.gateway.rate_limit_per_minute == 0 {
            return Err(ConfigError::Validation(
                "gateway.rateLimitPerMinute must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_number(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Session, CSRF and credential settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    /// Idle time after which a session expires, in seconds.
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime_secs: u64,

    /// Maximum age of a CSRF token, in seconds.
    #[serde(default = "default_csrf_lifetime")]
    pub csrf_token_lifetime_secs: u64,

    /// Bcrypt cost factor.
    #[serde(default = "default_password_cost")]
    pub password_cost: u32,

    /// Minimum password length for registration.
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    /// Remember-me token lifetime in days.
    #[serde(default = "default_remember_days")]
    pub remember_lifetime_days: u64,
}

const fn default_session_lifetime() -> u64 {
    1800
}

const fn default_csrf_lifetime() -> u64 {
    3600
}

const fn default_password_cost() -> u32 {
    MIN_PASSWORD_COST
}

const fn default_min_password_length() -> usize {
    8
}

const fn default_remember_days() -> u64 {
    30
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_lifetime_secs: default_session_lifetime(),
            csrf_token_lifetime_secs: default_csrf_lifetime(),
            password_cost: default_password_cost(),
            min_password_length: default_min_password_length(),
            remember_lifetime_days: default_remember_days(),
        }
    }
}

impl AuthSettings {
    /// Create a settings builder.
    #[must_use]
    pub fn builder() -> AuthSettingsBuilder {
        AuthSettingsBuilder::default()
    }

    /// Session idle lifetime.
    #[must_use]
    pub const fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_secs)
    }

    /// CSRF token lifetime.
    #[must_use]
    pub const fn csrf_token_lifetime(&self) -> Duration {
        Duration::from_secs(self.csrf_token_lifetime_secs)
    }

    /// Remember-me token lifetime.
    #[must_use]
    pub const fn remember_lifetime(&self) -> Duration {
        Duration::from_secs(self.remember_lifetime_days * 24 * 3600)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PASSWORD_COST..=MAX_PASSWORD_COST).contains(&self.password_cost) {
            return Err(ConfigError::Validation(format!(
                "auth.passwordCost must be between {MIN_PASSWORD_COST} and {MAX_PASSWORD_COST}, got {}",
                self.password_cost
            )));
        }
        if self.session_lifetime_secs == 0 || self.csrf_token_lifetime_secs == 0 {
            return Err(ConfigError::Validation(
                "session and CSRF lifetimes must be positive".to_string(),
            ));
        }
        if self.min_password_length < 8 {
            return Err(ConfigError::Validation(
                "auth.minPasswordLength cannot be below 8".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for `AuthSettings`.
///
/// The builder does not enforce the configuration minimums, so tests can use a cheap hash cost.
#[derive(Debug, Default)]
pub struct AuthSettingsBuilder {
    settings: AuthSettings,
}

impl AuthSettingsBuilder {
    /// Set the session idle lifetime in seconds.
    #[must_use]
    pub const fn session_lifetime_secs(mut self, secs: u64) -> Self {
        self.settings.session_lifetime_secs = secs;
        self
    }

    /// Set the CSRF token lifetime in seconds.
    #[must_use]
    pub const fn csrf_token_lifetime_secs(mut self, secs: u64) -> Self {
        self.settings.csrf_token_lifetime_secs = secs;
        self
    }

    /// Set the bcrypt cost.
    #[must_use]
    pub const fn password_cost(mut self, cost: u32) -> Self {
        self.settings.password_cost = cost;
        self
    }

    /// Set the minimum password length.
    #[must_use]
    pub const fn min_password_length(mut self, len: usize) -> Self {
        self.settings.min_password_length = len;
        self
    }

    /// Set the remember-me lifetime in days.
    #[must_use]
    pub const fn remember_lifetime_days(mut self, days: u64) -> Self {
        self.settings.remember_lifetime_days = days;
        self
    }

    /// Build the settings.
    #[must_use]
    pub fn build(self) -> AuthSettings {
        self.settings
    }
}

/// Credential store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    /// Data directory override.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Attempts made to open the store before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Delay before the first retry, doubled on each further retry.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Upper bound on the time spent opening the store.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

const fn default_connect_attempts() -> u32 {
    3
}

const fn default_retry_backoff() -> u64 {
    200
}

const fn default_connect_timeout() -> u64 {
    5
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            connect_attempts: default_connect_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl StoreSettings {
    /// First retry delay.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Requests per minute allowed per client IP on the auth endpoints.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Page names a login may redirect to.
    #[serde(default = "default_allowed_redirects")]
    pub allowed_redirects: Vec<String>,

    /// Front controller path used to build redirect locations.
    #[serde(default = "default_front_controller")]
    pub front_controller: String,

    /// Mark cookies `Secure` (requires HTTPS).
    #[serde(default)]
    pub secure_cookies: bool,

    /// Key the rate limiter on `X-Forwarded-For`/`X-Real-IP` instead of the
    /// socket peer. Only enable behind a proxy that overwrites these headers.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

const fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

const fn default_rate_limit() -> u32 {
    100
}

fn default_allowed_redirects() -> Vec<String> {
    [
        "dashboard",
        "accounts",
        "transactions",
        "transfer",
        "bills",
        "profile",
        "admin",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_front_controller() -> String {
    "/index.php".to_string()
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            rate_limit_per_minute: default_rate_limit(),
            allowed_redirects: default_allowed_redirects(),
            front_controller: default_front_controller(),
            secure_cookies: false,
            trust_proxy_headers: false,
        }
    }
}
