use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variables that override the token secrets from the config file.
pub const ACCESS_SECRET_ENV: &str = "WARDEN_ACCESS_TOKEN_SECRET";
pub const REFRESH_SECRET_ENV: &str = "WARDEN_REFRESH_TOKEN_SECRET";

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub tokens: TokenConfig,

    pub notifications: NotificationConfig,

    pub observability: ObservabilityConfig,

    pub housekeeping: HousekeepingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_url: String,

    pub log_level: String,

    /// "pretty" or "json"
    pub log_format: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/warden.db".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
    None,
}

impl SameSite {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on the token cookies.
    /// Default: true for production safety. Set to false for local development without HTTPS.
    pub secure_cookies: bool,

    pub same_site: SameSite,

    /// Externally reachable base URL, used to build email verification links.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            cors_allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            secure_cookies: true,
            same_site: SameSite::Strict,
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,

    /// Accounts registering with one of these emails get the admin role.
    pub admin_emails: Vec<String>,

    /// Failed-login counter and lockout policy.
    pub lockout: LockoutConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            admin_emails: Vec::new(),
            lockout: LockoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Consecutive wrong-password attempts before the account is locked.
    pub max_failed_attempts: u32,

    /// How long a locked account stays locked.
    pub lockout_seconds: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_seconds: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    #[serde(skip_serializing)]
    pub access_token_secret: String,

    #[serde(skip_serializing)]
    pub refresh_token_secret: String,

    pub access_token_ttl_seconds: u64,

    pub refresh_token_ttl_seconds: u64,

    /// Overall session lifetime. Must be >= the refresh token lifetime.
    pub session_ttl_seconds: u64,

    pub issuer: String,

    pub email_verification_ttl_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_secret: String::new(),
            refresh_token_secret: String::new(),
            access_token_ttl_seconds: 15 * 60,
            refresh_token_ttl_seconds: 7 * 24 * 60 * 60,
            session_ttl_seconds: 7 * 24 * 60 * 60,
            issuer: "warden".to_string(),
            email_verification_ttl_seconds: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifierBackend {
    #[default]
    Log,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub backend: NotifierBackend,

    pub webhook_url: Option<String>,

    /// Request timeout in seconds (default: 10)
    pub request_timeout_seconds: u64,

    pub from_address: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            backend: NotifierBackend::Log,
            webhook_url: None,
            request_timeout_seconds: 10,
            from_address: "no-reply@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HousekeepingConfig {
    /// Purge inactive and expired sessions every N minutes. 0 disables the task.
    pub session_purge_interval_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            tokens: TokenConfig::default(),
            notifications: NotificationConfig::default(),
            observability: ObservabilityConfig::default(),
            housekeeping: HousekeepingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let paths = Self::config_paths();

        let mut config = None;
        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                config = Some(Self::load_from_path(path)?);
                break;
            }
        }

        let mut config = config.unwrap_or_else(|| {
            info!("No config file found, using defaults");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(ACCESS_SECRET_ENV) {
            self.tokens.access_token_secret = secret;
        }
        if let Ok(secret) = std::env::var(REFRESH_SECRET_ENV) {
            self.tokens.refresh_token_secret = secret;
        }
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("warden").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".warden").join("config.toml"));
        }

        paths
    }

    pub fn validate(&self) -> Result<()> {
        let tokens = &self.tokens;

        if tokens.access_token_secret.len() < MIN_SECRET_LEN {
            anyhow::bail!(
                "Access token secret must be at least {MIN_SECRET_LEN} characters (set {ACCESS_SECRET_ENV})"
            );
        }
        if tokens.refresh_token_secret.len() < MIN_SECRET_LEN {
            anyhow::bail!(
                "Refresh token secret must be at least {MIN_SECRET_LEN} characters (set {REFRESH_SECRET_ENV})"
            );
        }
        if tokens.access_token_secret == tokens.refresh_token_secret {
            anyhow::bail!("Access and refresh token secrets must differ");
        }

        if tokens.access_token_ttl_seconds == 0 {
            anyhow::bail!("Access token lifetime must be > 0");
        }
        if tokens.access_token_ttl_seconds >= tokens.refresh_token_ttl_seconds {
            anyhow::bail!("Access token lifetime must be shorter than refresh token lifetime");
        }
        if tokens.refresh_token_ttl_seconds > tokens.session_ttl_seconds {
            anyhow::bail!("Session lifetime must be >= refresh token lifetime");
        }
        if tokens.email_verification_ttl_seconds == 0 {
            anyhow::bail!("Email verification token lifetime must be > 0");
        }

        if self.security.lockout.max_failed_attempts == 0 {
            anyhow::bail!("Lockout threshold must be > 0");
        }

        if self.notifications.backend == NotifierBackend::Webhook
            && self
                .notifications
                .webhook_url
                .as_deref()
                .is_none_or(str::is_empty)
        {
            anyhow::bail!("Webhook URL cannot be empty when the webhook notifier is selected");
        }

        url::Url::parse(&self.server.public_url).context("Invalid server.public_url")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.tokens.access_token_secret = "a".repeat(32);
        config.tokens.refresh_token_secret = "b".repeat(32);
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.security.lockout.max_failed_attempts, 5);
        assert_eq!(config.security.lockout.lockout_seconds, 900);
        assert_eq!(config.tokens.access_token_ttl_seconds, 900);
        assert_eq!(config.tokens.email_verification_ttl_seconds, 86_400);
        assert!(config.server.secure_cookies);
        assert!(config.security.admin_emails.is_empty());
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let config = valid_config();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[tokens]"));
        assert!(toml_str.contains("[security.lockout]"));
        assert!(!toml_str.contains(&"a".repeat(32)));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [server]
            same_site = "lax"

            [security.lockout]
            max_failed_attempts = 3
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.server.same_site, SameSite::Lax);
        assert_eq!(config.security.lockout.max_failed_attempts, 3);
        assert_eq!(config.security.lockout.lockout_seconds, 900);
    }

    #[test]
    fn test_validate() {
        assert!(valid_config().validate().is_ok());

        // Missing secrets
        assert!(Config::default().validate().is_err());

        let mut same = valid_config();
        same.tokens.refresh_token_secret = same.tokens.access_token_secret.clone();
        assert!(same.validate().is_err());

        let mut ttl = valid_config();
        ttl.tokens.session_ttl_seconds = ttl.tokens.refresh_token_ttl_seconds - 1;
        assert!(ttl.validate().is_err());

        let mut ttl = valid_config();
        ttl.tokens.access_token_ttl_seconds = ttl.tokens.refresh_token_ttl_seconds;
        assert!(ttl.validate().is_err());

        let mut lockout = valid_config();
        lockout.security.lockout.max_failed_attempts = 0;
        assert!(lockout.validate().is_err());

        let mut webhook = valid_config();
        webhook.notifications.backend = NotifierBackend::Webhook;
        assert!(webhook.validate().is_err());
        webhook.notifications.webhook_url = Some("http://hooks.local/mail".to_string());
        assert!(webhook.validate().is_ok());
    }
}
