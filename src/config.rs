use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::email::EmailConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key for OTP digests. Required.
    pub secret: String,
    /// Path to the SQLite database
    pub database_path: PathBuf,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub otp: OtpConfig,
    /// SMTP settings; without them OTP codes are only logged.
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Deliver OTP codes by email instead of logging them.
    pub send_mail: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Falls back to `secret` when unset.
    pub signing_key: Option<String>,
    pub timeout_secs: u64,
    pub max_refresh_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Reject a second login with the same code.
    pub single_use: bool,
    /// Mix only the low byte of the time bucket into digests.
    pub legacy_bucket_encoding: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            secret: String::new(),
            database_path: data_dir.join("pantree").join("pantree.db"),
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            otp: OtpConfig::default(),
            email: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            send_mail: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            timeout_secs: 3600,
            max_refresh_secs: 3600,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_refresh(&self) -> Duration {
        Duration::from_secs(self.max_refresh_secs)
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            config = Self::from_file(&path)?;
        }

        config.apply_env()?;
        config.validate()?;

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(secret) = std::env::var("PANTREE_SECRET") {
            self.secret = secret;
        }
        if let Ok(db_path) = std::env::var("PANTREE_DATABASE_PATH") {
            self.database_path = PathBuf::from(db_path);
        }
        if let Ok(bind) = std::env::var("PANTREE_BIND") {
            self.server.bind = bind;
        }
        if let Ok(port) = std::env::var("PANTREE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PANTREE_PORT", port))?;
        }
        if let Ok(send_mail) = std::env::var("PANTREE_SEND_MAIL") {
            self.server.send_mail = parse_flag(&send_mail)
                .ok_or(ConfigError::InvalidValue("PANTREE_SEND_MAIL", send_mail))?;
        }
        if let Ok(key) = std::env::var("PANTREE_SESSION_KEY") {
            self.session.signing_key = Some(key);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.server.send_mail && self.email.is_none() {
            return Err(ConfigError::MissingEmail);
        }
        Ok(())
    }

    /// Key used to sign session tokens.
    pub fn session_key(&self) -> &str {
        self.session
            .signing_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(&self.secret)
    }

    /// Default config file path: ~/.config/pantree/config.yaml
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pantree")
            .join("config.yaml")
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    ReadError(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("Invalid value for {0}: '{1}'")]
    InvalidValue(&'static str, String),
    #[error("No secret configured; set `secret` or PANTREE_SECRET")]
    MissingSecret,
    #[error("send_mail is enabled but no `email` section is configured")]
    MissingEmail,
}
