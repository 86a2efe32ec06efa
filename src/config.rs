//! Application configuration
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

use crate::sync::SyncMode;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database connection URL
    pub database_url: String,
    /// Maximum pooled database connections
    pub max_connections: u32,
    /// First admin account, created when no staff user exists
    pub bootstrap_admin: Option<(String, String)>,
    /// Session expiration in hours
    pub session_expiry_hours: u64,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
    /// Environment (development/production)
    pub environment: Environment,
    /// Trusted proxy IP prefixes (e.g., ["10.0.0.", "172.16."])
    /// Only trust X-Forwarded-For headers from these IPs
    pub trusted_proxies: Vec<String>,
    /// Append internal error detail to responses
    pub debug_errors: bool,
    /// Bounded wait for the slot reservation lock
    pub lock_wait: Duration,
    /// Period of the appointment retention purge
    pub cleanup_interval: Duration,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub mode: SyncMode,
    pub key: String,
    pub master_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

fn var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag(name: &str) -> bool {
    matches!(
        env::var(name).unwrap_or_default().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        // Build DATABASE_URL from DATABASE_URL or its individual components
        let database_url = env::var("DATABASE_URL")
            .or_else(|_| {
                let host = env::var("DATABASE_SERVER_HOST")?;
                let port =
                    env::var("DATABASE_SERVER_PORT").unwrap_or_else(|_| "5432".to_string());
                let user = env::var("DATABASE_SERVER_USER")?;
                let password = env::var("DATABASE_PASSWORD")?;
                let db = env::var("DATABASE_DB")?;
                Ok(format!(
                    "postgres://{}:{}@{}:{}/{}",
                    user, password, host, port, db
                ))
            })
            .map_err(|_: env::VarError| {
                ConfigError::Missing(
                    "DATABASE_URL, or DATABASE_SERVER_HOST + DATABASE_SERVER_USER + DATABASE_PASSWORD + DATABASE_DB is required".to_string(),
                )
            })?;

        let bootstrap_admin = match (
            env::var("BOOTSTRAP_ADMIN_USERNAME"),
            env::var("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Ok(user), Ok(password)) if !user.trim().is_empty() && !password.is_empty() => {
                Some((user.trim().to_string(), password))
            }
            _ => None,
        };

        let sync = SyncConfig::from_env()?;

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: var_or("PORT", 8080),
            database_url,
            max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10),
            bootstrap_admin,
            session_expiry_hours: var_or("SESSION_EXPIRY_HOURS", 8),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["http://localhost:8080".to_string()]),
            environment,
            // Trusted proxy prefixes - only trust X-Forwarded-For from these IPs
            trusted_proxies: env::var("TRUSTED_PROXIES")
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            debug_errors: flag("DEBUG_ERRORS"),
            lock_wait: Duration::from_secs(var_or("LOCK_WAIT_SECS", 5)),
            cleanup_interval: Duration::from_secs(var_or::<u64>("CLEANUP_INTERVAL_HOURS", 24).max(1) * 3600),
            sync,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl SyncConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mode: SyncMode = env::var("SYNC_MODE")
            .unwrap_or_default()
            .parse()
            .map_err(ConfigError::Invalid)?;
        let key = env::var("SYNC_KEY").unwrap_or_default().trim().to_string();
        let master_url = env::var("SYNC_MASTER_URL")
            .ok()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        let config = Self {
            mode,
            key,
            master_url,
            timeout: Duration::from_secs(var_or("SYNC_TIMEOUT_SECS", 10)),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode != SyncMode::Standalone && self.key.is_empty() {
            return Err(ConfigError::Missing(
                "SYNC_KEY is required in master and child mode".to_string(),
            ));
        }
        if self.mode == SyncMode::Child {
            match &self.master_url {
                None => {
                    return Err(ConfigError::Missing(
                        "SYNC_MASTER_URL is required in child mode".to_string(),
                    ))
                }
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    return Err(ConfigError::Invalid(format!(
                        "SYNC_MASTER_URL must be an http(s) URL, got '{}'",
                        url
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync(mode: SyncMode, key: &str, url: Option<&str>) -> SyncConfig {
        SyncConfig {
            mode,
            key: key.to_string(),
            master_url: url.map(String::from),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_standalone_needs_nothing() {
        assert!(sync(SyncMode::Standalone, "", None).validate().is_ok());
    }

    #[test]
    fn test_master_and_child_need_a_key() {
        assert!(matches!(
            sync(SyncMode::Master, "", None).validate(),
            Err(ConfigError::Missing(_))
        ));
        assert!(sync(SyncMode::Master, "k", None).validate().is_ok());
    }

    #[test]
    fn test_child_needs_master_url() {
        assert!(matches!(
            sync(SyncMode::Child, "k", None).validate(),
            Err(ConfigError::Missing(_))
        ));
        assert!(matches!(
            sync(SyncMode::Child, "k", Some("master.local")).validate(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(sync(SyncMode::Child, "k", Some("https://master.local"))
            .validate()
            .is_ok());
    }
}
