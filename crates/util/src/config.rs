use std::{env, fmt, net::SocketAddr, time::Duration};

use super::server_bind_address;

const DEFAULT_DATABASE_URL: &str = "sqlite:venbill.db?mode=rwc";
const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;
const DEFAULT_BACKFILL_INTERVAL_SECS: u64 = 300;
const DEFAULT_BACKFILL_BATCH_SIZE: u32 = 100;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Credentials for the admin account provisioned when the store is empty.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub auth_token_secret: Vec<u8>,
    pub auth_token_ttl: Duration,
    pub backfill_interval: Duration,
    pub backfill_batch_size: u32,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let auth_token_secret = match env::var("AUTH_TOKEN_SECRET") {
            Ok(value) if !value.is_empty() => value.into_bytes(),
            _ if environment == Environment::Production => {
                return Err(ConfigError::MissingTokenSecret);
            }
            // A fixed secret keeps development setups zero-config.
            _ => b"venbill-dev-secret".to_vec(),
        };

        let auth_token_ttl =
            Duration::from_secs(read_u64("AUTH_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?);
        let backfill_interval = Duration::from_secs(read_u64(
            "BACKFILL_INTERVAL_SECS",
            DEFAULT_BACKFILL_INTERVAL_SECS,
        )?);
        let backfill_batch_size = read_u64(
            "BACKFILL_BATCH_SIZE",
            u64::from(DEFAULT_BACKFILL_BATCH_SIZE),
        )? as u32;

        let bootstrap_admin = match (
            env::var("BOOTSTRAP_ADMIN_EMAIL"),
            env::var("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) if !email.is_empty() && !password.is_empty() => {
                Some(BootstrapAdmin { email, password })
            }
            _ => None,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            auth_token_secret,
            auth_token_ttl,
            backfill_interval,
            backfill_batch_size,
            bootstrap_admin,
        })
    }
}

fn read_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingTokenSecret,
    InvalidNumber(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingTokenSecret => {
                write!(f, "AUTH_TOKEN_SECRET must be set in production")
            }
            Self::InvalidNumber(name, value) => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_BIND_ADDR;
    use std::sync::{LazyLock, Mutex};

    static ENV_GUARD: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn clear_env() {
        for name in [
            "APP_ENV",
            "APP_BIND_ADDR",
            "DATABASE_URL",
            "AUTH_TOKEN_SECRET",
            "AUTH_TOKEN_TTL_SECS",
            "BACKFILL_INTERVAL_SECS",
            "BACKFILL_BATCH_SIZE",
            "BOOTSTRAP_ADMIN_EMAIL",
            "BOOTSTRAP_ADMIN_PASSWORD",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.auth_token_ttl, Duration::from_secs(86_400));
        assert_eq!(config.backfill_batch_size, 100);
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        env::remove_var("APP_ENV");
    }

    #[test]
    fn production_requires_token_secret() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");

        let err = AppConfig::from_env().expect_err("missing secret should error");
        assert!(matches!(err, ConfigError::MissingTokenSecret));

        env::set_var("AUTH_TOKEN_SECRET", "prod-secret");
        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.auth_token_secret, b"prod-secret".to_vec());

        clear_env();
    }

    #[test]
    fn reads_bootstrap_admin_when_both_values_present() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("BOOTSTRAP_ADMIN_EMAIL", "root@example.com");

        let config = AppConfig::from_env().expect("config should load");
        assert!(config.bootstrap_admin.is_none());

        env::set_var("BOOTSTRAP_ADMIN_PASSWORD", "changeme");
        let config = AppConfig::from_env().expect("config should load");
        let admin = config.bootstrap_admin.expect("admin present");
        assert_eq!(admin.email, "root@example.com");
        assert_eq!(admin.password, "changeme");

        clear_env();
    }

    #[test]
    fn rejects_non_numeric_tuning_values() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("BACKFILL_BATCH_SIZE", "many");

        let err = AppConfig::from_env().expect_err("invalid number should error");
        assert!(matches!(err, ConfigError::InvalidNumber("BACKFILL_BATCH_SIZE", _)));

        clear_env();
    }
}
