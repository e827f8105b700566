use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {var}: {value:?}")]
    InvalidVar { var: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub smtp: SmtpConfig,
    /// Base URL embedded in verification links (`{base}/verify/{token}`).
    pub verify_base_url: String,
    /// Age after which the expiry sweep removes verification tokens.
    pub token_max_age_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVar("DATABASE_URL"))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            connect_timeout_secs: parse_var("DB_CONNECT_TIMEOUT_SECS", 5)?,
            idle_timeout_secs: parse_var("DB_IDLE_TIMEOUT_SECS", 300)?,
        };
        let smtp = SmtpConfig {
            host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: parse_var("SMTP_PORT", 1025)?,
            from: std::env::var("MAIL_FROM").unwrap_or_else(|_| "service@example.com".into()),
        };
        Ok(Self {
            database,
            smtp,
            verify_base_url: std::env::var("VERIFY_BASE_URL")
                .unwrap_or_else(|_| "https://sample.com".into()),
            token_max_age_hours: parse_var("TOKEN_MAX_AGE_HOURS", 24)?,
        })
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar { var, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl AppConfig {
    pub(crate) fn for_tests() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".into(),
                max_connections: 1,
                connect_timeout_secs: 5,
                idle_timeout_secs: 300,
            },
            smtp: SmtpConfig {
                host: "127.0.0.1".into(),
                port: 1025,
                from: "service@example.com".into(),
            },
            verify_base_url: "https://service.test".into(),
            token_max_age_hours: 24,
        }
    }
}
