use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct QuotingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub public_base_url: String,
    pub database: DatabaseConfig,
    pub smtp: Option<SmtpConfig>,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
}

/// Lifecycle engine tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub quote_prefix: String,
    pub invoice_prefix: String,
    pub challenge_ttl_minutes: i64,
    pub challenge_max_attempts: i32,
    pub sequence_lock_timeout_ms: u64,
    pub quote_validity_days: i64,
    pub invoice_due_days: i64,
}

impl QuotingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        // SMTP is optional in dev; without it codes go through the log
        // dispatcher (which withholds them).
        let smtp = if env::var("SMTP_HOST").is_ok() {
            Some(SmtpConfig {
                host: get_env("SMTP_HOST", None, is_prod)?,
                port: get_env("SMTP_PORT", Some("587"), is_prod)?
                    .parse()
                    .unwrap_or(587),
                user: get_env("SMTP_USER", None, is_prod)?,
                password: get_env("SMTP_PASSWORD", None, is_prod)?,
                from_email: get_env("SMTP_FROM_EMAIL", None, is_prod)?,
            })
        } else if is_prod {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SMTP_HOST is required in production but not set"
            )));
        } else {
            None
        };

        let config = QuotingConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("quoting-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            public_base_url: get_env("PUBLIC_BASE_URL", Some("http://localhost:8080"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?
                    .parse()
                    .unwrap_or(1),
            },
            smtp,
            engine: EngineConfig {
                quote_prefix: get_env("QUOTE_NUMBER_PREFIX", Some("DEV"), is_prod)?,
                invoice_prefix: get_env("INVOICE_NUMBER_PREFIX", Some("FAC"), is_prod)?,
                challenge_ttl_minutes: get_env("CHALLENGE_TTL_MINUTES", Some("15"), is_prod)?
                    .parse()
                    .unwrap_or(15),
                challenge_max_attempts: get_env("CHALLENGE_MAX_ATTEMPTS", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(5),
                sequence_lock_timeout_ms: get_env("SEQUENCE_LOCK_TIMEOUT_MS", Some("3000"), is_prod)?
                    .parse()
                    .unwrap_or(3000),
                quote_validity_days: get_env("QUOTE_VALIDITY_DAYS", Some("30"), is_prod)?
                    .parse()
                    .unwrap_or(30),
                invoice_due_days: get_env("INVOICE_DUE_DAYS", Some("30"), is_prod)?
                    .parse()
                    .unwrap_or(30),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.engine.challenge_ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CHALLENGE_TTL_MINUTES must be positive"
            )));
        }

        if self.engine.challenge_max_attempts <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CHALLENGE_MAX_ATTEMPTS must be positive"
            )));
        }

        if self.engine.sequence_lock_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SEQUENCE_LOCK_TIMEOUT_MS must be greater than 0"
            )));
        }

        if self.engine.quote_prefix == self.engine.invoice_prefix {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "QUOTE_NUMBER_PREFIX and INVOICE_NUMBER_PREFIX must differ"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
