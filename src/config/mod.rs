use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub db_path: String,
    pub queue_capacity: usize,
    pub default_submit_timeout_secs: u64,
    pub min_submit_timeout_secs: u64,
    pub max_submit_timeout_secs: u64,
    pub poll_timeout_secs: u64,
    pub liveness_window_secs: u64,
}

impl DispatchConfig {
    pub fn default_submit_timeout(&self) -> Duration {
        Duration::from_secs(self.default_submit_timeout_secs)
    }

    pub fn min_submit_timeout(&self) -> Duration {
        Duration::from_secs(self.min_submit_timeout_secs)
    }

    pub fn max_submit_timeout(&self) -> Duration {
        Duration::from_secs(self.max_submit_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| DispatchError::Config(format!("{key} is not a valid value"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("No .env file loaded: {}", e),
        }

        let host = env_or("DISPATCH_HOST", "0.0.0.0");
        let port: u16 = env_parse("DISPATCH_PORT", 8080)?;

        let allowed_origins: Vec<String> = env::var("DISPATCH_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let db_path = env_or("DISPATCH_DB_PATH", "dispatch.db");

        let queue_capacity: usize =
            env_parse("DISPATCH_QUEUE_CAPACITY", crate::constants::TASK_QUEUE_CAPACITY)?;
        let default_submit_timeout_secs: u64 = env_parse(
            "DISPATCH_DEFAULT_SUBMIT_TIMEOUT_SECS",
            crate::constants::DEFAULT_SUBMIT_TIMEOUT_SECS,
        )?;
        let min_submit_timeout_secs: u64 = env_parse(
            "DISPATCH_MIN_SUBMIT_TIMEOUT_SECS",
            crate::constants::MIN_SUBMIT_TIMEOUT_SECS,
        )?;
        let max_submit_timeout_secs: u64 = env_parse(
            "DISPATCH_MAX_SUBMIT_TIMEOUT_SECS",
            crate::constants::MAX_SUBMIT_TIMEOUT_SECS,
        )?;
        let poll_timeout_secs: u64 = env_parse(
            "DISPATCH_POLL_TIMEOUT_SECS",
            crate::constants::DEFAULT_POLL_TIMEOUT_SECS,
        )?;
        let liveness_window_secs: u64 = env_parse(
            "DISPATCH_LIVENESS_WINDOW_SECS",
            crate::constants::LIVENESS_WINDOW_SECS,
        )?;

        if min_submit_timeout_secs == 0 {
            return Err(DispatchError::Config(
                "DISPATCH_MIN_SUBMIT_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if max_submit_timeout_secs < min_submit_timeout_secs {
            return Err(DispatchError::Config(
                "DISPATCH_MAX_SUBMIT_TIMEOUT_SECS must be >= the minimum".to_string(),
            ));
        }
        if queue_capacity == 0 {
            return Err(DispatchError::Config(
                "DISPATCH_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            api: ApiConfig {
                host,
                port,
                allowed_origins,
            },
            dispatch: DispatchConfig {
                db_path,
                queue_capacity,
                default_submit_timeout_secs,
                min_submit_timeout_secs,
                max_submit_timeout_secs,
                poll_timeout_secs,
                liveness_window_secs,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_applies_defaults_without_env() {
        for key in [
            "DISPATCH_HOST",
            "DISPATCH_PORT",
            "DISPATCH_ALLOWED_ORIGINS",
            "DISPATCH_DB_PATH",
            "DISPATCH_QUEUE_CAPACITY",
        ] {
            env::remove_var(key);
        }
        let config = Config::load().unwrap();
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.dispatch.queue_capacity, 16);
    }

    #[test]
    #[serial]
    fn load_rejects_bad_timeout_bounds() {
        env::set_var("DISPATCH_MIN_SUBMIT_TIMEOUT_SECS", "100");
        env::set_var("DISPATCH_MAX_SUBMIT_TIMEOUT_SECS", "10");
        let result = Config::load();
        env::remove_var("DISPATCH_MIN_SUBMIT_TIMEOUT_SECS");
        env::remove_var("DISPATCH_MAX_SUBMIT_TIMEOUT_SECS");
        assert!(result.is_err());
    }
}
