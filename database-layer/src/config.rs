// Environment-driven database configuration
use crate::error::{DatabaseError, DatabaseResult};
use std::env;
use std::time::Duration;

const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Connection pool configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub connection_string: String,
    /// Maximum pool size
    pub max_connections: u32,
    /// Minimum idle connections kept warm
    pub min_connections: u32,
    /// How long to wait for a free connection
    pub acquire_timeout: Duration,
    /// How long an idle connection may live
    pub idle_timeout: Duration,
}

impl DatabaseConfig {
    /// Load configuration from the environment (`.env` honored via dotenvy).
    ///
    /// `DATABASE_URL` is required; pool sizing variables fall back to
    /// defaults suitable for a single application instance.
    pub fn from_env() -> DatabaseResult<Self> {
        // Missing .env file is fine; real environments set variables directly
        let _ = dotenvy::dotenv();

        let connection_string = env::var("DATABASE_URL").map_err(|_| {
            DatabaseError::ConfigurationError("DATABASE_URL is not set".to_string())
        })?;

        Ok(Self {
            connection_string,
            max_connections: env_u32("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            min_connections: env_u32("DATABASE_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS)?,
            acquire_timeout: Duration::from_secs(env_u64(
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )?),
            idle_timeout: Duration::from_secs(env_u64(
                "DATABASE_IDLE_TIMEOUT_SECS",
                DEFAULT_IDLE_TIMEOUT_SECS,
            )?),
        })
    }

    /// Build a configuration around an explicit connection string, with
    /// default pool sizing. Used by tests and embedding hosts that manage
    /// their own environment.
    pub fn with_connection_string(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

fn env_u32(key: &str, default: u32) -> DatabaseResult<u32> {
    match env::var(key) {
        Ok(raw) => raw.parse::<u32>().map_err(|_| {
            DatabaseError::ConfigurationError(format!("{} must be a positive integer", key))
        }),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> DatabaseResult<u64> {
    match env::var(key) {
        Ok(raw) => raw.parse::<u64>().map_err(|_| {
            DatabaseError::ConfigurationError(format!("{} must be a positive integer", key))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_connection_string_defaults() {
        let config = DatabaseConfig::with_connection_string("postgresql://localhost/carebill");
        assert_eq!(config.connection_string, "postgresql://localhost/carebill");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.min_connections, DEFAULT_MIN_CONNECTIONS);
        assert_eq!(
            config.acquire_timeout,
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_env_u32_default_when_unset() {
        assert_eq!(env_u32("CAREBILL_TEST_UNSET_POOL_VAR", 7).unwrap(), 7);
    }
}
