// Database connection management
use crate::config::DatabaseConfig;
use crate::error::{DatabaseError, DatabaseResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Connection pool wrapper shared by every service in the engine.
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Create a pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> DatabaseResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&config.connection_string)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database connection pool created"
        );

        Ok(Self { pool })
    }

    /// Create a pool from the environment (`DATABASE_URL` and friends).
    pub async fn from_env() -> DatabaseResult<Self> {
        let config = DatabaseConfig::from_env()?;
        Self::connect(&config).await
    }

    /// Wrap an existing pool (tests, embedding hosts).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying PgPool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the pool is healthy.
    pub async fn is_healthy(&self) -> bool {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Database health check failed: {}", e);
                false
            }
        }
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_rejects_malformed_connection_string() {
        let config = DatabaseConfig::with_connection_string("not-a-postgres-url");
        let result = tokio_test::block_on(DatabasePool::connect(&config));
        assert!(matches!(result, Err(DatabaseError::ConnectionFailed(_))));
    }
}
