//! Runtime state: clean-shutdown tracking.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const CLEAN_SHUTDOWN_KEY: &str = "clean_shutdown";

impl Database {
    /// True if the previous process never recorded a clean shutdown
    ///
    /// Checked at engine start; an unclean exit means some jobs may still be
    /// marked active under a dead worker's lease.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
                .bind(CLEAN_SHUTDOWN_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check shutdown state: {}",
                        e
                    )))
                })?;

        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Record that the engine is running (cleared by [`set_clean_shutdown`](Self::set_clean_shutdown))
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_runtime_flag(CLEAN_SHUTDOWN_KEY, "false").await
    }

    /// Record a graceful shutdown
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_runtime_flag(CLEAN_SHUTDOWN_KEY, "true").await
    }

    async fn set_runtime_flag(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set runtime state '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }
}
