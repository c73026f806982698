//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

/// v1: campaigns, brands, contact lists and contacts
const V1_CAMPAIGN_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE brands (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        from_name TEXT NOT NULL,
        from_email TEXT NOT NULL,
        reply_to TEXT,
        provider_access_key TEXT NOT NULL DEFAULT '',
        provider_secret TEXT NOT NULL DEFAULT '',
        provider_region TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE contact_lists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE contacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        list_id INTEGER NOT NULL REFERENCES contact_lists(id) ON DELETE CASCADE,
        email TEXT NOT NULL,
        name TEXT,
        status INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX idx_contacts_list_status ON contacts(list_id, status, id)",
    // brand_id has no foreign key; a missing brand fails the schedule job
    r#"
    CREATE TABLE campaigns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        brand_id INTEGER NOT NULL,
        user_id INTEGER,
        name TEXT NOT NULL,
        subject TEXT NOT NULL,
        html_body TEXT NOT NULL DEFAULT '',
        text_body TEXT,
        from_name TEXT,
        from_email TEXT,
        reply_to TEXT,
        contact_list_ids TEXT NOT NULL DEFAULT '[]',
        status INTEGER NOT NULL DEFAULT 0,
        scheduled_at INTEGER,
        sent_at INTEGER,
        error_message TEXT,
        stat_processed INTEGER NOT NULL DEFAULT 0,
        stat_sent INTEGER NOT NULL DEFAULT 0,
        stat_failed INTEGER NOT NULL DEFAULT 0,
        stat_bounces INTEGER NOT NULL DEFAULT 0,
        cp_list_index INTEGER NOT NULL DEFAULT 0,
        cp_contact_index INTEGER NOT NULL DEFAULT 0,
        cp_processed_batches INTEGER NOT NULL DEFAULT 0,
        cp_has_more INTEGER NOT NULL DEFAULT 0,
        cp_started_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX idx_campaigns_due ON campaigns(status, scheduled_at)",
];

/// v2: runtime state for shutdown tracking
const V2_RUNTIME_STATE: &[&str] = &[r#"
    CREATE TABLE runtime_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#];

/// v3: durable job queue
const V3_JOBS: &[&str] = &[
    r#"
    CREATE TABLE jobs (
        id TEXT PRIMARY KEY,
        job_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        state INTEGER NOT NULL DEFAULT 0,
        attempts_made INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        backoff_initial_ms INTEGER NOT NULL,
        backoff_max_ms INTEGER NOT NULL,
        backoff_multiplier REAL NOT NULL,
        backoff_jitter INTEGER NOT NULL DEFAULT 1,
        timeout_ms INTEGER NOT NULL,
        run_at INTEGER NOT NULL,
        locked_by TEXT,
        locked_until INTEGER,
        progress REAL NOT NULL DEFAULT 0.0,
        last_error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        finished_at INTEGER
    )
    "#,
    "CREATE INDEX idx_jobs_claim ON jobs(state, run_at)",
];

/// v4: rerun requests on running jobs, member paging by list position
const V4_RERUN_AND_MEMBER_PAGING: &[&str] = &[
    "ALTER TABLE jobs ADD COLUMN rerun_requested INTEGER NOT NULL DEFAULT 0",
    "CREATE INDEX idx_contacts_list_id ON contacts(list_id, id)",
];

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Connect with foreign key enforcement and WAL mode
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?;

        let current_version = current_version.unwrap_or(0);

        let migrations: [(i64, &[&str]); 4] = [
            (1, V1_CAMPAIGN_SCHEMA),
            (2, V2_RUNTIME_STATE),
            (3, V3_JOBS),
            (4, V4_RERUN_AND_MEMBER_PAGING),
        ];

        for (version, statements) in migrations {
            if current_version < version {
                Self::apply_migration(&mut conn, version, statements).await?;
            }
        }

        Ok(())
    }

    /// Apply one migration inside a transaction, so a partial failure leaves
    /// the schema at the previous version
    async fn apply_migration(
        conn: &mut SqliteConnection,
        version: i64,
        statements: &[&str],
    ) -> Result<()> {
        tracing::info!(version, "Applying database migration");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            for statement in statements.iter().copied() {
                sqlx::query(statement)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Migration v{} failed: {}",
                            version, e
                        )))
                    })?;
            }
            Self::record_migration(conn, version).await
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version, "Database migration complete");
        Ok(())
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Current schema version
    pub async fn schema_version(&self) -> Result<i64> {
        let version = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query schema version: {}",
                    e
                )))
            })?;
        Ok(version.unwrap_or(0))
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
