//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// A schema step; statements run in order inside one transaction
struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

/// Every migration, oldest first. Append only.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "posts index and captions store",
    statements: &[
        r#"
        CREATE TABLE posts (
            id INTEGER PRIMARY KEY,
            source_url TEXT,
            artist_tags TEXT NOT NULL DEFAULT '',
            character_tags TEXT NOT NULL DEFAULT '',
            general_tags TEXT NOT NULL DEFAULT '',
            rating TEXT
        )
        "#,
        r#"
        CREATE TABLE captions (
            id INTEGER PRIMARY KEY,
            bucket INTEGER NOT NULL,
            success INTEGER NOT NULL DEFAULT 0,
            caption TEXT,
            language TEXT,
            model_id TEXT,
            image_url TEXT,
            prompt TEXT,
            metadata TEXT,
            error_kind TEXT,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX idx_captions_bucket ON captions(bucket, success)",
    ],
}];

fn connection_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::ConnectionFailed(format!("{}: {}", context, e)))
}

fn migration_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::MigrationFailed(format!("{}: {}", context, e)))
}

impl Database {
    /// Open (or create) the database at `path` and bring its schema up to date
    ///
    /// Missing parent directories are created.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| connection_failed("Failed to create database directory", e))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| connection_failed("Failed to parse database path", e))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| connection_failed("Failed to connect to database", e))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| connection_failed("Failed to acquire connection", e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("Failed to create schema_version table", e))?;

        let current: i64 = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query schema version: {}",
                    e
                )))
            })?
            .unwrap_or(0);

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            Self::apply(&mut conn, migration).await?;
        }

        Ok(())
    }

    /// Apply one migration atomically so a failure leaves the previous schema intact
    async fn apply(conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applying database migration"
        );

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("Failed to begin transaction", e))?;

        let result = async {
            for statement in migration.statements {
                sqlx::query(statement)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        migration_failed(&format!("Migration v{} failed", migration.version), e)
                    })?;
            }

            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(migration.version)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *conn)
                .await
                .map_err(|e| migration_failed("Failed to record migration", e))?;

            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = result {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(e);
        }

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                migration_failed(&format!("Failed to commit migration v{}", migration.version), e)
            })?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
