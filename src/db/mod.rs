//! SQLite storage for topics, posts and everything hanging off them.
//!
//! Connections run in WAL mode with foreign keys enforced. Concurrent writers
//! wait on the busy timeout instead of failing with `SQLITE_BUSY`.

mod migrations;
mod models;
mod queries;

pub use models::*;
pub use queries::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{info, warn};

/// Storage format of every timestamp column, identical to SQLite's `datetime('now')`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A write transaction may need a second connection for permission lookups
/// while it holds the first.
const MAX_CONNECTIONS: u32 = 8;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Current UTC time in [`TIMESTAMP_FORMAT`].
#[must_use]
pub fn timestamp_now() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the forum database at `path` and bring its schema up
    /// to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, a migration fails or
    /// foreign keys are not enforced on the connection.
    pub async fn new(path: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(connect_options(path))
            .await
            .with_context(|| format!("Failed to open forum database at {}", path.display()))?;

        migrations::run(&pool)
            .await
            .with_context(|| format!("Failed to migrate forum database at {}", path.display()))?;

        let db = Self { pool };
        db.check_pragmas().await?;
        info!(path = %path.display(), "Forum database ready");
        Ok(db)
    }

    /// Foreign keys must be enforced. A journal mode other than WAL is only
    /// logged.
    async fn check_pragmas(&self) -> Result<()> {
        let (foreign_keys,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read foreign_keys pragma")?;
        if foreign_keys != 1 {
            anyhow::bail!("SQLite foreign key enforcement is off");
        }

        let (journal_mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read journal_mode pragma")?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!(journal_mode, "SQLite is not in WAL mode, readers will wait on writers");
        }

        Ok(())
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_open_creates_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("forum.sqlite");

        let db = Database::new(&path).await.unwrap();
        assert!(path.exists());

        let (journal_mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("forum.sqlite");

        let user_id = {
            let db = Database::new(&path).await.unwrap();
            create_user(db.pool(), "alice", None, false).await.unwrap()
        };

        let db = Database::new(&path).await.unwrap();
        let user = get_user(db.pool(), user_id).await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn test_foreign_keys_are_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("forum.sqlite"))
            .await
            .unwrap();

        let orphan = NewTopic {
            forum_id: 404,
            title: "Nowhere".to_string(),
            subtitle: String::new(),
            author_id: 404,
            created_at: timestamp_now(),
        };
        assert!(insert_topic(db.pool(), &orphan).await.is_err());
    }

    #[test]
    fn test_timestamp_format_matches_sqlite() {
        let now = timestamp_now();
        assert_eq!(now.len(), 19);
        assert!(chrono::NaiveDateTime::parse_from_str(&now, TIMESTAMP_FORMAT).is_ok());
    }
}
