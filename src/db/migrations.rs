use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    if current_version < 3 {
        debug!("Running migration v3");
        run_migration_v3(pool).await?;
        set_schema_version(pool, 3).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn execute_all(pool: &SqlitePool, statements: &[(&str, &str)]) -> Result<()> {
    for (what, sql) in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {what}"))?;
    }
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: members, forums and threads");

    execute_all(
        pool,
        &[
            (
                "users table",
                r"
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT UNIQUE NOT NULL,
                    email TEXT,
                    is_staff INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                ",
            ),
            (
                "groups table",
                r"
                CREATE TABLE IF NOT EXISTS groups (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT UNIQUE NOT NULL
                )
                ",
            ),
            (
                "group members table",
                r"
                CREATE TABLE IF NOT EXISTS group_members (
                    group_id INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    PRIMARY KEY (group_id, user_id)
                )
                ",
            ),
            (
                "forums table",
                r"
                CREATE TABLE IF NOT EXISTS forums (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    slug TEXT UNIQUE NOT NULL,
                    subtitle TEXT NOT NULL DEFAULT '',
                    group_id INTEGER REFERENCES groups(id) ON DELETE SET NULL
                )
                ",
            ),
            (
                "topics table",
                r"
                CREATE TABLE IF NOT EXISTS topics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    forum_id INTEGER NOT NULL REFERENCES forums(id),
                    title TEXT NOT NULL,
                    subtitle TEXT NOT NULL DEFAULT '',
                    author_id INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL,
                    is_locked INTEGER NOT NULL DEFAULT 0,
                    is_sticky INTEGER NOT NULL DEFAULT 0,
                    is_solved INTEGER NOT NULL DEFAULT 0,
                    last_post_id INTEGER REFERENCES posts(id)
                )
                ",
            ),
            (
                "posts table",
                r"
                CREATE TABLE IF NOT EXISTS posts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
                    author_id INTEGER NOT NULL REFERENCES users(id),
                    text TEXT NOT NULL,
                    text_html TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT,
                    editor_id INTEGER REFERENCES users(id),
                    position INTEGER NOT NULL,
                    is_visible INTEGER NOT NULL DEFAULT 1,
                    text_hidden TEXT NOT NULL DEFAULT '',
                    like_count INTEGER NOT NULL DEFAULT 0,
                    dislike_count INTEGER NOT NULL DEFAULT 0,
                    is_useful INTEGER NOT NULL DEFAULT 0,
                    ip_address TEXT,
                    UNIQUE (topic_id, position)
                )
                ",
            ),
            (
                "topics forum index",
                "CREATE INDEX IF NOT EXISTS idx_topics_forum ON topics(forum_id)",
            ),
            (
                "topics author index",
                "CREATE INDEX IF NOT EXISTS idx_topics_author ON topics(author_id)",
            ),
            (
                "posts author index",
                "CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id)",
            ),
        ],
    )
    .await
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: votes, read cursors, follows, alerts and tags");

    execute_all(
        pool,
        &[
            (
                "votes table",
                r"
                CREATE TABLE IF NOT EXISTS votes (
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL CHECK (kind IN ('like', 'dislike')),
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (user_id, post_id)
                )
                ",
            ),
            (
                "votes post index",
                "CREATE INDEX IF NOT EXISTS idx_votes_post ON votes(post_id, kind)",
            ),
            (
                "read cursors table",
                r"
                CREATE TABLE IF NOT EXISTS read_cursors (
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
                    post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (user_id, topic_id)
                )
                ",
            ),
            (
                "topic follows table",
                r"
                CREATE TABLE IF NOT EXISTS topic_follows (
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
                    by_email INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (user_id, topic_id)
                )
                ",
            ),
            (
                "topic follows topic index",
                "CREATE INDEX IF NOT EXISTS idx_topic_follows_topic ON topic_follows(topic_id)",
            ),
            (
                "alerts table",
                r"
                CREATE TABLE IF NOT EXISTS alerts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                    text TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                ",
            ),
            (
                "tags table",
                r"
                CREATE TABLE IF NOT EXISTS tags (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT UNIQUE NOT NULL,
                    slug TEXT NOT NULL
                )
                ",
            ),
            (
                "topic tags table",
                r"
                CREATE TABLE IF NOT EXISTS topic_tags (
                    topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
                    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (topic_id, tag_id)
                )
                ",
            ),
        ],
    )
    .await
}

async fn run_migration_v3(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v3: notice outbox and topic search index");

    execute_all(
        pool,
        &[
            (
                "notices table",
                r"
                CREATE TABLE IF NOT EXISTS notices (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipient_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    email TEXT NOT NULL,
                    sender TEXT NOT NULL,
                    subject TEXT NOT NULL,
                    text_body TEXT NOT NULL,
                    html_body TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    sent_at TEXT
                )
                ",
            ),
            (
                "notices status index",
                "CREATE INDEX IF NOT EXISTS idx_notices_status ON notices(status, id)",
            ),
            (
                "topics FTS table",
                r"
                CREATE VIRTUAL TABLE IF NOT EXISTS topics_fts USING fts5(
                    title,
                    subtitle,
                    body
                )
                ",
            ),
        ],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run(&pool).await.unwrap();
        run(&pool).await.unwrap();

        assert_eq!(get_schema_version(&pool).await.unwrap(), 3);
    }
}
