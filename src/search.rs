//! Topic search index.
//!
//! The engine pushes every topic (title, subtitle, tags and opening post) to
//! the index after it is created or its first post is edited, and reads it
//! back only for topic suggestions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::Topic;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the indexed document of a topic.
    async fn index_topic(&self, topic: &Topic, tags: &[String], body: &str) -> Result<()>;

    /// Topic IDs matching `query`, best match first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<i64>>;
}

/// SQLite FTS5 index stored next to the forum tables.
#[derive(Debug, Clone)]
pub struct FtsSearchIndex {
    pool: SqlitePool,
}

impl FtsSearchIndex {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchIndex for FtsSearchIndex {
    async fn index_topic(&self, topic: &Topic, tags: &[String], body: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin index transaction")?;

        sqlx::query("DELETE FROM topics_fts WHERE rowid = ?")
            .bind(topic.id)
            .execute(&mut *tx)
            .await
            .context("Failed to remove stale topic document")?;

        let title = if tags.is_empty() {
            topic.title.clone()
        } else {
            format!("{} {}", tags.join(" "), topic.title)
        };

        sqlx::query("INSERT INTO topics_fts (rowid, title, subtitle, body) VALUES (?, ?, ?, ?)")
            .bind(topic.id)
            .bind(&title)
            .bind(&topic.subtitle)
            .bind(body)
            .execute(&mut *tx)
            .await
            .context("Failed to index topic")?;

        tx.commit()
            .await
            .context("Failed to commit index transaction")?;
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<i64>> {
        let Some(fts_query) = match_expression(query) else {
            return Ok(Vec::new());
        };

        let rows: Vec<(i64,)> = sqlx::query_as(
            r"
            SELECT rowid FROM topics_fts
            WHERE topics_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            ",
        )
        .bind(&fts_query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to search topics")?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Build a safe FTS5 expression: every word becomes a quoted term and any
/// of them may match. Returns `None` when nothing searchable is left.
fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|word| word.replace('"', ""))
        .filter(|word| !word.is_empty())
        .map(|word| format!("\"{word}\""))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
