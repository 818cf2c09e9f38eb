use anyhow::Context;
use tracing::debug;

use super::ForumEngine;
use crate::db::{
    delete_follow, delete_read_cursor, ensure_follow, get_follow, get_post_at_position,
    get_read_position, set_follow_by_email, upsert_read_cursor, Post, User,
};
use crate::error::{ForumError, Result};

impl ForumEngine {
    // ========== Read cursors ==========

    /// Mark a topic read up to its current last post.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown topic, `Forbidden` for an unreadable forum.
    pub async fn mark_read(&self, user: &User, topic_id: i64) -> Result<()> {
        let topic = self.load_topic(topic_id).await?;
        self.ensure_readable(Some(user), &topic).await?;

        if let Some(last_post_id) = topic.last_post_id {
            upsert_read_cursor(self.db.pool(), user.id, topic.id, last_post_id).await?;
            debug!(topic_id, user_id = user.id, last_post_id, "Topic marked read");
        }
        Ok(())
    }

    /// Mark a post and everything after it unread.
    ///
    /// Unreading from the first post forgets the cursor altogether; otherwise
    /// the cursor moves to the post right before. Either way the user ends up
    /// following the topic.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown post, `Forbidden` for an unreadable forum.
    pub async fn mark_unread(&self, user: &User, post_id: i64) -> Result<()> {
        let post = self.load_post(post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;
        self.ensure_readable(Some(user), &topic).await?;

        {
            let _guard = self.locks.acquire(topic.id).await;
            self.retry_on_conflict("mark unread", || self.try_mark_unread(user, &post))
                .await?;
        }

        debug!(
            topic_id = topic.id,
            user_id = user.id,
            position = post.position,
            "Topic marked unread"
        );
        Ok(())
    }

    async fn try_mark_unread(&self, user: &User, post: &Post) -> Result<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;
        self.lock_readable_topic(&mut tx, user, post.topic_id).await?;

        if post.position <= 1 {
            delete_read_cursor(&mut *tx, user.id, post.topic_id).await?;
        } else {
            let previous = get_post_at_position(&mut *tx, post.topic_id, post.position - 1)
                .await?
                .ok_or_else(|| ForumError::NotFound(format!("post before {}", post.id)))?;
            upsert_read_cursor(&mut *tx, user.id, post.topic_id, previous.id).await?;
        }
        ensure_follow(&mut *tx, user.id, post.topic_id, false).await?;

        tx.commit().await.context("Failed to commit unread mark")?;
        Ok(())
    }

    /// Whether the topic has posts past the user's read cursor.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown topic.
    pub async fn is_unread(&self, user: &User, topic_id: i64) -> Result<bool> {
        let topic = self.load_topic(topic_id).await?;
        let Some(read_position) = get_read_position(self.db.pool(), user.id, topic.id).await?
        else {
            return Ok(true);
        };

        let last_position = match topic.last_post_id {
            Some(id) => self.load_post(id).await?.position,
            None => 0,
        };
        Ok(read_position < last_position)
    }

    /// The first post the user has not read: the one after the cursor, or
    /// the opening post when there is no cursor. A fully read topic yields
    /// its last post.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown topic, `Forbidden` for an unreadable forum.
    pub async fn first_unread_post(&self, user: &User, topic_id: i64) -> Result<Post> {
        let topic = self.load_topic(topic_id).await?;
        self.ensure_readable(Some(user), &topic).await?;

        let next = get_read_position(self.db.pool(), user.id, topic.id)
            .await?
            .map_or(1, |position| position + 1);

        if let Some(post) = get_post_at_position(self.db.pool(), topic.id, next).await? {
            return Ok(post);
        }
        match topic.last_post_id {
            Some(id) => self.load_post(id).await,
            None => Err(ForumError::NotFound(format!("posts of topic {topic_id}"))),
        }
    }

    // ========== Follows ==========
    //
    // Follow writers hold the topic lock and check access inside their
    // transaction, against the forum the topic is in at that moment.

    /// Follow or stop following a topic. Returns whether the user now follows it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown topic, `Forbidden` for an unreadable forum.
    pub async fn toggle_follow(&self, user: &User, topic_id: i64) -> Result<bool> {
        let topic = self.load_topic(topic_id).await?;
        self.ensure_readable(Some(user), &topic).await?;

        let _guard = self.locks.acquire(topic.id).await;
        let following = self
            .retry_on_conflict("toggle follow", || self.try_toggle_follow(user, topic.id))
            .await?;

        debug!(topic_id, user_id = user.id, following, "Follow toggled");
        Ok(following)
    }

    async fn try_toggle_follow(&self, user: &User, topic_id: i64) -> Result<bool> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;
        self.lock_readable_topic(&mut tx, user, topic_id).await?;

        let following = if get_follow(&mut *tx, user.id, topic_id).await?.is_some() {
            delete_follow(&mut *tx, user.id, topic_id).await?;
            false
        } else {
            ensure_follow(&mut *tx, user.id, topic_id, false).await?;
            true
        };

        tx.commit().await.context("Failed to commit follow")?;
        Ok(following)
    }

    /// Turn email notices for a topic on or off, following it first when
    /// needed. Returns whether email notices are now on.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown topic, `Forbidden` for an unreadable forum.
    pub async fn toggle_follow_by_email(&self, user: &User, topic_id: i64) -> Result<bool> {
        let topic = self.load_topic(topic_id).await?;
        self.ensure_readable(Some(user), &topic).await?;

        let _guard = self.locks.acquire(topic.id).await;
        let by_email = self
            .retry_on_conflict("toggle email follow", || {
                self.try_toggle_follow_by_email(user, topic.id)
            })
            .await?;

        debug!(topic_id, user_id = user.id, by_email, "Email follow toggled");
        Ok(by_email)
    }

    async fn try_toggle_follow_by_email(&self, user: &User, topic_id: i64) -> Result<bool> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;
        self.lock_readable_topic(&mut tx, user, topic_id).await?;

        let by_email = match get_follow(&mut *tx, user.id, topic_id).await? {
            Some(follow) => {
                let by_email = !follow.by_email;
                set_follow_by_email(&mut *tx, user.id, topic_id, by_email).await?;
                by_email
            }
            None => {
                ensure_follow(&mut *tx, user.id, topic_id, true).await?;
                true
            }
        };

        tx.commit().await.context("Failed to commit email follow")?;
        Ok(by_email)
    }
}
