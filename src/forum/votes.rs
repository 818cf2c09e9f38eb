use anyhow::Context;
use tracing::debug;

use super::ForumEngine;
use crate::db::{
    delete_vote, get_vote, get_vote_counts, insert_vote, lock_topic_row, refresh_vote_counts,
    Post, User, VoteCounts, VoteKind,
};
use crate::error::{ForumError, Result};

impl ForumEngine {
    /// Toggle a like or dislike on a post and return its fresh counters.
    ///
    /// Voting the kind already held removes it. Voting the other kind swaps
    /// the vote, so a user never holds both. Votes on one's own post change
    /// nothing. The vote rows and the post counters change in one
    /// transaction; the counters are recounted from the rows.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown post, `Forbidden` when the forum is not
    /// readable.
    pub async fn toggle_vote(&self, user: &User, post_id: i64, kind: VoteKind) -> Result<VoteCounts> {
        let post = self.load_post(post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;
        self.ensure_readable(Some(user), &topic).await?;

        if post.author_id == user.id {
            debug!(post_id, user_id = user.id, "Ignoring vote on own post");
            return Ok(get_vote_counts(self.db.pool(), post.id)
                .await?
                .unwrap_or_default());
        }

        let counts = self
            .retry_on_conflict("toggle vote", || self.try_toggle_vote(user, &post, kind))
            .await?;

        debug!(
            post_id,
            user_id = user.id,
            kind = kind.as_str(),
            likes = counts.like_count,
            dislikes = counts.dislike_count,
            "Vote toggled"
        );
        Ok(counts)
    }

    async fn try_toggle_vote(&self, user: &User, post: &Post, kind: VoteKind) -> Result<VoteCounts> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;
        // Take the write lock before reading the current vote.
        if !lock_topic_row(&mut tx, post.topic_id).await? {
            return Err(ForumError::not_found("topic", post.topic_id));
        }

        let existing = get_vote(&mut *tx, user.id, post.id)
            .await?
            .and_then(|vote| vote.kind_enum());

        match existing {
            Some(held) if held == kind => {
                delete_vote(&mut *tx, user.id, post.id).await?;
            }
            Some(_) => {
                delete_vote(&mut *tx, user.id, post.id).await?;
                insert_vote(&mut *tx, user.id, post.id, kind).await?;
            }
            None => {
                insert_vote(&mut *tx, user.id, post.id, kind).await?;
            }
        }

        let counts = refresh_vote_counts(&mut tx, post.id).await?;
        tx.commit().await.context("Failed to commit vote")?;
        Ok(counts)
    }
}
