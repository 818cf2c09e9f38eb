use anyhow::Context;
use tracing::{debug, info, warn};

use super::topics::{attach_tags, normalize_tags};
use super::urls::post_url;
use super::ForumEngine;
use crate::auth::Capability;
use crate::db::{
    clear_topic_tags, delete_alerts_for_post, ensure_follow, get_post, get_topic_tags,
    insert_post, lock_topic_row, max_post_position, set_post_hidden, set_post_useful,
    set_post_visible, set_topic_last_post, timestamp_now, update_post_text, update_topic_heading,
    NewPost, Post, Topic, User,
};
use crate::error::{ForumError, Result};
use crate::tags::{compose_title, parse_title};

/// A reply to an existing topic.
#[derive(Debug, Clone, Default)]
pub struct ReplyInput {
    pub topic_id: i64,
    pub text: String,
    /// Last post the author saw while writing. When the topic has moved on
    /// since, the reply is held back.
    pub last_seen_post_id: Option<i64>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    Posted(Post),
    /// Someone replied while the author was writing; nothing was stored.
    NewerPosts { last_post_id: i64 },
}

/// New content for an existing post.
#[derive(Debug, Clone, Default)]
pub struct EditInput {
    pub post_id: i64,
    pub text: String,
    /// Raw title (with `[tag]` groups) for the opening post. `None` keeps the
    /// topic heading and tags as they are.
    pub raw_title: Option<String>,
    pub subtitle: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub post: Post,
    pub topic: Topic,
    /// The editor is not the author of the post.
    pub cross_author: bool,
}

/// Current content of a post, ready to be put in an edit form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditDraft {
    /// `[tag1][tag2] Title` when the post opens its topic.
    pub raw_title: Option<String>,
    pub subtitle: Option<String>,
    pub text: String,
    /// Set when a moderator opens someone else's post.
    pub warning: Option<String>,
}

/// Validated heading change for an opening post.
struct Heading {
    title: String,
    subtitle: String,
    tags: Vec<String>,
}

impl ForumEngine {
    // ========== Replies ==========

    /// Whether `user` may reply to the topic right now without tripping the
    /// rapid consecutive reply guard.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown topic.
    pub async fn antispam_allows(&self, user: &User, topic_id: i64) -> Result<bool> {
        let topic = self.load_topic(topic_id).await?;
        let last_post = match topic.last_post_id {
            Some(id) => get_post(self.db.pool(), id).await?,
            None => None,
        };
        Ok(self
            .antispam
            .allows(last_post.as_ref(), user.id, chrono::Utc::now().naive_utc()))
    }

    /// Append a post to a topic.
    ///
    /// Position assignment and the last-post pointer are updated under the
    /// topic's lock in one transaction. Followers are notified after commit;
    /// a notification failure never fails the reply.
    ///
    /// # Errors
    ///
    /// `Forbidden` when the topic is locked, unreadable, or the author just
    /// posted the previous reply; `InvalidInput` for empty text.
    pub async fn reply(&self, author: &User, input: &ReplyInput) -> Result<ReplyOutcome> {
        let topic = self.load_topic(input.topic_id).await?;
        self.ensure_readable(Some(author), &topic).await?;
        if input.text.trim().is_empty() {
            return Err(ForumError::InvalidInput("post text is empty".to_string()));
        }
        let text_html = self.renderer.render(&input.text);

        let outcome = {
            let _guard = self.locks.acquire(topic.id).await;
            self.retry_on_conflict("reply", || self.try_reply(author, input, &text_html))
                .await?
        };

        match &outcome {
            ReplyOutcome::Posted(post) => {
                info!(
                    topic_id = topic.id,
                    post_id = post.id,
                    position = post.position,
                    author_id = author.id,
                    "Reply posted"
                );
                match self.fanout.new_post(self.db.pool(), &topic, post, author).await {
                    Ok(queued) => debug!(post_id = post.id, queued, "Reply notices queued"),
                    Err(e) => warn!(post_id = post.id, error = %e, "Failed to notify followers"),
                }
            }
            ReplyOutcome::NewerPosts { last_post_id } => {
                debug!(topic_id = topic.id, last_post_id, "Reply held back, topic has newer posts");
            }
        }

        Ok(outcome)
    }

    async fn try_reply(
        &self,
        author: &User,
        input: &ReplyInput,
        text_html: &str,
    ) -> Result<ReplyOutcome> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let topic = self.lock_readable_topic(&mut tx, author, input.topic_id).await?;

        if topic.is_locked {
            return Err(ForumError::Forbidden("topic is locked"));
        }

        let last_post = match topic.last_post_id {
            Some(id) => get_post(&mut *tx, id).await?,
            None => None,
        };
        if !self
            .antispam
            .allows(last_post.as_ref(), author.id, chrono::Utc::now().naive_utc())
        {
            return Err(ForumError::Forbidden("replying too fast after your last post"));
        }

        if let (Some(seen), Some(current)) = (input.last_seen_post_id, topic.last_post_id) {
            if seen != current {
                return Ok(ReplyOutcome::NewerPosts {
                    last_post_id: current,
                });
            }
        }

        let position = max_post_position(&mut *tx, topic.id).await? + 1;
        let post_id = insert_post(
            &mut *tx,
            &NewPost {
                topic_id: topic.id,
                author_id: author.id,
                text: input.text.clone(),
                text_html: text_html.to_string(),
                created_at: timestamp_now(),
                position,
                ip_address: input.ip_address.clone(),
            },
        )
        .await?;
        set_topic_last_post(&mut *tx, topic.id, post_id).await?;
        ensure_follow(&mut *tx, author.id, topic.id, false).await?;

        let post = get_post(&mut *tx, post_id)
            .await?
            .ok_or_else(|| ForumError::not_found("post", post_id))?;

        tx.commit().await.context("Failed to commit reply")?;
        Ok(ReplyOutcome::Posted(post))
    }

    // ========== Editing ==========

    async fn ensure_can_edit(&self, actor: &User, post: &Post) -> Result<bool> {
        let cross_author = post.author_id != actor.id;
        if cross_author {
            self.require(actor, Capability::ChangePost).await?;
        }
        Ok(cross_author)
    }

    /// Load a post for editing.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the actor wrote the post or moderates posts.
    pub async fn prepare_edit(&self, actor: &User, post_id: i64) -> Result<EditDraft> {
        let post = self.load_post(post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;
        self.ensure_readable(Some(actor), &topic).await?;
        let cross_author = self.ensure_can_edit(actor, &post).await?;

        let warning = if cross_author {
            let author = self.load_user(post.author_id).await?;
            Some(format!(
                "You are editing this post as a moderator (author: {}). Be extra careful.",
                author.username
            ))
        } else {
            None
        };

        let (raw_title, subtitle) = if post.position == 1 {
            let tags: Vec<String> = get_topic_tags(self.db.pool(), topic.id)
                .await?
                .into_iter()
                .map(|tag| tag.title)
                .collect();
            (Some(compose_title(&tags, &topic.title)), Some(topic.subtitle))
        } else {
            (None, None)
        };

        Ok(EditDraft {
            raw_title,
            subtitle,
            text: post.text,
            warning,
        })
    }

    /// Replace a post's text. On the opening post a new raw title also
    /// replaces the topic's title, subtitle and whole tag set.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the actor wrote the post or moderates posts,
    /// `InvalidInput` for empty text or an empty new title.
    pub async fn edit_post(&self, actor: &User, input: &EditInput) -> Result<EditOutcome> {
        let post = self.load_post(input.post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;
        self.ensure_readable(Some(actor), &topic).await?;
        let cross_author = self.ensure_can_edit(actor, &post).await?;

        if input.text.trim().is_empty() {
            return Err(ForumError::InvalidInput("post text is empty".to_string()));
        }

        let heading = match (&input.raw_title, post.position) {
            (Some(raw_title), 1) => {
                let parsed = parse_title(raw_title);
                let title = parsed.title.trim().to_string();
                if title.is_empty() {
                    return Err(ForumError::InvalidInput("topic title is empty".to_string()));
                }
                Some(Heading {
                    title,
                    subtitle: input
                        .subtitle
                        .as_deref()
                        .map_or_else(|| topic.subtitle.clone(), |s| s.trim().to_string()),
                    tags: normalize_tags(&parsed.tags),
                })
            }
            _ => None,
        };

        let text_html = self.renderer.render(&input.text);
        {
            let _guard = self.locks.acquire(topic.id).await;
            self.retry_on_conflict("edit post", || {
                self.try_edit(actor, &post, &input.text, &text_html, heading.as_ref())
            })
            .await?;
        }

        if cross_author {
            info!(
                post_id = post.id,
                author_id = post.author_id,
                moderator_id = actor.id,
                "Moderator edited another member's post"
            );
        } else {
            debug!(post_id = post.id, "Post edited");
        }

        let topic = self.load_topic(topic.id).await?;
        if post.position == 1 {
            self.reindex(&topic).await;
        }

        Ok(EditOutcome {
            post: self.load_post(post.id).await?,
            topic,
            cross_author,
        })
    }

    async fn try_edit(
        &self,
        actor: &User,
        post: &Post,
        text: &str,
        text_html: &str,
        heading: Option<&Heading>,
    ) -> Result<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;
        if !lock_topic_row(&mut tx, post.topic_id).await? {
            return Err(ForumError::not_found("topic", post.topic_id));
        }

        update_post_text(&mut *tx, post.id, text, text_html, actor.id, &timestamp_now()).await?;

        if let Some(heading) = heading {
            update_topic_heading(&mut *tx, post.topic_id, &heading.title, &heading.subtitle)
                .await?;
            clear_topic_tags(&mut *tx, post.topic_id).await?;
            attach_tags(&mut tx, post.topic_id, &heading.tags).await?;
        }

        tx.commit().await.context("Failed to commit post edit")?;
        Ok(())
    }

    // ========== Visibility ==========

    /// Hide a post and drop its open alerts. Only moderators may attach a
    /// reason; theirs replaces any previous one.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the actor wrote the post or moderates posts.
    pub async fn hide_post(&self, actor: &User, post_id: i64, reason: Option<&str>) -> Result<Post> {
        let post = self.load_post(post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;
        self.ensure_readable(Some(actor), &topic).await?;

        let moderator = self.can(actor, Capability::ChangePost).await?;
        if post.author_id != actor.id && !moderator {
            return Err(ForumError::Forbidden("cannot hide this post"));
        }
        let reason = reason.filter(|_| moderator);

        self.retry_on_conflict("hide post", || self.try_hide(actor, &post, reason))
            .await?;

        info!(post_id, topic_id = topic.id, user_id = actor.id, "Post hidden");
        self.load_post(post_id).await
    }

    async fn try_hide(&self, actor: &User, post: &Post, reason: Option<&str>) -> Result<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;
        if !lock_topic_row(&mut tx, post.topic_id).await? {
            return Err(ForumError::not_found("topic", post.topic_id));
        }

        let cleared = delete_alerts_for_post(&mut *tx, post.id).await?;
        set_post_hidden(&mut *tx, post.id, actor.id, reason).await?;

        tx.commit().await.context("Failed to commit hidden post")?;
        if cleared > 0 {
            debug!(post_id = post.id, cleared, "Cleared alerts of hidden post");
        }
        Ok(())
    }

    /// Show a hidden post again.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the post moderation capability.
    pub async fn unhide_post(&self, actor: &User, post_id: i64) -> Result<Post> {
        self.require(actor, Capability::ChangePost).await?;
        let post = self.load_post(post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;
        self.ensure_readable(Some(actor), &topic).await?;

        set_post_visible(self.db.pool(), post.id).await?;
        info!(post_id, moderator_id = actor.id, "Post shown again");
        self.load_post(post_id).await
    }

    /// Flip the "useful answer" mark of a post.
    ///
    /// The topic author may mark other people's replies; moderators may mark
    /// any post.
    ///
    /// # Errors
    ///
    /// `Forbidden` for anyone else.
    pub async fn toggle_useful(&self, actor: &User, post_id: i64) -> Result<bool> {
        let post = self.load_post(post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;
        self.ensure_readable(Some(actor), &topic).await?;

        if post.author_id == actor.id || topic.author_id != actor.id {
            self.require(actor, Capability::ChangePost).await?;
        }

        let _guard = self.locks.acquire(topic.id).await;
        let useful = self
            .retry_on_conflict("toggle useful", || self.try_toggle_useful(actor, &post))
            .await?;

        info!(post_id, useful, user_id = actor.id, "Post useful mark changed");
        Ok(useful)
    }

    async fn try_toggle_useful(&self, actor: &User, post: &Post) -> Result<bool> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;
        self.lock_readable_topic(&mut tx, actor, post.topic_id).await?;

        let current = get_post(&mut *tx, post.id)
            .await?
            .ok_or_else(|| ForumError::not_found("post", post.id))?;
        let useful = !current.is_useful;
        set_post_useful(&mut *tx, post.id, useful).await?;

        tx.commit().await.context("Failed to commit useful mark")?;
        Ok(useful)
    }

    // ========== Quoting ==========

    /// Markdown quote of a post followed by a link back to it.
    ///
    /// # Errors
    ///
    /// `Forbidden` for hidden posts or unreadable forums.
    pub async fn quote_post(&self, viewer: Option<&User>, post_id: i64) -> Result<String> {
        let post = self.load_post(post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;
        self.ensure_readable(viewer, &topic).await?;
        if !post.is_visible {
            return Err(ForumError::Forbidden("cannot quote a hidden post"));
        }

        let author = self.load_user(post.author_id).await?;
        let mut quote: String = post.text.lines().map(|line| format!("> {line}\n")).collect();
        quote.push_str(&format!(
            "Source:[{}]({})",
            author.username,
            post_url(&self.config, &topic, &post)
        ));
        Ok(quote)
    }
}
