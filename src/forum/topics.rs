use std::collections::HashMap;

use anyhow::Context;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use super::pagination::{clamp_page, page_window, parse_page, slice_page};
use super::ForumEngine;
use crate::auth::Capability;
use crate::db::{
    add_topic_tag, count_topic_posts, delete_follow, ensure_follow, get_forum, get_or_create_tag,
    get_post_at_position, get_posts_in_range, get_tag, get_topic, get_topic_tags, get_user,
    insert_post, insert_topic, list_followed_topics, list_forum_topics, list_posts_by_author,
    list_topic_followers, list_topics_by_author, list_topics_by_tag, lock_topic_row,
    set_topic_forum, set_topic_last_post, set_topic_locked, set_topic_solved, set_topic_sticky,
    timestamp_now, upsert_read_cursor, Forum, NewPost, NewTopic, Post, PostWithAuthor, Tag, Topic,
    TopicFilter, User,
};
use crate::error::{ForumError, Result};
use crate::tags::{normalize_tag, parse_title, slugify};

/// Data for opening a new topic.
#[derive(Debug, Clone, Default)]
pub struct NewTopicInput {
    pub forum_id: i64,
    /// Title as typed, possibly starting with `[tag]` groups.
    pub raw_title: String,
    pub subtitle: String,
    pub text: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TopicCreated {
    pub topic: Topic,
    pub post: Post,
    pub tags: Vec<Tag>,
}

/// One page of a thread.
#[derive(Debug, Clone)]
pub struct TopicPage {
    pub topic: Topic,
    pub tags: Vec<Tag>,
    /// Posts to display; from page 2 on, the first one is the last post of
    /// the previous page.
    pub posts: Vec<Post>,
    pub page: usize,
    pub num_pages: usize,
    pub last_post_id: Option<i64>,
}

/// Topics of a forum: pinned ones apart, the rest paged.
#[derive(Debug, Clone)]
pub struct ForumTopics {
    pub forum: Forum,
    pub sticky: Vec<Topic>,
    pub topics: Vec<Topic>,
    pub page: usize,
    pub num_pages: usize,
}

#[derive(Debug, Clone)]
pub struct TopicList {
    pub topics: Vec<Topic>,
    pub page: usize,
    pub num_pages: usize,
}

#[derive(Debug, Clone)]
pub struct PostList {
    pub posts: Vec<PostWithAuthor>,
    pub page: usize,
    pub num_pages: usize,
}

/// Lowercased tags without blanks or repeats, in their original order.
pub(super) fn normalize_tags(raw: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(raw.len());
    for tag in raw.iter().map(|tag| normalize_tag(tag)) {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Associate tags with a topic, creating missing tags.
pub(super) async fn attach_tags(
    conn: &mut SqliteConnection,
    topic_id: i64,
    tags: &[String],
) -> anyhow::Result<()> {
    for tag in tags {
        let tag_id = get_or_create_tag(&mut *conn, tag, &slugify(tag)).await?;
        add_topic_tag(&mut *conn, topic_id, tag_id).await?;
    }
    Ok(())
}

fn page_not_found(param: Option<&str>) -> ForumError {
    ForumError::NotFound(format!("page {}", param.unwrap_or("1")))
}

impl ForumEngine {
    // ========== Creation & viewing ==========

    /// Open a topic together with its first post.
    ///
    /// Leading `[tag]` groups of the title become the topic's tags. The author
    /// follows the new topic.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty title or text, `NotFound` for an unknown
    /// forum, `Forbidden` when the author cannot read the forum.
    pub async fn create_topic(&self, author: &User, input: &NewTopicInput) -> Result<TopicCreated> {
        let forum = self.load_forum(input.forum_id).await?;
        if !self.permissions.can_read(Some(author), &forum).await? {
            return Err(ForumError::Forbidden("cannot post in this forum"));
        }

        let parsed = parse_title(&input.raw_title);
        let title = parsed.title.trim();
        if title.is_empty() {
            return Err(ForumError::InvalidInput("topic title is empty".to_string()));
        }
        if input.text.trim().is_empty() {
            return Err(ForumError::InvalidInput("post text is empty".to_string()));
        }

        let tags = normalize_tags(&parsed.tags);
        let text_html = self.renderer.render(&input.text);

        let (topic_id, post_id) = self
            .retry_on_conflict("create topic", || {
                self.try_create_topic(author, input, title, &tags, &text_html)
            })
            .await?;

        let topic = self.load_topic(topic_id).await?;
        let post = self.load_post(post_id).await?;
        let tags = get_topic_tags(self.db.pool(), topic_id).await?;

        info!(
            topic_id,
            forum_id = forum.id,
            author_id = author.id,
            tags = tags.len(),
            "Topic created"
        );
        self.reindex(&topic).await;

        Ok(TopicCreated { topic, post, tags })
    }

    async fn try_create_topic(
        &self,
        author: &User,
        input: &NewTopicInput,
        title: &str,
        tags: &[String],
        text_html: &str,
    ) -> Result<(i64, i64)> {
        let now = timestamp_now();
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let topic_id = insert_topic(
            &mut *tx,
            &NewTopic {
                forum_id: input.forum_id,
                title: title.to_string(),
                subtitle: input.subtitle.trim().to_string(),
                author_id: author.id,
                created_at: now.clone(),
            },
        )
        .await?;

        let post_id = insert_post(
            &mut *tx,
            &NewPost {
                topic_id,
                author_id: author.id,
                text: input.text.clone(),
                text_html: text_html.to_string(),
                created_at: now,
                position: 1,
                ip_address: input.ip_address.clone(),
            },
        )
        .await?;

        set_topic_last_post(&mut *tx, topic_id, post_id).await?;
        attach_tags(&mut tx, topic_id, tags).await?;
        ensure_follow(&mut *tx, author.id, topic_id, false).await?;

        tx.commit().await.context("Failed to commit new topic")?;
        Ok((topic_id, post_id))
    }

    /// Push a topic's heading, tags and opening post to the search index.
    /// Indexing is best-effort.
    pub(super) async fn reindex(&self, topic: &Topic) {
        let result = async {
            let tags: Vec<String> = get_topic_tags(self.db.pool(), topic.id)
                .await?
                .into_iter()
                .map(|tag| tag.title)
                .collect();
            let body = get_post_at_position(self.db.pool(), topic.id, 1)
                .await?
                .map(|post| post.text)
                .unwrap_or_default();
            self.search.index_topic(topic, &tags, &body).await
        }
        .await;

        if let Err(e) = result {
            warn!(topic_id = topic.id, error = %e, "Failed to index topic");
        }
    }

    /// One page of a thread. An authenticated viewer has the topic marked
    /// read up to its last post.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown topic or a page outside the thread,
    /// `Forbidden` when the viewer cannot read the forum.
    pub async fn view_topic(
        &self,
        viewer: Option<&User>,
        topic_id: i64,
        page_param: Option<&str>,
    ) -> Result<TopicPage> {
        let topic = self.load_topic(topic_id).await?;
        self.ensure_readable(viewer, &topic).await?;

        let total = count_topic_posts(self.db.pool(), topic.id).await? as usize;
        let window = page_window(total, self.config.posts_per_page, parse_page(page_param))
            .ok_or_else(|| page_not_found(page_param))?;

        // Positions are contiguous from 1, so index i holds position i + 1.
        let display = window.display();
        let posts = get_posts_in_range(
            self.db.pool(),
            topic.id,
            display.start as i64 + 1,
            display.end as i64,
        )
        .await?;
        let tags = get_topic_tags(self.db.pool(), topic.id).await?;

        if let (Some(viewer), Some(last_post_id)) = (viewer, topic.last_post_id) {
            upsert_read_cursor(self.db.pool(), viewer.id, topic.id, last_post_id).await?;
        }

        Ok(TopicPage {
            last_post_id: topic.last_post_id,
            topic,
            tags,
            posts,
            page: window.page,
            num_pages: window.num_pages,
        })
    }

    // ========== Topic state ==========

    /// Lock or unlock a topic. Locked topics take no new replies.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the topic moderation capability.
    pub async fn set_locked(&self, actor: &User, topic_id: i64, locked: bool) -> Result<Topic> {
        self.require(actor, Capability::ChangeTopic).await?;
        let topic = self.load_topic(topic_id).await?;
        self.ensure_readable(Some(actor), &topic).await?;

        set_topic_locked(self.db.pool(), topic.id, locked).await?;
        info!(topic_id, locked, moderator_id = actor.id, "Topic lock changed");
        self.load_topic(topic_id).await
    }

    /// Pin or unpin a topic at the top of its forum.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the topic moderation capability.
    pub async fn set_sticky(&self, actor: &User, topic_id: i64, sticky: bool) -> Result<Topic> {
        self.require(actor, Capability::ChangeTopic).await?;
        let topic = self.load_topic(topic_id).await?;
        self.ensure_readable(Some(actor), &topic).await?;

        set_topic_sticky(self.db.pool(), topic.id, sticky).await?;
        info!(topic_id, sticky, moderator_id = actor.id, "Topic pin changed");
        self.load_topic(topic_id).await
    }

    /// Flip the solved flag. Allowed to the topic author and moderators.
    ///
    /// # Errors
    ///
    /// `Forbidden` for anyone else.
    pub async fn toggle_solved(&self, actor: &User, topic_id: i64) -> Result<bool> {
        let topic = self.load_topic(topic_id).await?;
        self.ensure_readable(Some(actor), &topic).await?;
        if topic.author_id != actor.id {
            self.require(actor, Capability::ChangeTopic).await?;
        }

        let _guard = self.locks.acquire(topic_id).await;
        let solved = self
            .retry_on_conflict("toggle solved", || self.try_toggle_solved(topic_id))
            .await?;

        info!(topic_id, solved, user_id = actor.id, "Topic solved flag changed");
        Ok(solved)
    }

    async fn try_toggle_solved(&self, topic_id: i64) -> Result<bool> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;
        if !lock_topic_row(&mut tx, topic_id).await? {
            return Err(ForumError::not_found("topic", topic_id));
        }
        let topic = get_topic(&mut *tx, topic_id)
            .await?
            .ok_or_else(|| ForumError::not_found("topic", topic_id))?;

        let solved = !topic.is_solved;
        set_topic_solved(&mut *tx, topic_id, solved).await?;
        tx.commit().await.context("Failed to commit solved flag")?;
        Ok(solved)
    }

    /// Move a topic to another forum.
    ///
    /// Followers who cannot read the destination stop following the topic.
    /// Returns their user IDs.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the topic moderation capability or when the
    /// moderator cannot read the destination, `NotFound` for an unknown
    /// topic or forum.
    pub async fn move_topic(&self, actor: &User, topic_id: i64, forum_id: i64) -> Result<Vec<i64>> {
        self.require(actor, Capability::ChangeTopic).await?;
        let topic = self.load_topic(topic_id).await?;
        self.ensure_readable(Some(actor), &topic).await?;
        let destination = self.load_forum(forum_id).await?;
        if !self.permissions.can_read(Some(actor), &destination).await? {
            return Err(ForumError::Forbidden("cannot read the destination forum"));
        }

        let _guard = self.locks.acquire(topic_id).await;
        let unfollowed = self
            .retry_on_conflict("move topic", || self.try_move_topic(topic_id, &destination))
            .await?;

        info!(
            topic_id,
            from_forum = topic.forum_id,
            to_forum = forum_id,
            unfollowed = unfollowed.len(),
            moderator_id = actor.id,
            "Topic moved"
        );
        Ok(unfollowed)
    }

    async fn try_move_topic(&self, topic_id: i64, destination: &Forum) -> Result<Vec<i64>> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;
        if !lock_topic_row(&mut tx, topic_id).await? {
            return Err(ForumError::not_found("topic", topic_id));
        }

        set_topic_forum(&mut *tx, topic_id, destination.id).await?;

        // Followers are read under the topic's write lock, which every
        // follow-writing path takes too.
        let mut unfollowed = Vec::new();
        for follow in list_topic_followers(&mut *tx, topic_id).await? {
            let follower = get_user(&mut *tx, follow.user_id)
                .await?
                .ok_or_else(|| ForumError::not_found("user", follow.user_id))?;
            if !self.permissions.can_read(Some(&follower), destination).await? {
                delete_follow(&mut *tx, follower.id, topic_id).await?;
                unfollowed.push(follower.id);
            }
        }

        tx.commit().await.context("Failed to commit topic move")?;
        Ok(unfollowed)
    }

    // ========== Listings ==========

    /// Topics of a forum, most recently active first. Pinned topics are
    /// returned apart and are not filtered or paged.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown forum or a page past the end, `Forbidden`
    /// when the viewer cannot read the forum.
    pub async fn forum_topics(
        &self,
        viewer: Option<&User>,
        forum_id: i64,
        filter: TopicFilter,
        page_param: Option<&str>,
    ) -> Result<ForumTopics> {
        let forum = self.load_forum(forum_id).await?;
        if !self.permissions.can_read(viewer, &forum).await? {
            return Err(ForumError::Forbidden("cannot read this forum"));
        }

        let sticky = list_forum_topics(self.db.pool(), forum.id, true, TopicFilter::All).await?;
        let all = list_forum_topics(self.db.pool(), forum.id, false, filter).await?;

        let window = page_window(all.len(), self.config.topics_per_page, parse_page(page_param))
            .ok_or_else(|| page_not_found(page_param))?;

        Ok(ForumTopics {
            forum,
            sticky,
            topics: all[window.own()].to_vec(),
            page: window.page,
            num_pages: window.num_pages,
        })
    }

    /// Readable topics carrying a tag. The slug must match the tag.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown tag, a slug mismatch or a page past the end.
    pub async fn topics_by_tag(
        &self,
        viewer: Option<&User>,
        tag_id: i64,
        slug: &str,
        filter: TopicFilter,
        page_param: Option<&str>,
    ) -> Result<TopicList> {
        let tag = get_tag(self.db.pool(), tag_id)
            .await?
            .ok_or_else(|| ForumError::not_found("tag", tag_id))?;
        if tag.slug != slug {
            return Err(ForumError::NotFound(format!("tag {slug}")));
        }

        let topics = list_topics_by_tag(self.db.pool(), tag.id, filter).await?;
        let topics = self.readable_topics(viewer, topics).await?;

        let window = page_window(topics.len(), self.config.topics_per_page, parse_page(page_param))
            .ok_or_else(|| page_not_found(page_param))?;

        Ok(TopicList {
            topics: topics[window.own()].to_vec(),
            page: window.page,
            num_pages: window.num_pages,
        })
    }

    /// Readable topics opened by a user. Out-of-range pages show the last page.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown user.
    pub async fn topics_by_author(
        &self,
        viewer: Option<&User>,
        author_id: i64,
        page_param: Option<&str>,
    ) -> Result<TopicList> {
        let author = self.load_user(author_id).await?;
        let topics = list_topics_by_author(self.db.pool(), author.id).await?;
        let topics = self.readable_topics(viewer, topics).await?;
        Ok(self.clamped_topic_list(&topics, self.config.topics_per_page, page_param))
    }

    /// Readable posts written by a user, newest first. Hidden posts are only
    /// listed for moderators. Out-of-range pages show the last page.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown user.
    pub async fn posts_by_author(
        &self,
        viewer: Option<&User>,
        author_id: i64,
        page_param: Option<&str>,
    ) -> Result<PostList> {
        let author = self.load_user(author_id).await?;
        let include_hidden = match viewer {
            Some(viewer) => self.can(viewer, Capability::ChangePost).await?,
            None => false,
        };

        let mut topic_forums: HashMap<i64, i64> = HashMap::new();
        let mut readable_forums: HashMap<i64, bool> = HashMap::new();
        let mut posts = Vec::new();
        for post in list_posts_by_author(self.db.pool(), author.id, include_hidden).await? {
            let topic_id = post.post.topic_id;
            let forum_id = match topic_forums.get(&topic_id) {
                Some(forum_id) => *forum_id,
                None => {
                    let Some(topic) = get_topic(self.db.pool(), topic_id).await? else {
                        continue;
                    };
                    topic_forums.insert(topic_id, topic.forum_id);
                    topic.forum_id
                }
            };
            if self
                .forum_readable(viewer, forum_id, &mut readable_forums)
                .await?
            {
                posts.push(post);
            }
        }

        let page = clamp_page(posts.len(), self.config.posts_per_page, parse_page(page_param));
        Ok(PostList {
            num_pages: super::pagination::num_pages(posts.len(), self.config.posts_per_page),
            posts: slice_page(&posts, self.config.posts_per_page, page),
            page,
        })
    }

    /// Topics a user follows, most recently active first.
    /// Out-of-range pages show the last page.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub async fn followed_topics(&self, user: &User, page_param: Option<&str>) -> Result<TopicList> {
        let topics = list_followed_topics(self.db.pool(), user.id).await?;
        let topics = self.readable_topics(Some(user), topics).await?;
        Ok(self.clamped_topic_list(
            &topics,
            self.config.followed_topics_per_page,
            page_param,
        ))
    }

    /// Solved, readable topics matching a query, best match first. Used to
    /// point someone at existing answers before they open a new topic.
    ///
    /// # Errors
    ///
    /// Storage failures only; a failing search backend yields no suggestions.
    pub async fn suggest_topics(&self, viewer: Option<&User>, query: &str) -> Result<Vec<Topic>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let limit = self.config.suggestion_limit;
        let candidates = match self.search.search(query, limit.saturating_mul(4).max(limit)).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Topic search failed");
                return Ok(Vec::new());
            }
        };

        let mut readable_forums: HashMap<i64, bool> = HashMap::new();
        let mut suggestions = Vec::new();
        for topic_id in candidates {
            if suggestions.len() >= limit {
                break;
            }
            let Some(topic) = get_topic(self.db.pool(), topic_id).await? else {
                continue;
            };
            if topic.is_solved
                && self
                    .forum_readable(viewer, topic.forum_id, &mut readable_forums)
                    .await?
            {
                suggestions.push(topic);
            }
        }

        debug!(query, suggestions = suggestions.len(), "Topic suggestions");
        Ok(suggestions)
    }

    fn clamped_topic_list(
        &self,
        topics: &[Topic],
        page_size: usize,
        page_param: Option<&str>,
    ) -> TopicList {
        let page = clamp_page(topics.len(), page_size, parse_page(page_param));
        TopicList {
            topics: slice_page(topics, page_size, page),
            page,
            num_pages: super::pagination::num_pages(topics.len(), page_size),
        }
    }

    async fn readable_topics(&self, viewer: Option<&User>, topics: Vec<Topic>) -> Result<Vec<Topic>> {
        let mut readable_forums: HashMap<i64, bool> = HashMap::new();
        let mut kept = Vec::with_capacity(topics.len());
        for topic in topics {
            if self
                .forum_readable(viewer, topic.forum_id, &mut readable_forums)
                .await?
            {
                kept.push(topic);
            }
        }
        Ok(kept)
    }

    async fn forum_readable(
        &self,
        viewer: Option<&User>,
        forum_id: i64,
        cache: &mut HashMap<i64, bool>,
    ) -> Result<bool> {
        if let Some(readable) = cache.get(&forum_id) {
            return Ok(*readable);
        }
        let readable = match get_forum(self.db.pool(), forum_id).await? {
            Some(forum) => self.permissions.can_read(viewer, &forum).await?,
            None => false,
        };
        cache.insert(forum_id, readable);
        Ok(readable)
    }
}
