//! The discussion-thread engine.
//!
//! [`ForumEngine`] owns every state-changing operation on topics and posts.
//! Each one checks permissions first, then runs a single SQLite transaction,
//! and only after commit touches the search index and the notice outbox.

pub mod antispam;
pub mod locks;
pub mod pagination;
pub mod urls;

mod alerts;
mod posts;
mod read;
mod topics;
mod votes;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::auth::{Capability, DbPermissions, PermissionProvider};
use crate::config::Config;
use crate::db::{
    get_forum, get_post, get_topic, get_user, lock_topic_row, Database, Forum, Post, Topic, User,
};
use crate::error::{ForumError, Result};
use crate::notify::NotificationFanout;
use crate::render::{CommonMarkRenderer, MarkdownRenderer};
use crate::search::{FtsSearchIndex, SearchIndex};

use antispam::AntispamGuard;
use locks::TopicLocks;

pub use posts::{EditDraft, EditInput, EditOutcome, ReplyInput, ReplyOutcome};
pub use topics::{ForumTopics, NewTopicInput, PostList, TopicCreated, TopicList, TopicPage};

/// Attempts of an atomic unit before a write conflict is reported.
const CONFLICT_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct ForumEngine {
    db: Database,
    config: Arc<Config>,
    permissions: Arc<dyn PermissionProvider>,
    renderer: Arc<dyn MarkdownRenderer>,
    search: Arc<dyn SearchIndex>,
    locks: Arc<TopicLocks>,
    antispam: AntispamGuard,
    fanout: NotificationFanout,
}

impl ForumEngine {
    /// Engine with the stock collaborators: group-based permissions,
    /// CommonMark rendering and the FTS5 index.
    #[must_use]
    pub fn new(config: Config, db: Database) -> Self {
        let config = Arc::new(config);
        let pool = db.pool().clone();

        Self {
            antispam: AntispamGuard::new(config.spam_limit),
            fanout: NotificationFanout::new(Arc::clone(&config)),
            permissions: Arc::new(DbPermissions::new(pool.clone())),
            renderer: Arc::new(CommonMarkRenderer),
            search: Arc::new(FtsSearchIndex::new(pool)),
            locks: Arc::new(TopicLocks::new()),
            config,
            db,
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn MarkdownRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.search = search;
        self
    }

    #[must_use]
    pub const fn db(&self) -> &Database {
        &self.db
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========== Loading ==========

    async fn load_topic(&self, id: i64) -> Result<Topic> {
        get_topic(self.db.pool(), id)
            .await?
            .ok_or_else(|| ForumError::not_found("topic", id))
    }

    async fn load_post(&self, id: i64) -> Result<Post> {
        get_post(self.db.pool(), id)
            .await?
            .ok_or_else(|| ForumError::not_found("post", id))
    }

    async fn load_forum(&self, id: i64) -> Result<Forum> {
        get_forum(self.db.pool(), id)
            .await?
            .ok_or_else(|| ForumError::not_found("forum", id))
    }

    async fn load_user(&self, id: i64) -> Result<User> {
        get_user(self.db.pool(), id)
            .await?
            .ok_or_else(|| ForumError::not_found("user", id))
    }

    // ========== Permissions ==========

    /// Load the topic's forum and make sure `user` may read it.
    async fn ensure_readable(&self, user: Option<&User>, topic: &Topic) -> Result<Forum> {
        let forum = self.load_forum(topic.forum_id).await?;
        if !self.permissions.can_read(user, &forum).await? {
            return Err(ForumError::Forbidden("cannot read this forum"));
        }
        Ok(forum)
    }

    /// Take the topic's write lock inside a transaction, then check `user`
    /// against the forum the topic is in at that point. A topic moved while
    /// the caller was waiting is checked against its new forum.
    async fn lock_readable_topic(
        &self,
        conn: &mut SqliteConnection,
        user: &User,
        topic_id: i64,
    ) -> Result<Topic> {
        if !lock_topic_row(&mut *conn, topic_id).await? {
            return Err(ForumError::not_found("topic", topic_id));
        }
        let topic = get_topic(&mut *conn, topic_id)
            .await?
            .ok_or_else(|| ForumError::not_found("topic", topic_id))?;
        let forum = get_forum(&mut *conn, topic.forum_id)
            .await?
            .ok_or_else(|| ForumError::not_found("forum", topic.forum_id))?;
        if !self.permissions.can_read(Some(user), &forum).await? {
            return Err(ForumError::Forbidden("cannot read this forum"));
        }
        Ok(topic)
    }

    async fn can(&self, user: &User, capability: Capability) -> Result<bool> {
        Ok(self.permissions.has_permission(user, capability).await?)
    }

    async fn require(&self, user: &User, capability: Capability) -> Result<()> {
        if self.can(user, capability).await? {
            Ok(())
        } else {
            debug!(user_id = user.id, capability = capability.as_str(), "Permission denied");
            Err(ForumError::Forbidden("missing moderation permission"))
        }
    }

    // ========== Atomic units ==========

    /// Run an atomic unit, retrying it while it loses write races.
    async fn retry_on_conflict<T, F, Fut>(&self, what: &'static str, mut unit: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match unit().await {
                Err(e) if e.is_conflict() && attempt < CONFLICT_ATTEMPTS => {
                    debug!(what, attempt, "Write conflict, retrying");
                    tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) if e.is_conflict() => {
                    warn!(what, attempts = attempt, "Write conflict persisted, giving up");
                    return Err(e);
                }
                other => return other,
            }
        }
    }
}
