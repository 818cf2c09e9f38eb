use tracing::{info, warn};

use super::ForumEngine;
use crate::auth::Capability;
use crate::db::{delete_alert, get_alert, insert_alert, list_open_alerts, Alert, User};
use crate::error::{ForumError, Result};
use crate::notify::AlertResolution;

impl ForumEngine {
    /// Flag a post for the moderators.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty reason, `Forbidden` for an unreadable forum.
    pub async fn report_post(&self, reporter: &User, post_id: i64, text: &str) -> Result<i64> {
        let post = self.load_post(post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;
        self.ensure_readable(Some(reporter), &topic).await?;

        let text = text.trim();
        if text.is_empty() {
            return Err(ForumError::InvalidInput("alert text is empty".to_string()));
        }

        let alert_id = insert_alert(self.db.pool(), reporter.id, post.id, text).await?;
        info!(alert_id, post_id, reporter_id = reporter.id, "Post reported");
        Ok(alert_id)
    }

    /// Alerts waiting for a moderator, oldest first.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the post moderation capability.
    pub async fn open_alerts(&self, actor: &User) -> Result<Vec<Alert>> {
        self.require(actor, Capability::ChangePost).await?;
        Ok(list_open_alerts(self.db.pool()).await?)
    }

    /// Close an alert. Resolved alerts are deleted, not archived.
    ///
    /// A non-empty `comment` is sent to the reporter on behalf of the bot
    /// account; failing to queue it does not undo the resolution.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the post moderation capability, `NotFound` for an
    /// unknown alert.
    pub async fn resolve_alert(
        &self,
        actor: &User,
        alert_id: i64,
        comment: Option<&str>,
    ) -> Result<()> {
        self.require(actor, Capability::ChangePost).await?;
        let alert = get_alert(self.db.pool(), alert_id)
            .await?
            .ok_or_else(|| ForumError::not_found("alert", alert_id))?;
        let post = self.load_post(alert.post_id).await?;
        let topic = self.load_topic(post.topic_id).await?;

        if delete_alert(self.db.pool(), alert.id).await? == 0 {
            return Err(ForumError::not_found("alert", alert_id));
        }
        info!(alert_id, post_id = post.id, moderator_id = actor.id, "Alert resolved");

        let Some(comment) = comment.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(());
        };

        let reporter = self.load_user(alert.author_id).await?;
        let post_author = self.load_user(post.author_id).await?;
        let resolution = AlertResolution {
            reporter: &reporter,
            moderator: actor,
            post_author: &post_author,
            topic: &topic,
            post: &post,
            comment,
        };
        if let Err(e) = self.fanout.alert_resolved(self.db.pool(), &resolution).await {
            warn!(alert_id, error = %e, "Failed to queue alert resolution notice");
        }
        Ok(())
    }
}
