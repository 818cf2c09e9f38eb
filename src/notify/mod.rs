//! Email notices about forum activity.
//!
//! Notices are written to the `notices` outbox once the triggering change is
//! committed; [`worker`] delivers them through a [`MailTransport`]. Nothing in
//! here can fail a reply.

pub mod transport;
pub mod worker;

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::Config;
use crate::db::{insert_notice, list_notice_recipients, NewNotice, NoticeRecipient, Post, Topic, User};
use crate::forum::urls::post_url;

pub use transport::{HttpRelayTransport, LogTransport, Mail, MailTransport};

/// Picks who hears about a new reply and queues their notices.
#[derive(Debug, Clone)]
pub struct NotificationFanout {
    config: Arc<Config>,
}

impl NotificationFanout {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn site_sender(&self) -> String {
        format!("{} <{}>", self.config.site_name, self.config.email_noreply)
    }

    /// Queue a notice for every email follower who had read up to the post
    /// right before `post`. The author is never notified.
    ///
    /// Returns how many notices were queued. A recipient whose notice cannot
    /// be stored is skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient list cannot be loaded.
    pub async fn new_post(
        &self,
        pool: &SqlitePool,
        topic: &Topic,
        post: &Post,
        author: &User,
    ) -> Result<usize> {
        let recipients =
            list_notice_recipients(pool, topic.id, author.id, post.position - 1).await?;
        debug!(
            topic_id = topic.id,
            post_id = post.id,
            recipients = recipients.len(),
            "Fanning out new post"
        );

        let mut queued = 0;
        for recipient in &recipients {
            let notice = self.new_post_notice(recipient, topic, post, author);
            match insert_notice(pool, &notice).await {
                Ok(_) => queued += 1,
                Err(e) => warn!(
                    topic_id = topic.id,
                    user_id = recipient.user_id,
                    error = %e,
                    "Failed to queue new post notice"
                ),
            }
        }
        Ok(queued)
    }

    /// Notice telling `recipient` that `author` replied in `topic`.
    #[must_use]
    pub fn new_post_notice(
        &self,
        recipient: &NoticeRecipient,
        topic: &Topic,
        post: &Post,
        author: &User,
    ) -> NewNotice {
        let url = post_url(&self.config, topic, post);
        let site = &self.config.site_name;

        let text_body = format!(
            "Hello {},\n\n{} replied to the topic \"{}\" that you follow.\n\
             Read the reply: {url}\n\n-- \n{site}\n",
            recipient.username, author.username, topic.title
        );
        let html_body = format!(
            "<p>Hello {},</p>\
             <p>{} replied to the topic <a href=\"{}\">{}</a> that you follow.</p>\
             <p>-- <br>{}</p>",
            escape(&recipient.username),
            escape(&author.username),
            escape(&url),
            escape(&topic.title),
            escape(site),
        );

        NewNotice {
            recipient_id: recipient.user_id,
            email: recipient.email.clone(),
            sender: self.site_sender(),
            subject: format!("{site} - Forum : {}", topic.title),
            text_body,
            html_body,
        }
    }

    /// Queue the bot's reply to a user whose alert a moderator resolved with
    /// a comment. Reporters without an address get nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the notice cannot be stored.
    pub async fn alert_resolved(
        &self,
        pool: &SqlitePool,
        resolution: &AlertResolution<'_>,
    ) -> Result<Option<i64>> {
        let Some(email) = resolution.reporter.email.as_deref().filter(|e| !e.is_empty()) else {
            debug!(
                user_id = resolution.reporter.id,
                "Reporter has no email address, skipping alert notice"
            );
            return Ok(None);
        };

        let url = post_url(&self.config, resolution.topic, resolution.post);
        let quoted: String = resolution
            .comment
            .lines()
            .map(|line| format!("> {line}\n"))
            .collect();

        let text_body = format!(
            "Hello {},\n\nYou reported the post of *{}* in the topic [{}]({url}). \
             Your alert was handled by **{}** who left you this message:\n\n{quoted}\n\
             Thank you from the moderation team!\n",
            resolution.reporter.username,
            resolution.post_author.username,
            resolution.topic.title,
            resolution.moderator.username,
        );
        let html_body = format!(
            "<p>Hello {},</p>\
             <p>You reported the post of <em>{}</em> in the topic <a href=\"{}\">{}</a>. \
             Your alert was handled by <strong>{}</strong> who left you this message:</p>\
             <blockquote>{}</blockquote>\
             <p>Thank you from the moderation team!</p>",
            escape(&resolution.reporter.username),
            escape(&resolution.post_author.username),
            escape(&url),
            escape(&resolution.topic.title),
            escape(&resolution.moderator.username),
            escape(resolution.comment),
        );

        let notice = NewNotice {
            recipient_id: resolution.reporter.id,
            email: email.to_string(),
            sender: format!("{} <{}>", self.config.bot_account, self.config.email_noreply),
            subject: format!("Alert resolved: {}", resolution.topic.title),
            text_body,
            html_body,
        };

        insert_notice(pool, &notice).await.map(Some)
    }
}

/// Everything the alert-resolution notice talks about.
#[derive(Debug, Clone, Copy)]
pub struct AlertResolution<'a> {
    pub reporter: &'a User,
    pub moderator: &'a User,
    pub post_author: &'a User,
    pub topic: &'a Topic,
    pub post: &'a Post,
    pub comment: &'a str,
}

fn escape(text: &str) -> String {
    ammonia::clean_text(text)
}
