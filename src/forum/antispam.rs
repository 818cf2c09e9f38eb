//! Rapid consecutive reply guard.

use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::warn;

use crate::db::{Post, TIMESTAMP_FORMAT};

/// Rejects a reply when the same user wrote the topic's last post less than
/// `interval` ago.
#[derive(Debug, Clone, Copy)]
pub struct AntispamGuard {
    interval: Duration,
}

impl AntispamGuard {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether `user_id` may reply now, given the topic's current last post.
    #[must_use]
    pub fn allows(&self, last_post: Option<&Post>, user_id: i64, now: NaiveDateTime) -> bool {
        let Some(last_post) = last_post else {
            return true;
        };
        if last_post.author_id != user_id {
            return true;
        }

        match NaiveDateTime::parse_from_str(&last_post.created_at, TIMESTAMP_FORMAT) {
            Ok(posted_at) => !is_within(posted_at, now, self.interval),
            Err(e) => {
                warn!(post_id = last_post.id, error = %e, "Unparseable post timestamp, skipping antispam");
                true
            }
        }
    }
}

fn is_within(earlier: NaiveDateTime, now: NaiveDateTime, interval: Duration) -> bool {
    let elapsed = now.signed_duration_since(earlier);
    match chrono::Duration::from_std(interval) {
        Ok(limit) => elapsed < limit,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).unwrap()
    }

    fn post_by(author_id: i64, created_at: &str) -> Post {
        Post {
            id: 1,
            topic_id: 1,
            author_id,
            text: "text".to_string(),
            text_html: "<p>text</p>".to_string(),
            created_at: created_at.to_string(),
            updated_at: None,
            editor_id: None,
            position: 1,
            is_visible: true,
            text_hidden: String::new(),
            like_count: 0,
            dislike_count: 0,
            is_useful: false,
            ip_address: None,
        }
    }

    #[test]
    fn test_rejects_rapid_double_post() {
        let guard = AntispamGuard::new(Duration::from_secs(900));
        let last = post_by(7, "2024-05-01 10:00:00");
        assert!(!guard.allows(Some(&last), 7, at("2024-05-01 10:14:59")));
    }

    #[test]
    fn test_allows_after_interval() {
        let guard = AntispamGuard::new(Duration::from_secs(900));
        let last = post_by(7, "2024-05-01 10:00:00");
        assert!(guard.allows(Some(&last), 7, at("2024-05-01 10:15:00")));
    }

    #[test]
    fn test_allows_other_users() {
        let guard = AntispamGuard::new(Duration::from_secs(900));
        let last = post_by(7, "2024-05-01 10:00:00");
        assert!(guard.allows(Some(&last), 8, at("2024-05-01 10:00:01")));
    }

    #[test]
    fn test_allows_when_topic_has_no_last_post() {
        let guard = AntispamGuard::new(Duration::from_secs(900));
        assert!(guard.allows(None, 7, at("2024-05-01 10:00:00")));
    }

    #[test]
    fn test_zero_interval_disables_guard() {
        let guard = AntispamGuard::new(Duration::ZERO);
        let last = post_by(7, "2024-05-01 10:00:00");
        assert!(guard.allows(Some(&last), 7, at("2024-05-01 10:00:00")));
    }
}
