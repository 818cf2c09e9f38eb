//! Canonical links to topics and posts.

use crate::config::Config;
use crate::db::{Post, Topic};
use crate::tags::slugify;

/// `{site}/forums/sujet/{id}/{slug}/`
#[must_use]
pub fn topic_url(config: &Config, topic: &Topic) -> String {
    format!(
        "{}/forums/sujet/{}/{}/",
        config.site_root(),
        topic.id,
        slugify(&topic.title)
    )
}

/// Link to a post on the thread page that holds it.
#[must_use]
pub fn post_url(config: &Config, topic: &Topic, post: &Post) -> String {
    let page = page_of_position(post.position, config.posts_per_page);
    format!("{}?page={page}#p{}", topic_url(config, topic), post.id)
}

/// 1-based page holding the post at `position`.
#[must_use]
pub fn page_of_position(position: i64, posts_per_page: usize) -> i64 {
    let size = posts_per_page.max(1) as i64;
    ((position.max(1) - 1) / size) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(id: i64, title: &str) -> Topic {
        Topic {
            id,
            forum_id: 1,
            title: title.to_string(),
            subtitle: String::new(),
            author_id: 1,
            created_at: "2024-01-01 00:00:00".to_string(),
            is_locked: false,
            is_sticky: false,
            is_solved: false,
            last_post_id: None,
        }
    }

    #[test]
    fn test_page_of_position() {
        assert_eq!(page_of_position(1, 21), 1);
        assert_eq!(page_of_position(21, 21), 1);
        assert_eq!(page_of_position(22, 21), 2);
        assert_eq!(page_of_position(43, 21), 3);
    }

    #[test]
    fn test_topic_url() {
        let config = Config::default();
        assert_eq!(
            topic_url(&config, &topic(12, "Pinning futures!")),
            "http://localhost:8000/forums/sujet/12/pinning-futures/"
        );
    }
}
