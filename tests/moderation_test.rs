//! Integration tests for topic and post moderation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forum_threads::auth::{Capability, PermissionProvider};
use forum_threads::config::Config;
use forum_threads::db::{
    add_group_member, count_topic_posts, create_forum, create_group, create_user, get_follow,
    get_post, get_topic, get_user, list_alerts_for_post, list_notices_for_user, Database, Forum,
    User,
};
use forum_threads::forum::{NewTopicInput, ReplyInput, ReplyOutcome};
use forum_threads::{ForumEngine, ForumError};
use tempfile::TempDir;

async fn setup() -> (ForumEngine, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    let config = Config {
        spam_limit: Duration::ZERO,
        bot_account: "modbot".to_string(),
        ..Config::default()
    };
    (ForumEngine::new(config, db), temp_dir)
}

async fn user(engine: &ForumEngine, name: &str, is_staff: bool) -> User {
    let email = format!("{name}@example.com");
    let id = create_user(engine.db().pool(), name, Some(&email), is_staff)
        .await
        .expect("Failed to create user");
    get_user(engine.db().pool(), id).await.unwrap().unwrap()
}

async fn topic_in(engine: &ForumEngine, author: &User, forum_id: i64) -> (i64, i64) {
    let created = engine
        .create_topic(
            author,
            &NewTopicInput {
                forum_id,
                raw_title: "Under review".to_string(),
                text: "Opening post".to_string(),
                ..NewTopicInput::default()
            },
        )
        .await
        .expect("Failed to create topic");
    (created.topic.id, created.post.id)
}

async fn reply(engine: &ForumEngine, author: &User, topic_id: i64) -> i64 {
    match engine
        .reply(
            author,
            &ReplyInput {
                topic_id,
                text: "a reply".to_string(),
                ..ReplyInput::default()
            },
        )
        .await
        .expect("Reply failed")
    {
        ReplyOutcome::Posted(post) => post.id,
        ReplyOutcome::NewerPosts { .. } => panic!("Reply was held back"),
    }
}

#[tokio::test]
async fn test_locked_topic_rejects_replies() {
    let (engine, _temp_dir) = setup().await;
    let alice = user(&engine, "alice", false).await;
    let bob = user(&engine, "bob", false).await;
    let moderator = user(&engine, "mod", true).await;
    let forum_id = create_forum(engine.db().pool(), "General", "general", None)
        .await
        .unwrap();
    let (topic_id, _) = topic_in(&engine, &alice, forum_id).await;

    let topic = engine.set_locked(&moderator, topic_id, true).await.unwrap();
    assert!(topic.is_locked);

    let err = engine
        .reply(
            &bob,
            &ReplyInput {
                topic_id,
                text: "let me in".to_string(),
                ..ReplyInput::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ForumError::Forbidden(_)));
    assert_eq!(
        count_topic_posts(engine.db().pool(), topic_id).await.unwrap(),
        1
    );
    assert!(get_follow(engine.db().pool(), bob.id, topic_id)
        .await
        .unwrap()
        .is_none());

    engine.set_locked(&moderator, topic_id, false).await.unwrap();
    reply(&engine, &bob, topic_id).await;
    assert_eq!(
        count_topic_posts(engine.db().pool(), topic_id).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_moderation_without_permission_changes_nothing() {
    let (engine, _temp_dir) = setup().await;
    let alice = user(&engine, "alice", false).await;
    let bob = user(&engine, "bob", false).await;
    let forum_id = create_forum(engine.db().pool(), "General", "general", None)
        .await
        .unwrap();
    let other_forum = create_forum(engine.db().pool(), "Other", "other", None)
        .await
        .unwrap();
    let (topic_id, post_id) = topic_in(&engine, &alice, forum_id).await;

    for result in [
        engine.set_locked(&bob, topic_id, true).await,
        engine.set_sticky(&bob, topic_id, true).await,
        engine.set_locked(&alice, topic_id, true).await,
    ] {
        assert!(matches!(result, Err(ForumError::Forbidden(_))));
    }
    assert!(matches!(
        engine.toggle_solved(&bob, topic_id).await,
        Err(ForumError::Forbidden(_))
    ));
    assert!(matches!(
        engine.move_topic(&alice, topic_id, other_forum).await,
        Err(ForumError::Forbidden(_))
    ));
    assert!(matches!(
        engine.hide_post(&bob, post_id, Some("spam")).await,
        Err(ForumError::Forbidden(_))
    ));
    assert!(matches!(
        engine.unhide_post(&alice, post_id).await,
        Err(ForumError::Forbidden(_))
    ));
    assert!(matches!(
        engine.open_alerts(&alice).await,
        Err(ForumError::Forbidden(_))
    ));

    let topic = get_topic(engine.db().pool(), topic_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!topic.is_locked);
    assert!(!topic.is_sticky);
    assert!(!topic.is_solved);
    assert_eq!(topic.forum_id, forum_id);
    let post = get_post(engine.db().pool(), post_id).await.unwrap().unwrap();
    assert!(post.is_visible);
}

#[tokio::test]
async fn test_author_and_moderator_can_solve() {
    let (engine, _temp_dir) = setup().await;
    let alice = user(&engine, "alice", false).await;
    let moderator = user(&engine, "mod", true).await;
    let forum_id = create_forum(engine.db().pool(), "General", "general", None)
        .await
        .unwrap();
    let (topic_id, _) = topic_in(&engine, &alice, forum_id).await;

    assert!(engine.toggle_solved(&alice, topic_id).await.unwrap());
    assert!(!engine.toggle_solved(&moderator, topic_id).await.unwrap());
}

#[tokio::test]
async fn test_move_prunes_followers_who_lose_access() {
    let (engine, _temp_dir) = setup().await;
    let pool = engine.db().pool();
    let author = user(&engine, "author", false).await;
    let insider = user(&engine, "insider", false).await;
    let moderator = user(&engine, "mod", true).await;

    let group_id = create_group(pool, "staffroom").await.unwrap();
    add_group_member(pool, group_id, insider.id).await.unwrap();
    let public_id = create_forum(pool, "Public", "public", None).await.unwrap();
    let private_id = create_forum(pool, "Private", "private", Some(group_id))
        .await
        .unwrap();

    let (topic_id, _) = topic_in(&engine, &author, public_id).await;
    assert!(engine.toggle_follow(&insider, topic_id).await.unwrap());

    let unfollowed = engine
        .move_topic(&moderator, topic_id, private_id)
        .await
        .unwrap();
    assert_eq!(unfollowed, vec![author.id]);

    let topic = get_topic(pool, topic_id).await.unwrap().unwrap();
    assert_eq!(topic.forum_id, private_id);
    assert!(get_follow(pool, author.id, topic_id).await.unwrap().is_none());
    assert!(get_follow(pool, insider.id, topic_id).await.unwrap().is_some());

    let err = engine.view_topic(Some(&author), topic_id, None).await.unwrap_err();
    assert!(matches!(err, ForumError::Forbidden(_)));
}

#[tokio::test]
async fn test_hide_and_unhide() {
    let (engine, _temp_dir) = setup().await;
    let alice = user(&engine, "alice", false).await;
    let bob = user(&engine, "bob", false).await;
    let moderator = user(&engine, "mod", true).await;
    let forum_id = create_forum(engine.db().pool(), "General", "general", None)
        .await
        .unwrap();
    let (topic_id, _) = topic_in(&engine, &alice, forum_id).await;
    let post_id = reply(&engine, &bob, topic_id).await;

    // Authors can hide their own posts but cannot leave a reason.
    let post = engine
        .hide_post(&bob, post_id, Some("my reason"))
        .await
        .unwrap();
    assert!(!post.is_visible);
    assert_eq!(post.text_hidden, "");
    assert_eq!(post.editor_id, Some(bob.id));

    let post = engine
        .hide_post(&moderator, post_id, Some("off topic"))
        .await
        .unwrap();
    assert_eq!(post.text_hidden, "off topic");
    assert_eq!(post.editor_id, Some(moderator.id));

    let post = engine.unhide_post(&moderator, post_id).await.unwrap();
    assert!(post.is_visible);
    assert_eq!(post.text_hidden, "");
    assert_eq!(post.position, 2);
}

#[tokio::test]
async fn test_useful_mark_rules() {
    let (engine, _temp_dir) = setup().await;
    let alice = user(&engine, "alice", false).await;
    let bob = user(&engine, "bob", false).await;
    let moderator = user(&engine, "mod", true).await;
    let forum_id = create_forum(engine.db().pool(), "General", "general", None)
        .await
        .unwrap();
    let (topic_id, opening_id) = topic_in(&engine, &alice, forum_id).await;
    let answer_id = reply(&engine, &bob, topic_id).await;

    // The topic author marks someone else's answer.
    assert!(engine.toggle_useful(&alice, answer_id).await.unwrap());
    // Nobody but a moderator marks their own post.
    assert!(matches!(
        engine.toggle_useful(&alice, opening_id).await,
        Err(ForumError::Forbidden(_))
    ));
    assert!(matches!(
        engine.toggle_useful(&bob, answer_id).await,
        Err(ForumError::Forbidden(_))
    ));
    assert!(!engine.toggle_useful(&moderator, answer_id).await.unwrap());
}

#[tokio::test]
async fn test_alert_lifecycle() {
    let (engine, _temp_dir) = setup().await;
    let alice = user(&engine, "alice", false).await;
    let bob = user(&engine, "bob", false).await;
    let moderator = user(&engine, "mod", true).await;
    let forum_id = create_forum(engine.db().pool(), "General", "general", None)
        .await
        .unwrap();
    let (topic_id, _) = topic_in(&engine, &alice, forum_id).await;
    let post_id = reply(&engine, &bob, topic_id).await;

    assert!(matches!(
        engine.report_post(&alice, post_id, "  ").await,
        Err(ForumError::InvalidInput(_))
    ));
    let alert_id = engine.report_post(&alice, post_id, "rude").await.unwrap();

    let alerts = engine.open_alerts(&moderator).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].id, alert_id);

    engine
        .resolve_alert(&moderator, alert_id, Some("Handled, thanks"))
        .await
        .unwrap();
    assert!(engine.open_alerts(&moderator).await.unwrap().is_empty());

    let notices = list_notices_for_user(engine.db().pool(), alice.id)
        .await
        .unwrap();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].sender.starts_with("modbot"));
    assert!(notices[0].text_body.contains("> Handled, thanks"));
    assert!(notices[0].text_body.contains("**mod**"));

    let err = engine
        .resolve_alert(&moderator, alert_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ForumError::NotFound(_)));
}

#[tokio::test]
async fn test_hiding_clears_alerts() {
    let (engine, _temp_dir) = setup().await;
    let alice = user(&engine, "alice", false).await;
    let bob = user(&engine, "bob", false).await;
    let moderator = user(&engine, "mod", true).await;
    let forum_id = create_forum(engine.db().pool(), "General", "general", None)
        .await
        .unwrap();
    let (topic_id, _) = topic_in(&engine, &alice, forum_id).await;
    let post_id = reply(&engine, &bob, topic_id).await;

    engine.report_post(&alice, post_id, "spam").await.unwrap();
    engine.report_post(&moderator, post_id, "spam").await.unwrap();
    engine
        .hide_post(&moderator, post_id, Some("spam"))
        .await
        .unwrap();

    assert!(list_alerts_for_post(engine.db().pool(), post_id)
        .await
        .unwrap()
        .is_empty());
}

/// Every forum is public; one user moderates posts and nothing else.
struct PostModerator {
    user_id: i64,
}

#[async_trait]
impl PermissionProvider for PostModerator {
    async fn can_read(&self, _user: Option<&User>, _forum: &Forum) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn has_permission(&self, user: &User, capability: Capability) -> anyhow::Result<bool> {
        Ok(user.id == self.user_id && capability == Capability::ChangePost)
    }
}

#[tokio::test]
async fn test_post_moderation_does_not_grant_topic_moderation() {
    let (engine, _temp_dir) = setup().await;
    let alice = user(&engine, "alice", false).await;
    let bob = user(&engine, "bob", false).await;
    let janitor = user(&engine, "janitor", false).await;
    let engine = engine.with_permissions(Arc::new(PostModerator {
        user_id: janitor.id,
    }));
    let forum_id = create_forum(engine.db().pool(), "General", "general", None)
        .await
        .unwrap();
    let (topic_id, _) = topic_in(&engine, &alice, forum_id).await;
    let post_id = reply(&engine, &bob, topic_id).await;

    engine
        .hide_post(&janitor, post_id, Some("off topic"))
        .await
        .unwrap();
    let post = engine.unhide_post(&janitor, post_id).await.unwrap();
    assert!(post.is_visible);

    assert!(matches!(
        engine.set_locked(&janitor, topic_id, true).await,
        Err(ForumError::Forbidden(_))
    ));
    assert!(matches!(
        engine.toggle_solved(&janitor, topic_id).await,
        Err(ForumError::Forbidden(_))
    ));
}
