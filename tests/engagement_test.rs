//! Votes, read cursors, follows, reply notices and the rapid reply guard.

use std::time::Duration;

use forum_threads::config::Config;
use forum_threads::db::{
    count_votes, create_forum, create_user, get_follow, get_post_at_position, get_read_position,
    get_user, get_vote, list_notices_for_user, Database, User, VoteCounts, VoteKind,
};
use forum_threads::forum::{NewTopicInput, ReplyInput, ReplyOutcome};
use forum_threads::{ForumEngine, ForumError};
use tempfile::TempDir;

async fn setup(config: Config) -> (ForumEngine, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (ForumEngine::new(config, db), temp_dir)
}

fn quiet_config() -> Config {
    Config {
        spam_limit: Duration::ZERO,
        ..Config::default()
    }
}

async fn user(engine: &ForumEngine, name: &str, email: Option<&str>) -> User {
    let id = create_user(engine.db().pool(), name, email, false)
        .await
        .expect("Failed to create user");
    get_user(engine.db().pool(), id).await.unwrap().unwrap()
}

async fn mailed_user(engine: &ForumEngine, name: &str) -> User {
    let email = format!("{name}@example.com");
    user(engine, name, Some(&email)).await
}

async fn open_topic(engine: &ForumEngine, author: &User) -> (i64, i64) {
    let forum_id = create_forum(engine.db().pool(), "General", "general", None)
        .await
        .unwrap();
    let created = engine
        .create_topic(
            author,
            &NewTopicInput {
                forum_id,
                raw_title: "Talk to me".to_string(),
                text: "first post".to_string(),
                ..NewTopicInput::default()
            },
        )
        .await
        .expect("Failed to create topic");
    (created.topic.id, created.post.id)
}

async fn try_reply(engine: &ForumEngine, author: &User, topic_id: i64) -> Result<i64, ForumError> {
    match engine
        .reply(
            author,
            &ReplyInput {
                topic_id,
                text: format!("reply from {}", author.username),
                ..ReplyInput::default()
            },
        )
        .await?
    {
        ReplyOutcome::Posted(post) => Ok(post.id),
        ReplyOutcome::NewerPosts { .. } => panic!("Reply was held back"),
    }
}

async fn reply(engine: &ForumEngine, author: &User, topic_id: i64) -> i64 {
    try_reply(engine, author, topic_id)
        .await
        .expect("Reply failed")
}

#[tokio::test]
async fn test_vote_toggling() {
    let (engine, _temp_dir) = setup(quiet_config()).await;
    let alice = mailed_user(&engine, "alice").await;
    let bob = mailed_user(&engine, "bob").await;
    let (_, post_id) = open_topic(&engine, &alice).await;

    let counts = engine.toggle_vote(&bob, post_id, VoteKind::Like).await.unwrap();
    assert_eq!((counts.like_count, counts.dislike_count), (1, 0));

    let counts = engine
        .toggle_vote(&bob, post_id, VoteKind::Dislike)
        .await
        .unwrap();
    assert_eq!((counts.like_count, counts.dislike_count), (0, 1));

    let counts = engine.toggle_vote(&bob, post_id, VoteKind::Like).await.unwrap();
    assert_eq!((counts.like_count, counts.dislike_count), (1, 0));

    let pool = engine.db().pool();
    assert_eq!(count_votes(pool, post_id, VoteKind::Like).await.unwrap(), 1);
    assert_eq!(count_votes(pool, post_id, VoteKind::Dislike).await.unwrap(), 0);

    // Voting the same way again withdraws the vote.
    let counts = engine.toggle_vote(&bob, post_id, VoteKind::Like).await.unwrap();
    assert_eq!(counts, VoteCounts::default());
    assert!(get_vote(pool, bob.id, post_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_self_vote_is_ignored() {
    let (engine, _temp_dir) = setup(quiet_config()).await;
    let alice = mailed_user(&engine, "alice").await;
    let (_, post_id) = open_topic(&engine, &alice).await;

    let counts = engine
        .toggle_vote(&alice, post_id, VoteKind::Like)
        .await
        .unwrap();
    assert_eq!(counts, VoteCounts::default());
    assert!(get_vote(engine.db().pool(), alice.id, post_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_mark_unread_moves_cursor_back() {
    let (engine, _temp_dir) = setup(quiet_config()).await;
    let alice = mailed_user(&engine, "alice").await;
    let bob = mailed_user(&engine, "bob").await;
    let carol = mailed_user(&engine, "carol").await;
    let (topic_id, _) = open_topic(&engine, &alice).await;
    for _ in 0..5 {
        reply(&engine, &bob, topic_id).await;
    }
    let pool = engine.db().pool();

    engine.mark_read(&carol, topic_id).await.unwrap();
    assert_eq!(
        get_read_position(pool, carol.id, topic_id).await.unwrap(),
        Some(6)
    );
    assert!(!engine.is_unread(&carol, topic_id).await.unwrap());
    assert_eq!(
        engine.first_unread_post(&carol, topic_id).await.unwrap().position,
        6
    );

    let fifth = get_post_at_position(pool, topic_id, 5).await.unwrap().unwrap();
    engine.mark_unread(&carol, fifth.id).await.unwrap();
    assert_eq!(
        get_read_position(pool, carol.id, topic_id).await.unwrap(),
        Some(4)
    );
    assert!(engine.is_unread(&carol, topic_id).await.unwrap());
    assert_eq!(
        engine.first_unread_post(&carol, topic_id).await.unwrap().id,
        fifth.id
    );
    let follow = get_follow(pool, carol.id, topic_id).await.unwrap().unwrap();
    assert!(!follow.by_email);

    let first = get_post_at_position(pool, topic_id, 1).await.unwrap().unwrap();
    engine.mark_unread(&carol, first.id).await.unwrap();
    assert_eq!(get_read_position(pool, carol.id, topic_id).await.unwrap(), None);
    assert_eq!(
        engine.first_unread_post(&carol, topic_id).await.unwrap().position,
        1
    );
}

#[tokio::test]
async fn test_follow_toggles() {
    let (engine, _temp_dir) = setup(quiet_config()).await;
    let alice = mailed_user(&engine, "alice").await;
    let bob = mailed_user(&engine, "bob").await;
    let (topic_id, _) = open_topic(&engine, &alice).await;
    let pool = engine.db().pool();

    assert!(engine.toggle_follow(&bob, topic_id).await.unwrap());
    assert!(!get_follow(pool, bob.id, topic_id).await.unwrap().unwrap().by_email);
    assert!(!engine.toggle_follow(&bob, topic_id).await.unwrap());
    assert!(get_follow(pool, bob.id, topic_id).await.unwrap().is_none());

    // Email toggling follows the topic when needed.
    assert!(engine.toggle_follow_by_email(&bob, topic_id).await.unwrap());
    assert!(get_follow(pool, bob.id, topic_id).await.unwrap().unwrap().by_email);
    assert!(!engine.toggle_follow_by_email(&bob, topic_id).await.unwrap());
    let follow = get_follow(pool, bob.id, topic_id).await.unwrap().unwrap();
    assert!(!follow.by_email);

    let followed = engine.followed_topics(&bob, None).await.unwrap();
    assert_eq!(followed.topics.len(), 1);
    assert_eq!(followed.topics[0].id, topic_id);
}

#[tokio::test]
async fn test_reply_notifies_caught_up_email_followers() {
    let (engine, _temp_dir) = setup(quiet_config()).await;
    let alice = mailed_user(&engine, "alice").await;
    let bob = mailed_user(&engine, "bob").await;
    let carol = mailed_user(&engine, "carol").await;
    let dave = mailed_user(&engine, "dave").await;
    let erin = mailed_user(&engine, "erin").await;
    let frank = user(&engine, "frank", None).await;
    let (topic_id, _) = open_topic(&engine, &alice).await;

    // Alice and carol are caught up and want email.
    for follower in [&alice, &carol] {
        engine.toggle_follow_by_email(follower, topic_id).await.unwrap();
        engine.mark_read(follower, topic_id).await.unwrap();
    }
    // Dave wants email but never read the topic.
    engine.toggle_follow_by_email(&dave, topic_id).await.unwrap();
    // Erin is caught up but follows without email.
    engine.toggle_follow(&erin, topic_id).await.unwrap();
    engine.mark_read(&erin, topic_id).await.unwrap();
    // Frank has no address.
    engine.toggle_follow_by_email(&frank, topic_id).await.unwrap();
    engine.mark_read(&frank, topic_id).await.unwrap();

    // Bob replies to a topic he is also following by email.
    engine.toggle_follow_by_email(&bob, topic_id).await.unwrap();
    engine.mark_read(&bob, topic_id).await.unwrap();
    reply(&engine, &bob, topic_id).await;

    let pool = engine.db().pool();
    for (follower, expected) in [
        (&alice, 1),
        (&carol, 1),
        (&bob, 0),
        (&dave, 0),
        (&erin, 0),
        (&frank, 0),
    ] {
        let notices = list_notices_for_user(pool, follower.id).await.unwrap();
        assert_eq!(notices.len(), expected, "notices for {}", follower.username);
    }

    let notice = &list_notices_for_user(pool, carol.id).await.unwrap()[0];
    assert_eq!(notice.email, "carol@example.com");
    assert!(notice.subject.ends_with("Talk to me"));
    assert!(notice.text_body.contains("bob replied"));
    assert_eq!(notice.status, "pending");

    // Carol has not read the first reply, so a second one stays quiet for her.
    reply(&engine, &erin, topic_id).await;
    assert_eq!(list_notices_for_user(pool, carol.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rapid_consecutive_reply_is_rejected() {
    let (engine, _temp_dir) = setup(Config::default()).await;
    let alice = mailed_user(&engine, "alice").await;
    let bob = mailed_user(&engine, "bob").await;
    let (topic_id, _) = open_topic(&engine, &alice).await;

    assert!(!engine.antispam_allows(&alice, topic_id).await.unwrap());
    let err = try_reply(&engine, &alice, topic_id).await.unwrap_err();
    assert!(matches!(err, ForumError::Forbidden(_)));

    assert!(engine.antispam_allows(&bob, topic_id).await.unwrap());
    reply(&engine, &bob, topic_id).await;

    // Someone else spoke last, so alice may answer.
    reply(&engine, &alice, topic_id).await;
    let err = try_reply(&engine, &alice, topic_id).await.unwrap_err();
    assert!(matches!(err, ForumError::Forbidden(_)));
}
