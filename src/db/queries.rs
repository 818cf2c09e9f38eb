use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};

use super::models::{
    Alert, Forum, NewNotice, NewPost, NewTopic, Notice, NoticeRecipient, Post, PostWithAuthor,
    ReadCursor, Tag, Topic, TopicFilter, TopicFollow, User, Vote, VoteCounts, VoteKind,
};

// ========== Users, Groups & Forums ==========

/// Create a user, returning its ID.
pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    email: Option<&str>,
    is_staff: bool,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO users (username, email, is_staff) VALUES (?, ?, ?)")
        .bind(username)
        .bind(email)
        .bind(is_staff)
        .execute(pool)
        .await
        .context("Failed to create user")?;

    Ok(result.last_insert_rowid())
}

/// Get a user by ID.
pub async fn get_user(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Option<User>> {
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch user")
}

/// Get a user by username.
pub async fn get_user_by_username(
    executor: impl SqliteExecutor<'_>,
    username: &str,
) -> Result<Option<User>> {
    sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch user by username")
}

/// Create a group, returning its ID.
pub async fn create_group(pool: &SqlitePool, name: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO groups (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .context("Failed to create group")?;

    Ok(result.last_insert_rowid())
}

/// Add a user to a group. Adding an existing member is a no-op.
pub async fn add_group_member(pool: &SqlitePool, group_id: i64, user_id: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?, ?)")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to add group member")?;

    Ok(())
}

/// Check whether a user belongs to a group.
pub async fn is_group_member(
    executor: impl SqliteExecutor<'_>,
    group_id: i64,
    user_id: i64,
) -> Result<bool> {
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .fetch_one(executor)
            .await
            .context("Failed to check group membership")?;

    Ok(count.0 > 0)
}

/// Create a forum, returning its ID.
pub async fn create_forum(
    pool: &SqlitePool,
    title: &str,
    slug: &str,
    group_id: Option<i64>,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO forums (title, slug, group_id) VALUES (?, ?, ?)")
        .bind(title)
        .bind(slug)
        .bind(group_id)
        .execute(pool)
        .await
        .context("Failed to create forum")?;

    Ok(result.last_insert_rowid())
}

/// Get a forum by ID.
pub async fn get_forum(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Option<Forum>> {
    sqlx::query_as("SELECT * FROM forums WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch forum")
}

// ========== Topics ==========

/// Insert a topic row without a last post, returning its ID.
pub async fn insert_topic(executor: impl SqliteExecutor<'_>, topic: &NewTopic) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO topics (forum_id, title, subtitle, author_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        ",
    )
    .bind(topic.forum_id)
    .bind(&topic.title)
    .bind(&topic.subtitle)
    .bind(topic.author_id)
    .bind(&topic.created_at)
    .execute(executor)
    .await
    .context("Failed to insert topic")?;

    Ok(result.last_insert_rowid())
}

/// Get a topic by ID.
pub async fn get_topic(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Option<Topic>> {
    sqlx::query_as("SELECT * FROM topics WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch topic")
}

/// Take the write lock on a topic row inside a transaction.
///
/// This is a no-op update; issued as the first statement of a transaction it
/// makes SQLite grant the write lock before anything is read. Returns `false`
/// when the topic does not exist.
pub async fn lock_topic_row(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE topics SET last_post_id = last_post_id WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await
        .context("Failed to lock topic row")?;

    Ok(result.rows_affected() > 0)
}

/// Point a topic at its newest post.
pub async fn set_topic_last_post(
    executor: impl SqliteExecutor<'_>,
    topic_id: i64,
    post_id: i64,
) -> Result<()> {
    sqlx::query("UPDATE topics SET last_post_id = ? WHERE id = ?")
        .bind(post_id)
        .bind(topic_id)
        .execute(executor)
        .await
        .context("Failed to update topic last post")?;

    Ok(())
}

pub async fn set_topic_locked(
    executor: impl SqliteExecutor<'_>,
    id: i64,
    locked: bool,
) -> Result<()> {
    sqlx::query("UPDATE topics SET is_locked = ? WHERE id = ?")
        .bind(locked)
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to set topic lock")?;

    Ok(())
}

pub async fn set_topic_sticky(
    executor: impl SqliteExecutor<'_>,
    id: i64,
    sticky: bool,
) -> Result<()> {
    sqlx::query("UPDATE topics SET is_sticky = ? WHERE id = ?")
        .bind(sticky)
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to set topic sticky flag")?;

    Ok(())
}

pub async fn set_topic_solved(
    executor: impl SqliteExecutor<'_>,
    id: i64,
    solved: bool,
) -> Result<()> {
    sqlx::query("UPDATE topics SET is_solved = ? WHERE id = ?")
        .bind(solved)
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to set topic solved flag")?;

    Ok(())
}

/// Move a topic to another forum.
pub async fn set_topic_forum(
    executor: impl SqliteExecutor<'_>,
    id: i64,
    forum_id: i64,
) -> Result<()> {
    sqlx::query("UPDATE topics SET forum_id = ? WHERE id = ?")
        .bind(forum_id)
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to move topic")?;

    Ok(())
}

/// Replace a topic's title and subtitle.
pub async fn update_topic_heading(
    executor: impl SqliteExecutor<'_>,
    id: i64,
    title: &str,
    subtitle: &str,
) -> Result<()> {
    sqlx::query("UPDATE topics SET title = ?, subtitle = ? WHERE id = ?")
        .bind(title)
        .bind(subtitle)
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to update topic heading")?;

    Ok(())
}

/// Topics of a forum, most recently active first.
pub async fn list_forum_topics(
    pool: &SqlitePool,
    forum_id: i64,
    sticky: bool,
    filter: TopicFilter,
) -> Result<Vec<Topic>> {
    let sql = format!(
        r"
        SELECT t.* FROM topics t
        LEFT JOIN posts lp ON lp.id = t.last_post_id
        WHERE t.forum_id = ? AND t.is_sticky = ? AND {}
        ORDER BY lp.created_at DESC, t.id DESC
        ",
        filter.sql_condition()
    );

    sqlx::query_as(&sql)
        .bind(forum_id)
        .bind(sticky)
        .fetch_all(pool)
        .await
        .context("Failed to list forum topics")
}

/// Topics carrying a tag, most recently active first.
pub async fn list_topics_by_tag(
    pool: &SqlitePool,
    tag_id: i64,
    filter: TopicFilter,
) -> Result<Vec<Topic>> {
    let sql = format!(
        r"
        SELECT t.* FROM topics t
        JOIN topic_tags tt ON tt.topic_id = t.id
        LEFT JOIN posts lp ON lp.id = t.last_post_id
        WHERE tt.tag_id = ? AND {}
        ORDER BY lp.created_at DESC, t.id DESC
        ",
        filter.sql_condition()
    );

    sqlx::query_as(&sql)
        .bind(tag_id)
        .fetch_all(pool)
        .await
        .context("Failed to list topics by tag")
}

/// Topics opened by a user, newest first.
pub async fn list_topics_by_author(pool: &SqlitePool, author_id: i64) -> Result<Vec<Topic>> {
    sqlx::query_as("SELECT * FROM topics WHERE author_id = ? ORDER BY created_at DESC, id DESC")
        .bind(author_id)
        .fetch_all(pool)
        .await
        .context("Failed to list topics by author")
}

/// Topics a user follows, most recently active first.
pub async fn list_followed_topics(pool: &SqlitePool, user_id: i64) -> Result<Vec<Topic>> {
    sqlx::query_as(
        r"
        SELECT t.* FROM topics t
        JOIN topic_follows f ON f.topic_id = t.id
        LEFT JOIN posts lp ON lp.id = t.last_post_id
        WHERE f.user_id = ?
        ORDER BY lp.created_at DESC, t.id DESC
        ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("Failed to list followed topics")
}

// ========== Posts ==========

/// Highest post position in a topic, 0 for a topic with no posts yet.
pub async fn max_post_position(executor: impl SqliteExecutor<'_>, topic_id: i64) -> Result<i64> {
    let row: (i64,) =
        sqlx::query_as("SELECT COALESCE(MAX(position), 0) FROM posts WHERE topic_id = ?")
            .bind(topic_id)
            .fetch_one(executor)
            .await
            .context("Failed to fetch max post position")?;

    Ok(row.0)
}

/// Insert a post row, returning its ID.
pub async fn insert_post(executor: impl SqliteExecutor<'_>, post: &NewPost) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO posts (topic_id, author_id, text, text_html, created_at, position, ip_address)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(post.topic_id)
    .bind(post.author_id)
    .bind(&post.text)
    .bind(&post.text_html)
    .bind(&post.created_at)
    .bind(post.position)
    .bind(&post.ip_address)
    .execute(executor)
    .await
    .context("Failed to insert post")?;

    Ok(result.last_insert_rowid())
}

/// Get a post by ID.
pub async fn get_post(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Option<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch post")
}

/// Get the post at a given position of a topic.
pub async fn get_post_at_position(
    executor: impl SqliteExecutor<'_>,
    topic_id: i64,
    position: i64,
) -> Result<Option<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE topic_id = ? AND position = ?")
        .bind(topic_id)
        .bind(position)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch post by position")
}

/// Posts of a topic whose positions fall in `first..=last`, in order.
pub async fn get_posts_in_range(
    executor: impl SqliteExecutor<'_>,
    topic_id: i64,
    first: i64,
    last: i64,
) -> Result<Vec<Post>> {
    sqlx::query_as(
        r"
        SELECT * FROM posts
        WHERE topic_id = ? AND position BETWEEN ? AND ?
        ORDER BY position
        ",
    )
    .bind(topic_id)
    .bind(first)
    .bind(last)
    .fetch_all(executor)
    .await
    .context("Failed to fetch topic posts")
}

/// All posts of a topic, in order.
pub async fn get_topic_posts(executor: impl SqliteExecutor<'_>, topic_id: i64) -> Result<Vec<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE topic_id = ? ORDER BY position")
        .bind(topic_id)
        .fetch_all(executor)
        .await
        .context("Failed to fetch topic posts")
}

/// Number of posts in a topic.
pub async fn count_topic_posts(executor: impl SqliteExecutor<'_>, topic_id: i64) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE topic_id = ?")
        .bind(topic_id)
        .fetch_one(executor)
        .await
        .context("Failed to count topic posts")?;

    Ok(row.0)
}

/// Replace a post's text, recording who edited it and when.
pub async fn update_post_text(
    executor: impl SqliteExecutor<'_>,
    id: i64,
    text: &str,
    text_html: &str,
    editor_id: i64,
    updated_at: &str,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE posts
        SET text = ?, text_html = ?, editor_id = ?, updated_at = ?
        WHERE id = ?
        ",
    )
    .bind(text)
    .bind(text_html)
    .bind(editor_id)
    .bind(updated_at)
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to update post text")?;

    Ok(())
}

/// Hide a post. A `None` reason leaves any existing hidden-reason untouched.
pub async fn set_post_hidden(
    executor: impl SqliteExecutor<'_>,
    id: i64,
    editor_id: i64,
    reason: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE posts
        SET is_visible = 0, editor_id = ?, text_hidden = COALESCE(?, text_hidden)
        WHERE id = ?
        ",
    )
    .bind(editor_id)
    .bind(reason)
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to hide post")?;

    Ok(())
}

/// Show a hidden post again and clear its hidden-reason.
pub async fn set_post_visible(executor: impl SqliteExecutor<'_>, id: i64) -> Result<()> {
    sqlx::query("UPDATE posts SET is_visible = 1, text_hidden = '' WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to show post")?;

    Ok(())
}

pub async fn set_post_useful(
    executor: impl SqliteExecutor<'_>,
    id: i64,
    useful: bool,
) -> Result<()> {
    sqlx::query("UPDATE posts SET is_useful = ? WHERE id = ?")
        .bind(useful)
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to set post useful flag")?;

    Ok(())
}

/// Posts written by a user across all topics, newest first.
pub async fn list_posts_by_author(
    pool: &SqlitePool,
    author_id: i64,
    include_hidden: bool,
) -> Result<Vec<PostWithAuthor>> {
    sqlx::query_as(
        r"
        SELECT p.*, u.username AS author_username
        FROM posts p
        JOIN users u ON u.id = p.author_id
        WHERE p.author_id = ? AND (p.is_visible = 1 OR ?)
        ORDER BY p.created_at DESC, p.id DESC
        ",
    )
    .bind(author_id)
    .bind(include_hidden)
    .fetch_all(pool)
    .await
    .context("Failed to list posts by author")
}

// ========== Votes ==========

/// Get a user's vote on a post.
pub async fn get_vote(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    post_id: i64,
) -> Result<Option<Vote>> {
    sqlx::query_as("SELECT * FROM votes WHERE user_id = ? AND post_id = ?")
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch vote")
}

pub async fn insert_vote(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    post_id: i64,
    kind: VoteKind,
) -> Result<()> {
    sqlx::query("INSERT INTO votes (user_id, post_id, kind) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(post_id)
        .bind(kind.as_str())
        .execute(executor)
        .await
        .context("Failed to insert vote")?;

    Ok(())
}

/// Delete a user's vote on a post, returning the number of rows removed.
pub async fn delete_vote(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    post_id: i64,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM votes WHERE user_id = ? AND post_id = ?")
        .bind(user_id)
        .bind(post_id)
        .execute(executor)
        .await
        .context("Failed to delete vote")?;

    Ok(result.rows_affected())
}

/// Recompute a post's denormalized counters from its vote rows and return them.
pub async fn refresh_vote_counts(conn: &mut SqliteConnection, post_id: i64) -> Result<VoteCounts> {
    sqlx::query(
        r"
        UPDATE posts SET
            like_count = (SELECT COUNT(*) FROM votes WHERE post_id = posts.id AND kind = 'like'),
            dislike_count = (SELECT COUNT(*) FROM votes WHERE post_id = posts.id AND kind = 'dislike')
        WHERE id = ?
        ",
    )
    .bind(post_id)
    .execute(&mut *conn)
    .await
    .context("Failed to refresh vote counters")?;

    get_vote_counts(&mut *conn, post_id)
        .await?
        .context("Post vanished while refreshing vote counters")
}

/// Read a post's denormalized counters.
pub async fn get_vote_counts(
    executor: impl SqliteExecutor<'_>,
    post_id: i64,
) -> Result<Option<VoteCounts>> {
    sqlx::query_as("SELECT like_count, dislike_count FROM posts WHERE id = ?")
        .bind(post_id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch vote counters")
}

/// Count vote rows of one kind on a post.
pub async fn count_votes(
    executor: impl SqliteExecutor<'_>,
    post_id: i64,
    kind: VoteKind,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM votes WHERE post_id = ? AND kind = ?")
        .bind(post_id)
        .bind(kind.as_str())
        .fetch_one(executor)
        .await
        .context("Failed to count votes")?;

    Ok(row.0)
}

// ========== Read Cursors ==========

pub async fn get_read_cursor(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    topic_id: i64,
) -> Result<Option<ReadCursor>> {
    sqlx::query_as("SELECT * FROM read_cursors WHERE user_id = ? AND topic_id = ?")
        .bind(user_id)
        .bind(topic_id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch read cursor")
}

/// Position of the last post a user has read in a topic.
pub async fn get_read_position(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    topic_id: i64,
) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r"
        SELECT p.position FROM read_cursors r
        JOIN posts p ON p.id = r.post_id
        WHERE r.user_id = ? AND r.topic_id = ?
        ",
    )
    .bind(user_id)
    .bind(topic_id)
    .fetch_optional(executor)
    .await
    .context("Failed to fetch read position")?;

    Ok(row.map(|(position,)| position))
}

/// Create or move a read cursor.
pub async fn upsert_read_cursor(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    topic_id: i64,
    post_id: i64,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO read_cursors (user_id, topic_id, post_id)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id, topic_id)
        DO UPDATE SET post_id = excluded.post_id, updated_at = datetime('now')
        ",
    )
    .bind(user_id)
    .bind(topic_id)
    .bind(post_id)
    .execute(executor)
    .await
    .context("Failed to save read cursor")?;

    Ok(())
}

pub async fn delete_read_cursor(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    topic_id: i64,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM read_cursors WHERE user_id = ? AND topic_id = ?")
        .bind(user_id)
        .bind(topic_id)
        .execute(executor)
        .await
        .context("Failed to delete read cursor")?;

    Ok(result.rows_affected())
}

// ========== Follows ==========

pub async fn get_follow(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    topic_id: i64,
) -> Result<Option<TopicFollow>> {
    sqlx::query_as("SELECT * FROM topic_follows WHERE user_id = ? AND topic_id = ?")
        .bind(user_id)
        .bind(topic_id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch topic follow")
}

/// Create a follow if none exists. An existing follow keeps its email flag.
pub async fn ensure_follow(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    topic_id: i64,
    by_email: bool,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO topic_follows (user_id, topic_id, by_email) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(topic_id)
    .bind(by_email)
    .execute(executor)
    .await
    .context("Failed to create topic follow")?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_follow(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    topic_id: i64,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM topic_follows WHERE user_id = ? AND topic_id = ?")
        .bind(user_id)
        .bind(topic_id)
        .execute(executor)
        .await
        .context("Failed to delete topic follow")?;

    Ok(result.rows_affected())
}

pub async fn set_follow_by_email(
    executor: impl SqliteExecutor<'_>,
    user_id: i64,
    topic_id: i64,
    by_email: bool,
) -> Result<()> {
    sqlx::query("UPDATE topic_follows SET by_email = ? WHERE user_id = ? AND topic_id = ?")
        .bind(by_email)
        .bind(user_id)
        .bind(topic_id)
        .execute(executor)
        .await
        .context("Failed to update topic follow")?;

    Ok(())
}

/// Everyone following a topic.
pub async fn list_topic_followers(
    executor: impl SqliteExecutor<'_>,
    topic_id: i64,
) -> Result<Vec<TopicFollow>> {
    sqlx::query_as("SELECT * FROM topic_follows WHERE topic_id = ? ORDER BY user_id")
        .bind(topic_id)
        .fetch_all(executor)
        .await
        .context("Failed to list topic followers")
}

/// Email followers of a topic whose read cursor sits exactly on `read_position`,
/// excluding `exclude_user_id` and users without an address.
pub async fn list_notice_recipients(
    executor: impl SqliteExecutor<'_>,
    topic_id: i64,
    exclude_user_id: i64,
    read_position: i64,
) -> Result<Vec<NoticeRecipient>> {
    sqlx::query_as(
        r"
        SELECT u.id AS user_id, u.username, u.email
        FROM topic_follows f
        JOIN users u ON u.id = f.user_id
        JOIN read_cursors r ON r.user_id = f.user_id AND r.topic_id = f.topic_id
        JOIN posts p ON p.id = r.post_id
        WHERE f.topic_id = ?
          AND f.by_email = 1
          AND f.user_id != ?
          AND p.position = ?
          AND u.email IS NOT NULL AND u.email != ''
        ORDER BY u.id
        ",
    )
    .bind(topic_id)
    .bind(exclude_user_id)
    .bind(read_position)
    .fetch_all(executor)
    .await
    .context("Failed to list notice recipients")
}

// ========== Alerts ==========

pub async fn insert_alert(
    executor: impl SqliteExecutor<'_>,
    author_id: i64,
    post_id: i64,
    text: &str,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO alerts (author_id, post_id, text) VALUES (?, ?, ?)")
        .bind(author_id)
        .bind(post_id)
        .bind(text)
        .execute(executor)
        .await
        .context("Failed to insert alert")?;

    Ok(result.last_insert_rowid())
}

pub async fn get_alert(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Option<Alert>> {
    sqlx::query_as("SELECT * FROM alerts WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch alert")
}

pub async fn delete_alert(executor: impl SqliteExecutor<'_>, id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM alerts WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await
        .context("Failed to delete alert")?;

    Ok(result.rows_affected())
}

/// Clear every open alert on a post.
pub async fn delete_alerts_for_post(executor: impl SqliteExecutor<'_>, post_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM alerts WHERE post_id = ?")
        .bind(post_id)
        .execute(executor)
        .await
        .context("Failed to clear post alerts")?;

    Ok(result.rows_affected())
}

/// Open alerts, oldest first.
pub async fn list_open_alerts(pool: &SqlitePool) -> Result<Vec<Alert>> {
    sqlx::query_as("SELECT * FROM alerts ORDER BY created_at, id")
        .fetch_all(pool)
        .await
        .context("Failed to list alerts")
}

pub async fn list_alerts_for_post(
    executor: impl SqliteExecutor<'_>,
    post_id: i64,
) -> Result<Vec<Alert>> {
    sqlx::query_as("SELECT * FROM alerts WHERE post_id = ? ORDER BY id")
        .bind(post_id)
        .fetch_all(executor)
        .await
        .context("Failed to list post alerts")
}

// ========== Tags ==========

/// Find a tag by its title, creating it when missing. Returns the tag ID.
pub async fn get_or_create_tag(conn: &mut SqliteConnection, title: &str, slug: &str) -> Result<i64> {
    sqlx::query("INSERT OR IGNORE INTO tags (title, slug) VALUES (?, ?)")
        .bind(title)
        .bind(slug)
        .execute(&mut *conn)
        .await
        .context("Failed to create tag")?;

    let row: (i64,) = sqlx::query_as("SELECT id FROM tags WHERE title = ?")
        .bind(title)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to fetch tag id")?;

    Ok(row.0)
}

pub async fn get_tag(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Option<Tag>> {
    sqlx::query_as("SELECT * FROM tags WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch tag")
}

pub async fn add_topic_tag(
    executor: impl SqliteExecutor<'_>,
    topic_id: i64,
    tag_id: i64,
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO topic_tags (topic_id, tag_id) VALUES (?, ?)")
        .bind(topic_id)
        .bind(tag_id)
        .execute(executor)
        .await
        .context("Failed to tag topic")?;

    Ok(())
}

/// Remove every tag association of a topic.
pub async fn clear_topic_tags(executor: impl SqliteExecutor<'_>, topic_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM topic_tags WHERE topic_id = ?")
        .bind(topic_id)
        .execute(executor)
        .await
        .context("Failed to clear topic tags")?;

    Ok(result.rows_affected())
}

/// Tags of a topic in the order they were written in the title.
pub async fn get_topic_tags(executor: impl SqliteExecutor<'_>, topic_id: i64) -> Result<Vec<Tag>> {
    sqlx::query_as(
        r"
        SELECT t.* FROM tags t
        JOIN topic_tags tt ON tt.tag_id = t.id
        WHERE tt.topic_id = ?
        ORDER BY tt.rowid
        ",
    )
    .bind(topic_id)
    .fetch_all(executor)
    .await
    .context("Failed to fetch topic tags")
}

// ========== Notices ==========

/// Queue a notice for delivery, returning its ID.
pub async fn insert_notice(executor: impl SqliteExecutor<'_>, notice: &NewNotice) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO notices (recipient_id, email, sender, subject, text_body, html_body)
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(notice.recipient_id)
    .bind(&notice.email)
    .bind(&notice.sender)
    .bind(&notice.subject)
    .bind(&notice.text_body)
    .bind(&notice.html_body)
    .execute(executor)
    .await
    .context("Failed to queue notice")?;

    Ok(result.last_insert_rowid())
}

pub async fn get_notice(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Option<Notice>> {
    sqlx::query_as("SELECT * FROM notices WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch notice")
}

/// Oldest pending notices first.
pub async fn get_pending_notices(pool: &SqlitePool, limit: i64) -> Result<Vec<Notice>> {
    sqlx::query_as("SELECT * FROM notices WHERE status = 'pending' ORDER BY id LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to fetch pending notices")
}

/// Every notice addressed to a user, oldest first.
pub async fn list_notices_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<Notice>> {
    sqlx::query_as("SELECT * FROM notices WHERE recipient_id = ? ORDER BY id")
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("Failed to list notices")
}

pub async fn set_notice_sent(executor: impl SqliteExecutor<'_>, id: i64) -> Result<()> {
    sqlx::query(
        r"
        UPDATE notices
        SET status = 'sent', attempts = attempts + 1, last_error = NULL, sent_at = datetime('now')
        WHERE id = ?
        ",
    )
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to mark notice sent")?;

    Ok(())
}

/// Record a failed delivery; the notice gives up once `max_attempts` is reached.
pub async fn record_notice_failure(
    executor: impl SqliteExecutor<'_>,
    id: i64,
    error: &str,
    max_attempts: u32,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE notices
        SET attempts = attempts + 1,
            last_error = ?,
            status = CASE WHEN attempts + 1 >= ? THEN 'failed' ELSE 'pending' END
        WHERE id = ?
        ",
    )
    .bind(error)
    .bind(i64::from(max_attempts))
    .bind(id)
    .execute(executor)
    .await
    .context("Failed to record notice failure")?;

    Ok(())
}
