use serde::{Deserialize, Serialize};

/// A registered forum member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub is_staff: bool,
    pub created_at: String,
}

/// A forum (board) holding topics. A forum bound to a group is only
/// readable by members of that group.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Forum {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub subtitle: String,
    pub group_id: Option<i64>,
}

/// A discussion thread.
///
/// `is_locked`, `is_sticky` and `is_solved` are independent flags; `forum_id`
/// changes when a moderator moves the topic.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Topic {
    pub id: i64,
    pub forum_id: i64,
    pub title: String,
    pub subtitle: String,
    pub author_id: i64,
    pub created_at: String,
    pub is_locked: bool,
    pub is_sticky: bool,
    pub is_solved: bool,
    pub last_post_id: Option<i64>,
}

/// A single message within a topic.
///
/// `position` is 1-based and contiguous within the topic; it is assigned at
/// creation and never renumbered, hidden posts included.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub topic_id: i64,
    pub author_id: i64,
    pub text: String,
    pub text_html: String,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub editor_id: Option<i64>,
    pub position: i64,
    pub is_visible: bool,
    pub text_hidden: String,
    pub like_count: i64,
    pub dislike_count: i64,
    pub is_useful: bool,
    pub ip_address: Option<String>,
}

/// Post joined with its author's name, for listings and quotes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostWithAuthor {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub post: Post,
    pub author_username: String,
}

/// Kind of reputation vote on a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Like,
    Dislike,
}

impl VoteKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "dislike" => Some(Self::Dislike),
            _ => None,
        }
    }

    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Like => Self::Dislike,
            Self::Dislike => Self::Like,
        }
    }
}

/// A user's vote on a post. At most one exists per (user, post).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub user_id: i64,
    pub post_id: i64,
    pub kind: String,
    pub created_at: String,
}

impl Vote {
    #[must_use]
    pub fn kind_enum(&self) -> Option<VoteKind> {
        VoteKind::from_str(&self.kind)
    }
}

/// Denormalized like/dislike counters of a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VoteCounts {
    pub like_count: i64,
    pub dislike_count: i64,
}

/// Per-user bookmark of the last fully read post in a topic.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReadCursor {
    pub user_id: i64,
    pub topic_id: i64,
    pub post_id: i64,
    pub updated_at: String,
}

/// A user's subscription to a topic.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopicFollow {
    pub user_id: i64,
    pub topic_id: i64,
    pub by_email: bool,
    pub created_at: String,
}

/// An open moderation flag raised on a post.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alert {
    pub id: i64,
    pub author_id: i64,
    pub post_id: i64,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub title: String,
    pub slug: String,
}

/// Delivery status of a queued notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeStatus {
    Pending,
    Sent,
    Failed,
}

impl NoticeStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// An email notice waiting in (or delivered from) the outbox.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notice {
    pub id: i64,
    pub recipient_id: i64,
    pub email: String,
    pub sender: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub sent_at: Option<String>,
}

impl Notice {
    #[must_use]
    pub fn status_enum(&self) -> Option<NoticeStatus> {
        NoticeStatus::from_str(&self.status)
    }
}

/// Data for inserting a new topic row.
#[derive(Debug, Clone)]
pub struct NewTopic {
    pub forum_id: i64,
    pub title: String,
    pub subtitle: String,
    pub author_id: i64,
    pub created_at: String,
}

/// Data for inserting a new post row.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub topic_id: i64,
    pub author_id: i64,
    pub text: String,
    pub text_html: String,
    pub created_at: String,
    pub position: i64,
    pub ip_address: Option<String>,
}

/// Data for queueing a notice.
#[derive(Debug, Clone)]
pub struct NewNotice {
    pub recipient_id: i64,
    pub email: String,
    pub sender: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// A follower eligible for a new-reply notice.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NoticeRecipient {
    pub user_id: i64,
    pub username: String,
    pub email: String,
}

/// Listing filter for topic lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicFilter {
    #[default]
    All,
    /// Topics marked solved.
    Solve,
    /// Topics not marked solved.
    Unsolve,
    /// Topics whose only post is the opening one.
    NoAnswer,
}

impl TopicFilter {
    /// Parse a `filter` query parameter; unknown or missing values mean `All`.
    #[must_use]
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("solve") => Self::Solve,
            Some("unsolve") => Self::Unsolve,
            Some("noanswer") => Self::NoAnswer,
            _ => Self::All,
        }
    }

    /// Extra `WHERE` condition on the `t` (topics) / `lp` (last post) aliases.
    pub(crate) fn sql_condition(self) -> &'static str {
        match self {
            Self::All => "1 = 1",
            Self::Solve => "t.is_solved = 1",
            Self::Unsolve => "t.is_solved = 0",
            Self::NoAnswer => "lp.position = 1",
        }
    }
}
