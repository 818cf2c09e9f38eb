//! Error taxonomy surfaced by the forum engine.

use thiserror::Error;

/// SQLite result codes that mean "another writer got there first; try again".
///
/// 5 = BUSY, 6 = LOCKED, 261 = BUSY_RECOVERY, 517 = BUSY_SNAPSHOT,
/// 1555 = CONSTRAINT_PRIMARYKEY, 2067 = CONSTRAINT_UNIQUE.
const CONFLICT_CODES: &[&str] = &["5", "6", "261", "517", "1555", "2067"];

#[derive(Debug, Error)]
pub enum ForumError {
    /// A referenced topic, post, user, forum, tag, alert or page does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Permission, visibility or lock violation. State is left untouched.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Caller-supplied data that cannot be acted upon.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = ForumError> = std::result::Result<T, E>;

impl ForumError {
    pub(crate) fn not_found(kind: &str, id: i64) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }

    /// Whether this failure is a write race that the atomic unit should retry.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        let Self::Internal(err) = self else {
            return false;
        };
        err.chain().any(|cause| {
            cause
                .downcast_ref::<sqlx::Error>()
                .and_then(sqlx::Error::as_database_error)
                .and_then(|db_err| db_err.code())
                .is_some_and(|code| CONFLICT_CODES.iter().any(|c| *c == code))
        })
    }
}

impl From<sqlx::Error> for ForumError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}
