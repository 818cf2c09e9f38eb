//! Forum discussion-thread engine.
//!
//! Topics, posts and their moderation states, like/dislike votes with
//! denormalized counters, per-user read cursors, paged thread views and
//! email notices for followers, all stored in SQLite.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod forum;
pub mod notify;
pub mod render;
pub mod search;
pub mod tags;

pub use error::{ForumError, Result};
pub use forum::ForumEngine;
