use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::util;

pub type UserId = i64;
pub type PostId = i64;

#[derive(Debug, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: i64,
}

/// Row shape of the feed query, timestamps still in stored form.
#[derive(Debug, FromRow)]
pub struct FeedRow {
    pub id: PostId,
    pub content: String,
    pub media_filename: Option<String>,
    pub created_at: i64,
    pub username: String,
}

/// A post joined with its author's username.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: PostId,
    pub content: String,
    pub media_reference: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub username: String,
}

impl From<FeedRow> for FeedEntry {
    fn from(row: FeedRow) -> Self {
        FeedEntry {
            id: row.id,
            content: row.content,
            media_reference: row.media_filename,
            created_at: util::from_micros(row.created_at),
            username: row.username,
        }
    }
}

/// Identity bound to a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}
