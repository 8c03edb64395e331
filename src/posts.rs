use log::debug;
use sqlx::{Pool, Sqlite};
use time::OffsetDateTime;

use crate::{
    error::AppError,
    model::{FeedEntry, FeedRow, PostId, UserId},
    util, validation,
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct PostStore {
    sql: Pool<Sqlite>,
}

impl PostStore {
    pub fn new(sql: Pool<Sqlite>) -> Self {
        PostStore { sql }
    }

    pub async fn create(
        &self,
        author: UserId,
        content: &str,
        media: Option<&str>,
    ) -> Result<PostId, AppError> {
        self.create_at(author, content, media, util::monotonic_now())
            .await
    }

    pub async fn create_at(
        &self,
        author: UserId,
        content: &str,
        media: Option<&str>,
        at: OffsetDateTime,
    ) -> Result<PostId, AppError> {
        let content = validation::post_content(content).map_err(AppError::validation)?;

        let id = sqlx::query(
            "INSERT INTO posts (user_id, content, media_filename, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(author)
        .bind(content)
        .bind(media)
        .bind(util::to_micros(at))
        .execute(&self.sql)
        .await?
        .last_insert_rowid();

        debug!("post {id} created by user {author}");

        Ok(id)
    }

    /// Most recent first; equal timestamps keep insertion order.
    pub async fn list_feed(&self, limit: u32, offset: u32) -> Result<Vec<FeedEntry>, AppError> {
        let limit = limit.min(MAX_PAGE_SIZE);

        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, FeedRow>(
            "SELECT p.id, p.content, p.media_filename, p.created_at, u.username \
             FROM posts p JOIN users u ON p.user_id = u.id \
             ORDER BY p.created_at DESC, p.id ASC \
             LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.sql)
        .await?;

        Ok(rows.into_iter().map(FeedEntry::from).collect())
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.sql)
            .await?;

        Ok(count)
    }
}
