use actix_web::{get, web, HttpResponse};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    error::AppError,
    model::FeedEntry,
    posts::{PostStore, DEFAULT_PAGE_SIZE},
};

#[derive(Deserialize, Debug)]
struct Page {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Serialize)]
struct PostsResponse {
    posts: Vec<FeedEntry>,
    count: usize,
    total: i64,
    limit: u32,
    offset: u32,
}

// Public read API: no session required.
#[get("/api/posts")]
async fn list_posts(
    page: web::Query<Page>,
    posts: web::Data<PostStore>,
) -> Result<HttpResponse, AppError> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = page.offset.unwrap_or(0);

    let feed = posts.list_feed(limit, offset).await?;
    let total = posts.count().await?;

    Ok(HttpResponse::Ok().json(PostsResponse {
        count: feed.len(),
        total,
        posts: feed,
        limit,
        offset,
    }))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(Health {
        status: "healthy",
        timestamp: OffsetDateTime::now_utc(),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_posts).service(health);
}
