use actix_multipart::{Field, Multipart};
use actix_web::{get, http::StatusCode, post, web, HttpRequest, Responder};
use futures_util::{future, StreamExt as _, TryStreamExt as _};
use log::{debug, error, info};

use crate::{
    auth::Session,
    config::{Config, MAX_UPLOAD_SIZE},
    error::AppError,
    media::{self, ByteStream, MediaIntake, StoredMedia},
    panel,
    posts::{PostStore, DEFAULT_PAGE_SIZE},
    users::failure,
    validation,
};

// room for the text field and multipart framing on top of the file itself
const FORM_OVERHEAD: u64 = 256 * 1024;
const MAX_CONTENT_LEN: usize = 64 * 1024;

#[get("/")]
async fn index(
    req: HttpRequest,
    session: Option<Session>,
    posts: web::Data<PostStore>,
) -> impl Responder {
    let session = match session {
        Some(x) => x,
        None => return panel::redirect("/login"),
    };

    let msg = panel::take_flash(&req);

    match posts.list_feed(DEFAULT_PAGE_SIZE, 0).await {
        Ok(feed) => panel::render(
            StatusCode::OK,
            panel::feed_page(&session.user.username, &feed, msg.as_deref()),
            msg.is_some(),
        ),
        Err(x) => failure(x, |msg| panel::feed_page(&session.user.username, &[], msg)),
    }
}

#[get("/create_post")]
async fn create_post_form(req: HttpRequest, session: Option<Session>) -> impl Responder {
    if session.is_none() {
        return panel::redirect("/login");
    }

    let msg = panel::take_flash(&req);

    panel::render(StatusCode::OK, panel::create_post_page(msg.as_deref()), msg.is_some())
}

async fn read_text(field: &mut Field) -> Result<String, AppError> {
    let mut text = Vec::new();

    while let Some(chunk) = field.try_next().await? {
        if text.len() + chunk.len() > MAX_CONTENT_LEN {
            return Err(AppError::validation("content: post is too long"));
        }
        text.extend_from_slice(&chunk);
    }

    String::from_utf8(text).map_err(|_| AppError::validation("content: invalid text"))
}

/// File bytes as they arrive, cut off once the running total passes the upload limit.
fn capped(field: Field) -> ByteStream<'static> {
    let mut size = 0u64;

    field
        .map_err(AppError::from)
        .and_then(move |chunk| {
            size += chunk.len() as u64;
            future::ready(media::check_size(size).map(|_| chunk))
        })
        .boxed_local()
}

/// Reads the form, streaming any file into `intake` as it arrives. Media stored before a
/// failure is left in `stored` for the caller to discard.
async fn read_submission(
    mut payload: Multipart,
    intake: &dyn MediaIntake,
    stored: &mut Option<StoredMedia>,
) -> Result<String, AppError> {
    let mut content = None;

    while let Some(mut field) = payload.try_next().await? {
        let (name, filename) = match field.content_disposition() {
            Some(x) => (
                x.get_name().unwrap_or_default().to_owned(),
                x.get_filename().map(str::to_owned),
            ),
            None => (String::new(), None),
        };

        match (name.as_str(), filename) {
            ("content", _) => content = Some(read_text(&mut field).await?),
            // an empty file picker still submits a nameless part
            ("media", Some(filename)) if !filename.is_empty() && stored.is_none() => {
                let content_type = field
                    .content_type()
                    .map(|x| x.essence_str().to_owned())
                    .unwrap_or_default();

                // reject before reading a single byte of the file
                media::check_type(&content_type)?;

                if let Some(content) = &content {
                    validation::post_content(content).map_err(AppError::validation)?;
                }

                *stored = Some(
                    intake
                        .accept(&filename, &content_type, None, capped(field))
                        .await?,
                );
            }
            _ => while field.try_next().await?.is_some() {},
        }
    }

    let content = content.unwrap_or_default();
    let content = validation::post_content(&content).map_err(AppError::validation)?;

    Ok(content.to_owned())
}

async fn discard_orphan(intake: &dyn MediaIntake, stored: Option<StoredMedia>) {
    if let Some(media) = stored {
        if let Err(err) = intake.discard(&media.name).await {
            error!("unable to discard orphaned media {}: {err}", media.name);
        }
    }
}

#[post("/create_post")]
async fn create_post(
    req: HttpRequest,
    session: Option<Session>,
    payload: Multipart,
    posts: web::Data<PostStore>,
    intake: web::Data<dyn MediaIntake>,
    config: web::Data<Config>,
) -> impl Responder {
    // gate before touching the body
    let session = match session {
        Some(x) => x,
        None => return panel::redirect("/login"),
    };

    let declared_len = req
        .headers()
        .get(actix_web::http::header::CONTENT_LENGTH)
        .and_then(|x| x.to_str().ok())
        .and_then(|x| x.parse::<u64>().ok());

    if declared_len.is_some_and(|x| x > MAX_UPLOAD_SIZE + FORM_OVERHEAD) {
        return failure(media::too_large(), panel::create_post_page);
    }

    let intake = intake.into_inner();
    let mut stored = None;

    let content = match read_submission(payload, &*intake, &mut stored).await {
        Ok(x) => x,
        Err(x) => {
            debug!("rejected post from {}: {x}", session.user.username);
            discard_orphan(&*intake, stored).await;
            return failure(x, panel::create_post_page);
        }
    };

    let media_name = stored.as_ref().map(|x| x.name.as_str());

    if let Err(x) = posts.create(session.user.user_id, &content, media_name).await {
        discard_orphan(&*intake, stored).await;
        return failure(x, panel::create_post_page);
    }

    info!(
        "{} posted{}",
        session.user.username,
        stored
            .as_ref()
            .map(|x| format!(" with {} ({} bytes)", x.name, x.size))
            .unwrap_or_default()
    );

    panel::redirect_with_flash("/", "post created", &config)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(create_post_form)
        .service(create_post);
}
