use std::{io, sync::Arc};

use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use log::info;

use crate::{
    auth::CredentialStore,
    config::Config,
    error::AppError,
    media::{DiskMediaIntake, MediaIntake},
    posts::PostStore,
    sessions::SessionAuthority,
};

mod api;
mod auth;
mod config;
mod db;
mod error;
mod feed;
mod media;
mod model;
mod panel;
mod posts;
mod sessions;
mod users;
mod util;
mod validation;


async fn not_found() -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound)
}

/// Every route plus extractor error handling. State is registered by the caller.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::FormConfig::default()
            .error_handler(|err, _| AppError::validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| AppError::validation(err.to_string()).into()),
    )
    .configure(users::configure)
    .configure(panel::configure)
    .configure(feed::configure)
    .configure(api::configure)
    .configure(media::configure)
    .default_service(web::to(not_found));
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(|x| io::Error::new(io::ErrorKind::InvalidInput, x))?;

    let sql = db::connect(&config.database_url)
        .await
        .map_err(|x| io::Error::new(io::ErrorKind::Other, x))?;

    let users = web::Data::new(CredentialStore::new(sql.clone()));
    let posts = web::Data::new(PostStore::new(sql));
    let sessions = web::Data::new(SessionAuthority::new(time::Duration::seconds(
        config.session_ttl_secs,
    )));
    let intake: web::Data<dyn MediaIntake> = web::Data::from(
        Arc::new(DiskMediaIntake::new(&config.upload_dir)) as Arc<dyn MediaIntake>,
    );

    let bind = (config.bind_address.clone(), config.port);

    info!(
        "serving {} on {}:{}, uploads in {}",
        config.origin,
        bind.0,
        bind.1,
        config.upload_dir.display()
    );

    let config = web::Data::new(config);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::new(
                "%a \"%r\" %s %b \"%{Referer}i\" \"%{User-Agent}i\" %T",
            ))
            .app_data(users.clone())
            .app_data(posts.clone())
            .app_data(sessions.clone())
            .app_data(intake.clone())
            .app_data(config.clone())
            .configure(routes)
    })
    .bind(bind)?
    .run()
    .await
}
