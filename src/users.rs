use actix_web::{
    cookie::{Cookie, SameSite},
    http::{self, StatusCode},
    post, web, HttpResponse, Responder,
};
use log::{error, info};
use serde::Deserialize;

use crate::{
    auth::{CredentialStore, Session, SESSION_COOKIE},
    config::Config,
    error::AppError,
    panel,
    sessions::SessionAuthority,
};

#[derive(Deserialize, Debug)]
struct LoginForm {
    username: String,
    password: String,
}

#[post("/login")]
async fn login(
    form: web::Form<LoginForm>,
    users: web::Data<CredentialStore>,
    sessions: web::Data<SessionAuthority>,
    config: web::Data<Config>,
    session: Option<Session>,
) -> impl Responder {
    if session.is_some() {
        return panel::redirect("/");
    }

    let user = match users.verify(&form.username, &form.password).await {
        Ok(x) => x,
        Err(AppError::Auth(msg)) => {
            info!("failed login for {:?}", form.username);
            return panel::render(
                StatusCode::UNAUTHORIZED,
                panel::login_page(Some(&msg)),
                false,
            );
        }
        Err(x) => return failure(x, panel::login_page),
    };

    let token = sessions.create(user.user_id, &user.username);

    info!("user {} logged in", user.username);

    HttpResponse::Found()
        .cookie(
            Cookie::build(SESSION_COOKIE, token)
                .path("/")
                .secure(config.secure_cookies)
                .http_only(true)
                .same_site(SameSite::Lax)
                .max_age(sessions.ttl())
                .finish(),
        )
        .cookie(panel::flash_cookie("login successful", &config))
        .append_header((http::header::LOCATION, "/"))
        .finish()
}

#[derive(Deserialize)]
struct RegistrationForm {
    username: String,
    email: String,
    password: String,
}

#[post("/register")]
async fn register(
    form: web::Form<RegistrationForm>,
    users: web::Data<CredentialStore>,
    config: web::Data<Config>,
    session: Option<Session>,
) -> impl Responder {
    if session.is_some() {
        return panel::redirect("/");
    }

    match users
        .register(&form.username, &form.email, &form.password)
        .await
    {
        Ok(_) => panel::redirect_with_flash(
            "/login",
            "registration successful, please log in",
            &config,
        ),
        Err(x) => failure(x, panel::register_page),
    }
}

#[post("/logout")]
async fn logout(
    session: Option<Session>,
    sessions: web::Data<SessionAuthority>,
    config: web::Data<Config>,
) -> impl Responder {
    // an unknown or expired token has nothing left to destroy
    if let Some(session) = session {
        sessions.destroy(&session.token);
        info!("user {} logged out", session.user.username);
    }

    let mut removal = Cookie::named(SESSION_COOKIE);
    removal.set_path("/");
    removal.make_removal();

    HttpResponse::Found()
        .cookie(removal)
        .cookie(panel::flash_cookie("you have been logged out", &config))
        .append_header((http::header::LOCATION, "/login"))
        .finish()
}

/// Re-renders a form with the error. Internal detail is logged, never shown.
pub fn failure(err: AppError, page: impl FnOnce(Option<&str>) -> maud::Markup) -> HttpResponse {
    if let AppError::Internal(detail) = &err {
        error!("{detail}");
    }

    panel::render(
        actix_web::ResponseError::status_code(&err),
        page(Some(&err.public_message())),
        false,
    )
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(login).service(register).service(logout);
}
