use actix_web::{
    cookie::{Cookie, SameSite},
    get, http,
    http::StatusCode,
    web, HttpRequest, HttpResponse, Responder,
};
use maud::{html, Markup, DOCTYPE};
use time::{format_description::FormatItem, macros::format_description};

use crate::{auth::Session, config::Config, media, model::FeedEntry};

pub const FLASH_COOKIE: &str = "msg";

const POSTED_AT: &[FormatItem<'static>] =
    format_description!("[day].[month].[year] [hour]:[minute]");

fn header(title: &str) -> Markup {
    html! {
        (DOCTYPE)
        meta charset="utf-8";
        meta name="viewport" content="width=device-width, initial-scale=1.0";
        title { (title) " | voar" }
        script src="https://cdn.tailwindcss.com" {}
    }
}

fn messagebox(msg: &str) -> Markup {
    html! {
        div class="p-4 border-4 border-rose-500 text-rose-500 mb-4 text-center" {
            h2 { (msg) }
        }
    }
}

fn flash(msg: Option<&str>) -> Markup {
    match msg {
        Some(x) => messagebox(x),
        None => html! {},
    }
}

const INPUT: &str = "rounded-lg mb-4 bg-zinc-700 py-1 px-2 focus:outline-cyan-700 placeholder:italic text-center";
const BUTTON: &str = "rounded-lg m-auto block text-center bg-zinc-700 hover:bg-cyan-700 py-1 px-2";

fn media_embed(name: &str) -> Markup {
    let src = format!("/uploads/{name}");

    if media::content_type_for(name).type_() == mime::VIDEO {
        html! { video class="rounded-md max-h-96 mt-2" controls src=(src) {} }
    } else {
        html! { img class="rounded-md max-h-96 mt-2" src=(src) alt=(name); }
    }
}

pub fn feed_page(username: &str, posts: &[FeedEntry], msg: Option<&str>) -> Markup {
    html! {
        (header("feed"))
        body class="bg-zinc-800 text-[#f2f7f2]" {
            div class="flex flex-row w-full p-4" {
                div { "Hi, " (username) "!" }
                div class="flex flex-row ml-auto" {
                    a href="/create_post" class=(BUTTON) { "New post" }
                    form action="/logout" method="post" class="ml-2" {
                        button type="submit" class=(BUTTON) { "Log out" }
                    }
                }
            }
            div class="flex flex-col m-auto w-1/2" {
                (flash(msg))
                @if posts.is_empty() {
                    p class="text-center italic" { "Nothing here yet." }
                }
                @for post in posts {
                    div class="p-4 mb-4 rounded-lg bg-zinc-900" {
                        div class="text-sm text-zinc-400" {
                            (post.username) " · "
                            (post.created_at.format(POSTED_AT).unwrap_or_default())
                        }
                        p class="whitespace-pre-wrap" { (post.content) }
                        @if let Some(name) = &post.media_reference {
                            (media_embed(name))
                        }
                    }
                }
            }
        }
    }
}

pub fn login_page(msg: Option<&str>) -> Markup {
    html! {
        (header("login"))
        body class="bg-zinc-800 text-[#f2f7f2]" {
            div class="flex flex-col w-screen h-screen" {
                div class="m-auto" {
                    (flash(msg))
                    h1 class="text-center" { "login" }
                    form action="/login" method="post" class="mt-4 flex flex-col" {
                        input type="text" name="username" placeholder="username" class=(INPUT);
                        input type="password" name="password" placeholder="password" class=(INPUT);
                        button type="submit" class=(BUTTON) { "Log in" }
                    }
                    a href="/register" class="block text-center mt-8" { "register instead" }
                }
            }
        }
    }
}

pub fn register_page(msg: Option<&str>) -> Markup {
    html! {
        (header("register"))
        body class="bg-zinc-800 text-[#f2f7f2]" {
            div class="flex flex-col w-screen h-screen" {
                div class="m-auto" {
                    (flash(msg))
                    h1 class="text-center" { "register" }
                    form action="/register" method="post" class="mt-4 flex flex-col" {
                        input type="text" name="username" placeholder="username" class=(INPUT);
                        input type="email" name="email" placeholder="email" class=(INPUT);
                        input type="password" name="password" placeholder="password" class=(INPUT);
                        button type="submit" class=(BUTTON) { "Register" }
                    }
                    a href="/login" class="block text-center mt-8" { "login instead" }
                }
            }
        }
    }
}

pub fn create_post_page(msg: Option<&str>) -> Markup {
    html! {
        (header("new post"))
        body class="bg-zinc-800 text-[#f2f7f2]" {
            div class="flex flex-col w-screen h-screen" {
                div class="m-auto w-1/2" {
                    (flash(msg))
                    form action="/create_post" method="post" enctype="multipart/form-data" class="flex flex-col" {
                        textarea name="content" rows="5" placeholder="what's happening?" class=(INPUT) {}
                        input type="file" name="media" accept="image/*,video/*" class="mb-4";
                        button type="submit" class=(BUTTON) { "Post" }
                    }
                    a href="/" class="block text-center mt-8" { "back to feed" }
                }
            }
        }
    }
}

pub fn flash_cookie(msg: &str, config: &Config) -> Cookie<'static> {
    Cookie::build(FLASH_COOKIE, msg.to_owned())
        .path("/")
        .secure(config.secure_cookies)
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
}

pub fn take_flash(req: &HttpRequest) -> Option<String> {
    req.cookie(FLASH_COOKIE)
        .map(|x| x.value().to_owned())
        .filter(|x| !x.is_empty())
}

pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .append_header((http::header::LOCATION, location))
        .finish()
}

pub fn redirect_with_flash(location: &str, msg: &str, config: &Config) -> HttpResponse {
    HttpResponse::Found()
        .append_header((http::header::LOCATION, location))
        .cookie(flash_cookie(msg, config))
        .finish()
}

/// Renders a page, consuming any pending flash message.
pub fn render(status: StatusCode, body: Markup, had_flash: bool) -> HttpResponse {
    let mut builder = HttpResponse::build(status);
    builder.content_type("text/html; charset=utf-8");

    if had_flash {
        let mut removal = Cookie::named(FLASH_COOKIE);
        removal.set_path("/");
        removal.make_removal();
        builder.cookie(removal);
    }

    builder.body(body.into_string())
}

#[get("/login")]
async fn login(req: HttpRequest, session: Option<Session>) -> impl Responder {
    if session.is_some() {
        return redirect("/");
    }

    let msg = take_flash(&req);

    render(StatusCode::OK, login_page(msg.as_deref()), msg.is_some())
}

#[get("/register")]
async fn register(req: HttpRequest, session: Option<Session>) -> impl Responder {
    if session.is_some() {
        return redirect("/");
    }

    let msg = take_flash(&req);

    render(StatusCode::OK, register_page(msg.as_deref()), msg.is_some())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(login).service(register);
}
