//! Presentation surfaces: one handler per page, each reading the mirror for
//! an immediate render, talking to the remote accessor, then writing back
//! through the mirror so sibling surfaces get notified.

use actix_web::{error, web, HttpResponse};
use futures_util::StreamExt;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;

use crate::bus::Bus;
use crate::catalog::{self, Category, DeleteOutcome};
use crate::mirror::Mirror;
use crate::model::{date_only, youtube_embed, CastMember, Movie, UserRecord};
use crate::remote::{RegisterPayload, Remote};

type Tera = web::Data<tera::Tera>;
type MirrorData = web::Data<Mirror>;
type RemoteData = web::Data<Remote>;

/// Per-process page settings shared by the handlers.
pub struct Settings {
    pub fetch_limit: u32,
}

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> error::Error {
    debug!("{:?}", err);
    error::ErrorInternalServerError(message)
}

fn render(tera: &tera::Tera, template: &str, ctx: &tera::Context) -> actix_web::Result<HttpResponse> {
    let body = tera
        .render(template, ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header(("location", location.to_owned()))
        .finish()
}

fn require_token(mirror: &Mirror) -> Option<HttpResponse> {
    if mirror.token().is_none() {
        Some(redirect("/"))
    } else {
        None
    }
}

/// Shared header state: user identity as every surface derives it.
fn base_context(mirror: &Mirror) -> tera::Context {
    let mut ctx = tera::Context::new();
    let user = mirror.read_user().unwrap_or_default();
    ctx.insert("display_name", &user.display_name());
    ctx.insert("initials", &user.initials());
    ctx.insert("avatar", &user.avatar);
    ctx.insert("signed_in", &mirror.token().is_some());
    ctx
}

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

fn email_ok(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// At least eight characters with a digit, a lowercase letter, an uppercase
/// letter, and a special character.
fn password_ok(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| c.is_lowercase())
        && password.chars().any(|c| c.is_uppercase())
        && password.chars().any(|c| !c.is_alphanumeric())
}

fn opt(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

// ---------------------------------------------------------------- login

#[derive(Deserialize)]
pub struct NoticeQuery {
    pub password_changed: Option<String>,
}

pub async fn login_page(
    tera: Tera,
    mirror: MirrorData,
    query: web::Query<NoticeQuery>,
) -> actix_web::Result<HttpResponse> {
    let mut ctx = base_context(&mirror);
    if query.password_changed.is_some() {
        ctx.insert(
            "notice",
            "Password changed successfully. Please sign in with your new password.",
        );
    }
    render(&tera, "login.html", &ctx)
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login_post(
    tera: Tera,
    mirror: MirrorData,
    remote: RemoteData,
    form: web::Form<LoginForm>,
) -> actix_web::Result<HttpResponse> {
    let email = form.email.trim();
    let mut ctx = base_context(&mirror);
    ctx.insert("email", email);

    if email.is_empty() || form.password.is_empty() {
        ctx.insert("error", "Please enter email and password.");
        return render(&tera, "login.html", &ctx);
    }
    if !email_ok(email) {
        ctx.insert("error", "Please enter a valid email address.");
        return render(&tera, "login.html", &ctx);
    }

    match remote.login(email, &form.password).await {
        Ok(session) => {
            match session.token {
                Some(token) => mirror.set_token(&token),
                None => log::warn!("login response carried no token"),
            }
            if let Some(user) = session.user {
                if let Some(id) = user.get("_id").and_then(Value::as_str) {
                    mirror.set_user_id(id);
                }
                mirror.write_user(&user);
            }
            Ok(redirect("/dashboard"))
        }
        Err(err) => {
            ctx.insert("error", &err.to_string());
            render(&tera, "login.html", &ctx)
        }
    }
}

// ------------------------------------------------------------- register

pub async fn register_page(tera: Tera, mirror: MirrorData) -> actix_web::Result<HttpResponse> {
    let ctx = base_context(&mirror);
    render(&tera, "register.html", &ctx)
}

#[derive(Deserialize, Default)]
pub struct RegisterForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub bio: String,
}

pub async fn register_post(
    tera: Tera,
    mirror: MirrorData,
    remote: RemoteData,
    form: web::Form<RegisterForm>,
) -> actix_web::Result<HttpResponse> {
    let mut ctx = base_context(&mirror);
    ctx.insert("name", form.name.trim());
    ctx.insert("email", form.email.trim());
    ctx.insert("phone", form.phone.trim());
    ctx.insert("date_of_birth", &form.date_of_birth);
    ctx.insert("bio", form.bio.trim());

    let error = if form.name.trim().is_empty()
        || form.email.trim().is_empty()
        || form.password.is_empty()
    {
        Some("Name, email and password are required.")
    } else if !email_ok(form.email.trim()) {
        Some("Please enter a valid email address.")
    } else if !password_ok(&form.password) {
        Some("Password does not meet the security requirements.")
    } else {
        None
    };
    if let Some(error) = error {
        ctx.insert("error", error);
        return render(&tera, "register.html", &ctx);
    }

    let payload = RegisterPayload {
        name: form.name.trim().to_owned(),
        email: form.email.trim().to_owned(),
        password: form.password.clone(),
        role: "user".to_owned(),
        phone: opt(&form.phone),
        date_of_birth: opt(&form.date_of_birth),
        bio: opt(&form.bio),
    };
    match remote.register(&payload).await {
        Ok(session) => {
            if let Some(token) = session.token {
                mirror.set_token(&token);
            }
            if let Some(user) = session.user {
                mirror.write_user(&user);
            }
            Ok(redirect("/dashboard"))
        }
        Err(err) => {
            ctx.insert("error", &err.to_string());
            render(&tera, "register.html", &ctx)
        }
    }
}

// ------------------------------------------------------------ dashboard

#[derive(Deserialize)]
pub struct DashboardQuery {
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub tab: String,
    pub alert: Option<String>,
}

pub async fn dashboard(
    tera: Tera,
    mirror: MirrorData,
    remote: RemoteData,
    settings: web::Data<Settings>,
    query: web::Query<DashboardQuery>,
) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }

    let category = Category::parse(&query.filter);
    let genre = opt(&query.genre);
    let mut fetched =
        catalog::fetch_filtered(&remote, category, genre.as_deref(), settings.fetch_limit).await;
    // expired token: try one refresh before surfacing the error
    if matches!(&fetched, Err(err) if err.is_unauthorized()) {
        match remote.refresh().await {
            Ok(Some(token)) => {
                mirror.set_token(&token);
                fetched =
                    catalog::fetch_filtered(&remote, category, genre.as_deref(), settings.fetch_limit)
                        .await;
            }
            Ok(None) => {}
            Err(err) => debug!("token refresh failed: {}", err),
        }
    }

    if query.tab == "profile" {
        match remote.get_profile().await {
            Ok(user) if user.is_object() => mirror.write_user(&user),
            Ok(_) => {}
            Err(err) => debug!("profile fetch failed: {}", err),
        }
    }

    let mut ctx = base_context(&mirror);
    let displayed = match fetched {
        Ok(list) => mirror.reconcile_from_remote(list),
        Err(err) => {
            // transient backend failure: keep rendering the mirrored list
            ctx.insert("error", &err.to_string());
            mirror.load_movies()
        }
    };
    let displayed = catalog::search(displayed, &query.q);

    ctx.insert("movies", &displayed);
    ctx.insert("genres", &catalog::available_genres(&mirror.load_movies()));
    ctx.insert("filter", &query.filter);
    ctx.insert("genre_filter", &query.genre);
    ctx.insert("q", &query.q);
    ctx.insert("tab", if query.tab == "profile" { "profile" } else { "dashboard" });
    if let Some(alert) = &query.alert {
        ctx.insert("alert", alert);
    }
    if let Some(user) = mirror.read_user() {
        ctx.insert("profile", &profile_context(&user));
    }
    render(&tera, "dashboard.html", &ctx)
}

fn profile_context(user: &UserRecord) -> Value {
    json!({
        "name": user.display_name(),
        "email": user.email.as_deref().unwrap_or("-"),
        "date_of_birth": user.date_of_birth.as_deref().map(date_only).unwrap_or("-"),
        "phone": user.phone_display(),
        "bio": user.bio.as_deref().unwrap_or("-"),
    })
}

// ------------------------------------------------------- add/edit movies

#[derive(Deserialize, Default)]
pub struct MovieForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub director: String,
    #[serde(default)]
    pub cast: String,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub poster_url: String,
    #[serde(default)]
    pub trailer_url: String,
}

impl MovieForm {
    fn validate(&self) -> Option<&'static str> {
        if self.title.trim().is_empty() || self.poster_url.trim().is_empty() {
            Some("Title and Poster URL are required.")
        } else {
            None
        }
    }

    fn to_movie(&self, id: Option<String>) -> Movie {
        Movie {
            id,
            title: self.title.trim().to_owned(),
            description: opt(&self.description),
            genre: crate::model::split_tags(&self.genre),
            director: opt(&self.director),
            cast: parse_cast(&self.cast),
            rating: self.rating.trim().parse().ok(),
            duration: self.duration.trim().parse().ok(),
            release_date: opt(&self.release_date),
            language: opt(&self.language),
            country: opt(&self.country),
            poster_url: self.poster_url.trim().to_owned(),
            trailer_url: opt(&self.trailer_url),
        }
    }

    fn context(&self) -> Value {
        json!({
            "title": self.title,
            "description": self.description,
            "genre": self.genre,
            "director": self.director,
            "cast": self.cast,
            "rating": self.rating,
            "duration": self.duration,
            "release_date": self.release_date,
            "language": self.language,
            "country": self.country,
            "poster_url": self.poster_url,
            "trailer_url": self.trailer_url,
        })
    }
}

/// One cast entry per line, `Actor | Role`; either side may be blank but not
/// both.
fn parse_cast(raw: &str) -> Vec<CastMember> {
    raw.lines()
        .map(|line| {
            let (name, role) = match line.split_once('|') {
                Some((name, role)) => (name, role),
                None => (line, ""),
            };
            CastMember {
                name: name.trim().to_owned(),
                role: role.trim().to_owned(),
            }
        })
        .filter(|member| !member.is_blank())
        .collect()
}

fn cast_lines(cast: &[CastMember]) -> String {
    cast.iter()
        .map(|member| {
            if member.role.is_empty() {
                member.name.clone()
            } else {
                format!("{} | {}", member.name, member.role)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn movie_form_context(movie: &Movie) -> Value {
    json!({
        "title": movie.title,
        "description": movie.description.as_deref().unwrap_or(""),
        "genre": movie.genre.join(", "),
        "director": movie.director.as_deref().unwrap_or(""),
        "cast": cast_lines(&movie.cast),
        "rating": movie.rating.map(|r| r.to_string()).unwrap_or_default(),
        "duration": movie.duration.map(|d| d.to_string()).unwrap_or_default(),
        "release_date": movie.release_date.as_deref().map(date_only).unwrap_or(""),
        "language": movie.language.as_deref().unwrap_or(""),
        "country": movie.country.as_deref().unwrap_or(""),
        "poster_url": movie.poster_url,
        "trailer_url": movie.trailer_url.as_deref().unwrap_or(""),
    })
}

pub async fn add_page(tera: Tera, mirror: MirrorData) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let mut ctx = base_context(&mirror);
    ctx.insert("heading", "Add movie");
    ctx.insert("action", "/dashboard/add");
    ctx.insert("form", &MovieForm::default().context());
    render(&tera, "movie_form.html", &ctx)
}

pub async fn add_post(
    tera: Tera,
    mirror: MirrorData,
    remote: RemoteData,
    form: web::Form<MovieForm>,
) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let mut ctx = base_context(&mirror);
    ctx.insert("heading", "Add movie");
    ctx.insert("action", "/dashboard/add");
    ctx.insert("form", &form.context());

    if let Some(error) = form.validate() {
        ctx.insert("error", error);
        return render(&tera, "movie_form.html", &ctx);
    }
    match remote.create_movie(&form.to_movie(None)).await {
        Ok(created) => {
            mirror.upsert(created);
            Ok(redirect("/dashboard"))
        }
        Err(err) if err.is_unauthorized() => {
            ctx.insert("alert", "Can't add");
            ctx.insert("error", "Not authorized to add this movie.");
            render(&tera, "movie_form.html", &ctx)
        }
        Err(err) => {
            ctx.insert("error", &err.to_string());
            render(&tera, "movie_form.html", &ctx)
        }
    }
}

pub async fn edit_page(
    tera: Tera,
    mirror: MirrorData,
    remote: RemoteData,
    path: web::Path<String>,
) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let id = path.into_inner();
    let mut ctx = base_context(&mirror);
    ctx.insert("heading", "Edit movie");
    ctx.insert("action", &format!("/edit/{}", id));
    match remote.get_movie(&id).await {
        Ok(movie) => ctx.insert("form", &movie_form_context(&movie)),
        Err(err) => {
            ctx.insert("form", &MovieForm::default().context());
            ctx.insert("error", &err.to_string());
        }
    }
    render(&tera, "movie_form.html", &ctx)
}

pub async fn edit_post(
    tera: Tera,
    mirror: MirrorData,
    remote: RemoteData,
    path: web::Path<String>,
    form: web::Form<MovieForm>,
) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let id = path.into_inner();
    let mut ctx = base_context(&mirror);
    ctx.insert("heading", "Edit movie");
    ctx.insert("action", &format!("/edit/{}", id));
    ctx.insert("form", &form.context());

    if let Some(error) = form.validate() {
        ctx.insert("error", error);
        return render(&tera, "movie_form.html", &ctx);
    }
    match remote.update_movie(&id, &form.to_movie(Some(id.clone()))).await {
        Ok(updated) => {
            mirror.upsert(updated);
            Ok(redirect("/dashboard"))
        }
        Err(err) if err.is_unauthorized() => {
            ctx.insert("alert", "Can't edit");
            ctx.insert("error", "Not authorized to edit this movie.");
            render(&tera, "movie_form.html", &ctx)
        }
        Err(err) => {
            ctx.insert("error", &err.to_string());
            render(&tera, "movie_form.html", &ctx)
        }
    }
}

// --------------------------------------------------------------- detail

pub async fn detail(
    tera: Tera,
    mirror: MirrorData,
    remote: RemoteData,
    path: web::Path<String>,
) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let id = path.into_inner();
    let mut ctx = base_context(&mirror);
    match remote.get_movie(&id).await {
        Ok(movie) => {
            ctx.insert(
                "embed",
                &movie.trailer_url.as_deref().and_then(youtube_embed),
            );
            ctx.insert("genre_display", &movie.genre.join(", "));
            ctx.insert(
                "release",
                &movie.release_date.as_deref().map(date_only),
            );
            ctx.insert("movie", &movie);
        }
        Err(err) => {
            debug!("failed to load movie {}: {}", id, err);
            ctx.insert("not_found", &true);
        }
    }
    render(&tera, "detail.html", &ctx)
}

pub async fn delete_post(
    mirror: MirrorData,
    remote: RemoteData,
    path: web::Path<String>,
) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let id = path.into_inner();
    match catalog::delete_flow(&remote, &mirror, &id).await {
        DeleteOutcome::Blocked => Ok(redirect("/dashboard?alert=delete")),
        DeleteOutcome::Deleted | DeleteOutcome::RemovedLocally => Ok(redirect("/dashboard")),
    }
}

// -------------------------------------------------------------- profile

pub async fn update_page(tera: Tera, mirror: MirrorData) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let mut ctx = base_context(&mirror);
    let user = mirror.read_user().unwrap_or_default();
    // prefer the server name split into first/last
    let (first, last) = match user.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => {
            let mut words = name.split_whitespace();
            let first = words.next().unwrap_or("").to_owned();
            let last = words.collect::<Vec<_>>().join(" ");
            (first, last)
        }
        None => (
            user.first_name.clone().unwrap_or_default(),
            user.last_name.clone().unwrap_or_default(),
        ),
    };
    ctx.insert("first_name", &first);
    ctx.insert("last_name", &last);
    ctx.insert("email", user.email.as_deref().unwrap_or(""));
    ctx.insert(
        "date_of_birth",
        user.date_of_birth.as_deref().map(date_only).unwrap_or(""),
    );
    ctx.insert("phone", user.phone.as_deref().unwrap_or(""));
    ctx.insert("bio", user.bio.as_deref().unwrap_or(""));
    render(&tera, "profile_form.html", &ctx)
}

#[derive(Deserialize, Default)]
pub struct ProfileForm {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar: String,
    pub remove_avatar: Option<String>,
}

pub async fn update_post(
    tera: Tera,
    mirror: MirrorData,
    remote: RemoteData,
    form: web::Form<ProfileForm>,
) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let mut ctx = base_context(&mirror);
    ctx.insert("first_name", form.first_name.trim());
    ctx.insert("last_name", form.last_name.trim());
    ctx.insert("email", form.email.trim());
    ctx.insert("date_of_birth", &form.date_of_birth);
    ctx.insert("phone", form.phone.trim());
    ctx.insert("bio", form.bio.trim());

    if form.first_name.trim().is_empty() && form.last_name.trim().is_empty() {
        ctx.insert("error", "Please provide a name.");
        return render(&tera, "profile_form.html", &ctx);
    }

    let name = format!("{} {}", form.first_name.trim(), form.last_name.trim())
        .trim()
        .to_owned();
    let mut payload = serde_json::Map::new();
    payload.insert("name".to_owned(), json!(name));
    payload.insert("email".to_owned(), json!(form.email.trim()));
    if let Some(phone) = opt(&form.phone) {
        payload.insert("phone".to_owned(), json!(phone));
    }
    if let Some(dob) = opt(&form.date_of_birth) {
        payload.insert("dateOfBirth".to_owned(), json!(format!("{}T00:00:00.000Z", dob)));
    }
    if let Some(bio) = opt(&form.bio) {
        payload.insert("bio".to_owned(), json!(bio));
    }
    if form.remove_avatar.is_some() {
        payload.insert("avatar".to_owned(), Value::Null);
    } else if let Some(avatar) = opt(&form.avatar) {
        payload.insert("avatar".to_owned(), json!(avatar));
    }
    let payload = Value::Object(payload);

    match remote.update_profile(&payload).await {
        Ok(updated) => {
            let record = if updated.is_null() { payload } else { updated };
            mirror.write_user(&record);
            Ok(redirect("/dashboard?tab=profile"))
        }
        Err(err) => {
            ctx.insert("error", &err.to_string());
            render(&tera, "profile_form.html", &ctx)
        }
    }
}

// ------------------------------------------------------ password change

pub async fn password_page(tera: Tera, mirror: MirrorData) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let ctx = base_context(&mirror);
    render(&tera, "password.html", &ctx)
}

#[derive(Deserialize, Default)]
pub struct PasswordForm {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

impl PasswordForm {
    fn validate(&self) -> Option<&'static str> {
        if self.current_password.is_empty() {
            Some("Please enter your current password.")
        } else if self.new_password.is_empty() {
            Some("Please enter a new password.")
        } else if self.new_password.chars().count() < 8 {
            Some("New password must be at least 8 characters.")
        } else if self.new_password != self.confirm_password {
            Some("New password and confirm password do not match.")
        } else {
            None
        }
    }
}

pub async fn password_post(
    tera: Tera,
    mirror: MirrorData,
    remote: RemoteData,
    form: web::Form<PasswordForm>,
) -> actix_web::Result<HttpResponse> {
    if let Some(to_login) = require_token(&mirror) {
        return Ok(to_login);
    }
    let mut ctx = base_context(&mirror);
    if let Some(error) = form.validate() {
        ctx.insert("error", error);
        return render(&tera, "password.html", &ctx);
    }
    match remote
        .change_password(&form.current_password, &form.new_password)
        .await
    {
        Ok(()) => {
            // force re-authentication with the new password
            mirror.clear_token();
            Ok(redirect("/?password_changed=1"))
        }
        Err(err) => {
            ctx.insert("error", &err.to_string());
            render(&tera, "password.html", &ctx)
        }
    }
}

// --------------------------------------------------------------- logout

pub async fn logout_post(mirror: MirrorData) -> actix_web::Result<HttpResponse> {
    mirror.logout();
    Ok(redirect("/"))
}

// --------------------------------------------------------------- events

/// Server-sent change notifications; mounted pages re-read their mirror by
/// reloading on receipt.
pub async fn events(bus: web::Data<Bus>) -> HttpResponse {
    let stream = BroadcastStream::new(bus.subscribe()).filter_map(|item| async move {
        item.ok().map(|change| {
            Ok::<_, std::convert::Infallible>(web::Bytes::from(format!(
                "data: {}\n\n",
                change.kind()
            )))
        })
    });
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("cache-control", "no-cache"))
        .streaming(stream)
}
