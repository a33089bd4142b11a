use http::StatusCode;
use spin_sdk::http::{Method, Request};
use url::Url;
use validator::Validate;

use crate::app::App;
use crate::core::db::DbError;
use crate::core::errors::ApiError;
use crate::core::query_params::{parse_form, parse_query_params};
use crate::core::reply::Reply;
use crate::models::forms::{FormErrors, LoginForm, RegistrationForm};
use crate::models::models::User;
use crate::session::RequestContext;
use crate::templates::{self, Layout, LoginView, RegisterView};

pub const LOGIN_MESSAGE: &str = "Please log in to access this page.";
const CSRF_MESSAGE: &str = "The CSRF token is missing or invalid.";

/// Accept `next` only when it is a path on this site: no scheme, no host.
pub fn safe_next_target(next: Option<&str>) -> Option<&str> {
    let next = next?.trim();
    if !next.starts_with('/') || next.starts_with("//") || next.starts_with("/\\") {
        return None;
    }
    if next.chars().any(char::is_control) {
        return None;
    }
    let base = Url::parse("http://localhost/").ok()?;
    let resolved = base.join(next).ok()?;
    (resolved.host_str() == Some("localhost") && resolved.port().is_none()).then_some(next)
}

/// Redirect an anonymous visitor to the login page, remembering where they were going.
pub fn login_redirect(ctx: &mut RequestContext, req: &Request) -> Reply {
    ctx.flash(LOGIN_MESSAGE);
    let uri = req.uri();
    let target = match uri.find('?') {
        Some(q) => format!("{}{}", req.path(), &uri[q..]),
        None => req.path().to_string(),
    };
    Reply::redirect(&format!("/login?next={}", urlencoding::encode(&target)))
}

pub(crate) fn check_csrf(ctx: &RequestContext, submitted: Option<&String>, errors: &mut FormErrors) {
    if !ctx.csrf_matches(submitted.map(String::as_str)) {
        errors.add("csrf_token", CSRF_MESSAGE);
    }
}

fn render_login(ctx: &mut RequestContext, form: &LoginForm, errors: &FormErrors) -> anyhow::Result<Reply> {
    let csrf_token = ctx.csrf_token();
    let flashes = ctx.take_flashes();
    let layout = Layout {
        title: "Sign In",
        user: None,
        flashes: &flashes,
    };
    let html = templates::render_login(
        &layout,
        &LoginView {
            username: &form.username,
            remember_me: form.remember_me,
            csrf_token: &csrf_token,
            errors,
        },
    )?;
    Ok(Reply::html(StatusCode::OK, html))
}

/// `GET|POST /login`
pub fn login(app: &App, ctx: &mut RequestContext, req: &Request) -> anyhow::Result<Reply> {
    if ctx.is_authenticated() {
        return Ok(Reply::redirect("/index"));
    }

    match req.method() {
        Method::Get => render_login(ctx, &LoginForm::default(), &FormErrors::default()),
        Method::Post => {
            let fields = parse_form(req.body());
            let form = LoginForm::from_fields(&fields);
            let mut errors = FormErrors::from_validation(form.validate());
            check_csrf(ctx, fields.get("csrf_token"), &mut errors);
            if !errors.is_empty() {
                return render_login(ctx, &form, &errors);
            }

            let user = app.db().user_by_username(&form.username)?;
            let user = match user {
                Some(user) if user.check_password(&form.password) => user,
                _ => {
                    tracing::info!(username = %form.username, "rejected login");
                    ctx.flash("Invalid username or password");
                    return Ok(Reply::redirect("/login"));
                }
            };

            tracing::info!(user_id = user.id, remember = form.remember_me, "user logged in");
            ctx.login(user, form.remember_me);

            let query = parse_query_params(req.uri());
            let next = safe_next_target(query.get("next").map(String::as_str)).unwrap_or("/index");
            Ok(Reply::redirect(next))
        }
        _ => Ok(ApiError::MethodNotAllowed.into()),
    }
}

/// `GET /logout`
pub fn logout(ctx: &mut RequestContext) -> anyhow::Result<Reply> {
    if let Some(user) = &ctx.user {
        tracing::info!(user_id = user.id, "user logged out");
    }
    ctx.logout();
    Ok(Reply::redirect("/index"))
}

fn render_registration(ctx: &mut RequestContext, form: &RegistrationForm, errors: &FormErrors) -> anyhow::Result<Reply> {
    let csrf_token = ctx.csrf_token();
    let flashes = ctx.take_flashes();
    let layout = Layout {
        title: "Register",
        user: None,
        flashes: &flashes,
    };
    let html = templates::render_register(
        &layout,
        &RegisterView {
            username: &form.username,
            email: &form.email,
            csrf_token: &csrf_token,
            errors,
        },
    )?;
    Ok(Reply::html(StatusCode::OK, html))
}

fn add_unique_error(errors: &mut FormErrors, field: &str) {
    match field {
        "email" => errors.add("email", "Please use a different email address."),
        _ => errors.add("username", "Please use a different username."),
    }
}

/// `GET|POST /registration`
pub fn registration(app: &App, ctx: &mut RequestContext, req: &Request) -> anyhow::Result<Reply> {
    if ctx.is_authenticated() {
        return Ok(Reply::redirect("/index"));
    }

    match req.method() {
        Method::Get => render_registration(ctx, &RegistrationForm::default(), &FormErrors::default()),
        Method::Post => {
            let fields = parse_form(req.body());
            let form = RegistrationForm::from_fields(&fields);
            let mut errors = FormErrors::from_validation(form.validate());
            check_csrf(ctx, fields.get("csrf_token"), &mut errors);

            let db = app.db();
            if errors.for_field("username").is_empty() && db.user_by_username(&form.username)?.is_some() {
                add_unique_error(&mut errors, "username");
            }
            if errors.for_field("email").is_empty() && db.user_by_email(&form.email)?.is_some() {
                add_unique_error(&mut errors, "email");
            }
            if !errors.is_empty() {
                return render_registration(ctx, &form, &errors);
            }

            let mut user = User::new(form.username.as_str(), form.email.as_str());
            user.set_password(&form.password)?;
            let user = match db.create_user(user) {
                Ok(user) => user,
                Err(DbError::UniqueViolation { field, .. }) => {
                    add_unique_error(&mut errors, field);
                    return render_registration(ctx, &form, &errors);
                }
                Err(e) => return Err(e.into()),
            };

            tracing::info!(user_id = user.id, username = %user.username, "user registered");
            ctx.flash("Congratulations, you are now a registered user!");
            Ok(Reply::redirect("/login"))
        }
        _ => Ok(ApiError::MethodNotAllowed.into()),
    }
}
