use chrono::Utc;
use spin_sdk::http::{Method, Request};

use crate::app::App;
use crate::auth;
use crate::avatars;
use crate::core::errors::ApiError;
use crate::core::reply::Reply;
use crate::posts;
use crate::session::RequestContext;
use crate::static_server;
use crate::users;

#[derive(Debug, PartialEq)]
enum Route {
    Index,
    Login,
    Logout,
    Registration,
    EditProfile,
    User(String),
    Avatar(String, String),
}

impl Route {
    fn parse(path: &str) -> Option<Self> {
        match path {
            "/" | "/index" => return Some(Route::Index),
            "/login" => return Some(Route::Login),
            "/logout" => return Some(Route::Logout),
            "/registration" => return Some(Route::Registration),
            "/edit_profile" => return Some(Route::EditProfile),
            _ => {}
        }

        let segments: Vec<&str> = path.strip_prefix('/')?.split('/').collect();
        match segments.as_slice() {
            ["user", name] if !name.is_empty() => Some(Route::User(decode_segment(name)?)),
            ["user", name, "avatar", size] if !name.is_empty() => {
                Some(Route::Avatar(decode_segment(name)?, size.to_string()))
            }
            _ => None,
        }
    }

    fn allows(&self, method: &Method) -> bool {
        match self {
            Route::Login | Route::Registration | Route::EditProfile => {
                matches!(method, Method::Get | Method::Post)
            }
            _ => matches!(method, Method::Get),
        }
    }

    /// Routes that need a logged-in user.
    fn is_protected(&self) -> bool {
        matches!(
            self,
            Route::Index | Route::EditProfile | Route::User(_) | Route::Avatar(..)
        )
    }
}

fn decode_segment(segment: &str) -> Option<String> {
    urlencoding::decode(segment).ok().map(|s| s.into_owned())
}

/// Entry point shared by the Spin component and the native server.
pub fn handle(app: &App, req: &Request) -> Reply {
    let reply = match dispatch(app, req) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(method = %req.method(), path = %req.path(), error = ?e, "request failed");
            ApiError::from(e).into()
        }
    };
    tracing::debug!(
        method = %req.method(),
        path = %req.path(),
        status = reply.status.as_u16(),
        "request handled"
    );
    reply
}

fn dispatch(app: &App, req: &Request) -> anyhow::Result<Reply> {
    // Assets need no session.
    if req.path().starts_with("/static/") {
        if !matches!(req.method(), Method::Get) {
            return Ok(ApiError::MethodNotAllowed.into());
        }
        return static_server::serve_static(req.path());
    }

    let route = match Route::parse(req.path()) {
        Some(route) => route,
        None => return Ok(ApiError::NotFound("Page not found".to_string()).into()),
    };
    if !route.allows(req.method()) {
        return Ok(ApiError::MethodNotAllowed.into());
    }

    let mut ctx = RequestContext::load(app, req)?;

    if let Some(user) = ctx.user.as_mut() {
        user.last_seen = Utc::now();
        app.db().save_user(user)?;
    }

    let reply = if route.is_protected() && !ctx.is_authenticated() {
        auth::login_redirect(&mut ctx, req)
    } else {
        match route {
            Route::Index => posts::index(&mut ctx)?,
            Route::Login => auth::login(app, &mut ctx, req)?,
            Route::Logout => auth::logout(&mut ctx)?,
            Route::Registration => auth::registration(app, &mut ctx, req)?,
            Route::EditProfile => users::edit_profile(app, &mut ctx, req)?,
            Route::User(name) => users::user_profile(app, &mut ctx, &name)?,
            Route::Avatar(name, size) => avatars::serve_avatar(app, &name, &size)?,
        }
    };

    ctx.finish(app, reply)
}
