use http::StatusCode;
use spin_sdk::http::{Method, Request};
use validator::Validate;

use crate::app::App;
use crate::auth::{check_csrf, login_redirect};
use crate::avatars;
use crate::core::db::DbError;
use crate::core::errors::ApiError;
use crate::core::multipart;
use crate::core::query_params::parse_form;
use crate::core::reply::Reply;
use crate::models::forms::{EditProfileForm, FormErrors};
use crate::models::models::User;
use crate::session::RequestContext;
use crate::templates::{self, EditProfileView, Layout, PostView, ProfileView};

const USERNAME_TAKEN: &str = "Please use a different username.";

/// `GET /user/<username>`
pub fn user_profile(app: &App, ctx: &mut RequestContext, username: &str) -> anyhow::Result<Reply> {
    let profile = match app.db().user_by_username(username)? {
        Some(user) => user,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let posts: Vec<PostView> = ["Test post #1", "Test post #2"]
        .iter()
        .map(|body| PostView {
            author: profile.username.clone(),
            author_url: Some(profile.profile_url()),
            avatar_url: Some(profile.avatar_url(36)),
            body: body.to_string(),
        })
        .collect();

    let flashes = ctx.take_flashes();
    let is_self = ctx.user.as_ref().map(|u| u.id) == Some(profile.id);
    let layout = Layout {
        title: "",
        user: ctx.user.as_ref(),
        flashes: &flashes,
    };
    let html = templates::render_user(
        &layout,
        &ProfileView {
            profile: &profile,
            is_self,
            posts: &posts,
        },
    )?;
    Ok(Reply::html(StatusCode::OK, html))
}

fn render_edit_profile(
    ctx: &mut RequestContext,
    form: &EditProfileForm,
    errors: &FormErrors,
) -> anyhow::Result<Reply> {
    let csrf_token = ctx.csrf_token();
    let flashes = ctx.take_flashes();
    let layout = Layout {
        title: "Edit Profile",
        user: ctx.user.as_ref(),
        flashes: &flashes,
    };
    let html = templates::render_edit_profile(
        &layout,
        &EditProfileView {
            username: &form.username,
            about_me: &form.about_me,
            csrf_token: &csrf_token,
            errors,
        },
    )?;
    Ok(Reply::html(StatusCode::OK, html))
}

/// `GET|POST /edit_profile`
pub fn edit_profile(app: &App, ctx: &mut RequestContext, req: &Request) -> anyhow::Result<Reply> {
    let user = match ctx.user.clone() {
        Some(user) => user,
        None => return Ok(login_redirect(ctx, req)),
    };

    match req.method() {
        Method::Get => {
            let form = EditProfileForm {
                username: user.username.clone(),
                about_me: user.about_me.clone().unwrap_or_default(),
            };
            render_edit_profile(ctx, &form, &FormErrors::default())
        }
        Method::Post => {
            let content_type = req
                .header("content-type")
                .and_then(|h| h.as_str())
                .unwrap_or_default();
            let (fields, upload) = if multipart::is_multipart(content_type) {
                let parsed = match multipart::parse(req.body(), content_type) {
                    Ok(parsed) => parsed,
                    Err(e) => return Ok(ApiError::BadRequest(e.to_string()).into()),
                };
                let upload = parsed.file("profile_picture").map(|f| f.data.clone());
                (parsed.fields, upload)
            } else {
                (parse_form(req.body()), None)
            };

            let form = EditProfileForm::from_fields(&fields);
            let mut errors = FormErrors::from_validation(form.validate());
            check_csrf(ctx, fields.get("csrf_token"), &mut errors);
            if errors.for_field("username").is_empty()
                && form.username != user.username
                && app.db().user_by_username(&form.username)?.is_some()
            {
                errors.add("username", USERNAME_TAKEN);
            }
            if !errors.is_empty() {
                return render_edit_profile(ctx, &form, &errors);
            }

            let mut updated = apply_form(&user, &form);
            let avatar = match upload.map(|data| avatars::prepare_upload(app, user.id, &data)) {
                Some(Ok(avatar)) => {
                    updated.profile_picture = Some(avatar.filename.clone());
                    Some(avatar)
                }
                Some(Err(e)) => {
                    tracing::error!(user_id = user.id, error = %e, "avatar upload rejected");
                    ctx.flash(format!("Error: {}", e));
                    return Ok(Reply::redirect("/edit_profile"));
                }
                None => None,
            };

            match app.db().save_user(&updated) {
                Ok(()) => {}
                Err(DbError::UniqueViolation { .. }) => {
                    errors.add("username", USERNAME_TAKEN);
                    return render_edit_profile(ctx, &form, &errors);
                }
                Err(e) => return Err(e.into()),
            }

            // The record already names this file; until it exists the default avatar is served.
            if let Some(avatar) = &avatar {
                if let Err(e) = avatars::store_upload(app, avatar) {
                    tracing::error!(user_id = user.id, error = %e, "avatar store failed");
                    ctx.user = Some(updated);
                    ctx.flash(format!("Error: {}", e));
                    return Ok(Reply::redirect("/edit_profile"));
                }
            }

            tracing::info!(user_id = updated.id, "profile updated");
            ctx.user = Some(updated);
            ctx.flash("Your changes have been saved.");
            Ok(Reply::redirect("/edit_profile"))
        }
        _ => Ok(ApiError::MethodNotAllowed.into()),
    }
}

fn apply_form(user: &User, form: &EditProfileForm) -> User {
    let mut updated = user.clone();
    updated.username = form.username.clone();
    updated.about_me = Some(form.about_me.clone()).filter(|s| !s.is_empty());
    updated
}
