use html_escape::{encode_double_quoted_attribute, encode_text};
use http::StatusCode;
use regex::{Captures, Regex};
use rust_embed::RustEmbed;
use std::sync::OnceLock;

use crate::core::helpers::format_timestamp;
use crate::models::forms::FormErrors;
use crate::models::models::User;

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{\s*([a-z0-9_]+)\s*\}\}").expect("Regex should compile"))
}

fn load(name: &str) -> anyhow::Result<String> {
    let file = Templates::get(name).ok_or_else(|| anyhow::anyhow!("template {} not found", name))?;
    Ok(String::from_utf8(file.data.to_vec())?)
}

/// Substitute `{{ key }}` placeholders in a single pass. Substituted text is
/// never rescanned; unknown keys render empty.
pub fn fill(template: &str, values: &[(&str, String)]) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(key, _)| *key == &caps[1])
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        })
        .into_owned()
}

fn text(value: &str) -> String {
    encode_text(value).into_owned()
}

fn attr(value: &str) -> String {
    encode_double_quoted_attribute(value).into_owned()
}

/// Page chrome shared by every rendered page.
pub struct Layout<'a> {
    pub title: &'a str,
    pub user: Option<&'a User>,
    pub flashes: &'a [String],
}

fn nav(user: Option<&User>) -> String {
    match user {
        Some(user) => format!(
            r#"<a href="/index">Home</a> <a href="{}">Profile</a> <a href="/logout">Logout</a>"#,
            attr(&user.profile_url())
        ),
        None => r#"<a href="/index">Home</a> <a href="/login">Login</a>"#.to_string(),
    }
}

fn flashes(messages: &[String]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let items: String = messages
        .iter()
        .map(|m| format!("<li>{}</li>", text(m)))
        .collect();
    format!(r#"<ul class="flashes">{}</ul>"#, items)
}

fn field_errors(errors: &FormErrors, field: &str) -> String {
    errors
        .for_field(field)
        .iter()
        .map(|m| format!(r#"<span class="error">[{}]</span>"#, text(m)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn page(layout: &Layout, content: String) -> anyhow::Result<String> {
    let title = if layout.title.is_empty() {
        "Welcome to Microblog".to_string()
    } else {
        format!("{} - Microblog", layout.title)
    };
    Ok(fill(
        &load("base.html")?,
        &[
            ("title", text(&title)),
            ("nav", nav(layout.user)),
            ("flashes", flashes(layout.flashes)),
            ("content", content),
        ],
    ))
}

/// A post as shown in a listing. Placeholder posts have no stored author.
pub struct PostView {
    pub author: String,
    pub author_url: Option<String>,
    pub avatar_url: Option<String>,
    pub body: String,
}

fn posts(views: &[PostView]) -> String {
    views
        .iter()
        .map(|post| {
            let avatar = post
                .avatar_url
                .as_deref()
                .map(|url| format!(r#"<img src="{}" alt="">"#, attr(url)))
                .unwrap_or_default();
            let author = match &post.author_url {
                Some(url) => format!(r#"<a href="{}">{}</a>"#, attr(url), text(&post.author)),
                None => text(&post.author),
            };
            format!(
                r#"<table class="post"><tr valign="top"><td width="36px">{}</td><td>{} says:<br>{}</td></tr></table>"#,
                avatar,
                author,
                text(&post.body)
            )
        })
        .collect()
}

pub fn render_index(layout: &Layout, post_views: &[PostView]) -> anyhow::Result<String> {
    let username = layout.user.map(|u| u.username.as_str()).unwrap_or_default();
    let content = fill(
        &load("index.html")?,
        &[("username", text(username)), ("posts", posts(post_views))],
    );
    page(layout, content)
}

pub struct LoginView<'a> {
    pub username: &'a str,
    pub remember_me: bool,
    pub csrf_token: &'a str,
    pub errors: &'a FormErrors,
}

pub fn render_login(layout: &Layout, view: &LoginView) -> anyhow::Result<String> {
    let content = fill(
        &load("login.html")?,
        &[
            ("csrf_token", attr(view.csrf_token)),
            ("form_errors", field_errors(view.errors, "csrf_token")),
            ("username", attr(view.username)),
            ("username_errors", field_errors(view.errors, "username")),
            ("password_errors", field_errors(view.errors, "password")),
            (
                "remember_checked",
                if view.remember_me { " checked".to_string() } else { String::new() },
            ),
        ],
    );
    page(layout, content)
}

pub struct RegisterView<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub csrf_token: &'a str,
    pub errors: &'a FormErrors,
}

pub fn render_register(layout: &Layout, view: &RegisterView) -> anyhow::Result<String> {
    let content = fill(
        &load("register.html")?,
        &[
            ("csrf_token", attr(view.csrf_token)),
            ("form_errors", field_errors(view.errors, "csrf_token")),
            ("username", attr(view.username)),
            ("username_errors", field_errors(view.errors, "username")),
            ("email", attr(view.email)),
            ("email_errors", field_errors(view.errors, "email")),
            ("password_errors", field_errors(view.errors, "password")),
            ("password2_errors", field_errors(view.errors, "password2")),
        ],
    );
    page(layout, content)
}

pub struct ProfileView<'a> {
    pub profile: &'a User,
    pub is_self: bool,
    pub posts: &'a [PostView],
}

pub fn render_user(layout: &Layout, view: &ProfileView) -> anyhow::Result<String> {
    let profile = view.profile;
    let about_me = profile
        .about_me
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| format!("<p>{}</p>", text(s)))
        .unwrap_or_default();
    let last_seen = format!("<p>Last seen on: {}</p>", text(&format_timestamp(&profile.last_seen)));
    let actions = if view.is_self {
        r#"<p><a href="/edit_profile">Edit your profile</a></p>"#.to_string()
    } else {
        String::new()
    };
    let content = fill(
        &load("user.html")?,
        &[
            ("avatar_url", attr(&profile.avatar_url(128))),
            ("username", text(&profile.username)),
            ("about_me", about_me),
            ("last_seen", last_seen),
            ("actions", actions),
            ("posts", posts(view.posts)),
        ],
    );
    page(layout, content)
}

pub struct EditProfileView<'a> {
    pub username: &'a str,
    pub about_me: &'a str,
    pub csrf_token: &'a str,
    pub errors: &'a FormErrors,
}

pub fn render_edit_profile(layout: &Layout, view: &EditProfileView) -> anyhow::Result<String> {
    let content = fill(
        &load("edit_profile.html")?,
        &[
            ("csrf_token", attr(view.csrf_token)),
            ("form_errors", field_errors(view.errors, "csrf_token")),
            ("username", attr(view.username)),
            ("username_errors", field_errors(view.errors, "username")),
            ("about_me", text(view.about_me)),
            ("about_me_errors", field_errors(view.errors, "about_me")),
        ],
    );
    page(layout, content)
}

/// Error pages render without session state and must not fail.
pub fn render_error(status: StatusCode, message: &str) -> String {
    let heading = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    let layout = Layout {
        title: status.canonical_reason().unwrap_or("Error"),
        user: None,
        flashes: &[],
    };
    load("error.html")
        .map(|tpl| fill(&tpl, &[("status", text(&heading)), ("message", text(message))]))
        .and_then(|content| page(&layout, content))
        .unwrap_or_else(|_| format!("<h1>{}</h1><p>{}</p>", text(&heading), text(message)))
}
