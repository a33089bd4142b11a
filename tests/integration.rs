use chrono::{DateTime, Duration, Utc};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use microblog::config::{session_key, Settings, SESSION_INDEX_KEY};
use microblog::core::reply::Reply;
use microblog::core::store::{KvStoreExt, MemoryStore};
use microblog::App;
use regex::Regex;
use spin_sdk::http::{Method, Request};
use std::collections::BTreeMap;
use std::io::Cursor;

const BOUNDARY: &str = "----microblogtestboundary";

/// In-process browser: one app, one cookie jar.
struct Client {
    app: App,
    session: Option<String>,
}

impl Client {
    fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    fn with_settings(settings: Settings) -> Self {
        let app = App::new(MemoryStore::new(), settings);
        app.migrate().unwrap();
        Self { app, session: None }
    }

    /// A second browser against the same app.
    fn fork(&self) -> Browser<'_> {
        Browser {
            app: &self.app,
            session: None,
        }
    }

    fn browser(&mut self) -> Browser<'_> {
        Browser {
            app: &self.app,
            session: self.session.take(),
        }
    }

    fn send(&mut self, method: Method, uri: &str, content_type: Option<&str>, body: Vec<u8>) -> Reply {
        let mut browser = self.browser();
        let reply = browser.send(method, uri, content_type, body);
        self.session = browser.session;
        reply
    }

    fn get(&mut self, uri: &str) -> Reply {
        self.send(Method::Get, uri, None, Vec::new())
    }

    fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Reply {
        self.send(
            Method::Post,
            uri,
            Some("application/x-www-form-urlencoded"),
            encode_form(fields),
        )
    }

    fn csrf(&mut self, uri: &str) -> String {
        let reply = self.get(uri);
        assert_eq!(reply.status.as_u16(), 200, "GET {}", uri);
        csrf_from(&reply)
    }

    fn register(&mut self, username: &str, email: &str, password: &str) -> Reply {
        let token = self.csrf("/registration");
        self.post_form(
            "/registration",
            &[
                ("csrf_token", &token),
                ("username", username),
                ("email", email),
                ("password", password),
                ("password2", password),
            ],
        )
    }

    fn login(&mut self, username: &str, password: &str) -> Reply {
        let token = self.csrf("/login");
        self.post_form(
            "/login",
            &[("csrf_token", &token), ("username", username), ("password", password)],
        )
    }

    fn signed_up(username: &str) -> Self {
        Self::signed_up_with(username, Settings::default())
    }

    fn signed_up_with(username: &str, settings: Settings) -> Self {
        let mut client = Self::with_settings(settings);
        let reply = client.register(username, &format!("{}@example.com", username), "secret");
        assert_eq!(reply.location(), Some("/login"));
        let reply = client.login(username, "secret");
        assert_eq!(reply.location(), Some("/index"));
        client
    }
}

struct Browser<'a> {
    app: &'a App,
    session: Option<String>,
}

impl Browser<'_> {
    fn send(&mut self, method: Method, uri: &str, content_type: Option<&str>, body: Vec<u8>) -> Reply {
        let mut builder = Request::builder();
        builder.method(method).uri(uri);
        if let Some(id) = &self.session {
            builder.header("cookie", format!("session={}", id));
        }
        if let Some(content_type) = content_type {
            builder.header("content-type", content_type);
        }
        let reply = self.app.handle(&builder.body(body).build());
        if let Some(set_cookie) = reply.header("set-cookie") {
            let cookie = cookie::Cookie::parse(set_cookie.to_string()).unwrap();
            assert_eq!(cookie.name(), "session");
            self.session = Some(cookie.value().to_string());
        }
        reply
    }

    fn get(&mut self, uri: &str) -> Reply {
        self.send(Method::Get, uri, None, Vec::new())
    }
}

fn encode_form(fields: &[(&str, &str)]) -> Vec<u8> {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
        .into_bytes()
}

fn csrf_from(reply: &Reply) -> String {
    let re = Regex::new(r#"name="csrf_token" value="([^"]*)""#).unwrap();
    re.captures(&reply.body_text())
        .map(|c| c[1].to_string())
        .expect("page should carry a csrf token")
}

fn png_of(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([20, 120, 220])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"profile_picture\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn post_profile(client: &mut Client, username: &str, about_me: &str, file: Option<(&str, &[u8])>) -> Reply {
    let token = client.csrf("/edit_profile");
    let body = multipart_body(
        &[("csrf_token", &token), ("username", username), ("about_me", about_me)],
        file,
    );
    client.send(
        Method::Post,
        "/edit_profile",
        Some(&format!("multipart/form-data; boundary={}", BOUNDARY)),
        body,
    )
}

#[test]
fn register_login_and_see_home_page() {
    let mut client = Client::new();
    let reply = client.register("susan", "susan@example.com", "cat");
    assert_eq!(reply.status.as_u16(), 302);
    assert_eq!(reply.location(), Some("/login"));

    let page = client.get("/login");
    assert!(page.body_text().contains("Congratulations, you are now a registered user!"));

    let reply = client.login("susan", "cat");
    assert_eq!(reply.location(), Some("/index"));

    let home = client.get("/index");
    assert_eq!(home.status.as_u16(), 200);
    let body = home.body_text();
    assert!(body.contains("Hi, susan!"));
    assert!(body.contains("Beautiful day in Portland!"));
    assert!(body.contains("<title>Home - Microblog</title>"));
    assert!(body.contains(r#"href="/logout""#));

    let user = client.app.db().user_by_username("susan").unwrap().unwrap();
    assert!(user.check_password("cat"));
    assert_eq!(user.profile_picture.as_deref(), Some("default.png"));
}

#[test]
fn duplicate_username_and_email_are_rejected() {
    let mut client = Client::new();
    client.register("john", "john@example.com", "pw");

    let reply = client.register("john", "someone@example.com", "pw");
    assert_eq!(reply.status.as_u16(), 200);
    assert!(reply.body_text().contains("Please use a different username."));

    let reply = client.register("johnny", "john@example.com", "pw");
    assert_eq!(reply.status.as_u16(), 200);
    assert!(reply.body_text().contains("Please use a different email address."));

    assert_eq!(client.app.db().user_ids().unwrap().len(), 1);
}

#[test]
fn registration_validates_fields() {
    let mut client = Client::new();
    let token = client.csrf("/registration");
    let reply = client.post_form(
        "/registration",
        &[
            ("csrf_token", &token),
            ("username", ""),
            ("email", "nope"),
            ("password", "a"),
            ("password2", "b"),
        ],
    );
    assert_eq!(reply.status.as_u16(), 200);
    let body = reply.body_text();
    assert!(body.contains("Username must be between 1 and 64 characters long."));
    assert!(body.contains("Invalid email address."));
    assert!(body.contains("Field must be equal to password."));
    assert!(client.app.db().user_ids().unwrap().is_empty());
}

#[test]
fn wrong_password_flashes_and_redirects() {
    let mut client = Client::new();
    client.register("john", "john@example.com", "right");

    let reply = client.login("john", "wrong");
    assert_eq!(reply.location(), Some("/login"));
    let page = client.get("/login");
    assert!(page.body_text().contains("Invalid username or password"));

    let reply = client.login("nobody", "right");
    assert_eq!(reply.location(), Some("/login"));
    assert_eq!(client.get("/index").location(), Some("/login?next=%2Findex"));
}

#[test]
fn login_honours_only_local_next() {
    let mut client = Client::new();
    client.register("john", "john@example.com", "pw");

    let token = client.csrf("/login?next=%2Fuser%2Fjohn");
    let reply = client.post_form(
        "/login?next=%2Fuser%2Fjohn",
        &[("csrf_token", &token), ("username", "john"), ("password", "pw")],
    );
    assert_eq!(reply.location(), Some("/user/john"));

    client.get("/logout");
    let token = client.csrf("/login");
    let reply = client.post_form(
        "/login?next=http%3A%2F%2Fevil.example%2F",
        &[("csrf_token", &token), ("username", "john"), ("password", "pw")],
    );
    assert_eq!(reply.location(), Some("/index"));
}

#[test]
fn protected_pages_redirect_anonymous_users() {
    let mut client = Client::new();
    for path in ["/", "/index", "/edit_profile", "/user/john", "/user/john/avatar/36"] {
        let reply = client.get(path);
        assert_eq!(reply.status.as_u16(), 302, "{}", path);
        assert!(reply.location().unwrap().starts_with("/login?next="), "{}", path);
    }

    let reply = client.get("/user/john?tab=1");
    assert_eq!(reply.location(), Some("/login?next=%2Fuser%2Fjohn%3Ftab%3D1"));
    let page = client.get("/login");
    assert!(page.body_text().contains("Please log in to access this page."));
}

#[test]
fn authenticated_users_skip_login_and_registration() {
    let mut client = Client::signed_up("john");
    assert_eq!(client.get("/login").location(), Some("/index"));
    assert_eq!(client.get("/registration").location(), Some("/index"));
}

#[test]
fn every_authenticated_request_updates_last_seen() {
    let mut client = Client::signed_up("john");
    let db = client.app.db();
    let mut user = db.user_by_username("john").unwrap().unwrap();
    let stale = Utc::now() - Duration::days(3);
    user.last_seen = stale;
    db.save_user(&user).unwrap();

    client.get("/index");
    let user = client.app.db().user_by_username("john").unwrap().unwrap();
    assert!(user.last_seen > stale + Duration::days(2));
}

#[test]
fn profile_page_shows_user_or_404() {
    let mut client = Client::signed_up("john");

    let page = client.get("/user/john");
    assert_eq!(page.status.as_u16(), 200);
    let body = page.body_text();
    assert!(body.contains("Test post #1"));
    assert!(body.contains("Test post #2"));
    assert!(body.contains("/user/john/avatar/128"));
    assert!(body.contains("/user/john/avatar/36"));
    assert!(body.contains("Edit your profile"));
    assert!(body.contains("Last seen on:"));

    let missing = client.get("/user/nobody");
    assert_eq!(missing.status.as_u16(), 404);
}

#[test]
fn other_users_profile_has_no_edit_link() {
    let mut client = Client::signed_up("john");
    {
        let mut susan = client.fork();
        let token = csrf_from(&susan.get("/registration"));
        let body = encode_form(&[
            ("csrf_token", &token),
            ("username", "susan"),
            ("email", "susan@example.com"),
            ("password", "pw"),
            ("password2", "pw"),
        ]);
        let reply = susan.send(
            Method::Post,
            "/registration",
            Some("application/x-www-form-urlencoded"),
            body,
        );
        assert_eq!(reply.location(), Some("/login"));
    }

    let page = client.get("/user/susan");
    assert_eq!(page.status.as_u16(), 200);
    assert!(!page.body_text().contains("Edit your profile"));
}

#[test]
fn edit_profile_prefills_and_saves_changes() {
    let mut client = Client::signed_up("john");
    let page = client.get("/edit_profile");
    assert!(page.body_text().contains(r#"value="john""#));

    let reply = post_profile(&mut client, "johnny", "Hello <world>", None);
    assert_eq!(reply.location(), Some("/edit_profile"));
    let page = client.get("/edit_profile");
    let body = page.body_text();
    assert!(body.contains("Your changes have been saved."));
    assert!(body.contains("Hello &lt;world&gt;"));

    let db = client.app.db();
    assert!(db.user_by_username("john").unwrap().is_none());
    let user = db.user_by_username("johnny").unwrap().unwrap();
    assert_eq!(user.about_me.as_deref(), Some("Hello <world>"));
    assert_eq!(user.profile_picture.as_deref(), Some("default.png"));
}

#[test]
fn edit_profile_rejects_taken_username_and_long_about_me() {
    let mut client = Client::signed_up("john");
    client
        .app
        .db()
        .create_user(microblog::models::models::User::new("susan", "susan@example.com"))
        .unwrap();

    let reply = post_profile(&mut client, "susan", "", None);
    assert_eq!(reply.status.as_u16(), 200);
    assert!(reply.body_text().contains("Please use a different username."));

    let long = "x".repeat(141);
    let reply = post_profile(&mut client, "john", &long, None);
    assert_eq!(reply.status.as_u16(), 200);
    assert!(client.app.db().user_by_username("john").unwrap().unwrap().about_me.is_none());
}

#[test]
fn avatar_upload_is_stored_and_thumbnailed() {
    let mut client = Client::signed_up("john");
    let upload = png_of(300, 150);
    let reply = post_profile(&mut client, "john", "", Some(("me.jpg", &upload)));
    assert_eq!(reply.location(), Some("/edit_profile"));

    let user = client.app.db().user_by_username("john").unwrap().unwrap();
    let expected = format!("{}.png", user.id);
    assert_eq!(user.profile_picture.as_deref(), Some(expected.as_str()));

    let reply = client.get("/user/john/avatar/64");
    assert_eq!(reply.status.as_u16(), 200);
    assert_eq!(reply.header("content-type"), Some("image/png"));
    let thumb = image::load_from_memory(&reply.body).unwrap();
    assert_eq!(thumb.dimensions(), (64, 32));

    // Smaller than the request: served at natural size.
    let reply = client.get("/user/john/avatar/1000");
    let full = image::load_from_memory(&reply.body).unwrap();
    assert_eq!(full.dimensions(), (300, 150));
}

#[test]
fn broken_upload_flashes_error_and_saves_nothing() {
    let mut client = Client::signed_up("john");
    let reply = post_profile(&mut client, "renamed", "new bio", Some(("evil.png", b"not an image")));
    assert_eq!(reply.location(), Some("/edit_profile"));

    let page = client.get("/edit_profile");
    assert!(page.body_text().contains("Error: "));

    let user = client.app.db().user_by_username("john").unwrap().unwrap();
    assert_eq!(user.about_me, None);
    assert_eq!(user.profile_picture.as_deref(), Some("default.png"));
}

#[test]
fn oversized_image_dimensions_are_refused() {
    let settings = Settings {
        max_avatar_side: 200,
        ..Settings::default()
    };
    let mut client = Client::signed_up_with("john", settings);
    let upload = png_of(300, 150);
    let reply = post_profile(&mut client, "john", "bio", Some(("wide.png", &upload)));
    assert_eq!(reply.location(), Some("/edit_profile"));

    let page = client.get("/edit_profile");
    assert!(page.body_text().contains("Error: the image is larger than 200x200 pixels"));

    let user = client.app.db().user_by_username("john").unwrap().unwrap();
    assert_eq!(user.profile_picture.as_deref(), Some("default.png"));
    assert!(client.app.db().avatar(&format!("{}.png", user.id)).unwrap().is_none());
}

#[test]
fn failed_rename_keeps_previous_avatar() {
    let mut client = Client::signed_up("john");
    let first = png_of(300, 150);
    post_profile(&mut client, "john", "", Some(("first.png", &first)));
    let user = client.app.db().user_by_username("john").unwrap().unwrap();
    let filename = user.profile_picture.clone().unwrap();
    let stored = client.app.db().avatar(&filename).unwrap().unwrap();

    // Another writer claims the name between the form check and the save.
    client
        .app
        .store()
        .set_json(&microblog::config::username_index_key("racer"), &999u64)
        .unwrap();

    let second = png_of(10, 10);
    let reply = post_profile(&mut client, "racer", "", Some(("second.png", &second)));
    assert_eq!(reply.status.as_u16(), 200);
    assert!(reply.body_text().contains("Please use a different username."));

    assert_eq!(client.app.db().avatar(&filename).unwrap().unwrap(), stored);
    let user = client.app.db().user_by_username("john").unwrap().unwrap();
    assert_eq!(user.profile_picture.as_deref(), Some(filename.as_str()));
}

#[test]
fn default_avatar_and_avatar_errors() {
    let mut client = Client::signed_up("john");

    let reply = client.get("/user/john/avatar/36");
    assert_eq!(reply.status.as_u16(), 200);
    let thumb = image::load_from_memory(&reply.body).unwrap();
    assert!(thumb.width() <= 36 && thumb.height() <= 36);

    assert_eq!(client.get("/user/nobody/avatar/36").status.as_u16(), 404);
    assert_eq!(client.get("/user/john/avatar/0").status.as_u16(), 404);
    assert_eq!(client.get("/user/john/avatar/abc").status.as_u16(), 404);
    assert_eq!(client.get("/user/john/avatar/100000").status.as_u16(), 404);
}

#[test]
fn logout_ends_the_session() {
    let mut client = Client::signed_up("john");
    assert_eq!(client.get("/index").status.as_u16(), 200);

    let reply = client.get("/logout");
    assert_eq!(reply.location(), Some("/index"));
    assert_eq!(client.get("/index").location(), Some("/login?next=%2Findex"));
}

#[test]
fn logout_discards_the_old_session_record() {
    let mut client = Client::signed_up("john");
    let before = client.session.clone().unwrap();
    assert!(client.app.store().exists(&session_key(&before)).unwrap());

    client.get("/logout");
    let after = client.session.clone().unwrap();
    assert_ne!(before, after);
    assert!(!client.app.store().exists(&session_key(&before)).unwrap());

    let mut stale = client.fork();
    stale.session = Some(before);
    assert_eq!(stale.get("/index").status.as_u16(), 302);
}

#[test]
fn anonymous_sessions_do_not_pile_up() {
    let settings = Settings {
        session_hours: 0,
        ..Settings::default()
    };
    let client = Client::with_settings(settings);
    let mut ids = Vec::new();
    for _ in 0..50 {
        let mut visitor = client.fork();
        assert_eq!(visitor.get("/login").status.as_u16(), 200);
        ids.push(visitor.session.unwrap());
    }

    let store = client.app.store();
    let (last, earlier) = ids.split_last().unwrap();
    for id in earlier {
        assert!(!store.exists(&session_key(id)).unwrap(), "{} survived", id);
    }
    assert!(store.exists(&session_key(last)).unwrap());

    let index: BTreeMap<String, DateTime<Utc>> =
        store.get_json(SESSION_INDEX_KEY).unwrap().unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(client.app.prune_sessions().unwrap(), 1);
    assert!(!store.exists(&session_key(last)).unwrap());
}

#[test]
fn forms_without_valid_csrf_token_are_rejected() {
    let mut client = Client::new();
    client.register("john", "john@example.com", "pw");
    client.get("/login");

    let reply = client.post_form(
        "/login",
        &[("csrf_token", "forged"), ("username", "john"), ("password", "pw")],
    );
    assert_eq!(reply.status.as_u16(), 200);
    assert!(reply.body_text().contains("The CSRF token is missing or invalid."));
    assert_eq!(client.get("/index").status.as_u16(), 302);

    let mut fresh = Client::new();
    let reply = fresh.post_form(
        "/registration",
        &[
            ("username", "eve"),
            ("email", "eve@example.com"),
            ("password", "pw"),
            ("password2", "pw"),
        ],
    );
    assert_eq!(reply.status.as_u16(), 200);
    assert!(fresh.app.db().user_ids().unwrap().is_empty());
}

#[test]
fn login_rotates_session_cookie() {
    let mut client = Client::new();
    client.register("john", "john@example.com", "pw");
    let before = client.session.clone().unwrap();
    client.login("john", "pw");
    let after = client.session.clone().unwrap();
    assert_ne!(before, after);

    let mut stale = client.fork();
    stale.session = Some(before);
    assert_eq!(stale.get("/index").status.as_u16(), 302);
}

#[test]
fn unknown_paths_and_methods() {
    let mut client = Client::new();
    assert_eq!(client.get("/nowhere").status.as_u16(), 404);
    assert_eq!(
        client.send(Method::Post, "/logout", None, Vec::new()).status.as_u16(),
        405
    );
    assert_eq!(
        client.send(Method::Delete, "/index", None, Vec::new()).status.as_u16(),
        405
    );

    let css = client.get("/static/style.css");
    assert_eq!(css.status.as_u16(), 200);
    assert_eq!(css.header("content-type"), Some("text/css"));
    assert!(client.session.is_none());
}
