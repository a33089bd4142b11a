pub const MAX_POST_LENGTH: usize = 140;

/// Sentinel avatar filename given to new accounts. Served from `static/avatars/`.
pub const DEFAULT_AVATAR: &str = "default.png";

pub const USERS_LIST_KEY: &str = "users_list";
pub const USER_SEQ_KEY: &str = "seq:user";
pub const POST_SEQ_KEY: &str = "seq:post";
pub const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const SESSION_INDEX_KEY: &str = "sessions_by_expiry";

pub fn user_key(id: u64) -> String {
    format!("user:{}", id)
}

pub fn username_index_key(username: &str) -> String {
    format!("user_by_name:{}", username)
}

pub fn email_index_key(email: &str) -> String {
    format!("user_by_email:{}", email)
}

pub fn post_key(id: u64) -> String {
    format!("post:{}", id)
}

pub fn user_posts_key(user_id: u64) -> String {
    format!("posts_by_user:{}", user_id)
}

pub fn avatar_key(filename: &str) -> String {
    format!("avatar:{}", filename)
}

pub fn session_key(id: &str) -> String {
    format!("session:{}", id)
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Runtime knobs read from `MICROBLOG_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub session_hours: i64,
    pub remember_days: i64,
    pub max_upload_bytes: usize,
    pub max_avatar_size: u32,
    /// Largest accepted width or height of a decoded image.
    pub max_avatar_side: u32,
    pub secure_cookies: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session_hours: 24,
            remember_days: 365,
            max_upload_bytes: 4 * 1024 * 1024,
            max_avatar_size: 1024,
            max_avatar_side: 4096,
            secure_cookies: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_hours: env_or("MICROBLOG_SESSION_HOURS", defaults.session_hours),
            remember_days: env_or("MICROBLOG_REMEMBER_DAYS", defaults.remember_days),
            max_upload_bytes: env_or("MICROBLOG_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            max_avatar_size: env_or("MICROBLOG_MAX_AVATAR_SIZE", defaults.max_avatar_size),
            max_avatar_side: env_or("MICROBLOG_MAX_AVATAR_SIDE", defaults.max_avatar_side),
            secure_cookies: env_or("MICROBLOG_SECURE_COOKIES", defaults.secure_cookies),
        }
    }
}
