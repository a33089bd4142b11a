use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_AVATAR;
use crate::core::helpers::{hash_password, verify_password};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub about_me: Option<String>,
    pub last_seen: DateTime<Utc>,
    /// Added by the `0002_profile_picture` migration; absent on older records.
    #[serde(default)]
    pub profile_picture: Option<String>,
}

impl User {
    /// A not-yet-persisted user. The id is assigned on insert.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: 0,
            username: username.into(),
            email: email.into(),
            password_hash: None,
            about_me: None,
            last_seen: Utc::now(),
            profile_picture: Some(DEFAULT_AVATAR.to_string()),
        }
    }

    pub fn set_password(&mut self, password: &str) -> anyhow::Result<()> {
        self.password_hash = Some(hash_password(password)?);
        Ok(())
    }

    pub fn check_password(&self, password: &str) -> bool {
        self.password_hash
            .as_deref()
            .map(|hash| verify_password(password, hash))
            .unwrap_or(false)
    }

    pub fn avatar_url(&self, size: u32) -> String {
        format!(
            "/user/{}/avatar/{}",
            urlencoding::encode(&self.username),
            size
        )
    }

    pub fn profile_url(&self) -> String {
        format!("/user/{}", urlencoding::encode(&self.username))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Post {
    pub id: u64,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: u64,
}

/// Server-side half of a browser session. The cookie only carries the key.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionData {
    pub user_id: Option<u64>,
    #[serde(default)]
    pub remember: bool,
    pub created_at: DateTime<Utc>,
    pub csrf_token: String,
    #[serde(default)]
    pub flashes: Vec<String>,
}

impl SessionData {
    pub fn new() -> Self {
        Self {
            user_id: None,
            remember: false,
            created_at: Utc::now(),
            csrf_token: uuid::Uuid::new_v4().simple().to_string(),
            flashes: Vec::new(),
        }
    }
}

impl Default for SessionData {
    fn default() -> Self {
        Self::new()
    }
}
