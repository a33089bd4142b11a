use chrono::Utc;

use crate::config::*;
use crate::core::store::{KvStore, KvStoreExt, StoreError};
use crate::models::models::{Post, User};

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("{field} '{value}' is already taken")]
    UniqueViolation { field: &'static str, value: String },
    #[error("{field} is longer than {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("no {kind} with id {id}")]
    NotFound { kind: &'static str, id: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Record layer over the key-value store: users, posts and their indexes.
pub struct Db<'a> {
    store: &'a dyn KvStore,
}

impl<'a> Db<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self { store }
    }

    fn next_id(&self, seq_key: &str) -> Result<u64, StoreError> {
        let next = self.store.get_json::<u64>(seq_key)?.unwrap_or(0) + 1;
        self.store.set_json(seq_key, &next)?;
        Ok(next)
    }

    pub fn user_ids(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self.store.get_json(USERS_LIST_KEY)?.unwrap_or_default())
    }

    pub fn user(&self, id: u64) -> Result<Option<User>, StoreError> {
        self.store.get_json(&user_key(id))
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        match self.store.get_json::<u64>(&username_index_key(username))? {
            Some(id) => self.user(id),
            None => Ok(None),
        }
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        match self.store.get_json::<u64>(&email_index_key(email))? {
            Some(id) => self.user(id),
            None => Ok(None),
        }
    }

    fn claim(&self, index_key: &str, field: &'static str, value: &str, id: u64) -> Result<(), DbError> {
        match self.store.get_json::<u64>(index_key)? {
            Some(owner) if owner != id => Err(DbError::UniqueViolation {
                field,
                value: value.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Persist a new user, assigning its id. Username and email must be unused.
    pub fn create_user(&self, mut user: User) -> Result<User, DbError> {
        let name_key = username_index_key(&user.username);
        let email_key = email_index_key(&user.email);
        if self.store.exists(&name_key)? {
            return Err(DbError::UniqueViolation {
                field: "username",
                value: user.username,
            });
        }
        if self.store.exists(&email_key)? {
            return Err(DbError::UniqueViolation {
                field: "email",
                value: user.email,
            });
        }

        user.id = self.next_id(USER_SEQ_KEY)?;
        self.store.set_json(&name_key, &user.id)?;
        self.store.set_json(&email_key, &user.id)?;
        self.store.set_json(&user_key(user.id), &user)?;

        let mut users = self.user_ids()?;
        users.push(user.id);
        self.store.set_json(USERS_LIST_KEY, &users)?;

        tracing::debug!(user_id = user.id, username = %user.username, "user created");
        Ok(user)
    }

    /// Write back an existing user, moving the unique indexes if username or email changed.
    pub fn save_user(&self, user: &User) -> Result<(), DbError> {
        let previous = self.user(user.id)?.ok_or(DbError::NotFound {
            kind: "user",
            id: user.id,
        })?;

        let name_changed = previous.username != user.username;
        let email_changed = previous.email != user.email;
        if name_changed {
            self.claim(&username_index_key(&user.username), "username", &user.username, user.id)?;
        }
        if email_changed {
            self.claim(&email_index_key(&user.email), "email", &user.email, user.id)?;
        }

        if name_changed {
            self.store.set_json(&username_index_key(&user.username), &user.id)?;
            self.store.delete(&username_index_key(&previous.username))?;
        }
        if email_changed {
            self.store.set_json(&email_index_key(&user.email), &user.id)?;
            self.store.delete(&email_index_key(&previous.email))?;
        }

        self.store.set_json(&user_key(user.id), user)?;
        Ok(())
    }

    pub fn create_post(&self, user_id: u64, body: &str) -> Result<Post, DbError> {
        if body.chars().count() > MAX_POST_LENGTH {
            return Err(DbError::TooLong {
                field: "body",
                max: MAX_POST_LENGTH,
            });
        }
        if self.user(user_id)?.is_none() {
            return Err(DbError::NotFound {
                kind: "user",
                id: user_id,
            });
        }

        let post = Post {
            id: self.next_id(POST_SEQ_KEY)?,
            body: body.to_string(),
            timestamp: Utc::now(),
            user_id,
        };
        self.store.set_json(&post_key(post.id), &post)?;

        let key = user_posts_key(user_id);
        let mut ids: Vec<u64> = self.store.get_json(&key)?.unwrap_or_default();
        ids.insert(0, post.id); // newest first
        self.store.set_json(&key, &ids)?;

        Ok(post)
    }

    /// Posts written by `user_id`, newest first.
    pub fn posts_by_user(&self, user_id: u64) -> Result<Vec<Post>, StoreError> {
        let ids: Vec<u64> = self.store.get_json(&user_posts_key(user_id))?.unwrap_or_default();
        let mut posts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(post) = self.store.get_json::<Post>(&post_key(id))? {
                posts.push(post);
            }
        }
        Ok(posts)
    }

    pub fn put_avatar(&self, filename: &str, png: &[u8]) -> Result<(), StoreError> {
        self.store.set(&avatar_key(filename), png)
    }

    pub fn avatar(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.get(&avatar_key(filename))
    }
}
