//! Linear schema history for the key-value layout.
//!
//! `schema_version` holds how many entries of [`MIGRATIONS`] have been applied.
//! Migrations run in order on upgrade and in reverse on downgrade.

use serde_json::Value;

use crate::config::*;
use crate::core::store::{KvStore, KvStoreExt, StoreError};

type Step = fn(&dyn KvStore) -> Result<(), StoreError>;

pub struct Migration {
    pub name: &'static str,
    up: Step,
    down: Step,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_users_posts",
        up: users_posts_up,
        down: users_posts_down,
    },
    Migration {
        name: "0002_profile_picture",
        up: profile_picture_up,
        down: profile_picture_down,
    },
];

pub fn current_version(store: &dyn KvStore) -> Result<usize, StoreError> {
    Ok(store.get_json(SCHEMA_VERSION_KEY)?.unwrap_or(0))
}

/// Apply every pending migration. Returns how many ran.
pub fn upgrade(store: &dyn KvStore) -> Result<usize, StoreError> {
    let current = current_version(store)?;
    let mut applied = 0;
    for (index, migration) in MIGRATIONS.iter().enumerate().skip(current) {
        tracing::info!(migration = migration.name, "applying migration");
        (migration.up)(store)?;
        store.set_json(SCHEMA_VERSION_KEY, &(index + 1))?;
        applied += 1;
    }
    Ok(applied)
}

/// Revert migrations until `target` remain applied.
pub fn downgrade_to(store: &dyn KvStore, target: usize) -> Result<usize, StoreError> {
    let current = current_version(store)?;
    let mut reverted = 0;
    for index in (target..current).rev() {
        let migration = &MIGRATIONS[index];
        tracing::info!(migration = migration.name, "reverting migration");
        (migration.down)(store)?;
        store.set_json(SCHEMA_VERSION_KEY, &index)?;
        reverted += 1;
    }
    Ok(reverted)
}

fn user_ids(store: &dyn KvStore) -> Result<Vec<u64>, StoreError> {
    Ok(store.get_json(USERS_LIST_KEY)?.unwrap_or_default())
}

fn users_posts_up(store: &dyn KvStore) -> Result<(), StoreError> {
    for key in [USER_SEQ_KEY, POST_SEQ_KEY] {
        if !store.exists(key)? {
            store.set_json(key, &0u64)?;
        }
    }
    if !store.exists(USERS_LIST_KEY)? {
        store.set_json(USERS_LIST_KEY, &Vec::<u64>::new())?;
    }
    Ok(())
}

fn users_posts_down(store: &dyn KvStore) -> Result<(), StoreError> {
    for id in user_ids(store)? {
        if let Some(user) = store.get_json::<Value>(&user_key(id))? {
            if let Some(name) = user.get("username").and_then(Value::as_str) {
                store.delete(&username_index_key(name))?;
            }
            if let Some(email) = user.get("email").and_then(Value::as_str) {
                store.delete(&email_index_key(email))?;
            }
        }
        let posts: Vec<u64> = store.get_json(&user_posts_key(id))?.unwrap_or_default();
        for post_id in posts {
            store.delete(&post_key(post_id))?;
        }
        store.delete(&user_posts_key(id))?;
        store.delete(&user_key(id))?;
    }
    for key in [USERS_LIST_KEY, USER_SEQ_KEY, POST_SEQ_KEY] {
        store.delete(key)?;
    }
    Ok(())
}

fn profile_picture_up(store: &dyn KvStore) -> Result<(), StoreError> {
    for id in user_ids(store)? {
        let key = user_key(id);
        if let Some(Value::Object(mut record)) = store.get_json::<Value>(&key)? {
            if !record.contains_key("profile_picture") {
                record.insert("profile_picture".to_string(), Value::Null);
                store.set_json(&key, &record)?;
            }
        }
    }
    Ok(())
}

fn profile_picture_down(store: &dyn KvStore) -> Result<(), StoreError> {
    for id in user_ids(store)? {
        let key = user_key(id);
        if let Some(Value::Object(mut record)) = store.get_json::<Value>(&key)? {
            if record.remove("profile_picture").is_some() {
                store.set_json(&key, &record)?;
            }
        }
    }
    Ok(())
}
