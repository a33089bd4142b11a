use chrono::{DateTime, Duration, Utc};
use cookie::{Cookie, SameSite};
use spin_sdk::http::Request;
use std::collections::BTreeMap;

use crate::app::App;
use crate::config::{session_key, Settings, SESSION_INDEX_KEY};
use crate::core::reply::Reply;
use crate::core::store::{KvStore, KvStoreExt, StoreError};
use crate::models::models::{SessionData, User};

pub const SESSION_COOKIE: &str = "session";

/// Stored session ids and when each one expires.
type SessionIndex = BTreeMap<String, DateTime<Utc>>;

fn reap(store: &dyn KvStore, index: &mut SessionIndex, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let expired: Vec<String> = index
        .iter()
        .filter(|(_, expires_at)| **expires_at <= now)
        .map(|(id, _)| id.clone())
        .collect();
    for id in &expired {
        store.delete(&session_key(id))?;
        index.remove(id);
    }
    Ok(expired.len())
}

/// Delete every stored session past its expiry. Returns how many were removed.
pub fn prune_expired(store: &dyn KvStore) -> Result<usize, StoreError> {
    let mut index = store
        .get_json::<SessionIndex>(SESSION_INDEX_KEY)?
        .unwrap_or_default();
    let removed = reap(store, &mut index, Utc::now())?;
    if removed > 0 {
        store.set_json(SESSION_INDEX_KEY, &index)?;
    }
    Ok(removed)
}

/// A session record plus the bookkeeping needed to persist it at the end of a request.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    data: SessionData,
    dirty: bool,
    send_cookie: bool,
    retired: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            data: SessionData::new(),
            dirty: true,
            send_cookie: true,
            retired: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    fn lifetime(&self, settings: &Settings) -> Duration {
        if self.data.remember {
            Duration::days(settings.remember_days)
        } else {
            Duration::hours(settings.session_hours)
        }
    }

    /// Load the session named by the request's cookie. Expired records are deleted.
    pub fn load(
        store: &dyn KvStore,
        settings: &Settings,
        cookie_header: Option<&str>,
    ) -> Result<Option<Self>, StoreError> {
        let id = match cookie_header.and_then(session_id_from_header) {
            Some(id) => id,
            None => return Ok(None),
        };
        let key = session_key(&id);
        let data = match store.get_json::<SessionData>(&key)? {
            Some(data) => data,
            None => return Ok(None),
        };

        let session = Self {
            id,
            data,
            dirty: false,
            send_cookie: false,
            retired: None,
        };
        if Utc::now() - session.data.created_at > session.lifetime(settings) {
            tracing::debug!(session = %session.id, "session expired");
            store.delete(&key)?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub fn user_id(&self) -> Option<u64> {
        self.data.user_id
    }

    /// Bind the session to `user_id` under a fresh id so a pre-login id cannot be reused.
    pub fn login(&mut self, user_id: u64, remember: bool) {
        let old = std::mem::replace(&mut self.id, uuid::Uuid::new_v4().to_string());
        // Only a stored id needs deleting; a session created this request was never saved.
        if !self.send_cookie {
            self.retired.get_or_insert(old);
        }
        self.data.user_id = Some(user_id);
        self.data.remember = remember;
        self.data.created_at = Utc::now();
        self.dirty = true;
        self.send_cookie = true;
    }

    /// Forget the user and move to a fresh id. The old record is deleted on save,
    /// and the new one is only written if something is put in it.
    pub fn logout(&mut self) {
        let old = std::mem::replace(&mut self.id, uuid::Uuid::new_v4().to_string());
        if !self.send_cookie {
            self.retired.get_or_insert(old);
        }
        self.data = SessionData::new();
        self.dirty = false;
        self.send_cookie = true;
    }

    pub fn flash(&mut self, message: impl Into<String>) {
        self.data.flashes.push(message.into());
        self.dirty = true;
    }

    pub fn take_flashes(&mut self) -> Vec<String> {
        if self.data.flashes.is_empty() {
            return Vec::new();
        }
        self.dirty = true;
        std::mem::take(&mut self.data.flashes)
    }

    pub fn csrf_token(&self) -> &str {
        &self.data.csrf_token
    }

    /// Write the record if it changed and keep the expiry index in step.
    ///
    /// A retired id leaves the index and a newly stored id joins it. Expired
    /// sessions are reaped before the new id is added.
    pub fn save(&mut self, store: &dyn KvStore, settings: &Settings) -> Result<(), StoreError> {
        let retired = self.retired.take();
        if let Some(old) = &retired {
            store.delete(&session_key(old))?;
        }
        let inserted = self.dirty && self.send_cookie;
        if self.dirty {
            store.set_json(&session_key(&self.id), &self.data)?;
            self.dirty = false;
        }
        if !inserted && retired.is_none() {
            return Ok(());
        }

        let mut index = store
            .get_json::<SessionIndex>(SESSION_INDEX_KEY)?
            .unwrap_or_default();
        if let Some(old) = &retired {
            index.remove(old);
        }
        let reaped = reap(store, &mut index, Utc::now())?;
        if reaped > 0 {
            tracing::debug!(reaped, "expired sessions removed");
        }
        if inserted {
            index.insert(self.id.clone(), self.data.created_at + self.lifetime(settings));
        }
        store.set_json(SESSION_INDEX_KEY, &index)
    }

    /// `Set-Cookie` value, when the browser does not yet hold this session's id.
    pub fn cookie(&self, settings: &Settings) -> Option<String> {
        if !self.send_cookie {
            return None;
        }
        let mut builder = Cookie::build((SESSION_COOKIE, self.id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(settings.secure_cookies);
        if self.data.remember {
            builder = builder.max_age(cookie::time::Duration::days(settings.remember_days));
        }
        Some(builder.build().to_string())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn session_id_from_header(header: &str) -> Option<String> {
    Cookie::split_parse(header)
        .filter_map(Result::ok)
        .find(|c| c.name() == SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Per-request state: the session (created lazily) and the authenticated user.
pub struct RequestContext {
    pub session: Option<Session>,
    pub user: Option<User>,
}

impl RequestContext {
    pub fn load(app: &App, req: &Request) -> anyhow::Result<Self> {
        let cookie_header = req.header("cookie").and_then(|h| h.as_str());
        let session = Session::load(app.store(), app.settings(), cookie_header)?;
        let user = match session.as_ref().and_then(Session::user_id) {
            Some(id) => app.db().user(id)?,
            None => None,
        };
        Ok(Self { session, user })
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn session(&mut self) -> &mut Session {
        self.session.get_or_insert_with(Session::new)
    }

    pub fn flash(&mut self, message: impl Into<String>) {
        self.session().flash(message);
    }

    pub fn take_flashes(&mut self) -> Vec<String> {
        self.session
            .as_mut()
            .map(Session::take_flashes)
            .unwrap_or_default()
    }

    pub fn csrf_token(&mut self) -> String {
        self.session().csrf_token().to_string()
    }

    pub fn csrf_matches(&self, submitted: Option<&str>) -> bool {
        match (&self.session, submitted) {
            (Some(session), Some(token)) => !token.is_empty() && session.csrf_token() == token,
            _ => false,
        }
    }

    pub fn login(&mut self, user: User, remember: bool) {
        self.session().login(user.id, remember);
        self.user = Some(user);
    }

    pub fn logout(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.logout();
        }
        self.user = None;
    }

    /// Persist the session and attach its cookie to the outgoing reply.
    pub fn finish(mut self, app: &App, reply: Reply) -> anyhow::Result<Reply> {
        match self.session.as_mut() {
            Some(session) => {
                session.save(app.store(), app.settings())?;
                Ok(match session.cookie(app.settings()) {
                    Some(cookie) => reply.with_cookie(cookie),
                    None => reply,
                })
            }
            None => Ok(reply),
        }
    }
}
