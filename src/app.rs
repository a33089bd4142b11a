use spin_sdk::http::Request;

use crate::config::Settings;
use crate::core::db::Db;
use crate::core::migrations;
use crate::core::reply::Reply;
use crate::core::store::KvStore;
use crate::router;
use crate::session;

/// Everything a request handler needs: the backing store and runtime settings.
pub struct App {
    store: Box<dyn KvStore>,
    settings: Settings,
}

impl App {
    pub fn new(store: impl KvStore + 'static, settings: Settings) -> Self {
        Self {
            store: Box::new(store),
            settings,
        }
    }

    /// Bring the store's schema up to date. Returns the number of migrations applied.
    pub fn migrate(&self) -> anyhow::Result<usize> {
        Ok(migrations::upgrade(self.store())?)
    }

    /// Delete sessions whose expiry has passed. Returns how many were removed.
    pub fn prune_sessions(&self) -> anyhow::Result<usize> {
        Ok(session::prune_expired(self.store())?)
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn db(&self) -> Db<'_> {
        Db::new(self.store())
    }

    pub fn handle(&self, req: &Request) -> Reply {
        router::handle(self, req)
    }
}
