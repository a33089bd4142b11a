pub mod app;
pub mod auth;
pub mod avatars;
pub mod config;
pub mod core;
pub mod logging;
pub mod models;
pub mod posts;
pub mod router;
pub mod session;
pub mod static_server;
pub mod templates;
pub mod users;

pub use app::App;

#[cfg(target_arch = "wasm32")]
mod component {
    use spin_sdk::http::{IntoResponse, Request, Response};
    use spin_sdk::http_component;

    use crate::config::Settings;
    use crate::core::store::SpinStore;
    use crate::logging;
    use crate::App;

    #[http_component]
    fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
        logging::init();
        let app = App::new(SpinStore::open_default()?, Settings::from_env());
        app.migrate()?;
        Ok(Response::from(app.handle(&req)))
    }
}
