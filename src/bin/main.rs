#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate microblog;

    use actix_web::{web, App as ActixApp, HttpRequest, HttpResponse, HttpServer};
    use clap::Parser;
    use microblog::config::Settings;
    use microblog::core::store::FsStore;
    use microblog::App;
    use std::path::PathBuf;

    /// Multipart framing on top of the largest accepted upload.
    const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

    #[derive(Debug, Clone, Parser)]
    #[command(name = "microblog", about = "Run the microblog on a local actix-web server")]
    pub struct ServeArgs {
        /// Server bind address
        #[arg(long, env = "MICROBLOG_BIND", default_value = "0.0.0.0:8080")]
        pub bind: String,

        /// Directory holding the key-value data
        #[arg(long, env = "MICROBLOG_DATA_DIR", default_value = "data")]
        pub data_dir: PathBuf,
    }

    pub(crate) mod adapter {
        use actix_web::HttpRequest;
        use microblog::core::reply::Reply;
        use spin_sdk::http::{Method, Request};

        pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> Request {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                other => Method::Other(other.to_string()),
            };

            let uri = req.uri().to_string();

            let mut builder = Request::builder();
            builder.method(method).uri(&uri);
            for (name, value) in req.headers() {
                if let Ok(value) = value.to_str() {
                    builder.header(name.as_str(), value);
                }
            }
            builder.body(body.to_vec()).build()
        }

        pub fn reply_to_actix_response(reply: Reply) -> actix_web::HttpResponse {
            let mut response = actix_web::HttpResponse::build(
                actix_web::http::StatusCode::from_u16(reply.status.as_u16())
                    .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
            );
            for (name, value) in &reply.headers {
                response.append_header((name.as_str(), value.as_str()));
            }
            response.body(reply.body)
        }
    }

    pub async fn handle_all(app: web::Data<App>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
        let spin_req = adapter::actix_to_spin_request(&req, body);
        adapter::reply_to_actix_response(app.handle(&spin_req))
    }

    pub async fn run(args: ServeArgs, settings: Settings) -> std::io::Result<()> {
        let store = FsStore::open(&args.data_dir).map_err(std::io::Error::other)?;
        let app = App::new(store.clone(), settings.clone());
        let applied = app.migrate().map_err(std::io::Error::other)?;
        let reaped = app.prune_sessions().map_err(std::io::Error::other)?;
        tracing::info!(applied, reaped, data_dir = %args.data_dir.display(), "store ready");

        let payload_limit = settings.max_upload_bytes + FORM_OVERHEAD_BYTES;
        tracing::info!("Server listening on http://{}", args.bind);

        HttpServer::new(move || {
            ActixApp::new()
                .app_data(web::Data::new(App::new(store.clone(), settings.clone())))
                .app_data(web::PayloadConfig::new(payload_limit))
                .default_service(web::route().to(handle_all))
        })
        .bind(&args.bind)?
        .run()
        .await
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    use clap::Parser;

    dotenvy::dotenv().ok();
    microblog::logging::init();
    let args = native::ServeArgs::parse();
    native::run(args, microblog::config::Settings::from_env()).await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
