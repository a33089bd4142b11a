use mime_guess::from_path;
use rust_embed::RustEmbed;
use std::borrow::Cow;

use crate::core::errors::ApiError;
use crate::core::reply::Reply;

#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

pub fn asset(path: &str) -> Option<Cow<'static, [u8]>> {
    Assets::get(path).map(|file| file.data)
}

/// `GET /static/<path>`
pub fn serve_static(path: &str) -> anyhow::Result<Reply> {
    let file_path = path.trim_start_matches("/static/");
    if file_path.split('/').any(|segment| segment == "..") {
        return Ok(ApiError::NotFound("File not found".to_string()).into());
    }

    let file = match Assets::get(file_path) {
        Some(file) => file,
        None => return Ok(ApiError::NotFound("File not found".to_string()).into()),
    };

    let mime = from_path(file_path).first_or_octet_stream();

    Ok(Reply::new(http::StatusCode::OK)
        .with_header(http::header::CONTENT_TYPE.as_str(), mime.as_ref())
        .with_body(file.data.into_owned()))
}
