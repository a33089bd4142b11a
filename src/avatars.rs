use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError, ImageFormat, ImageReader, Limits};
use std::io::Cursor;

use crate::app::App;
use crate::config::DEFAULT_AVATAR;
use crate::core::errors::ApiError;
use crate::core::reply::Reply;
use crate::static_server;

#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    #[error("the uploaded file is empty")]
    Empty,
    #[error("the uploaded file is {size} bytes, the limit is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("the image is larger than {max}x{max} pixels")]
    Dimensions { max: u32 },
    #[error("the uploaded file is not a supported image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode PNG: {0}")]
    Encode(#[source] image::ImageError),
    #[error(transparent)]
    Store(#[from] crate::core::store::StoreError),
}

/// Target size for a thumbnail bounded by a `size`×`size` box.
///
/// Aspect ratio is preserved and images already inside the box are left
/// alone. Neither side drops below one pixel.
pub fn thumbnail_dimensions(width: u32, height: u32, size: u32) -> (u32, u32) {
    if width <= size && height <= size {
        return (width, height);
    }
    let scale = |long: u32, short: u32| -> u32 {
        let scaled = (short as f64 * size as f64 / long as f64).round() as u32;
        scaled.clamp(1, size)
    };
    if width >= height {
        (size, scale(width, height))
    } else {
        (scale(height, width), size)
    }
}

/// Decode with the header dimensions checked before any pixel buffer is allocated.
fn decode_bounded(data: &[u8], max_side: u32) -> Result<DynamicImage, AvatarError> {
    let mut reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AvatarError::Decode(ImageError::IoError(e)))?;
    let mut limits = Limits::default();
    limits.max_image_width = Some(max_side);
    limits.max_image_height = Some(max_side);
    reader.limits(limits);
    reader.decode().map_err(|e| match e {
        ImageError::Limits(_) => AvatarError::Dimensions { max: max_side },
        other => AvatarError::Decode(other),
    })
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, AvatarError> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(AvatarError::Encode)?;
    Ok(out.into_inner())
}

/// Decode any supported image and return a PNG thumbnail that fits in `size`×`size`.
pub fn thumbnail_png(source: &[u8], size: u32, max_side: u32) -> Result<Vec<u8>, AvatarError> {
    let img = decode_bounded(source, max_side)?;
    let (width, height) = img.dimensions();
    let (w, h) = thumbnail_dimensions(width, height, size);
    if (w, h) == (width, height) {
        return encode_png(&img);
    }
    encode_png(&img.resize_exact(w, h, FilterType::Lanczos3))
}

/// Validate an upload and normalise it to PNG so the stored `<id>.png` really is one.
///
/// Both the byte size and the decoded width and height are bounded.
pub fn normalize_upload(data: &[u8], max_bytes: usize, max_side: u32) -> Result<Vec<u8>, AvatarError> {
    if data.is_empty() {
        return Err(AvatarError::Empty);
    }
    if data.len() > max_bytes {
        return Err(AvatarError::TooLarge {
            size: data.len(),
            max: max_bytes,
        });
    }
    let img = decode_bounded(data, max_side)?;
    encode_png(&img)
}

pub fn avatar_filename(user_id: u64) -> String {
    format!("{}.png", user_id)
}

/// A validated upload, normalised to PNG but not yet written.
#[derive(Debug)]
pub struct PreparedAvatar {
    pub filename: String,
    png: Vec<u8>,
}

/// Validate and normalise an upload for `user_id` without touching the store.
pub fn prepare_upload(app: &App, user_id: u64, data: &[u8]) -> Result<PreparedAvatar, AvatarError> {
    let settings = app.settings();
    let png = normalize_upload(data, settings.max_upload_bytes, settings.max_avatar_side)?;
    Ok(PreparedAvatar {
        filename: avatar_filename(user_id),
        png,
    })
}

/// Write a prepared avatar, replacing any previous one for the same user.
pub fn store_upload(app: &App, avatar: &PreparedAvatar) -> Result<(), AvatarError> {
    app.db().put_avatar(&avatar.filename, &avatar.png)?;
    tracing::info!(filename = %avatar.filename, bytes = avatar.png.len(), "avatar stored");
    Ok(())
}

/// Parse a `<int:size>` path segment: ASCII digits only.
fn parse_size(segment: &str) -> Option<u32> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// `GET /user/<username>/avatar/<size>`
pub fn serve_avatar(app: &App, username: &str, size: &str) -> anyhow::Result<Reply> {
    let size = match parse_size(size) {
        Some(size) if size >= 1 && size <= app.settings().max_avatar_size => size,
        _ => return Ok(ApiError::NotFound("Avatar not found".to_string()).into()),
    };

    let db = app.db();
    let user = match db.user_by_username(username)? {
        Some(user) => user,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let stored = match user.profile_picture.as_deref() {
        Some(name) if name != DEFAULT_AVATAR => db.avatar(name)?,
        _ => None,
    };
    let source = match stored {
        Some(bytes) => bytes,
        None => match static_server::asset(&format!("avatars/{}", DEFAULT_AVATAR)) {
            Some(bytes) => bytes.into_owned(),
            None => return Ok(ApiError::NotFound("Avatar not found".to_string()).into()),
        },
    };

    let png = thumbnail_png(&source, size, app.settings().max_avatar_side)?;
    Ok(Reply::png(png))
}
