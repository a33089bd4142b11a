//! `multipart/form-data` decoding for the profile form.
//!
//! Handlers are synchronous and the whole body is already in memory, so the
//! `multer` stream is a single chunk driven to completion with `block_on`.

use bytes::Bytes;
use futures::executor::block_on;
use futures::future::ready;
use futures::stream::once;
use multer::Multipart;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<FilePart>,
}

impl MultipartForm {
    /// The uploaded file for `field`, if the browser sent one with a filename.
    pub fn file(&self, field: &str) -> Option<&FilePart> {
        self.files
            .iter()
            .find(|f| f.field == field && !f.filename.is_empty())
    }
}

pub fn is_multipart(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("multipart/form-data"))
        .unwrap_or(false)
}

pub fn parse(body: &[u8], content_type: &str) -> Result<MultipartForm, multer::Error> {
    let boundary = multer::parse_boundary(content_type)?;
    let stream = once(ready(Ok::<_, std::io::Error>(Bytes::copy_from_slice(body))));
    block_on(collect(Multipart::new(stream, boundary)))
}

async fn collect(mut multipart: Multipart<'_>) -> Result<MultipartForm, multer::Error> {
    let mut form = MultipartForm::default();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field.content_type().map(|m| m.to_string());
                let data = field.bytes().await?;
                form.files.push(FilePart {
                    field: name,
                    filename,
                    content_type,
                    data: data.to_vec(),
                });
            }
            None => {
                let data = field.bytes().await?;
                form.fields
                    .insert(name, String::from_utf8_lossy(&data).into_owned());
            }
        }
    }
    Ok(form)
}
