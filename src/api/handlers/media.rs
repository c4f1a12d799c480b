//! Image uploads attached to messages.
//!
//! Large images are re-encoded as JPEG before they are stored. Blobs are
//! addressed by an opaque key, the base64url form of their storage path.

use anyhow::Context;
use axum::{
    Json,
    extract::{Extension, Multipart, Path},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

use super::auth::require_auth;
use crate::api::{
    blobs::{content_type_for, decode_key, encode_key, extension_of, file_name_of},
    error::{ApiError, MessageResponse},
    state::AppState,
};

const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const JPEG_QUALITY: u8 = 60;

/// Multipart body of an upload.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct MediaUpload {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct MediaKey {
    pub key: String,
}

fn too_large() -> ApiError {
    ApiError::PayloadTooLarge("File too large".to_string())
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large()
    } else {
        ApiError::validation(err.body_text())
    }
}

/// Re-encode an image as JPEG and swap the file extension accordingly.
fn compress(filename: &str, bytes: &[u8]) -> anyhow::Result<(String, Vec<u8>)> {
    let image = image::load_from_memory(bytes).context("failed to decode image")?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&image.to_rgb8())
        .context("failed to encode jpeg")?;

    let stem = filename
        .rsplit_once('.')
        .map_or(filename, |(stem, _)| stem);
    Ok((format!("{stem}.jpg"), out))
}

#[utoipa::path(
    put,
    path = "/v1/media",
    request_body(content = MediaUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Image stored", body = MediaKey),
        (status = 400, description = "Missing file or unsupported extension", body = MessageResponse),
        (status = 413, description = "File too large", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag = "media"
)]
#[instrument(skip(state, headers, multipart))]
pub async fn upload(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let config = state.config();

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::validation("Missing file name"))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = upload.ok_or_else(|| ApiError::validation("Missing field: file"))?;

    if !extension_of(&filename).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str())) {
        return Err(ApiError::validation("Only jpg, jpeg and png files are allowed"));
    }
    if bytes.len() > config.max_upload_bytes() {
        return Err(too_large());
    }

    let (filename, bytes) = if bytes.len() > config.compress_above_bytes() {
        debug!(size = bytes.len(), "compressing upload");
        tokio::task::spawn_blocking(move || compress(&filename, &bytes))
            .await
            .context("compression task failed")?
            .map_err(|err| ApiError::validation(format!("Unreadable image: {err}")))?
    } else {
        (filename, bytes.to_vec())
    };

    let size = bytes.len();
    let path = state
        .blobs()
        .put(principal.account_id, &filename, bytes)
        .await?;

    info!(owner_id = %principal.account_id, size, "media stored");
    Ok((
        StatusCode::CREATED,
        Json(MediaKey {
            key: encode_key(&path),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/media/{key}",
    params(("key" = String, Path, description = "Key returned by the upload")),
    responses(
        (status = 200, description = "Image bytes", content_type = "application/octet-stream"),
        (status = 404, description = "Unknown key", body = MessageResponse),
    ),
    tag = "media"
)]
pub async fn fetch(
    Path(key): Path<String>,
    state: Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::not_found("Not Found");
    let path = decode_key(&key).ok_or_else(not_found)?;
    let bytes = state.blobs().get(&path).await?.ok_or_else(not_found)?;
    let content_type = file_name_of(&path).map_or("application/octet-stream", |name| {
        content_type_for(&name)
    });

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png() -> Vec<u8> {
        let image = RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .expect("png encodes");
        out.into_inner()
    }

    #[test]
    fn compress_reencodes_as_jpeg() {
        let (name, bytes) = compress("holiday.photo.png", &png()).expect("compresses");
        assert_eq!(name, "holiday.photo.jpg");
        assert_eq!(
            image::guess_format(&bytes).expect("format"),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn compress_rejects_garbage() {
        assert!(compress("x.png", b"not an image").is_err());
    }
}
