//! Upload of base64-encoded input images.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::api::{ComfyUIApi, ComfyUIApiError};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid base64 image: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("image is empty")]
    Empty,

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),
}

/// Decode `encoded` and upload it to the engine's input folder.
///
/// Accepts plain base64 or a `data:<mime>;base64,` URI. Returns the
/// name a `LoadImage` node should reference. Nothing is sent when the
/// payload does not decode.
pub async fn upload_encoded(
    api: &ComfyUIApi,
    encoded: &str,
    filename: &str,
) -> Result<String, UploadError> {
    let bytes = decode_image(encoded)?;
    let content_type = sniff_content_type(&bytes);

    tracing::debug!(
        filename,
        content_type,
        size_bytes = bytes.len(),
        "Uploading input image",
    );

    let response = api.upload_image(bytes, filename, content_type).await?;
    Ok(response.image_path(filename))
}

/// Decode standard base64, tolerating a data-URI prefix and line breaks.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, UploadError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD.decode(compact)?;
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    Ok(bytes)
}

/// Content type for the multipart part, from the file's magic bytes.
fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}
