//! Image encoding: `DynamicImage` → PNG bytes → base64 for the API response.
//!
//! PNG is lossless, so the fine print of a rasterised bill stays readable
//! when a reviewer compares the extracted numbers with the page image.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} page → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Base64-encode PNG bytes for transport inside JSON.
pub fn to_base64(png: &[u8]) -> String {
    STANDARD.encode(png)
}
