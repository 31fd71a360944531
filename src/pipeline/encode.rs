//! Image encoding: raw file bytes → base64 data URI.
//!
//! Chat-completions APIs accept images inline as `data:<mime>;base64,<…>`
//! URLs inside the JSON request body. The file is sent exactly as stored on
//! disk; it is not decoded or re-encoded, so what the model sees is
//! byte-for-byte what the user pointed at.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A base64-encoded image ready to embed in a vision request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    /// Base64 payload (standard alphabet, padded).
    pub data: String,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
}

impl ImageData {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Render as a `data:` URI.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Encode raw image file bytes for transport.
///
/// The MIME type is sniffed from the magic bytes; anything unrecognised is
/// labelled `image/png`.
pub fn encode_image(bytes: &[u8]) -> ImageData {
    let mime = image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/png");

    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} bytes ({}) → {} bytes base64", bytes.len(), mime, b64.len());

    ImageData::new(b64, mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("encode should succeed");
        buf
    }

    #[test]
    fn encode_png_bytes() {
        let bytes = png_bytes();
        let data = encode_image(&bytes);
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn unknown_bytes_fall_back_to_png() {
        let data = encode_image(b"hello");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(data.data, "aGVsbG8=");
    }

    #[test]
    fn data_uri_format() {
        let data = ImageData::new("QUJD", "image/png");
        assert_eq!(data.to_data_uri(), "data:image/png;base64,QUJD");
    }
}
