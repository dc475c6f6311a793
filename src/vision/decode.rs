//! Inbound frame messages → RGB pixel buffers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

/// Why a message produced no frame. Never fatal to a stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame message: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame message has no image payload")]
    MissingImage,

    #[error("image payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("could not decode image: {0}")]
    UndecodableImage(#[from] image::ImageError),
}

#[derive(Debug, Deserialize)]
struct FrameMessage {
    image: Option<String>,
}

/// Strips an optional `data:<mime>;base64,` header.
fn payload_body(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, body)) => body,
        None => payload,
    }
}

/// Decodes `{"image": "<base64 or data URI>"}` into an RGB buffer with the
/// encoded image's dimensions.
pub fn decode_frame(message: &str) -> Result<RgbImage, FrameError> {
    let frame: FrameMessage = serde_json::from_str(message)?;
    let payload = frame.image.ok_or(FrameError::MissingImage)?;
    let body = payload_body(payload.trim());
    if body.is_empty() {
        return Err(FrameError::MissingImage);
    }

    let bytes = STANDARD.decode(body)?;
    let image = image::load_from_memory(&bytes)?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(image: &RgbImage) -> String {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        STANDARD.encode(bytes)
    }

    #[test]
    fn plain_base64_roundtrip_keeps_dimensions() {
        let source = RgbImage::from_pixel(64, 48, Rgb([10, 200, 30]));
        let message = serde_json::json!({ "image": encode_png(&source) }).to_string();

        let decoded = decode_frame(&message).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
        assert_eq!(decoded.get_pixel(5, 5), &Rgb([10, 200, 30]));
    }

    #[test]
    fn data_uri_header_is_stripped() {
        let source = RgbImage::from_pixel(17, 9, Rgb([0, 0, 0]));
        let uri = format!("data:image/png;base64,{}", encode_png(&source));
        let message = serde_json::json!({ "image": uri }).to_string();

        assert_eq!(decode_frame(&message).unwrap().dimensions(), (17, 9));
    }

    #[test]
    fn not_base64_is_a_no_frame_value() {
        let result = decode_frame(r#"{"image": "not-base64"}"#);
        assert!(matches!(result, Err(FrameError::InvalidBase64(_))));
    }

    #[test]
    fn valid_base64_of_non_image_is_rejected() {
        let message = serde_json::json!({ "image": STANDARD.encode(b"hello world") }).to_string();
        assert!(matches!(
            decode_frame(&message),
            Err(FrameError::UndecodableImage(_))
        ));
    }

    #[test]
    fn missing_or_empty_payload() {
        assert!(matches!(decode_frame("{}"), Err(FrameError::MissingImage)));
        assert!(matches!(
            decode_frame(r#"{"image": "data:image/png;base64,"}"#),
            Err(FrameError::MissingImage)
        ));
    }

    #[test]
    fn garbage_text_is_invalid_json() {
        assert!(matches!(
            decode_frame("definitely not json"),
            Err(FrameError::InvalidJson(_))
        ));
    }
}
