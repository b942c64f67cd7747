//! Image dimension extraction.
//!
//! Only JPEG and PNG payloads are accepted. The full image is decoded rather
//! than just the header so truncated or corrupt files are rejected before
//! they reach object storage.

use bytes::Bytes;
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::{debug, warn};

/// Width and height of a decoded image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Decode `data` and return its dimensions.
///
/// Returns `None` for anything that is not a decodable JPEG or PNG. This is
/// CPU-bound; async callers go through [`decode_dimensions_blocking`].
pub fn decode_dimensions(data: &[u8]) -> Option<Dimensions> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?;

    match reader.format() {
        Some(ImageFormat::Jpeg) | Some(ImageFormat::Png) => {}
        other => {
            debug!(format = ?other, "Unsupported or unrecognized image format");
            return None;
        }
    }

    match reader.decode() {
        Ok(img) => Some(Dimensions {
            width: img.width(),
            height: img.height(),
        }),
        Err(e) => {
            debug!(error = %e, "Image decode failed");
            None
        }
    }
}

/// Run [`decode_dimensions`] on the blocking thread pool so the async
/// scheduler keeps serving queue and network I/O.
pub async fn decode_dimensions_blocking(data: Bytes) -> Option<Dimensions> {
    match tokio::task::spawn_blocking(move || decode_dimensions(&data)).await {
        Ok(dims) => dims,
        Err(e) => {
            warn!(error = %e, "Decode task did not complete");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;

    #[test]
    fn test_decode_jpeg_dimensions() {
        let data = fixtures::jpeg(800, 600);
        assert_eq!(
            decode_dimensions(&data),
            Some(Dimensions {
                width: 800,
                height: 600
            })
        );
    }

    #[test]
    fn test_decode_png_dimensions() {
        let data = fixtures::png(31, 17);
        assert_eq!(
            decode_dimensions(&data),
            Some(Dimensions {
                width: 31,
                height: 17
            })
        );
    }

    #[test]
    fn test_random_bytes_rejected() {
        assert_eq!(decode_dimensions(&fixtures::noise(4096)), None);
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert_eq!(decode_dimensions(&[]), None);
    }

    #[test]
    fn test_text_payload_rejected() {
        assert_eq!(decode_dimensions(b"just some notes, not a picture\n"), None);
    }

    #[test]
    fn test_truncated_png_rejected() {
        let data = fixtures::png(64, 64);
        // Signature and IHDR survive, pixel data does not.
        assert_eq!(decode_dimensions(&data[..40]), None);
    }

    #[test]
    fn test_jpeg_magic_with_garbage_body_rejected() {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend(fixtures::noise(512));
        assert_eq!(decode_dimensions(&data), None);
    }

    #[tokio::test]
    async fn test_blocking_dispatch() {
        let data = Bytes::from(fixtures::png(10, 20));
        assert_eq!(
            decode_dimensions_blocking(data).await,
            Some(Dimensions {
                width: 10,
                height: 20
            })
        );
        assert_eq!(
            decode_dimensions_blocking(Bytes::from_static(b"nope")).await,
            None
        );
    }
}
