use async_trait::async_trait;
use image::ImageFormat;
use reqwest::{Client, StatusCode};
use std::io::Cursor;
use std::time::Duration;

/// Source of raw image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches images over HTTP(S).
pub struct HttpImageFetcher {
    http: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Http)?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.http.get(url).send().await.map_err(FetchError::Http)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(FetchError::Http)?;
        tracing::debug!(image_url = %url, bytes = body.len(), "Downloaded image");
        Ok(body.to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to download image: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to download image: received status code {0}")]
    Status(u16),
}

/// A decoded image, re-encoded in its source format for storage.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub encoded: Vec<u8>,
}

impl DecodedImage {
    /// File extension used for artifact names.
    pub fn extension(&self) -> &'static str {
        extension_for(self.format).unwrap_or("bin")
    }

    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Extension for formats this service can persist.
pub fn extension_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::WebP => Some("webp"),
        _ => None,
    }
}

/// Decode raw bytes and re-encode them in the detected format.
///
/// CPU-bound; callers on the async runtime should run it via
/// `spawn_blocking`.
pub fn decode(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    let format = image::guess_format(bytes).map_err(DecodeError::Image)?;
    if extension_for(format).is_none() {
        return Err(DecodeError::UnsupportedFormat(format!("{format:?}")));
    }

    let img = image::load_from_memory_with_format(bytes, format).map_err(DecodeError::Image)?;

    let mut encoded = Cursor::new(Vec::new());
    img.write_to(&mut encoded, format)
        .map_err(DecodeError::Encode)?;

    Ok(DecodedImage {
        width: img.width(),
        height: img.height(),
        format,
        encoded: encoded.into_inner(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to decode image: {0}")]
    Image(image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(image::ImageError),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_reports_dimensions_and_format() {
        let decoded = decode(&png_bytes(10, 20)).unwrap();
        assert_eq!((decoded.width, decoded.height), (10, 20));
        assert_eq!(decoded.format, ImageFormat::Png);
        assert_eq!(decoded.extension(), "png");
        assert_eq!(decoded.content_type(), "image/png");
        assert!(!decoded.encoded.is_empty());
    }

    #[test]
    fn test_decode_jpeg() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 4));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();

        let decoded = decode(&out.into_inner()).unwrap();
        assert_eq!(decoded.extension(), "jpeg");
        assert_eq!((decoded.width, decoded.height), (8, 4));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"definitely not an image").unwrap_err();
        assert!(err.to_string().starts_with("failed to decode image"));
    }

    #[test]
    fn test_decode_rejects_truncated_png() {
        let mut bytes = png_bytes(4, 4);
        bytes.truncate(20);
        assert!(decode(&bytes).is_err());
    }
}
