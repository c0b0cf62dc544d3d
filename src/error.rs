use thiserror::Error;

use crate::geocode::GeocodeError;
use crate::watermark::FontError;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("JPEG encoding error: {0}")]
    JpegEncodeError(#[from] jpeg_encoder::EncodingError),

    #[error("Font error: {0}")]
    FontError(#[from] FontError),

    #[error("Geocoder setup failed: {0}")]
    GeocodeError(#[from] GeocodeError),

    #[error("No capture timestamp found in EXIF data")]
    MissingTimestamp,

    #[error("Image too large to encode as JPEG: {0}x{1}")]
    TooLarge(u32, u32),

    #[error("Processing task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}
