pub mod jpeg;
pub mod png;
mod types;

pub use jpeg::{ChromaSubsampling, CompressionProfile, JpegSettings, infer_jpeg_params};
pub use types::OutputFormat;

/// ICC profile of a JPEG or PNG source, if it carries one.
pub fn extract_icc_profile(buffer: &[u8]) -> Option<Vec<u8>> {
    jpeg::extract_icc_profile(buffer).or_else(|| png::extract_icc_profile(buffer))
}
