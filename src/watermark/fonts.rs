use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FontError {
    #[error("Failed to read font file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse font file {0:?}")]
    Parse(PathBuf),
}

/// Which font a line of text is set in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontRole {
    /// Capture timestamp.
    Primary,
    /// Location and any auxiliary text.
    Secondary,
}

/// A glyph rasterizer that can measure and draw a single line of text.
pub trait TextFace: Send + Sync {
    /// Width and height in pixels of `text` set at `size_px`.
    fn text_size(&self, size_px: u32, text: &str) -> (u32, u32);

    fn draw_text(
        &self,
        canvas: &mut RgbaImage,
        color: Rgba<u8>,
        x: i32,
        y: i32,
        size_px: u32,
        text: &str,
    );
}

/// A TrueType/OpenType face loaded from disk, rasterized through imageproc.
pub struct GlyphFont {
    font: FontVec,
}

impl GlyphFont {
    pub fn load(path: &Path) -> Result<Self, FontError> {
        let data = std::fs::read(path).map_err(|source| FontError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontVec::try_from_vec(data).map_err(|_| FontError::Parse(path.to_path_buf()))?;
        debug!("Loaded font {:?}", path);
        Ok(Self { font })
    }
}

impl TextFace for GlyphFont {
    fn text_size(&self, size_px: u32, text: &str) -> (u32, u32) {
        text_size(PxScale::from(size_px as f32), &self.font, text)
    }

    fn draw_text(
        &self,
        canvas: &mut RgbaImage,
        color: Rgba<u8>,
        x: i32,
        y: i32,
        size_px: u32,
        text: &str,
    ) {
        draw_text_mut(
            canvas,
            color,
            x,
            y,
            PxScale::from(size_px as f32),
            &self.font,
            text,
        );
    }
}

/// The pair of faces a watermark is set in, one per [`FontRole`].
#[derive(Clone)]
pub struct FontSet {
    primary: Arc<dyn TextFace>,
    secondary: Arc<dyn TextFace>,
}

impl FontSet {
    pub fn new(primary: Arc<dyn TextFace>, secondary: Arc<dyn TextFace>) -> Self {
        Self { primary, secondary }
    }

    /// Load both faces. A missing secondary face falls back to the primary one;
    /// a missing primary face is an error.
    pub fn load(primary_path: &Path, secondary_path: &Path) -> Result<Self, FontError> {
        let primary: Arc<dyn TextFace> = Arc::new(GlyphFont::load(primary_path)?);

        if secondary_path == primary_path {
            return Ok(Self::new(primary.clone(), primary));
        }

        let secondary: Arc<dyn TextFace> = match GlyphFont::load(secondary_path) {
            Ok(font) => Arc::new(font),
            Err(e) => {
                warn!("{}, using primary font for secondary lines", e);
                primary.clone()
            }
        };

        Ok(Self::new(primary, secondary))
    }

    pub fn face(&self, role: FontRole) -> &dyn TextFace {
        match role {
            FontRole::Primary => self.primary.as_ref(),
            FontRole::Secondary => self.secondary.as_ref(),
        }
    }
}

/// Resolved pixel sizes for each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontSizes {
    pub primary: u32,
    pub secondary: u32,
}

impl FontSizes {
    pub fn get(&self, role: FontRole) -> u32 {
        match role {
            FontRole::Primary => self.primary,
            FontRole::Secondary => self.secondary,
        }
    }
}
