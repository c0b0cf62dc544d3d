// Watermark engine - lays out the text block, frosts the panel behind it and draws the text
mod backdrop;
mod fonts;
mod geometry;
mod layout;
mod luminance;
mod render;

pub use backdrop::{apply_backdrop, soft_mask};
pub use fonts::{FontError, FontRole, FontSet, FontSizes, GlyphFont, TextFace};
pub use geometry::Region;
pub use layout::{LayoutResult, MeasuredLine, TextLine, line_gap, measure};
pub use luminance::{DARK_TEXT_THRESHOLD, average_brightness, text_color_for};
pub use render::render;

#[cfg(test)]
pub(crate) use fonts::testing;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Proportions of the watermark, all relative to the image's shortest side.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WatermarkStyle {
    pub primary_size_ratio: f32,
    pub secondary_size_ratio: f32,
    pub margin_ratio: f32,
    pub padding_ratio: f32,
    /// Line height multiplier; the gap between lines is
    /// `primary size * (line_spacing - 1)`.
    pub line_spacing: f32,
    /// Gaussian blur sigma for the frosted panel, in pixels.
    pub blur_radius: f32,
}

impl Default for WatermarkStyle {
    fn default() -> Self {
        Self {
            primary_size_ratio: 0.04,
            secondary_size_ratio: 0.03,
            margin_ratio: 0.02,
            padding_ratio: 0.01,
            line_spacing: 1.5,
            blur_radius: 10.0,
        }
    }
}

/// Where the watermark lands on a particular image.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkPlan {
    pub sizes: FontSizes,
    pub layout: LayoutResult,
    pub margin: u32,
    pub padding: u32,
    /// Text block including padding.
    pub block: Region,
}

impl WatermarkPlan {
    pub fn compute(
        width: u32,
        height: u32,
        lines: &[TextLine],
        fonts: &FontSet,
        style: &WatermarkStyle,
    ) -> Self {
        let base = width.min(height) as f32;
        let scaled = |ratio: f32| (ratio * base).round().max(0.0) as u32;

        let sizes = FontSizes {
            primary: scaled(style.primary_size_ratio),
            secondary: scaled(style.secondary_size_ratio),
        };
        let layout = measure(lines, fonts, sizes, style.line_spacing);
        let margin = scaled(style.margin_ratio);
        let padding = scaled(style.padding_ratio);

        let block_width = layout.max_line_width + 2 * padding;
        let block_height = layout.total_block_height + 2 * padding;
        // Small images can't fit the block; pin it to the top-left instead of
        // letting it go negative.
        let x = (width as i64 - block_width as i64 - margin as i64).max(0);
        let y = (height as i64 - block_height as i64 - margin as i64).max(0);

        Self {
            sizes,
            layout,
            margin,
            padding,
            block: Region::new(x, y, block_width, block_height),
        }
    }

    /// Width of the soft border around the block.
    pub fn edge_softness(&self) -> u32 {
        2 * self.padding
    }

    /// Region blurred and blended behind the text.
    pub fn backdrop_region(&self) -> Region {
        self.block.expand(self.edge_softness())
    }
}

/// Stamp `lines` onto the bottom-right corner of `image`.
///
/// Stages run in a fixed order: layout, backdrop, brightness sampling of the
/// finished backdrop, then text. When every line is empty the image comes back
/// untouched.
pub fn apply_watermark(
    mut image: RgbaImage,
    lines: &[TextLine],
    fonts: &FontSet,
    style: &WatermarkStyle,
) -> RgbaImage {
    let plan = WatermarkPlan::compute(image.width(), image.height(), lines, fonts, style);
    if plan.layout.is_empty() {
        debug!("No watermark text, leaving image unchanged");
        return image;
    }

    apply_backdrop(
        &mut image,
        plan.block,
        style.blur_radius,
        plan.edge_softness(),
    );

    let brightness = average_brightness(&image, plan.block);
    debug!(
        "Watermark block {:?}, brightness {:.1}, font sizes {:?}",
        plan.block, brightness, plan.sizes
    );

    render(
        &mut image,
        &plan.layout,
        fonts,
        plan.sizes,
        (plan.block.x, plan.block.y),
        plan.padding,
        brightness,
    );

    image
}
