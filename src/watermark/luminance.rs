use super::geometry::Region;
use image::{DynamicImage, Rgba, RgbaImage, imageops};

/// Brightness above which text is drawn black instead of white.
pub const DARK_TEXT_THRESHOLD: f32 = 128.0;

/// Mean luma (0-255) of `region`. Only the part inside the image is sampled;
/// an empty sample yields 0.
pub fn average_brightness(image: &RgbaImage, region: Region) -> f32 {
    let Some(visible) = region.clamp_to(image.width(), image.height()) else {
        return 0.0;
    };

    let crop = imageops::crop_imm(
        image,
        visible.x as u32,
        visible.y as u32,
        visible.width,
        visible.height,
    )
    .to_image();
    let luma = DynamicImage::ImageRgba8(crop).to_luma8();

    let total: u64 = luma.pixels().map(|p| p[0] as u64).sum();
    let count = luma.pixels().len() as u64;
    if count == 0 {
        return 0.0;
    }
    total as f32 / count as f32
}

/// Black text on bright backgrounds, white otherwise.
pub fn text_color_for(brightness: f32) -> Rgba<u8> {
    if brightness > DARK_TEXT_THRESHOLD {
        Rgba([0, 0, 0, 255])
    } else {
        Rgba([255, 255, 255, 255])
    }
}
