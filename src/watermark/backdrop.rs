use super::geometry::Region;
use image::{DynamicImage, GrayImage, Luma, Rgba, Rgba32FImage, RgbaImage, imageops};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::filter::gaussian_blur_f32;
use imageproc::rect::Rect;
use tracing::debug;

/// Frost the area behind `inner` and fade it out over `edge_softness` pixels.
///
/// The region `inner.expand(edge_softness)` is blurred and blended back through
/// a mask that is opaque over `inner` and softened by a blur of half the edge
/// width, so the panel has no hard border. Anything outside the image is
/// clipped.
pub fn apply_backdrop(image: &mut RgbaImage, inner: Region, blur_radius: f32, edge_softness: u32) {
    if inner.width == 0 || inner.height == 0 {
        return;
    }

    let outer = inner.expand(edge_softness);
    let Some(visible) = outer.clamp_to(image.width(), image.height()) else {
        debug!("Backdrop {:?} lies outside the image, skipping", outer);
        return;
    };

    let region = imageops::crop_imm(
        image,
        visible.x as u32,
        visible.y as u32,
        visible.width,
        visible.height,
    )
    .to_image();
    let blurred = blur(&region, blur_radius);
    let mask = soft_mask(inner.width, inner.height, edge_softness);

    let mask_dx = (visible.x - outer.x) as u32;
    let mask_dy = (visible.y - outer.y) as u32;

    for y in 0..visible.height {
        for x in 0..visible.width {
            let weight = mask.get_pixel(x + mask_dx, y + mask_dy)[0];
            if weight == 0 {
                continue;
            }
            let target = image.get_pixel_mut(visible.x as u32 + x, visible.y as u32 + y);
            *target = blend(blurred.get_pixel(x, y), target, weight);
        }
    }

    debug!(
        "Applied backdrop at {:?} (blur {}, softness {})",
        visible, blur_radius, edge_softness
    );
}

/// Mask covering `inner` plus `edge_softness` on each side: opaque over the
/// inner rectangle, blurred towards transparent at the border.
pub fn soft_mask(inner_width: u32, inner_height: u32, edge_softness: u32) -> GrayImage {
    let mut mask = GrayImage::new(
        inner_width + 2 * edge_softness,
        inner_height + 2 * edge_softness,
    );
    if inner_width == 0 || inner_height == 0 {
        return mask;
    }

    draw_filled_rect_mut(
        &mut mask,
        Rect::at(edge_softness as i32, edge_softness as i32).of_size(inner_width, inner_height),
        Luma([255u8]),
    );

    let sigma = edge_softness as f32 / 2.0;
    if sigma > 0.0 {
        gaussian_blur_f32(&mask, sigma)
    } else {
        mask
    }
}

/// Blurred in `f32` (channels in `0.0..=1.0`); a `u8` blur truncates each
/// pass and darkens flat areas.
fn blur(region: &RgbaImage, sigma: f32) -> Rgba32FImage {
    let float = DynamicImage::ImageRgba8(region.clone()).into_rgba32f();
    if sigma > 0.0 {
        gaussian_blur_f32(&float, sigma)
    } else {
        float
    }
}

fn blend(src: &Rgba<f32>, dst: &Rgba<u8>, weight: u8) -> Rgba<u8> {
    let w = weight as f32 / 255.0;
    let mut out = [0u8; 4];
    for (i, channel) in out.iter_mut().enumerate() {
        let value = src[i] * 255.0 * w + dst[i] as f32 * (1.0 - w);
        *channel = value.round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}
