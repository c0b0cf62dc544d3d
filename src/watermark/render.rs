use super::fonts::{FontSet, FontSizes};
use super::layout::LayoutResult;
use super::luminance::text_color_for;
use image::RgbaImage;

/// Draw the measured lines right-aligned inside the padded block whose
/// top-left corner is `(origin_x, origin_y)`.
pub fn render(
    image: &mut RgbaImage,
    layout: &LayoutResult,
    fonts: &FontSet,
    sizes: FontSizes,
    origin: (i64, i64),
    padding: u32,
    brightness: f32,
) {
    let color = text_color_for(brightness);
    let (origin_x, origin_y) = origin;
    let mut cursor_y = origin_y + padding as i64;

    for line in &layout.lines {
        let line_x = origin_x + padding as i64 + (layout.max_line_width - line.width) as i64;
        fonts.face(line.role).draw_text(
            image,
            color,
            line_x as i32,
            cursor_y as i32,
            sizes.get(line.role),
            &line.content,
        );
        cursor_y += line.height as i64 + layout.line_gap as i64;
    }
}
