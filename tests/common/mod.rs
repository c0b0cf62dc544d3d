#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use photomark::{
    Config, JpegConfig,
    geocode::Geocoder,
    processor::Watermarker,
    watermark::{FontSet, TextFace, WatermarkStyle},
};
use std::sync::Arc;

/// Draws every character as a solid block so no font file is needed.
pub struct BlockFace;

impl TextFace for BlockFace {
    fn text_size(&self, size_px: u32, text: &str) -> (u32, u32) {
        if text.is_empty() {
            return (0, 0);
        }
        (size_px * 3 / 5 * text.chars().count() as u32, size_px)
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
        let (w, h) = self.text_size(size_px, text);
        for dy in 0..h as i32 {
            for dx in 0..w as i32 {
                let (px, py) = (x + dx, y + dy);
                if px >= 0 && py >= 0 && (px as u32) < canvas.width() && (py as u32) < canvas.height()
                {
                    canvas.put_pixel(px as u32, py as u32, color);
                }
            }
        }
    }
}

pub fn test_watermarker() -> Arc<Watermarker> {
    let face: Arc<dyn TextFace> = Arc::new(BlockFace);
    Arc::new(Watermarker::new(
        FontSet::new(face.clone(), face),
        WatermarkStyle::default(),
        JpegConfig::default(),
        Geocoder::offline(),
    ))
}

pub fn test_app(config: Config) -> axum::Router {
    photomark::create_app_with(config, test_watermarker())
}

/// `Exif\0\0` + little-endian TIFF with only DateTimeOriginal.
pub fn exif_payload(datetime: &str) -> Vec<u8> {
    let mut tiff = b"II*\0".to_vec();
    tiff.extend_from_slice(&8u32.to_le_bytes());

    // IFD0: one entry pointing at the Exif IFD (offset 26)
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x8769u16.to_le_bytes());
    tiff.extend_from_slice(&4u16.to_le_bytes());
    tiff.extend_from_slice(&1u32.to_le_bytes());
    tiff.extend_from_slice(&26u32.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());

    // Exif IFD: DateTimeOriginal stored at offset 44
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x9003u16.to_le_bytes());
    tiff.extend_from_slice(&2u16.to_le_bytes());
    tiff.extend_from_slice(&20u32.to_le_bytes());
    tiff.extend_from_slice(&44u32.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());

    let mut stamp = datetime.as_bytes().to_vec();
    stamp.resize(19, b' ');
    stamp.push(0);
    tiff.extend_from_slice(&stamp);

    let mut payload = b"Exif\0\0".to_vec();
    payload.extend(tiff);
    payload
}

pub fn stamped_jpeg(width: u16, height: u16, datetime: &str) -> Vec<u8> {
    let pixels: Vec<u8> = (0..width as u32 * height as u32)
        .flat_map(|i| {
            let v = (i * 7 % 256) as u8;
            [v, v / 2, 255 - v, 255]
        })
        .collect();
    let mut output = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut output, 90);
    encoder.add_app_segment(1, &exif_payload(datetime)).unwrap();
    encoder
        .encode(&pixels, width, height, jpeg_encoder::ColorType::Rgba)
        .unwrap();
    output
}

pub fn plain_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([90, 120, 150, 255]));
    photomark::formats::png::encode(&image, None).unwrap()
}
