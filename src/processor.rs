use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::ProcessError;
use crate::exif::{self, CaptureInfo};
use crate::formats::{self, OutputFormat, infer_jpeg_params};
use crate::geocode::Geocoder;
use crate::watermark::{FontSet, TextLine, WatermarkStyle, apply_watermark};
use crate::{Config, JpegConfig};

/// A finished image and what was stamped on it.
#[derive(Debug, Clone)]
pub struct WatermarkedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub timestamp: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Reads capture info, stamps it on the image and re-encodes it in the
/// source's format.
pub struct Watermarker {
    fonts: FontSet,
    style: WatermarkStyle,
    jpeg: JpegConfig,
    geocoder: Geocoder,
}

impl Watermarker {
    pub fn new(fonts: FontSet, style: WatermarkStyle, jpeg: JpegConfig, geocoder: Geocoder) -> Self {
        Self {
            fonts,
            style,
            jpeg,
            geocoder,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ProcessError> {
        let fonts = FontSet::load(&config.fonts.primary_path, &config.fonts.secondary_path)?;
        let geocoder = Geocoder::new(&config.geocode)?;
        if !geocoder.is_online() {
            info!("No geocoding API key configured, locations will be shown as coordinates");
        }
        Ok(Self::new(
            fonts,
            config.style.clone(),
            config.jpeg.clone(),
            geocoder,
        ))
    }

    /// Text lines for a photo: the timestamp, then the place name if the photo
    /// has GPS data.
    pub async fn caption(&self, info: &CaptureInfo) -> Result<Vec<TextLine>, ProcessError> {
        let timestamp = info
            .timestamp
            .clone()
            .ok_or(ProcessError::MissingTimestamp)?;

        let mut lines = vec![TextLine::primary(timestamp)];
        if let Some(coords) = info.coordinates {
            lines.push(TextLine::secondary(self.geocoder.describe(coords).await));
        }
        Ok(lines)
    }

    pub async fn process_bytes(&self, source: Vec<u8>) -> Result<WatermarkedImage, ProcessError> {
        let info = exif::read_capture_info(&source);
        let lines = self.caption(&info).await?;
        let timestamp = lines[0].content.clone();
        let location = lines.get(1).map(|l| l.content.clone());

        let fonts = self.fonts.clone();
        let style = self.style.clone();
        let jpeg = self.jpeg.clone();

        let (bytes, format) = tokio::task::spawn_blocking(move || {
            watermark_and_encode(&source, &lines, &fonts, &style, &jpeg)
        })
        .await??;

        Ok(WatermarkedImage {
            bytes,
            format,
            timestamp,
            location,
        })
    }

    /// Watermark `input` into `output_dir` under the same file name, with the
    /// extension corrected when the output format differs from it.
    pub async fn process_file(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, ProcessError> {
        let source = tokio::fs::read(input).await?;
        let result = self.process_bytes(source).await?;

        let file_name = input.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "input has no file name")
        })?;
        let output_path = output_dir.join(output_file_name(Path::new(file_name), result.format));

        tokio::fs::create_dir_all(output_dir).await?;
        tokio::fs::write(&output_path, &result.bytes).await?;

        info!(
            "Watermarked {} ({}{})",
            input.display(),
            result.timestamp,
            result
                .location
                .as_deref()
                .map(|l| format!(", {}", l))
                .unwrap_or_default()
        );
        Ok(output_path)
    }

    /// Watermark every image directly inside `input_dir`, at most
    /// `concurrency` at a time. Per-file failures are counted, not returned.
    pub async fn process_batch(
        self: &Arc<Self>,
        input_dir: &Path,
        output_dir: &Path,
        extensions: &[String],
        concurrency: usize,
    ) -> Result<BatchSummary, ProcessError> {
        let inputs = collect_images(input_dir, extensions)?;
        tokio::fs::create_dir_all(output_dir).await?;

        info!(
            "Processing {} images from {} with concurrency {}",
            inputs.len(),
            input_dir.display(),
            concurrency
        );
        let start_time = std::time::Instant::now();

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for input in &inputs {
            let watermarker = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let input = input.clone();
            let output_dir = output_dir.to_path_buf();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = watermarker.process_file(&input, &output_dir).await;
                if let Err(e) = &result {
                    warn!("Failed to process {}: {}", input.display(), e);
                }
                result.is_ok()
            });
        }

        let mut summary = BatchSummary {
            total: inputs.len(),
            ..Default::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => summary.processed += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    error!("Batch task panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Batch complete: {} processed, {} failed in {:.2}s",
            summary.processed,
            summary.failed,
            start_time.elapsed().as_secs_f64()
        );
        Ok(summary)
    }
}

/// Files directly inside `dir` whose extension (case-insensitive, with the
/// leading dot) is in `extensions`, sorted by path.
pub fn collect_images(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, ProcessError> {
    if !dir.is_dir() {
        return Err(ProcessError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("input directory not found: {}", dir.display()),
        )));
    }

    let mut images = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }

        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        if extensions.iter().any(|e| e.eq_ignore_ascii_case(&extension)) {
            images.push(path.to_path_buf());
        } else {
            debug!("Skipping {}", path.display());
        }
    }

    images.sort();
    Ok(images)
}

fn watermark_and_encode(
    source: &[u8],
    lines: &[TextLine],
    fonts: &FontSet,
    style: &WatermarkStyle,
    jpeg: &JpegConfig,
) -> Result<(Vec<u8>, OutputFormat), ProcessError> {
    let image: RgbaImage = image::load_from_memory(source)?.to_rgba8();
    let watermarked = apply_watermark(image, lines, fonts, style);

    let format = OutputFormat::for_source(source);
    let icc_profile = formats::extract_icc_profile(source);

    let bytes = match format {
        OutputFormat::Jpeg => {
            let settings = infer_jpeg_params(source).resolve(jpeg.default_quality, jpeg.default_subsampling);
            debug!(
                "Re-encoding with quality {}, {:?}",
                settings.quality, settings.subsampling
            );
            let exif_segment = formats::jpeg::extract_exif_segment(source);
            formats::jpeg::encode(
                &watermarked,
                settings,
                exif_segment.as_deref(),
                icc_profile.as_deref(),
            )?
        }
        OutputFormat::Png => formats::png::encode(&watermarked, icc_profile.as_deref())?,
    };

    Ok((bytes, format))
}

/// Keeps `name` when its extension already matches `format`.
fn output_file_name(name: &Path, format: OutputFormat) -> PathBuf {
    let extension = name
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let matches = match (format, extension.as_deref()) {
        (OutputFormat::Jpeg, Some("jpg" | "jpeg")) => true,
        (OutputFormat::Png, Some("png")) => true,
        _ => false,
    };

    let mut name = name.to_path_buf();
    if !matches {
        debug!("Renaming {} to .{}", name.display(), format.extension());
        name.set_extension(format.extension());
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::testing::{exif_payload, jpeg_with_exif};
    use crate::formats::ChromaSubsampling;
    use crate::watermark::testing::block_fonts;
    use tempfile::TempDir;

    fn test_watermarker() -> Watermarker {
        Watermarker::new(
            block_fonts(),
            WatermarkStyle::default(),
            JpegConfig::default(),
            Geocoder::offline(),
        )
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, image::Rgba([200, 200, 200, 255]));
        formats::png::encode(&image, None).unwrap()
    }

    #[tokio::test]
    async fn test_jpeg_keeps_format_and_exif() {
        let exif = exif_payload("2024:01:01 12:00:00", Some((31.2304, 121.4737)));
        let source = jpeg_with_exif(200, 150, &exif);

        let result = test_watermarker().process_bytes(source.clone()).await.unwrap();
        assert_eq!(result.format, OutputFormat::Jpeg);
        assert_eq!(result.timestamp, "2024-01-01  12:00:00");
        assert_eq!(result.location.as_deref(), Some("31.230400N 121.473700E"));

        assert_eq!(
            formats::jpeg::extract_exif_segment(&result.bytes),
            Some(exif)
        );
        let decoded = image::load_from_memory(&result.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 150));

        // Re-encoded with the settings inferred from the source
        let settings = infer_jpeg_params(&source).resolve(95, ChromaSubsampling::Full444);
        let reference = formats::jpeg::encode(&RgbaImage::new(8, 8), settings, None, None).unwrap();
        assert_eq!(infer_jpeg_params(&result.bytes), infer_jpeg_params(&reference));
    }

    #[test]
    fn test_output_file_name_follows_format() {
        let cases = [
            ("IMG_01.JPG", OutputFormat::Jpeg, "IMG_01.JPG"),
            ("scan.jpeg", OutputFormat::Jpeg, "scan.jpeg"),
            ("photo.png", OutputFormat::Jpeg, "photo.jpg"),
            ("mislabeled.jpg", OutputFormat::Png, "mislabeled.png"),
            ("shot.webp", OutputFormat::Png, "shot.png"),
            ("noext", OutputFormat::Png, "noext.png"),
        ];
        for (name, format, expected) in cases {
            assert_eq!(
                output_file_name(Path::new(name), format),
                PathBuf::from(expected)
            );
        }
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_an_error() {
        let result = test_watermarker().process_bytes(png_bytes(64, 64)).await;
        assert!(matches!(result, Err(ProcessError::MissingTimestamp)));
    }

    #[tokio::test]
    async fn test_caption_without_gps_has_one_line() {
        let info = CaptureInfo {
            timestamp: Some("2024-01-01  12:00:00".to_string()),
            coordinates: None,
        };
        let lines = test_watermarker().caption(&info).await.unwrap();
        assert_eq!(lines, vec![TextLine::primary("2024-01-01  12:00:00")]);
    }

    #[tokio::test]
    async fn test_undecodable_image_is_an_error() {
        // EXIF is readable but there is no image data behind it
        let exif = exif_payload("2024:01:01 12:00:00", None);
        let mut broken = vec![0xFF, 0xD8, 0xFF, 0xE1];
        broken.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
        broken.extend_from_slice(&exif);
        broken.extend_from_slice(&[0xFF, 0xD9]);
        let result = test_watermarker().process_bytes(broken).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_collect_images_filters_extensions() {
        let dir = TempDir::new().unwrap();
        for name in ["b.JPG", "a.jpeg", "c.png", "notes.txt", "noext"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let extensions = vec![".jpg".to_string(), ".jpeg".to_string(), ".png".to_string()];
        let found: Vec<String> = collect_images(dir.path(), &extensions)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(found, vec!["a.jpeg", "b.JPG", "c.png"]);
    }

    #[tokio::test]
    async fn test_batch_counts_failures() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let stamped = jpeg_with_exif(120, 90, &exif_payload("2023:06:15 08:30:00", None));
        std::fs::write(input.path().join("one.jpg"), &stamped).unwrap();
        std::fs::write(input.path().join("two.jpg"), &stamped).unwrap();
        std::fs::write(input.path().join("plain.png"), png_bytes(40, 40)).unwrap();

        let watermarker = Arc::new(test_watermarker());
        let extensions = crate::PathsConfig::default().image_extensions;
        let summary = watermarker
            .process_batch(input.path(), output.path(), &extensions, 2)
            .await
            .unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                total: 3,
                processed: 2,
                failed: 1
            }
        );
        assert!(output.path().join("one.jpg").exists());
        assert!(output.path().join("two.jpg").exists());
        assert!(!output.path().join("plain.png").exists());
    }
}
