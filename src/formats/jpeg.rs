use image::RgbaImage;
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::ProcessError;

/// JPEG marker codes used while walking the header segments.
pub mod markers {
    pub const SOI: u8 = 0xD8; // Start of Image
    pub const EOI: u8 = 0xD9; // End of Image
    pub const SOS: u8 = 0xDA; // Start of Scan
    pub const DQT: u8 = 0xDB; // Define Quantization Table
    pub const APP1: u8 = 0xE1; // EXIF
    pub const APP2: u8 = 0xE2; // ICC profile
}

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const ICC_HEADER: &[u8] = b"ICC_PROFILE\0";

/// A marker segment from the JPEG header; `data` excludes the length bytes.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub marker: u8,
    pub data: &'a [u8],
}

/// Collect the header segments of a JPEG stream, stopping at the first scan.
/// Returns an empty list for anything that doesn't start with SOI.
pub fn header_segments(buffer: &[u8]) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    if buffer.len() < 4 || buffer[0] != 0xFF || buffer[1] != markers::SOI {
        return segments;
    }

    let mut pos = 2;
    while pos + 4 <= buffer.len() {
        if buffer[pos] != 0xFF {
            pos += 1;
            continue;
        }

        let marker = buffer[pos + 1];
        match marker {
            // Fill byte
            0xFF => {
                pos += 1;
                continue;
            }
            // Markers without a payload
            0x01 | 0xD0..=0xD7 | markers::SOI => {
                pos += 2;
                continue;
            }
            markers::EOI => break,
            _ => {}
        }

        let length = u16::from_be_bytes([buffer[pos + 2], buffer[pos + 3]]) as usize;
        if length < 2 || pos + 2 + length > buffer.len() {
            debug!("Truncated JPEG segment 0x{:02X} at {}", marker, pos);
            break;
        }

        segments.push(Segment {
            marker,
            data: &buffer[pos + 4..pos + 2 + length],
        });

        if marker == markers::SOS {
            break;
        }
        pos += 2 + length;
    }

    segments
}

/// A JPEG quantization table (64 entries, zigzag order as stored).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizationTable {
    /// Table ID (0-3).
    pub id: u8,
    /// Precision: 0 = 8-bit, 1 = 16-bit.
    pub precision: u8,
    pub values: Vec<u16>,
}

/// Parse every DQT table in the header. A table redefined under the same ID
/// replaces the earlier one.
pub fn parse_quantization_tables(buffer: &[u8]) -> Vec<QuantizationTable> {
    let mut tables = BTreeMap::new();

    for segment in header_segments(buffer)
        .into_iter()
        .filter(|s| s.marker == markers::DQT)
    {
        let data = segment.data;
        let mut pos = 0;
        while pos < data.len() {
            let pq_tq = data[pos];
            let precision = (pq_tq >> 4) & 0x0F;
            let id = pq_tq & 0x0F;
            pos += 1;

            let entry_size = if precision == 0 { 1 } else { 2 };
            let table_len = 64 * entry_size;
            if pos + table_len > data.len() {
                debug!("Truncated quantization table {}", id);
                break;
            }

            let values = data[pos..pos + table_len]
                .chunks(entry_size)
                .map(|chunk| match chunk {
                    [v] => *v as u16,
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                    _ => 0,
                })
                .collect();
            pos += table_len;

            tables.insert(
                id,
                QuantizationTable {
                    id,
                    precision,
                    values,
                },
            );
        }
    }

    tables.into_values().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChromaSubsampling {
    /// 4:4:4, chroma at full resolution.
    #[serde(rename = "444")]
    Full444,
    /// 4:2:0, chroma halved in both directions.
    #[serde(rename = "420")]
    Half420,
}

impl ChromaSubsampling {
    pub fn sampling_factor(&self) -> SamplingFactor {
        match self {
            ChromaSubsampling::Full444 => SamplingFactor::F_1_1,
            ChromaSubsampling::Half420 => SamplingFactor::F_2_2,
        }
    }
}

/// Accepts `"444"`/`"4:4:4"` and `"420"`/`"4:2:0"`, plus the numeric
/// subsampling codes `0` (4:4:4) and `2` (4:2:0) used by imaging libraries.
impl std::str::FromStr for ChromaSubsampling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" | "444" | "4:4:4" => Ok(ChromaSubsampling::Full444),
            "2" | "420" | "4:2:0" => Ok(ChromaSubsampling::Half420),
            other => Err(format!("unsupported chroma subsampling: {}", other)),
        }
    }
}

/// Best-effort guess at how the source JPEG was compressed. Either field is
/// `None` when it can't be inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionProfile {
    pub quality: Option<u8>,
    pub chroma_subsampling: Option<ChromaSubsampling>,
}

impl CompressionProfile {
    pub fn is_empty(&self) -> bool {
        self.quality.is_none() && self.chroma_subsampling.is_none()
    }

    /// Fill gaps with the given defaults.
    pub fn resolve(&self, default_quality: u8, default_subsampling: ChromaSubsampling) -> JpegSettings {
        JpegSettings {
            quality: self.quality.unwrap_or(default_quality),
            subsampling: self.chroma_subsampling.unwrap_or(default_subsampling),
        }
    }
}

/// Concrete parameters handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegSettings {
    pub quality: u8,
    pub subsampling: ChromaSubsampling,
}

/// Estimate quality and chroma subsampling from the quantization tables.
///
/// Two or more tables means separate chroma tables and is read as 4:2:0, one
/// table as 4:4:4. Quality is `100 - mean(entries) / 2`, clamped to 1..=100.
/// Both are heuristics, not an inverse of any particular encoder.
pub fn infer_jpeg_params(buffer: &[u8]) -> CompressionProfile {
    let tables = parse_quantization_tables(buffer);
    if tables.is_empty() {
        return CompressionProfile::default();
    }

    let chroma_subsampling = if tables.len() >= 2 {
        ChromaSubsampling::Half420
    } else {
        ChromaSubsampling::Full444
    };

    let sum: u64 = tables
        .iter()
        .flat_map(|t| t.values.iter())
        .map(|&v| v as u64)
        .sum();
    let count: usize = tables.iter().map(|t| t.values.len()).sum();
    let mean = sum as f64 / count as f64;
    let quality = (100.0 - mean / 2.0).trunc().clamp(1.0, 100.0) as u8;

    debug!(
        "Inferred JPEG quality {} with {:?} from {} tables",
        quality,
        chroma_subsampling,
        tables.len()
    );

    CompressionProfile {
        quality: Some(quality),
        chroma_subsampling: Some(chroma_subsampling),
    }
}

/// Raw EXIF payload (starting with `Exif\0\0`) from the APP1 segment.
pub fn extract_exif_segment(buffer: &[u8]) -> Option<Vec<u8>> {
    header_segments(buffer)
        .into_iter()
        .find(|s| s.marker == markers::APP1 && s.data.starts_with(EXIF_HEADER))
        .map(|s| s.data.to_vec())
}

/// Extract the ICC profile from APP2 segments, joining multi-chunk profiles
/// in sequence order.
pub fn extract_icc_profile(buffer: &[u8]) -> Option<Vec<u8>> {
    let mut chunks: Vec<(u8, &[u8])> = header_segments(buffer)
        .into_iter()
        .filter(|s| s.marker == markers::APP2 && s.data.starts_with(ICC_HEADER))
        // ICC profile data starts after the identifier and 2 sequence bytes
        .filter(|s| s.data.len() > ICC_HEADER.len() + 2)
        .map(|s| (s.data[ICC_HEADER.len()], &s.data[ICC_HEADER.len() + 2..]))
        .collect();

    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|(seq, _)| *seq);

    let profile: Vec<u8> = chunks.into_iter().flat_map(|(_, d)| d.iter().copied()).collect();
    debug!("Found ICC profile in JPEG: {} bytes", profile.len());
    Some(profile)
}

/// Encode as JPEG, carrying over the source EXIF and ICC data when present.
pub fn encode(
    image: &RgbaImage,
    settings: JpegSettings,
    exif: Option<&[u8]>,
    icc_profile: Option<&[u8]>,
) -> Result<Vec<u8>, ProcessError> {
    let (width, height) = image.dimensions();
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(ProcessError::TooLarge(width, height));
    };

    let mut output = Vec::new();
    let mut encoder = Encoder::new(&mut output, settings.quality);
    encoder.set_sampling_factor(settings.subsampling.sampling_factor());

    if let Some(profile_data) = icc_profile
        && let Err(e) = encoder.add_icc_profile(profile_data)
    {
        warn!("Failed to embed ICC profile ({}), writing JPEG without it", e);
    }

    if let Some(exif_data) = exif
        && let Err(e) = encoder.add_app_segment(1, exif_data)
    {
        warn!("Failed to embed EXIF segment ({}), writing JPEG without it", e);
    }

    // Alpha is dropped by the encoder
    encoder.encode(image.as_raw(), w, h, ColorType::Rgba)?;

    debug!(
        "JPEG written: {}x{}, quality {}, {:?}, {} bytes",
        width,
        height,
        settings.quality,
        settings.subsampling,
        output.len()
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const LUMA_Q50: [u8; 64] = [
        16, 11, 10, 16, 24, 40, 51, 61, 12, 12, 14, 19, 26, 58, 60, 55, 14, 13, 16, 24, 40, 57,
        69, 56, 14, 17, 22, 29, 51, 87, 80, 62, 18, 22, 37, 56, 68, 109, 103, 77, 24, 35, 55, 64,
        81, 104, 113, 92, 49, 64, 78, 87, 103, 121, 120, 101, 72, 92, 95, 98, 112, 100, 103, 99,
    ];

    const CHROMA_Q50: [u8; 64] = [
        17, 18, 24, 47, 99, 99, 99, 99, 18, 21, 26, 66, 99, 99, 99, 99, 24, 26, 56, 99, 99, 99,
        99, 99, 47, 66, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
        99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    ];

    fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn dqt(id: u8, values: &[u8; 64]) -> Vec<u8> {
        let mut payload = vec![id];
        payload.extend_from_slice(values);
        segment(markers::DQT, &payload)
    }

    fn jpeg_header(segments: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![0xFF, markers::SOI];
        for s in segments {
            out.extend_from_slice(s);
        }
        out.extend_from_slice(&[0xFF, markers::EOI]);
        out
    }

    fn encoded_sample(quality: u8) -> Vec<u8> {
        let image = RgbaImage::from_fn(64, 48, |x, y| {
            Rgba([(x * 4) as u8, (y * 5) as u8, ((x + y) * 2) as u8, 255])
        });
        let mut output = Vec::new();
        let encoder = Encoder::new(&mut output, quality);
        encoder
            .encode(image.as_raw(), 64, 48, ColorType::Rgba)
            .unwrap();
        output
    }

    #[test]
    fn test_standard_tables_infer_quality_64_and_420() {
        let bytes = jpeg_header(&[dqt(0, &LUMA_Q50), dqt(1, &CHROMA_Q50)]);
        let profile = infer_jpeg_params(&bytes);
        assert_eq!(profile.quality, Some(64));
        assert_eq!(profile.chroma_subsampling, Some(ChromaSubsampling::Half420));
    }

    #[test]
    fn test_single_table_infers_444() {
        let bytes = jpeg_header(&[dqt(0, &LUMA_Q50)]);
        let profile = infer_jpeg_params(&bytes);
        assert_eq!(profile.quality, Some(71));
        assert_eq!(profile.chroma_subsampling, Some(ChromaSubsampling::Full444));
    }

    #[test]
    fn test_tables_in_one_segment() {
        let mut payload = vec![0u8];
        payload.extend_from_slice(&LUMA_Q50);
        payload.push(1);
        payload.extend_from_slice(&CHROMA_Q50);
        let bytes = jpeg_header(&[segment(markers::DQT, &payload)]);

        let tables = parse_quantization_tables(&bytes);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].id, 0);
        assert_eq!(tables[1].values[0], 17);
        assert_eq!(infer_jpeg_params(&bytes).quality, Some(64));
    }

    #[test]
    fn test_redefined_table_counts_once() {
        let bytes = jpeg_header(&[dqt(0, &CHROMA_Q50), dqt(0, &LUMA_Q50)]);
        let tables = parse_quantization_tables(&bytes);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].values[0], 16);
    }

    #[test]
    fn test_sixteen_bit_tables() {
        let mut payload = vec![0x10u8];
        for _ in 0..64 {
            payload.extend_from_slice(&1000u16.to_be_bytes());
        }
        let bytes = jpeg_header(&[segment(markers::DQT, &payload)]);
        let tables = parse_quantization_tables(&bytes);
        assert_eq!(tables[0].precision, 1);
        assert_eq!(tables[0].values, vec![1000u16; 64]);
        // Very coarse tables clamp at the bottom
        assert_eq!(infer_jpeg_params(&bytes).quality, Some(1));
    }

    #[test]
    fn test_quality_at_top_of_range() {
        let bytes = jpeg_header(&[dqt(0, &[1u8; 64])]);
        assert_eq!(infer_jpeg_params(&bytes).quality, Some(99));

        // An all-zero table maps to exactly 100, never above
        let bytes = jpeg_header(&[dqt(0, &[0u8; 64])]);
        assert_eq!(infer_jpeg_params(&bytes).quality, Some(100));
    }

    #[test]
    fn test_subsampling_from_str() {
        for value in ["0", "444", "4:4:4"] {
            assert_eq!(value.parse::<ChromaSubsampling>(), Ok(ChromaSubsampling::Full444));
        }
        for value in ["2", "420", " 4:2:0 "] {
            assert_eq!(value.parse::<ChromaSubsampling>(), Ok(ChromaSubsampling::Half420));
        }
        assert!("1".parse::<ChromaSubsampling>().is_err());
    }

    #[test]
    fn test_non_jpeg_yields_empty_profile() {
        assert!(infer_jpeg_params(b"\x89PNG\r\n\x1a\n").is_empty());
        assert!(infer_jpeg_params(&[]).is_empty());
        // JPEG without any DQT segment
        assert!(infer_jpeg_params(&jpeg_header(&[])).is_empty());
    }

    #[test]
    fn test_inference_is_deterministic() {
        let bytes = encoded_sample(80);
        let first = infer_jpeg_params(&bytes);
        for _ in 0..5 {
            assert_eq!(infer_jpeg_params(&bytes), first);
        }
        let quality = first.quality.unwrap();
        assert!((1..=100).contains(&quality));
        assert_eq!(first.chroma_subsampling, Some(ChromaSubsampling::Half420));
    }

    #[test]
    fn test_higher_encoder_quality_infers_higher() {
        let low = infer_jpeg_params(&encoded_sample(30));
        let high = infer_jpeg_params(&encoded_sample(95));
        assert!(high.quality > low.quality);
    }

    #[test]
    fn test_resolve_uses_defaults_for_gaps() {
        let empty = CompressionProfile::default();
        assert_eq!(
            empty.resolve(95, ChromaSubsampling::Full444),
            JpegSettings {
                quality: 95,
                subsampling: ChromaSubsampling::Full444
            }
        );

        let inferred = CompressionProfile {
            quality: Some(70),
            chroma_subsampling: Some(ChromaSubsampling::Half420),
        };
        assert_eq!(
            inferred.resolve(95, ChromaSubsampling::Full444),
            JpegSettings {
                quality: 70,
                subsampling: ChromaSubsampling::Half420
            }
        );
    }

    #[test]
    fn test_extract_exif_segment() {
        let mut exif = EXIF_HEADER.to_vec();
        exif.extend_from_slice(b"II*\0\x08\0\0\0");
        let bytes = jpeg_header(&[segment(markers::APP1, &exif), dqt(0, &LUMA_Q50)]);
        assert_eq!(extract_exif_segment(&bytes), Some(exif));

        // XMP also lives in APP1 and must not be mistaken for EXIF
        let xmp = jpeg_header(&[segment(markers::APP1, b"http://ns.adobe.com/xap/1.0/\0")]);
        assert_eq!(extract_exif_segment(&xmp), None);
    }

    #[test]
    fn test_extract_multi_chunk_icc_profile() {
        let mut second = ICC_HEADER.to_vec();
        second.extend_from_slice(&[2, 2]);
        second.extend_from_slice(b"world");
        let mut first = ICC_HEADER.to_vec();
        first.extend_from_slice(&[1, 2]);
        first.extend_from_slice(b"hello ");

        let bytes = jpeg_header(&[
            segment(markers::APP2, &second),
            segment(markers::APP2, &first),
        ]);
        assert_eq!(extract_icc_profile(&bytes), Some(b"hello world".to_vec()));
        assert_eq!(extract_icc_profile(&jpeg_header(&[])), None);
    }

    #[test]
    fn test_truncated_segment_stops_walk() {
        let mut bytes = vec![0xFF, markers::SOI, 0xFF, markers::DQT, 0x00, 0x50];
        bytes.extend_from_slice(&[0u8; 10]);
        assert!(header_segments(&bytes).is_empty());
        assert!(infer_jpeg_params(&bytes).is_empty());
    }

    #[test]
    fn test_encode_roundtrip_preserves_settings_and_exif() {
        let image = RgbaImage::from_pixel(40, 30, Rgba([10, 200, 30, 255]));
        let mut exif = EXIF_HEADER.to_vec();
        exif.extend_from_slice(b"MM\0*\0\0\0\x08\0\0");

        let settings = JpegSettings {
            quality: 90,
            subsampling: ChromaSubsampling::Full444,
        };
        let bytes = encode(&image, settings, Some(&exif), None).unwrap();

        assert_eq!(&bytes[0..2], &[0xFF, markers::SOI]);
        assert_eq!(extract_exif_segment(&bytes), Some(exif));

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_encode_rejects_oversized_image() {
        let image = RgbaImage::new(70_000, 1);
        let settings = JpegSettings {
            quality: 90,
            subsampling: ChromaSubsampling::Half420,
        };
        assert!(matches!(
            encode(&image, settings, None, None),
            Err(ProcessError::TooLarge(70_000, 1))
        ));
    }
}
