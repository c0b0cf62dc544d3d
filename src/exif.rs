use chrono::NaiveDateTime;
use rexif::{ExifData, ExifTag, TagValue};
use tracing::{debug, trace};

/// Display format of the stamped timestamp (two spaces between date and time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d  %H:%M:%S";

/// Signed decimal-degree position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// `31.230400N 121.473700E` style, hemisphere letters instead of signs.
    pub fn formatted(&self) -> String {
        format!(
            "{:.6}{} {:.6}{}",
            self.latitude.abs(),
            if self.latitude < 0.0 { 'S' } else { 'N' },
            self.longitude.abs(),
            if self.longitude < 0.0 { 'W' } else { 'E' },
        )
    }
}

/// What the watermark needs from a photo's EXIF block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureInfo {
    /// Capture time, already formatted with [`TIMESTAMP_FORMAT`].
    pub timestamp: Option<String>,
    pub coordinates: Option<Coordinates>,
}

/// Read capture time and GPS position from an encoded image. Images without
/// EXIF yield an empty [`CaptureInfo`].
pub fn read_capture_info(buffer: &[u8]) -> CaptureInfo {
    match rexif::parse_buffer(buffer) {
        Ok(exif) => CaptureInfo {
            timestamp: extract_timestamp(&exif),
            coordinates: extract_coordinates(&exif),
        },
        Err(e) => {
            trace!("No EXIF data: {}", e);
            CaptureInfo::default()
        }
    }
}

fn extract_timestamp(exif: &ExifData) -> Option<String> {
    // Try different date fields in order of preference
    let date_fields = [
        ExifTag::DateTimeOriginal,
        ExifTag::DateTimeDigitized,
        ExifTag::DateTime,
    ];

    for field in &date_fields {
        if let Some(entry) = exif.entries.iter().find(|e| e.tag == *field)
            && let Some(formatted) = format_exif_datetime(&ascii_value(&entry.value))
        {
            debug!("Found capture date in {:?}: {}", field, formatted);
            return Some(formatted);
        }
    }

    None
}

/// Reformat EXIF `YYYY:MM:DD HH:MM:SS` for display.
pub fn format_exif_datetime(raw: &str) -> Option<String> {
    let raw = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
}

fn extract_coordinates(exif: &ExifData) -> Option<Coordinates> {
    let mut latitude: Option<f64> = None;
    let mut longitude: Option<f64> = None;
    let mut lat_ref: Option<String> = None;
    let mut lon_ref: Option<String> = None;

    for entry in &exif.entries {
        match entry.tag {
            ExifTag::GPSLatitude => latitude = degrees(&entry.value),
            ExifTag::GPSLongitude => longitude = degrees(&entry.value),
            ExifTag::GPSLatitudeRef => lat_ref = Some(ascii_value(&entry.value)),
            ExifTag::GPSLongitudeRef => lon_ref = Some(ascii_value(&entry.value)),
            _ => {}
        }
    }

    let (mut lat, mut lon, lat_r, lon_r) = (latitude?, longitude?, lat_ref?, lon_ref?);
    if lat_r.starts_with('S') {
        lat = -lat;
    }
    if lon_r.starts_with('W') {
        lon = -lon;
    }

    Some(Coordinates {
        latitude: lat,
        longitude: lon,
    })
}

/// Degrees, minutes, seconds rationals to decimal degrees.
fn degrees(value: &TagValue) -> Option<f64> {
    match value {
        TagValue::URational(parts) if parts.len() >= 3 => {
            let [d, m, s] = [&parts[0], &parts[1], &parts[2]].map(|r| {
                if r.denominator == 0 {
                    0.0
                } else {
                    r.numerator as f64 / r.denominator as f64
                }
            });
            Some(d + m / 60.0 + s / 3600.0)
        }
        _ => None,
    }
}

fn ascii_value(value: &TagValue) -> String {
    match value {
        TagValue::Ascii(s) => s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string(),
        _ => String::new(),
    }
}
