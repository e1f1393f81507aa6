//! EXIF extraction. Missing or unparseable EXIF is never a failure; absent fields stay `None`
//! and the orientation defaults to 1.

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{Exif, In, Tag, Value};

/// The EXIF fields the media plane cares about.
#[derive(Debug, Clone)]
pub struct ExifSummary {
    /// Camera make.
    pub make: Option<String>,
    /// Camera model.
    pub model: Option<String>,
    /// Lens model.
    pub lens: Option<String>,
    /// Focal length in millimetres.
    pub focal_length: Option<f64>,
    /// Aperture f-number.
    pub aperture: Option<f64>,
    /// Shutter speed as recorded.
    pub shutter: Option<String>,
    /// ISO speed.
    pub iso: Option<i64>,
    /// Whether the flash fired.
    pub flash: Option<bool>,
    /// Capture time.
    pub taken_at: Option<DateTime<Utc>>,
    /// Latitude in decimal degrees, south negative.
    pub gps_lat: Option<f64>,
    /// Longitude in decimal degrees, west negative.
    pub gps_lon: Option<f64>,
    /// Altitude in metres, below sea level negative.
    pub gps_alt: Option<f64>,
    /// Orientation 1–8.
    pub orientation: u32,
    /// Pixel width per EXIF.
    pub width: Option<u32>,
    /// Pixel height per EXIF.
    pub height: Option<u32>,
}

impl Default for ExifSummary {
    fn default() -> Self {
        ExifSummary {
            make: None,
            model: None,
            lens: None,
            focal_length: None,
            aperture: None,
            shutter: None,
            iso: None,
            flash: None,
            taken_at: None,
            gps_lat: None,
            gps_lon: None,
            gps_alt: None,
            orientation: 1,
            width: None,
            height: None,
        }
    }
}

/// Extracts the summary from raw image bytes.
pub fn extract(bytes: &[u8]) -> ExifSummary {
    let mut cursor = std::io::Cursor::new(bytes);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => summarize(&exif),
        Err(_) => ExifSummary::default(),
    }
}

fn summarize(exif: &Exif) -> ExifSummary {
    ExifSummary {
        make: ascii(exif, Tag::Make),
        model: ascii(exif, Tag::Model),
        lens: ascii(exif, Tag::LensModel),
        focal_length: rational(exif, Tag::FocalLength),
        aperture: rational(exif, Tag::FNumber),
        shutter: exif.get_field(Tag::ExposureTime, In::PRIMARY).map(|f| f.display_value().to_string()),
        iso: uint(exif, Tag::PhotographicSensitivity).map(|v| v as i64),
        flash: uint(exif, Tag::Flash).map(|v| v & 1 == 1),
        taken_at: taken_at(exif),
        gps_lat: coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S"),
        gps_lon: coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W"),
        gps_alt: altitude(exif),
        orientation: uint(exif, Tag::Orientation).filter(|o| (1..=8).contains(o)).unwrap_or(1),
        width: uint(exif, Tag::PixelXDimension),
        height: uint(exif, Tag::PixelYDimension),
    }
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Ascii(parts) = &field.value {
        let text = parts
            .iter()
            .map(|p| String::from_utf8_lossy(p).trim().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

fn uint(exif: &Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY).and_then(|f| f.value.get_uint(0))
}

fn rational(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Rational(parts) = &field.value {
        return parts.first().map(|r| r.to_f64());
    }
    None
}

fn taken_at(exif: &Exif) -> Option<DateTime<Utc>> {
    let raw = ascii(exif, Tag::DateTimeOriginal).or_else(|| ascii(exif, Tag::DateTime))?;
    NaiveDateTime::parse_from_str(&raw, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

// GPS coordinates are stored as degree/minute/second rationals with a hemisphere reference.
fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag, negative_ref: &str) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    if parts.len() < 3 {
        return None;
    }
    let decimal = parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0;
    let sign = match ascii(exif, ref_tag) {
        Some(r) if r.eq_ignore_ascii_case(negative_ref) => -1.0,
        _ => 1.0,
    };
    Some(sign * decimal)
}

fn altitude(exif: &Exif) -> Option<f64> {
    let meters = rational(exif, Tag::GPSAltitude)?;
    let below_sea = uint(exif, Tag::GPSAltitudeRef).map(|r| r == 1).unwrap_or(false);
    Some(if below_sea { -meters } else { meters })
}
