//! Thumbnail rendering: decode, apply the EXIF orientation transform, fit within a bounding
//! box preserving aspect ratio, encode as JPEG.

use image::DynamicImage;

/// Thumbnails fit within this square.
pub const THUMB_MAX: u32 = 400;
/// JPEG quality of encoded thumbnails.
pub const THUMB_QUALITY: u8 = 80;

/// Renders the thumbnail for `bytes`, honouring the EXIF `orientation`. Deterministic for the
/// same source bytes and orientation.
pub fn render(bytes: &[u8], orientation: u32) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let img = orient(img, orientation);
    // Fit within the box; images already inside it are encoded as-is, never upscaled.
    let thumb = if img.width() > THUMB_MAX || img.height() > THUMB_MAX {
        img.thumbnail(THUMB_MAX, THUMB_MAX)
    } else {
        img
    };
    let mut out = std::io::Cursor::new(Vec::new());
    // JPEG has no alpha; flatten first.
    DynamicImage::ImageRgb8(thumb.to_rgb8()).write_to(&mut out, image::ImageOutputFormat::Jpeg(THUMB_QUALITY))?;
    Ok(out.into_inner())
}

/// Probes the pixel dimensions of `bytes` without a full decode.
pub fn dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

// The eight EXIF orientations map onto flips and quarter turns.
fn orient(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
