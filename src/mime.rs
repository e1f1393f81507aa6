//! Extension → MIME type mapping for content responses and plugin call-outs.

use crate::pathutil;

/// The MIME type served for `path`, by extension. Unknown extensions fall back to
/// `application/octet-stream`.
pub fn from_path(path: &str) -> &'static str {
    match pathutil::extension(path).as_deref() {
        Some("txt") | Some("log") | Some("md") => "text/plain; charset=utf-8",
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("tiff") | Some("tif") => "image/tiff",
        Some("heic") => "image/heic",
        Some("svg") => "image/svg+xml",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_by_extension_case_insensitively() {
        assert_eq!(from_path("/a/b/photo.JPG"), "image/jpeg");
        assert_eq!(from_path("/doc.pdf"), "application/pdf");
        assert_eq!(from_path("/unknown.blob"), "application/octet-stream");
        assert_eq!(from_path("/noext"), "application/octet-stream");
    }
}
