//! `Range` header parsing for content reads. Only single byte ranges are supported, which is
//! what file clients send.

/// A resolved byte range: start offset, length and the total size it was resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub offset: u64,
    /// Number of bytes to serve.
    pub length: u64,
    /// Total object size.
    pub total: u64,
}

impl ByteRange {
    /// The `Content-Range` header value for this range.
    pub fn content_range(&self) -> String {
        if self.length == 0 {
            format!("bytes */{}", self.total)
        } else {
            format!("bytes {}-{}/{}", self.offset, self.offset + self.length - 1, self.total)
        }
    }
}

/// Parses `bytes=a-b`, `bytes=a-` and the suffix form `bytes=-n` against an object of `size`
/// bytes. Returns `None` for anything unparseable; callers then serve the whole object.
pub fn parse(header: &str, size: u64) -> Option<ByteRange> {
    let spec = header.strip_prefix("bytes=")?.trim();
    let (start_s, end_s) = spec.split_once('-')?;

    if start_s.is_empty() {
        // Suffix form: the last n bytes, the whole object when n exceeds it.
        let n: u64 = end_s.parse().ok()?;
        let offset = size.saturating_sub(n);
        return Some(ByteRange {
            offset,
            length: size - offset,
            total: size,
        });
    }

    let start: u64 = start_s.parse().ok()?;
    let length = if end_s.is_empty() {
        size.saturating_sub(start)
    } else {
        let end: u64 = end_s.parse().ok()?;
        if end < start {
            return None;
        }
        (end.min(size.saturating_sub(1)) + 1).saturating_sub(start)
    };
    Some(ByteRange {
        offset: start.min(size),
        length: if start >= size { 0 } else { length },
        total: size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_byte_only() {
        let r = parse("bytes=0-0", 10).unwrap();
        assert_eq!((r.offset, r.length), (0, 1));
        assert_eq!(r.content_range(), "bytes 0-0/10");
    }

    #[test]
    fn open_ended_tail() {
        let r = parse("bytes=7-", 10).unwrap();
        assert_eq!((r.offset, r.length), (7, 3));
    }

    #[test]
    fn suffix_larger_than_object_returns_everything() {
        let r = parse("bytes=-5", 3).unwrap();
        assert_eq!((r.offset, r.length), (0, 3));
        assert_eq!(r.content_range(), "bytes 0-2/3");
    }

    #[test]
    fn end_clamped_to_size() {
        let r = parse("bytes=4-99", 10).unwrap();
        assert_eq!((r.offset, r.length), (4, 6));
    }

    #[test]
    fn start_past_end_is_empty() {
        let r = parse("bytes=10-", 10).unwrap();
        assert_eq!(r.length, 0);
        assert_eq!(r.content_range(), "bytes */10");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse("bytes=a-b", 10).is_none());
        assert!(parse("items=0-1", 10).is_none());
        assert!(parse("bytes=5-2", 10).is_none());
    }
}
