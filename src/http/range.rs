//! Single byte-range requests.
//!
//! Only `bytes=start-end` and `bytes=start-` are understood. Anything else,
//! including suffix and multi-part ranges, is answered with 416.

use crate::error::EngineError;

/// Inclusive byte range within a body of `total` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value of the `Content-Range` header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Parse a `Range` header against a body of `total` bytes. An end past the
/// body is clamped to the last byte.
pub fn parse_range(header: &str, total: u64) -> Result<ByteRange, EngineError> {
    let bad = || EngineError::RangeNotSatisfiable(header.to_string());

    let spec = header.trim().strip_prefix("bytes=").ok_or_else(bad)?;
    if spec.contains(',') {
        return Err(bad());
    }
    let (start, end) = spec.split_once('-').ok_or_else(bad)?;
    let start: u64 = start.trim().parse().map_err(|_| bad())?;
    let end = match end.trim() {
        "" => None,
        value => Some(value.parse::<u64>().map_err(|_| bad())?),
    };

    if total == 0 || start >= total {
        return Err(bad());
    }
    let end = end.unwrap_or(total - 1).min(total - 1);
    if end < start {
        return Err(bad());
    }

    Ok(ByteRange { start, end, total })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_range() {
        let range = parse_range("bytes=0-4", 10).unwrap();
        assert_eq!((range.start, range.end, range.len()), (0, 4, 5));
        assert_eq!(range.content_range(), "bytes 0-4/10");
    }

    #[test]
    fn test_open_range_and_clamping() {
        assert_eq!(parse_range("bytes=7-", 10).unwrap().end, 9);
        assert_eq!(parse_range("bytes=7-100", 10).unwrap().end, 9);
    }

    #[test]
    fn test_malformed_ranges_rejected() {
        for header in ["bytes=-5", "bytes=5-2", "bytes=10-", "items=0-1", "bytes=0-1,3-4", "bytes=a-b"] {
            let err = parse_range(header, 10).unwrap_err();
            assert!(matches!(err, EngineError::RangeNotSatisfiable(_)), "{header}");
        }
        assert!(parse_range("bytes=0-0", 0).is_err());
    }
}
