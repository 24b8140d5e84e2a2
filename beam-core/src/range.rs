//! HTTP byte-range parsing and resolution against a known file length.

/// Parsed `Range: bytes=<start>-[<end>]` header value. `end` is inclusive;
/// when absent it defaults to the last byte of the file at resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

/// Parse a `Range` header value. Anything other than a single ascending
/// `bytes=` range is ignored (the request is then served in full).
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let rest = value.trim().strip_prefix("bytes=")?;
    let (a, b) = rest.split_once('-')?;
    let start: u64 = a.trim().parse().ok()?;
    let end = b.trim();
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().ok()?)
    };
    Some(ByteRange { start, end })
}

/// Resolution of a range against a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// 206: a body of exactly `len` bytes starting at `start`;
    /// `Content-Range: bytes <start>-<end>/<total>`.
    Window { start: u64, end: u64, len: u64 },
    /// 416: `Content-Range: bytes 0-0/<total>`.
    NotSatisfiable,
}

/// Resolve a parsed range against the file length. A start at or past the
/// end of the file is not satisfiable; an open or oversized end is clamped
/// to the last byte.
pub fn resolve(range: ByteRange, file_len: u64) -> RangeOutcome {
    if range.start >= file_len {
        return RangeOutcome::NotSatisfiable;
    }
    let last = file_len - 1;
    let end = range.end.unwrap_or(last).min(last);
    let len = if end >= range.start {
        end - range.start + 1
    } else {
        0
    };
    RangeOutcome::Window {
        start: range.start,
        end,
        len,
    }
}
