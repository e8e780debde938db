//! Single byte-range support for serialized pipeline output.
//!
//! Only one `bytes=` range per request is honoured. Multi-range and malformed
//! headers are ignored and the full body is served.

use std::io::Write;

use http::{StatusCode, header};
use tracing::debug;

use crate::environment::Environment;
use crate::error::ProcessingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`, inclusive.
    Bounded { start: u64, end: u64 },
    /// `bytes=a-`.
    From { start: u64 },
    /// `bytes=-n`: the last `n` bytes.
    Suffix { length: u64 },
}

impl ByteRange {
    pub fn parse(header: &str) -> Option<Self> {
        let ranges = header.trim().strip_prefix("bytes=")?.trim();
        if ranges.contains(',') {
            return None;
        }
        let (start, end) = ranges.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        match (start.is_empty(), end.is_empty()) {
            (true, false) => Some(Self::Suffix {
                length: end.parse().ok()?,
            }),
            (false, true) => Some(Self::From {
                start: start.parse().ok()?,
            }),
            (false, false) => {
                let start = start.parse().ok()?;
                let end = end.parse().ok()?;
                (start <= end).then_some(Self::Bounded { start, end })
            }
            (true, true) => None,
        }
    }

    /// The range requested by `env`, if it sent a usable `Range` header.
    pub fn from_env(env: &Environment) -> Option<Self> {
        let raw = env.request_header(header::RANGE.as_str())?;
        let parsed = Self::parse(raw);
        if parsed.is_none() {
            debug!(range = raw, "Ignoring unsupported Range header");
        }
        parsed
    }

    /// Inclusive `(first, last)` offsets within a body of `total` bytes, or
    /// `None` when unsatisfiable.
    pub fn resolve(&self, total: u64) -> Option<(u64, u64)> {
        if total == 0 {
            return None;
        }
        match *self {
            Self::Bounded { start, end } if start < total => Some((start, end.min(total - 1))),
            Self::From { start } if start < total => Some((start, total - 1)),
            Self::Suffix { length } if length > 0 => Some((total.saturating_sub(length), total - 1)),
            _ => None,
        }
    }
}

/// Write the part of `body` selected by `range`, setting status and headers.
pub(crate) fn write_range(
    env: &mut Environment,
    range: ByteRange,
    body: &[u8],
    out: &mut dyn Write,
) -> Result<(), ProcessingError> {
    let total = body.len() as u64;
    match range.resolve(total) {
        Some((first, last)) => {
            let slice = &body[first as usize..=last as usize];
            env.set_status(StatusCode::PARTIAL_CONTENT);
            env.set_header(header::CONTENT_RANGE, format!("bytes {first}-{last}/{total}"));
            env.set_content_length(slice.len());
            out.write_all(slice)?;
        }
        None => {
            env.set_status(StatusCode::RANGE_NOT_SATISFIABLE);
            env.set_header(header::CONTENT_RANGE, format!("bytes */{total}"));
            env.set_content_length(0);
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_single_range_forms() {
        assert_eq!(
            ByteRange::parse("bytes=0-9"),
            Some(ByteRange::Bounded { start: 0, end: 9 })
        );
        assert_eq!(ByteRange::parse("bytes=5-"), Some(ByteRange::From { start: 5 }));
        assert_eq!(ByteRange::parse("bytes=-3"), Some(ByteRange::Suffix { length: 3 }));
    }

    #[test]
    fn rejects_multi_and_malformed_ranges() {
        for raw in ["bytes=0-1,4-5", "bytes=-", "items=0-1", "bytes=9-2", "bytes=a-b"] {
            assert_eq!(ByteRange::parse(raw), None, "{raw}");
        }
    }

    #[test]
    fn resolves_against_body_length() {
        assert_eq!(ByteRange::Bounded { start: 2, end: 100 }.resolve(10), Some((2, 9)));
        assert_eq!(ByteRange::Suffix { length: 20 }.resolve(10), Some((0, 9)));
        assert_eq!(ByteRange::From { start: 10 }.resolve(10), None);
        assert_eq!(ByteRange::Suffix { length: 0 }.resolve(10), None);
    }

    #[test]
    fn partial_content_sets_headers() {
        let mut env = Environment::new("file");
        let mut out = Vec::new();
        write_range(&mut env, ByteRange::Bounded { start: 1, end: 3 }, b"abcdef", &mut out)
            .expect("write");

        assert_eq!(out, b"bcd");
        assert_eq!(env.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(env.response_header("content-range"), Some("bytes 1-3/6"));
        assert_eq!(env.response_header("content-length"), Some("3"));
    }

    #[test]
    fn unsatisfiable_range_writes_nothing() {
        let mut env = Environment::new("file");
        let mut out = Vec::new();
        write_range(&mut env, ByteRange::From { start: 50 }, b"abc", &mut out).expect("write");

        assert!(out.is_empty());
        assert_eq!(env.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(env.response_header("content-range"), Some("bytes */3"));
    }
}
