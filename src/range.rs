// src/range.rs

//! `KeyRange` and the `prefix_end` byte-arithmetic helper shared by every builder that
//! needs to express a `[start, end)` range over the keyspace.

use bytes::Bytes;

/// A half-open byte range `[start, end)`. A single key is `{ start: K, end: empty }`.
/// The full keyspace is `{ start: 0x00, end: 0x00 }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bytes,
    pub end: Bytes,
}

impl KeyRange {
    /// A range matching exactly one key.
    pub fn key(key: impl Into<Bytes>) -> Self {
        KeyRange { start: key.into(), end: Bytes::new() }
    }

    /// A range matching every key sharing `prefix` as a byte prefix.
    pub fn prefix(prefix: impl Into<Bytes>) -> Self {
        let start = prefix.into();
        let end = prefix_end(&start);
        KeyRange { start, end }
    }

    /// The full keyspace: `{ start: 0x00, end: 0x00 }`.
    pub fn all() -> Self {
        KeyRange { start: Bytes::from_static(&[0]), end: Bytes::from_static(&[0]) }
    }

    /// An explicit `[start, end)` range.
    pub fn between(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        KeyRange { start: start.into(), end: end.into() }
    }
}

/// Computes the exclusive end of a prefix range: increments the least-significant byte
/// that is less than `0xFF`, truncating everything after it. An all-`0xFF` (or empty)
/// prefix has no finite successor and maps to `0x00`, which the server interprets as
/// "no upper bound".
pub fn prefix_end(prefix: &[u8]) -> Bytes {
    let mut end = prefix.to_vec();
    for i in (0..end.len()).rev() {
        if end[i] < 0xFF {
            end[i] += 1;
            end.truncate(i + 1);
            return Bytes::from(end);
        }
    }
    Bytes::from_static(&[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prefix_has_no_successor() {
        assert_eq!(prefix_end(&[]), Bytes::from_static(&[0]));
    }

    #[test]
    fn increments_last_sub_ff_byte() {
        assert_eq!(prefix_end(b"fo"), Bytes::from(b"fp".to_vec()));
        assert_eq!(prefix_end(&[0x01, 0xFF]), Bytes::from(vec![0x02]));
    }

    #[test]
    fn all_ff_wraps_to_zero() {
        assert_eq!(prefix_end(&[0xFF, 0xFF]), Bytes::from_static(&[0]));
    }

    #[test]
    fn full_keyspace_range() {
        let r = KeyRange::all();
        assert_eq!(r.start.as_ref(), &[0]);
        assert_eq!(r.end.as_ref(), &[0]);
    }
}
