//! # Start Code Scanner
//!
//! Stateless search for an Annex-B start code inside a byte range.

use memchr::memmem;

/// Find the first occurrence of `delimiter` whose start position lies in
/// `[start, end)`.
///
/// A match starting at `end - 1` may extend up to `end + delimiter.len() - 2`;
/// callers that must not see partially-buffered delimiters pass
/// `end = limit - (delimiter.len() - 1)`. Bytes past `buffer.len()` are never
/// read.
pub fn find(buffer: &[u8], delimiter: &[u8], start: usize, end: usize) -> Option<usize> {
    if delimiter.is_empty() || start >= end {
        return None;
    }
    let window_end = end
        .saturating_add(delimiter.len() - 1)
        .min(buffer.len());
    if start >= window_end {
        return None;
    }
    memmem::find(&buffer[start..window_end], delimiter).map(|offset| start + offset)
}

/// All non-overlapping start code positions in `buffer`, in order.
///
/// Advances by `delimiter.len()` past each match. Diagnostics only.
pub fn find_all<'a>(buffer: &'a [u8], delimiter: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    let mut next = 0;
    std::iter::from_fn(move || {
        let pos = find(buffer, delimiter, next, buffer.len())?;
        next = pos + delimiter.len();
        Some(pos)
    })
}

/// Split a fully buffered Annex-B stream into unit payloads.
///
/// Leading bytes before the first start code are dropped and empty spans
/// are skipped, matching what the streaming demuxer submits.
pub fn split_units<'a>(buffer: &'a [u8], delimiter: &'a [u8]) -> Vec<&'a [u8]> {
    let mut units = Vec::new();
    let mut current: Option<usize> = None;
    for pos in find_all(buffer, delimiter) {
        if let Some(begin) = current {
            if pos > begin {
                units.push(&buffer[begin..pos]);
            }
        }
        current = Some(pos + delimiter.len());
    }
    if let Some(begin) = current {
        if begin < buffer.len() {
            units.push(&buffer[begin..]);
        }
    }
    units
}
