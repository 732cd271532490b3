//! Filename timestamp extraction.
//!
//! GeoTIFF carries no time axis, so acquisition time is parsed from the
//! filename. Patterns are tried in a fixed priority order; for each pattern
//! every position in the name is probed and the first successful parse wins.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// (substring length, chrono format, digits-only) probes, most specific
/// first. Digits-only patterns additionally require the match to be a
/// maximal digit run so `20240115` never matches inside a longer number.
const PATTERNS: &[(usize, &str, bool)] = &[
    (19, "%Y-%m-%dT%H:%M:%S", false),
    (19, "%Y-%m-%d_%H-%M-%S", false),
    (16, "%Y-%m-%dT%H:%M", false),
    (10, "%Y-%m-%d", false),
    (13, "%Y%m%d_%H%M", false),
    (14, "%Y%m%d%H%M%S", true),
    (8, "%Y%m%d", true),
];

/// Parse an acquisition timestamp out of a filename. Returns None when no
/// pattern matches anywhere in the name.
pub fn parse_filename_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_stem()?.to_str()?;
    let bytes = name.as_bytes();

    for &(len, format, digits_only) in PATTERNS {
        if bytes.len() < len {
            continue;
        }
        for start in 0..=bytes.len() - len {
            // Offsets that split a multibyte character cannot hold an
            // ASCII timestamp anyway.
            let Some(slice) = name.get(start..start + len) else {
                continue;
            };
            if digits_only {
                if !slice.bytes().all(|b| b.is_ascii_digit()) {
                    continue;
                }
                // maximal digit run check
                if start > 0 && bytes[start - 1].is_ascii_digit() {
                    continue;
                }
                let end = start + len;
                if end < bytes.len() && bytes[end].is_ascii_digit() {
                    continue;
                }
            }
            if let Some(ts) = parse_fragment(slice, format) {
                return Some(ts);
            }
        }
    }
    None
}

fn parse_fragment(s: &str, format: &str) -> Option<DateTime<Utc>> {
    let naive = if format.contains('H') {
        NaiveDateTime::parse_from_str(s, format).ok()?
    } else {
        NaiveDate::parse_from_str(s, format).ok()?.and_hms_opt(0, 0, 0)?
    };
    // Years far outside the plausible acquisition range are digit noise,
    // not timestamps.
    use chrono::Datelike;
    if naive.year() < 1970 || naive.year() > 2100 {
        return None;
    }
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}
