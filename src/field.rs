//! Provenance-carrying scalar values.
//!
//! Every decoded field in this crate is modelled as a [`Field`]: the decoded
//! value, a human-facing rendering of it, and the absolute byte address in
//! the image where it was read. The address lets a reviewer jump straight to
//! the bytes in a hex editor and confirm the decode by hand.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field<T> {
    pub value: T,
    pub readable: String,
    pub address: u64,
}

impl<T: std::fmt::LowerHex + Copy> Field<T> {
    /// A field whose human-facing rendering is its hexadecimal form.
    pub fn hex(value: T, address: u64) -> Self {
        Field {
            value,
            readable: format!("0x{:x}", value),
            address,
        }
    }
}

impl Field<u32> {
    /// A field holding Unix seconds, rendered per the timestamp contract
    /// (`format_timestamp`).
    pub fn timestamp(value: u32, address: u64) -> Self {
        Field {
            value,
            readable: format_timestamp(value),
            address,
        }
    }
}

/// Renders a Unix timestamp as `YYYY-MM-DD HH:MM:SS UTC`, or `Invalid/Not
/// Set` for the sentinel values `0`, `>= 0x7FFFFFFF`, and `0xFFFFFFFF`.
pub fn format_timestamp(ts: u32) -> String {
    if ts == 0 || ts >= 0x7FFF_FFFF {
        return "Invalid/Not Set".to_string();
    }
    match Utc.timestamp_opt(ts as i64, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _ => format!("Invalid Timestamp ({ts})"),
    }
}

/// Space-separated uppercase hex representation of a byte slice, as used in
/// every `raw_bytes`/`raw_hex_preview` field of the output documents.
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sentinels_render_as_not_set() {
        assert_eq!(format_timestamp(0), "Invalid/Not Set");
        assert_eq!(format_timestamp(0x7FFF_FFFF), "Invalid/Not Set");
        assert_eq!(format_timestamp(0xFFFF_FFFF), "Invalid/Not Set");
    }

    #[test]
    fn valid_timestamp_renders_iso_like_utc() {
        // 2021-01-01 00:00:00 UTC
        assert_eq!(format_timestamp(1_609_459_200), "2021-01-01 00:00:00 UTC");
    }

    #[test]
    fn format_bytes_is_space_separated_uppercase_hex() {
        assert_eq!(format_bytes(&[0x00, 0xAB, 0xff]), "00 AB FF");
    }
}
