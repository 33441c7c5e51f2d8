//! Charset decoding for legacy database text columns.
//!
//! The legacy catalog tables predate UTF-8 and store text as Windows-1252
//! bytes. Everything that reads them goes through this adapter; no other
//! module touches encoding concerns.

use encoding_rs::WINDOWS_1252;

/// Decode a legacy text column into a `String`.
///
/// Windows-1252 maps every byte, so decoding never fails; unexpected bytes
/// come through as their C1 control counterparts rather than replacement
/// characters.
pub fn decode_legacy(bytes: &[u8]) -> String {
    let (decoded, _, _) = WINDOWS_1252.decode(bytes);
    decoded.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        assert_eq!(decode_legacy(b"PB-02"), "PB-02");
    }

    #[test]
    fn test_accented_legacy_bytes_decode() {
        // "Piezômetro" as stored by the legacy system
        assert_eq!(decode_legacy(b"Piez\xF4metro"), "Piez\u{f4}metro");
        // "Jusante - Seção B"
        assert_eq!(decode_legacy(b"Se\xE7\xE3o B"), "Se\u{e7}\u{e3}o B");
    }

    #[test]
    fn test_empty_column() {
        assert_eq!(decode_legacy(b""), "");
    }
}
