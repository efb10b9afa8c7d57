//! Broadcast text decoding (EN 300468 annex A).
//!
//! A text field optionally starts with a character-coding selector byte in
//! 0x01..=0x1F (two extended forms consume 1-2 extra bytes). Without a
//! selector the field uses the default table, ISO-6937 with the euro
//! add-on. Decoding never fails: anything unconvertible degrades to a
//! verbatim byte copy.

use encoding_rs::Encoding;
use log::{trace, warn};

/// The operator-requested output character set. Decoded strings are
/// normalized to UTF-8 internally; the label is carried for serializers
/// that re-encode on write.
#[derive(Debug, Clone)]
pub struct Charset {
    label: String,
}

impl Default for Charset {
    fn default() -> Self {
        Charset { label: "UTF-8".into() }
    }
}

impl Charset {
    /// Unknown codepages warn and fall back to UTF-8.
    pub fn new(label: &str) -> Self {
        if label.eq_ignore_ascii_case("utf-8") || Encoding::for_label(label.as_bytes()).is_some() {
            Charset { label: label.to_string() }
        } else {
            warn!("unknown codepage '{label}', using default 'UTF-8'");
            Charset::default()
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Maps a single-byte selector to its character table. `None` means the
/// value is reserved and the default table applies.
fn single_byte_table(selector: u8) -> Option<&'static Encoding> {
    let label: &[u8] = match selector {
        0x01 => b"ISO-8859-5",  // Latin/Cyrillic
        0x02 => b"ISO-8859-6",  // Latin/Arabic
        0x03 => b"ISO-8859-7",  // Latin/Greek
        0x04 => b"ISO-8859-8",  // Latin/Hebrew
        0x05 => b"ISO-8859-9",  // Latin no. 5
        0x06 => b"ISO-8859-10", // Latin no. 6
        0x07 => b"ISO-8859-11", // Latin/Thai
        0x09 => b"ISO-8859-13", // Latin no. 7
        0x0A => b"ISO-8859-14", // Celtic
        0x0B => b"ISO-8859-15", // Latin no. 9
        0x11 => b"UTF-16BE",    // ISO-10646 basic multilingual plane
        0x12 => b"EUC-KR",      // KSX1001-2004
        0x13 => b"GBK",         // GB-2312-1980
        0x14 => b"Big5",
        0x15 => b"UTF-8",
        _ => return None,
    };
    Encoding::for_label(label)
}

/// The 0x10 extended form: a 16-bit value selecting an ISO-8859 part.
fn extended_table(hi: u8, lo: u8) -> Option<&'static Encoding> {
    if hi != 0x00 {
        warn!("unknown second byte value 0x{hi:02X} in charset selector");
        return None;
    }
    let label: &[u8] = match lo {
        0x01 => b"ISO-8859-1",
        0x02 => b"ISO-8859-2",
        0x03 => b"ISO-8859-3",
        0x04 => b"ISO-8859-4",
        0x05 => b"ISO-8859-5",
        0x06 => b"ISO-8859-6",
        0x07 => b"ISO-8859-7",
        0x08 => b"ISO-8859-8",
        0x09 => b"ISO-8859-9",
        0x0A => b"ISO-8859-10",
        0x0B => b"ISO-8859-11",
        0x0D => b"ISO-8859-13",
        0x0E => b"ISO-8859-14",
        0x0F => b"ISO-8859-15",
        _ => {
            warn!("unknown third byte value 0x{lo:02X} in charset selector");
            return None;
        }
    };
    Encoding::for_label(label)
}

/// Splits the leading selector off a text field. Returns the chosen table
/// (`None` = default ISO-6937) and the remaining payload.
fn split_selector(raw: &[u8]) -> (Option<&'static Encoding>, &[u8]) {
    match raw {
        [b, rest @ ..] if *b < 0x20 => match *b {
            0x10 => match rest {
                [hi, lo, text @ ..] => (extended_table(*hi, *lo), text),
                _ => (None, &[]),
            },
            // one byte of encoding id, registered codes only; none of them
            // select a table we know, the default applies
            0x1F => match rest {
                [_id, text @ ..] => (None, text),
                _ => (None, &[]),
            },
            sel => (single_byte_table(sel), rest),
        },
        _ => (None, raw),
    }
}

/// Decodes one broadcast text field into UTF-8. Control bytes pass
/// through untouched; stripping them is the name parser's job.
pub fn decode_text(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let (table, text) = split_selector(raw);
    match table {
        Some(enc) => {
            let (decoded, _, had_errors) = enc.decode(text);
            if had_errors {
                warn!("conversion from '{}' failed, keeping raw bytes", enc.name());
                return fallback_copy(text);
            }
            decoded.into_owned()
        }
        None => decode_iso6937(text),
    }
}

/// Best-effort byte copy: everything in 0x01..=0xFF survives, mapped as
/// Latin-1 so the result stays valid UTF-8.
fn fallback_copy(bytes: &[u8]) -> String {
    bytes.iter().filter(|&&b| b != 0).map(|&b| b as char).collect()
}

/// Default table: ISO-6937-2. The table itself has no euro glyph; byte
/// 0xA4 is routed through the ISO-8859-15 table as a two-byte sub-string
/// and decoded separately.
fn decode_iso6937(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut it = bytes.iter().copied().peekable();
    while let Some(b) = it.next() {
        match b {
            0xA4 => {
                trace!("euro char in iso-6937-2");
                out.push_str(&decode_text(&[0x0B, 0xA4]));
            }
            0x00 => {}
            0x01..=0x1F | 0x7F..=0x9F => out.push(b as char), // control codes, kept
            0x20..=0x7E => out.push(b as char),
            0xC1..=0xCF => {
                // combining diacritical mark, applied to the following
                // letter; fold to the precomposed char where we know one
                let base = it.peek().copied().unwrap_or(0);
                if let Some(c) = compose_6937(b, base) {
                    it.next();
                    out.push(c);
                } else if (0x20..=0x7E).contains(&base) {
                    it.next();
                    out.push(base as char);
                }
            }
            _ => out.push(glyph_6937(b)),
        }
    }
    out
}

/// Single-byte ISO-6937 glyphs outside ASCII (common subset).
fn glyph_6937(b: u8) -> char {
    match b {
        0xA0 => '\u{00A0}',
        0xA1 => '¡',
        0xA2 => '¢',
        0xA3 => '£',
        0xA5 => '¥',
        0xA7 => '§',
        0xA9 => '‘',
        0xAA => '“',
        0xAB => '«',
        0xAC => '←',
        0xAD => '↑',
        0xAE => '→',
        0xAF => '↓',
        0xB0 => '°',
        0xB1 => '±',
        0xB2 => '²',
        0xB3 => '³',
        0xB4 => '×',
        0xB5 => 'µ',
        0xB6 => '¶',
        0xB7 => '·',
        0xB8 => '÷',
        0xB9 => '’',
        0xBA => '”',
        0xBB => '»',
        0xBC => '¼',
        0xBD => '½',
        0xBE => '¾',
        0xBF => '¿',
        0xD0 => '—',
        0xD1 => '¹',
        0xD2 => '®',
        0xD3 => '©',
        0xD4 => '™',
        0xD5 => '♪',
        0xE0 => 'Ω',
        0xE1 => 'Æ',
        0xE2 => 'Đ',
        0xE6 => 'Ĳ',
        0xE7 => 'Ŀ',
        0xE8 => 'Ł',
        0xE9 => 'Ø',
        0xEA => 'Œ',
        0xEC => 'Þ',
        0xED => 'Ŧ',
        0xEE => 'Ŋ',
        0xEF => 'ŉ',
        0xF0 => 'ĸ',
        0xF1 => 'æ',
        0xF2 => 'đ',
        0xF3 => 'ð',
        0xF4 => 'ħ',
        0xF5 => 'ĳ',
        0xF6 => 'ŀ',
        0xF7 => 'ł',
        0xF8 => 'ø',
        0xF9 => 'œ',
        0xFA => 'ß',
        0xFB => 'þ',
        0xFC => 'ŧ',
        0xFD => 'ŋ',
        0xFE => '\u{00AD}',
        other => other as char,
    }
}

/// Accent combiner + base letter for the cases seen in real SDTs.
fn compose_6937(mark: u8, base: u8) -> Option<char> {
    let c = match (mark, base) {
        (0xC1, b'A') => 'À', (0xC1, b'E') => 'È', (0xC1, b'I') => 'Ì',
        (0xC1, b'O') => 'Ò', (0xC1, b'U') => 'Ù', (0xC1, b'a') => 'à',
        (0xC1, b'e') => 'è', (0xC1, b'i') => 'ì', (0xC1, b'o') => 'ò',
        (0xC1, b'u') => 'ù',
        (0xC2, b'A') => 'Á', (0xC2, b'E') => 'É', (0xC2, b'I') => 'Í',
        (0xC2, b'O') => 'Ó', (0xC2, b'U') => 'Ú', (0xC2, b'Y') => 'Ý',
        (0xC2, b'a') => 'á', (0xC2, b'e') => 'é', (0xC2, b'i') => 'í',
        (0xC2, b'o') => 'ó', (0xC2, b'u') => 'ú', (0xC2, b'y') => 'ý',
        (0xC2, b'C') => 'Ć', (0xC2, b'c') => 'ć', (0xC2, b'S') => 'Ś',
        (0xC2, b's') => 'ś', (0xC2, b'Z') => 'Ź', (0xC2, b'z') => 'ź',
        (0xC2, b'N') => 'Ń', (0xC2, b'n') => 'ń',
        (0xC3, b'A') => 'Â', (0xC3, b'E') => 'Ê', (0xC3, b'I') => 'Î',
        (0xC3, b'O') => 'Ô', (0xC3, b'U') => 'Û', (0xC3, b'a') => 'â',
        (0xC3, b'e') => 'ê', (0xC3, b'i') => 'î', (0xC3, b'o') => 'ô',
        (0xC3, b'u') => 'û',
        (0xC4, b'A') => 'Ã', (0xC4, b'N') => 'Ñ', (0xC4, b'O') => 'Õ',
        (0xC4, b'a') => 'ã', (0xC4, b'n') => 'ñ', (0xC4, b'o') => 'õ',
        (0xC8, b'A') => 'Ä', (0xC8, b'E') => 'Ë', (0xC8, b'I') => 'Ï',
        (0xC8, b'O') => 'Ö', (0xC8, b'U') => 'Ü', (0xC8, b'a') => 'ä',
        (0xC8, b'e') => 'ë', (0xC8, b'i') => 'ï', (0xC8, b'o') => 'ö',
        (0xC8, b'u') => 'ü', (0xC8, b'y') => 'ÿ',
        (0xCA, b'A') => 'Å', (0xCA, b'a') => 'å', (0xCA, b'U') => 'Ů',
        (0xCA, b'u') => 'ů',
        (0xCB, b'C') => 'Ç', (0xCB, b'c') => 'ç', (0xCB, b'S') => 'Ş',
        (0xCB, b's') => 'ş', (0xCB, b'T') => 'Ţ', (0xCB, b't') => 'ţ',
        (0xCF, b'C') => 'Č', (0xCF, b'c') => 'č', (0xCF, b'S') => 'Š',
        (0xCF, b's') => 'š', (0xCF, b'Z') => 'Ž', (0xCF, b'z') => 'ž',
        (0xCF, b'E') => 'Ě', (0xCF, b'e') => 'ě', (0xCF, b'R') => 'Ř',
        (0xCF, b'r') => 'ř', (0xCF, b'D') => 'Ď', (0xCF, b'd') => 'ď',
        _ => return None,
    };
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_selector_passes_ascii_through() {
        // 0x10 0x00 0x01 selects ISO-8859-1
        let raw = [0x10, 0x00, 0x01, b'A', b'r', b't', b'e'];
        assert_eq!(decode_text(&raw), "Arte");
    }

    #[test]
    fn default_table_euro_addon() {
        let raw = [b'1', b'0', 0xA4];
        assert_eq!(decode_text(&raw), "10€");
    }

    #[test]
    fn utf8_selector() {
        let mut raw = vec![0x15];
        raw.extend_from_slice("ZDF média".as_bytes());
        assert_eq!(decode_text(&raw), "ZDF média");
    }

    #[test]
    fn latin_cyrillic_table() {
        // 0x01 -> ISO-8859-5, 0xBF = 'П'
        assert_eq!(decode_text(&[0x01, 0xBF, 0xD5, 0xE0, 0xD2, 0xEB, 0xD9]), "Первый");
    }

    #[test]
    fn iso6937_diacritics_fold() {
        // 0xC8 + 'u' composes u-umlaut
        assert_eq!(decode_text(&[b'M', 0xC8, b'u', b'n', b'c', b'h', b'e', b'n']), "München");
    }

    #[test]
    fn reserved_selector_falls_back_to_default() {
        assert_eq!(decode_text(&[0x08, b'x', b'y']), "xy");
    }

    #[test]
    fn truncated_extended_selector_is_empty_not_panic() {
        assert_eq!(decode_text(&[0x10, 0x00]), "");
        assert_eq!(decode_text(&[0x1F]), "");
    }

    #[test]
    fn unknown_codepage_label_defaults_to_utf8() {
        let c = Charset::new("KLINGON-1");
        assert_eq!(c.label(), "UTF-8");
    }
}
