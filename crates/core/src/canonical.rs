//! ASCII-only compact JSON serialization.
//!
//! Output uses `,` and `:` separators with no whitespace, and escapes every
//! non-ASCII character (and DEL) as lowercase `\uXXXX`, with surrogate
//! pairs above the BMP. Downstream image tools read this exact form from
//! PNG `tEXt` chunks, which are Latin-1 only.

use std::io;

use serde::Serialize;

struct AsciiFormatter;

impl serde_json::ser::Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() && ch != '\x7f' {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize `value` as compact, ASCII-only JSON.
pub fn to_ascii_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, AsciiFormatter);
    value.serialize(&mut serializer)?;
    // Every byte written above is ASCII.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_separators() {
        let json = to_ascii_json(&serde_json::json!({"a": [1, 2], "b": "c"})).unwrap();
        assert_eq!(json, r#"{"a":[1,2],"b":"c"}"#);
    }

    #[test]
    fn escapes_non_ascii() {
        let json = to_ascii_json("café").unwrap();
        assert_eq!(json, r#""caf\u00e9""#);
    }

    #[test]
    fn escapes_astral_as_surrogate_pair() {
        let json = to_ascii_json("🦊").unwrap();
        assert_eq!(json, r#""\ud83e\udd8a""#);
    }

    #[test]
    fn escapes_delete_and_keeps_standard_escapes() {
        let json = to_ascii_json("a\u{7f}\"\n").unwrap();
        assert_eq!(json, r#""a\u007f\"\n""#);
    }

    #[test]
    fn output_parses_back_to_same_value() {
        let value = serde_json::json!({"prompt": "renard roux 🦊 — ça marche", "seed": 42});
        let json = to_ascii_json(&value).unwrap();
        assert!(json.is_ascii());
        let back: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
