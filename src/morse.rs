//! Morse code table and character encoder.
//!
//! The table matches what cwdaemon-compatible keyers expect on the wire:
//! every character is sent as its dots and dashes followed by a single
//! space unit, and a space character is a single extra space unit. The
//! hardware keyer turns those units into timed key-down/key-up periods.
//!
//! # Example
//!
//! ```
//! use cwkeyer::morse::{encode, MorseCode};
//!
//! let codes: Vec<_> = encode(b"so").collect();
//! assert_eq!(codes[0].code, Some(MorseCode::Letter("...")));
//! assert_eq!(codes[1].code, Some(MorseCode::Letter("---")));
//! ```

use std::fmt;

/// Byte that asks the keying device to drop its queue.
pub const RESET_CHAR: u8 = b'*';

/// A single timed unit sent to the keying device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// Short key-down
    Dot,
    /// Long key-down
    Dash,
    /// Gap terminating a character
    CharGap,
    /// Extra gap between words
    WordGap,
}

impl Symbol {
    /// The byte written to the device for this symbol.
    #[inline]
    pub const fn as_byte(self) -> u8 {
        match self {
            Symbol::Dot => b'.',
            Symbol::Dash => b'-',
            Symbol::CharGap | Symbol::WordGap => b' ',
        }
    }
}

/// The table entry for one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorseCode {
    /// A letter, digit or punctuation mark with its dot/dash pattern.
    Letter(&'static str),
    /// The gap between two words.
    WordSpace,
    /// Abort the message in flight and flush the device queue.
    Reset,
}

impl MorseCode {
    /// The timed symbols for this code, including the trailing gap.
    ///
    /// `Reset` has no timed symbols; the keying driver handles it.
    pub fn symbols(&self) -> impl Iterator<Item = Symbol> + '_ {
        let (pattern, gap) = match self {
            MorseCode::Letter(p) => (*p, Some(Symbol::CharGap)),
            MorseCode::WordSpace => ("", Some(Symbol::WordGap)),
            MorseCode::Reset => ("", None),
        };
        pattern
            .bytes()
            .filter_map(|b| match b {
                b'.' => Some(Symbol::Dot),
                b'-' => Some(Symbol::Dash),
                _ => None,
            })
            .chain(gap)
    }
}

impl fmt::Display for MorseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MorseCode::Letter(p) => write!(f, "{}", p),
            MorseCode::WordSpace => write!(f, "/"),
            MorseCode::Reset => write!(f, "<reset>"),
        }
    }
}

/// Look up the code for a character, folding ASCII case.
///
/// Note that `Q` and `Y` share the same pattern. This is the table the
/// existing keyer firmware was built against, so it is kept as-is.
pub const fn lookup(c: u8) -> Option<MorseCode> {
    let pattern = match c.to_ascii_uppercase() {
        b' ' => return Some(MorseCode::WordSpace),
        RESET_CHAR => return Some(MorseCode::Reset),
        b'A' => ".-",
        b'B' => "-...",
        b'C' => "-.-.",
        b'D' => "-..",
        b'E' => ".",
        b'F' => "..-.",
        b'G' => "--.",
        b'H' => "....",
        b'I' => "..",
        b'J' => ".---",
        b'K' => "-.-",
        b'L' => ".-..",
        b'M' => "--",
        b'N' => "-.",
        b'O' => "---",
        b'P' => ".--.",
        b'Q' => "--.-",
        b'R' => ".-.",
        b'S' => "...",
        b'T' => "-",
        b'U' => "..-",
        b'V' => "...-",
        b'W' => ".--",
        b'X' => "-..-",
        b'Y' => "--.-",
        b'Z' => "--..",
        b'0' => "-----",
        b'1' => ".----",
        b'2' => "..---",
        b'3' => "...--",
        b'4' => "....-",
        b'5' => ".....",
        b'6' => "-....",
        b'7' => "--...",
        b'8' => "---..",
        b'9' => "----.",
        b'/' => "-..-.",
        b'=' => "-...-",
        b'-' => "-....-",
        b'.' => ".-.-.-",
        b'+' => ".-.-.",
        _ => return None,
    };
    Some(MorseCode::Letter(pattern))
}

/// One input character paired with its code, or `None` if unencodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    /// The character exactly as received.
    pub ch: u8,
    /// Its table entry.
    pub code: Option<MorseCode>,
}

/// Lazily encode a byte string, one entry per input byte.
pub fn encode(text: &[u8]) -> impl Iterator<Item = Encoded> + '_ {
    text.iter().map(|&ch| Encoded {
        ch,
        code: lookup(ch),
    })
}

/// Render the bytes a keyer would write for `text`, stopping at a reset.
///
/// Unencodable characters contribute nothing.
pub fn render(text: &[u8]) -> String {
    let mut out = String::with_capacity(text.len() * 6);
    for encoded in encode(text) {
        match encoded.code {
            Some(MorseCode::Reset) => break,
            Some(code) => out.extend(code.symbols().map(|s| s.as_byte() as char)),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TABLE: &[(u8, &str)] = &[
        (b'A', ".-"),
        (b'B', "-..."),
        (b'C', "-.-."),
        (b'D', "-.."),
        (b'E', "."),
        (b'F', "..-."),
        (b'G', "--."),
        (b'H', "...."),
        (b'I', ".."),
        (b'J', ".---"),
        (b'K', "-.-"),
        (b'L', ".-.."),
        (b'M', "--"),
        (b'N', "-."),
        (b'O', "---"),
        (b'P', ".--."),
        (b'Q', "--.-"),
        (b'R', ".-."),
        (b'S', "..."),
        (b'T', "-"),
        (b'U', "..-"),
        (b'V', "...-"),
        (b'W', ".--"),
        (b'X', "-..-"),
        (b'Y', "--.-"),
        (b'Z', "--.."),
        (b'0', "-----"),
        (b'1', ".----"),
        (b'2', "..---"),
        (b'3', "...--"),
        (b'4', "....-"),
        (b'5', "....."),
        (b'6', "-...."),
        (b'7', "--..."),
        (b'8', "---.."),
        (b'9', "----."),
        (b'/', "-..-."),
        (b'=', "-...-"),
        (b'-', "-....-"),
        (b'.', ".-.-.-"),
        (b'+', ".-.-."),
    ];

    #[test]
    fn test_table_patterns() {
        for &(c, pattern) in TABLE {
            assert_eq!(
                lookup(c),
                Some(MorseCode::Letter(pattern)),
                "wrong pattern for {:?}",
                c as char
            );
        }
    }

    #[test]
    fn test_lowercase_folds() {
        for &(c, pattern) in TABLE {
            let lower = c.to_ascii_lowercase();
            assert_eq!(lookup(lower), Some(MorseCode::Letter(pattern)));
        }
    }

    #[test]
    fn test_q_and_y_share_pattern() {
        // Kept from the deployed table; standard Y would be "-.--".
        assert_eq!(lookup(b'Q'), lookup(b'Y'));
        assert_eq!(lookup(b'y'), Some(MorseCode::Letter("--.-")));
    }

    #[test]
    fn test_space_and_reset() {
        assert_eq!(lookup(b' '), Some(MorseCode::WordSpace));
        assert_eq!(lookup(RESET_CHAR), Some(MorseCode::Reset));
        assert_eq!(MorseCode::Reset.symbols().count(), 0);
        assert_eq!(
            MorseCode::WordSpace.symbols().collect::<Vec<_>>(),
            vec![Symbol::WordGap]
        );
    }

    #[test]
    fn test_symbols_end_with_char_gap() {
        let symbols: Vec<_> = MorseCode::Letter("-.-").symbols().collect();
        assert_eq!(
            symbols,
            vec![Symbol::Dash, Symbol::Dot, Symbol::Dash, Symbol::CharGap]
        );
    }

    #[test]
    fn test_unencodable() {
        for c in [b'?', b',', b'\n', b'@', b'!', 0u8, 0xFF, 0x1B] {
            assert_eq!(lookup(c), None, "{:#04x} should be unencodable", c);
        }
    }

    #[test]
    fn test_encode_keeps_original_case() {
        let encoded: Vec<_> = encode(b"sK?").collect();
        assert_eq!(encoded.len(), 3);
        assert_eq!(encoded[0].ch, b's');
        assert_eq!(encoded[0].code, Some(MorseCode::Letter("...")));
        assert_eq!(encoded[1].ch, b'K');
        assert_eq!(encoded[2].code, None);
    }

    #[test]
    fn test_render_sos() {
        assert_eq!(render(b"SOS"), "... --- ... ");
        assert_eq!(render(b"CQ DE"), "-.-. --.-  -.. . ");
    }

    #[test]
    fn test_render_stops_at_reset() {
        assert_eq!(render(b"E*T"), ". ");
    }

    proptest! {
        #[test]
        fn prop_unmapped_bytes_are_unencodable(c in any::<u8>()) {
            let upper = c.to_ascii_uppercase();
            let mapped = upper.is_ascii_uppercase()
                || upper.is_ascii_digit()
                || b" /=-.+*".contains(&upper);
            prop_assert_eq!(lookup(c).is_some(), mapped);
        }

        #[test]
        fn prop_encode_yields_one_entry_per_byte(text in proptest::collection::vec(any::<u8>(), 0..256)) {
            let encoded: Vec<_> = encode(&text).collect();
            prop_assert_eq!(encoded.len(), text.len());
            for (e, &c) in encoded.iter().zip(&text) {
                prop_assert_eq!(e.ch, c);
            }
        }

        #[test]
        fn prop_rendered_units_are_wire_bytes(text in "[ -~]{0,64}") {
            let rendered = render(text.as_bytes());
            prop_assert!(rendered.bytes().all(|b| matches!(b, b'.' | b'-' | b' ')));
        }
    }
}
