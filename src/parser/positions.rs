//! Position conversion utilities.
//!
//! The scanner and the raw-block capture in the tree builder work on byte
//! offsets; diagnostics want line/column. These helpers convert between the two.

use super::tokenizer::Position;

/// Compute the line/column position of a byte offset.
///
/// Offsets past the end of `source` are clamped. Offsets inside a multi-byte
/// character are rounded down to the character boundary.
pub fn position_at(source: &str, byte_offset: usize) -> Position {
    let mut byte = byte_offset.min(source.len());
    while !source.is_char_boundary(byte) {
        byte -= 1;
    }

    let before = &source[..byte];
    let line = before.matches('\n').count();
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let col = source[line_start..byte].chars().count();

    Position { byte, line, col }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line() {
        let pos = position_at("hello world", 6);
        assert_eq!((pos.line, pos.col, pos.byte), (0, 6, 6));
    }

    #[test]
    fn test_later_line() {
        let pos = position_at("a\nbc\ndef", 7);
        assert_eq!((pos.line, pos.col), (2, 2));
    }

    #[test]
    fn test_multibyte() {
        // é is 2 bytes but one column
        let pos = position_at("café x", 6);
        assert_eq!(pos.col, 5);
    }

    #[test]
    fn test_out_of_bounds() {
        let pos = position_at("hello", 100);
        assert_eq!(pos.byte, 5);
        assert_eq!(pos.col, 5);
    }
}
