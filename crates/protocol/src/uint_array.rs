//! Compact, URL-safe encoding for arrays of unsigned integers.
//!
//! Every number is written as base-32 digits, most significant first. The
//! final digit of a number comes from [`TERMINAL`], every other digit from
//! [`CONTINUATION`], so numbers need no separator: `[0, 31, 32]` encodes as
//! `"0vx0"`.

use thiserror::Error;

const TERMINAL: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
const CONTINUATION: &[u8; 32] = b"wxyzABCDEFGHIJKLMNOPQRSTUVWXYZ._";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UintArrayError {
    #[error("unexpected character {0:?} at offset {1}")]
    BadChar(char, usize),
    #[error("encoded value ends in the middle of a number")]
    Truncated,
    #[error("encoded value overflows usize")]
    Overflow,
}

pub fn encode_uint_array(values: &[usize]) -> String {
    let mut out = String::with_capacity(values.len() * 2);
    let mut digits = Vec::new();
    for &value in values {
        digits.clear();
        let mut v = value;
        loop {
            digits.push(v % 32);
            v /= 32;
            if v == 0 {
                break;
            }
        }
        // `digits` is least significant first.
        for (i, &d) in digits.iter().enumerate().rev() {
            let table = if i == 0 { TERMINAL } else { CONTINUATION };
            out.push(char::from(table[d]));
        }
    }
    out
}

pub fn decode_uint_array(encoded: &str) -> Result<Vec<usize>, UintArrayError> {
    let mut values = Vec::new();
    let mut acc: usize = 0;
    let mut pending = false;
    for (offset, ch) in encoded.char_indices() {
        let byte = u8::try_from(ch).map_err(|_| UintArrayError::BadChar(ch, offset))?;
        let (digit, last) = if let Some(d) = TERMINAL.iter().position(|&c| c == byte) {
            (d, true)
        } else if let Some(d) = CONTINUATION.iter().position(|&c| c == byte) {
            (d, false)
        } else {
            return Err(UintArrayError::BadChar(ch, offset));
        };
        acc = acc
            .checked_mul(32)
            .and_then(|v| v.checked_add(digit))
            .ok_or(UintArrayError::Overflow)?;
        if last {
            values.push(acc);
            acc = 0;
            pending = false;
        } else {
            pending = true;
        }
    }
    if pending {
        return Err(UintArrayError::Truncated);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_values_are_one_char() {
        assert_eq!(encode_uint_array(&[0, 1, 10, 31]), "01av");
    }

    #[test]
    fn multi_digit_values() {
        assert_eq!(encode_uint_array(&[32]), "x0");
        assert_eq!(encode_uint_array(&[0, 31, 32]), "0vx0");
        assert_eq!(decode_uint_array("0vx0"), Ok(vec![0, 31, 32]));
    }

    #[test]
    fn large_path_survives() {
        let path = vec![5, 70_000, 0, 1_048_576, 33];
        assert_eq!(decode_uint_array(&encode_uint_array(&path)), Ok(path));
    }

    #[test]
    fn empty_array() {
        assert_eq!(encode_uint_array(&[]), "");
        assert_eq!(decode_uint_array(""), Ok(vec![]));
    }

    #[test]
    fn rejects_dangling_continuation() {
        assert_eq!(decode_uint_array("1x"), Err(UintArrayError::Truncated));
    }

    #[test]
    fn rejects_separator_chars() {
        assert!(matches!(
            decode_uint_array("1-2"),
            Err(UintArrayError::BadChar('-', 1))
        ));
    }
}
