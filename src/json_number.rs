//! JSON number grammar validator and `i32` parser.
//!
//! Standalone, with no dependency on any other module in this crate — it
//! is not wired into [`crate::transport`] or anything else, and exists
//! purely to validate the JSON number grammar and round-trip behavior on
//! its own terms.

use crate::error::{Error, Result};

/// A successfully parsed JSON number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i32),
    Float(f64),
}

/// Matches the JSON number grammar exactly:
/// `-? (0 | [1-9][0-9]*) (\.[0-9]+)? ([eE][+-]?[0-9]+)?`
///
/// Leading zeros are rejected except for a bare `"0"` integer part.
pub fn is_valid_number(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;

    if i < b.len() && b[i] == b'-' {
        i += 1;
    }

    match b.get(i) {
        Some(b'0') => i += 1,
        Some(c) if c.is_ascii_digit() => {
            while i < b.len() && b[i].is_ascii_digit() {
                i += 1;
            }
        }
        _ => return false,
    }

    if i < b.len() && b[i] == b'.' {
        i += 1;
        let start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
    }

    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        i += 1;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            i += 1;
        }
        let start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
    }

    i == b.len() && !b.is_empty()
}

/// Parses a grammar-valid, integer-shaped (no `.`, no exponent) JSON number
/// into an `i32`.
///
/// The naive approach — parse the digits as a positive magnitude, then
/// negate — overflows `i32` for `i32::MIN`, whose magnitude
/// (2,147,483,648) doesn't fit in `i32`. This widens the magnitude to
/// `i64` before negating to avoid that overflow.
pub fn parse_i32(s: &str) -> Result<i32> {
    if !is_valid_number(s) {
        return Err(Error::Syntax);
    }
    if s.contains('.') || s.contains('e') || s.contains('E') {
        return Err(Error::OpNotSupp);
    }

    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude: i64 = digits.parse().map_err(|_| Error::Syntax)?;
    let value: i64 = if negative { -magnitude } else { magnitude };
    i32::try_from(value).map_err(|_| Error::Range)
}

/// Parses any grammar-valid JSON number, integer or floating-point.
///
/// A number with *both* a non-zero fractional part and a non-zero exponent
/// is deliberately not supported: e.g. `"1.0e5"` (zero fraction) and
/// `"1.5e0"` (zero exponent) parse; `"1.5e3"` does not.
pub fn parse(s: &str) -> Result<Number> {
    if !is_valid_number(s) {
        return Err(Error::Syntax);
    }

    let frac_nonzero = s
        .split_once('.')
        .map(|(_, rest)| {
            let digits = rest.split(['e', 'E']).next().unwrap_or(rest);
            digits.bytes().any(|d| d != b'0')
        })
        .unwrap_or(false);
    let exp_nonzero = s
        .splitn(2, ['e', 'E'])
        .nth(1)
        .map(|rest| rest.trim_start_matches(['+', '-']).bytes().any(|d| d != b'0'))
        .unwrap_or(false);

    if frac_nonzero && exp_nonzero {
        return Err(Error::OpNotSupp);
    }

    if !s.contains('.') && !s.contains('e') && !s.contains('E') {
        return parse_i32(s).map(Number::Int);
    }
    s.parse::<f64>().map(Number::Float).map_err(|_| Error::Syntax)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_grammar_shapes() {
        for s in ["0", "-0", "1", "-1", "123", "1.5", "1e10", "1E+10", "1.5e-3", "-2147483648"] {
            assert!(is_valid_number(s), "expected valid: {s}");
        }
    }

    #[test]
    fn rejects_leading_zeros_and_malformed() {
        for s in ["01", "-01", "", "-", ".5", "1.", "1e", "1e+", "+1", "1.5.5"] {
            assert!(!is_valid_number(s), "expected invalid: {s}");
        }
    }

    #[test]
    fn int32_round_trips_full_range_sample() {
        let samples = [
            0i32,
            1,
            -1,
            42,
            -42,
            i32::MAX,
            i32::MIN,
            i32::MAX - 1,
            i32::MIN + 1,
            1_000_000,
            -1_000_000,
        ];
        for x in samples {
            let s = x.to_string();
            assert_eq!(parse_i32(&s).unwrap(), x, "round trip failed for {x}");
        }
    }

    #[test]
    fn int32_min_edge_case_does_not_overflow() {
        assert_eq!(parse_i32("-2147483648").unwrap(), i32::MIN);
    }

    #[test]
    fn int32_out_of_range_yields_range_error() {
        assert_eq!(parse_i32("2147483648"), Err(Error::Range));
        assert_eq!(parse_i32("-2147483649"), Err(Error::Range));
    }

    #[test]
    fn mixed_fraction_and_exponent_not_supported() {
        assert_eq!(parse("1.5e3"), Err(Error::OpNotSupp));
        assert_eq!(parse("1.0e5"), Ok(Number::Float(1.0e5)));
        assert_eq!(parse("1.5e0"), Ok(Number::Float(1.5)));
    }

    #[test]
    fn plain_integer_parses_as_int_variant() {
        assert_eq!(parse("42"), Ok(Number::Int(42)));
        assert_eq!(parse("-2147483648"), Ok(Number::Int(i32::MIN)));
    }
}
