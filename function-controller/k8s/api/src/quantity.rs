//! Validation of Kubernetes resource quantities.
//!
//! The API server rejects a workload whose resource quantities do not parse,
//! so quantities taken from a `Function` are checked before they are rendered.

use crate::Quantity;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid number in quantity {0:?}")]
    Number(String),

    #[error("invalid suffix in quantity {0:?}")]
    Suffix(String),
}

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 10] = ["n", "u", "m", "", "k", "M", "G", "T", "P", "E"];

/// Parses a quantity of the form `<signed number><suffix>`, where the suffix
/// is a binary SI suffix, a decimal SI suffix, or a decimal exponent.
pub fn parse(s: &str) -> Result<Quantity, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseError::Empty);
    }

    let digits = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(digits);
    if !is_signed_number(number) {
        return Err(ParseError::Number(s.to_string()));
    }
    if !is_suffix(suffix) {
        return Err(ParseError::Suffix(s.to_string()));
    }

    Ok(Quantity(s.to_string()))
}

fn is_signed_number(s: &str) -> bool {
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());

    match fraction {
        None => !whole.is_empty() && all_digits(whole),
        Some(fraction) => {
            !(whole.is_empty() && fraction.is_empty()) && all_digits(whole) && all_digits(fraction)
        }
    }
}

fn is_suffix(s: &str) -> bool {
    if BINARY_SUFFIXES.contains(&s) || DECIMAL_SUFFIXES.contains(&s) {
        return true;
    }

    match s.strip_prefix(['e', 'E']) {
        Some(exponent) => {
            let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            !exponent.is_empty() && exponent.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
