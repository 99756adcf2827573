use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Digits after the decimal point carried by NUMERIC.
pub const NUMERIC_SCALE: u32 = 9;
/// Total significant digits carried by NUMERIC.
pub const NUMERIC_PRECISION: u32 = 38;

const SCALE_FACTOR: i128 = 1_000_000_000;
const MAX_UNITS: i128 = 10i128.pow(NUMERIC_PRECISION) - 1;

/// Fixed point decimal with 38 digits of precision and 9 of scale, stored as
/// an integer count of `10^-9` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Numeric(i128);

impl Numeric {
    pub const ZERO: Numeric = Numeric(0);
    pub const MAX: Numeric = Numeric(MAX_UNITS);
    pub const MIN: Numeric = Numeric(-MAX_UNITS);

    /// Builds a value from a raw count of `10^-9` units.
    pub fn from_units(units: i128) -> Result<Self, Error> {
        if units.abs() > MAX_UNITS {
            return Err(Error::invalid_argument(format!(
                "value {units}e-9 exceeds NUMERIC precision of {NUMERIC_PRECISION} digits"
            )));
        }
        Ok(Self(units))
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value as i128 * SCALE_FACTOR)
    }

    pub fn units(&self) -> i128 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Lossy conversion, mainly for display and tests.
    pub fn to_f64(&self) -> f64 {
        self.0 as f64 / SCALE_FACTOR as f64
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let divisor = SCALE_FACTOR as u128;
        write!(
            f,
            "{sign}{}.{:0width$}",
            magnitude / divisor,
            magnitude % divisor,
            width = NUMERIC_SCALE as usize
        )
    }
}

impl FromStr for Numeric {
    type Err = Error;

    /// Parses a plain decimal. Fractions longer than nine digits are rounded
    /// half away from zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::invalid_argument(format!("invalid NUMERIC literal {s:?}"));
        let trimmed = s.trim();
        let (negative, body) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let int_digits = int_part.trim_start_matches('0');
        if int_digits.len() > (NUMERIC_PRECISION - NUMERIC_SCALE) as usize {
            return Err(Error::invalid_argument(format!(
                "NUMERIC literal {s:?} exceeds {NUMERIC_PRECISION} digits of precision"
            )));
        }
        let mut units: i128 = if int_digits.is_empty() {
            0
        } else {
            int_digits.parse::<i128>().map_err(|_| invalid())?
        };
        units *= SCALE_FACTOR;

        let scale = NUMERIC_SCALE as usize;
        let (kept, rest) = if frac_part.len() > scale {
            frac_part.split_at(scale)
        } else {
            (frac_part, "")
        };
        if !kept.is_empty() {
            let padded = format!("{kept:0<scale$}");
            units += padded.parse::<i128>().map_err(|_| invalid())?;
        }
        if rest.as_bytes().first().is_some_and(|d| *d >= b'5') {
            units += 1;
        }
        Numeric::from_units(if negative { -units } else { units })
    }
}

impl TryFrom<String> for Numeric {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Numeric> for String {
    fn from(value: Numeric) -> Self {
        value.to_string()
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_exactly_nine_fraction_digits() {
        assert_eq!(Numeric::from_i64(12).to_string(), "12.000000000");
        assert_eq!("-0.5".parse::<Numeric>().unwrap().to_string(), "-0.500000000");
        assert_eq!("3.14".parse::<Numeric>().unwrap().to_string(), "3.140000000");
        assert_eq!(Numeric::ZERO.to_string(), "0.000000000");
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(
            "0.0000000015".parse::<Numeric>().unwrap().units(),
            2
        );
        assert_eq!(
            "-0.0000000015".parse::<Numeric>().unwrap().units(),
            -2
        );
        assert_eq!(
            "0.0000000014".parse::<Numeric>().unwrap().units(),
            1
        );
    }

    #[test]
    fn enforces_precision() {
        let max = "99999999999999999999999999999.999999999";
        assert_eq!(max.parse::<Numeric>().unwrap(), Numeric::MAX);
        assert!("100000000000000000000000000000".parse::<Numeric>().is_err());
        assert!(Numeric::from_units(MAX_UNITS + 1).is_err());
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "-", ".", "1.2.3", "abc", "1e5", "--1"] {
            assert!(bad.parse::<Numeric>().is_err(), "{bad} should fail");
        }
        assert_eq!(".5".parse::<Numeric>().unwrap().to_string(), "0.500000000");
        assert_eq!("+7".parse::<Numeric>().unwrap(), Numeric::from_i64(7));
    }

    #[test]
    fn serde_uses_the_string_form() {
        let value: Numeric = "1.25".parse().unwrap();
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"1.250000000\"");
        let back: Numeric = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
