//! Binary NUMERIC decoding.
//!
//! Wire layout: `ndigits:u16 weight:i16 sign:u16 dscale:u16` followed by
//! `ndigits` base-10000 digits, most significant first. The value is
//! `sum(digit[i] * 10000^(weight - i))`.

use crate::error::FieldError;

const SIGN_POS: u16 = 0x0000;
const SIGN_NEG: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_PINF: u16 = 0xD000;
const SIGN_NINF: u16 = 0xF000;

const NBASE: u16 = 10_000;

fn invalid(message: impl Into<String>) -> FieldError {
    FieldError::Invalid {
        ty: "numeric",
        message: message.into(),
    }
}

/// A decoded NUMERIC, before any conversion to a float.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Numeric {
    NaN,
    Infinity,
    NegInfinity,
    /// Decimal digits in exponent form, e.g. `-15000e-4` for -1.5.
    Finite(String),
}

impl Numeric {
    /// Validate and render a binary NUMERIC.
    pub fn decode(bytes: &[u8]) -> Result<Self, FieldError> {
        if bytes.len() < 8 {
            return Err(invalid(format!("{} byte header, need 8", bytes.len())));
        }
        let ndigits = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        let weight = i16::from_be_bytes([bytes[2], bytes[3]]);
        let sign = u16::from_be_bytes([bytes[4], bytes[5]]);

        if bytes.len() != 8 + ndigits * 2 {
            return Err(invalid(format!(
                "{} digits need {} bytes, field has {}",
                ndigits,
                8 + ndigits * 2,
                bytes.len()
            )));
        }

        let negative = match sign {
            SIGN_POS => false,
            SIGN_NEG => true,
            SIGN_NAN => return Ok(Numeric::NaN),
            SIGN_PINF => return Ok(Numeric::Infinity),
            SIGN_NINF => return Ok(Numeric::NegInfinity),
            other => return Err(invalid(format!("unknown sign word {:#06x}", other))),
        };

        let mut digits = String::with_capacity(ndigits * 4);
        for chunk in bytes[8..].chunks_exact(2) {
            let digit = u16::from_be_bytes([chunk[0], chunk[1]]);
            if digit >= NBASE {
                return Err(invalid(format!("digit {} out of range", digit)));
            }
            digits.push_str(&format!("{:04}", digit));
        }
        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(Numeric::Finite(if negative { "-0" } else { "0" }.to_string()));
        }

        // The last digit group sits at 10000^(weight - ndigits + 1).
        let exponent = (weight as i64 - ndigits as i64 + 1) * 4;
        let sign = if negative { "-" } else { "" };
        Ok(Numeric::Finite(format!("{}{}e{}", sign, digits, exponent)))
    }

    /// Nearest `f64`; finite values beyond its range round to an infinity.
    pub fn to_f64(&self) -> Result<f64, FieldError> {
        match self {
            Numeric::NaN => Ok(f64::NAN),
            Numeric::Infinity => Ok(f64::INFINITY),
            Numeric::NegInfinity => Ok(f64::NEG_INFINITY),
            Numeric::Finite(text) => text
                .parse()
                .map_err(|e| invalid(format!("{}: {}", text, e))),
        }
    }

    /// Like [`Numeric::to_f64`], rejecting finite values that do not fit.
    pub fn to_f64_in_range(&self, target: &'static str) -> Result<f64, FieldError> {
        let value = self.to_f64()?;
        match self {
            Numeric::Finite(text) if value.is_infinite() => Err(FieldError::OutOfRange {
                value: text.clone(),
                target,
            }),
            _ => Ok(value),
        }
    }
}

/// Decode a binary NUMERIC into the nearest `f64`.
///
/// The digits are rendered as decimal text and parsed, so the result is
/// correctly rounded. Out-of-range values come back infinite; the range
/// check belongs to whoever narrows them.
pub fn numeric_to_f64(bytes: &[u8]) -> Result<f64, FieldError> {
    Numeric::decode(bytes)?.to_f64()
}
