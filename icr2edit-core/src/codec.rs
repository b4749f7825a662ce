//! Conversion between raw little-endian field bytes and logical values.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{value} is out of range ({min} to {max})")]
    OutOfRange { value: String, min: i64, max: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    One,
    Two,
    Four,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::One => 1,
            Width::Two => 2,
            Width::Four => 4,
        }
    }

    pub fn from_bytes(n: u32) -> Option<Width> {
        match n {
            1 => Some(Width::One),
            2 => Some(Width::Two),
            4 => Some(Width::Four),
            _ => None,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

const DISPLAY_PLACES: usize = 6;

/// Positive rational divisor applied on decode: `logical = raw / scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scale {
    numerator: u32,
    denominator: u32,
}

impl Default for Scale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Scale {
    pub const IDENTITY: Scale = Scale {
        numerator: 1,
        denominator: 1,
    };

    pub fn new(numerator: u32, denominator: u32) -> Option<Scale> {
        if numerator == 0 || denominator == 0 {
            return None;
        }
        let g = gcd(numerator, denominator);
        Some(Scale {
            numerator: numerator / g,
            denominator: denominator / g,
        })
    }

    pub fn is_identity(self) -> bool {
        self == Self::IDENTITY
    }

    fn factor(self) -> f64 {
        f64::from(self.numerator) / f64::from(self.denominator)
    }

    pub fn to_logical(self, raw: i64) -> f64 {
        raw as f64 * f64::from(self.denominator) / f64::from(self.numerator)
    }

    /// One raw step expressed in logical units.
    pub fn step(self) -> f64 {
        1.0 / self.factor()
    }

    /// Decimal places that show every raw step exactly, when the scale is a
    /// power of ten.
    fn exact_decimals(self) -> Option<usize> {
        if self.denominator != 1 {
            return None;
        }
        let mut n = self.numerator;
        let mut places = 0;
        while n % 10 == 0 {
            n /= 10;
            places += 1;
        }
        (n == 1).then_some(places)
    }

    fn display_decimals(self) -> usize {
        self.exact_decimals().unwrap_or(DISPLAY_PLACES)
    }

    /// Largest gap between a logical value and what gets stored for it.
    /// Power-of-ten scales only absorb float noise; other scales also
    /// absorb the rounding of their six-place display form.
    fn tolerance(self) -> f64 {
        match self.exact_decimals() {
            Some(_) => self.step() * 1e-9,
            None => 0.5 * 10f64.powi(-(DISPLAY_PLACES as i32)),
        }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

impl FromStr for Scale {
    type Err = CodecError;

    /// Accepts `N` or `N/D`; an empty string is the identity scale.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Scale::IDENTITY);
        }
        let bad = || CodecError::InvalidInput(format!("invalid scale '{s}'"));
        let (num, den) = match s.split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s, "1"),
        };
        let num = num.parse::<u32>().map_err(|_| bad())?;
        let den = den.parse::<u32>().map_err(|_| bad())?;
        Scale::new(num, den).ok_or_else(bad)
    }
}

/// Logical value supplied by or shown to the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Integer(i64),
    Decimal(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
        }
    }
}

impl FromStr for Value {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let invalid = || CodecError::InvalidInput(format!("'{t}' is not a number"));
        if t.is_empty() {
            return Err(CodecError::InvalidInput("empty value".to_string()));
        }

        let (negative, body) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t.strip_prefix('+').unwrap_or(t)),
        };
        if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
            if hex.is_empty() || hex.starts_with(['+', '-']) {
                return Err(invalid());
            }
            let magnitude = i64::from_str_radix(hex, 16).map_err(|_| invalid())?;
            return Ok(Value::Integer(if negative { -magnitude } else { magnitude }));
        }

        if t.contains(['.', 'e', 'E']) {
            let d = t.parse::<f64>().map_err(|_| invalid())?;
            if !d.is_finite() {
                return Err(invalid());
            }
            return Ok(Value::Decimal(d));
        }

        t.parse::<i64>().map(Value::Integer).map_err(|_| invalid())
    }
}

/// How one field is laid out in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldEncoding {
    pub width: Width,
    pub signed: bool,
    pub scale: Scale,
}

impl FieldEncoding {
    pub fn new(width: Width, signed: bool) -> Self {
        Self {
            width,
            signed,
            scale: Scale::IDENTITY,
        }
    }

    pub fn scaled(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    /// Inclusive raw integer bounds.
    pub fn raw_range(&self) -> (i64, i64) {
        let bits = 8 * self.width.bytes() as u32;
        if self.signed {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        } else {
            (0, (1i64 << bits) - 1)
        }
    }

    /// Type name in the catalog's vocabulary.
    pub fn type_name(&self) -> String {
        let prefix = if self.signed { "Int" } else { "UInt" };
        format!("{prefix}{}", self.width.bytes() * 8)
    }
}

/// Decoded contents of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldValue {
    pub raw: i64,
    pub scale: Scale,
}

impl FieldValue {
    pub fn value(&self) -> Value {
        if self.scale.is_identity() {
            Value::Integer(self.raw)
        } else {
            Value::Decimal(self.scale.to_logical(self.raw))
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale.is_identity() {
            return write!(f, "{}", self.raw);
        }
        let places = self.scale.display_decimals();
        let text = format!("{:.*}", places, self.scale.to_logical(self.raw));
        let text = if text.contains('.') {
            text.trim_end_matches('0').trim_end_matches('.')
        } else {
            text.as_str()
        };
        f.write_str(text)
    }
}

/// Decode a field from the first `width` bytes of `bytes`.
///
/// Panics if `bytes` is shorter than the encoding's width; callers slice
/// from an image whose bounds were checked when the catalog was bound.
pub fn decode(bytes: &[u8], encoding: FieldEncoding) -> FieldValue {
    let raw = match (encoding.width, encoding.signed) {
        (Width::One, false) => i64::from(bytes[0]),
        (Width::One, true) => i64::from(bytes[0] as i8),
        (Width::Two, false) => i64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
        (Width::Two, true) => i64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
        (Width::Four, false) => {
            i64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        (Width::Four, true) => {
            i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
    };
    FieldValue {
        raw,
        scale: encoding.scale,
    }
}

/// Resolve a logical value to the raw integer that will be stored.
///
/// Scaled values round half to even to absorb float noise; a value the
/// scale cannot hold is rejected rather than moved to the nearest step.
/// Fractions are rejected for unscaled fields.
pub fn to_raw(value: Value, encoding: FieldEncoding) -> Result<i64, CodecError> {
    let (min, max) = encoding.raw_range();
    let out_of_range = || CodecError::OutOfRange {
        value: value.to_string(),
        min,
        max,
    };

    let raw = if encoding.scale.is_identity() {
        match value {
            Value::Integer(i) => i,
            Value::Decimal(d) => {
                if !d.is_finite() {
                    return Err(CodecError::InvalidInput(format!("'{d}' is not a number")));
                }
                if d.fract() != 0.0 {
                    return Err(CodecError::InvalidInput(format!(
                        "{d} is not a whole number"
                    )));
                }
                if d < min as f64 || d > max as f64 {
                    return Err(out_of_range());
                }
                d as i64
            }
        }
    } else {
        let logical = match value {
            Value::Integer(i) => i as f64,
            Value::Decimal(d) => d,
        };
        if !logical.is_finite() {
            return Err(CodecError::InvalidInput(format!("'{logical}' is not a number")));
        }
        let rounded = (logical * encoding.scale.factor()).round_ties_even();
        if rounded < min as f64 || rounded > max as f64 {
            return Err(out_of_range());
        }
        let raw = rounded as i64;
        let drift = (encoding.scale.to_logical(raw) - logical).abs();
        if drift > encoding.scale.tolerance() {
            return Err(CodecError::InvalidInput(format!(
                "{logical} cannot be stored with step {}",
                encoding.scale.step()
            )));
        }
        raw
    };

    if raw < min || raw > max {
        return Err(out_of_range());
    }
    Ok(raw)
}

/// Encode a logical value into exactly `width` little-endian bytes.
pub fn encode(value: Value, encoding: FieldEncoding) -> Result<Vec<u8>, CodecError> {
    let raw = to_raw(value, encoding)?;
    // Two's complement low bytes cover both signed and unsigned once the
    // range check has passed.
    Ok(raw.to_le_bytes()[..encoding.width.bytes()].to_vec())
}

/// Parse user text and encode it.
pub fn encode_str(text: &str, encoding: FieldEncoding) -> Result<Vec<u8>, CodecError> {
    encode(text.parse::<Value>()?, encoding)
}
