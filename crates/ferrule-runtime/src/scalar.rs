//! Scalar codec
//!
//! Stateless conversions between native base scalars and host values.
//!
//! | encoding   | widths      | host value                        |
//! |------------|-------------|-----------------------------------|
//! | bool       | 1           | `Bool` (any truthy value encodes) |
//! | signed     | 1, 2, 4, 8  | `Int`, range checked              |
//! | unsigned   | 1, 2, 4, 8  | `Int`, range checked              |
//! | float      | 4, 8, 16    | `Float`                           |
//! | complex    | 8, 16, 32   | `Complex` (two floats)            |
//! | char       | 1, 2, 4, 8  | 1-char `Bytes` / `Str`            |
//!
//! 16-byte floats are the platform `long double`: x87 extended precision on
//! x86 targets, IEEE binary128 elsewhere. They are decoded to the nearest
//! `f64`.

use crate::error::{BridgeError, BridgeResult};
use crate::types::Encoding;
use crate::value::Value;

/// Whether the codec handles `encoding` at `size` bytes
pub fn supports(encoding: Encoding, size: usize) -> bool {
    match encoding {
        Encoding::Bool => size == 1,
        Encoding::Signed | Encoding::Unsigned | Encoding::SignedChar | Encoding::UnsignedChar => {
            matches!(size, 1 | 2 | 4 | 8)
        }
        Encoding::Float => matches!(size, 4 | 8 | 16),
        Encoding::Complex => matches!(size, 8 | 16 | 32),
    }
}

fn unsupported(encoding: Encoding, size: usize) -> BridgeError {
    BridgeError::unsupported(
        format!("{:?}/{}", encoding, size),
        format!("no codec for {:?} scalars of {} bytes", encoding, size),
    )
}

/// Decode native bytes into a host value
pub fn decode(encoding: Encoding, bytes: &[u8]) -> BridgeResult<Value> {
    let size = bytes.len();
    if !supports(encoding, size) {
        return Err(unsupported(encoding, size));
    }
    Ok(match encoding {
        Encoding::Bool => Value::Bool(bytes[0] != 0),
        Encoding::Signed => Value::Int(load_integer(bytes, true)),
        Encoding::Unsigned => Value::Int(load_integer(bytes, false)),
        Encoding::Float => Value::Float(load_float(bytes)),
        Encoding::Complex => {
            let (re, im) = bytes.split_at(size / 2);
            Value::Complex {
                re: load_float(re),
                im: load_float(im),
            }
        }
        Encoding::SignedChar | Encoding::UnsignedChar if size == 1 => Value::bytes(bytes),
        Encoding::SignedChar | Encoding::UnsignedChar => {
            let code = load_integer(bytes, false);
            match u32::try_from(code).ok().and_then(char::from_u32) {
                Some(c) => Value::Str(c.to_string().into()),
                None => Value::bytes(bytes),
            }
        }
    })
}

/// Encode a host value into `out`, whose length is the native width
pub fn encode(encoding: Encoding, value: &Value, out: &mut [u8]) -> BridgeResult<()> {
    let size = out.len();
    if !supports(encoding, size) {
        return Err(unsupported(encoding, size));
    }
    match encoding {
        Encoding::Bool => {
            out[0] = value.is_truthy() as u8;
        }
        Encoding::Signed | Encoding::Unsigned => {
            let n = value
                .as_int()
                .ok_or_else(|| BridgeError::mismatch("int", value.type_name()))?;
            store_integer(n, encoding.is_signed(), out)?;
        }
        Encoding::Float => {
            let x = value
                .as_float()
                .ok_or_else(|| BridgeError::mismatch("float", value.type_name()))?;
            store_float(x, out);
        }
        Encoding::Complex => {
            let (re, im) = match value {
                Value::Complex { re, im } => (*re, *im),
                other => (
                    other
                        .as_float()
                        .ok_or_else(|| BridgeError::mismatch("complex", other.type_name()))?,
                    0.0,
                ),
            };
            let (lo, hi) = out.split_at_mut(size / 2);
            store_float(re, lo);
            store_float(im, hi);
        }
        Encoding::SignedChar | Encoding::UnsignedChar => {
            let code = char_code(value)?;
            store_integer(code, encoding.is_signed() && code < 0, out)?;
        }
    }
    Ok(())
}

/// Code point of a length-1 string, byte string or integer
fn char_code(value: &Value) -> BridgeResult<i128> {
    let expected = || BridgeError::mismatch("string of length 1", value.type_name());
    match value {
        Value::Bytes(b) if b.len() == 1 => Ok(b[0] as i128),
        Value::Str(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c as i128),
                _ => Err(expected()),
            }
        }
        Value::Int(n) => Ok(*n),
        _ => Err(expected()),
    }
}

/// Read a native-endian integer of 1 to 16 bytes
pub fn load_integer(bytes: &[u8], signed: bool) -> i128 {
    let n = bytes.len().min(16);
    let mut buf = [0u8; 16];
    let raw = if cfg!(target_endian = "little") {
        buf[..n].copy_from_slice(&bytes[..n]);
        u128::from_le_bytes(buf)
    } else {
        buf[16 - n..].copy_from_slice(&bytes[..n]);
        u128::from_be_bytes(buf)
    };
    if n == 0 {
        return 0;
    }
    let shift = 128 - 8 * n as u32;
    if signed {
        ((raw << shift) as i128) >> shift
    } else {
        raw as i128
    }
}

/// Write `value` as a native-endian integer of `out.len()` bytes, checking
/// the exact range of the width
pub fn store_integer(value: i128, signed: bool, out: &mut [u8]) -> BridgeResult<()> {
    let bits = out.len() * 8;
    let fits = if signed {
        let half = 1i128 << (bits - 1);
        (-half..half).contains(&value)
    } else {
        value >= 0 && value <= (1i128 << bits) - 1
    };
    if !fits {
        return Err(BridgeError::Overflow { bits, signed });
    }
    let n = out.len();
    if cfg!(target_endian = "little") {
        out.copy_from_slice(&value.to_le_bytes()[..n]);
    } else {
        out.copy_from_slice(&value.to_be_bytes()[16 - n..]);
    }
    Ok(())
}

fn load_float(bytes: &[u8]) -> f64 {
    match bytes.len() {
        4 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            f64::from_ne_bytes(buf)
        }
        _ => load_long_double(bytes),
    }
}

fn store_float(value: f64, out: &mut [u8]) {
    match out.len() {
        4 => out.copy_from_slice(&(value as f32).to_ne_bytes()),
        8 => out.copy_from_slice(&value.to_ne_bytes()),
        _ => store_long_double(value, out),
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn load_long_double(bytes: &[u8]) -> f64 {
    x87::to_f64(bytes)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn store_long_double(value: f64, out: &mut [u8]) {
    x87::from_f64(value, out)
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn load_long_double(bytes: &[u8]) -> f64 {
    quad::to_f64(bytes)
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn store_long_double(value: f64, out: &mut [u8]) {
    quad::from_f64(value, out)
}

/// `x * 2^exp` without intermediate overflow
fn scale(mut x: f64, mut exp: i32) -> f64 {
    while exp > 1000 {
        x *= 2f64.powi(1000);
        exp -= 1000;
    }
    while exp < -1000 {
        x *= 2f64.powi(-1000);
        exp += 1000;
    }
    x * 2f64.powi(exp)
}

/// Split an `f64` into sign, unbiased exponent and a 53-bit significand with
/// the leading bit at position 52. `None` for zero, infinities and NaN.
fn normalize(value: f64) -> Option<(bool, i32, u64)> {
    let bits = value.to_bits();
    let sign = bits >> 63 != 0;
    let exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & ((1u64 << 52) - 1);
    match exp {
        0 if frac == 0 => None,
        0x7ff => None,
        0 => {
            let shift = frac.leading_zeros() - 11;
            Some((sign, -1022 - shift as i32, frac << shift))
        }
        _ => Some((sign, exp - 1023, frac | (1u64 << 52))),
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64", test))]
mod x87 {
    //! 80-bit extended precision stored in the low 10 bytes of a 16-byte slot

    const BIAS: i32 = 16383;

    pub(super) fn to_f64(bytes: &[u8]) -> f64 {
        let mut m = [0u8; 8];
        m.copy_from_slice(&bytes[..8]);
        let mantissa = u64::from_le_bytes(m);
        let se = u16::from_le_bytes([bytes[8], bytes[9]]);
        let sign = if se & 0x8000 != 0 { -1.0 } else { 1.0 };
        let exp = (se & 0x7fff) as i32;
        if exp == 0x7fff {
            return if mantissa << 1 == 0 {
                sign * f64::INFINITY
            } else {
                f64::NAN
            };
        }
        if mantissa == 0 {
            return sign * 0.0;
        }
        // explicit integer bit: value = mantissa * 2^(exp - bias - 63)
        let exp = if exp == 0 { 1 } else { exp };
        sign * super::scale(mantissa as f64, exp - BIAS - 63)
    }

    pub(super) fn from_f64(value: f64, out: &mut [u8]) {
        out.fill(0);
        let sign: u16 = if value.is_sign_negative() { 0x8000 } else { 0 };
        let (exp, mantissa) = match super::normalize(value) {
            Some((_, e, m)) => ((e + BIAS) as u16, m << 11),
            None if value.is_nan() => (0x7fff, (1u64 << 63) | (1u64 << 62)),
            None if value.is_infinite() => (0x7fff, 1u64 << 63),
            None => (0, 0),
        };
        out[..8].copy_from_slice(&mantissa.to_le_bytes());
        out[8..10].copy_from_slice(&(sign | exp).to_le_bytes());
    }
}

#[cfg(any(not(any(target_arch = "x86", target_arch = "x86_64")), test))]
mod quad {
    //! IEEE 754 binary128: 1 sign bit, 15 exponent bits, 112 fraction bits

    const BIAS: i32 = 16383;
    const FRACTION: u32 = 112;

    fn load(bytes: &[u8]) -> u128 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&bytes[..16]);
        u128::from_ne_bytes(buf)
    }

    pub(super) fn to_f64(bytes: &[u8]) -> f64 {
        let bits = load(bytes);
        let sign = if bits >> 127 != 0 { -1.0 } else { 1.0 };
        let exp = ((bits >> FRACTION) & 0x7fff) as i32;
        let frac = bits & ((1u128 << FRACTION) - 1);
        if exp == 0x7fff {
            return if frac == 0 {
                sign * f64::INFINITY
            } else {
                f64::NAN
            };
        }
        if exp == 0 && frac == 0 {
            return sign * 0.0;
        }
        // keep the top 53 bits of the significand
        let (significand, exp) = if exp == 0 {
            (frac >> 60, 1)
        } else {
            ((frac | (1u128 << FRACTION)) >> 60, exp)
        };
        sign * super::scale(significand as u64 as f64, exp - BIAS - 52)
    }

    pub(super) fn from_f64(value: f64, out: &mut [u8]) {
        let sign = (value.is_sign_negative() as u128) << 127;
        let (exp, frac) = match super::normalize(value) {
            Some((_, e, m)) => (
                (e + BIAS) as u128,
                ((m & ((1u64 << 52) - 1)) as u128) << 60,
            ),
            None if value.is_nan() => (0x7fff, 1u128 << (FRACTION - 1)),
            None if value.is_infinite() => (0x7fff, 0),
            None => (0, 0),
        };
        let bits = sign | (exp << FRACTION) | frac;
        out.copy_from_slice(&bits.to_ne_bytes());
    }
}
