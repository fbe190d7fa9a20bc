//! String values.
//!
//! Strings are stored as immutable [`Bytes`]; every mutation builds a new
//! buffer. The functions here hold the arithmetic and range rules shared by
//! the string commands.

use crate::error::{EngineError, Result};
use bytes::Bytes;

/// Largest string a SETRANGE/APPEND may produce (512 MiB).
pub const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

/// Parses a stored value as a signed 64-bit integer.
pub fn parse_int(value: &[u8]) -> Result<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(EngineError::not_integer)
}

/// Parses a stored value as a finite float.
pub fn parse_float(value: &[u8]) -> Result<f64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .ok_or_else(EngineError::not_float)
}

/// Formats a float the way replies carry it: shortest round-trip form,
/// integral values without a trailing `.0`.
pub fn format_float(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "inf".into() } else { "-inf".into() };
    }
    format!("{}", value)
}

/// Adds `delta` to the integer held in `current` (absent counts as 0).
pub fn incr_by(current: Option<&Bytes>, delta: i64) -> Result<i64> {
    let base = match current {
        Some(v) => parse_int(v)?,
        None => 0,
    };

    base.checked_add(delta).ok_or_else(|| {
        EngineError::MalformedArgument("increment or decrement would overflow".to_string())
    })
}

/// Adds `delta` to the float held in `current` (absent counts as 0).
pub fn incr_by_float(current: Option<&Bytes>, delta: f64) -> Result<f64> {
    let base = match current {
        Some(v) => parse_float(v)?,
        None => 0.0,
    };

    let result = base + delta;
    if !result.is_finite() {
        return Err(EngineError::MalformedArgument(
            "increment would produce NaN or Infinity".to_string(),
        ));
    }
    Ok(result)
}

/// Appends `suffix` to `current`, returning the new value.
pub fn append(current: Option<&Bytes>, suffix: &[u8]) -> Result<Bytes> {
    let existing: &[u8] = current.map(|b| b.as_ref()).unwrap_or_default();
    if existing.len() + suffix.len() > MAX_STRING_LEN {
        return Err(EngineError::OutOfRange(
            "string exceeds maximum allowed size (512MB)".to_string(),
        ));
    }

    let mut buf = Vec::with_capacity(existing.len() + suffix.len());
    buf.extend_from_slice(existing);
    buf.extend_from_slice(suffix);
    Ok(Bytes::from(buf))
}

/// GETRANGE semantics: inclusive byte range with negative indices.
pub fn get_range(value: &Bytes, start: i64, end: i64) -> Bytes {
    match super::normalize_range(start, end, value.len()) {
        Some((s, e)) => value.slice(s..=e),
        None => Bytes::new(),
    }
}

/// SETRANGE semantics: overwrite at `offset`, zero-padding any gap.
pub fn set_range(current: Option<&Bytes>, offset: usize, data: &[u8]) -> Result<Bytes> {
    let existing: &[u8] = current.map(|b| b.as_ref()).unwrap_or_default();
    let end = offset
        .checked_add(data.len())
        .filter(|end| *end <= MAX_STRING_LEN)
        .ok_or_else(|| {
            EngineError::OutOfRange("string exceeds maximum allowed size (512MB)".to_string())
        })?;

    let mut buf = existing.to_vec();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[offset..end].copy_from_slice(data);
    Ok(Bytes::from(buf))
}
