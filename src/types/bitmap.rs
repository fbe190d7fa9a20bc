//! Bitmaps and bitfields.
//!
//! A [`BitString`] is a byte buffer addressed at bit granularity. Bit offset
//! `o` lives in byte `o >> 3`; within a byte, bit 0 is the most significant
//! bit, so the buffer reads left to right like a bit string:
//!
//! ```text
//! offset:  0 1 2 3 4 5 6 7 | 8 9 ...
//! byte 0:  1 0 0 0 0 0 0 1 | byte 1 ...   (SETBIT 0 1, SETBIT 7 1 => 0x81)
//! ```
//!
//! Writes beyond the end zero-extend the buffer; reads beyond the end see
//! zeros.
//!
//! ## Bitfields
//!
//! Typed integer fields (`i1`..`i64`, `u1`..`u63`) may start at any bit
//! offset. A field is read by loading its covering bytes as one big-endian
//! integer (at most 9 bytes, so a `u128` accumulator), then shifting and
//! masking. Increments wrap, saturate or fail according to [`Overflow`].

use super::normalize_range;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Highest addressable bit (the buffer may grow to 512 MiB).
pub const MAX_BIT_OFFSET: u64 = (1 << 32) - 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitString {
    bytes: Vec<u8>,
}

/// Unit of a BITCOUNT/BITPOS range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitUnit {
    Byte,
    Bit,
}

/// BITOP operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Not,
}

impl BitOp {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        match raw.to_ascii_uppercase().as_slice() {
            b"AND" => Ok(BitOp::And),
            b"OR" => Ok(BitOp::Or),
            b"XOR" => Ok(BitOp::Xor),
            b"NOT" => Ok(BitOp::Not),
            _ => Err(EngineError::syntax()),
        }
    }
}

/// Behavior of a bitfield write whose value does not fit the field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Overflow {
    #[default]
    Wrap,
    Sat,
    Fail,
}

impl Overflow {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        match raw.to_ascii_uppercase().as_slice() {
            b"WRAP" => Ok(Overflow::Wrap),
            b"SAT" => Ok(Overflow::Sat),
            b"FAIL" => Ok(Overflow::Fail),
            _ => Err(EngineError::MalformedArgument(
                "Invalid OVERFLOW type specified".to_string(),
            )),
        }
    }
}

/// A bitfield integer type such as `i5` or `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldType {
    pub signed: bool,
    pub bits: u8,
}

impl FieldType {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let invalid = || {
            EngineError::MalformedArgument(
                "Invalid bitfield type. Use something like i16 u8. Note that u64 is not supported but i64 is."
                    .to_string(),
            )
        };

        let (signed, digits) = match raw.split_first() {
            Some((&(b'i' | b'I'), rest)) => (true, rest),
            Some((&(b'u' | b'U'), rest)) => (false, rest),
            _ => return Err(invalid()),
        };
        let bits = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<u8>().ok())
            .ok_or_else(invalid)?;

        let max = if signed { 64 } else { 63 };
        if bits == 0 || bits > max {
            return Err(invalid());
        }
        Ok(Self { signed, bits })
    }

    /// Parses a field offset: a bit offset, or `#n` meaning `n * bits`.
    pub fn parse_offset(&self, raw: &[u8]) -> Result<u64> {
        let invalid =
            || EngineError::OutOfRange("bit offset is not an integer or out of range".to_string());

        let (multiply, digits) = match raw.strip_prefix(b"#") {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let n = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let offset = if multiply {
            n.checked_mul(self.bits as u64).ok_or_else(invalid)?
        } else {
            n
        };

        match offset.checked_add(self.bits as u64 - 1) {
            Some(last) if last <= MAX_BIT_OFFSET => Ok(offset),
            _ => Err(invalid()),
        }
    }

    fn mask(&self) -> u64 {
        if self.bits == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }

    fn bounds(&self) -> (i128, i128) {
        if self.signed {
            let half = 1i128 << (self.bits - 1);
            (-half, half - 1)
        } else {
            (0, (1i128 << self.bits) - 1)
        }
    }

    /// Interprets the low `bits` of `raw` as this type.
    fn decode(&self, raw: u64) -> i64 {
        if self.signed && self.bits < 64 && (raw >> (self.bits - 1)) & 1 == 1 {
            (raw | !self.mask()) as i64
        } else {
            raw as i64
        }
    }

    /// Fits `value` into the field, or `None` under [`Overflow::Fail`].
    fn fit(&self, value: i128, overflow: Overflow) -> Option<i64> {
        let (min, max) = self.bounds();
        if (min..=max).contains(&value) {
            return Some(value as i64);
        }

        match overflow {
            Overflow::Fail => None,
            Overflow::Sat => {
                let clamped = if value < min { min } else { max };
                Some(clamped as i64)
            }
            Overflow::Wrap => {
                let modulus = 1i128 << self.bits;
                let wrapped = (value - min).rem_euclid(modulus) + min;
                Some(wrapped as i64)
            }
        }
    }
}

/// One BITFIELD subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitfieldOp {
    Get { ty: FieldType, offset: u64 },
    Set { ty: FieldType, offset: u64, value: i64 },
    IncrBy { ty: FieldType, offset: u64, incr: i64 },
    Overflow(Overflow),
}

impl BitfieldOp {
    pub fn is_write(&self) -> bool {
        matches!(self, BitfieldOp::Set { .. } | BitfieldOp::IncrBy { .. })
    }
}

fn bit_mask(bit_in_byte: u64) -> u8 {
    0x80 >> bit_in_byte
}

/// Mask selecting bits `from..=to` (MSB-first numbering) of one byte.
fn span_mask(from: u64, to: u64) -> u8 {
    (0xFFu8 >> from) & (0xFFu8 << (7 - to))
}

impl BitString {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn ensure_len(&mut self, len: usize) {
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
    }

    pub fn get_bit(&self, offset: u64) -> u8 {
        let byte = self.bytes.get((offset >> 3) as usize).copied().unwrap_or(0);
        u8::from(byte & bit_mask(offset & 7) != 0)
    }

    /// Sets or clears one bit, returning its previous value.
    pub fn set_bit(&mut self, offset: u64, on: bool) -> u8 {
        let idx = (offset >> 3) as usize;
        self.ensure_len(idx + 1);
        let mask = bit_mask(offset & 7);
        let old = u8::from(self.bytes[idx] & mask != 0);
        if on {
            self.bytes[idx] |= mask;
        } else {
            self.bytes[idx] &= !mask;
        }
        old
    }

    /// Resolves an optional BITCOUNT/BITPOS range to an inclusive bit range.
    fn bit_range(&self, start: i64, end: i64, unit: BitUnit) -> Option<(u64, u64)> {
        match unit {
            BitUnit::Byte => normalize_range(start, end, self.bytes.len())
                .map(|(s, e)| (s as u64 * 8, e as u64 * 8 + 7)),
            BitUnit::Bit => {
                normalize_range(start, end, self.bytes.len() * 8).map(|(s, e)| (s as u64, e as u64))
            }
        }
    }

    /// Population count over the whole buffer or a byte/bit range.
    pub fn count(&self, range: Option<(i64, i64, BitUnit)>) -> u64 {
        let Some((start, end, unit)) = range else {
            return self.bytes.iter().map(|b| b.count_ones() as u64).sum();
        };
        let Some((first, last)) = self.bit_range(start, end, unit) else {
            return 0;
        };

        let (first_byte, last_byte) = (first >> 3, last >> 3);
        (first_byte..=last_byte)
            .map(|i| {
                let from = if i == first_byte { first & 7 } else { 0 };
                let to = if i == last_byte { last & 7 } else { 7 };
                (self.bytes[i as usize] & span_mask(from, to)).count_ones() as u64
            })
            .sum()
    }

    /// BITPOS: first bit equal to `bit` in the range, or -1.
    ///
    /// When searching for a clear bit without an explicit end, the buffer is
    /// treated as zero-padded to the right.
    pub fn position(&self, bit: bool, start: i64, end: Option<i64>, unit: BitUnit) -> i64 {
        let Some((first, last)) = self.bit_range(start, end.unwrap_or(-1), unit) else {
            return if !bit && end.is_none() && self.bytes.is_empty() {
                0
            } else {
                -1
            };
        };

        let skip = if bit { 0x00 } else { 0xFF };
        let mut pos = first;
        while pos <= last {
            let byte = self.bytes[(pos >> 3) as usize];
            if pos & 7 == 0 && pos + 7 <= last && byte == skip {
                pos += 8;
                continue;
            }
            if (byte & bit_mask(pos & 7) != 0) == bit {
                return pos as i64;
            }
            pos += 1;
        }

        if !bit && end.is_none() {
            (last + 1) as i64
        } else {
            -1
        }
    }

    /// BITOP across operands padded with zeros to the longest one. Missing
    /// operands count as empty.
    pub fn bitop(op: BitOp, sources: &[Option<&BitString>]) -> Result<BitString> {
        if op == BitOp::Not && sources.len() != 1 {
            return Err(EngineError::MalformedArgument(
                "BITOP NOT must be called with a single source key.".to_string(),
            ));
        }

        let len = sources
            .iter()
            .map(|s| s.map(|b| b.len()).unwrap_or(0))
            .max()
            .unwrap_or(0);
        let byte_at = |src: &Option<&BitString>, i: usize| -> u8 {
            src.and_then(|b| b.bytes.get(i).copied()).unwrap_or(0)
        };

        let bytes = (0..len)
            .map(|i| {
                let mut acc = byte_at(&sources[0], i);
                for src in &sources[1..] {
                    let b = byte_at(src, i);
                    match op {
                        BitOp::And => acc &= b,
                        BitOp::Or => acc |= b,
                        BitOp::Xor => acc ^= b,
                        BitOp::Not => {}
                    }
                }
                if op == BitOp::Not {
                    !acc
                } else {
                    acc
                }
            })
            .collect();

        Ok(BitString { bytes })
    }

    // ========================================================================
    // Bitfields
    // ========================================================================

    fn covering(offset: u64, bits: u8) -> (usize, usize, u32) {
        let first = (offset >> 3) as usize;
        let last = ((offset + bits as u64 - 1) >> 3) as usize;
        let width = ((last - first + 1) * 8) as u32;
        let shift = width - (offset & 7) as u32 - bits as u32;
        (first, last, shift)
    }

    fn read_raw(&self, offset: u64, bits: u8) -> u64 {
        let (first, last, shift) = Self::covering(offset, bits);
        let mut acc: u128 = 0;
        for i in first..=last {
            acc = (acc << 8) | self.bytes.get(i).copied().unwrap_or(0) as u128;
        }
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        ((acc >> shift) as u64) & mask
    }

    fn write_raw(&mut self, offset: u64, bits: u8, value: u64) {
        let (first, last, shift) = Self::covering(offset, bits);
        self.ensure_len(last + 1);

        let mut acc: u128 = 0;
        for i in first..=last {
            acc = (acc << 8) | self.bytes[i] as u128;
        }
        let mask: u128 = if bits == 64 { u64::MAX as u128 } else { (1u128 << bits) - 1 };
        acc = (acc & !(mask << shift)) | (((value as u128) & mask) << shift);

        for i in (first..=last).rev() {
            self.bytes[i] = (acc & 0xFF) as u8;
            acc >>= 8;
        }
    }

    pub fn get_field(&self, ty: FieldType, offset: u64) -> i64 {
        ty.decode(self.read_raw(offset, ty.bits))
    }

    /// Writes `value` into the field, returning the previous value, or
    /// `None` (nothing written) when it does not fit under `Fail`.
    pub fn set_field(
        &mut self,
        ty: FieldType,
        offset: u64,
        value: i64,
        overflow: Overflow,
    ) -> Option<i64> {
        let old = self.get_field(ty, offset);
        let fitted = ty.fit(value as i128, overflow)?;
        self.write_raw(offset, ty.bits, fitted as u64);
        Some(old)
    }

    /// Adds `incr` to the field, returning the new value.
    pub fn incr_field(
        &mut self,
        ty: FieldType,
        offset: u64,
        incr: i64,
        overflow: Overflow,
    ) -> Option<i64> {
        let old = self.get_field(ty, offset) as i128;
        let new = ty.fit(old + incr as i128, overflow)?;
        self.write_raw(offset, ty.bits, new as u64);
        Some(new)
    }

    /// Runs a BITFIELD subcommand list. `OVERFLOW` produces no result entry.
    pub fn apply(&mut self, ops: &[BitfieldOp]) -> Vec<Option<i64>> {
        let mut overflow = Overflow::Wrap;
        let mut out = Vec::with_capacity(ops.len());

        for op in ops {
            match *op {
                BitfieldOp::Get { ty, offset } => out.push(Some(self.get_field(ty, offset))),
                BitfieldOp::Set { ty, offset, value } => {
                    out.push(self.set_field(ty, offset, value, overflow))
                }
                BitfieldOp::IncrBy { ty, offset, incr } => {
                    out.push(self.incr_field(ty, offset, incr, overflow))
                }
                BitfieldOp::Overflow(mode) => overflow = mode,
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn u(bits: u8) -> FieldType {
        FieldType { signed: false, bits }
    }

    fn i(bits: u8) -> FieldType {
        FieldType { signed: true, bits }
    }

    #[test]
    fn test_setbit_getbit_bitcount() {
        let mut b = BitString::default();
        assert_eq!(b.set_bit(7, true), 0);
        assert_eq!(b.get_bit(7), 1);
        assert_eq!(b.count(None), 1);
        assert_eq!(b.as_bytes(), &[0x01]);

        b.set_bit(0, true);
        assert_eq!(b.as_bytes(), &[0x81]);
        assert_eq!(b.set_bit(0, false), 1);
        assert_eq!(b.get_bit(1000), 0);
    }

    #[test]
    fn test_auto_extend() {
        let mut b = BitString::default();
        b.set_bit(100, true);
        assert_eq!(b.len(), 13);
        assert_eq!(b.count(None), 1);
    }

    #[test]
    fn test_count_ranges() {
        let b = BitString::from_bytes(b"foobar".to_vec());
        assert_eq!(b.count(None), 26);
        assert_eq!(b.count(Some((0, 0, BitUnit::Byte))), 4);
        assert_eq!(b.count(Some((1, 1, BitUnit::Byte))), 6);
        assert_eq!(b.count(Some((5, 30, BitUnit::Bit))), 17);
        assert_eq!(b.count(Some((-1, -1, BitUnit::Byte))), 4);
        assert_eq!(b.count(Some((10, 20, BitUnit::Byte))), 0);
    }

    #[test]
    fn test_position() {
        let b = BitString::from_bytes(vec![0xFF, 0xF0, 0x00]);
        assert_eq!(b.position(false, 0, None, BitUnit::Byte), 12);

        let b = BitString::from_bytes(vec![0x00, 0xFF, 0xF0]);
        assert_eq!(b.position(true, 0, None, BitUnit::Byte), 8);
        assert_eq!(b.position(true, 2, None, BitUnit::Byte), 16);
        assert_eq!(b.position(true, 7, Some(15), BitUnit::Bit), 8);

        let ones = BitString::from_bytes(vec![0xFF]);
        assert_eq!(ones.position(false, 0, None, BitUnit::Byte), 8);
        assert_eq!(ones.position(false, 0, Some(0), BitUnit::Byte), -1);

        let empty = BitString::default();
        assert_eq!(empty.position(true, 0, None, BitUnit::Byte), -1);
        assert_eq!(empty.position(false, 0, None, BitUnit::Byte), 0);
    }

    #[test]
    fn test_bitop() {
        let a = BitString::from_bytes(vec![0b1100_1100, 0xFF]);
        let b = BitString::from_bytes(vec![0b1010_1010]);

        let and = BitString::bitop(BitOp::And, &[Some(&a), Some(&b)]).unwrap();
        assert_eq!(and.as_bytes(), &[0b1000_1000, 0x00]);

        let or = BitString::bitop(BitOp::Or, &[Some(&a), Some(&b)]).unwrap();
        assert_eq!(or.as_bytes(), &[0b1110_1110, 0xFF]);

        let xor = BitString::bitop(BitOp::Xor, &[Some(&a), None]).unwrap();
        assert_eq!(xor.as_bytes(), a.as_bytes());

        let not = BitString::bitop(BitOp::Not, &[Some(&b)]).unwrap();
        assert_eq!(not.as_bytes(), &[0b0101_0101]);

        assert!(BitString::bitop(BitOp::Not, &[Some(&a), Some(&b)]).is_err());
    }

    #[test]
    fn test_field_type_parsing() {
        assert_eq!(FieldType::parse(b"i8").unwrap(), i(8));
        assert_eq!(FieldType::parse(b"u63").unwrap(), u(63));
        assert!(FieldType::parse(b"u64").is_err());
        assert!(FieldType::parse(b"i65").is_err());
        assert!(FieldType::parse(b"i0").is_err());
        assert!(FieldType::parse(b"x8").is_err());

        assert_eq!(u(8).parse_offset(b"#2").unwrap(), 16);
        assert_eq!(u(8).parse_offset(b"5").unwrap(), 5);
        assert!(u(8).parse_offset(b"-1").is_err());
    }

    #[test]
    fn test_offset_bounds_do_not_overflow() {
        let max = u64::MAX.to_string();
        assert!(u(8).parse_offset(max.as_bytes()).is_err());
        assert!(i(64).parse_offset(max.as_bytes()).is_err());
        assert!(u(8).parse_offset(b"#2305843009213693951").is_err());

        let limit = MAX_BIT_OFFSET.to_string();
        assert!(u(8).parse_offset(limit.as_bytes()).is_err());
        assert!(i(64).parse_offset(limit.as_bytes()).is_err());

        let last_byte = (MAX_BIT_OFFSET - 7).to_string();
        assert_eq!(u(8).parse_offset(last_byte.as_bytes()).unwrap(), MAX_BIT_OFFSET - 7);
        let last_word = (MAX_BIT_OFFSET - 63).to_string();
        assert_eq!(i(64).parse_offset(last_word.as_bytes()).unwrap(), MAX_BIT_OFFSET - 63);
        assert_eq!(u(1).parse_offset(limit.as_bytes()).unwrap(), MAX_BIT_OFFSET);
    }

    #[test]
    fn test_unaligned_fields() {
        let mut b = BitString::default();
        assert_eq!(b.set_field(u(4), 6, 0b1011, Overflow::Wrap), Some(0));
        assert_eq!(b.as_bytes(), &[0b0000_0010, 0b1100_0000]);
        assert_eq!(b.get_field(u(4), 6), 11);

        b.set_field(i(64), 3, -2, Overflow::Wrap);
        assert_eq!(b.get_field(i(64), 3), -2);
        assert_eq!(b.len(), 9);
    }

    #[test]
    fn test_increment_overflow_modes() {
        let mut b = BitString::default();
        b.set_field(u(2), 0, 3, Overflow::Wrap);
        assert_eq!(b.incr_field(u(2), 0, 1, Overflow::Wrap), Some(0));

        b.set_field(i(8), 8, 120, Overflow::Wrap);
        assert_eq!(b.incr_field(i(8), 8, 10, Overflow::Wrap), Some(-126));
        assert_eq!(b.incr_field(i(8), 8, -10, Overflow::Sat), Some(-128));
        assert_eq!(b.incr_field(i(8), 8, -1, Overflow::Fail), None);
        assert_eq!(b.get_field(i(8), 8), -128);
    }

    #[test]
    fn test_apply_tracks_overflow_mode() {
        let mut b = BitString::default();
        let ty = u(8);
        let ops = [
            BitfieldOp::Set { ty, offset: 0, value: 250 },
            BitfieldOp::IncrBy { ty, offset: 0, incr: 10 },
            BitfieldOp::Overflow(Overflow::Sat),
            BitfieldOp::IncrBy { ty, offset: 0, incr: 300 },
            BitfieldOp::Overflow(Overflow::Fail),
            BitfieldOp::IncrBy { ty, offset: 0, incr: 1 },
            BitfieldOp::Get { ty, offset: 0 },
        ];
        assert_eq!(
            b.apply(&ops),
            vec![Some(0), Some(4), Some(255), None, Some(255)]
        );
    }

    proptest! {
        #[test]
        fn prop_field_round_trip(
            signed in any::<bool>(),
            bits in 1u8..=63,
            offset in 0u64..200,
            value in any::<i64>(),
        ) {
            let ty = FieldType { signed, bits };
            let mut b = BitString::from_bytes(vec![0xA5; 8]);
            b.set_field(ty, offset, value, Overflow::Wrap);

            let mask = (1u64 << bits) - 1;
            let expected = ty.decode(value as u64 & mask);
            prop_assert_eq!(b.get_field(ty, offset), expected);
        }

        #[test]
        fn prop_neighbors_untouched(offset in 0u64..64, value in any::<i64>()) {
            let ty = FieldType { signed: false, bits: 5 };
            let mut b = BitString::from_bytes(vec![0xFF; 16]);
            b.set_field(ty, offset, value, Overflow::Wrap);
            let touched: u64 = (offset..offset + 5).map(|o| b.get_bit(o) as u64).sum();
            prop_assert_eq!(b.count(None), 128 - 5 + touched);
        }
    }
}
