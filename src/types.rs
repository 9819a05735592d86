//! Core data types for statetap
//!
//! This module contains the fundamental data structures used throughout the
//! library for describing and transporting observed values.
//!
//! # Main Types
//!
//! - [`BasicType`] - Closed enumeration of the wire-level scalar types
//! - [`Value`] - Tagged union holding one deserialised scalar
//! - [`Snapshot`] - One binary capture of a channel's active values
//! - [`RegistrationID`] - Handle returned by field registration
//!
//! # Wire conventions
//!
//! All multi-byte values are little-endian on every architecture. A
//! [`BasicType::Char`] is a single byte: it exists so schemas produced by
//! other languages (where `char` is one byte) round-trip through the textual
//! format; values registered from Rust use `u8`/`i8` instead.

use serde::{Deserialize, Serialize};

/// Number of tags in [`BasicType`], including `Other`.
pub const TYPES_COUNT: usize = 13;

/// The wire-level type of an observed value.
///
/// The string form uses exactly the lowercase names returned by
/// [`BasicType::as_str`]; parsing an unknown name yields [`BasicType::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicType {
    /// Boolean, 1 byte (0 or 1)
    Bool,
    /// Single byte character
    Char,
    /// 8-bit signed integer
    Int8,
    /// 8-bit unsigned integer
    Uint8,
    /// 16-bit signed integer
    Int16,
    /// 16-bit unsigned integer
    Uint16,
    /// 32-bit signed integer
    Int32,
    /// 32-bit unsigned integer
    Uint32,
    /// 64-bit signed integer
    Int64,
    /// 64-bit unsigned integer
    Uint64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Anything else; described by a custom type
    Other,
}

impl BasicType {
    /// All tags in wire order. Useful for exhaustive table tests.
    pub const ALL: [BasicType; TYPES_COUNT] = [
        BasicType::Bool,
        BasicType::Char,
        BasicType::Int8,
        BasicType::Uint8,
        BasicType::Int16,
        BasicType::Uint16,
        BasicType::Int32,
        BasicType::Uint32,
        BasicType::Int64,
        BasicType::Uint64,
        BasicType::Float32,
        BasicType::Float64,
        BasicType::Other,
    ];

    /// Returns the serialised size in bytes of this type.
    ///
    /// `Other` reports 0: custom payloads carry their own size prefix.
    pub fn size_bytes(&self) -> usize {
        match self {
            BasicType::Bool | BasicType::Char | BasicType::Int8 | BasicType::Uint8 => 1,
            BasicType::Int16 | BasicType::Uint16 => 2,
            BasicType::Int32 | BasicType::Uint32 | BasicType::Float32 => 4,
            BasicType::Int64 | BasicType::Uint64 | BasicType::Float64 => 8,
            BasicType::Other => 0,
        }
    }

    /// Returns the canonical lowercase name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            BasicType::Bool => "bool",
            BasicType::Char => "char",
            BasicType::Int8 => "int8",
            BasicType::Uint8 => "uint8",
            BasicType::Int16 => "int16",
            BasicType::Uint16 => "uint16",
            BasicType::Int32 => "int32",
            BasicType::Uint32 => "uint32",
            BasicType::Int64 => "int64",
            BasicType::Uint64 => "uint64",
            BasicType::Float32 => "float32",
            BasicType::Float64 => "float64",
            BasicType::Other => "other",
        }
    }

    /// Stable single-byte tag used when hashing a field.
    pub(crate) fn wire_tag(&self) -> u8 {
        BasicType::ALL
            .iter()
            .position(|t| t == self)
            .unwrap_or(TYPES_COUNT - 1) as u8
    }
}

impl std::fmt::Display for BasicType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BasicType {
    type Err = std::convert::Infallible;

    /// Parses a canonical type name; anything unrecognised is `Other`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BasicType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .unwrap_or(BasicType::Other))
    }
}

/// One deserialised scalar value.
///
/// This is the tagged union produced by [`deserialize_as_var_type`]; a
/// serialised `Other` field cannot be interpreted by the core and comes back
/// as a NaN [`Value::Float64`] placeholder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Char(char),
    Int8(i8),
    Uint8(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Float32(f32),
    Float64(f64),
}

impl Value {
    /// The type tag this value was decoded as.
    pub fn basic_type(&self) -> BasicType {
        match self {
            Value::Bool(_) => BasicType::Bool,
            Value::Char(_) => BasicType::Char,
            Value::Int8(_) => BasicType::Int8,
            Value::Uint8(_) => BasicType::Uint8,
            Value::Int16(_) => BasicType::Int16,
            Value::Uint16(_) => BasicType::Uint16,
            Value::Int32(_) => BasicType::Int32,
            Value::Uint32(_) => BasicType::Uint32,
            Value::Int64(_) => BasicType::Int64,
            Value::Uint64(_) => BasicType::Uint64,
            Value::Float32(_) => BasicType::Float32,
            Value::Float64(_) => BasicType::Float64,
        }
    }

    /// Lossy numeric view, handy for plotting and assertions.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Bool(v) => v as u8 as f64,
            Value::Char(v) => v as u32 as f64,
            Value::Int8(v) => v as f64,
            Value::Uint8(v) => v as f64,
            Value::Int16(v) => v as f64,
            Value::Uint16(v) => v as f64,
            Value::Int32(v) => v as f64,
            Value::Uint32(v) => v as f64,
            Value::Int64(v) => v as f64,
            Value::Uint64(v) => v as f64,
            Value::Float32(v) => v as f64,
            Value::Float64(v) => v,
        }
    }
}

/// Reverse operation of the value-reference serialisation for one scalar.
///
/// Reads `ty.size_bytes()` little-endian bytes from the front of `bytes`.
/// Returns `None` if the buffer is too short. `Other` yields a NaN `f64`
/// placeholder: deserialising custom types is the caller's responsibility.
pub fn deserialize_as_var_type(ty: BasicType, bytes: &[u8]) -> Option<Value> {
    if bytes.len() < ty.size_bytes() {
        return None;
    }

    // The length check above makes the fixed-size conversions infallible.
    let le2 = |b: &[u8]| [b[0], b[1]];
    let le4 = |b: &[u8]| [b[0], b[1], b[2], b[3]];
    let le8 = |b: &[u8]| [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];

    Some(match ty {
        BasicType::Bool => Value::Bool(bytes[0] != 0),
        BasicType::Char => Value::Char(bytes[0] as char),
        BasicType::Int8 => Value::Int8(bytes[0] as i8),
        BasicType::Uint8 => Value::Uint8(bytes[0]),
        BasicType::Int16 => Value::Int16(i16::from_le_bytes(le2(bytes))),
        BasicType::Uint16 => Value::Uint16(u16::from_le_bytes(le2(bytes))),
        BasicType::Int32 => Value::Int32(i32::from_le_bytes(le4(bytes))),
        BasicType::Uint32 => Value::Uint32(u32::from_le_bytes(le4(bytes))),
        BasicType::Int64 => Value::Int64(i64::from_le_bytes(le8(bytes))),
        BasicType::Uint64 => Value::Uint64(u64::from_le_bytes(le8(bytes))),
        BasicType::Float32 => Value::Float32(f32::from_le_bytes(le4(bytes))),
        BasicType::Float64 => Value::Float64(f64::from_le_bytes(le8(bytes))),
        BasicType::Other => Value::Float64(f64::NAN),
    })
}

/// Handle returned by field registration, used to unregister or toggle
/// the registered fields.
///
/// A custom type spanning several contiguous fields can be treated as one
/// handle by joining the IDs returned for each part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistrationID {
    /// Index of the first field covered by this handle.
    pub first_index: usize,
    /// Number of contiguous fields covered.
    pub fields_count: usize,
}

impl std::ops::AddAssign for RegistrationID {
    /// Concatenates a contiguous registration onto this handle.
    fn add_assign(&mut self, other: RegistrationID) {
        self.fields_count += other.fields_count;
    }
}

/// One binary capture of a channel's active values.
///
/// The `active_mask` has one bit per schema field, LSB-first within each
/// byte, in field insertion order; a set bit means the field's bytes are
/// present in `payload`. Decoding requires the [`Schema`](crate::Schema)
/// identified by `schema_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Hash of the schema this snapshot conforms to.
    pub schema_hash: u64,
    /// Monotonic nanoseconds sampled at `take_snapshot` entry.
    pub timestamp_ns: i64,
    /// Packed per-field presence bitmap, `ceil(fields / 8)` bytes.
    pub active_mask: Vec<u8>,
    /// Serialised field values in insertion order, disabled fields skipped.
    pub payload: Vec<u8>,
}

impl Snapshot {
    /// Whether the field at `index` is present in the payload.
    pub fn is_active(&self, index: usize) -> bool {
        self.active_mask
            .get(index / 8)
            .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }

    /// Number of fields present in the payload.
    pub fn active_count(&self) -> usize {
        self.active_mask
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    /// Encodes the snapshot into the recommended flat wire record:
    /// hash, timestamp, mask length + bytes, payload length + bytes,
    /// everything little-endian. Outer framing (magic numbers, record
    /// delimiters) is the sink's concern.
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(8 + 8 + 4 + self.active_mask.len() + 4 + self.payload.len());
        out.extend_from_slice(&self.schema_hash.to_le_bytes());
        out.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        out.extend_from_slice(&(self.active_mask.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.active_mask);
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes one wire record produced by [`Snapshot::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Snapshot, crate::error::ParseError> {
        use crate::error::ParseError;

        let mut cursor = Cursor::new(bytes);
        let schema_hash = u64::from_le_bytes(cursor.take_fixed("schema hash")?);
        let timestamp_ns = i64::from_le_bytes(cursor.take_fixed("timestamp")?);
        let mask_len = u32::from_le_bytes(cursor.take_fixed("mask length")?) as usize;
        let active_mask = cursor.take("active mask", mask_len)?.to_vec();
        let payload_len = u32::from_le_bytes(cursor.take_fixed("payload length")?) as usize;
        let payload = cursor.take("payload", payload_len)?.to_vec();
        if cursor.remaining() != 0 {
            return Err(ParseError::TrailingBytes(cursor.remaining()));
        }
        Ok(Snapshot {
            schema_hash,
            timestamp_ns,
            active_mask,
            payload,
        })
    }
}

/// Bounds-checked forward reader over a byte slice.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Takes `len` bytes, or errors naming `context`.
    pub(crate) fn take(
        &mut self,
        context: &str,
        len: usize,
    ) -> Result<&'a [u8], crate::error::ParseError> {
        if self.remaining() < len {
            return Err(crate::error::ParseError::Truncated {
                context: context.to_string(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Takes exactly `N` bytes as a fixed array.
    pub(crate) fn take_fixed<const N: usize>(
        &mut self,
        context: &str,
    ) -> Result<[u8; N], crate::error::ParseError> {
        let slice = self.take(context, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_round_trip() {
        for ty in BasicType::ALL {
            let parsed: BasicType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, ty);
        }
    }

    #[test]
    fn test_unknown_name_is_other() {
        let parsed: BasicType = "quaternion".parse().unwrap();
        assert_eq!(parsed, BasicType::Other);
    }

    #[test]
    fn test_size_table() {
        let expected: [usize; TYPES_COUNT] = [1, 1, 1, 1, 2, 2, 4, 4, 8, 8, 4, 8, 0];
        for (ty, size) in BasicType::ALL.into_iter().zip(expected) {
            assert_eq!(ty.size_bytes(), size, "size of {ty}");
        }
    }

    #[test]
    fn test_deserialize_scalars_bit_for_bit() {
        let v = deserialize_as_var_type(BasicType::Float64, &69.0f64.to_le_bytes());
        assert_eq!(v, Some(Value::Float64(69.0)));

        let v = deserialize_as_var_type(BasicType::Int32, &(-42i32).to_le_bytes());
        assert_eq!(v, Some(Value::Int32(-42)));

        let v = deserialize_as_var_type(BasicType::Uint8, &[200]);
        assert_eq!(v, Some(Value::Uint8(200)));

        let v = deserialize_as_var_type(BasicType::Bool, &[1]);
        assert_eq!(v, Some(Value::Bool(true)));
    }

    #[test]
    fn test_deserialize_other_is_nan() {
        let v = deserialize_as_var_type(BasicType::Other, &[]).unwrap();
        match v {
            Value::Float64(x) => assert!(x.is_nan()),
            other => panic!("expected NaN placeholder, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_short_buffer() {
        assert_eq!(deserialize_as_var_type(BasicType::Int64, &[1, 2, 3]), None);
    }

    #[test]
    fn test_registration_id_join() {
        let mut id = RegistrationID {
            first_index: 4,
            fields_count: 1,
        };
        id += RegistrationID {
            first_index: 5,
            fields_count: 2,
        };
        assert_eq!(id.first_index, 4);
        assert_eq!(id.fields_count, 3);
    }

    #[test]
    fn test_snapshot_mask_accessors() {
        let snap = Snapshot {
            schema_hash: 1,
            timestamp_ns: 0,
            active_mask: vec![0b0000_0101, 0b0000_0001],
            payload: Vec::new(),
        };
        assert!(snap.is_active(0));
        assert!(!snap.is_active(1));
        assert!(snap.is_active(2));
        assert!(snap.is_active(8));
        assert!(!snap.is_active(9));
        assert!(!snap.is_active(100));
        assert_eq!(snap.active_count(), 3);
    }

    #[test]
    fn test_snapshot_wire_round_trip() {
        let snap = Snapshot {
            schema_hash: 0xDEAD_BEEF_0123_4567,
            timestamp_ns: -5,
            active_mask: vec![0xFF],
            payload: vec![1, 2, 3, 4],
        };
        let bytes = snap.encode();
        assert_eq!(Snapshot::decode(&bytes).unwrap(), snap);
    }

    #[test]
    fn test_snapshot_decode_truncated() {
        let snap = Snapshot {
            schema_hash: 7,
            timestamp_ns: 9,
            active_mask: vec![0x01],
            payload: vec![42],
        };
        let bytes = snap.encode();
        assert!(Snapshot::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
