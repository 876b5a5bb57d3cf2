//! The CIP type registry (§4.3): `DataType` codes, their wire byte width, and the logic to read
//! a value of a given type off the wire. Ported from `original_source`'s `types/datatype.go`.

use collections::bytes::Slice;

use crate::error::{CipError, Result};

/// A CIP elementary DataType code (§3). The distilled spec only needs the subset this client
/// can actually decode; the rest of the codes `original_source` enumerates are kept here too
/// (so a caller inspecting a raw code from a reply gets a named variant back) even though
/// `read_value` only implements decoding for the atomic/compound types tags actually resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DataType {
	Null,
	Bool,
	Sint,
	Int,
	Dint,
	Lint,
	Usint,
	Uint,
	Udint,
	Ulint,
	Real,
	Lreal,
	Stime,
	Date,
	TimeAndDay,
	DateAndString,
	String,
	Word,
	Dword,
	BitString,
	Lword,
	String2,
	Ftime,
	Ltime,
	Itime,
	Stringn,
	ShortString,
	Time,
	Epath,
	Engunit,
	Stringi,
	Struct,
	/// Vendor-specific Allen-Bradley string struct, identified by its inner type tag (0xFCE)
	/// rather than by the outer STRUCT code — see `read_value`.
	AbString,
	/// A code this client doesn't recognise. Carried through rather than rejected at parse
	/// time so identity/diagnostic paths can still report it.
	Other(u16),
}

impl DataType {
	pub fn from_code(code: u16) -> Self {
		match code {
			0x00 => Self::Null,
			0xC1 => Self::Bool,
			0xC2 => Self::Sint,
			0xC3 => Self::Int,
			0xC4 => Self::Dint,
			0xC5 => Self::Lint,
			0xC6 => Self::Usint,
			0xC7 => Self::Uint,
			0xC8 => Self::Udint,
			0xC9 => Self::Ulint,
			0xCA => Self::Real,
			0xCB => Self::Lreal,
			0xCC => Self::Stime,
			0xCD => Self::Date,
			0xCE => Self::TimeAndDay,
			0xCF => Self::DateAndString,
			0xD0 => Self::String,
			0xD1 => Self::Word,
			0xD2 => Self::Dword,
			0xD3 => Self::BitString,
			0xD4 => Self::Lword,
			0xD5 => Self::String2,
			0xD6 => Self::Ftime,
			0xD7 => Self::Ltime,
			0xD8 => Self::Itime,
			0xD9 => Self::Stringn,
			0xDA => Self::ShortString,
			0xDB => Self::Time,
			0xDC => Self::Epath,
			0xDD => Self::Engunit,
			0xDE => Self::Stringi,
			0x02A0 => Self::Struct,
			0x0FCE => Self::AbString,
			other => Self::Other(other),
		}
	}

	pub fn code(self) -> u16 {
		match self {
			Self::Null => 0x00,
			Self::Bool => 0xC1,
			Self::Sint => 0xC2,
			Self::Int => 0xC3,
			Self::Dint => 0xC4,
			Self::Lint => 0xC5,
			Self::Usint => 0xC6,
			Self::Uint => 0xC7,
			Self::Udint => 0xC8,
			Self::Ulint => 0xC9,
			Self::Real => 0xCA,
			Self::Lreal => 0xCB,
			Self::Stime => 0xCC,
			Self::Date => 0xCD,
			Self::TimeAndDay => 0xCE,
			Self::DateAndString => 0xCF,
			Self::String => 0xD0,
			Self::Word => 0xD1,
			Self::Dword => 0xD2,
			Self::BitString => 0xD3,
			Self::Lword => 0xD4,
			Self::String2 => 0xD5,
			Self::Ftime => 0xD6,
			Self::Ltime => 0xD7,
			Self::Itime => 0xD8,
			Self::Stringn => 0xD9,
			Self::ShortString => 0xDA,
			Self::Time => 0xDB,
			Self::Epath => 0xDC,
			Self::Engunit => 0xDD,
			Self::Stringi => 0xDE,
			Self::Struct => 0x02A0,
			Self::AbString => 0x0FCE,
			Self::Other(code) => code,
		}
	}

	/// The fixed wire width in bytes, or `0` for variable-length / unrecognised types (matching
	/// `original_source`'s `GetByteCount`, which defaults to `0` rather than panicking).
	pub fn byte_width(self) -> u16 {
		match self {
			Self::Null => 0,
			Self::Sint | Self::Usint | Self::Bool => 1,
			Self::Int | Self::Uint => 2,
			Self::Dint | Self::Udint | Self::Real | Self::BitString => 4,
			Self::Lint | Self::Ulint | Self::Lreal => 8,
			Self::Struct => 88,
			_ => 0,
		}
	}

	pub fn bit_width(self) -> u16 {
		self.byte_width() * 8
	}
}

/// A single decoded CIP scalar value (§9 Design Notes: "Dynamic value type").
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Bool(bool),
	Sint(i8),
	Int(i16),
	Dint(i32),
	Lint(i64),
	Usint(u8),
	Uint(u16),
	Udint(u32),
	Ulint(u64),
	Real(f32),
	Lreal(f64),
	Str(String),
}

/// A companion list-of-values result, with the bit-slicing helpers §4.10 needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values(pub Vec<Value>);

impl Values {
	pub fn new() -> Self {
		Self(Vec::new())
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Expands every word in this list into its constituent little-endian bits.
	///
	/// Defined only for the integer variants: `original_source`'s `WordsToBits` also handled
	/// `float32`/`float64`, iterating 64 bits out of a 4-byte `float32` in that arm — a bug, not
	/// a feature (see SPEC_FULL.md's Design Notes). Floats are not bit-addressable CIP types, so
	/// this returns a decode error for them instead of silently reproducing that bug.
	pub fn bits(&self) -> Result<Vec<bool>> {
		let mut bits = Vec::new();

		for value in &self.0 {
			match *value {
				Value::Bool(b) => bits.push(b),
				Value::Sint(v) => push_bits(&mut bits, v as u8 as u64, 8),
				Value::Usint(v) => push_bits(&mut bits, v as u64, 8),
				Value::Int(v) => push_bits(&mut bits, v as u16 as u64, 16),
				Value::Uint(v) => push_bits(&mut bits, v as u64, 16),
				Value::Dint(v) => push_bits(&mut bits, v as u32 as u64, 32),
				Value::Udint(v) => push_bits(&mut bits, v as u64, 32),
				Value::Lint(v) => push_bits(&mut bits, v as u64, 64),
				Value::Ulint(v) => push_bits(&mut bits, v, 64),
				Value::Real(_) | Value::Lreal(_) => return Err(CipError::Decode("cannot bit-slice a floating point value".into())),
				Value::Str(_) => return Err(CipError::Decode("cannot bit-slice a string value".into())),
			}
		}

		Ok(bits)
	}
}

fn push_bits(out: &mut Vec<bool>, word: u64, n: u32) {
	for i in 0..n {
		out.push((word >> i) & 1 != 0);
	}
}

/// Reads one value of `dtype` from `slice`, returning the decoded value and the number of bytes
/// consumed. STRUCT's inner envelope and SHORT_STRING are handled exactly as §4.3 specifies.
pub fn read_value(slice: &mut Slice, dtype: DataType) -> Result<(Value, usize)> {
	fn bytes<const N: usize>(slice: &mut Slice) -> Result<[u8; N]> {
		slice
			.split_bytes(N)
			.map_err(|_| CipError::Decode("reply truncated while decoding a value".into()))
			.map(|b| b.try_into().expect("split_bytes(N) returns N bytes"))
	}

	match dtype {
		DataType::Null => Err(CipError::Decode("cannot decode a value of type NULL".into())),
		DataType::Bool => {
			let [b] = bytes::<1>(slice)?;
			Ok((Value::Bool(b & 1 != 0), 1))
		}
		DataType::Sint => bytes::<1>(slice).map(|b| (Value::Sint(b[0] as i8), 1)),
		DataType::Usint => bytes::<1>(slice).map(|b| (Value::Usint(b[0]), 1)),
		DataType::Int => bytes::<2>(slice).map(|b| (Value::Int(i16::from_le_bytes(b)), 2)),
		DataType::Uint => bytes::<2>(slice).map(|b| (Value::Uint(u16::from_le_bytes(b)), 2)),
		DataType::Dint => bytes::<4>(slice).map(|b| (Value::Dint(i32::from_le_bytes(b)), 4)),
		DataType::Udint | DataType::BitString => bytes::<4>(slice).map(|b| (Value::Udint(u32::from_le_bytes(b)), 4)),
		DataType::Lint => bytes::<8>(slice).map(|b| (Value::Lint(i64::from_le_bytes(b)), 8)),
		DataType::Ulint => bytes::<8>(slice).map(|b| (Value::Ulint(u64::from_le_bytes(b)), 8)),
		DataType::Real => bytes::<4>(slice).map(|b| (Value::Real(f32::from_le_bytes(b)), 4)),
		DataType::Lreal => bytes::<8>(slice).map(|b| (Value::Lreal(f64::from_le_bytes(b)), 8)),
		DataType::ShortString => {
			let [len] = bytes::<1>(slice)?;
			let raw = slice
				.split_bytes(len as usize)
				.map_err(|_| CipError::Decode("reply truncated while decoding a SHORT_STRING".into()))?;
			let s = String::from_utf8_lossy(raw).into_owned();
			Ok((Value::Str(s), 1 + len as usize))
		}
		DataType::Struct => {
			let [t0, t1] = bytes::<2>(slice)?;
			let inner = u16::from_le_bytes([t0, t1]);

			if inner != 0x0FCE {
				return Err(CipError::Decode(format!("unsupported STRUCT inner type {inner:#06x}")));
			}

			let len_bytes = bytes::<4>(slice)?;
			let len = u32::from_le_bytes(len_bytes) as usize;
			let raw = slice
				.split_bytes(len)
				.map_err(|_| CipError::Decode("reply truncated while decoding an AB string struct".into()))?;
			let s = String::from_utf8_lossy(raw).into_owned();
			Ok((Value::Str(s), 6 + len))
		}
		other => Err(CipError::Decode(format!("unsupported data type {:#06x}", other.code()))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn byte_widths_match_original() {
		assert_eq!(DataType::Null.byte_width(), 0);
		assert_eq!(DataType::Bool.byte_width(), 1);
		assert_eq!(DataType::Sint.byte_width(), 1);
		assert_eq!(DataType::Int.byte_width(), 2);
		assert_eq!(DataType::Dint.byte_width(), 4);
		assert_eq!(DataType::BitString.byte_width(), 4);
		assert_eq!(DataType::Lint.byte_width(), 8);
		assert_eq!(DataType::Lreal.byte_width(), 8);
		assert_eq!(DataType::Struct.byte_width(), 88);
		assert_eq!(DataType::String.byte_width(), 0);
	}

	#[test]
	fn bit_width_is_eight_times_byte_width() {
		assert_eq!(DataType::Dint.bit_width(), 32);
	}

	#[test]
	fn reads_real_as_ieee754() {
		let bytes = 3.25f32.to_le_bytes();
		let mut slice = Slice::new(&bytes);
		let (value, consumed) = read_value(&mut slice, DataType::Real).unwrap();
		assert_eq!(value, Value::Real(3.25));
		assert_eq!(consumed, 4);
	}

	#[test]
	fn reads_short_string() {
		let mut raw = vec![5u8];
		raw.extend_from_slice(b"hello");
		let mut slice = Slice::new(&raw);
		let (value, consumed) = read_value(&mut slice, DataType::ShortString).unwrap();
		assert_eq!(value, Value::Str("hello".into()));
		assert_eq!(consumed, 6);
	}

	#[test]
	fn struct_envelope_requires_ab_string_tag() {
		let raw = [0x11u8, 0x00];
		let mut slice = Slice::new(&raw);
		assert!(read_value(&mut slice, DataType::Struct).is_err());
	}

	#[test]
	fn bool_is_truthy_iff_bit_zero_set() {
		let raw = [0x02u8];
		let mut slice = Slice::new(&raw);
		let (value, _) = read_value(&mut slice, DataType::Bool).unwrap();
		assert_eq!(value, Value::Bool(false));
	}

	#[test]
	fn bits_rejects_floats() {
		let values = Values(vec![Value::Real(1.0)]);
		assert!(values.bits().is_err());
	}
}
