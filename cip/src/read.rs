//! Tag read engine (§4.10): type discovery, request-shape selection (plain/BIT_STRING/
//! bit-of-word), value decoding with partial-transfer continuation, bit slicing, and the
//! per-tag status classification `multi_read_tag` needs. The socket round trip itself lives on
//! `Plc` in `lib.rs`, which calls into these pure, independently testable pieces.

use std::collections::HashMap;
use std::sync::Mutex;

use collections::bytes::Slice;

use crate::codec::message_router::MessageRouterResponse;
use crate::error::{CipError, Result};
use crate::tagname::{self, ParsedTag};
use crate::types::{self, DataType, Value, Values};

/// Per-tag failure codes `multi_read_tag` surfaces beyond CIP's own status vocabulary (§6).
pub const STATUS_EXTENDED_NONZERO: u8 = 100;
pub const STATUS_DECODE_FAILURE: u8 = 101;
pub const STATUS_BIT_EXTRACT_FAILURE: u8 = 102;

/// A discovered tag's DataType, cached per base tag name so repeat reads skip the
/// `ReadPartialTag` round trip (§4.10: "if cached, return immediately").
#[derive(Default)]
pub struct TagCache {
	types: Mutex<HashMap<String, DataType>>,
}

impl TagCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, base_tag: &str) -> Option<DataType> {
		self.types.lock().expect("tag cache mutex poisoned").get(base_tag).copied()
	}

	pub fn insert(&self, base_tag: String, dtype: DataType) {
		self.types.lock().expect("tag cache mutex poisoned").insert(base_tag, dtype);
	}
}

/// The shape of the ReadTag/ReadTagFragmented request to issue once a tag's DataType is known
/// (§4.10 step 2). `bit_count` is `Some` for BIT_STRING and bit-of-word tags, where `words`
/// addresses whole words and the result still needs bit-slicing after decode.
pub struct RequestShape {
	pub words: u16,
	pub bit_count: Option<u32>,
}

fn ceil_div(numerator: u32, denominator: u32) -> u32 {
	(numerator + denominator - 1) / denominator
}

/// Chooses how many words to request for `elements` values starting at `index`, given the
/// tag's discovered `dtype` and whether the tag name carried a `.N` bit-of-word suffix.
pub fn request_shape(dtype: DataType, index: u32, elements: u32, is_bit_of_word: bool) -> RequestShape {
	if dtype == DataType::BitString {
		RequestShape {
			words: ceil_div(index % 32 + elements, 32) as u16,
			bit_count: Some(32),
		}
	} else if is_bit_of_word {
		let bit_count = dtype.bit_width() as u32;
		RequestShape {
			words: ceil_div(index % bit_count + elements, bit_count) as u16,
			bit_count: Some(bit_count),
		}
	} else {
		RequestShape { words: elements as u16, bit_count: None }
	}
}

/// Decodes up to `max_elements` values of `dtype` out of `data`, stopping early (without error)
/// once fewer than one full element's worth of bytes remain — the caller uses the returned count
/// to decide whether a continuation read is needed (§4.10 step 4).
pub fn decode_elements(data: &[u8], dtype: DataType, max_elements: usize) -> Result<Values> {
	let mut slice = Slice::new(data);
	let mut values = Vec::new();
	let width = dtype.byte_width() as usize;

	while values.len() < max_elements {
		if slice.is_empty() || (width > 0 && slice.remaining() < width) {
			break;
		}
		let (value, _) = types::read_value(&mut slice, dtype)?;
		values.push(value);
	}

	Ok(Values(values))
}

/// Expands `words` into little-endian bits and slices out `[bit_pos, bit_pos + elements)`
/// (§4.10 step 5, §8's BIT_STRING/bit-of-word scenarios).
pub fn slice_bits(words: &Values, bit_pos: u32, elements: u32) -> Result<Values> {
	let bits = words.bits()?;
	let start = bit_pos as usize;
	let end = start + elements as usize;

	if end > bits.len() {
		return Err(CipError::Decode(format!("bit range {start}..{end} exceeds {} decoded bits", bits.len())));
	}

	Ok(Values(bits[start..end].iter().map(|&b| Value::Bool(b)).collect()))
}

/// The base tag name plus addressing metadata `read_tag`/`multi_read_tag` need once a DataType
/// is known: the parsed index list, whether the name carried a bit-of-word suffix, and (for
/// multi-dimensional names) the single index this client actually addresses — only the first
/// index of a bracketed list drives request shaping, matching `original_source`.
pub struct TagAddress {
	pub parsed: ParsedTag,
	pub is_bit_of_word: bool,
	pub index: u32,
}

/// Parses `tag_name` into the addressing metadata `ReadTag` needs.
pub fn resolve_address(tag_name: &str) -> TagAddress {
	let parsed = tagname::parse(tag_name);
	let is_bit_of_word = tagname::is_bit_word(tag_name);
	let index = parsed.indices.first().copied().unwrap_or(0);
	TagAddress { parsed, is_bit_of_word, index }
}

/// Builds the tag name for a continuation read starting at `next_index` (§4.10 step 4):
/// `baseTag[next_index]` for array-like tags, `baseTag.<next_index * bit_count>` for bit-of-word
/// tags advancing by whole words.
pub fn continuation_tag_name(address: &TagAddress, next_index: u32) -> String {
	if address.is_bit_of_word {
		format!("{}.{next_index}", address.parsed.base)
	} else {
		format!("{}[{next_index}]", address.parsed.base)
	}
}

/// One `multi_read_tag` entry's outcome: a CIP status (possibly one of the `STATUS_*` parse-side
/// codes above), the resolved DataType, and the decoded (and, for bit tags, sliced) values.
pub struct MultiTagResult {
	pub status: u8,
	pub dtype: DataType,
	pub values: Values,
}

/// Classifies one embedded reply inside a `MultipleServicePacket` response (§6's per-tag status
/// vocabulary): a nonzero extended status always wins, then CIP status, then decode, then
/// (for bit tags) bit-slice failure.
pub fn classify_multi_entry(response: &MessageRouterResponse, elements: u32, bit_slice: Option<(u32, u32)>) -> MultiTagResult {
	if !response.ext_status.is_empty() && response.ext_status.iter().any(|&b| b != 0) {
		return MultiTagResult { status: STATUS_EXTENDED_NONZERO, dtype: response.dtype, values: Values::new() };
	}

	if !response.is_success_or_partial() {
		return MultiTagResult { status: response.status, dtype: response.dtype, values: Values::new() };
	}

	let words = match decode_elements(&response.data, response.dtype, elements as usize) {
		Ok(values) => values,
		Err(_) => return MultiTagResult { status: STATUS_DECODE_FAILURE, dtype: response.dtype, values: Values::new() },
	};

	match bit_slice {
		Some((bit_pos, count)) => match slice_bits(&words, bit_pos, count) {
			Ok(bits) => MultiTagResult { status: response.status, dtype: response.dtype, values: bits },
			Err(_) => MultiTagResult { status: STATUS_BIT_EXTRACT_FAILURE, dtype: response.dtype, values: Values::new() },
		},
		None => MultiTagResult { status: response.status, dtype: response.dtype, values: words },
	}
}

/// Finds the largest prefix of `segments` whose packed `MultipleServicePacket` size (via
/// `pack`) stays within `capacity` bytes, always returning at least 1 so the caller makes
/// progress even on a single oversized tag (§4.10: "Multi-read overflow").
pub fn fitting_prefix_len(segments: &[Vec<u8>], capacity: usize, pack: impl Fn(&[Vec<u8>]) -> usize) -> usize {
	let mut len = segments.len();
	while len > 1 && pack(&segments[..len]) > capacity {
		len -= 1;
	}
	len
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bit_string_request_words_cover_33rd_bit() {
		let shape = request_shape(DataType::BitString, 33, 1, false);
		assert_eq!(shape.words, 1);
		assert_eq!(shape.bit_count, Some(32));
	}

	#[test]
	fn bit_of_word_request_words_use_dtype_bit_width() {
		let shape = request_shape(DataType::Dint, 20, 1, true);
		assert_eq!(shape.words, 1);
		assert_eq!(shape.bit_count, Some(32));
	}

	#[test]
	fn plain_request_words_equal_elements() {
		let shape = request_shape(DataType::Real, 0, 3, false);
		assert_eq!(shape.words, 3);
		assert!(shape.bit_count.is_none());
	}

	#[test]
	fn decode_elements_stops_short_on_truncated_tail() {
		let mut data = 1i32.to_le_bytes().to_vec();
		data.extend_from_slice(&2i32.to_le_bytes());
		data.push(0xFF); // a stray half-element
		let values = decode_elements(&data, DataType::Dint, 3).unwrap();
		assert_eq!(values.len(), 2);
	}

	#[test]
	fn slice_bits_reads_bit_one_of_word_one() {
		let words = Values(vec![Value::Udint(0b10)]);
		let sliced = slice_bits(&words, 1, 1).unwrap();
		assert_eq!(sliced.0, vec![Value::Bool(true)]);
	}

	#[test]
	fn slice_bits_out_of_range_is_decode_error() {
		let words = Values(vec![Value::Udint(0)]);
		assert!(slice_bits(&words, 40, 1).is_err());
	}

	#[test]
	fn continuation_tag_name_indexes_the_next_array_element() {
		let address = resolve_address("Array[5]");
		assert_eq!(continuation_tag_name(&address, 6), "Array[6]");
	}

	#[test]
	fn continuation_tag_name_bit_of_word_advances_by_bit_count() {
		let address = resolve_address("Flags.20");
		assert_eq!(continuation_tag_name(&address, 32), "Flags.32");
	}

	#[test]
	fn fitting_prefix_len_shrinks_until_it_fits() {
		let segments = vec![vec![0u8; 10], vec![0u8; 10], vec![0u8; 10]];
		let len = fitting_prefix_len(&segments, 25, |s| s.iter().map(|v| v.len()).sum());
		assert_eq!(len, 2);
	}

	#[test]
	fn fitting_prefix_len_never_returns_zero() {
		let segments = vec![vec![0u8; 100]];
		let len = fitting_prefix_len(&segments, 1, |s| s.iter().map(|v| v.len()).sum());
		assert_eq!(len, 1);
	}

	#[test]
	fn classify_multi_entry_flags_nonzero_extended_status() {
		let response = MessageRouterResponse {
			sequence: None,
			service: 0x4C,
			status: 0,
			ext_status: vec![0x01, 0x00],
			dtype: DataType::Dint,
			data: Vec::new(),
		};
		let result = classify_multi_entry(&response, 1, None);
		assert_eq!(result.status, STATUS_EXTENDED_NONZERO);
	}
}
