//! CIP Message Router request/response encoding (§4.7). Ported from `original_source`'s
//! `enip.MessageRouterRequest`/`UnconnectedSend`/`BuildTagIOI`/`AddReadIOI`/`AddPartialReadIOI`/
//! `BuildMultiServiceHeader`/`GenerateEncodedTimeout`/`ParserResponse`.

use collections::bytes::{Cursor, Slice};

use crate::codec::epath::{self, LogicalType};
use crate::error::{CipError, Result};
use crate::tagname;
use crate::types::DataType;

pub const SERVICE_GET_ATTRIBUTE_ALL: u8 = 0x01;
pub const SERVICE_MULTIPLE_SERVICE_PACKET: u8 = 0x0A;
pub const SERVICE_READ_TAG: u8 = 0x4C;
pub const SERVICE_FORWARD_CLOSE: u8 = 0x4E;
pub const SERVICE_FORWARD_OPEN: u8 = 0x54;
pub const SERVICE_FORWARD_OPEN_LARGE: u8 = 0x5B;
pub const SERVICE_READ_TAG_FRAGMENTED: u8 = 0x52;
pub const SERVICE_UNCONNECTED_SEND: u8 = 0x52;

/// A CIP Message Router request: `{Service, PathSize, Path, RequestData}`.
pub struct MessageRouterRequest {
	pub service: u8,
	pub request_path: Vec<u8>,
	pub request_data: Vec<u8>,
}

impl MessageRouterRequest {
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut cursor = Cursor::new();
		cursor.push(&[self.service]);
		cursor.push(&[epath::path_size_words(&self.request_path)]);
		cursor.push_bytes(&self.request_path);
		cursor.push_bytes(&self.request_data);
		cursor.into_vec()
	}
}

/// The UnconnectedSend (service `0x52` on the Connection Manager, class `0x06` instance `0x01`)
/// wrapper carrying a message to route to `router_path` without a connected channel.
struct UnconnectedSend {
	time_tick: u8,
	time_out_ticks: u8,
	message_request: Vec<u8>,
	router_path: Vec<u8>,
}

impl UnconnectedSend {
	fn to_bytes(&self) -> Vec<u8> {
		let mut cursor = Cursor::new();
		cursor.push(&[self.time_tick, self.time_out_ticks]);
		cursor.push(&(self.message_request.len() as u16).to_le_bytes());
		cursor.push_bytes(&self.message_request);
		if self.message_request.len() % 2 == 1 {
			cursor.push(&[0x00]);
		}
		cursor.push(&[(self.router_path.len() / 2) as u8, 0x00]);
		cursor.push_bytes(&self.router_path);
		cursor.into_vec()
	}
}

/// Wraps `request` (an already-built Message Router request) for unconnected delivery via
/// `router_path`. The nominal timeout is fixed at 2 ticks × 250 (~2000ms), matching
/// `original_source`'s `BuildUnconnectedSend`.
pub fn build_unconnected_send(router_path: &[u8], request: &[u8]) -> Vec<u8> {
	let ucmm = UnconnectedSend {
		time_tick: 2,
		time_out_ticks: 250,
		message_request: request.to_vec(),
		router_path: router_path.to_vec(),
	};

	let path = epath::concat(&[epath::logical(LogicalType::ClassId, 0x06), epath::logical(LogicalType::InstanceId, 0x01)]);

	let mr = MessageRouterRequest {
		service: SERVICE_UNCONNECTED_SEND,
		request_path: path,
		request_data: ucmm.to_bytes(),
	};

	mr.to_bytes()
}

/// Builds a `GetAttributeAll` request against `class`/`instance` (used for the identity read).
pub fn build_get_attribute_all(class: u32, instance: u32) -> Vec<u8> {
	let path = epath::concat(&[epath::logical(LogicalType::ClassId, class), epath::logical(LogicalType::InstanceId, instance)]);

	MessageRouterRequest {
		service: SERVICE_GET_ATTRIBUTE_ALL,
		request_path: path,
		request_data: Vec::new(),
	}
	.to_bytes()
}

/// Builds the symbolic IOI path for `tag_name` (§4.7, "BuildTagIOI"). `dtype` drives two special
/// cases: a BIT_STRING's trailing `[i]` addresses word `i/32`, and an unresolved probe
/// (`DataType::Null`) always addresses element `[0]` regardless of what the caller asked for.
pub fn build_tag_ioi(tag_name: &str, dtype: DataType) -> Vec<u8> {
	let segments: Vec<&str> = tag_name.split('.').collect();
	let mut out = Vec::new();

	for (i, segment) in segments.iter().enumerate() {
		if segment.ends_with(']') {
			let parsed = tagname::parse(segment);
			out.extend(epath::symbolic(&parsed.base));

			let mut indices = parsed.indices;
			if dtype == DataType::BitString && i == segments.len() - 1 {
				indices = vec![indices[0] / 32];
			} else if dtype == DataType::Null {
				indices = vec![0];
			}

			for index in indices {
				out.extend(epath::element(index));
			}
		} else if !tagname::is_integer(segment) {
			out.extend(epath::symbolic(segment));
		} else if i == 1 && segments.len() == 2 {
			let index: u32 = segment.parse().unwrap_or(0);
			let bit_count = dtype.bit_width() as u32;
			out.extend(epath::element(index / bit_count.max(1)));
		}
	}

	out
}

/// Wraps a tag IOI into a `ReadTag` (service `0x4C`) request for `elements` array elements.
pub fn add_read_ioi(tag_ioi: &[u8], elements: u16) -> Vec<u8> {
	let mut cursor = Cursor::new();
	cursor.push(&[SERVICE_READ_TAG, epath::path_size_words(tag_ioi)]);
	cursor.push_bytes(tag_ioi);
	cursor.push(&elements.to_le_bytes());
	cursor.into_vec()
}

/// Wraps a tag IOI into a `ReadTagFragmented` (service `0x52`) request starting at `offset`
/// elements in — used both for the type-discovery probe and for partial-transfer continuations.
pub fn add_partial_read_ioi(tag_ioi: &[u8], elements: u16, offset: u32) -> Vec<u8> {
	let mut cursor = Cursor::new();
	cursor.push(&[SERVICE_READ_TAG_FRAGMENTED, epath::path_size_words(tag_ioi)]);
	cursor.push_bytes(tag_ioi);
	cursor.push(&elements.to_le_bytes());
	cursor.push(&offset.to_le_bytes());
	cursor.into_vec()
}

/// The fixed six-byte header preceding a `MultipleServicePacket` body (service `0x0A` on class
/// `0x02` instance `0x01`).
pub fn build_multi_service_header() -> Vec<u8> {
	vec![SERVICE_MULTIPLE_SERVICE_PACKET, 0x02, 0x20, 0x02, 0x24, 0x01]
}

/// Packs `segments` (already-built embedded service requests) behind a `MultipleServicePacket`
/// header, computing the per-entry offset table (offsets measured from the `serviceCount` field).
pub fn build_multi_service_packet(segments: &[Vec<u8>]) -> Vec<u8> {
	let header = build_multi_service_header();
	let count = segments.len();

	let mut offset = header.len() + 2 + count * 2;
	let mut offsets = Vec::with_capacity(count);
	offsets.push(offset as u16);
	for segment in &segments[..count.saturating_sub(1)] {
		offset += segment.len();
		offsets.push(offset as u16);
	}

	let mut cursor = Cursor::new();
	cursor.push_bytes(&header);
	cursor.push(&(count as u16).to_le_bytes());
	for off in offsets {
		cursor.push(&off.to_le_bytes());
	}
	for segment in segments {
		cursor.push_bytes(segment);
	}
	cursor.into_vec()
}

/// Finds `(ticks, mult)` minimising `|timeout_ms - mult * 2^ticks|`, ties broken toward the pair
/// visited last (i.e. `<=` rather than `<` when updating the running minimum) — this matches
/// `original_source`'s `GenerateEncodedTimeout` exactly.
pub fn generate_encoded_timeout(timeout_ms: u32) -> (u8, u8) {
	let mut time_tick = 0u8;
	let mut ticks = 0u8;
	let mut best_diff: Option<i64> = None;

	for i in 0..16u32 {
		for j in 1..256i64 {
			let candidate = (1i64 << i) * j;
			let diff = (timeout_ms as i64 - candidate).abs();

			if best_diff.is_none_or(|best| diff <= best) {
				best_diff = Some(diff);
				time_tick = i as u8;
				ticks = j as u8;
				if diff == 0 {
					return (time_tick, ticks);
				}
			}
		}
	}

	(time_tick, ticks)
}

/// A decoded Message Router reply.
#[derive(Debug, Clone)]
pub struct MessageRouterResponse {
	pub sequence: Option<u16>,
	pub service: u8,
	pub status: u8,
	pub ext_status: Vec<u8>,
	pub dtype: DataType,
	pub data: Vec<u8>,
}

impl MessageRouterResponse {
	/// True for CIP status 0 (success) or 6 (partial transfer), the two statuses this client
	/// treats as "there is data to decode".
	pub fn is_success_or_partial(&self) -> bool {
		self.status == 0 || self.status == 6
	}
}

/// The fixed preamble common to every Message Router reply, before any service-specific payload.
#[derive(Debug, Clone)]
pub struct ReplyEnvelope {
	pub sequence: Option<u16>,
	pub service: u8,
	pub status: u8,
	pub ext_status: Vec<u8>,
}

impl ReplyEnvelope {
	/// True for CIP status 0 (success) or 6 (partial transfer).
	pub fn is_success_or_partial(&self) -> bool {
		self.status == 0 || self.status == 6
	}
}

/// Splits `data` into its reply envelope and whatever bytes follow, untouched. `connected`
/// controls whether a leading `u16` sequence counter is present (always true for replies carried
/// over `SendUnitData`).
///
/// Most services' payload is a trailing `DataType` plus value bytes, which `parse_response` peels
/// off below — but `MultipleServicePacket` and `GetAttributeAll` replies have their own shape
/// (a count/offset table; a fixed-offset identity record) and must see these bytes raw.
pub fn split_reply_envelope(data: &[u8], connected: bool) -> Result<(ReplyEnvelope, Vec<u8>)> {
	let mut slice = Slice::new(data);
	let err = || CipError::Decode("truncated Message Router reply".into());

	let sequence = if connected {
		let b = slice.split_bytes(2).map_err(|_| err())?;
		Some(u16::from_le_bytes(b.try_into().unwrap()))
	} else {
		None
	};

	let service = slice.split_bytes(1).map_err(|_| err())?[0];
	let _reserved = slice.split_bytes(1).map_err(|_| err())?[0];
	let status = slice.split_bytes(1).map_err(|_| err())?[0];
	let ext_status_size = slice.split_bytes(1).map_err(|_| err())?[0];

	let ext_status = if ext_status_size > 0 {
		slice.split_bytes(ext_status_size as usize * 2).map_err(|_| err())?.to_vec()
	} else {
		Vec::new()
	};

	Ok((ReplyEnvelope { sequence, service, status, ext_status }, slice.rest().to_vec()))
}

/// Parses a Message Router reply whose payload is a trailing `DataType` plus value bytes (every
/// service except `MultipleServicePacket` and `GetAttributeAll` — see `split_reply_envelope`).
pub fn parse_response(data: &[u8], connected: bool) -> Result<MessageRouterResponse> {
	let (envelope, rest) = split_reply_envelope(data, connected)?;
	let mut slice = Slice::new(&rest);
	let err = || CipError::Decode("truncated Message Router reply".into());

	let mut dtype = DataType::Null;
	let mut out_data = Vec::new();

	if !slice.is_empty() && envelope.is_success_or_partial() {
		let dtype_bytes = slice.split_bytes(2).map_err(|_| err())?;
		dtype = DataType::from_code(u16::from_le_bytes(dtype_bytes.try_into().unwrap()));
		out_data = slice.rest().to_vec();
	}

	Ok(MessageRouterResponse {
		sequence: envelope.sequence,
		service: envelope.service,
		status: envelope.status,
		ext_status: envelope.ext_status,
		dtype,
		data: out_data,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encoded_timeout_hits_exact_matches() {
		assert_eq!(generate_encoded_timeout(2000), (3, 250));
	}

	#[test]
	fn tag_ioi_pads_odd_length_names() {
		let ioi = build_tag_ioi("P_REAL", DataType::Real);
		assert_eq!(ioi, epath::symbolic("P_REAL"));
	}

	#[test]
	fn bit_string_last_segment_divides_index_by_32() {
		let ioi = build_tag_ioi("A_BOOL[33]", DataType::BitString);
		let mut expected = epath::symbolic("A_BOOL");
		expected.extend(epath::element(1));
		assert_eq!(ioi, expected);
	}

	#[test]
	fn bit_of_word_suffix_divides_by_bit_width() {
		let ioi = build_tag_ioi("Flags.20", DataType::Dint);
		let mut expected = epath::symbolic("Flags");
		expected.extend(epath::element(0));
		assert_eq!(ioi, expected);
	}

	#[test]
	fn null_probe_always_addresses_element_zero() {
		let ioi = build_tag_ioi("Array[9]", DataType::Null);
		let mut expected = epath::symbolic("Array");
		expected.extend(epath::element(0));
		assert_eq!(ioi, expected);
	}

	#[test]
	fn multi_service_packet_offsets_are_measured_from_count_field() {
		let segments = vec![vec![1u8, 2, 3], vec![4u8, 5]];
		let packet = build_multi_service_packet(&segments);
		let header_len = build_multi_service_header().len();
		let count = u16::from_le_bytes([packet[header_len], packet[header_len + 1]]);
		assert_eq!(count, 2);
		let off0 = u16::from_le_bytes([packet[header_len + 2], packet[header_len + 3]]) as usize;
		assert_eq!(&packet[off0..off0 + 3], &[1, 2, 3]);
	}

	#[test]
	fn response_parses_partial_transfer_as_data_bearing() {
		let mut data = vec![0xCC, 0x00, 0x06, 0x00];
		data.extend_from_slice(&DataType::Dint.code().to_le_bytes());
		data.extend_from_slice(&42i32.to_le_bytes());
		let res = parse_response(&data, false).unwrap();
		assert!(res.is_success_or_partial());
		assert_eq!(res.dtype, DataType::Dint);
		assert_eq!(res.data, 42i32.to_le_bytes());
	}

	#[test]
	fn response_with_extended_status_skips_it_before_data() {
		let mut data = vec![0xCC, 0x00, 0x01, 0x01, 0xAB, 0xCD];
		let res = parse_response(&data, false).unwrap();
		assert_eq!(res.status, 1);
		assert_eq!(res.ext_status, vec![0xAB, 0xCD]);
		assert!(res.data.is_empty());
	}

	#[test]
	fn connected_reply_carries_a_leading_sequence_number() {
		let mut data = 7u16.to_le_bytes().to_vec();
		data.extend_from_slice(&[0xCC, 0x00, 0x00, 0x00]);
		let res = parse_response(&data, true).unwrap();
		assert_eq!(res.sequence, Some(7));
	}

	#[test]
	fn split_reply_envelope_leaves_a_multi_service_count_table_untouched() {
		// A MultipleServicePacket reply's own body (count + offsets) looks exactly like a
		// DataType-then-data payload would — split_reply_envelope must not try to interpret it.
		let mut data = vec![0x8A, 0x00, 0x00, 0x00];
		data.extend_from_slice(&2u16.to_le_bytes());
		data.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
		let (envelope, rest) = split_reply_envelope(&data, false).unwrap();
		assert!(envelope.is_success_or_partial());
		assert_eq!(rest, vec![2, 0, 0xAA, 0xBB, 0xCC, 0xDD]);
	}
}
