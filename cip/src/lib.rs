//! An EtherNet/IP (ENIP) + Common Industrial Protocol (CIP) client for reading symbolic tags off
//! Allen-Bradley / Rockwell ControlLogix-family and Micro800 PLCs.
//!
//! A [`Plc`] dials nothing itself — the caller hands it an already-connected duplex stream (a
//! `TcpStream`, a `UnixStream`, or anything `Read + Send` paired with a [`correlator::Transport`]
//! writer) — then drives it through
//! `register_session` → (optionally) `forward_open` → `read_tag`/`multi_read_tag` → `close`.

pub mod codec;
pub mod correlator;
pub mod error;
pub mod identity;
pub mod read;
pub mod session;
pub mod status;
pub mod tagname;
pub mod types;

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codec::cpf::{self, CpfItem, CpfType};
use codec::header::Command;
use codec::message_router::{self, MessageRouterResponse};
use correlator::{Correlator, Transport};
use error::{CipError, Result};
use identity::PlcInfo;
use read::{MultiTagResult, TagCache};
use session::{Family, Lifecycle, SessionState};
use types::{DataType, Values};

const UNCONNECTED_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECTED_TIMEOUT: Duration = Duration::from_secs(30);

/// Caller-supplied knobs for [`Plc::connect`] (§6: "Configurable").
pub struct PlcConfig {
	/// Addresses the Connection Manager path the Micro800 way (no backplane slot segment) when
	/// `true`; the ControlLogix way (with a slot segment) otherwise.
	pub micro800: bool,
	/// Backplane slot the CPU occupies. Ignored for Micro800.
	pub slot: u8,
	/// Fixed connected-transfer size in bytes, or `0` to negotiate (large-then-small fallback).
	pub connection_size: u16,
	/// Fired once, after the reader thread observes the connection drop (socket error, a timed
	/// out request tearing the connection down, or an explicit `close`).
	pub on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Default for PlcConfig {
	fn default() -> Self {
		Self { micro800: false, slot: 0, connection_size: 0, on_close: None }
	}
}

/// One logical connection to a PLC: the session/forward-open state machine, the request/reply
/// correlator, and the tag-type cache, all reachable from any number of caller threads.
pub struct Plc {
	correlator: Arc<Correlator>,
	state: Mutex<SessionState>,
	cache: TagCache,
	closed: AtomicBool,
}

impl Plc {
	/// Wires up a reader half and a writer half and starts the reader thread. Transitions the
	/// handle from `Disconnected` to `Connected` (§4.8). The two halves are taken separately
	/// rather than as one `Read + Write` stream plus an internal split, since the standard
	/// `TcpStream` has no `Clone` impl of its own — callers split it with `try_clone()` (or, in
	/// tests, a loopback pipe pair) before calling this.
	pub fn connect<R, W>(reader: R, writer: W, config: PlcConfig) -> Arc<Self>
	where
		R: Read + Send + 'static,
		W: Transport + 'static,
	{
		let family = if config.micro800 { Family::Micro800 } else { Family::ControlLogix };
		let mut state = SessionState::new(family, config.slot);
		state.connection_size = config.connection_size;
		state.lifecycle = Lifecycle::Connected;

		let correlator = Correlator::new(Box::new(writer));

		let plc = Arc::new(Self {
			correlator: Arc::clone(&correlator),
			state: Mutex::new(state),
			cache: TagCache::new(),
			closed: AtomicBool::new(false),
		});

		let on_close = config.on_close;
		let plc_for_close = Arc::clone(&plc);
		correlator.spawn_reader(reader, move || {
			plc_for_close.closed.store(true, Ordering::SeqCst);
			if let Ok(mut state) = plc_for_close.state.lock() {
				state.lifecycle = Lifecycle::Disconnected;
			}
			if let Some(on_close) = on_close {
				on_close();
			}
		});

		plc
	}

	fn ensure_open(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(CipError::NotReady("the handle is closed"));
		}
		Ok(())
	}

	/// Registers the ENIP session (§4.6/§8 scenario 1) and immediately issues the identity read
	/// (§4.11), populating `info()`. Transitions `Connected` → `Registered`.
	pub fn register_session(&self) -> Result<()> {
		self.ensure_open()?;

		let body = [0x01, 0x00, 0x00, 0x00];
		let reply = self.correlator.send(Command::RegisterSession, 0, None, &body, UNCONNECTED_TIMEOUT)?;

		{
			let mut state = self.state.lock().expect("session mutex poisoned");
			state.session_id = reply.session_id;
			state.lifecycle = Lifecycle::Registered;
		}

		let target_path = self.state.lock().expect("session mutex poisoned").target_path.clone();
		let info = self.read_attribute_all_via(&target_path)?;
		self.state.lock().expect("session mutex poisoned").info = Some(info);
		Ok(())
	}

	/// Best-effort session teardown (§6). Does not fail the handle if the peer has already
	/// dropped the connection.
	pub fn unregister_session(&self) -> Result<()> {
		let session_id = self.session_id();
		let _ = self.correlator.send(Command::UnregisterSession, session_id, None, &[], UNCONNECTED_TIMEOUT);

		let mut state = self.state.lock().expect("session mutex poisoned");
		state.lifecycle = Lifecycle::Connected;
		Ok(())
	}

	fn session_id(&self) -> u32 {
		self.state.lock().expect("session mutex poisoned").session_id
	}

	/// Negotiates the connected channel (§4.8, §8 scenario 2): large ForwardOpen (4002 bytes)
	/// first, falling back once to a small ForwardOpen (508 bytes) on a non-zero CIP status.
	/// Transitions `Registered` → `ForwardOpened`.
	pub fn forward_open(&self) -> Result<()> {
		self.ensure_open()?;

		let fixed_size = {
			let state = self.state.lock().expect("session mutex poisoned");
			if state.connection_size > 0 { Some(state.connection_size) } else { None }
		};

		let sizes = fixed_size.map(|s| vec![s]).unwrap_or_else(|| vec![session::LARGE_CONNECTION_SIZE, session::SMALL_CONNECTION_SIZE]);

		let mut last_err = None;
		for size in sizes {
			let mut state = self.state.lock().expect("session mutex poisoned");
			state.serial_id = self.correlator.random_u16();
			let body = session::build_forward_open(&state, size);
			let router_path = state.target_path.clone();
			drop(state);

			let item = self.send_unconnected_item(&router_path, &body)?;
			match message_router::split_reply_envelope(&item, false) {
				Ok((envelope, rest)) if envelope.is_success_or_partial() => {
					let mut state = self.state.lock().expect("session mutex poisoned");
					state.connection_size = size;
					if rest.len() >= 4 {
						state.connection_id = u32::from_le_bytes(rest[0..4].try_into().unwrap());
					}
					state.lifecycle = Lifecycle::ForwardOpened;
					return Ok(());
				}
				Ok((envelope, _)) => {
					last_err = Some(CipError::CipStatus {
						status: envelope.status,
						message: status::cip_status_message(envelope.status),
						ext_status: envelope.ext_status,
					});
				}
				Err(err) => return Err(err),
			}
		}

		Err(last_err.unwrap_or(CipError::NotReady("forward open negotiation produced no attempts")))
	}

	/// Tears down the connected channel (§6). Transitions `ForwardOpened` → `Registered`.
	pub fn forward_close(&self) -> Result<()> {
		self.ensure_open()?;

		let (body, router_path) = {
			let state = self.state.lock().expect("session mutex poisoned");
			(session::build_forward_close(&state), state.target_path.clone())
		};

		let _ = self.send_unconnected_raw(&router_path, &body)?;
		let mut state = self.state.lock().expect("session mutex poisoned");
		state.lifecycle = Lifecycle::Registered;
		Ok(())
	}

	/// Reads `elements` values of `tag_name`, discovering its DataType on first use and handling
	/// BIT_STRING/bit-of-word shaping, partial-transfer continuation, and bit slicing (§4.10).
	pub fn read_tag(&self, tag_name: &str, elements: u16) -> Result<(DataType, Values)> {
		self.ensure_open()?;

		let address = read::resolve_address(tag_name);
		let dtype = self.discover_type(&address.parsed.base)?;

		let shape = read::request_shape(dtype, address.index, elements as u32, address.is_bit_of_word);

		let mut collected = Vec::new();
		let mut next_index = address.index;
		let mut remaining = elements as u32;

		while remaining > 0 {
			let words_needed = if address.is_bit_of_word || dtype == DataType::BitString {
				read::request_shape(dtype, next_index, remaining, address.is_bit_of_word).words
			} else {
				remaining as u16
			};

			let name = if next_index == address.index {
				tag_name.to_string()
			} else {
				read::continuation_tag_name(&address, next_index)
			};

			let response = self.read_tag_once(&name, dtype, words_needed)?;
			if !response.is_success_or_partial() {
				return Err(CipError::CipStatus {
					status: response.status,
					message: status::cip_status_message(response.status),
					ext_status: response.ext_status,
				});
			}

			let decoded = read::decode_elements(&response.data, dtype, words_needed as usize)?;
			let got = decoded.len() as u32;
			collected.extend(decoded.0);

			if got == 0 {
				break;
			}
			remaining = remaining.saturating_sub(got);
			next_index += got;
		}

		let words = Values(collected);

		if let Some(bit_count) = shape.bit_count {
			let bit_pos = address.index % bit_count;
			let values = read::slice_bits(&words, bit_pos, elements as u32)?;
			Ok((dtype, values))
		} else {
			Ok((dtype, words))
		}
	}

	fn discover_type(&self, base_tag: &str) -> Result<DataType> {
		if let Some(dtype) = self.cache.get(base_tag) {
			return Ok(dtype);
		}

		let ioi = message_router::build_tag_ioi(base_tag, DataType::Null);
		let request = message_router::add_partial_read_ioi(&ioi, 1, 0);
		let response = self.transmit(&request)?;

		if !response.is_success_or_partial() {
			return Err(CipError::CipStatus {
				status: response.status,
				message: status::cip_status_message(response.status),
				ext_status: response.ext_status,
			});
		}

		self.cache.insert(base_tag.to_string(), response.dtype);
		Ok(response.dtype)
	}

	fn read_tag_once(&self, tag_name: &str, dtype: DataType, elements: u16) -> Result<MessageRouterResponse> {
		let ioi = message_router::build_tag_ioi(tag_name, dtype);
		let request = message_router::add_read_ioi(&ioi, elements);
		self.transmit(&request)
	}

	/// Reads every tag in `tag_names`, batching as many `ReadTag` requests as fit into one
	/// `MultipleServicePacket` within `connectionSize` and recursing over the overflow (§4.10).
	pub fn multi_read_tag(&self, tag_names: &[&str]) -> Result<HashMap<String, MultiTagResult>> {
		self.ensure_open()?;

		let mut addresses = Vec::with_capacity(tag_names.len());
		let mut segments = Vec::with_capacity(tag_names.len());

		for &name in tag_names {
			let address = read::resolve_address(name);
			let dtype = self.discover_type(&address.parsed.base)?;
			let shape = read::request_shape(dtype, address.index, 1, address.is_bit_of_word);
			let ioi = message_router::build_tag_ioi(name, dtype);
			segments.push(message_router::add_read_ioi(&ioi, shape.words));
			addresses.push((name.to_string(), dtype, shape));
		}

		let capacity = {
			let state = self.state.lock().expect("session mutex poisoned");
			if state.connection_size > 0 { state.connection_size as usize } else { session::SMALL_CONNECTION_SIZE as usize }
		};

		let fit = read::fitting_prefix_len(&segments, capacity, |s| message_router::build_multi_service_packet(s).len());

		let packet = message_router::build_multi_service_packet(&segments[..fit]);
		let (envelope, body) = self.transmit_raw(&packet)?;
		if !envelope.is_success_or_partial() {
			return Err(CipError::CipStatus {
				status: envelope.status,
				message: status::cip_status_message(envelope.status),
				ext_status: envelope.ext_status,
			});
		}

		let mut out = HashMap::new();
		let replies = split_multi_service_reply(&body, fit)?;

		for ((name, dtype, shape), reply) in addresses[..fit].iter().zip(replies) {
			let parsed = message_router::parse_response(reply, false)?;
			let bit_slice = shape.bit_count.map(|bc| (read::resolve_address(name).index % bc, 1));
			let mut result = read::classify_multi_entry(&parsed, 1, bit_slice);
			if result.dtype == DataType::Null {
				result.dtype = *dtype;
			}
			out.insert(name.clone(), result);
		}

		if fit < tag_names.len() {
			let overflow: Vec<&str> = tag_names[fit..].to_vec();
			let rest = self.multi_read_tag(&overflow)?;
			out.extend(rest);
		}

		Ok(out)
	}

	/// Issues `GetAttributeAll` against class `0x01` / instance `0x01` (§4.11). Normally called
	/// once, automatically, by `register_session`; exposed directly for re-polling fault state.
	pub fn read_attribute_all(&self) -> Result<PlcInfo> {
		let target_path = self.state.lock().expect("session mutex poisoned").target_path.clone();
		self.read_attribute_all_via(&target_path)
	}

	fn read_attribute_all_via(&self, target_path: &[u8]) -> Result<PlcInfo> {
		let request = message_router::build_get_attribute_all(0x01, 0x01);
		let item = self.send_unconnected_item(target_path, &request)?;
		identity::parse(&item)
	}

	/// The identity snapshot captured by the most recent `register_session`/`read_attribute_all`.
	pub fn info(&self) -> Option<PlcInfo> {
		self.state.lock().expect("session mutex poisoned").info.clone()
	}

	/// Idempotent: unregisters the session (best effort) and fires every pending sink.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let _ = self.unregister_session();
		self.correlator.close_all();
	}

	/// Picks connected (`SendUnitData`) vs unconnected (`SendRRData`+`UnconnectedSend`) transport
	/// by lifecycle (§4.8's invariant) and decodes the Message Router reply.
	fn transmit(&self, message_request: &[u8]) -> Result<MessageRouterResponse> {
		self.ensure_open()?;

		let (lifecycle, session_id, connection_id, router_path, sequence) = {
			let mut state = self.state.lock().expect("session mutex poisoned");
			let sequence = if state.lifecycle == Lifecycle::ForwardOpened { Some(state.next_sequence_id()) } else { None };
			(state.lifecycle, state.session_id, state.connection_id, state.target_path.clone(), sequence)
		};

		match lifecycle {
			Lifecycle::ForwardOpened => {
				let sequence = sequence.expect("ForwardOpened always assigns a sequence id");
				let response = self.send_connected_raw(connection_id, sequence, message_request)?;
				message_router::parse_response(&response, true)
			}
			Lifecycle::Registered => {
				let response = self.send_unconnected_raw(&router_path, message_request)?;
				let _ = session_id;
				Ok(response)
			}
			_ => Err(CipError::NotReady("a request was issued before register_session")),
		}
	}

	/// Dispatches `message_request` the same way `transmit` does, but stops at the reply envelope
	/// instead of assuming a trailing `DataType` — for services with their own payload shape
	/// (`MultipleServicePacket`'s count/offset table).
	fn transmit_raw(&self, message_request: &[u8]) -> Result<(message_router::ReplyEnvelope, Vec<u8>)> {
		self.ensure_open()?;

		let (lifecycle, connection_id, router_path, sequence) = {
			let mut state = self.state.lock().expect("session mutex poisoned");
			let sequence = if state.lifecycle == Lifecycle::ForwardOpened { Some(state.next_sequence_id()) } else { None };
			(state.lifecycle, state.connection_id, state.target_path.clone(), sequence)
		};

		match lifecycle {
			Lifecycle::ForwardOpened => {
				let sequence = sequence.expect("ForwardOpened always assigns a sequence id");
				let item = self.send_connected_raw(connection_id, sequence, message_request)?;
				message_router::split_reply_envelope(&item, true)
			}
			Lifecycle::Registered => {
				let item = self.send_unconnected_item(&router_path, message_request)?;
				message_router::split_reply_envelope(&item, false)
			}
			_ => Err(CipError::NotReady("a request was issued before register_session")),
		}
	}

	/// Returns the raw embedded data item's bytes (the whole CIP reply, starting at its service
	/// byte, unparsed) — the shape `GetAttributeAll`'s fixed-offset identity record needs.
	fn send_unconnected_item(&self, router_path: &[u8], message_request: &[u8]) -> Result<Vec<u8>> {
		let session_id = self.session_id();
		let body = build_send_rr_data(&message_router::build_unconnected_send(router_path, message_request));
		let reply = self.correlator.send(Command::SendRrData, session_id, None, &body, UNCONNECTED_TIMEOUT)?;

		if reply.data.len() < 6 {
			return Err(CipError::Decode("SendRRData reply shorter than its preamble".into()));
		}
		let items = cpf::parse(&reply.data[6..]).map_err(|_| CipError::Decode("malformed SendRRData reply CPF".into()))?;
		let data = items.get(1).ok_or_else(|| CipError::Decode("SendRRData reply missing the data item".into()))?;
		Ok(data.data.clone())
	}

	fn send_unconnected_raw(&self, router_path: &[u8], message_request: &[u8]) -> Result<MessageRouterResponse> {
		let item = self.send_unconnected_item(router_path, message_request)?;
		message_router::parse_response(&item, false)
	}

	/// Returns the embedded transport item's bytes (still carrying its leading 2-byte sequence,
	/// which `message_router::parse_response(.., true)` strips).
	fn send_connected_raw(&self, connection_id: u32, sequence: u16, message_request: &[u8]) -> Result<Vec<u8>> {
		if connection_id == 0 {
			return Err(CipError::NotReady("a connected request was issued before forward_open"));
		}

		let session_id = self.session_id();
		let body = build_send_unit_data(connection_id, sequence, message_request);
		let reply = self.correlator.send(Command::SendUnitData, session_id, Some(sequence), &body, CONNECTED_TIMEOUT)?;

		if reply.data.len() < 6 {
			return Err(CipError::Decode("SendUnitData reply shorter than its preamble".into()));
		}
		let items = cpf::parse(&reply.data[6..]).map_err(|_| CipError::Decode("malformed SendUnitData reply CPF".into()))?;
		let data = items.get(1).ok_or_else(|| CipError::Decode("SendUnitData reply missing the transport data item".into()))?;
		Ok(data.data.clone())
	}
}

/// Wraps an already-built CIP request behind `SendRRData`'s `{interfaceHandle, timeout, CPF}`
/// preamble and a two-item (Null + UnconnectedMessage) CPF list (§4.6).
fn build_send_rr_data(message_request: &[u8]) -> Vec<u8> {
	let items = cpf::build(&[CpfItem::new(CpfType::Null, Vec::new()), CpfItem::new(CpfType::UnconnectedMessage, message_request.to_vec())]);

	let mut body = Vec::with_capacity(6 + items.len());
	body.extend_from_slice(&0u32.to_le_bytes());
	body.extend_from_slice(&0u16.to_le_bytes());
	body.extend_from_slice(&items);
	body
}

/// Wraps an already-built CIP request behind `SendUnitData`'s preamble and a two-item
/// (ConnectionBased + ConnectedTransportPacket) CPF list, with the leading sequence number
/// folded into the transport packet item (§4.6, §4.9).
fn build_send_unit_data(connection_id: u32, sequence: u16, message_request: &[u8]) -> Vec<u8> {
	let mut transport_data = sequence.to_le_bytes().to_vec();
	transport_data.extend_from_slice(message_request);

	let items = cpf::build(&[
		CpfItem::new(CpfType::ConnectionBased, connection_id.to_le_bytes().to_vec()),
		CpfItem::new(CpfType::ConnectedTransportPacket, transport_data),
	]);

	let mut body = Vec::with_capacity(6 + items.len());
	body.extend_from_slice(&0u32.to_le_bytes());
	body.extend_from_slice(&0u16.to_le_bytes());
	body.extend_from_slice(&items);
	body
}

/// Splits a `MultipleServicePacket` reply body into each embedded service's raw bytes, using its
/// own offset table the same way the request side built one (§4.7).
fn split_multi_service_reply(data: &[u8], expected_count: usize) -> Result<Vec<&[u8]>> {
	if data.len() < 2 {
		return Err(CipError::Decode("multi-service reply shorter than its count field".into()));
	}

	let count = u16::from_le_bytes([data[0], data[1]]) as usize;
	if count != expected_count {
		log::warn!("multi-service reply advertised {count} entries, expected {expected_count}");
	}

	let mut offsets = Vec::with_capacity(count);
	for i in 0..count {
		let at = 2 + i * 2;
		if data.len() < at + 2 {
			return Err(CipError::Decode("multi-service reply truncated in its offset table".into()));
		}
		offsets.push(u16::from_le_bytes([data[at], data[at + 1]]) as usize);
	}

	let mut out = Vec::with_capacity(count);
	for i in 0..count {
		let start = offsets[i];
		let end = offsets.get(i + 1).copied().unwrap_or(data.len());
		if start > data.len() || end > data.len() || start > end {
			return Err(CipError::Decode("multi-service reply offset out of range".into()));
		}
		out.push(&data[start..end]);
	}

	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn send_rr_data_preamble_is_six_bytes_of_zero() {
		let body = build_send_rr_data(&[0xAA]);
		assert_eq!(&body[..6], &[0u8; 6]);
	}

	#[test]
	fn send_unit_data_folds_sequence_into_transport_item() {
		let body = build_send_unit_data(0x1234_5678, 7, &[0xAA, 0xBB]);
		let items = cpf::parse(&body[6..]).unwrap();
		assert_eq!(items[0].data, 0x1234_5678u32.to_le_bytes());
		assert_eq!(&items[1].data[..2], &7u16.to_le_bytes());
		assert_eq!(&items[1].data[2..], &[0xAA, 0xBB]);
	}

	#[test]
	fn split_multi_service_reply_uses_its_own_offsets() {
		let packet = message_router::build_multi_service_packet(&[vec![1, 2, 3], vec![4, 5]]);
		// Re-derive a "reply" shaped the same way: count + offsets + payload.
		let replies = split_multi_service_reply(&packet[6..], 2).unwrap();
		assert_eq!(replies[0], &[1, 2, 3]);
		assert_eq!(replies[1], &[4, 5]);
	}
}
