//! The 24-byte ENIP encapsulation header (§3, §4.6) and the framing logic built on top of it.
//! Ported from `original_source`'s `enip.Header`/`enip.Package` and `PLC.readBytes`/`readPackage`.

use std::io::{self, Read};

use collections::bytes::{Cursor, Slice};
use macros::Cast;
use utils::bytes::Cast as _;
use utils::endian::{U16Le, U32Le, U64Le};

use crate::error::{CipError, Result};

pub const HEADER_LEN: usize = 24;

/// The fixed 24-byte header that precedes every ENIP packet. `#[repr(packed)]` so the in-memory
/// layout matches the wire layout byte for byte with no alignment padding, the same way
/// `binary.Write` serialises the Go struct field by field.
#[derive(Clone, Copy, Default, Cast)]
#[repr(packed)]
pub struct EncapsulationHeader {
	pub command: U16Le,
	pub length: U16Le,
	pub session_id: U32Le,
	pub status: U32Le,
	pub context_id: U64Le,
	pub options: U32Le,
}

impl core::fmt::Debug for EncapsulationHeader {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		let (command, length, session_id, status, context_id, options) =
			(self.command, self.length, self.session_id, self.status, self.context_id, self.options);
		f.debug_struct("EncapsulationHeader")
			.field("command", &command.get())
			.field("length", &length.get())
			.field("session_id", &session_id.get())
			.field("status", &status.get())
			.field("context_id", &context_id.get())
			.field("options", &options.get())
			.finish()
	}
}

/// The ENIP encapsulation command set (§4.6). Supplemented with `ListServices`/`ListIdentity`
/// and friends from `original_source`'s `enip/consts.go`, kept as named constants even though
/// this client's read-only path only ever builds `RegisterSession`/`UnregisterSession`/
/// `SendRrData`/`SendUnitData` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Command {
	Nop,
	ListServices,
	ListIdentity,
	ListInterfaces,
	RegisterSession,
	UnregisterSession,
	SendRrData,
	SendUnitData,
	IndicateStatus,
	Cancel,
	Other(u16),
}

impl Command {
	pub fn from_code(code: u16) -> Self {
		match code {
			0x0000 => Self::Nop,
			0x0004 => Self::ListServices,
			0x0063 => Self::ListIdentity,
			0x0064 => Self::ListInterfaces,
			0x0065 => Self::RegisterSession,
			0x0066 => Self::UnregisterSession,
			0x006F => Self::SendRrData,
			0x0070 => Self::SendUnitData,
			0x0072 => Self::IndicateStatus,
			0x0073 => Self::Cancel,
			other => Self::Other(other),
		}
	}

	pub fn code(self) -> u16 {
		match self {
			Self::Nop => 0x0000,
			Self::ListServices => 0x0004,
			Self::ListIdentity => 0x0063,
			Self::ListInterfaces => 0x0064,
			Self::RegisterSession => 0x0065,
			Self::UnregisterSession => 0x0066,
			Self::SendRrData => 0x006F,
			Self::SendUnitData => 0x0070,
			Self::IndicateStatus => 0x0072,
			Self::Cancel => 0x0073,
			Self::Other(code) => code,
		}
	}
}

/// A decoded ENIP packet: the header plus the raw command-specific body.
#[derive(Debug, Clone)]
pub struct Frame {
	pub command: Command,
	pub session_id: u32,
	pub status: u32,
	pub context_id: u64,
	pub options: u32,
	pub data: Vec<u8>,
}

/// Serialises a request frame: header followed by `data` verbatim.
pub fn build_frame(command: Command, session_id: u32, context_id: u64, data: &[u8]) -> Vec<u8> {
	let header = EncapsulationHeader {
		command: command.code().into(),
		length: (data.len() as u16).into(),
		session_id: session_id.into(),
		status: 0u32.into(),
		context_id: context_id.into(),
		options: 0u32.into(),
	};

	let mut cursor = Cursor::new();
	cursor.push(&header);
	cursor.push_bytes(data);
	cursor.into_vec()
}

/// Reads exactly `buf.len()` bytes, retrying short reads, matching the original's `readBytes`
/// (which gives up after 100 short reads rather than looping forever against a stalled peer).
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<()> {
	let mut filled = 0;
	let mut retries = 0;

	while filled < buf.len() {
		retries += 1;
		if retries > 100 {
			return Err(CipError::Decode(format!("expected to read {} bytes, but only read {filled}", buf.len())));
		}

		let n = reader.read(&mut buf[filled..]).map_err(CipError::Transport)?;
		if n == 0 {
			return Err(CipError::Transport(io::Error::from(io::ErrorKind::UnexpectedEof)));
		}
		filled += n;
	}

	Ok(())
}

/// Reads one full ENIP frame (header plus body) off `reader`.
pub fn read_frame(reader: &mut impl Read) -> Result<Frame> {
	let mut header_bytes = [0u8; HEADER_LEN];
	read_full(reader, &mut header_bytes)?;

	let mut slice = Slice::new(&header_bytes);
	let header: &EncapsulationHeader = slice
		.split()
		.map_err(|_| CipError::Decode("truncated encapsulation header".into()))?;

	let (command, length, session_id, status, context_id, options) =
		(header.command, header.length, header.session_id, header.status, header.context_id, header.options);

	let mut data = vec![0u8; length.get() as usize];
	if !data.is_empty() {
		read_full(reader, &mut data)?;
	}

	Ok(Frame {
		command: Command::from_code(command.get()),
		session_id: session_id.get(),
		status: status.get(),
		context_id: context_id.get(),
		options: options.get(),
		data,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_round_trips_through_build_and_read() {
		let frame = build_frame(Command::RegisterSession, 0, 0xdead_beef_cafe_f00d, &[0x01, 0x00, 0x00, 0x00]);
		assert_eq!(frame.len(), HEADER_LEN + 4);

		let mut cursor = io::Cursor::new(frame);
		let parsed = read_frame(&mut cursor).unwrap();
		assert_eq!(parsed.command, Command::RegisterSession);
		assert_eq!(parsed.context_id, 0xdead_beef_cafe_f00d);
		assert_eq!(parsed.data, vec![0x01, 0x00, 0x00, 0x00]);
	}

	#[test]
	fn header_is_exactly_24_bytes_with_no_padding() {
		assert_eq!(core::mem::size_of::<EncapsulationHeader>(), HEADER_LEN);
	}

	#[test]
	fn zero_length_frame_has_empty_body() {
		let frame = build_frame(Command::UnregisterSession, 7, 1, &[]);
		let mut cursor = io::Cursor::new(frame);
		let parsed = read_frame(&mut cursor).unwrap();
		assert!(parsed.data.is_empty());
		assert_eq!(parsed.session_id, 7);
	}

	#[test]
	fn unknown_command_code_round_trips_as_other() {
		assert_eq!(Command::from_code(0x9999), Command::Other(0x9999));
		assert_eq!(Command::Other(0x9999).code(), 0x9999);
	}
}
