//! Common Packet Format item list (§4.5): `Count` followed by `{TypeID, Length, Data}` items.
//! Ported from `original_source`'s `enip.BuildCPF`/`enip.ParserCPF`.

use collections::bytes::{Cursor, Slice};

use crate::error::{CipError, Result};

/// CPF item type IDs (§4.5, §4.6). Supplemented with the socket-info and sequenced-address IDs
/// from `original_source`'s `enip/consts.go`; this client only ever builds/parses `Null`,
/// `ConnectionBased`, `UnconnectedMessage`, and `ConnectedTransportPacket` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CpfType {
	Null,
	ListIdentity,
	ConnectionBased,
	ConnectedTransportPacket,
	UnconnectedMessage,
	ListServices,
	SockInfoO2T,
	SockInfoT2O,
	SequencedAddrItem,
	Other(u16),
}

impl CpfType {
	pub fn from_code(code: u16) -> Self {
		match code {
			0x0000 => Self::Null,
			0x000c => Self::ListIdentity,
			0x00a1 => Self::ConnectionBased,
			0x00b1 => Self::ConnectedTransportPacket,
			0x00b2 => Self::UnconnectedMessage,
			0x0100 => Self::ListServices,
			0x8000 => Self::SockInfoO2T,
			0x8001 => Self::SockInfoT2O,
			0x8002 => Self::SequencedAddrItem,
			other => Self::Other(other),
		}
	}

	pub fn code(self) -> u16 {
		match self {
			Self::Null => 0x0000,
			Self::ListIdentity => 0x000c,
			Self::ConnectionBased => 0x00a1,
			Self::ConnectedTransportPacket => 0x00b1,
			Self::UnconnectedMessage => 0x00b2,
			Self::ListServices => 0x0100,
			Self::SockInfoO2T => 0x8000,
			Self::SockInfoT2O => 0x8001,
			Self::SequencedAddrItem => 0x8002,
			Self::Other(code) => code,
		}
	}
}

#[derive(Debug, Clone)]
pub struct CpfItem {
	pub type_id: CpfType,
	pub data: Vec<u8>,
}

impl CpfItem {
	pub fn new(type_id: CpfType, data: Vec<u8>) -> Self {
		Self { type_id, data }
	}
}

/// Serialises `items` as a CPF item list: a `u16` count followed by each item's
/// `{TypeID: u16, Length: u16, Data}`.
pub fn build(items: &[CpfItem]) -> Vec<u8> {
	let mut cursor = Cursor::new();
	cursor.push(&(items.len() as u16).to_le_bytes());

	for item in items {
		cursor.push(&item.type_id.code().to_le_bytes());
		cursor.push(&(item.data.len() as u16).to_le_bytes());
		cursor.push_bytes(&item.data);
	}

	cursor.into_vec()
}

/// Parses a CPF item list out of `buf`.
pub fn parse(buf: &[u8]) -> Result<Vec<CpfItem>> {
	let mut slice = Slice::new(buf);
	let count_bytes = slice.split_bytes(2).map_err(|_| CipError::Decode("truncated CPF item count".into()))?;
	let count = u16::from_le_bytes(count_bytes.try_into().unwrap());

	let mut items = Vec::with_capacity(count as usize);
	for _ in 0..count {
		let type_bytes = slice.split_bytes(2).map_err(|_| CipError::Decode("truncated CPF item type".into()))?;
		let len_bytes = slice.split_bytes(2).map_err(|_| CipError::Decode("truncated CPF item length".into()))?;
		let len = u16::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
		let data = slice
			.split_bytes(len)
			.map_err(|_| CipError::Decode("truncated CPF item data".into()))?
			.to_vec();

		items.push(CpfItem::new(CpfType::from_code(u16::from_le_bytes(type_bytes.try_into().unwrap())), data));
	}

	Ok(items)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_two_items() {
		let items = vec![
			CpfItem::new(CpfType::Null, vec![]),
			CpfItem::new(CpfType::UnconnectedMessage, vec![0xde, 0xad, 0xbe, 0xef]),
		];
		let bytes = build(&items);
		let parsed = parse(&bytes).unwrap();

		assert_eq!(parsed.len(), 2);
		assert_eq!(parsed[0].type_id, CpfType::Null);
		assert!(parsed[0].data.is_empty());
		assert_eq!(parsed[1].type_id, CpfType::UnconnectedMessage);
		assert_eq!(parsed[1].data, vec![0xde, 0xad, 0xbe, 0xef]);
	}

	#[test]
	fn truncated_item_count_is_a_decode_error() {
		assert!(parse(&[0x01]).is_err());
	}

	#[test]
	fn truncated_item_data_is_a_decode_error() {
		let mut bytes = build(&[CpfItem::new(CpfType::Null, vec![1, 2, 3, 4])]);
		bytes.truncate(bytes.len() - 2);
		assert!(parse(&bytes).is_err());
	}
}
