use std::io;

use thiserror::Error;

/// Errors surfaced at the public API boundary.
///
/// Internal plumbing (socket I/O, framing) still uses the teacher's bare `utils::error::Result`
/// convention of logging at the failure site and bubbling a unit error; this is the richer type
/// those unit errors get translated into once they reach a caller-visible return.
#[derive(Debug, Error)]
pub enum CipError {
	/// The underlying byte stream failed, or the connection was torn down while a request was
	/// in flight.
	#[error("transport error: {0}")]
	Transport(#[from] io::Error),

	/// The connection closed (by us, by the peer, or after a timeout) while this request was
	/// outstanding.
	#[error("connection closed")]
	ConnectionClosed,

	/// A reply frame carried a non-success ENIP encapsulation status.
	#[error("encapsulation status {status:#06x}: {message}")]
	Encapsulation { status: u32, message: &'static str },

	/// A CIP service reply carried a non-success status (other than partial transfer).
	#[error("CIP status {status:#04x} ({message}), extended status {ext_status:02x?}")]
	CipStatus {
		status: u8,
		message: &'static str,
		ext_status: Vec<u8>,
	},

	/// The reply could not be decoded into the expected shape (unknown DataType, truncated
	/// value, malformed STRUCT envelope, tag name that doesn't parse).
	#[error("decode error: {0}")]
	Decode(String),

	/// No reply arrived within the request's timeout. The connection is torn down as a side
	/// effect (see the module docs on why this is a deliberately strict policy).
	#[error("request timed out")]
	Timeout,

	/// The call was rejected before anything was sent on the wire (e.g. a connected read issued
	/// before `forward_open`, or any call issued after `close`).
	#[error("precondition failed: {0}")]
	NotReady(&'static str),
}

pub type Result<T> = std::result::Result<T, CipError>;
