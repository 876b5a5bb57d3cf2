//! Request/response correlation (§4.9). One writer mutex serializes outbound frames; one reader
//! thread owns the read half of the socket and demultiplexes replies to the matching one-shot
//! sink, keyed by `ContextId` (unconnected) or sequence id (connected). Realises the
//! "mutex-guarded state object" alternative named in the source's own design notes, rather than
//! an actor — see `original_source`'s `PLC.writePack`/`PLC.recvData`/`PLC.accept` for the
//! reference behaviour this generalises.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use collections::sparse::ring::Ring;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::cpf::{self, CpfType};
use crate::codec::header::{self, Command, Frame};
use crate::error::{CipError, Result};
use crate::status;

const SEQUENCE_SLOTS: usize = 65536;

type ReplySender = SyncSender<Result<Frame>>;

/// The writer half of a PLC connection: ordinary byte writing, plus the ability to tear the
/// whole connection down from another thread. A timed-out request (§4.9) shuts the transport
/// down rather than merely forgetting its own sink, so the reader thread's blocking read
/// unblocks, drives the same `close_all`/`on_close` path a clean `close()` would, and no stale
/// sequence slot can be handed to a new request before a late reply for it arrives.
pub trait Transport: Write + Send {
	fn shutdown(&self) -> io::Result<()>;
}

impl Transport for std::net::TcpStream {
	fn shutdown(&self) -> io::Result<()> {
		std::net::TcpStream::shutdown(self, std::net::Shutdown::Both)
	}
}

impl Transport for std::os::unix::net::UnixStream {
	fn shutdown(&self) -> io::Result<()> {
		std::os::unix::net::UnixStream::shutdown(self, std::net::Shutdown::Both)
	}
}

#[cfg(test)]
impl Transport for Vec<u8> {
	fn shutdown(&self) -> io::Result<()> {
		Ok(())
	}
}

#[derive(Default)]
struct PendingTables {
	context: HashMap<u64, ReplySender>,
	sequence: Ring<ReplySender, SEQUENCE_SLOTS>,
}

/// Owns the socket's write half and the pending-request tables; shared between the calling
/// threads (which send through it) and the reader thread (which dispatches through it).
pub struct Correlator {
	writer: Mutex<Box<dyn Transport>>,
	pending: Mutex<PendingTables>,
	rng: Mutex<StdRng>,
}

impl Correlator {
	pub fn new(writer: Box<dyn Transport>) -> Arc<Self> {
		Arc::new(Self {
			writer: Mutex::new(writer),
			pending: Mutex::new(PendingTables::default()),
			rng: Mutex::new(StdRng::from_entropy()),
		})
	}

	/// Spawns the dedicated reader thread over `reader`. `on_close` fires once, after the socket
	/// drops and every pending sink has been failed with `ConnectionClosed`.
	pub fn spawn_reader<R: Read + Send + 'static>(self: &Arc<Self>, mut reader: R, on_close: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
		let this = Arc::clone(self);
		thread::spawn(move || {
			loop {
				match header::read_frame(&mut reader) {
					Ok(frame) => this.dispatch(frame),
					Err(err) => {
						log::warn!("reader thread stopping: {err}");
						break;
					}
				}
			}
			this.close_all();
			on_close();
		})
	}

	fn next_context_id(&self) -> u64 {
		self.rng.lock().expect("rng mutex poisoned").gen()
	}

	/// Draws a random `u16` off the same entropy source as `ContextId` generation — used for a
	/// ForwardOpen's per-attempt `serialId` (§9: one RNG per `Plc`, seeded once at connect time,
	/// not kept as a second source on the session).
	pub fn random_u16(&self) -> u16 {
		self.rng.lock().expect("rng mutex poisoned").gen()
	}

	/// Sends `body` as `command`'s payload and blocks for the matching reply frame (or
	/// `timeout`).
	///
	/// `sequence` selects the correlation key: `Some(seq)` registers in the sequence table
	/// (connected, `SendUnitData`); `None` registers in the context table keyed by a freshly
	/// drawn `ContextId` (unconnected, everything else).
	pub fn send(&self, command: Command, session_id: u32, sequence: Option<u16>, body: &[u8], timeout: Duration) -> Result<Frame> {
		let context_id = self.next_context_id();
		let (tx, rx): (ReplySender, Receiver<Result<Frame>>) = mpsc::sync_channel(1);

		{
			let mut pending = self.pending.lock().expect("pending mutex poisoned");
			match sequence {
				Some(seq) => {
					pending.sequence.insert(seq as usize, tx);
				}
				None => {
					pending.context.insert(context_id, tx);
				}
			}
		}

		let frame = header::build_frame(command, session_id, context_id, body);

		let write_result = {
			let mut writer = self.writer.lock().expect("writer mutex poisoned");
			writer.write_all(&frame)
		};

		if let Err(err) = write_result {
			self.forget(sequence, context_id);
			return Err(CipError::Transport(err));
		}

		match rx.recv_timeout(timeout) {
			Ok(result) => result,
			Err(_) => {
				self.forget(sequence, context_id);
				self.teardown_after_timeout();
				Err(CipError::Timeout)
			}
		}
	}

	/// Fails every other pending sink and shuts the transport down so the reader thread unblocks
	/// and runs its own `close_all`/`on_close` path (§4.9, §5, §8 scenario 6, §9's "close the
	/// connection on timeout" mitigation).
	fn teardown_after_timeout(&self) {
		self.close_all();
		let writer = self.writer.lock().expect("writer mutex poisoned");
		if let Err(err) = writer.shutdown() {
			log::warn!("failed to shut down transport after a timed-out request: {err}");
		}
	}

	fn forget(&self, sequence: Option<u16>, context_id: u64) {
		let mut pending = self.pending.lock().expect("pending mutex poisoned");
		match sequence {
			Some(seq) => {
				pending.sequence.remove(seq as usize);
			}
			None => {
				pending.context.remove(&context_id);
			}
		}
	}

	/// Fires every outstanding sink with `ConnectionClosed` and clears both tables.
	pub fn close_all(&self) {
		let mut pending = self.pending.lock().expect("pending mutex poisoned");
		for tx in pending.context.drain().map(|(_, tx)| tx).collect::<Vec<_>>() {
			let _ = tx.send(Err(CipError::ConnectionClosed));
		}
		for tx in pending.sequence.drain().collect::<Vec<_>>() {
			let _ = tx.send(Err(CipError::ConnectionClosed));
		}
	}

	fn dispatch(&self, frame: Frame) {
		if frame.status != 0 {
			self.dispatch_failure(frame);
			return;
		}

		match frame.command {
			Command::SendUnitData => self.dispatch_connected(frame),
			_ => self.dispatch_unconnected(frame),
		}
	}

	/// §9's resolved open question: a non-success encapsulation status is routed to the sink
	/// matching the frame's `ContextId` when one exists (unconnected path only — a failed
	/// connected reply can't be trusted to carry a well-formed sequence number), firing
	/// `CipError::Encapsulation` instead of leaving the caller to time out.
	fn dispatch_failure(&self, frame: Frame) {
		let message = status::encapsulation_status_message(frame.status);
		let mut pending = self.pending.lock().expect("pending mutex poisoned");
		if let Some(tx) = pending.context.remove(&frame.context_id) {
			let _ = tx.send(Err(CipError::Encapsulation { status: frame.status, message }));
		} else {
			log::warn!("dropping frame with unmatched context id and encapsulation status {:#06x}: {message}", frame.status);
		}
	}

	/// Routes every non-`SendUnitData` reply (`RegisterSession`, `UnregisterSession`,
	/// `SendRRData`) by its `ContextId`. Command-specific body parsing (RegisterSession's
	/// `{version, flags}`, SendRRData's `{interfaceHandle, timeout, CPF}`) is left to the caller
	/// — the correlator only needs to know who to wake up.
	fn dispatch_unconnected(&self, frame: Frame) {
		let mut pending = self.pending.lock().expect("pending mutex poisoned");
		let Some(tx) = pending.context.remove(&frame.context_id) else {
			log::debug!("dropping unconnected reply with no matching pending request");
			return;
		};
		drop(pending);

		let _ = tx.send(Ok(frame));
	}

	/// Routes a `SendUnitData` reply by the sequence id folded into its `ConnectedTransportPacket`
	/// CPF item (§4.9). The whole frame is still handed back to the caller so it can reparse the
	/// CPF and extract the embedded Message Router reply itself.
	fn dispatch_connected(&self, frame: Frame) {
		if frame.data.len() < 6 {
			log::warn!("dropping undersized SendUnitData reply");
			return;
		}

		let items = match cpf::parse(&frame.data[6..]) {
			Ok(items) => items,
			Err(err) => {
				log::warn!("dropping unparseable SendUnitData reply: {err}");
				return;
			}
		};

		if items.len() < 2 || items[1].type_id != CpfType::ConnectedTransportPacket || items[1].data.len() < 2 {
			log::warn!("dropping SendUnitData reply with no connected transport data item");
			return;
		}

		let sequence = u16::from_le_bytes([items[1].data[0], items[1].data[1]]) as usize;

		let mut pending = self.pending.lock().expect("pending mutex poisoned");
		let Some(tx) = pending.sequence.remove(sequence) else {
			log::debug!("dropping connected reply for sequence id {sequence} with no pending request");
			return;
		};
		drop(pending);

		let _ = tx.send(Ok(frame));
	}
}
