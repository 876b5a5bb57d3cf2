//! End-to-end exercise against a scripted mock PLC over a loopback Unix socket: register,
//! unconnected ReadTag/MultiReadTag, ForwardOpen large→small fallback, a connected ReadTag, and
//! a clean close. The mock server only speaks the shapes this client actually sends — it does
//! not validate every byte of the request, just enough to echo the right context/sequence id
//! back so the correlator routes the reply to the right caller.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use cip::codec::cpf::{self, CpfItem, CpfType};
use cip::codec::header::{self, Command};
use cip::types::{DataType, Value};
use cip::PlcConfig;

const SESSION_ID: u32 = 0x1111_2222;
const CONNECTION_ID: u32 = 0xCAFE_BABE;

fn mr_reply(service: u8, status: u8, dtype: u16, data: &[u8]) -> Vec<u8> {
	let mut out = vec![service, 0, status, 0];
	if status == 0 || status == 6 {
		out.extend_from_slice(&dtype.to_le_bytes());
		out.extend_from_slice(data);
	}
	out
}

fn identity_reply(serial: u32, name: &str) -> Vec<u8> {
	let mut out = vec![0x81, 0, 0, 0];
	out.extend_from_slice(&[0, 0, 0, 0, 0, 0]); // vendorID, deviceType, productCode
	out.push(20); // major
	out.push(5); // minor
	out.extend_from_slice(&0u16.to_le_bytes()); // status
	out.extend_from_slice(&serial.to_le_bytes());
	out.push(name.len() as u8);
	out.extend_from_slice(name.as_bytes());
	out
}

fn multi_service_reply(entries: &[Vec<u8>]) -> Vec<u8> {
	let mut out = vec![0x8A, 0, 0, 0];
	out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
	let mut offset = 2 + entries.len() * 2;
	let mut offsets = Vec::new();
	for e in entries {
		offsets.push(offset as u16);
		offset += e.len();
	}
	for o in &offsets {
		out.extend_from_slice(&o.to_le_bytes());
	}
	for e in entries {
		out.extend_from_slice(e);
	}
	out
}

fn wrap_unconnected(mr: &[u8]) -> Vec<u8> {
	let items = cpf::build(&[CpfItem::new(CpfType::Null, Vec::new()), CpfItem::new(CpfType::UnconnectedMessage, mr.to_vec())]);
	let mut body = vec![0u8; 6];
	body.extend_from_slice(&items);
	body
}

fn wrap_connected(sequence: u16, mr: &[u8]) -> Vec<u8> {
	let mut transport = sequence.to_le_bytes().to_vec();
	transport.extend_from_slice(mr);
	let items = cpf::build(&[
		CpfItem::new(CpfType::ConnectionBased, CONNECTION_ID.to_le_bytes().to_vec()),
		CpfItem::new(CpfType::ConnectedTransportPacket, transport),
	]);
	let mut body = vec![0u8; 6];
	body.extend_from_slice(&items);
	body
}

/// Drives the scripted request/reply sequence this test's client calls produce, in order.
fn run_mock_server(mut stream: UnixStream) {
	let step = AtomicUsize::new(0);
	loop {
		let frame = match header::read_frame(&mut stream) {
			Ok(frame) => frame,
			Err(_) => return,
		};

		match frame.command {
			Command::RegisterSession => {
				let reply = header::build_frame(Command::RegisterSession, SESSION_ID, frame.context_id, &[0x01, 0x00, 0x00, 0x00]);
				stream.write_all(&reply).unwrap();
			}
			Command::UnregisterSession => {
				let reply = header::build_frame(Command::UnregisterSession, SESSION_ID, frame.context_id, &[]);
				stream.write_all(&reply).unwrap();
				return;
			}
			Command::SendRrData => {
				let n = step.fetch_add(1, Ordering::SeqCst);
				let mr = match n {
					0 => identity_reply(0x4242, "TESTPLC"),
					1 => mr_reply(0xD2, 0, DataType::Real.code(), &0.0f32.to_le_bytes()),
					2 => {
						let mut data = Vec::new();
						for v in [1.5f32, 2.5, 3.5] {
							data.extend_from_slice(&v.to_le_bytes());
						}
						mr_reply(0xCC, 0, DataType::Real.code(), &data)
					}
					3 => mr_reply(0xD2, 0, DataType::Dint.code(), &0i32.to_le_bytes()),
					4 => mr_reply(0xD2, 0, DataType::Dint.code(), &0i32.to_le_bytes()),
					5 => {
						let entry_a = mr_reply(0xCC, 0, DataType::Dint.code(), &7i32.to_le_bytes());
						let entry_b = mr_reply(0xCC, 0, DataType::Dint.code(), &9i32.to_le_bytes());
						multi_service_reply(&[entry_a, entry_b])
					}
					6 => mr_reply(0xDB, 0x01, 0, &[]),
					7 => {
						// A real ForwardOpen reply has no DataType field after its envelope —
						// the O->T connection id sits right at the start of the service data.
						let mut out = vec![0xD4, 0, 0, 0];
						out.extend_from_slice(&CONNECTION_ID.to_le_bytes());
						out.extend_from_slice(&[0u8; 20]);
						out
					}
					other => panic!("unexpected unconnected request #{other}"),
				};
				let reply = header::build_frame(Command::SendRrData, SESSION_ID, frame.context_id, &wrap_unconnected(&mr));
				stream.write_all(&reply).unwrap();
			}
			Command::SendUnitData => {
				let items = cpf::parse(&frame.data[6..]).unwrap();
				let transport = &items[1].data;
				let sequence = u16::from_le_bytes([transport[0], transport[1]]);

				let n = step.fetch_add(1, Ordering::SeqCst);
				let mr = match n {
					8 => mr_reply(0xD2, 0, DataType::Dint.code(), &0i32.to_le_bytes()),
					9 => mr_reply(0xCC, 0, DataType::Dint.code(), &99i32.to_le_bytes()),
					other => panic!("unexpected connected request #{other}"),
				};
				let reply = header::build_frame(Command::SendUnitData, SESSION_ID, frame.context_id, &wrap_connected(sequence, &mr));
				stream.write_all(&reply).unwrap();
			}
			other => panic!("unexpected command {other:?}"),
		}
	}
}

#[test]
fn full_session_round_trip() {
	let (client, server) = UnixStream::pair().expect("socketpair");

	let server_handle = thread::spawn(move || run_mock_server(server));

	let (on_close_tx, on_close_rx) = mpsc::channel::<()>();
	let config = PlcConfig {
		on_close: Some(Box::new(move || {
			let _ = on_close_tx.send(());
		})),
		..PlcConfig::default()
	};

	let reader = client.try_clone().expect("clone for reader half");
	let plc = cip::Plc::connect(reader, client, config);

	plc.register_session().expect("register_session");
	let info = plc.info().expect("identity read during register_session");
	assert_eq!(info.serial_number, 0x4242);
	assert_eq!(info.name, "TESTPLC");
	assert_eq!(info.version, "20.5");

	let (dtype, values) = plc.read_tag("P_REAL", 3).expect("read_tag");
	assert_eq!(dtype, DataType::Real);
	assert_eq!(values.0, vec![Value::Real(1.5), Value::Real(2.5), Value::Real(3.5)]);

	let multi = plc.multi_read_tag(&["TagA", "TagB"]).expect("multi_read_tag");
	assert_eq!(multi["TagA"].values.0, vec![Value::Dint(7)]);
	assert_eq!(multi["TagB"].values.0, vec![Value::Dint(9)]);

	plc.forward_open().expect("forward_open falls back to the small connection size");

	let (dtype, values) = plc.read_tag("P_REAL2", 1).expect("connected read_tag");
	assert_eq!(dtype, DataType::Dint);
	assert_eq!(values.0, vec![Value::Dint(99)]);

	plc.close();
	on_close_rx.recv_timeout(Duration::from_secs(5)).expect("on_close should fire after close()");

	server_handle.join().expect("mock server thread should not panic");
}
