//! Scripted MySQL server for end-to-end tests.
//!
//! Runs on a plain std thread and answers just enough of the protocol for a
//! client to log in with mysql_native_password, prepare `SELECT ? AS x` and
//! execute it with one integer parameter.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use sqlwire_mysql::auth::mysql_native_password;
use sqlwire_mysql::protocol::{PacketAssembler, PrepareOk, capabilities, frame_payload};
use sqlwire_mysql::{ColumnDef, FieldType, MySqlConfig};

pub const PASSWORD: &str = "secret";
const SCRAMBLE: [u8; 20] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20,
];

pub struct MockServer {
    pub port: u16,
    handle: JoinHandle<Vec<u8>>,
}

impl MockServer {
    /// Accept one client and serve it until it disconnects or quits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve(stream)
        });
        Self { port, handle }
    }

    pub fn config(&self) -> MySqlConfig {
        MySqlConfig::new()
            .host("127.0.0.1")
            .port(self.port)
            .user("app")
            .password(PASSWORD)
    }

    /// Wait for the session to end; returns the command bytes seen.
    pub fn finish(self) -> Vec<u8> {
        self.handle.join().unwrap()
    }
}

struct Session {
    stream: TcpStream,
    assembler: PacketAssembler,
    buf: Vec<u8>,
}

impl Session {
    fn read_packet(&mut self) -> Option<(u8, Vec<u8>)> {
        loop {
            if let Some(p) = self.assembler.next_packet().unwrap() {
                return Some((p.sequence_id, p.payload));
            }
            let n = self.stream.read(&mut self.buf).ok()?;
            if n == 0 {
                return None;
            }
            self.assembler.feed(&self.buf[..n]);
        }
    }

    fn send(&mut self, packets: &[Vec<u8>], first_seq: u8) {
        let mut out = Vec::new();
        let mut seq = first_seq;
        for payload in packets {
            let (bytes, next) = frame_payload(payload, seq);
            out.extend(bytes);
            seq = next;
        }
        self.stream.write_all(&out).unwrap();
    }
}

fn serve(stream: TcpStream) -> Vec<u8> {
    let mut session = Session {
        stream,
        assembler: PacketAssembler::new(),
        buf: vec![0; 4096],
    };
    let mut commands = Vec::new();

    session.send(&[greeting()], 0);
    let Some((seq, login)) = session.read_packet() else {
        return commands;
    };
    assert_eq!(seq, 1);
    let expected = mysql_native_password(PASSWORD, &SCRAMBLE);
    if !login_carries(&login, &expected) {
        session.send(&[err(1045, "28000", "Access denied for user 'app'")], 2);
        return commands;
    }
    session.send(&[ok()], 2);

    let mut next_id = 1u32;
    while let Some((_, payload)) = session.read_packet() {
        let Some(&command) = payload.first() else {
            break;
        };
        commands.push(command);
        match command {
            // COM_STMT_PREPARE
            0x16 => {
                let prepare_ok = PrepareOk {
                    statement_id: next_id,
                    num_columns: 1,
                    num_params: 1,
                    warnings: 0,
                };
                next_id += 1;
                session.send(
                    &[
                        prepare_ok.to_bytes(),
                        ColumnDef::new("?", FieldType::LongLong).to_bytes(),
                        eof(),
                        ColumnDef::new("x", FieldType::LongLong).to_bytes(),
                        eof(),
                    ],
                    1,
                );
            }
            // COM_STMT_EXECUTE
            0x17 => {
                let value = bound_integer(&payload);
                let mut row = vec![0x00, 0x00];
                row.extend_from_slice(&value.to_le_bytes());
                session.send(
                    &[
                        vec![1],
                        ColumnDef::new("x", FieldType::LongLong).to_bytes(),
                        eof(),
                        row,
                        eof(),
                    ],
                    1,
                );
            }
            // COM_STMT_CLOSE has no reply
            0x19 => {}
            // COM_QUIT
            0x01 => break,
            _ => session.send(&[err(1047, "08S01", "Unknown command")], 1),
        }
    }
    commands
}

fn greeting() -> Vec<u8> {
    let caps = capabilities::DEFAULT_CLIENT_FLAGS | capabilities::CLIENT_CONNECT_WITH_DB;
    let mut p = vec![10];
    p.extend_from_slice(b"8.0.36-mock\0");
    p.extend_from_slice(&99u32.to_le_bytes());
    p.extend_from_slice(&SCRAMBLE[..8]);
    p.push(0);
    p.extend_from_slice(&((caps & 0xFFFF) as u16).to_le_bytes());
    p.push(45);
    p.extend_from_slice(&2u16.to_le_bytes());
    p.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    p.push(21);
    p.extend_from_slice(&[0; 10]);
    p.extend_from_slice(&SCRAMBLE[8..]);
    p.push(0);
    p.extend_from_slice(b"mysql_native_password\0");
    p
}

fn ok() -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]
}

fn eof() -> Vec<u8> {
    vec![0xFE, 0x00, 0x00, 0x02, 0x00]
}

fn err(code: u16, state: &str, msg: &str) -> Vec<u8> {
    let mut p = vec![0xFF];
    p.extend_from_slice(&code.to_le_bytes());
    p.push(b'#');
    p.extend_from_slice(state.as_bytes());
    p.extend_from_slice(msg.as_bytes());
    p
}

fn login_carries(login: &[u8], auth_response: &[u8]) -> bool {
    login
        .windows(auth_response.len())
        .any(|w| w == auth_response)
}

/// Read back the single integer parameter of a COM_STMT_EXECUTE payload.
fn bound_integer(payload: &[u8]) -> i64 {
    // command, statement id, flags, iteration count, NULL bitmap, bound flag
    let types = &payload[12..14];
    let data = &payload[14..];
    match types[0] {
        0x01 => i64::from(data[0] as i8),
        0x02 => i64::from(i16::from_le_bytes([data[0], data[1]])),
        0x03 => i64::from(i32::from_le_bytes([data[0], data[1], data[2], data[3]])),
        0x08 => i64::from_le_bytes(data[..8].try_into().unwrap()),
        other => panic!("unexpected parameter type 0x{:02X}", other),
    }
}
