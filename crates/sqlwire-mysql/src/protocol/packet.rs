//! Packet framing: splitting outbound payloads and reassembling inbound ones.

#![allow(clippy::cast_possible_truncation)]

use super::{MAX_PACKET_SIZE, PacketType};
use sqlwire_core::{ByteCursor, Error, Result};

/// A MySQL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    /// Parse a packet header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    /// Encode the header to 4 bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            ((self.payload_length >> 8) & 0xFF) as u8,
            ((self.payload_length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// Frame a logical payload into wire packets.
///
/// Chunks of `MAX_PACKET_SIZE` bytes are emitted until a shorter chunk ends
/// the payload; a payload that is an exact multiple of the boundary (the
/// empty payload included) ends with a zero-length packet. Returns the
/// bytes to send and the sequence id following the last packet.
pub fn frame_payload(payload: &[u8], sequence_id: u8) -> (Vec<u8>, u8) {
    let packets = payload.len() / MAX_PACKET_SIZE + 1;
    let mut out = ByteCursor::with_capacity(payload.len() + packets * PacketHeader::SIZE);
    let mut seq = sequence_id;
    let mut offset = 0;

    loop {
        let chunk_len = (payload.len() - offset).min(MAX_PACKET_SIZE);
        let header = PacketHeader {
            payload_length: chunk_len as u32,
            sequence_id: seq,
        };
        out.append(&header.to_bytes());
        out.append(&payload[offset..offset + chunk_len]);
        offset += chunk_len;
        seq = seq.wrapping_add(1);

        if chunk_len < MAX_PACKET_SIZE {
            break;
        }
    }

    (out.into_vec(), seq)
}

/// One logical payload, reassembled from one or more wire packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence id of the first wire packet
    pub first_sequence_id: u8,
    /// Sequence id of the last wire packet
    pub sequence_id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        PacketType::of(&self.payload)
    }

    pub fn first_byte(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// Incremental reassembler for the inbound byte stream.
///
/// Feed it whatever the socket produced; it yields complete logical
/// payloads. A packet whose length equals `MAX_PACKET_SIZE` marks the next
/// packet as a continuation of the same payload.
#[derive(Debug)]
pub struct PacketAssembler {
    buffer: Vec<u8>,
    start: usize,
    partial: Option<Packet>,
    max_payload: usize,
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketAssembler {
    /// Compact the buffer once this many consumed bytes pile up at its front.
    const COMPACT_THRESHOLD: usize = 64 * 1024;

    /// Create an assembler without a payload size limit.
    pub fn new() -> Self {
        Self::with_max_payload(usize::MAX)
    }

    /// Create an assembler that rejects logical payloads above `max_payload`.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buffer: Vec::new(),
            start: 0,
            partial: None,
            max_payload,
        }
    }

    /// Append raw bytes read from the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as part of a payload.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.start
            + self.partial.as_ref().map_or(0, |p| p.payload.len())
    }

    /// Pop the next complete payload, if one has fully arrived.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let available = self.buffer.len() - self.start;
            if available < PacketHeader::SIZE {
                return Ok(None);
            }
            let mut header_bytes = [0u8; 4];
            header_bytes.copy_from_slice(&self.buffer[self.start..self.start + 4]);
            let header = PacketHeader::from_bytes(&header_bytes);
            let len = header.payload_length as usize;
            if available < PacketHeader::SIZE + len {
                return Ok(None);
            }

            let body_start = self.start + PacketHeader::SIZE;
            let body = &self.buffer[body_start..body_start + len];

            let mut packet = match self.partial.take() {
                Some(mut partial) => {
                    let expected = partial.sequence_id.wrapping_add(1);
                    if header.sequence_id != expected {
                        return Err(Error::protocol(format!(
                            "continuation packet out of order: expected sequence id {}, got {}",
                            expected, header.sequence_id
                        )));
                    }
                    partial.sequence_id = header.sequence_id;
                    partial.payload.extend_from_slice(body);
                    partial
                }
                None => Packet {
                    first_sequence_id: header.sequence_id,
                    sequence_id: header.sequence_id,
                    payload: body.to_vec(),
                },
            };
            self.start = body_start + len;
            self.compact();

            if packet.payload.len() > self.max_payload {
                return Err(Error::protocol(format!(
                    "payload of {} bytes exceeds the {} byte limit",
                    packet.payload.len(),
                    self.max_payload
                )));
            }

            if len == MAX_PACKET_SIZE {
                self.partial = Some(packet);
                continue;
            }

            packet.payload.shrink_to_fit();
            tracing::trace!(
                seq = packet.sequence_id,
                len = packet.payload.len(),
                "Assembled packet"
            );
            return Ok(Some(packet));
        }
    }

    fn compact(&mut self) {
        if self.start == self.buffer.len() {
            self.buffer.clear();
            self.start = 0;
        } else if self.start >= Self::COMPACT_THRESHOLD {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
    }
}

/// Mod-256 packet sequence counter, reset to 0 at the start of each command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter(u8);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(0)
    }

    /// The id the next packet will carry.
    pub fn current(self) -> u8 {
        self.0
    }

    /// Start a new command.
    pub fn reset(&mut self) {
        self.0 = 0;
    }

    /// Take the current id and advance.
    pub fn next(&mut self) -> u8 {
        let id = self.0;
        self.0 = self.0.wrapping_add(1);
        id
    }

    /// Continue after a packet that carried `sequence_id`.
    pub fn follow(&mut self, sequence_id: u8) {
        self.0 = sequence_id.wrapping_add(1);
    }

    /// Set the id the next packet will carry.
    pub fn set(&mut self, sequence_id: u8) {
        self.0 = sequence_id;
    }
}
