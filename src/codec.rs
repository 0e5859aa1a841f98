//! The wire packet format shared by every protocol in this crate.
//!
//! Header layout (14 bytes, all multi-byte integers big-endian):
//!
//! ```text
//! | kind (1) | flags (1) | seq (4) | ack (4) | checksum (2) | payload_len (2) | payload ... |
//! ```
//!
//! The checksum is the Internet ones-complement checksum (RFC 1071) over
//! the header, with the checksum field itself treated as zero, followed
//! by the payload. An odd-length payload is padded with a trailing zero
//! byte for the purposes of the computation only; the pad is never part
//! of the encoded frame.

use crate::error::Error;

const HEADER_LEN: usize = 14;

/// The kind of a packet, occupying the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Data,
    Ack,
    Nak,
    Syn,
    SynAck,
    Fin,
    FinAck,
}

impl Kind {
    fn to_byte(self) -> u8 {
        match self {
            Kind::Data => 0,
            Kind::Ack => 1,
            Kind::Nak => 2,
            Kind::Syn => 3,
            Kind::SynAck => 4,
            Kind::Fin => 5,
            Kind::FinAck => 6,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, Error> {
        Ok(match byte {
            0 => Kind::Data,
            1 => Kind::Ack,
            2 => Kind::Nak,
            3 => Kind::Syn,
            4 => Kind::SynAck,
            5 => Kind::Fin,
            6 => Kind::FinAck,
            other => {
                return Err(Error::Protocol(format!("unknown packet kind byte {other}")))
            }
        })
    }
}

/// A single protocol packet: header fields plus an opaque payload.
///
/// Meaningful only in combination with the protocol using it: `seq` is a
/// single bit for the stop-and-wait family, a `k`-bit window index for
/// GBN/SR, and a 32-bit byte offset for the simplified TCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: Kind,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: Kind, seq: u32, ack: u32, flags: u8, payload: Vec<u8>) -> Self {
        Self {
            kind,
            seq,
            ack,
            flags,
            payload,
        }
    }

    /// A bare control packet carrying no payload.
    pub fn control(kind: Kind, seq: u32, ack: u32) -> Self {
        Self::new(kind, seq, ack, 0, Vec::new())
    }
}

/// Serializes a packet to its wire representation, filling in the
/// checksum.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let payload_len: u16 = packet
        .payload
        .len()
        .try_into()
        .expect("payload larger than 65535 bytes");
    let mut frame = Vec::with_capacity(HEADER_LEN + packet.payload.len());
    frame.push(packet.kind.to_byte());
    frame.push(packet.flags);
    frame.extend_from_slice(&packet.seq.to_be_bytes());
    frame.extend_from_slice(&packet.ack.to_be_bytes());
    frame.extend_from_slice(&[0, 0]); // checksum placeholder
    frame.extend_from_slice(&payload_len.to_be_bytes());
    frame.extend_from_slice(&packet.payload);

    let checksum = checksum_of(&frame);
    frame[8..10].copy_from_slice(&checksum.to_be_bytes());
    frame
}

/// Parses a packet from its wire representation, rejecting corrupted or
/// malformed frames.
pub fn decode(frame: &[u8]) -> Result<Packet, Error> {
    if frame.len() < HEADER_LEN {
        return Err(Error::Truncated { len: frame.len() });
    }

    let kind = Kind::from_byte(frame[0])?;
    let flags = frame[1];
    let seq = u32::from_be_bytes(frame[2..6].try_into().unwrap());
    let ack = u32::from_be_bytes(frame[6..10].try_into().unwrap());
    let expected_checksum = u16::from_be_bytes(frame[10..12].try_into().unwrap());
    let payload_len = u16::from_be_bytes(frame[12..14].try_into().unwrap()) as usize;

    if frame.len() != HEADER_LEN + payload_len {
        return Err(Error::Truncated { len: frame.len() });
    }

    let mut zeroed = frame.to_vec();
    zeroed[10..12].copy_from_slice(&[0, 0]);
    let actual_checksum = checksum_of(&zeroed);
    if actual_checksum != expected_checksum {
        return Err(Error::Corruption {
            expected: expected_checksum,
            actual: actual_checksum,
        });
    }

    Ok(Packet {
        kind,
        seq,
        ack,
        flags,
        payload: frame[HEADER_LEN..].to_vec(),
    })
}

/// An accumulator for the Internet ones-complement checksum (RFC 1071).
///
/// The same ones-complement checksum used across UDP, TCP, and IP
/// headers.
#[derive(Debug, Default, Clone, Copy)]
struct Checksum(u16);

impl Checksum {
    fn add_u16(&mut self, value: u16) {
        let (sum, carry) = self.0.overflowing_add(value);
        self.0 = sum + carry as u16;
    }

    fn as_u16(self) -> u16 {
        match self.0 {
            // There are two ones-complement representations of zero; pick
            // the nonzero one so an all-zero checksum field always reads
            // as "unused" rather than "valid".
            0xffff => 0xffff,
            sum => !sum,
        }
    }
}

fn checksum_of(frame_with_checksum_zeroed: &[u8]) -> u16 {
    let mut checksum = Checksum::default();
    let mut chunks = frame_with_checksum_zeroed.chunks_exact(2);
    for chunk in &mut chunks {
        checksum.add_u16(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        checksum.add_u16(u16::from_be_bytes([*last, 0]));
    }
    checksum.as_u16()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty_payload() {
        let packet = Packet::control(Kind::Ack, 7, 3);
        let frame = encode(&packet);
        assert_eq!(decode(&frame).unwrap(), packet);
    }

    #[test]
    fn round_trips_odd_length_payload() {
        let packet = Packet::new(Kind::Data, 1, 0, 0, b"odd".to_vec());
        let frame = encode(&packet);
        assert_eq!(decode(&frame).unwrap(), packet);
    }

    #[test]
    fn round_trips_even_length_payload() {
        let packet = Packet::new(Kind::Data, 1, 0, 0, b"even!!".to_vec());
        let frame = encode(&packet);
        assert_eq!(decode(&frame).unwrap(), packet);
    }

    #[test]
    fn detects_single_bit_corruption() {
        let packet = Packet::new(Kind::Data, 42, 0, 0, b"hello, world".to_vec());
        let mut frame = encode(&packet);
        let byte = frame.len() - 1;
        frame[byte] ^= 0b0000_0001;
        assert!(matches!(decode(&frame), Err(Error::Corruption { .. })));
    }

    #[test]
    fn detects_corruption_in_header() {
        let packet = Packet::control(Kind::Syn, 100, 0);
        let mut frame = encode(&packet);
        frame[2] ^= 0b1000_0000;
        assert!(matches!(decode(&frame), Err(Error::Corruption { .. })));
    }

    #[test]
    fn rejects_truncated_frame() {
        assert!(matches!(
            decode(&[0u8; 5]),
            Err(Error::Truncated { len: 5 })
        ));
    }

    #[test]
    fn rejects_length_mismatch() {
        let packet = Packet::new(Kind::Data, 1, 0, 0, b"abc".to_vec());
        let mut frame = encode(&packet);
        frame.pop();
        assert!(matches!(decode(&frame), Err(Error::Truncated { .. })));
    }
}
