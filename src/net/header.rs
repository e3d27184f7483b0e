//! Wire formats: the 21-byte datagram header shared by every packet, and the 34-byte
//! stream header layered on top of it for reliable-socket traffic.
//!
//! Grounded on `examples/original_source/P1-P4/minimsg.c`/`minisocket.c`'s packed
//! header structs: network-byte-order integers, with the protocol/message-type
//! discriminant written as a single ASCII decimal digit rather than a raw binary
//! value (so a packet capture is readable without a dissector — a deliberate
//! original-system quirk this rewrite preserves rather than "fixes").

use crate::error::{RuntimeError, RuntimeResult};

/// Datagram header: protocol(1) + src_addr(8) + src_port(2) + dst_addr(8) + dst_port(2).
pub const DATAGRAM_HEADER_LEN: usize = 1 + 8 + 2 + 8 + 2;

/// Stream header: datagram header + msg_type(1) + seq(4) + ack(4) + reserved(4).
pub const STREAM_HEADER_LEN: usize = DATAGRAM_HEADER_LEN + 1 + 4 + 4 + 4;

/// Highest valid port number (both unbound and bound ranges fit in a u16).
pub const PORT_MAX: u16 = 65535;
/// Unbound (listening) ports: `0..=UNBOUND_PORT_MAX`.
pub const UNBOUND_PORT_MAX: u16 = 32767;
/// Bound (addressed) ports start here and run to `PORT_MAX`.
pub const BOUND_PORT_MIN: u16 = 32768;

/// `minimsg`'s protocol discriminant.
pub const PROTOCOL_DATAGRAM: u8 = 0;
/// `minisocket`'s protocol discriminant.
pub const PROTOCOL_STREAM: u8 = 1;

/// Stream message types. There are exactly four on the wire: `ACK` doubles as the
/// data-carrying type (payload 0..MAX) as well as the bare handshake/ack message, and
/// a `FIN` is acknowledged with a plain `ACK` rather than a fifth type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Syn,
    SynAck,
    Ack,
    Fin,
}

impl MsgType {
    fn digit(self) -> u8 {
        match self {
            MsgType::Syn => 0,
            MsgType::SynAck => 1,
            MsgType::Ack => 2,
            MsgType::Fin => 3,
        }
    }

    fn from_digit(d: u8) -> RuntimeResult<Self> {
        Ok(match d {
            0 => MsgType::Syn,
            1 => MsgType::SynAck,
            2 => MsgType::Ack,
            3 => MsgType::Fin,
            _ => return Err(RuntimeError::InvalidParams),
        })
    }
}

/// A fully addressed datagram endpoint: a loopback-style numeric address plus port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr {
    pub addr: u64,
    pub port: u16,
}

/// Parsed `minimsg` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub src: Addr,
    pub dst: Addr,
}

impl DatagramHeader {
    pub fn pack(&self) -> [u8; DATAGRAM_HEADER_LEN] {
        let mut buf = [0u8; DATAGRAM_HEADER_LEN];
        buf[0] = ascii_digit(PROTOCOL_DATAGRAM);
        buf[1..9].copy_from_slice(&self.src.addr.to_be_bytes());
        buf[9..11].copy_from_slice(&self.src.port.to_be_bytes());
        buf[11..19].copy_from_slice(&self.dst.addr.to_be_bytes());
        buf[19..21].copy_from_slice(&self.dst.port.to_be_bytes());
        buf
    }

    pub fn unpack(buf: &[u8]) -> RuntimeResult<Self> {
        if buf.len() < DATAGRAM_HEADER_LEN {
            return Err(RuntimeError::InvalidParams);
        }
        let _protocol = digit_value(buf[0])?;
        let src_addr = u64::from_be_bytes(buf[1..9].try_into().unwrap());
        let src_port = u16::from_be_bytes(buf[9..11].try_into().unwrap());
        let dst_addr = u64::from_be_bytes(buf[11..19].try_into().unwrap());
        let dst_port = u16::from_be_bytes(buf[19..21].try_into().unwrap());
        Ok(DatagramHeader {
            src: Addr { addr: src_addr, port: src_port },
            dst: Addr { addr: dst_addr, port: dst_port },
        })
    }
}

/// Parsed `minisocket` header (datagram header plus stream-specific fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub datagram: DatagramHeader,
    pub msg_type: MsgType,
    pub seq: u32,
    pub ack: u32,
}

impl StreamHeader {
    pub fn pack(&self) -> [u8; STREAM_HEADER_LEN] {
        let mut buf = [0u8; STREAM_HEADER_LEN];
        buf[..DATAGRAM_HEADER_LEN].copy_from_slice(&self.datagram.pack());
        buf[0] = ascii_digit(PROTOCOL_STREAM);
        let mut off = DATAGRAM_HEADER_LEN;
        buf[off] = ascii_digit(self.msg_type.digit());
        off += 1;
        buf[off..off + 4].copy_from_slice(&self.seq.to_be_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.ack.to_be_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&0u32.to_be_bytes());
        buf
    }

    pub fn unpack(buf: &[u8]) -> RuntimeResult<Self> {
        if buf.len() < STREAM_HEADER_LEN {
            return Err(RuntimeError::InvalidParams);
        }
        let datagram = DatagramHeader::unpack(buf)?;
        let mut off = DATAGRAM_HEADER_LEN;
        let msg_type = MsgType::from_digit(digit_value(buf[off])?)?;
        off += 1;
        let seq = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let ack = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        Ok(StreamHeader { datagram, msg_type, seq, ack })
    }
}

/// Read the leading protocol byte of a raw packet without fully parsing it, used by
/// the ingress demultiplexer to decide which header to parse.
pub fn peek_protocol(buf: &[u8]) -> RuntimeResult<u8> {
    buf.first().copied().map(digit_value).ok_or(RuntimeError::InvalidParams)?
}

fn ascii_digit(v: u8) -> u8 {
    b'0' + v
}

fn digit_value(c: u8) -> RuntimeResult<u8> {
    if (b'0'..=b'9').contains(&c) {
        Ok(c - b'0')
    } else {
        Err(RuntimeError::InvalidParams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_header_roundtrips() {
        let hdr = DatagramHeader {
            src: Addr { addr: 0x1122_3344_5566_7788, port: 9000 },
            dst: Addr { addr: 42, port: 5000 },
        };
        let packed = hdr.pack();
        assert_eq!(packed.len(), DATAGRAM_HEADER_LEN);
        let parsed = DatagramHeader::unpack(&packed).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn stream_header_roundtrips_and_carries_protocol_byte() {
        let hdr = StreamHeader {
            datagram: DatagramHeader {
                src: Addr { addr: 1, port: BOUND_PORT_MIN },
                dst: Addr { addr: 2, port: BOUND_PORT_MIN + 1 },
            },
            msg_type: MsgType::SynAck,
            seq: 7,
            ack: 3,
        };
        let packed = hdr.pack();
        assert_eq!(packed.len(), STREAM_HEADER_LEN);
        assert_eq!(peek_protocol(&packed).unwrap(), PROTOCOL_STREAM);
        let parsed = StreamHeader::unpack(&packed).unwrap();
        assert_eq!(parsed, hdr);
    }
}
