//! Socket framing for the RSSL-style transport
//!
//! Every frame starts with a 3-byte header: big-endian `u16` total length
//! (header included) and a `u8` opcode. A ping is a bare header.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;

pub const HEADER_LEN: usize = 3;
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;
/// Fragment header payload prefix: total length (u32) + fragment id (u16)
pub const FRAGMENT_HEADER_PREFIX: usize = 6;
/// Continuation payload prefix: fragment id (u16)
pub const FRAGMENT_PREFIX: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    ConnectReq = 1,
    ConnectAck = 2,
    ConnectNak = 3,
    Data = 4,
    Ping = 5,
    FragmentHeader = 6,
    Fragment = 7,
}

impl TryFrom<u8> for Opcode {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Opcode::ConnectReq),
            2 => Ok(Opcode::ConnectAck),
            3 => Ok(Opcode::ConnectNak),
            4 => Ok(Opcode::Data),
            5 => Ok(Opcode::Ping),
            6 => Ok(Opcode::FragmentHeader),
            7 => Ok(Opcode::Fragment),
            other => Err(TransportError::Protocol(format!("unknown opcode {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// Length-prefixed framing for the socket transport
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<(), TransportError> {
        let total = HEADER_LEN + frame.payload.len();
        if total > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!(
                "frame of {total} bytes exceeds {MAX_FRAME_LEN}"
            )));
        }
        buf.reserve(total);
        buf.put_u16(total as u16);
        buf.put_u8(frame.opcode as u8);
        buf.put_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let total = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if total < HEADER_LEN {
            return Err(TransportError::Protocol(format!("bad frame length {total}")));
        }
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }
        let opcode = Opcode::try_from(buf[2])?;
        let mut frame = buf.split_to(total);
        frame.advance(HEADER_LEN);
        Ok(Some(Frame {
            opcode,
            payload: frame.freeze(),
        }))
    }
}

/// One encoded frame as a standalone buffer
pub fn frame_bytes(opcode: Opcode, payload: &[u8]) -> Result<Bytes, TransportError> {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    FrameCodec.encode(
        Frame {
            opcode,
            payload: Bytes::copy_from_slice(payload),
        },
        &mut out,
    )?;
    Ok(out.freeze())
}

fn put_short_string(out: &mut BytesMut, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    out.put_u8(len as u8);
    out.put_slice(&bytes[..len]);
}

fn get_short_string(buf: &mut Bytes) -> Result<String, TransportError> {
    if buf.remaining() < 1 {
        return Err(TransportError::Protocol("truncated string".into()));
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(TransportError::Protocol("truncated string".into()));
    }
    let raw = buf.split_to(len);
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn need(buf: &Bytes, n: usize, what: &str) -> Result<(), TransportError> {
    if buf.remaining() < n {
        return Err(TransportError::Protocol(format!("truncated {what}")));
    }
    Ok(())
}

/// Client hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub major_version: u8,
    pub minor_version: u8,
    pub protocol_type: u8,
    pub ping_timeout_secs: u8,
    pub component_version: String,
}

impl ConnectRequest {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_u8(self.major_version);
        out.put_u8(self.minor_version);
        out.put_u8(self.protocol_type);
        out.put_u8(self.ping_timeout_secs);
        put_short_string(&mut out, &self.component_version);
        out.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, TransportError> {
        need(&payload, 4, "connect request")?;
        Ok(Self {
            major_version: payload.get_u8(),
            minor_version: payload.get_u8(),
            protocol_type: payload.get_u8(),
            ping_timeout_secs: payload.get_u8(),
            component_version: get_short_string(&mut payload)?,
        })
    }
}

/// Server acceptance with the negotiated parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAck {
    pub major_version: u8,
    pub minor_version: u8,
    pub ping_timeout_secs: u8,
    pub max_fragment_size: u16,
    pub component_version: String,
}

impl ConnectAck {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_u8(self.major_version);
        out.put_u8(self.minor_version);
        out.put_u8(self.ping_timeout_secs);
        out.put_u16(self.max_fragment_size);
        put_short_string(&mut out, &self.component_version);
        out.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, TransportError> {
        need(&payload, 5, "connect ack")?;
        Ok(Self {
            major_version: payload.get_u8(),
            minor_version: payload.get_u8(),
            ping_timeout_secs: payload.get_u8(),
            max_fragment_size: payload.get_u16(),
            component_version: get_short_string(&mut payload)?,
        })
    }
}

/// First piece of a fragmented message
pub fn encode_fragment_header(total_len: u32, fragment_id: u16, chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAGMENT_HEADER_PREFIX + chunk.len());
    out.extend_from_slice(&total_len.to_be_bytes());
    out.extend_from_slice(&fragment_id.to_be_bytes());
    out.extend_from_slice(chunk);
    out
}

pub fn encode_fragment(fragment_id: u16, chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAGMENT_PREFIX + chunk.len());
    out.extend_from_slice(&fragment_id.to_be_bytes());
    out.extend_from_slice(chunk);
    out
}

/// Returns (total length, fragment id, first chunk)
pub fn decode_fragment_header(mut payload: Bytes) -> Result<(u32, u16, Bytes), TransportError> {
    need(&payload, FRAGMENT_HEADER_PREFIX, "fragment header")?;
    let total = payload.get_u32();
    let id = payload.get_u16();
    Ok((total, id, payload))
}

/// Returns (fragment id, chunk)
pub fn decode_fragment(mut payload: Bytes) -> Result<(u16, Bytes), TransportError> {
    need(&payload, FRAGMENT_PREFIX, "fragment")?;
    let id = payload.get_u16();
    Ok((id, payload))
}
