//! Minimal hand-rolled protobuf wire codec and Connect-RPC framing for the
//! subset of Cursor's chat API this proxy needs. Field numbers below are
//! frozen to match the upstream wire schema; nothing here is a general
//! protobuf library.

use bytes::{Bytes, BytesMut};

const WIRE_VARINT: u8 = 0;
const WIRE_LEN: u8 = 2;

/// Appends a protobuf varint (LEB128, unsigned) to `buf`.
fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            buf.push(byte | 0x80);
        } else {
            buf.push(byte);
            break;
        }
    }
}

fn write_tag(buf: &mut Vec<u8>, field: u32, wire_type: u8) {
    write_varint(buf, ((field as u64) << 3) | wire_type as u64);
}

/// Builder for a single protobuf message. Proto3 semantics: default-valued
/// fields (empty string/bytes, `0`, `false`) are simply omitted.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string_field(&mut self, field: u32, value: &str) -> &mut Self {
        if !value.is_empty() {
            write_tag(&mut self.buf, field, WIRE_LEN);
            write_varint(&mut self.buf, value.len() as u64);
            self.buf.extend_from_slice(value.as_bytes());
        }
        self
    }

    pub fn bytes_field(&mut self, field: u32, value: &[u8]) -> &mut Self {
        if !value.is_empty() {
            write_tag(&mut self.buf, field, WIRE_LEN);
            write_varint(&mut self.buf, value.len() as u64);
            self.buf.extend_from_slice(value);
        }
        self
    }

    pub fn message_field(&mut self, field: u32, value: &[u8]) -> &mut Self {
        // Embedded messages are always written, even when empty, so the peer
        // can distinguish "absent" from "present but default".
        write_tag(&mut self.buf, field, WIRE_LEN);
        write_varint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    pub fn varint_field(&mut self, field: u32, value: u64) -> &mut Self {
        if value != 0 {
            write_tag(&mut self.buf, field, WIRE_VARINT);
            write_varint(&mut self.buf, value);
        }
        self
    }

    pub fn bool_field(&mut self, field: u32, value: bool) -> &mut Self {
        self.varint_field(field, value as u64)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone)]
pub enum WireValue {
    Varint(u64),
    Fixed64(u64),
    LengthDelimited(Bytes),
    Fixed32(u32),
}

/// Iterates `(field_number, value)` pairs out of a protobuf message payload.
/// Malformed trailing bytes simply stop iteration rather than panicking.
pub struct MessageReader {
    buf: Bytes,
    pos: usize,
}

impl MessageReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_varint(&mut self) -> Option<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *self.buf.get(self.pos)?;
            self.pos += 1;
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Some(result);
            }
            shift += 7;
            if shift >= 64 {
                return None;
            }
        }
    }
}

impl Iterator for MessageReader {
    type Item = (u32, WireValue);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let tag = self.read_varint()?;
        let field = (tag >> 3) as u32;
        let wire_type = (tag & 0x7) as u8;
        match wire_type {
            0 => {
                let v = self.read_varint()?;
                Some((field, WireValue::Varint(v)))
            }
            1 => {
                let start = self.pos;
                let end = start.checked_add(8)?;
                let slice = self.buf.get(start..end)?;
                self.pos = end;
                let bytes: [u8; 8] = slice.try_into().ok()?;
                Some((field, WireValue::Fixed64(u64::from_le_bytes(bytes))))
            }
            2 => {
                let len = self.read_varint()? as usize;
                let start = self.pos;
                let end = start.checked_add(len)?;
                if end > self.buf.len() {
                    return None;
                }
                self.pos = end;
                Some((
                    field,
                    WireValue::LengthDelimited(self.buf.slice(start..end)),
                ))
            }
            5 => {
                let start = self.pos;
                let end = start.checked_add(4)?;
                let slice = self.buf.get(start..end)?;
                self.pos = end;
                let bytes: [u8; 4] = slice.try_into().ok()?;
                Some((field, WireValue::Fixed32(u32::from_le_bytes(bytes))))
            }
            _ => None,
        }
    }
}

pub const CONNECT_FLAG_COMPRESSED: u8 = 0x01;
pub const CONNECT_FLAG_END_STREAM: u8 = 0x02;

/// Wraps a protobuf payload in a Connect-RPC unary/streaming frame: one flag
/// byte followed by a 4-byte big-endian length.
pub fn wrap_connect_frame(payload: &[u8], flags: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(flags);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Clone)]
pub struct ConnectFrame {
    pub flags: u8,
    pub payload: Bytes,
}

impl ConnectFrame {
    pub fn is_compressed(&self) -> bool {
        self.flags & CONNECT_FLAG_COMPRESSED != 0
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & CONNECT_FLAG_END_STREAM != 0
    }
}

/// Stateful decoder that reassembles Connect frames out of an arbitrarily
/// chunked byte stream, keeping a residual buffer across pushes.
#[derive(Debug, Default)]
pub struct ConnectFrameDecoder {
    residual: BytesMut,
}

impl ConnectFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<ConnectFrame> {
        self.residual.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            if self.residual.len() < 5 {
                break;
            }
            let len = u32::from_be_bytes([
                self.residual[1],
                self.residual[2],
                self.residual[3],
                self.residual[4],
            ]) as usize;
            if self.residual.len() < 5 + len {
                break;
            }
            let mut frame = self.residual.split_to(5 + len);
            let flags = frame[0];
            let payload = frame.split_off(5).freeze();
            frames.push(ConnectFrame { flags, payload });
        }
        frames
    }
}

/// Decompresses a gzip-compressed Connect frame payload.
pub fn gunzip(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(payload);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_string_field() {
        let mut builder = MessageBuilder::new();
        builder.string_field(5, "gpt-cursor-small");
        let bytes = Bytes::from(builder.finish());
        let mut reader = MessageReader::new(bytes);
        let (field, value) = reader.next().expect("field present");
        assert_eq!(field, 5);
        match value {
            WireValue::LengthDelimited(bytes) => assert_eq!(&bytes[..], b"gpt-cursor-small"),
            other => panic!("unexpected wire value: {other:?}"),
        }
    }

    #[test]
    fn omits_default_valued_scalar_fields() {
        let mut builder = MessageBuilder::new();
        builder.varint_field(27, 0);
        builder.bool_field(48, false);
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn connect_frame_header_is_five_bytes_with_big_endian_length() {
        let frame = wrap_connect_frame(b"hello", 0);
        assert_eq!(frame.len(), 5 + 5);
        assert_eq!(frame[0], 0);
        assert_eq!(&frame[1..5], &5u32.to_be_bytes());
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn decoder_reassembles_frames_split_across_chunks() {
        let frame = wrap_connect_frame(b"payload-bytes", 0);
        let mut decoder = ConnectFrameDecoder::new();
        assert!(decoder.push(&frame[..3]).is_empty());
        let frames = decoder.push(&frame[3..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"payload-bytes");
    }

    #[test]
    fn decoder_handles_back_to_back_frames_in_one_chunk() {
        let mut combined = wrap_connect_frame(b"first", 0);
        combined.extend(wrap_connect_frame(b"second", CONNECT_FLAG_END_STREAM));
        let mut decoder = ConnectFrameDecoder::new();
        let frames = decoder.push(&combined);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].payload[..], b"first");
        assert!(frames[1].is_end_stream());
    }
}
