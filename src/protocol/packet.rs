//! Payload types and the top-level `Packet` (header + payload bytes).

use crate::errors::AcipError;
use crate::protocol::header::{PacketHeader, HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    HandshakeHello = 1,
    HandshakeResponse = 2,
    HandshakeFinish = 3,
    ClientJoin = 4,
    ClientList = 5,
    StreamStart = 6,
    StreamStop = 7,
    ImageFrame = 8,
    AsciiFrame = 9,
    AudioBatch = 10,
    SizeUpdate = 11,
    Ping = 12,
    Pong = 13,
    ServerState = 14,
    ClearConsole = 15,
    Error = 16,
    Encrypted = 17,
}

impl PacketType {
    pub fn from_u16(v: u16) -> Option<Self> {
        use PacketType::*;
        Some(match v {
            1 => HandshakeHello,
            2 => HandshakeResponse,
            3 => HandshakeFinish,
            4 => ClientJoin,
            5 => ClientList,
            6 => StreamStart,
            7 => StreamStop,
            8 => ImageFrame,
            9 => AsciiFrame,
            10 => AudioBatch,
            11 => SizeUpdate,
            12 => Ping,
            13 => Pong,
            14 => ServerState,
            15 => ClearConsole,
            16 => Error,
            17 => Encrypted,
            _ => return None,
        })
    }
}

/// Capability bitfield (CLIENT_JOIN payload).
pub const CAP_VIDEO: u32 = 1;
pub const CAP_AUDIO: u32 = 2;
pub const CAP_COLOR: u32 = 4;
pub const CAP_STRETCH: u32 = 8;
pub const CAP_UTF8: u32 = 16;

/// Stream-kind bitfield (STREAM_START/STREAM_STOP payload).
pub const STREAM_VIDEO: u32 = 1;
pub const STREAM_AUDIO: u32 = 2;

/// A complete decoded/encoded packet: header plus owned payload bytes.
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(ptype: PacketType, sender_id: u32, payload: Vec<u8>) -> Self {
        let crc = crate::protocol::crc::crc32(&payload);
        let header = PacketHeader::new(ptype as u16, payload.len() as u32, crc, sender_id);
        Self { header, payload }
    }

    pub fn ptype(&self) -> Option<PacketType> {
        PacketType::from_u16(self.header.ptype)
    }

    /// Serialize header + payload into one contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a packet from a buffer containing at least `HEADER_SIZE +
    /// header.payload_length` bytes, verifying the CRC32 over the payload.
    pub fn decode(buf: &[u8]) -> Result<Self, AcipError> {
        let header = PacketHeader::decode(buf)?;
        let end = HEADER_SIZE
            .checked_add(header.payload_length as usize)
            .ok_or_else(|| AcipError::Protocol("payload length overflow".into()))?;
        if buf.len() < end {
            return Err(AcipError::Protocol(format!(
                "short payload: have {}, need {end}",
                buf.len()
            )));
        }
        let payload = buf[HEADER_SIZE..end].to_vec();
        let actual = crate::protocol::crc::crc32(&payload);
        if actual != header.crc32 {
            return Err(AcipError::Protocol(format!(
                "crc mismatch: header={:#x} actual={:#x}",
                header.crc32, actual
            )));
        }
        Ok(Self { header, payload })
    }
}

/// `IMAGE_FRAME` payload: `[w:u32 be][h:u32 be][rgb bytes]`.
pub struct ImageFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub rgb: &'a [u8],
}

impl<'a> ImageFrame<'a> {
    pub const MAX_DIM: u32 = 4096;

    pub fn parse(payload: &'a [u8]) -> Result<Self, AcipError> {
        if payload.len() < 8 {
            return Err(AcipError::Protocol("IMAGE_FRAME payload too short".into()));
        }
        let width = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        let height = u32::from_be_bytes(payload[4..8].try_into().unwrap());
        if width == 0 || height == 0 || width > Self::MAX_DIM || height > Self::MAX_DIM {
            return Err(AcipError::Protocol(format!(
                "IMAGE_FRAME dimensions out of range: {width}x{height}"
            )));
        }
        let expected = 8usize
            .checked_add((width as usize) * (height as usize) * 3)
            .ok_or_else(|| AcipError::Protocol("IMAGE_FRAME size overflow".into()))?;
        if payload.len() != expected {
            return Err(AcipError::Protocol(format!(
                "IMAGE_FRAME payload len {} != expected {expected}",
                payload.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgb: &payload[8..],
        })
    }

    pub fn encode(width: u32, height: u32, rgb: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + rgb.len());
        out.extend_from_slice(&width.to_be_bytes());
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(rgb);
        out
    }
}

/// `ASCII_FRAME` payload layout (§4.7, §6.1).
pub struct AsciiFrameHeader {
    pub cells_w: u32,
    pub cells_h: u32,
    pub original_size: u32,
    pub compressed_size: u32,
    pub crc32: u32,
    pub flags: u32,
}

pub const ASCII_FRAME_HEADER_SIZE: usize = 24;

impl AsciiFrameHeader {
    pub fn encode(&self) -> [u8; ASCII_FRAME_HEADER_SIZE] {
        let mut buf = [0u8; ASCII_FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.cells_w.to_be_bytes());
        buf[4..8].copy_from_slice(&self.cells_h.to_be_bytes());
        buf[8..12].copy_from_slice(&self.original_size.to_be_bytes());
        buf[12..16].copy_from_slice(&self.compressed_size.to_be_bytes());
        buf[16..20].copy_from_slice(&self.crc32.to_be_bytes());
        buf[20..24].copy_from_slice(&self.flags.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AcipError> {
        if buf.len() < ASCII_FRAME_HEADER_SIZE {
            return Err(AcipError::Protocol("ASCII_FRAME header too short".into()));
        }
        Ok(Self {
            cells_w: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            cells_h: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            original_size: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            compressed_size: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            crc32: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            flags: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
        })
    }
}

/// `SIZE_UPDATE` payload: `[w:u16 be][h:u16 be]`.
pub fn encode_size_update(width: u16, height: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out
}

pub fn parse_size_update(payload: &[u8]) -> Result<(u16, u16), AcipError> {
    if payload.len() != 4 {
        return Err(AcipError::Protocol("SIZE_UPDATE must be 4 bytes".into()));
    }
    Ok((
        u16::from_be_bytes(payload[0..2].try_into().unwrap()),
        u16::from_be_bytes(payload[2..4].try_into().unwrap()),
    ))
}

/// `CLIENT_JOIN` payload: `[name: 32B NUL-padded UTF-8][caps: u32 be]`.
pub fn encode_client_join(display_name: &str, caps: u32) -> Vec<u8> {
    let mut out = vec![0u8; 36];
    let bytes = display_name.as_bytes();
    let n = bytes.len().min(32);
    out[..n].copy_from_slice(&bytes[..n]);
    out[32..36].copy_from_slice(&caps.to_be_bytes());
    out
}

pub fn parse_client_join(payload: &[u8]) -> Result<(String, u32), AcipError> {
    if payload.len() != 36 {
        return Err(AcipError::Protocol("CLIENT_JOIN must be 36 bytes".into()));
    }
    let name_bytes = &payload[0..32];
    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(32);
    let name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
    let caps = u32::from_be_bytes(payload[32..36].try_into().unwrap());
    Ok((name, caps))
}

/// `STREAM_START`/`STREAM_STOP` payload: `[kinds: u32 be]`.
pub fn encode_stream_kinds(kinds: u32) -> Vec<u8> {
    kinds.to_be_bytes().to_vec()
}

pub fn parse_stream_kinds(payload: &[u8]) -> Result<u32, AcipError> {
    if payload.len() != 4 {
        return Err(AcipError::Protocol("stream kinds payload must be 4 bytes".into()));
    }
    Ok(u32::from_be_bytes(payload[0..4].try_into().unwrap()))
}

/// `ERROR` payload: `[code: u32 be][UTF-8 message]`.
pub fn encode_error(code: u32, message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + message.len());
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(message.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn packet_round_trip() {
        let p = Packet::new(PacketType::Ping, 3, vec![1, 2, 3]);
        let bytes = p.encode();
        let back = Packet::decode(&bytes).unwrap();
        assert_eq!(back.header.crc32, p.header.crc32);
        assert_eq!(back.payload, p.payload);
        assert_eq!(back.ptype(), Some(PacketType::Ping));
    }

    #[test]
    fn packet_decode_detects_corruption() {
        let p = Packet::new(PacketType::Ping, 0, vec![9, 9, 9]);
        let mut bytes = p.encode();
        *bytes.last_mut().unwrap() ^= 0xff;
        assert!(Packet::decode(&bytes).is_err());
    }

    #[test]
    fn image_frame_rejects_zero_dims() {
        let payload = ImageFrame::encode(0, 10, &[]);
        assert!(ImageFrame::parse(&payload).is_err());
    }

    #[test]
    fn image_frame_rejects_oversize_dims() {
        let payload = ImageFrame::encode(5000, 10, &[]);
        assert!(ImageFrame::parse(&payload).is_err());
    }

    #[test]
    fn image_frame_rejects_size_mismatch() {
        let mut payload = ImageFrame::encode(2, 2, &[0u8; 12]);
        payload.push(0); // one byte more than w*h*3 expects
        assert!(ImageFrame::parse(&payload).is_err());
    }

    #[test]
    fn image_frame_round_trip() {
        let rgb = vec![1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let payload = ImageFrame::encode(2, 2, &rgb);
        let parsed = ImageFrame::parse(&payload).unwrap();
        assert_eq!(parsed.width, 2);
        assert_eq!(parsed.height, 2);
        assert_eq!(parsed.rgb, &rgb[..]);
    }

    #[test]
    fn client_join_round_trip() {
        let payload = encode_client_join("Alice", CAP_VIDEO | CAP_AUDIO);
        let (name, caps) = parse_client_join(&payload).unwrap();
        assert_eq!(name, "Alice");
        assert_eq!(caps, CAP_VIDEO | CAP_AUDIO);
    }

    #[test]
    fn size_update_round_trip() {
        let payload = encode_size_update(80, 24);
        assert_eq!(parse_size_update(&payload).unwrap(), (80, 24));
    }
}
