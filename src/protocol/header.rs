//! Fixed 24-byte packet header (spec §3.1, §6.1), big-endian on the wire.
//!
//! ```text
//! offset  size  field
//!   0      4    magic
//!   4      2    version
//!   6      2    type
//!   8      4    payload_length
//!  12      4    crc32_of_payload
//!  16      4    sender_id
//!  20      2    flags
//!  22      2    reserved
//! ```

use crate::errors::AcipError;

pub const MAGIC: u32 = 0x4153_4349;
pub const HEADER_SIZE: usize = 24;
pub const CURRENT_VERSION: u16 = 1;
pub const MAX_PACKET_SIZE: u32 = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u16,
    pub ptype: u16,
    pub payload_length: u32,
    pub crc32: u32,
    pub sender_id: u32,
    pub flags: u16,
    pub reserved: u16,
}

impl PacketHeader {
    pub fn new(ptype: u16, payload_length: u32, crc32: u32, sender_id: u32) -> Self {
        Self {
            magic: MAGIC,
            version: CURRENT_VERSION,
            ptype,
            payload_length,
            crc32,
            sender_id,
            flags: 0,
            reserved: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..6].copy_from_slice(&self.version.to_be_bytes());
        buf[6..8].copy_from_slice(&self.ptype.to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.crc32.to_be_bytes());
        buf[16..20].copy_from_slice(&self.sender_id.to_be_bytes());
        buf[20..22].copy_from_slice(&self.flags.to_be_bytes());
        buf[22..24].copy_from_slice(&self.reserved.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AcipError> {
        if buf.len() < HEADER_SIZE {
            return Err(AcipError::Protocol(format!(
                "short header: {} < {HEADER_SIZE}",
                buf.len()
            )));
        }
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(AcipError::Protocol(format!("bad magic {magic:#x}")));
        }
        let version = u16::from_be_bytes(buf[4..6].try_into().unwrap());
        let ptype = u16::from_be_bytes(buf[6..8].try_into().unwrap());
        let payload_length = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        if payload_length > MAX_PACKET_SIZE {
            return Err(AcipError::Protocol(format!(
                "payload_length {payload_length} exceeds MAX_PACKET_SIZE"
            )));
        }
        let crc32 = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let sender_id = u32::from_be_bytes(buf[16..20].try_into().unwrap());
        let flags = u16::from_be_bytes(buf[20..22].try_into().unwrap());
        let reserved = u16::from_be_bytes(buf[22..24].try_into().unwrap());
        Ok(Self {
            magic,
            version,
            ptype,
            payload_length,
            crc32,
            sender_id,
            flags,
            reserved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip() {
        let h = PacketHeader::new(7, 42, 0xdead_beef, 9);
        let bytes = h.encode();
        let back = PacketHeader::decode(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = PacketHeader::new(1, 0, 0, 0).encode();
        bytes[0] = 0;
        assert!(PacketHeader::decode(&bytes).is_err());
    }

    #[test]
    fn rejects_oversize_length() {
        let h = PacketHeader::new(1, MAX_PACKET_SIZE + 1, 0, 0);
        let bytes = h.encode();
        assert!(PacketHeader::decode(&bytes).is_err());
    }

    #[test]
    fn accepts_exact_max_length() {
        let h = PacketHeader::new(1, MAX_PACKET_SIZE, 0, 0);
        let bytes = h.encode();
        assert!(PacketHeader::decode(&bytes).is_ok());
    }
}
