//! Wire Message Format
//!
//! Layout (semua integer little-endian):
//! ┌──────────────────────────────────────────────────────┐
//! │ object_id: u32 │ message_size: u16 │ opcode: u16     │  8 bytes, fixed
//! ├──────────────────────────────────────────────────────┤
//! │ Payload (size - 8 bytes, setiap field padded ke 4)   │
//! └──────────────────────────────────────────────────────┘
//!
//! `message_size` termasuk header. Karena setiap field di-pad, pesan
//! berikutnya selalu mulai di boundary 4 byte relatif ke awal stream.

use crate::error::{ProtocolError, Result};

pub const HEADER_SIZE: usize = 8;

/// Largest message whose size still fits the u16 field and stays 4-aligned.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize & !3;

pub const MAX_PAYLOAD_SIZE: usize = MAX_MESSAGE_SIZE - HEADER_SIZE;

/// Number of zero bytes following a field of `len` bytes.
#[inline(always)]
pub const fn padding(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

/// `len` rounded up to the next multiple of 4.
#[inline(always)]
pub const fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// Message Header - fixed 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Target object
    pub object_id: u32,
    /// Total size termasuk header
    pub size: u16,
    /// Request/event index di interface target
    pub opcode: u16,
}

impl MessageHeader {
    /// Header for a message carrying `payload_len` bytes (already padded).
    pub fn new(object_id: u32, opcode: u16, payload_len: usize) -> Result<Self> {
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::malformed(format!(
                "payload of {payload_len} bytes exceeds {MAX_PAYLOAD_SIZE}"
            )));
        }
        if payload_len & 3 != 0 {
            return Err(ProtocolError::malformed(format!(
                "payload of {payload_len} bytes is not 4-byte aligned"
            )));
        }
        Ok(Self {
            object_id,
            size: (HEADER_SIZE + payload_len) as u16,
            opcode,
        })
    }

    #[inline(always)]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.object_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.size.to_le_bytes());
        buf[6..8].copy_from_slice(&self.opcode.to_le_bytes());
        buf
    }

    /// Parse header dari awal buffer.
    ///
    /// Returns `Ok(None)` kalau header belum lengkap diterima. Size yang
    /// tidak konsisten (< 8 atau bukan kelipatan 4) adalah `Malformed`.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = Self {
            object_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            size: u16::from_le_bytes([buf[4], buf[5]]),
            opcode: u16::from_le_bytes([buf[6], buf[7]]),
        };
        header.validate()?;
        Ok(Some(header))
    }

    pub fn validate(&self) -> Result<()> {
        let size = self.size as usize;
        if size < HEADER_SIZE || size & 3 != 0 {
            return Err(ProtocolError::malformed(format!(
                "object {} opcode {}: declared size {size} is not a whole number of 4-byte units",
                self.object_id, self.opcode
            )));
        }
        Ok(())
    }

    /// Total message size (header + payload)
    #[inline(always)]
    pub fn total_size(&self) -> usize {
        self.size as usize
    }

    #[inline(always)]
    pub fn payload_len(&self) -> usize {
        self.size as usize - HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(2), 2);
        assert_eq!(padding(3), 1);
        assert_eq!(padding(4), 0);
        assert_eq!(padded(13), 16);
        assert_eq!(MAX_MESSAGE_SIZE, 65532);
    }

    #[test]
    fn test_header_byte_order() {
        let header = MessageHeader::new(0x0102_0304, 0x0506, 8).unwrap();
        assert_eq!(
            header.to_bytes(),
            [0x04, 0x03, 0x02, 0x01, 0x10, 0x00, 0x06, 0x05]
        );
        let parsed = MessageHeader::parse(&header.to_bytes()).unwrap().unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.payload_len(), 8);
    }

    #[test]
    fn test_header_incomplete() {
        assert!(MessageHeader::parse(&[1, 0, 0, 0, 8]).unwrap().is_none());
    }

    #[test]
    fn test_header_inconsistent_size() {
        // size 10: bukan kelipatan 4
        let buf = [1, 0, 0, 0, 10, 0, 0, 0];
        assert!(matches!(
            MessageHeader::parse(&buf),
            Err(ProtocolError::Malformed(_))
        ));
        // size 4: lebih kecil dari header
        let buf = [1, 0, 0, 0, 4, 0, 0, 0];
        assert!(MessageHeader::parse(&buf).is_err());
    }

    #[test]
    fn test_header_rejects_oversized_payload() {
        assert!(MessageHeader::new(1, 0, MAX_PAYLOAD_SIZE).is_ok());
        assert!(MessageHeader::new(1, 0, MAX_PAYLOAD_SIZE + 4).is_err());
        assert!(MessageHeader::new(1, 0, 6).is_err());
    }
}
