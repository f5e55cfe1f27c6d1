//! Argument Encoder/Decoder
//!
//! Encode langsung ke sink (buffer outbound connection), decode langsung
//! dari slice payload yang sudah diterima. Tidak ada format intermediate.
//!
//! Aturan padding: setiap field length-prefixed diikuti
//! `(4 - len % 4) % 4` byte nol. Field panjang nol tetap menulis prefix
//! size, tanpa payload dan tanpa padding.

use super::interfaces::ArgType;
use super::message::{padded, padding, MessageHeader, HEADER_SIZE};
use crate::error::{ProtocolError, Result};

const ZEROS: [u8; 4] = [0; 4];

/// Decoded argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Int(i32),
    Uint(u32),
    Object(u32),
    NewId(u32),
    Str(String),
    Array(Vec<u8>),
}

impl Arg {
    /// Bytes this argument occupies on the wire, padding included.
    pub fn wire_len(&self) -> usize {
        match self {
            Arg::Int(_) | Arg::Uint(_) | Arg::Object(_) | Arg::NewId(_) => 4,
            Arg::Str(s) => 4 + padded(s.len() + 1),
            Arg::Array(a) => 4 + padded(a.len()),
        }
    }

    pub fn matches(&self, ty: ArgType) -> bool {
        matches!(
            (self, ty),
            (Arg::Int(_), ArgType::Int)
                | (Arg::Uint(_), ArgType::Uint)
                | (Arg::Object(_), ArgType::Object)
                | (Arg::NewId(_), ArgType::NewId(_))
                | (Arg::Str(_), ArgType::String)
                | (Arg::Array(_), ArgType::Array)
        )
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Arg::Uint(v) | Arg::Object(v) | Arg::NewId(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Destination for serialized bytes.
pub trait WireSink {
    fn put(&mut self, data: &[u8]) -> Result<()>;
}

impl WireSink for Vec<u8> {
    #[inline]
    fn put(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

/// Total padded payload size for an argument list.
pub fn payload_len(args: &[Arg]) -> usize {
    args.iter().map(Arg::wire_len).sum()
}

/// Reject values that cannot be put on the wire, without writing anything.
///
/// Panjang sudah dibatasi oleh ukuran pesan maksimal di header.
pub fn check_arg(arg: &Arg) -> Result<()> {
    match arg {
        Arg::Str(s) if s.as_bytes().contains(&0) => {
            Err(ProtocolError::malformed("string contains interior NUL"))
        }
        _ => Ok(()),
    }
}

/// Serialize one argument (prefix, data, padding) into `sink`.
pub fn serialize<S: WireSink + ?Sized>(sink: &mut S, arg: &Arg) -> Result<()> {
    check_arg(arg)?;
    match arg {
        Arg::Int(v) => sink.put(&v.to_le_bytes()),
        Arg::Uint(v) | Arg::Object(v) | Arg::NewId(v) => sink.put(&v.to_le_bytes()),
        Arg::Str(s) => {
            let len = s.len() + 1;
            sink.put(&(len as u32).to_le_bytes())?;
            sink.put(s.as_bytes())?;
            sink.put(&ZEROS[..1])?;
            sink.put(&ZEROS[..padding(len)])
        }
        Arg::Array(a) => {
            sink.put(&(a.len() as u32).to_le_bytes())?;
            if a.is_empty() {
                return Ok(());
            }
            sink.put(a)?;
            sink.put(&ZEROS[..padding(a.len())])
        }
    }
}

/// Encode a complete message (header + args) into a fresh buffer.
pub fn encode_message(object_id: u32, opcode: u16, args: &[Arg]) -> Result<Vec<u8>> {
    let header = MessageHeader::new(object_id, opcode, payload_len(args))?;
    let mut buf = Vec::with_capacity(header.total_size());
    buf.put(&header.to_bytes())?;
    for arg in args {
        serialize(&mut buf, arg)?;
    }
    Ok(buf)
}

/// Zero-copy decoder atas satu payload
pub struct Decoder<'a> {
    buffer: &'a [u8],
    read_pos: usize,
}

impl<'a> Decoder<'a> {
    #[inline(always)]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            read_pos: 0,
        }
    }

    #[inline]
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .read_pos
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| {
                ProtocolError::malformed(format!(
                    "field of {len} bytes runs past payload ({} of {} consumed)",
                    self.read_pos,
                    self.buffer.len()
                ))
            })?;
        let data = &self.buffer[self.read_pos..end];
        self.read_pos = end;
        Ok(data)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Length-prefixed bytes plus trailing padding.
    fn read_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        let data = self.take(len)?;
        self.take(padding(len))?;
        Ok(data)
    }

    /// Deserialize one argument of type `ty`.
    pub fn deserialize(&mut self, ty: ArgType) -> Result<Arg> {
        Ok(match ty {
            ArgType::Int => Arg::Int(self.read_u32()? as i32),
            ArgType::Uint => Arg::Uint(self.read_u32()?),
            ArgType::Object => Arg::Object(self.read_u32()?),
            ArgType::NewId(_) => Arg::NewId(self.read_u32()?),
            ArgType::String => {
                let raw = self.read_prefixed()?;
                let text = match raw.split_last() {
                    None => "",
                    Some((&0, body)) if !body.contains(&0) => std::str::from_utf8(body)
                        .map_err(|_| ProtocolError::malformed("string is not valid UTF-8"))?,
                    Some(_) => {
                        return Err(ProtocolError::malformed(
                            "string is not NUL-terminated or contains interior NUL",
                        ))
                    }
                };
                Arg::Str(text.to_owned())
            }
            ArgType::Array => Arg::Array(self.read_prefixed()?.to_vec()),
        })
    }

    /// Decode seluruh signature; sisa byte setelah argumen terakhir berarti
    /// ukuran di header tidak cocok dengan isi.
    pub fn deserialize_all(mut self, signature: &[ArgType]) -> Result<Vec<Arg>> {
        let mut args = Vec::with_capacity(signature.len());
        for &ty in signature {
            args.push(self.deserialize(ty)?);
        }
        if self.remaining() != 0 {
            return Err(ProtocolError::malformed(format!(
                "{} trailing bytes after last argument",
                self.remaining()
            )));
        }
        Ok(args)
    }

    /// Bytes consumed so far
    #[inline(always)]
    pub fn position(&self) -> usize {
        self.read_pos
    }

    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.read_pos)
    }
}

/// Split a complete message off the front of `buf`.
///
/// Returns `Ok(None)` while the header or payload is still incomplete.
pub fn split_message(buf: &[u8]) -> Result<Option<(MessageHeader, &[u8])>> {
    let Some(header) = MessageHeader::parse(buf)? else {
        return Ok(None);
    };
    if buf.len() < header.total_size() {
        return Ok(None);
    }
    Ok(Some((header, &buf[HEADER_SIZE..header.total_size()])))
}
