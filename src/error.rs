//! Error Types
//!
//! Tiga kategori error di level connection:
//! - **Transport**: would-block (transient) vs hangup/reset/broken pipe (fatal)
//! - **Malformed**: framing rusak, selalu fatal untuk connection
//! - **Protocol**: pesan valid tapi semantik salah, dilaporkan ke peer
//!   lewat `wth_display.error` lalu connection ditutup
//!
//! Tidak ada error yang mematikan proses server kecuali saat setup.

use std::io;
use thiserror::Error;

/// Error codes carried by the `wth_display.error` event.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidObject = 0,
    InvalidMethod = 1,
    NoMemory = 2,
    Implementation = 3,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::InvalidObject),
            1 => Some(Self::InvalidMethod),
            2 => Some(Self::NoMemory),
            3 => Some(Self::Implementation),
            _ => None,
        }
    }
}

/// Errors from the transfer engine.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Transport tidak bisa menerima/memberi data sekarang. Bukan kegagalan.
    #[error("operation would block")]
    WouldBlock,

    #[error("peer closed the connection")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Classify an `io::Error`; interruption is never surfaced (callers retry).
    pub fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::Closed,
            _ => Self::Io(e),
        }
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::WouldBlock)
    }
}

/// Primary error type for marshalling, dispatch and object bookkeeping.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid object {id}")]
    InvalidObject { id: u32 },

    #[error("invalid method {opcode} on object {object}")]
    InvalidMethod { object: u32, opcode: u16 },

    #[error("bind failed on registry {registry}: {reason}")]
    BadGlobal { registry: u32, reason: String },

    #[error("no memory")]
    NoMemory,

    #[error("unimplemented on object {object}: {reason}")]
    Implementation { object: u32, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error event received from the server (client side only).
    #[error("server error on object {object} (code {code}): {message}")]
    Remote {
        object: u32,
        code: u32,
        message: String,
    },
}

impl ProtocolError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    /// Error code posted to the peer, or `None` when nothing can be posted
    /// (framing or transport already broken).
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::InvalidObject { .. } | Self::BadGlobal { .. } => Some(ErrorCode::InvalidObject),
            Self::InvalidMethod { .. } => Some(ErrorCode::InvalidMethod),
            Self::NoMemory => Some(ErrorCode::NoMemory),
            Self::Implementation { .. } => Some(ErrorCode::Implementation),
            Self::Malformed(_) | Self::Transport(_) | Self::Remote { .. } => None,
        }
    }

    /// Object the error event should reference. Unknown ids are reported on
    /// the display, since the peer cannot resolve them.
    pub fn object(&self) -> Option<u32> {
        match self {
            Self::InvalidMethod { object, .. } => Some(*object),
            Self::BadGlobal { registry, .. } => Some(*registry),
            Self::Implementation { object, .. } => Some(*object),
            _ => None,
        }
    }

    /// Malformed framing and fatal transport errors kill the connection
    /// immediately, without attempting to report anything to the peer.
    #[inline]
    pub fn is_fatal_to_connection(&self) -> bool {
        match self {
            Self::Malformed(_) | Self::Remote { .. } => true,
            Self::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        let e = TransportError::from_io(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(e, TransportError::WouldBlock));
        assert!(!e.is_fatal());

        let e = TransportError::from_io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(e, TransportError::Closed));
        assert!(e.is_fatal());
    }

    #[test]
    fn test_codes_and_objects() {
        let e = ProtocolError::BadGlobal {
            registry: 2,
            reason: "unknown name 42".into(),
        };
        assert_eq!(e.code(), Some(ErrorCode::InvalidObject));
        assert_eq!(e.object(), Some(2));
        assert!(!e.is_fatal_to_connection());

        assert!(ProtocolError::malformed("short").is_fatal_to_connection());
        assert_eq!(ProtocolError::NoMemory.code(), Some(ErrorCode::NoMemory));
        assert_eq!(ErrorCode::from_u32(3), Some(ErrorCode::Implementation));
        assert_eq!(ErrorCode::from_u32(9), None);
    }
}
