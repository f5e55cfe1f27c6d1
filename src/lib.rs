//! Waltham - Object-Oriented Binary RPC over TCP
//!
//! Arsitektur:
//! - Wire codec: header 8 byte + argumen 4-byte aligned, little-endian
//! - Transfer engine: outbound queue dengan partial flush yang resumable
//! - Object Table per connection, dispatch (object, opcode) → handler
//! - Registry: discovery global lalu bind per interface
//! - Reactor: satu thread, mio, non-blocking penuh

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;

pub use config::{ClientConfig, ServerConfig};
pub use error::{ErrorCode, ProtocolError, Result, TransportError};
pub use network::{Connection, RemoteDisplay, Server, Shutdown, Side};
