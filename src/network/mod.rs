//! Network Layer: transfer engine, connection, dan reactor
//!
//! Menggunakan mio untuk non-blocking I/O (epoll/kqueue).
//!
//! - `transport`: scatter/gather send/recv tanpa SIGPIPE
//! - `connection`: buffer outbound/inbound + Object Table per peer
//! - `client` / `server`: sisi server, satu thread, satu reactor
//! - `display`: sisi client (blocking), untuk tool dan test

pub mod client;
mod connection;
pub mod display;
pub mod object_table;
mod server;
mod shutdown;
mod transport;

pub use client::{Client, Resources};
pub use connection::{Connection, Side, MAX_OUTBOUND_BYTES, READ_BUFFER_SIZE};
pub use display::{Event, RemoteDisplay};
pub use object_table::{IdAllocator, Object, ObjectTable, Role};
pub use server::Server;
pub use shutdown::Shutdown;
pub use transport::{tune_stream, Transport};
