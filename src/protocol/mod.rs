//! Protocol Layer: wire format, interface tables, dispatch, registry
//!
//! Prinsip desain:
//! - Little-endian, semua field 4-byte aligned
//! - Signature per pesan berupa data (tabel statis), bukan kode generated
//! - Decode langsung dari inbound buffer, encode langsung ke outbound buffer

pub mod codec;
pub mod dispatcher;
pub mod interfaces;
pub mod message;
pub mod registry;

pub use codec::{check_arg, encode_message, split_message, Arg, Decoder, WireSink};
pub use dispatcher::{dispatch, Message, MessageHandler};
pub use interfaces::{ArgType, Interface, MessageDesc, DISPLAY_ID};
pub use message::{MessageHeader, HEADER_SIZE, MAX_MESSAGE_SIZE};
pub use registry::{Global, GlobalList, RegistryPhase};
