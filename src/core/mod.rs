//! Core module: storage primitives tanpa I/O
//!
//! - Arena: owned collection dengan handle stabil (index + generation),
//!   dipakai untuk mengelompokkan object per client

mod arena;

pub use arena::{Arena, Handle};
