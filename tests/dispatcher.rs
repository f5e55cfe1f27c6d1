//! Dispatcher + registry protocol lewat Connection mock
//!
//! Byte masuk dipotong di titik sembarang; pesan harus di-dispatch utuh,
//! sesuai urutan, dan tidak ada yang hilang.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};
use std::rc::Rc;

use waltham::network::client::default_globals;
use waltham::network::{Connection, Resources, Role, Side, Transport};
use waltham::protocol::interfaces::{compositor, display, region, registry, DISPLAY_ID};
use waltham::protocol::{dispatch, encode_message, split_message, Arg, ArgType, Decoder, Message, MessageHandler};
use waltham::{ErrorCode, Result};

#[derive(Default)]
struct Pipe {
    incoming: VecDeque<u8>,
    sent: Vec<u8>,
    /// Peer berhenti membaca: setiap write would-block
    stalled: bool,
}

impl Transport for Pipe {
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        if self.stalled {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let mut n = 0;
        for b in bufs {
            self.sent.extend_from_slice(b);
            n += b.len();
        }
        Ok(n)
    }

    fn recv_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        if self.incoming.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = bufs[0].len().min(self.incoming.len());
        for (dst, src) in bufs[0].iter_mut().zip(self.incoming.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

#[derive(Default)]
struct Recorder {
    versions: Vec<u32>,
}

impl MessageHandler<Pipe> for Recorder {
    fn handle(&mut self, _conn: &mut Connection<Pipe>, msg: Message) -> Result<()> {
        self.versions.push(msg.uint(0)?);
        Ok(())
    }
}

/// Server connection + resources dengan globals default.
struct Harness {
    conn: Connection<Pipe>,
    res: Resources,
}

impl Harness {
    fn new(max_objects: usize) -> Self {
        Self {
            conn: Connection::new(Pipe::default(), Side::Server, max_objects),
            res: Resources::new(Rc::new(default_globals())),
        }
    }

    fn request(&mut self, object: u32, opcode: u16, args: &[Arg]) {
        let bytes = encode_message(object, opcode, args).unwrap();
        self.conn.transport_mut().incoming.extend(bytes);
        while self.conn.read().is_ok() {
            dispatch(&mut self.conn, &mut self.res).unwrap();
        }
    }

    /// Error events yang sudah ditulis: (object, code).
    fn errors(&mut self) -> Vec<(u32, u32)> {
        self.conn.flush().unwrap();
        let sent = std::mem::take(&mut self.conn.transport_mut().sent);
        let mut rest = &sent[..];
        let mut errors = Vec::new();
        while let Some((header, payload)) = split_message(rest).unwrap() {
            if header.object_id == DISPLAY_ID && header.opcode == display::event::ERROR {
                let sig = [ArgType::Object, ArgType::Uint, ArgType::String];
                let args = Decoder::new(payload).deserialize_all(&sig).unwrap();
                errors.push((args[0].as_uint().unwrap(), args[1].as_uint().unwrap()));
            }
            rest = &rest[header.total_size()..];
        }
        errors
    }

    fn bind_compositor(&mut self, registry_id: u32, new_id: u32) {
        self.request(DISPLAY_ID, display::request::GET_REGISTRY, &[Arg::NewId(registry_id)]);
        self.request(
            registry_id,
            registry::request::BIND,
            &[
                Arg::Uint(1),
                Arg::NewId(new_id),
                Arg::Str("wthp_compositor".into()),
                Arg::Uint(4),
            ],
        );
    }
}

#[test]
fn messages_split_at_any_point_dispatch_in_order() {
    let count = 25u32;
    let stream: Vec<u8> = (0..count)
        .flat_map(|i| encode_message(DISPLAY_ID, display::request::CLIENT_VERSION, &[Arg::Uint(i)]).unwrap())
        .collect();

    for chunk in 1..=stream.len() / 2 {
        let mut conn = Connection::new(Pipe::default(), Side::Server, 16);
        let mut handler = Recorder::default();

        for piece in stream.chunks(chunk) {
            conn.transport_mut().incoming.extend(piece);
            conn.read().unwrap();
            dispatch(&mut conn, &mut handler).unwrap();
        }

        assert_eq!(handler.versions, (0..count).collect::<Vec<_>>(), "chunk={chunk}");
        assert!(conn.inbound().is_empty());
    }
}

#[test]
fn compositor_creates_live_region() {
    let mut h = Harness::new(64);
    h.bind_compositor(7, 2);
    assert!(matches!(h.conn.objects().lookup(2).unwrap().role, Role::Compositor(_)));

    h.request(2, compositor::request::CREATE_REGION, &[Arg::NewId(3)]);
    let obj = h.conn.objects().lookup(3).unwrap();
    assert!(matches!(obj.role, Role::Region(_)));
    assert_eq!(obj.interface_name(), "wthp_region");

    h.request(3, region::request::ADD, &[Arg::Int(1), Arg::Int(2), Arg::Int(3), Arg::Int(4)]);
    h.request(3, region::request::SUBTRACT, &[Arg::Int(0), Arg::Int(0), Arg::Int(1), Arg::Int(1)]);
    assert!(h.errors().is_empty());
    assert_eq!(h.res.regions.iter().next().unwrap().1.ops.len(), 2);
}

#[test]
fn destroyed_id_is_never_dispatched_again() {
    let mut h = Harness::new(64);
    h.bind_compositor(7, 2);
    h.request(2, compositor::request::CREATE_REGION, &[Arg::NewId(3)]);
    h.request(3, region::request::DESTROY, &[]);
    assert!(!h.conn.objects().contains(3));
    assert!(h.errors().is_empty());

    // Teardown setelah destroy eksplisit tidak menyentuh region lagi
    h.request(3, region::request::DESTROY, &[]);
    assert_eq!(h.errors(), vec![(DISPLAY_ID, ErrorCode::InvalidObject as u32)]);
    assert!(h.res.regions.is_empty());
    assert_eq!(h.res.teardown(&mut h.conn), 3);
}

#[test]
fn registry_destroy_keeps_bound_objects() {
    let mut h = Harness::new(64);
    h.bind_compositor(7, 2);
    h.request(7, registry::request::DESTROY, &[]);
    h.request(2, compositor::request::CREATE_REGION, &[Arg::NewId(3)]);
    assert!(h.errors().is_empty());
    assert!(h.conn.objects().lookup(3).is_ok());
}

#[test]
fn bogus_bind_is_reported_on_registry() {
    let mut h = Harness::new(64);
    h.request(DISPLAY_ID, display::request::GET_REGISTRY, &[Arg::NewId(2)]);
    h.request(
        2,
        registry::request::BIND,
        &[
            Arg::Uint(42),
            Arg::NewId(3),
            Arg::Str("bogus_iface".into()),
            Arg::Uint(1),
        ],
    );
    assert_eq!(h.errors(), vec![(2, ErrorCode::InvalidObject as u32)]);
    assert!(h.conn.is_closing());
    assert!(!h.conn.objects().contains(3));
}

#[test]
fn mismatched_interface_and_version_rejected() {
    for (iface, version) in [("wthp_region", 1), ("wthp_compositor", 5)] {
        let mut h = Harness::new(64);
        h.request(DISPLAY_ID, display::request::GET_REGISTRY, &[Arg::NewId(2)]);
        h.request(
            2,
            registry::request::BIND,
            &[Arg::Uint(1), Arg::NewId(3), Arg::Str(iface.into()), Arg::Uint(version)],
        );
        assert_eq!(h.errors(), vec![(2, 0)], "{iface} v{version}");
    }
}

#[test]
fn object_limit_is_no_memory() {
    // display + registry + compositor = 3
    let mut h = Harness::new(3);
    h.bind_compositor(2, 3);
    h.request(3, compositor::request::CREATE_REGION, &[Arg::NewId(4)]);
    assert_eq!(h.errors(), vec![(DISPLAY_ID, ErrorCode::NoMemory as u32)]);
}

#[test]
fn unknown_opcode_is_invalid_method() {
    let mut h = Harness::new(64);
    h.bind_compositor(2, 3);
    h.request(3, 7, &[]);
    assert_eq!(h.errors(), vec![(3, ErrorCode::InvalidMethod as u32)]);
}

#[test]
fn unread_replies_past_the_outbound_cap_are_no_memory() {
    let limit = 64 * 1024;
    let mut h = Harness::new(64);
    h.conn = Connection::new(Pipe::default(), Side::Server, 64).with_outbound_limit(limit);
    h.conn.transport_mut().stalled = true;

    // done + delete_id = 24 byte per sync
    for _ in 0..4 {
        for _ in 0..1000 {
            let bytes = encode_message(DISPLAY_ID, display::request::SYNC, &[Arg::NewId(5)]).unwrap();
            h.conn.transport_mut().incoming.extend(bytes);
        }
        while h.conn.read().is_ok() {
            if h.conn.is_closing() {
                let n = h.conn.inbound().len();
                h.conn.consume(n);
                continue;
            }
            dispatch(&mut h.conn, &mut h.res).unwrap();
        }
        assert_eq!(h.conn.flush().unwrap(), h.conn.pending_out());
    }

    assert!(h.conn.is_closing());
    assert!(h.conn.pending_out() <= limit + 64);

    h.conn.transport_mut().stalled = false;
    let errors = h.errors();
    assert_eq!(errors, vec![(DISPLAY_ID, ErrorCode::NoMemory as u32)]);
}
