//! Connection: buffer outbound, cursor inbound, dan Object Table per peer
//!
//! Outbound adalah antrian byte (append di tail lewat marshalling,
//! consume dari head lewat flush). Flush yang terpotong melanjutkan dari
//! offset persis yang belum terkirim, tanpa menyalin ulang byte yang sudah
//! terkirim. Inbound adalah buffer pre-allocated yang di-compact sebelum
//! setiap read, seperti read buffer biasa.
//!
//! Framing invariant: setelah `start_write`, hanya `buffer_put` untuk pesan
//! itu yang boleh masuk sampai payload yang dideklarasikan terpenuhi.

use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};

use tracing::{debug, warn};

use super::object_table::{IdAllocator, ObjectTable, Role};
use super::transport::Transport;
use crate::error::{ErrorCode, ProtocolError, Result, TransportError};
use crate::protocol::codec::{check_arg, payload_len, serialize, Arg, WireSink};
use crate::protocol::interfaces::{display, DISPLAY_ID};
use crate::protocol::message::{MessageHeader, MAX_MESSAGE_SIZE};

/// Default inbound buffer size; always large enough for one maximal message.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default cap on bytes queued for a peer that is not reading.
pub const MAX_OUTBOUND_BYTES: usize = 4 * 1024 * 1024;

/// Which end of the protocol this connection speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Menerima request, mengirim event
    Server,
    /// Mengirim request, menerima event
    Client,
}

pub struct Connection<T> {
    transport: T,
    side: Side,
    out: VecDeque<u8>,
    /// Lebih dari ini → `NoMemory`; error event sendiri tidak dibatasi
    max_outbound: usize,
    /// Payload bytes still owed to the message opened by `start_write`
    open_remaining: usize,
    read_buffer: Box<[u8]>,
    read_pos: usize,
    read_len: usize,
    objects: ObjectTable,
    ids: IdAllocator,
    closing: bool,
    faulted: bool,
    peer_closed: bool,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, side: Side, max_objects: usize) -> Self {
        Self::with_buffer_size(transport, side, max_objects, READ_BUFFER_SIZE)
    }

    pub fn with_buffer_size(
        transport: T,
        side: Side,
        max_objects: usize,
        read_buffer_size: usize,
    ) -> Self {
        let (display_role, ids) = match side {
            Side::Server => (Role::Display, IdAllocator::server()),
            Side::Client => (Role::Proxy, IdAllocator::client()),
        };
        Self {
            transport,
            side,
            out: VecDeque::with_capacity(4096),
            max_outbound: MAX_OUTBOUND_BYTES,
            open_remaining: 0,
            read_buffer: vec![0u8; read_buffer_size.max(MAX_MESSAGE_SIZE)].into_boxed_slice(),
            read_pos: 0,
            read_len: 0,
            objects: ObjectTable::new(max_objects, display_role),
            ids,
            closing: false,
            faulted: false,
            peer_closed: false,
        }
    }

    /// Override the outbound cap (minimum one maximal message).
    pub fn with_outbound_limit(mut self, limit: usize) -> Self {
        self.max_outbound = limit.max(MAX_MESSAGE_SIZE);
        self
    }

    #[inline(always)]
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[inline(always)]
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    #[inline(always)]
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }

    /// Allocate an id from this side's range.
    pub fn alloc_id(&mut self) -> Result<u32> {
        self.ids.alloc()
    }

    // ------------------------------------------------------------------
    // Outbound marshalling
    // ------------------------------------------------------------------

    fn fault(&mut self, reason: String) -> ProtocolError {
        self.faulted = true;
        ProtocolError::Malformed(reason)
    }

    /// Buffer a fresh header, reserving `header.payload_len()` bytes.
    pub fn start_write(&mut self, header: &MessageHeader) -> Result<()> {
        if self.faulted {
            return Err(ProtocolError::malformed("connection already faulted"));
        }
        if self.open_remaining != 0 {
            let owed = self.open_remaining;
            return Err(self.fault(format!(
                "new message for object {} started with {owed} payload bytes still owed",
                header.object_id
            )));
        }
        header.validate()?;
        self.out.extend(header.to_bytes());
        self.open_remaining = header.payload_len();
        Ok(())
    }

    /// Append raw payload bytes to the open message.
    pub fn buffer_put(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.open_remaining {
            let owed = self.open_remaining;
            return Err(self.fault(format!(
                "put of {} bytes exceeds the {owed} bytes declared",
                data.len()
            )));
        }
        self.out.extend(data);
        self.open_remaining -= data.len();
        Ok(())
    }

    /// Marshal a complete message from typed arguments.
    ///
    /// Gagal sebelum menyentuh buffer outbound kalau argumen tidak valid
    /// atau antrian sudah melewati batas (`NoMemory`).
    pub fn send_message(&mut self, object_id: u32, opcode: u16, args: &[Arg]) -> Result<()> {
        let header = MessageHeader::new(object_id, opcode, payload_len(args))?;
        if self.out.len() + header.total_size() > self.max_outbound {
            debug!(
                object_id,
                pending = self.out.len(),
                limit = self.max_outbound,
                "outbound queue full"
            );
            return Err(ProtocolError::NoMemory);
        }
        self.write_message(&header, args)
    }

    fn write_message(&mut self, header: &MessageHeader, args: &[Arg]) -> Result<()> {
        args.iter().try_for_each(check_arg)?;

        let mark = self.out.len();
        self.start_write(header)?;
        for arg in args {
            if let Err(e) = serialize(&mut *self, arg) {
                // Buang pesan setengah jadi; framing tetap utuh
                self.out.truncate(mark);
                self.open_remaining = 0;
                return Err(e);
            }
        }
        if self.open_remaining != 0 {
            let owed = self.open_remaining;
            return Err(self.fault(format!("message ended {owed} bytes short")));
        }
        Ok(())
    }

    /// Send `wth_display.error` and mark the connection for close once the
    /// error has been flushed. Only the first error is reported.
    pub fn post_error(&mut self, object_id: u32, code: ErrorCode, message: &str) {
        if self.closing {
            return;
        }
        warn!(object_id, code = ?code, reason = message, "posting protocol error");
        let args = [
            Arg::Object(object_id),
            Arg::Uint(code as u32),
            Arg::Str(message.to_owned()),
        ];
        let written = MessageHeader::new(DISPLAY_ID, display::event::ERROR, payload_len(&args))
            .and_then(|header| self.write_message(&header, &args));
        if let Err(e) = written {
            debug!(error = %e, "error event could not be marshalled");
        }
        self.closing = true;
    }

    /// Post the error matching a non-fatal `ProtocolError`.
    pub fn post_protocol_error(&mut self, err: &ProtocolError) {
        let code = err.code().unwrap_or(ErrorCode::Implementation);
        let object = err.object().unwrap_or(DISPLAY_ID);
        self.post_error(object, code, &err.to_string());
    }

    /// Bytes buffered but not yet accepted by the transport.
    #[inline(always)]
    pub fn pending_out(&self) -> usize {
        self.out.len()
    }

    /// Transfer as much outbound data as the transport accepts.
    ///
    /// Returns bytes still pending (0 = fully sent). Interruption diulang di
    /// sini; would-block bukan error, cukup dilaporkan lewat sisa pending.
    pub fn flush(&mut self) -> std::result::Result<usize, TransportError> {
        while !self.out.is_empty() {
            let (head, tail) = self.out.as_slices();
            let iov = [IoSlice::new(head), IoSlice::new(tail)];
            match self.transport.send_vectored(&iov) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => {
                    self.out.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => match TransportError::from_io(e) {
                    TransportError::WouldBlock => return Ok(self.out.len()),
                    fatal => return Err(fatal),
                },
            }
        }
        Ok(0)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Read available bytes into the inbound buffer.
    ///
    /// Returns bytes read (may be fewer than the free space). `WouldBlock`
    /// kalau tidak ada data sama sekali, `Closed` kalau peer sudah EOF dan
    /// tidak ada byte baru.
    pub fn read(&mut self) -> std::result::Result<usize, TransportError> {
        if self.peer_closed {
            return Err(TransportError::Closed);
        }

        // Compact buffer jika perlu
        if self.read_pos > 0 {
            self.read_buffer.copy_within(self.read_pos..self.read_len, 0);
            self.read_len -= self.read_pos;
            self.read_pos = 0;
        }

        let mut total = 0;
        while self.read_len < self.read_buffer.len() {
            let free = self.read_buffer.len() - self.read_len;
            let mut iov = [IoSliceMut::new(&mut self.read_buffer[self.read_len..])];
            match self.transport.recv_vectored(&mut iov) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    self.read_len += n;
                    total += n;
                    // Short read: kernel buffer sudah habis
                    if n < free {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => match TransportError::from_io(e) {
                    TransportError::WouldBlock if total > 0 => break,
                    err => return Err(err),
                },
            }
        }

        if total == 0 && self.peer_closed {
            return Err(TransportError::Closed);
        }
        Ok(total)
    }

    /// Received bytes not yet consumed by dispatch.
    #[inline(always)]
    pub fn inbound(&self) -> &[u8] {
        &self.read_buffer[self.read_pos..self.read_len]
    }

    #[inline(always)]
    pub fn consume(&mut self, n: usize) {
        self.read_pos += n.min(self.read_len - self.read_pos);
    }

    /// Split borrow used by the dispatcher: inbound bytes and object table.
    #[inline]
    pub(crate) fn inbound_and_objects(&self) -> (&[u8], &ObjectTable) {
        (&self.read_buffer[self.read_pos..self.read_len], &self.objects)
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// An error has been posted; close once outbound is drained.
    #[inline(always)]
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Framing broke while marshalling; nothing more may be sent.
    #[inline(always)]
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Peer sent EOF; remaining inbound bytes may still be dispatched.
    #[inline(always)]
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }
}

impl<T: Transport> WireSink for Connection<T> {
    #[inline]
    fn put(&mut self, data: &[u8]) -> Result<()> {
        self.buffer_put(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport yang menerima maksimal `chunk` byte per write
    struct Trickle {
        sent: Vec<u8>,
        chunk: usize,
        block_every_other: bool,
        calls: usize,
        incoming: VecDeque<u8>,
    }

    impl Trickle {
        fn new(chunk: usize) -> Self {
            Self {
                sent: Vec::new(),
                chunk,
                block_every_other: false,
                calls: 0,
                incoming: VecDeque::new(),
            }
        }
    }

    impl Transport for Trickle {
        fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
            self.calls += 1;
            if self.block_every_other && self.calls % 2 == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let mut budget = self.chunk;
            let mut n = 0;
            for buf in bufs {
                let take = buf.len().min(budget);
                self.sent.extend_from_slice(&buf[..take]);
                budget -= take;
                n += take;
            }
            Ok(n)
        }

        fn recv_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
            if self.incoming.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = bufs[0].len().min(self.incoming.len()).min(self.chunk);
            for (dst, src) in bufs[0].iter_mut().zip(self.incoming.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }
    }

    #[test]
    fn test_put_must_match_declared_size() {
        let mut conn = Connection::new(Trickle::new(64), Side::Server, 8);
        let header = MessageHeader::new(1, 0, 8).unwrap();
        conn.start_write(&header).unwrap();
        conn.buffer_put(&[1, 2, 3, 4]).unwrap();
        assert!(conn.buffer_put(&[0; 8]).is_err());
        assert!(conn.is_faulted());
    }

    #[test]
    fn test_start_write_inside_open_message_faults() {
        let mut conn = Connection::new(Trickle::new(64), Side::Server, 8);
        conn.start_write(&MessageHeader::new(1, 0, 4).unwrap()).unwrap();
        assert!(conn
            .start_write(&MessageHeader::new(1, 0, 4).unwrap())
            .is_err());
    }

    #[test]
    fn test_flush_resumes_at_unsent_offset() {
        let mut conn = Connection::new(Trickle::new(5), Side::Server, 8);
        conn.transport_mut().block_every_other = true;
        conn.send_message(1, 2, &[Arg::Uint(0xAABBCCDD), Arg::Str("hi".into())])
            .unwrap();
        let expected: Vec<u8> = conn.out.iter().copied().collect();

        let mut rounds = 0;
        while conn.flush().unwrap() != 0 {
            rounds += 1;
            assert!(rounds < 100);
        }
        assert_eq!(conn.transport().sent, expected);
        assert_eq!(conn.pending_out(), 0);
    }

    #[test]
    fn test_read_would_block_and_closed() {
        let mut conn = Connection::new(Trickle::new(3), Side::Server, 8);
        assert!(matches!(conn.read(), Err(TransportError::WouldBlock)));

        conn.transport_mut().incoming.extend([1, 2, 3, 4, 5, 6, 7]);
        let mut got = 0;
        while got < 7 {
            got += conn.read().unwrap();
        }
        assert_eq!(conn.inbound(), &[1, 2, 3, 4, 5, 6, 7]);
        conn.consume(4);
        assert_eq!(conn.inbound(), &[5, 6, 7]);
    }

    #[test]
    fn test_post_error_marks_closing_once() {
        let mut conn = Connection::new(Trickle::new(1024), Side::Server, 8);
        conn.post_error(2, ErrorCode::InvalidObject, "bind: unknown name 42");
        let first = conn.pending_out();
        conn.post_error(2, ErrorCode::InvalidObject, "second");
        assert!(conn.is_closing());
        assert_eq!(conn.pending_out(), first);
    }

    #[test]
    fn test_bad_string_leaves_outbound_untouched() {
        let mut conn = Connection::new(Trickle::new(1024), Side::Server, 8);
        let bad = [
            Arg::Uint(1),
            Arg::NewId(3),
            Arg::Str("a\0b".into()),
            Arg::Uint(1),
        ];
        assert!(matches!(
            conn.send_message(2, 1, &bad),
            Err(ProtocolError::Malformed(_))
        ));
        assert_eq!(conn.pending_out(), 0);
        assert!(!conn.is_faulted());

        // Pesan berikutnya tetap bisa ditulis dengan framing utuh
        conn.send_message(1, 2, &[Arg::Uint(7)]).unwrap();
        conn.flush().unwrap();
        assert_eq!(conn.transport().sent, vec![1, 0, 0, 0, 12, 0, 2, 0, 7, 0, 0, 0]);
    }

    #[test]
    fn test_outbound_limit_reports_no_memory() {
        let mut conn =
            Connection::new(Trickle::new(0), Side::Server, 8).with_outbound_limit(MAX_MESSAGE_SIZE);
        let mut sent = 0;
        loop {
            match conn.send_message(1, 2, &[Arg::Uint(sent)]) {
                Ok(()) => sent += 1,
                Err(e) => {
                    assert!(matches!(e, ProtocolError::NoMemory));
                    break;
                }
            }
        }
        assert_eq!(sent as usize, MAX_MESSAGE_SIZE / 12);
        assert_eq!(conn.pending_out(), sent as usize * 12);

        // Error event tetap masuk walau antrian penuh
        conn.post_protocol_error(&ProtocolError::NoMemory);
        assert!(conn.is_closing());
        assert!(conn.pending_out() > sent as usize * 12);
    }
}
