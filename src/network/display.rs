//! RemoteDisplay: client library di atas Connection yang sama
//!
//! Dipakai oleh `waltham_client` dan test. Socket blocking biasa: `flush`
//! menulis sampai habis, `dispatch_events` membaca sekali lalu decode
//! semua event lengkap. Setiap object yang dibuat client dicatat sebagai
//! proxy di object table-nya sendiri supaya event bisa di-decode.

use std::net::{SocketAddr, TcpStream};

use tracing::debug;

use super::connection::{Connection, Side};
use super::object_table::Role;
use crate::error::{ProtocolError, Result, TransportError};
use crate::protocol::codec::Arg;
use crate::protocol::dispatcher::{dispatch, Message, MessageHandler};
use crate::protocol::interfaces::{
    callback, compositor, display, region, registry, Interface, DISPLAY_ID, WTHP_CALLBACK,
    WTHP_REGION, WTHP_REGISTRY,
};

/// Event received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Global {
        registry: u32,
        name: u32,
        interface: String,
        version: u32,
    },
    GlobalRemove {
        registry: u32,
        name: u32,
    },
    Done {
        callback: u32,
        serial: u32,
    },
    DeleteId(u32),
    ServerVersion(u32),
}

#[derive(Default)]
struct EventQueue {
    events: Vec<Event>,
}

impl MessageHandler<TcpStream> for EventQueue {
    fn handle(&mut self, conn: &mut Connection<TcpStream>, msg: Message) -> Result<()> {
        let object = msg.object.id;
        let event = match (msg.object.interface_name(), msg.opcode) {
            ("wth_display", display::event::ERROR) => {
                return Err(ProtocolError::Remote {
                    object: msg.uint(0)?,
                    code: msg.uint(1)?,
                    message: msg.args.get(2).and_then(Arg::as_str).unwrap_or("").to_owned(),
                });
            }
            ("wth_display", display::event::DELETE_ID) => {
                let id = msg.uint(0)?;
                conn.objects_mut().remove(id);
                Event::DeleteId(id)
            }
            ("wth_display", display::event::SERVER_VERSION) => Event::ServerVersion(msg.uint(0)?),
            ("wthp_registry", registry::event::GLOBAL) => Event::Global {
                registry: object,
                name: msg.uint(0)?,
                interface: msg.args.get(1).and_then(Arg::as_str).unwrap_or("").to_owned(),
                version: msg.uint(2)?,
            },
            ("wthp_registry", registry::event::GLOBAL_REMOVE) => Event::GlobalRemove {
                registry: object,
                name: msg.uint(0)?,
            },
            ("wthp_callback", callback::event::DONE) => Event::Done {
                callback: object,
                serial: msg.uint(0)?,
            },
            (_, opcode) => return Err(ProtocolError::InvalidMethod { object, opcode }),
        };
        debug!(?event, "event received");
        self.events.push(event);
        Ok(())
    }
}

/// Client end of a connection to a Waltham server.
pub struct RemoteDisplay {
    conn: Connection<TcpStream>,
    queue: EventQueue,
}

impl RemoteDisplay {
    pub fn connect(addr: SocketAddr, max_objects: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(TransportError::from_io)?;
        stream.set_nodelay(true).map_err(TransportError::from_io)?;
        Ok(Self::from_stream(stream, max_objects))
    }

    pub fn from_stream(stream: TcpStream, max_objects: usize) -> Self {
        Self {
            conn: Connection::new(stream, Side::Client, max_objects),
            queue: EventQueue::default(),
        }
    }

    pub fn connection(&self) -> &Connection<TcpStream> {
        &self.conn
    }

    fn new_proxy(&mut self, interface: &'static Interface, version: u32) -> Result<u32> {
        let id = self.conn.alloc_id()?;
        self.conn
            .objects_mut()
            .register(id, interface, version, Role::Proxy)?;
        Ok(id)
    }

    pub fn client_version(&mut self, version: u32) -> Result<()> {
        self.conn.send_message(
            DISPLAY_ID,
            display::request::CLIENT_VERSION,
            &[Arg::Uint(version)],
        )
    }

    pub fn get_registry(&mut self) -> Result<u32> {
        let id = self.new_proxy(&WTHP_REGISTRY, WTHP_REGISTRY.version)?;
        self.conn.send_message(
            DISPLAY_ID,
            display::request::GET_REGISTRY,
            &[Arg::NewId(id)],
        )?;
        Ok(id)
    }

    /// Bind global `name` as `interface`; returns the new proxy id.
    pub fn bind(
        &mut self,
        registry_id: u32,
        name: u32,
        interface: &'static Interface,
        version: u32,
    ) -> Result<u32> {
        let id = self.new_proxy(interface, version)?;
        self.bind_raw(registry_id, name, id, interface.name, version)?;
        Ok(id)
    }

    /// Send a bind request verbatim, without creating a proxy.
    pub fn bind_raw(
        &mut self,
        registry_id: u32,
        name: u32,
        new_id: u32,
        interface: &str,
        version: u32,
    ) -> Result<()> {
        self.conn.send_message(
            registry_id,
            registry::request::BIND,
            &[
                Arg::Uint(name),
                Arg::NewId(new_id),
                Arg::Str(interface.to_owned()),
                Arg::Uint(version),
            ],
        )
    }

    pub fn create_region(&mut self, compositor_id: u32) -> Result<u32> {
        let id = self.new_proxy(&WTHP_REGION, WTHP_REGION.version)?;
        self.conn.send_message(
            compositor_id,
            compositor::request::CREATE_REGION,
            &[Arg::NewId(id)],
        )?;
        Ok(id)
    }

    pub fn region_add(&mut self, region_id: u32, x: i32, y: i32, width: i32, height: i32) -> Result<()> {
        self.conn.send_message(
            region_id,
            region::request::ADD,
            &[Arg::Int(x), Arg::Int(y), Arg::Int(width), Arg::Int(height)],
        )
    }

    pub fn region_subtract(
        &mut self,
        region_id: u32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<()> {
        self.conn.send_message(
            region_id,
            region::request::SUBTRACT,
            &[Arg::Int(x), Arg::Int(y), Arg::Int(width), Arg::Int(height)],
        )
    }

    /// Send `destroy` to a proxy whose interface has one.
    ///
    /// Proxy tetap ada sampai server mengirim `delete_id`.
    pub fn destroy(&mut self, id: u32) -> Result<()> {
        let obj = self.conn.objects().lookup(id)?;
        let opcode = obj
            .interface
            .and_then(|iface| iface.requests.iter().position(|r| r.name == "destroy"))
            .ok_or(ProtocolError::InvalidMethod { object: id, opcode: 0 })?;
        self.conn.send_message(id, opcode as u16, &[])
    }

    /// Request a callback; the server answers `done` once everything
    /// sent before it has been processed.
    pub fn sync(&mut self) -> Result<u32> {
        let id = self.new_proxy(&WTHP_CALLBACK, WTHP_CALLBACK.version)?;
        self.conn
            .send_message(DISPLAY_ID, display::request::SYNC, &[Arg::NewId(id)])?;
        Ok(id)
    }

    /// Write every buffered request.
    pub fn flush(&mut self) -> Result<()> {
        // Socket blocking: flush hanya berhenti saat buffer kosong
        while self.conn.flush()? != 0 {}
        Ok(())
    }

    /// Block for one read, then dispatch every complete event.
    pub fn dispatch_events(&mut self) -> Result<usize> {
        self.conn.read()?;
        dispatch(&mut self.conn, &mut self.queue)
    }

    /// Flush, then wait until the server has processed everything sent so
    /// far. Returns the events received meanwhile.
    pub fn roundtrip(&mut self) -> Result<Vec<Event>> {
        let callback = self.sync()?;
        self.flush()?;
        loop {
            self.dispatch_events()?;
            let done = self
                .queue
                .events
                .iter()
                .any(|e| matches!(e, Event::Done { callback: id, .. } if *id == callback));
            if done {
                return Ok(self.take_events());
            }
        }
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.queue.events)
    }

    /// Proxy ids currently live on this end (display included).
    pub fn live_ids(&self) -> Vec<u32> {
        self.conn.objects().ids()
    }
}
