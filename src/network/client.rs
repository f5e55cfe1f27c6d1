//! Client: satu Connection plus object yang dikelompokkan per jenis
//!
//! Object table memegang id → Role, sedangkan state milik tiap jenis object
//! (registry, compositor, region) disimpan di arena per client. Role membawa
//! handle ke arena, jadi tidak ada pointer balik dan tidak ada siklus.
//!
//! Teardown urut: region, compositor, registry, lalu sisa object table.
//! Destroy selalu lepas dari arena dulu, jadi destroy eksplisit yang
//! diikuti sweep teardown tidak pernah membebaskan dua kali.

use std::net::SocketAddr;
use std::rc::Rc;

use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use tracing::{debug, info};

use super::connection::{Connection, Side};
use super::object_table::{is_client_id, Role};
use super::transport::Transport;
use crate::config::ServerConfig;
use crate::core::{Arena, Handle};
use crate::error::{ErrorCode, ProtocolError, Result, TransportError};
use crate::protocol::codec::Arg;
use crate::protocol::dispatcher::{dispatch, Message, MessageHandler};
use crate::protocol::interfaces::{
    callback, compositor, display, region, registry, DISPLAY_ID, WTHP_COMPOSITOR,
    WTHP_REGION, WTHP_REGISTRY,
};
use crate::protocol::registry::{GlobalList, RegistryPhase};

/// Version announced in `wth_display.server_version`.
pub const SERVER_VERSION: u32 = 1;

#[derive(Debug)]
pub struct RegistryState {
    pub id: u32,
}

#[derive(Debug)]
pub struct CompositorState {
    pub id: u32,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOp {
    Add(Rect),
    Subtract(Rect),
}

#[derive(Debug)]
pub struct RegionState {
    pub id: u32,
    /// Compositor yang membuat region ini (bisa sudah mati)
    pub compositor: Handle,
    pub ops: Vec<RegionOp>,
}

/// Per-client object groups plus handshake state.
pub struct Resources {
    globals: Rc<GlobalList<Resources>>,
    pub registries: Arena<RegistryState>,
    pub compositors: Arena<CompositorState>,
    pub regions: Arena<RegionState>,
    sync_serial: u32,
    phase: RegistryPhase,
}

/// Globals advertised by the reference server.
pub fn default_globals() -> GlobalList<Resources> {
    let mut globals = GlobalList::new();
    globals.add(&WTHP_COMPOSITOR, WTHP_COMPOSITOR.version, bind_compositor);
    globals
}

fn bind_compositor(res: &mut Resources, id: u32, version: u32) -> Result<Role> {
    let handle = res.compositors.insert(CompositorState { id, version });
    Ok(Role::Compositor(handle))
}

impl Resources {
    pub fn new(globals: Rc<GlobalList<Resources>>) -> Self {
        Self {
            globals,
            registries: Arena::new(),
            compositors: Arena::new(),
            regions: Arena::new(),
            sync_serial: 0,
            phase: RegistryPhase::Init,
        }
    }

    #[inline]
    pub fn phase(&self) -> RegistryPhase {
        self.phase
    }

    /// Remove `id` and release its role state. Second call is a no-op.
    pub fn destroy_object<T: Transport>(&mut self, conn: &mut Connection<T>, id: u32) -> Result<()> {
        let Some(obj) = conn.objects_mut().remove(id) else {
            return Ok(());
        };
        self.release(obj.role);
        debug!(id, interface = obj.interface_name(), "object destroyed");

        if is_client_id(id) {
            conn.send_message(DISPLAY_ID, display::event::DELETE_ID, &[Arg::Uint(id)])?;
        }
        Ok(())
    }

    fn release(&mut self, role: Role) {
        match role {
            Role::Registry(h) => {
                self.registries.remove(h);
            }
            Role::Compositor(h) => {
                self.compositors.remove(h);
            }
            Role::Region(h) => {
                self.regions.remove(h);
            }
            _ => {}
        }
    }

    /// Destroy every object of the connection; returns how many were dropped.
    pub fn teardown<T: Transport>(&mut self, conn: &mut Connection<T>) -> usize {
        let mut dropped = 0;

        for h in self.regions.handles() {
            if let Some(region) = self.regions.remove(h) {
                conn.objects_mut().remove(region.id);
                dropped += 1;
            }
        }
        for h in self.compositors.handles() {
            if let Some(comp) = self.compositors.remove(h) {
                conn.objects_mut().remove(comp.id);
                dropped += 1;
            }
        }
        for h in self.registries.handles() {
            if let Some(reg) = self.registries.remove(h) {
                conn.objects_mut().remove(reg.id);
                dropped += 1;
            }
        }

        // Display, callback, dan pending yang tersisa
        dropped + conn.objects_mut().clear().len()
    }

    fn display_request<T: Transport>(&mut self, conn: &mut Connection<T>, msg: Message) -> Result<()> {
        match msg.opcode {
            display::request::CLIENT_VERSION => {
                debug!(version = msg.uint(0)?, "client version");
                conn.send_message(
                    DISPLAY_ID,
                    display::event::SERVER_VERSION,
                    &[Arg::Uint(SERVER_VERSION)],
                )
            }
            display::request::SYNC => {
                let id = msg.uint(0)?;
                self.sync_serial = self.sync_serial.wrapping_add(1);
                conn.send_message(id, callback::event::DONE, &[Arg::Uint(self.sync_serial)])?;
                self.destroy_object(conn, id)
            }
            display::request::GET_REGISTRY => {
                let id = msg.uint(0)?;
                let handle = self.registries.insert(RegistryState { id });
                if let Err(e) = conn
                    .objects_mut()
                    .register(id, &WTHP_REGISTRY, WTHP_REGISTRY.version, Role::Registry(handle))
                {
                    self.registries.remove(handle);
                    return Err(e);
                }
                self.phase = RegistryPhase::RegistryBound;
                debug!(id, "registry bound");
                self.globals.announce(conn, id)
            }
            opcode => Err(ProtocolError::InvalidMethod {
                object: msg.object.id,
                opcode,
            }),
        }
    }

    fn registry_request<T: Transport>(&mut self, conn: &mut Connection<T>, msg: Message) -> Result<()> {
        match msg.opcode {
            registry::request::DESTROY => self.destroy_object(conn, msg.object.id),
            registry::request::BIND => {
                let globals = Rc::clone(&self.globals);
                globals.bind(self, conn, msg.object.id, &msg.args)?;
                Ok(())
            }
            opcode => Err(ProtocolError::InvalidMethod {
                object: msg.object.id,
                opcode,
            }),
        }
    }

    fn compositor_request<T: Transport>(
        &mut self,
        conn: &mut Connection<T>,
        owner: Handle,
        msg: Message,
    ) -> Result<()> {
        match msg.opcode {
            compositor::request::CREATE_SURFACE => {
                conn.post_error(
                    msg.object.id,
                    ErrorCode::InvalidObject,
                    "unimplemented: create_surface",
                );
                Ok(())
            }
            compositor::request::CREATE_REGION => {
                let id = msg.uint(0)?;
                let handle = self.regions.insert(RegionState {
                    id,
                    compositor: owner,
                    ops: Vec::new(),
                });
                if let Err(e) = conn
                    .objects_mut()
                    .register(id, &WTHP_REGION, WTHP_REGION.version, Role::Region(handle))
                {
                    self.regions.remove(handle);
                    return Err(e);
                }
                debug!(id, compositor = msg.object.id, "region created");
                Ok(())
            }
            opcode => Err(ProtocolError::InvalidMethod {
                object: msg.object.id,
                opcode,
            }),
        }
    }

    fn region_request<T: Transport>(
        &mut self,
        conn: &mut Connection<T>,
        handle: Handle,
        msg: Message,
    ) -> Result<()> {
        let rect = |msg: &Message| -> Result<Rect> {
            Ok(Rect {
                x: msg.int(0)?,
                y: msg.int(1)?,
                width: msg.int(2)?,
                height: msg.int(3)?,
            })
        };
        let op = match msg.opcode {
            region::request::DESTROY => return self.destroy_object(conn, msg.object.id),
            region::request::ADD => RegionOp::Add(rect(&msg)?),
            region::request::SUBTRACT => RegionOp::Subtract(rect(&msg)?),
            opcode => {
                return Err(ProtocolError::InvalidMethod {
                    object: msg.object.id,
                    opcode,
                })
            }
        };

        debug!(id = msg.object.id, ?op, "region updated");
        if let Some(region) = self.regions.get_mut(handle) {
            region.ops.push(op);
        }
        Ok(())
    }
}

impl<T: Transport> MessageHandler<T> for Resources {
    fn handle(&mut self, conn: &mut Connection<T>, msg: Message) -> Result<()> {
        match msg.object.role {
            Role::Display => self.display_request(conn, msg),
            Role::Registry(_) => self.registry_request(conn, msg),
            Role::Compositor(h) => self.compositor_request(conn, h, msg),
            Role::Region(h) => self.region_request(conn, h, msg),
            Role::Callback | Role::Proxy | Role::Pending => {
                Err(ProtocolError::InvalidMethod {
                    object: msg.object.id,
                    opcode: msg.opcode,
                })
            }
        }
    }
}

/// Why the reactor is dropping a client.
#[derive(Debug)]
pub enum CloseReason {
    Hangup,
    PeerClosed,
    /// Protocol error sudah di-post dan ter-flush
    ErrorPosted,
    Transport(TransportError),
    Protocol(ProtocolError),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Hangup => f.write_str("hangup"),
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::ErrorPosted => f.write_str("protocol error posted"),
            CloseReason::Transport(e) => write!(f, "{e}"),
            CloseReason::Protocol(e) => write!(f, "{e}"),
        }
    }
}

/// Watch set of one client: READABLE, plus WRITABLE while output is pending.
#[derive(Debug, Default)]
pub struct OutputWatch {
    watching_output: bool,
}

impl OutputWatch {
    /// Interest to re-register with, or `None` when nothing changes.
    pub fn update(&mut self, pending_out: usize) -> Option<Interest> {
        let want_output = pending_out > 0;
        if want_output == self.watching_output {
            return None;
        }
        self.watching_output = want_output;
        Some(if want_output {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        })
    }

    #[inline]
    pub fn watching_output(&self) -> bool {
        self.watching_output
    }

    // Reregister gagal: poll masih memakai watch set lama
    fn revert(&mut self) {
        self.watching_output = !self.watching_output;
    }
}

/// Server-side peer: connection, object groups, and the current watch set.
pub struct Client {
    token: Token,
    addr: SocketAddr,
    conn: Connection<TcpStream>,
    resources: Resources,
    watch: OutputWatch,
}

impl Client {
    pub fn new(
        token: Token,
        addr: SocketAddr,
        stream: TcpStream,
        globals: Rc<GlobalList<Resources>>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            token,
            addr,
            conn: Connection::with_buffer_size(
                stream,
                Side::Server,
                config.max_objects_per_client,
                config.read_buffer_size,
            )
            .with_outbound_limit(config.max_outbound_bytes),
            resources: Resources::new(globals),
            watch: OutputWatch::default(),
        }
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connection(&self) -> &Connection<TcpStream> {
        &self.conn
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        self.conn.transport_mut()
    }

    /// Read and dispatch until the socket would block.
    fn process_input(&mut self) -> std::result::Result<(), CloseReason> {
        loop {
            match self.conn.read() {
                Ok(0) => break,
                Ok(_) => {}
                Err(TransportError::WouldBlock) | Err(TransportError::Closed) => break,
                Err(e) => return Err(CloseReason::Transport(e)),
            }
            if self.conn.is_closing() {
                // Request setelah error diabaikan, tapi tetap dikuras
                let n = self.conn.inbound().len();
                self.conn.consume(n);
                continue;
            }
            dispatch(&mut self.conn, &mut self.resources).map_err(CloseReason::Protocol)?;
        }
        Ok(())
    }

    /// Opportunistic flush; `Err` kalau client harus ditutup.
    pub fn flush(&mut self) -> std::result::Result<usize, CloseReason> {
        let pending = self.conn.flush().map_err(CloseReason::Transport)?;
        if pending == 0 && self.conn.is_closing() {
            return Err(CloseReason::ErrorPosted);
        }
        Ok(pending)
    }

    /// Watch output only while bytes are pending.
    pub fn update_interest(&mut self, registry: &Registry) -> std::io::Result<()> {
        let Some(interest) = self.watch.update(self.conn.pending_out()) else {
            return Ok(());
        };
        let token = self.token;
        if let Err(e) = registry.reregister(self.conn.transport_mut(), token, interest) {
            self.watch.revert();
            return Err(e);
        }
        Ok(())
    }

    /// Per-connection reactor callback.
    pub fn on_event(
        &mut self,
        event: &Event,
        registry: &Registry,
    ) -> std::result::Result<(), CloseReason> {
        if event.is_error() || (event.is_read_closed() && event.is_write_closed()) {
            return Err(CloseReason::Hangup);
        }

        if event.is_writable() {
            self.flush()?;
        }

        if event.is_readable() {
            self.process_input()?;
            if self.conn.peer_closed() {
                return Err(CloseReason::PeerClosed);
            }
            if self.conn.is_closing() {
                self.flush()?;
            }
        }

        self.update_interest(registry)
            .map_err(|e| CloseReason::Transport(TransportError::Io(e)))
    }

    /// Destroy every object; the connection itself is dropped with `self`.
    pub fn teardown(mut self) {
        let dropped = self.resources.teardown(&mut self.conn);
        info!(addr = %self.addr, token = self.token.0, objects = dropped, "client destroyed");
    }
}
