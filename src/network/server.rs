//! Waltham Server: single-threaded reactor di atas mio
//!
//! Satu `Poll`, satu thread. Setiap iterasi:
//! 1. Flush semua client (opportunistic); yang masih punya pending bytes
//!    watch READABLE | WRITABLE, sisanya READABLE saja
//! 2. Tunggu readiness (satu-satunya titik blocking)
//! 3. Jalankan callback sesuai urutan event yang dilaporkan
//!
//! Listener menerima maksimal satu connection per wake. Karena mio
//! edge-triggered, listener yang masih punya backlog ditandai `listener_ready`
//! dan poll berikutnya memakai timeout nol.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info, warn};

use super::client::{default_globals, Client, CloseReason, Resources};
use super::shutdown::Shutdown;
use super::transport::tune_stream;
use crate::config::ServerConfig;
use crate::protocol::registry::GlobalList;

const SERVER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const FIRST_CLIENT_TOKEN: usize = 2;

/// Error atau hangup di listener menghentikan reactor.
fn listener_failure_kind(is_error: bool, is_hangup: bool) -> Option<&'static str> {
    if is_error {
        Some("errored out")
    } else if is_hangup {
        Some("hung up")
    } else {
        None
    }
}

pub struct Server {
    poll: Poll,
    listener: TcpListener,
    clients: HashMap<Token, Client>,
    next_token: usize,
    globals: Rc<GlobalList<Resources>>,
    config: ServerConfig,
    shutdown: Shutdown,
    /// Listener mungkin masih punya backlog dari wake sebelumnya
    listener_ready: bool,
}

impl Server {
    /// Bind the listening socket with the reference globals.
    pub fn bind(config: ServerConfig) -> io::Result<Self> {
        Self::with_globals(config, default_globals())
    }

    pub fn with_globals(config: ServerConfig, globals: GlobalList<Resources>) -> io::Result<Self> {
        let poll = Poll::new()?;

        let mut listener = TcpListener::bind(config.bind_addr)?;
        poll.registry()
            .register(&mut listener, SERVER_TOKEN, Interest::READABLE)?;
        let shutdown = Shutdown::new(poll.registry(), WAKER_TOKEN)?;

        Ok(Self {
            poll,
            listener,
            clients: HashMap::with_capacity(config.max_clients.min(1024)),
            next_token: FIRST_CLIENT_TOKEN,
            globals: Rc::new(globals),
            config,
            shutdown,
            listener_ready: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops `run` from any thread.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    #[inline]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Run the reactor until shutdown is triggered.
    ///
    /// Hanya error setup/poll yang dikembalikan; error per client cukup
    /// menghancurkan client tersebut.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.config.events_capacity);

        info!(addr = %self.listener.local_addr()?, "waltham server listening");

        while !self.shutdown.is_triggered() {
            self.flush_clients();

            let timeout = self.listener_ready.then_some(Duration::ZERO);
            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            let mut accepted = false;
            let mut listener_failure = None;
            for event in events.iter() {
                match event.token() {
                    SERVER_TOKEN => {
                        if let Some(what) = listener_failure_kind(event.is_error(), event.is_read_closed()) {
                            listener_failure = Some(what);
                            break;
                        }
                        self.listener_ready = true;
                        if !accepted {
                            self.accept_one();
                            accepted = true;
                        }
                    }
                    WAKER_TOKEN => {}
                    token => self.client_event(token, event),
                }
            }
            if let Some(what) = listener_failure {
                error!(what, "listening socket failed, stopping");
                self.destroy_all();
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("listening socket {what}"),
                ));
            }
            if self.listener_ready && !accepted {
                self.accept_one();
            }
        }

        info!(clients = self.clients.len(), "shutting down");
        self.destroy_all();
        Ok(())
    }

    fn destroy_all(&mut self) {
        let tokens: Vec<Token> = self.clients.keys().copied().collect();
        for token in tokens {
            self.destroy_client(token, &CloseReason::Hangup);
        }
    }

    fn flush_clients(&mut self) {
        let mut doomed = Vec::new();
        let registry = self.poll.registry();

        for (token, client) in self.clients.iter_mut() {
            let result = client.flush().and_then(|_| {
                client
                    .update_interest(registry)
                    .map_err(|e| CloseReason::Transport(e.into()))
            });
            if let Err(reason) = result {
                doomed.push((*token, reason));
            }
        }

        for (token, reason) in doomed {
            self.destroy_client(token, &reason);
        }
    }

    /// Accept at most one pending connection.
    fn accept_one(&mut self) {
        match self.listener.accept() {
            Ok((stream, addr)) => self.add_client(stream, addr),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => self.listener_ready = false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                error!(error = %e, "accept failed");
                self.listener_ready = false;
            }
        }
    }

    fn add_client(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        if self.clients.len() >= self.config.max_clients {
            warn!(%addr, "max clients reached, rejecting");
            return;
        }
        if let Err(e) = tune_stream(&stream) {
            debug!(%addr, error = %e, "could not set TCP_NODELAY");
        }

        let token = Token(self.next_token);
        self.next_token += 1;

        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            error!(%addr, error = %e, "failed to register client");
            return;
        }

        let client = Client::new(token, addr, stream, Rc::clone(&self.globals), &self.config);
        self.clients.insert(token, client);
        info!(%addr, token = token.0, "client connected");
    }

    fn client_event(&mut self, token: Token, event: &mio::event::Event) {
        // Client bisa sudah dihancurkan oleh event sebelumnya di wake yang sama
        let Some(client) = self.clients.get_mut(&token) else {
            return;
        };
        if let Err(reason) = client.on_event(event, self.poll.registry()) {
            self.destroy_client(token, &reason);
        }
    }

    fn destroy_client(&mut self, token: Token, reason: &CloseReason) {
        let Some(mut client) = self.clients.remove(&token) else {
            return;
        };
        match reason {
            CloseReason::Transport(_) | CloseReason::Protocol(_) => {
                warn!(addr = %client.addr(), %reason, "dropping client")
            }
            _ => debug!(addr = %client.addr(), %reason, "dropping client"),
        }
        if let Err(e) = self.poll.registry().deregister(client.stream_mut()) {
            debug!(error = %e, "deregister failed");
        }
        client.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::mpsc;

    #[test]
    fn test_listener_failure_stops_reactor() {
        assert_eq!(listener_failure_kind(true, false), Some("errored out"));
        assert_eq!(listener_failure_kind(true, true), Some("errored out"));
        assert_eq!(listener_failure_kind(false, true), Some("hung up"));
        assert_eq!(listener_failure_kind(false, false), None);
    }

    #[test]
    fn test_shutdown_stops_run() {
        let (tx, rx) = mpsc::channel();
        let t = std::thread::spawn(move || {
            let mut server = Server::bind(ServerConfig::loopback()).unwrap();
            tx.send((server.local_addr().unwrap(), server.shutdown_handle()))
                .unwrap();
            server.run().unwrap();
            server.client_count()
        });
        let (addr, shutdown) = rx.recv().unwrap();

        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        // client_version(1) → server_version(1)
        stream
            .write_all(&[1, 0, 0, 0, 12, 0, 0, 0, 1, 0, 0, 0])
            .unwrap();
        let mut reply = [0u8; 12];
        stream.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [1, 0, 0, 0, 12, 0, 2, 0, 1, 0, 0, 0]);

        shutdown.trigger();
        assert_eq!(t.join().unwrap(), 0);
    }
}
