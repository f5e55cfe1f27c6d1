//! Registry Protocol: discovery dan bind untuk server globals
//!
//! Alur per connection:
//! ```text
//! INIT ──get_registry──▶ REGISTRY_BOUND ──global × N──▶ client
//!                              │
//!                              └─◀── bind(name, new_id, interface, version) × M
//! ```
//! Registry bukan gate: object hasil bind tetap hidup walaupun object
//! registry-nya sudah di-destroy, dan bind boleh diulang kapan saja.

use tracing::debug;

use super::codec::Arg;
use super::interfaces::{registry, Interface};
use crate::error::{ProtocolError, Result};
use crate::network::{Connection, Role, Transport};

/// Handshake progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryPhase {
    Init,
    RegistryBound,
}

/// Builds the concrete implementation for a freshly bound id and returns
/// the role to install on it.
pub type Constructor<C> = fn(&mut C, new_id: u32, version: u32) -> Result<Role>;

pub struct Global<C> {
    pub name: u32,
    pub interface: &'static Interface,
    pub version: u32,
    constructor: Constructor<C>,
}

/// Name → (interface, version, constructor) table shared by all clients.
pub struct GlobalList<C> {
    globals: Vec<Global<C>>,
    next_name: u32,
}

impl<C> Default for GlobalList<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> GlobalList<C> {
    pub fn new() -> Self {
        Self {
            globals: Vec::new(),
            next_name: 1,
        }
    }

    /// Register a global; names are handed out from 1 upwards.
    pub fn add(
        &mut self,
        interface: &'static Interface,
        version: u32,
        constructor: Constructor<C>,
    ) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        self.globals.push(Global {
            name,
            interface,
            version: version.min(interface.version),
            constructor,
        });
        name
    }

    pub fn get(&self, name: u32) -> Option<&Global<C>> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Global<C>> {
        self.globals.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.globals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    /// Kirim satu event `global` per entry ke registry `registry_id`.
    pub fn announce<T: Transport>(&self, conn: &mut Connection<T>, registry_id: u32) -> Result<()> {
        for global in &self.globals {
            conn.send_message(
                registry_id,
                registry::event::GLOBAL,
                &[
                    Arg::Uint(global.name),
                    Arg::Str(global.interface.name.to_owned()),
                    Arg::Uint(global.version),
                ],
            )?;
        }
        Ok(())
    }

    /// Check a bind request against the advertised globals.
    pub fn resolve(
        &self,
        registry_id: u32,
        name: u32,
        interface: &str,
        version: u32,
    ) -> Result<&Global<C>> {
        let bad = |reason: String| ProtocolError::BadGlobal {
            registry: registry_id,
            reason,
        };

        let global = self
            .get(name)
            .ok_or_else(|| bad(format!("unknown name {name}")))?;
        if global.interface.name != interface {
            return Err(bad(format!(
                "name {name} is {}, not {interface}",
                global.interface.name
            )));
        }
        if version == 0 || version > global.version {
            return Err(bad(format!(
                "invalid version {version} for {interface} (advertised {})",
                global.version
            )));
        }
        Ok(global)
    }

    /// Handle `wthp_registry.bind`: resolve, construct, install on `new_id`.
    pub fn bind<T: Transport>(
        &self,
        ctx: &mut C,
        conn: &mut Connection<T>,
        registry_id: u32,
        args: &[Arg],
    ) -> Result<u32> {
        let (name, new_id, interface, version) = match args {
            [Arg::Uint(name), Arg::NewId(id), Arg::Str(iface), Arg::Uint(version)] => {
                (*name, *id, iface.as_str(), *version)
            }
            _ => return Err(ProtocolError::malformed("bind arguments do not match signature")),
        };

        let global = self.resolve(registry_id, name, interface, version)?;
        let role = (global.constructor)(ctx, new_id, version)?;
        conn.objects_mut()
            .register(new_id, global.interface, version, role)?;

        debug!(
            registry_id,
            name,
            new_id,
            interface = global.interface.name,
            version,
            "global bound"
        );
        Ok(new_id)
    }
}
