//! Object Table
//!
//! Mapping id → Object untuk satu connection. Lookup O(1) via HashMap.
//! Setiap object membawa `Role`: tag kapabilitas (interface mana yang
//! meng-handle request) plus handle ke state milik modul yang mem-bind-nya.

use std::collections::HashMap;

use crate::core::Handle;
use crate::error::{ProtocolError, Result};
use crate::protocol::interfaces::{Interface, DISPLAY_ID, WTH_DISPLAY};

/// Highest id a client may allocate.
pub const CLIENT_ID_MAX: u32 = 0xFEFF_FFFF;
/// First id of the server-allocated range.
pub const SERVER_ID_MIN: u32 = 0xFF00_0000;

#[inline(always)]
pub fn is_client_id(id: u32) -> bool {
    (1..=CLIENT_ID_MAX).contains(&id)
}

/// Capability tag of a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Id sudah dialokasikan dari argumen new_id, implementasi belum dipasang
    Pending,
    Display,
    Callback,
    Registry(Handle),
    Compositor(Handle),
    Region(Handle),
    /// Client-side stand-in for a server object
    Proxy,
}

#[derive(Debug, Clone)]
pub struct Object {
    pub id: u32,
    /// `None` hanya untuk object Pending dari bind (interface ditentukan runtime)
    pub interface: Option<&'static Interface>,
    pub version: u32,
    pub role: Role,
}

impl Object {
    pub fn interface_name(&self) -> &'static str {
        self.interface.map_or("<untyped>", |iface| iface.name)
    }
}

pub struct ObjectTable {
    objects: HashMap<u32, Object>,
    limit: usize,
}

impl ObjectTable {
    /// Table berisi display (id 1) saja, dengan batas `limit` object.
    pub fn new(limit: usize, display_role: Role) -> Self {
        let mut objects = HashMap::new();
        objects.insert(
            DISPLAY_ID,
            Object {
                id: DISPLAY_ID,
                interface: Some(&WTH_DISPLAY),
                version: WTH_DISPLAY.version,
                role: display_role,
            },
        );
        Self { objects, limit }
    }

    /// Resolve a dispatch target. Unknown or pending ids are protocol errors.
    pub fn lookup(&self, id: u32) -> Result<&Object> {
        match self.objects.get(&id) {
            Some(obj) if obj.role != Role::Pending => Ok(obj),
            _ => Err(ProtocolError::InvalidObject { id }),
        }
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&Object> {
        self.objects.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Object> {
        self.objects.get_mut(&id)
    }

    /// Reserve `id` as an untyped entry before its creating handler runs.
    pub fn insert_pending(
        &mut self,
        id: u32,
        interface: Option<&'static Interface>,
        version: u32,
    ) -> Result<()> {
        if id == 0 || self.objects.contains_key(&id) {
            return Err(ProtocolError::InvalidObject { id });
        }
        if self.objects.len() >= self.limit {
            return Err(ProtocolError::NoMemory);
        }
        self.objects.insert(
            id,
            Object {
                id,
                interface,
                version,
                role: Role::Pending,
            },
        );
        Ok(())
    }

    /// Install or replace the implementation bound to `id`.
    pub fn register(
        &mut self,
        id: u32,
        interface: &'static Interface,
        version: u32,
        role: Role,
    ) -> Result<()> {
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.interface = Some(interface);
            obj.version = version;
            obj.role = role;
            return Ok(());
        }
        if self.objects.len() >= self.limit {
            return Err(ProtocolError::NoMemory);
        }
        self.objects.insert(
            id,
            Object {
                id,
                interface: Some(interface),
                version,
                role,
            },
        );
        Ok(())
    }

    /// Hapus object. Idempotent: remove kedua untuk id yang sama → `None`.
    #[inline]
    pub fn remove(&mut self, id: u32) -> Option<Object> {
        self.objects.remove(&id)
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.objects.contains_key(&id)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every object; dipanggil saat connection teardown.
    pub fn clear(&mut self) -> Vec<Object> {
        self.objects.drain().map(|(_, obj)| obj).collect()
    }
}

/// Allocator for ids created on this side of the connection.
#[derive(Debug)]
pub struct IdAllocator {
    next: u32,
    last: u32,
}

impl IdAllocator {
    /// Client ids start right after the display.
    pub fn client() -> Self {
        Self {
            next: DISPLAY_ID + 1,
            last: CLIENT_ID_MAX,
        }
    }

    pub fn server() -> Self {
        Self {
            next: SERVER_ID_MIN,
            last: u32::MAX,
        }
    }

    pub fn alloc(&mut self) -> Result<u32> {
        if self.next > self.last || self.next == 0 {
            return Err(ProtocolError::NoMemory);
        }
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::interfaces::{WTHP_REGION, WTHP_REGISTRY};

    #[test]
    fn test_display_is_preinstalled() {
        let table = ObjectTable::new(16, Role::Display);
        let display = table.lookup(DISPLAY_ID).unwrap();
        assert_eq!(display.interface_name(), "wth_display");
        assert!(table.lookup(2).is_err());
    }

    #[test]
    fn test_pending_is_not_a_dispatch_target() {
        let mut table = ObjectTable::new(16, Role::Display);
        table.insert_pending(2, Some(&WTHP_REGISTRY), 1).unwrap();
        assert!(matches!(
            table.lookup(2),
            Err(ProtocolError::InvalidObject { id: 2 })
        ));
        table.register(2, &WTHP_REGISTRY, 1, Role::Callback).unwrap();
        assert_eq!(table.lookup(2).unwrap().role, Role::Callback);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut table = ObjectTable::new(16, Role::Display);
        assert!(table.insert_pending(DISPLAY_ID, None, 1).is_err());
        assert!(table.insert_pending(0, None, 1).is_err());
    }

    #[test]
    fn test_limit_reports_no_memory() {
        let mut table = ObjectTable::new(2, Role::Display);
        table.insert_pending(2, Some(&WTHP_REGION), 1).unwrap();
        assert!(matches!(
            table.insert_pending(3, Some(&WTHP_REGION), 1),
            Err(ProtocolError::NoMemory)
        ));
    }

    #[test]
    fn test_double_remove() {
        let mut table = ObjectTable::new(16, Role::Display);
        table.register(5, &WTHP_REGION, 1, Role::Callback).unwrap();
        assert!(table.remove(5).is_some());
        assert!(table.remove(5).is_none());
        assert!(table.lookup(5).is_err());
    }

    #[test]
    fn test_id_ranges_disjoint() {
        let mut client = IdAllocator::client();
        let mut server = IdAllocator::server();
        let c = client.alloc().unwrap();
        let s = server.alloc().unwrap();
        assert_eq!(c, 2);
        assert!(is_client_id(c));
        assert!(!is_client_id(s));
    }
}
