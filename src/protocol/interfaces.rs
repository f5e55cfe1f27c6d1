//! Interface Tables
//!
//! Setiap interface adalah daftar request (client → server) dan event
//! (server → client) yang diindeks oleh opcode. Setiap pesan punya
//! signature berupa urutan `ArgType`; codec membaca/menulis payload
//! sesuai signature ini sehingga layout wire identik di kedua arah.

/// Argument type inside a message signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Uint,
    /// Reference to an existing object
    Object,
    /// Id for an object the receiver must create. `None` when the interface
    /// is only known at runtime (registry bind).
    NewId(Option<&'static str>),
    String,
    Array,
}

#[derive(Debug)]
pub struct MessageDesc {
    pub name: &'static str,
    pub signature: &'static [ArgType],
}

#[derive(Debug)]
pub struct Interface {
    pub name: &'static str,
    pub version: u32,
    pub requests: &'static [MessageDesc],
    pub events: &'static [MessageDesc],
}

impl Interface {
    #[inline]
    pub fn request(&self, opcode: u16) -> Option<&'static MessageDesc> {
        self.requests.get(opcode as usize)
    }

    #[inline]
    pub fn event(&self, opcode: u16) -> Option<&'static MessageDesc> {
        self.events.get(opcode as usize)
    }
}

impl PartialEq for Interface {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Interface {}

/// Object id of the display, implicitly live on both ends.
pub const DISPLAY_ID: u32 = 1;

pub mod display {
    pub mod request {
        pub const CLIENT_VERSION: u16 = 0;
        pub const SYNC: u16 = 1;
        pub const GET_REGISTRY: u16 = 2;
    }
    pub mod event {
        pub const ERROR: u16 = 0;
        pub const DELETE_ID: u16 = 1;
        pub const SERVER_VERSION: u16 = 2;
    }
}

pub mod registry {
    pub mod request {
        pub const DESTROY: u16 = 0;
        pub const BIND: u16 = 1;
    }
    pub mod event {
        pub const GLOBAL: u16 = 0;
        pub const GLOBAL_REMOVE: u16 = 1;
    }
}

pub mod compositor {
    pub mod request {
        pub const CREATE_SURFACE: u16 = 0;
        pub const CREATE_REGION: u16 = 1;
    }
}

pub mod region {
    pub mod request {
        pub const DESTROY: u16 = 0;
        pub const ADD: u16 = 1;
        pub const SUBTRACT: u16 = 2;
    }
}

pub mod callback {
    pub mod event {
        pub const DONE: u16 = 0;
    }
}

pub mod surface {
    pub mod request {
        pub const DESTROY: u16 = 0;
    }
}

use ArgType::*;

const RECT: &[ArgType] = &[Int, Int, Int, Int];

pub static WTH_DISPLAY: Interface = Interface {
    name: "wth_display",
    version: 1,
    requests: &[
        MessageDesc { name: "client_version", signature: &[Uint] },
        MessageDesc { name: "sync", signature: &[NewId(Some("wthp_callback"))] },
        MessageDesc { name: "get_registry", signature: &[NewId(Some("wthp_registry"))] },
    ],
    events: &[
        MessageDesc { name: "error", signature: &[Object, Uint, String] },
        MessageDesc { name: "delete_id", signature: &[Uint] },
        MessageDesc { name: "server_version", signature: &[Uint] },
    ],
};

pub static WTHP_REGISTRY: Interface = Interface {
    name: "wthp_registry",
    version: 1,
    requests: &[
        MessageDesc { name: "destroy", signature: &[] },
        MessageDesc { name: "bind", signature: &[Uint, NewId(None), String, Uint] },
    ],
    events: &[
        MessageDesc { name: "global", signature: &[Uint, String, Uint] },
        MessageDesc { name: "global_remove", signature: &[Uint] },
    ],
};

pub static WTHP_COMPOSITOR: Interface = Interface {
    name: "wthp_compositor",
    version: 4,
    requests: &[
        MessageDesc { name: "create_surface", signature: &[NewId(Some("wthp_surface"))] },
        MessageDesc { name: "create_region", signature: &[NewId(Some("wthp_region"))] },
    ],
    events: &[],
};

pub static WTHP_REGION: Interface = Interface {
    name: "wthp_region",
    version: 1,
    requests: &[
        MessageDesc { name: "destroy", signature: &[] },
        MessageDesc { name: "add", signature: RECT },
        MessageDesc { name: "subtract", signature: RECT },
    ],
    events: &[],
};

pub static WTHP_SURFACE: Interface = Interface {
    name: "wthp_surface",
    version: 1,
    requests: &[MessageDesc { name: "destroy", signature: &[] }],
    events: &[],
};

pub static WTHP_CALLBACK: Interface = Interface {
    name: "wthp_callback",
    version: 1,
    requests: &[],
    events: &[MessageDesc { name: "done", signature: &[Uint] }],
};

static ALL: [&Interface; 6] = [
    &WTH_DISPLAY,
    &WTHP_REGISTRY,
    &WTHP_COMPOSITOR,
    &WTHP_REGION,
    &WTHP_SURFACE,
    &WTHP_CALLBACK,
];

/// Resolve an interface by its wire name.
pub fn lookup(name: &str) -> Option<&'static Interface> {
    ALL.iter().copied().find(|iface| iface.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("wthp_compositor").map(|i| i.version), Some(4));
        assert!(lookup("bogus_iface").is_none());
    }

    #[test]
    fn test_new_id_targets_resolve() {
        for iface in ALL {
            for msg in iface.requests.iter().chain(iface.events) {
                for ty in msg.signature {
                    if let NewId(Some(target)) = ty {
                        assert!(lookup(target).is_some(), "{}.{}", iface.name, msg.name);
                    }
                }
            }
        }
    }

    #[test]
    fn test_opcode_constants_match_tables() {
        assert_eq!(
            WTH_DISPLAY.request(display::request::GET_REGISTRY).unwrap().name,
            "get_registry"
        );
        assert_eq!(WTHP_REGISTRY.request(registry::request::BIND).unwrap().name, "bind");
        assert_eq!(
            WTHP_COMPOSITOR
                .request(compositor::request::CREATE_REGION)
                .unwrap()
                .name,
            "create_region"
        );
        assert!(WTHP_REGION.request(3).is_none());
    }
}
