//! Dispatcher: inbound bytes → (object, opcode) → handler
//!
//! Decode sebanyak mungkin pesan lengkap yang sudah ada di buffer. Pesan
//! yang belum lengkap dibiarkan utuh untuk read berikutnya. Target yang
//! tidak dikenal atau opcode di luar interface menghasilkan protocol error
//! ke peer (bukan panic, bukan drop diam-diam), lalu connection ditandai
//! untuk ditutup setelah error ter-flush.

use tracing::{debug, trace};

use super::codec::{split_message, Arg, Decoder};
use super::interfaces::{self, ArgType, MessageDesc};
use crate::error::{ProtocolError, Result};
use crate::network::object_table::{is_client_id, Object, Role};
use crate::network::{Connection, Side, Transport};

/// A decoded message bound to its target object.
#[derive(Debug, Clone)]
pub struct Message {
    /// Snapshot of the target at dispatch time
    pub object: Object,
    pub opcode: u16,
    pub desc: &'static MessageDesc,
    pub args: Vec<Arg>,
}

impl Message {
    pub fn uint(&self, index: usize) -> Result<u32> {
        self.args
            .get(index)
            .and_then(Arg::as_uint)
            .ok_or_else(|| self.bad_arg(index))
    }

    pub fn int(&self, index: usize) -> Result<i32> {
        self.args
            .get(index)
            .and_then(Arg::as_int)
            .ok_or_else(|| self.bad_arg(index))
    }

    fn bad_arg(&self, index: usize) -> ProtocolError {
        ProtocolError::malformed(format!(
            "{}.{}: argument {index} missing or mistyped",
            self.object.interface_name(),
            self.desc.name
        ))
    }
}

/// Capability seam: one polymorphic call per dispatched message.
pub trait MessageHandler<T> {
    fn handle(&mut self, conn: &mut Connection<T>, msg: Message) -> Result<()>;
}

/// Outer error = framing is broken (fatal). Inner error = the message was
/// well-formed but must be rejected.
type Decoded = (usize, Result<Message>);

fn decode_next<T: Transport>(conn: &Connection<T>) -> Result<Option<Decoded>> {
    let side = conn.side();
    let (inbound, objects) = conn.inbound_and_objects();
    let Some((header, payload)) = split_message(inbound)? else {
        return Ok(None);
    };
    let total = header.total_size();

    let object = match objects.lookup(header.object_id) {
        Ok(obj) => obj.clone(),
        Err(e) => return Ok(Some((total, Err(e)))),
    };
    let Some(interface) = object.interface else {
        return Ok(Some((total, Err(ProtocolError::InvalidObject { id: object.id }))));
    };
    let table = match side {
        Side::Server => interface.requests,
        Side::Client => interface.events,
    };
    let Some(desc) = table.get(header.opcode as usize) else {
        let err = ProtocolError::InvalidMethod {
            object: object.id,
            opcode: header.opcode,
        };
        return Ok(Some((total, Err(err))));
    };

    let args = Decoder::new(payload).deserialize_all(desc.signature)?;
    Ok(Some((
        total,
        Ok(Message {
            object,
            opcode: header.opcode,
            desc,
            args,
        }),
    )))
}

/// Allocate entries for every new_id argument before the handler runs, so
/// the handler installs its implementation with no untyped window.
fn reserve_new_ids<T: Transport>(conn: &mut Connection<T>, msg: &Message) -> Result<Vec<u32>> {
    let mut reserved = Vec::new();
    for (ty, arg) in msg.desc.signature.iter().zip(&msg.args) {
        let (ArgType::NewId(target), Arg::NewId(id)) = (ty, arg) else {
            continue;
        };
        let interface = target.and_then(interfaces::lookup);
        let version = interface.map_or(msg.object.version, |iface| {
            iface.version.min(msg.object.version)
        });

        let result = if conn.side() == Side::Server && !is_client_id(*id) {
            Err(ProtocolError::InvalidObject { id: *id })
        } else {
            conn.objects_mut().insert_pending(*id, interface, version)
        };
        if let Err(e) = result {
            for id in reserved {
                conn.objects_mut().remove(id);
            }
            return Err(e);
        }
        reserved.push(*id);
    }
    Ok(reserved)
}

fn invoke<T, H>(conn: &mut Connection<T>, handler: &mut H, msg: Message) -> Result<()>
where
    T: Transport,
    H: MessageHandler<T> + ?Sized,
{
    trace!(
        object_id = msg.object.id,
        "{}.{}({:?})",
        msg.object.interface_name(),
        msg.desc.name,
        msg.args
    );

    let reserved = reserve_new_ids(conn, &msg)?;
    let result = handler.handle(conn, msg);

    // Id yang tidak dipasangi implementasi oleh handler dibuang lagi
    for id in reserved {
        let still_pending = conn
            .objects()
            .get(id)
            .is_some_and(|obj| obj.role == Role::Pending);
        if still_pending {
            debug!(id, "dropping new id left without implementation");
            conn.objects_mut().remove(id);
        }
    }
    result
}

/// Dispatch every complete message currently buffered on `conn`.
///
/// Returns the number of messages handled. `Err` hanya untuk kegagalan
/// fatal (framing rusak, transport mati); caller harus menutup connection.
/// Di sisi client, protocol error juga dikembalikan sebagai `Err`.
pub fn dispatch<T, H>(conn: &mut Connection<T>, handler: &mut H) -> Result<usize>
where
    T: Transport,
    H: MessageHandler<T> + ?Sized,
{
    let mut dispatched = 0;

    while !conn.is_closing() {
        let Some((total, decoded)) = decode_next(conn)? else {
            break;
        };
        conn.consume(total);

        match decoded.and_then(|msg| invoke(conn, handler, msg)) {
            Ok(()) => dispatched += 1,
            Err(e) if e.is_fatal_to_connection() => return Err(e),
            Err(e) => match conn.side() {
                Side::Server => conn.post_protocol_error(&e),
                Side::Client => return Err(e),
            },
        }

        if conn.is_faulted() {
            return Err(ProtocolError::malformed("outbound framing broken by handler"));
        }
    }

    Ok(dispatched)
}
