use tracing::{debug, trace, warn};

use crate::error::{PortmeshError, Result};
use crate::types::{validate_serial, PortSet, PortType, Widget, WidgetConnections};

use super::backend::{atomically, KvBackend, KvTransaction};
use super::dedup::{dedup_latest, RawConnections};
use super::memory::MemoryBackend;
use super::FastStore;

/// List holding owner serial numbers whose connections changed.
pub const PENDING_UPDATES_KEY: &str = "recently_updated_widgets";

const WIDGET_FIELD_ID: &str = "id";
const WIDGET_FIELD_NAME: &str = "name";
const WIDGET_FIELD_PORTS: &str = "ports";

fn connections_key(serial: &str) -> String {
    format!("c:{serial}")
}

fn widget_key(serial: &str) -> String {
    format!("w:{serial}")
}

/// The write-behind connection cache, usable on any [`KvBackend`].
///
/// Layout:
/// - `c:<serial>`: hash of `p_peer_sn` / `q_peer_sn` / `r_peer_sn`
/// - `w:<serial>`: hash of widget metadata
/// - [`PENDING_UPDATES_KEY`]: FIFO of owners awaiting persistence
pub struct ConnectionCache<B> {
    backend: B,
}

impl ConnectionCache<MemoryBackend> {
    /// A cache on a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}

impl<B: KvBackend> ConnectionCache<B> {
    /// Wraps `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// Points `endpoint.port` at `peer` and `peer.port` at `endpoint`, releasing
/// whichever widgets were previously attached to either side on that port.
fn rewire(txn: &mut dyn KvTransaction, owner: &str, port: PortType, peer: &str) -> Result<()> {
    let field = port.peer_field();
    let owner_key = connections_key(owner);
    let peer_key = connections_key(peer);

    if let Some(previous) = txn.hget(&owner_key, field)? {
        if previous != peer {
            release(txn, &previous, field, owner)?;
        }
    }
    if let Some(previous) = txn.hget(&peer_key, field)? {
        if previous != owner {
            release(txn, &previous, field, peer)?;
        }
    }

    txn.hset(&owner_key, field, peer)?;
    txn.hset(&peer_key, field, owner)?;
    Ok(())
}

/// Clears `partner.field` if it still points back at `endpoint`.
fn release(
    txn: &mut dyn KvTransaction,
    partner: &str,
    field: &str,
    endpoint: &str,
) -> Result<()> {
    let key = connections_key(partner);
    if txn.hget(&key, field)?.as_deref() == Some(endpoint) {
        txn.hdel(&key, field)?;
        trace!(%partner, %field, %endpoint, "cache.set_connections.released");
    }
    Ok(())
}

impl<B: KvBackend> FastStore for ConnectionCache<B> {
    fn set_connections(&self, conns: &WidgetConnections) -> Result<()> {
        conns.validate()?;
        let owner = conns.serial_number.as_str();
        let writes: Vec<(PortType, &str)> = conns.peers().collect();
        let queued = atomically(&self.backend, |txn| {
            for (port, peer) in &writes {
                rewire(txn, owner, *port, peer)?;
            }
            txn.rpush(PENDING_UPDATES_KEY, owner)
        })?;
        debug!(
            owner,
            ports = %conns.connected_ports(),
            queued,
            "cache.set_connections"
        );
        Ok(())
    }

    fn retrieve_recent_updates(&self, max_count: usize) -> Result<Vec<WidgetConnections>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let raw = atomically(&self.backend, |txn| {
            let serials = txn.lpop(PENDING_UPDATES_KEY, max_count)?;
            let mut rows = Vec::with_capacity(serials.len());
            for serial_number in serials {
                let fields = txn.hgetall(&connections_key(&serial_number))?;
                rows.push(RawConnections {
                    serial_number,
                    fields,
                });
            }
            Ok(rows)
        })?;
        let popped = raw.len();
        // The entries are already popped; one bad row must not take the rest
        // of the batch with it.
        let records: Vec<WidgetConnections> = raw
            .into_iter()
            .filter_map(|row| match row.parse() {
                Ok(conns) => Some(conns),
                Err(err) => {
                    warn!(error = %err, "cache.retrieve_recent_updates.skipped");
                    None
                }
            })
            .collect();
        let updates = dedup_latest(records);
        if popped > 0 {
            debug!(popped, unique = updates.len(), "cache.retrieve_recent_updates");
        }
        Ok(updates)
    }

    fn get_connections(&self, serial: &str) -> Result<WidgetConnections> {
        let fields = atomically(&self.backend, |txn| txn.hgetall(&connections_key(serial)))?;
        RawConnections {
            serial_number: serial.to_owned(),
            fields,
        }
        .parse()
    }

    fn requeue(&self, serials: &[String]) -> Result<()> {
        for serial in serials {
            validate_serial(serial, "requeued serial number")?;
        }
        if serials.is_empty() {
            return Ok(());
        }
        atomically(&self.backend, |txn| {
            for serial in serials {
                txn.rpush(PENDING_UPDATES_KEY, serial)?;
            }
            Ok(())
        })
    }

    fn pending_len(&self) -> Result<usize> {
        atomically(&self.backend, |txn| txn.llen(PENDING_UPDATES_KEY))
    }

    fn set_widget(&self, widget: &Widget) -> Result<()> {
        widget.validate()?;
        let key = widget_key(&widget.serial_number);
        atomically(&self.backend, |txn| {
            txn.hset(&key, WIDGET_FIELD_ID, &widget.id.to_string())?;
            txn.hset(&key, WIDGET_FIELD_NAME, &widget.name)?;
            txn.hset(&key, WIDGET_FIELD_PORTS, &widget.ports.to_bit_string())
        })
    }

    fn get_widget(&self, serial: &str) -> Result<Option<Widget>> {
        let fields = atomically(&self.backend, |txn| txn.hgetall(&widget_key(serial)))?;
        if fields.is_empty() {
            return Ok(None);
        }
        let mut widget = Widget::new("", serial, PortSet::empty());
        for (field, value) in fields {
            match field.as_str() {
                WIDGET_FIELD_ID => {
                    widget.id = value.parse().map_err(|_| {
                        PortmeshError::Corruption(format!("widget {serial} has id '{value}'"))
                    })?;
                }
                WIDGET_FIELD_NAME => widget.name = value,
                WIDGET_FIELD_PORTS => widget.ports = PortSet::from_bit_string(&value)?,
                _ => {}
            }
        }
        Ok(Some(widget))
    }
}
