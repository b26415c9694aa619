//! Request-facing facade over the fast and durable stores.

use std::sync::Arc;

use tracing::debug;

use crate::cache::FastStore;
use crate::durable::DurableStore;
use crate::error::{PortmeshError, Result};
use crate::types::{PortType, Widget, WidgetConnections};

/// Widget operations as exposed to the HTTP API and the load tool.
///
/// Widgets are created in the durable store first and then mirrored into the
/// cache; associations only touch the cache and reach the durable store
/// through the reconciler.
#[derive(Clone)]
pub struct WidgetService {
    fast: Arc<dyn FastStore>,
    durable: Arc<dyn DurableStore>,
}

impl WidgetService {
    /// Wraps the two stores.
    pub fn new(fast: Arc<dyn FastStore>, durable: Arc<dyn DurableStore>) -> Self {
        Self { fast, durable }
    }

    /// Fast store handle.
    pub fn fast(&self) -> &Arc<dyn FastStore> {
        &self.fast
    }

    /// Durable store handle.
    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    /// Persists a new widget and caches its metadata.
    pub fn create_widget(&self, widget: &Widget) -> Result<Widget> {
        let created = self.durable.create_widget(widget)?;
        self.fast.set_widget(&created)?;
        debug!(serial = %created.serial_number, ports = %created.ports, "service.create_widget");
        Ok(created)
    }

    /// Connects `port` of `owner` to `peer`.
    ///
    /// Neither widget has to exist; only blank serial numbers are rejected.
    pub fn create_connection(&self, owner: &str, port: PortType, peer: &str) -> Result<()> {
        let owner = owner.trim();
        let peer = peer.trim();
        if owner.is_empty() {
            return Err(PortmeshError::invalid("widget serial number must not be empty"));
        }
        if peer.is_empty() {
            return Err(PortmeshError::invalid("peer serial number must not be empty"));
        }
        self.fast
            .set_connections(&WidgetConnections::new(owner).with_peer(port, peer))
    }

    /// Live connections of `serial`, or `None` if nothing is known about it
    /// in either store.
    pub fn connections(&self, serial: &str) -> Result<Option<WidgetConnections>> {
        let live = self.fast.get_connections(serial)?;
        if !live.is_unconnected() {
            return Ok(Some(live));
        }
        if self.fast.get_widget(serial)?.is_some() {
            return Ok(Some(live));
        }
        // Widgets created by an earlier process only live in the durable store.
        Ok(self.durable.get_connections(serial)?.map(|_| live))
    }

    /// Widget metadata, preferring the cache.
    pub fn widget(&self, serial: &str) -> Result<Option<Widget>> {
        match self.fast.get_widget(serial)? {
            Some(widget) => Ok(Some(widget)),
            None => self.durable.get_widget(serial),
        }
    }
}
