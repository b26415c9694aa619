use serde::{Deserialize, Serialize};

use crate::error::{PortmeshError, Result};

use super::port::{PortSet, PortType};

/// A device node in the port graph.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    /// Row id assigned by the durable store; `0` until the widget is created.
    pub id: u64,
    /// Human-readable name.
    pub name: String,
    /// Unique external identifier, the graph's node key.
    pub serial_number: String,
    /// Ports the widget physically exposes.
    #[serde(rename = "port_bitmap")]
    pub ports: PortSet,
}

impl Widget {
    /// Creates a widget that has not been assigned an id yet.
    pub fn new(name: impl Into<String>, serial_number: impl Into<String>, ports: PortSet) -> Self {
        Self {
            id: 0,
            name: name.into(),
            serial_number: serial_number.into(),
            ports,
        }
    }

    /// Rejects widgets without a serial number.
    pub fn validate(&self) -> Result<()> {
        validate_serial(&self.serial_number, "widget serial number")
    }
}

/// The peer serial number connected on each port of one owner widget.
///
/// Connections are symmetric: once a write completes, if this record says
/// `owner.P -> S` then the record owned by `S` says `S.P -> owner`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct WidgetConnections {
    /// Owner widget.
    pub serial_number: String,
    /// Peer on port P.
    #[serde(rename = "p_peer_serial_num", default, skip_serializing_if = "Option::is_none")]
    pub p_peer: Option<String>,
    /// Peer on port Q.
    #[serde(rename = "q_peer_serial_num", default, skip_serializing_if = "Option::is_none")]
    pub q_peer: Option<String>,
    /// Peer on port R.
    #[serde(rename = "r_peer_serial_num", default, skip_serializing_if = "Option::is_none")]
    pub r_peer: Option<String>,
}

impl WidgetConnections {
    /// A record with no peers.
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            ..Self::default()
        }
    }

    /// Builder-style [`WidgetConnections::set_peer`].
    pub fn with_peer(mut self, port: PortType, peer: impl Into<String>) -> Self {
        self.set_peer(port, Some(peer.into()));
        self
    }

    /// Peer on `port`, if connected. Empty strings read as unconnected.
    pub fn peer(&self, port: PortType) -> Option<&str> {
        let slot = match port {
            PortType::P => &self.p_peer,
            PortType::Q => &self.q_peer,
            PortType::R => &self.r_peer,
        };
        slot.as_deref().filter(|peer| !peer.is_empty())
    }

    /// Replaces the peer on `port`.
    pub fn set_peer(&mut self, port: PortType, peer: Option<String>) {
        let slot = match port {
            PortType::P => &mut self.p_peer,
            PortType::Q => &mut self.q_peer,
            PortType::R => &mut self.r_peer,
        };
        *slot = peer.filter(|peer| !peer.is_empty());
    }

    /// Connected ports and their peers, in port order.
    pub fn peers(&self) -> impl Iterator<Item = (PortType, &str)> + '_ {
        PortType::ALL
            .into_iter()
            .filter_map(move |port| self.peer(port).map(|peer| (port, peer)))
    }

    /// Whether no port carries a peer.
    pub fn is_unconnected(&self) -> bool {
        self.peers().next().is_none()
    }

    /// Ports that carry a peer.
    pub fn connected_ports(&self) -> PortSet {
        self.peers().map(|(port, _)| port).collect()
    }

    /// Rejects records whose owner serial number is empty.
    pub fn validate(&self) -> Result<()> {
        validate_serial(&self.serial_number, "owner serial number")
    }
}

pub(crate) fn validate_serial(serial: &str, what: &str) -> Result<()> {
    if serial.trim().is_empty() {
        return Err(PortmeshError::invalid(format!("{what} must not be empty")));
    }
    Ok(())
}
