use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PortmeshError, Result};

/// One of the three typed ports a widget can expose.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum PortType {
    /// Port P, bit `0b001`.
    P = 1,
    /// Port Q, bit `0b010`.
    Q = 2,
    /// Port R, bit `0b100`.
    R = 4,
}

impl PortType {
    /// Every port type in bit order.
    pub const ALL: [PortType; 3] = [PortType::P, PortType::Q, PortType::R];

    /// The flag value of this port inside a [`PortSet`].
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Single-letter name.
    pub const fn as_str(self) -> &'static str {
        match self {
            PortType::P => "P",
            PortType::Q => "Q",
            PortType::R => "R",
        }
    }

    /// Field name of this port's peer inside a cached connection hash.
    pub const fn peer_field(self) -> &'static str {
        match self {
            PortType::P => "p_peer_sn",
            PortType::Q => "q_peer_sn",
            PortType::R => "r_peer_sn",
        }
    }

    /// Inverse of [`PortType::peer_field`].
    pub fn from_peer_field(field: &str) -> Option<Self> {
        PortType::ALL
            .into_iter()
            .find(|port| port.peer_field() == field)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortType {
    type Err = PortmeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P" => Ok(PortType::P),
            "Q" => Ok(PortType::Q),
            "R" => Ok(PortType::R),
            _ => Err(PortmeshError::invalid(format!(
                "invalid port type '{s}': options are P, Q or R"
            ))),
        }
    }
}

/// Bitmask of the ports a widget physically exposes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortSet(u8);

impl PortSet {
    const MASK: u8 = 0b111;

    /// The empty set.
    pub const fn empty() -> Self {
        PortSet(0)
    }

    /// All three ports.
    pub const fn all() -> Self {
        PortSet(Self::MASK)
    }

    /// Builds a set from raw bits, rejecting bits outside P, Q and R.
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & !Self::MASK != 0 {
            return Err(PortmeshError::invalid(format!(
                "port bitmap {bits:#06b} has bits outside P, Q, R"
            )));
        }
        Ok(PortSet(bits))
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds a set from port names; unknown names are skipped.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| name.as_ref().parse::<PortType>().ok())
            .collect()
    }

    /// Returns a copy with `port` added.
    pub const fn with(self, port: PortType) -> Self {
        PortSet(self.0 | port.bit())
    }

    /// Whether `port` is in the set.
    pub const fn contains(self, port: PortType) -> bool {
        self.0 & port.bit() != 0
    }

    /// Whether no port is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the contained ports in bit order.
    pub fn iter(self) -> impl Iterator<Item = PortType> {
        PortType::ALL
            .into_iter()
            .filter(move |port| self.contains(*port))
    }

    /// Fixed-width binary form used by the durable store, e.g. `"0101"` for P|R.
    pub fn to_bit_string(self) -> String {
        format!("{:04b}", self.0)
    }

    /// Parses the output of [`PortSet::to_bit_string`].
    pub fn from_bit_string(s: &str) -> Result<Self> {
        if s.len() != 4 {
            return Err(PortmeshError::Corruption(format!(
                "port bit string '{s}' is not 4 bits wide"
            )));
        }
        let bits = u8::from_str_radix(s, 2)
            .map_err(|_| PortmeshError::Corruption(format!("port bit string '{s}' is not binary")))?;
        PortSet::from_bits(bits)
            .map_err(|_| PortmeshError::Corruption(format!("port bit string '{s}' out of range")))
    }
}

impl From<PortType> for PortSet {
    fn from(port: PortType) -> Self {
        PortSet(port.bit())
    }
}

impl FromIterator<PortType> for PortSet {
    fn from_iter<T: IntoIterator<Item = PortType>>(iter: T) -> Self {
        iter.into_iter().fold(PortSet::empty(), PortSet::with)
    }
}

impl fmt::Display for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for port in self.iter() {
            f.write_str(port.as_str())?;
        }
        Ok(())
    }
}
