use std::collections::HashMap;

use tracing::debug;

use crate::error::{PortmeshError, Result};
use crate::types::{PortType, WidgetConnections};

/// One drained queue entry as read from the backend: the owner serial and the
/// raw fields of its connection hash.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct RawConnections {
    pub(crate) serial_number: String,
    pub(crate) fields: Vec<(String, String)>,
}

impl RawConnections {
    /// Decodes the hash fields into a connection record.
    pub(crate) fn parse(self) -> Result<WidgetConnections> {
        if self.serial_number.is_empty() {
            return Err(PortmeshError::Corruption(
                "drained queue entry has an empty serial number".into(),
            ));
        }
        let mut conns = WidgetConnections::new(self.serial_number);
        for (field, value) in self.fields {
            match PortType::from_peer_field(&field) {
                Some(port) => conns.set_peer(port, Some(value)),
                None => debug!(
                    serial = %conns.serial_number,
                    %field,
                    "cache.parse.unknown_field"
                ),
            }
        }
        Ok(conns)
    }
}

/// Collapses repeated owners to one entry each.
///
/// An owner keeps the position of its first occurrence and the value of its
/// last one.
pub fn dedup_latest<I>(records: I) -> Vec<WidgetConnections>
where
    I: IntoIterator<Item = WidgetConnections>,
{
    let records = records.into_iter();
    let mut out: Vec<WidgetConnections> = Vec::with_capacity(records.size_hint().0);
    let mut positions: HashMap<String, usize> = HashMap::new();
    for record in records {
        match positions.get(&record.serial_number) {
            Some(&idx) => out[idx] = record,
            None => {
                positions.insert(record.serial_number.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}
