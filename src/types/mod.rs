#![forbid(unsafe_code)]

//! Port-graph data model: widgets, their typed ports and per-owner connection
//! records.

mod port;
mod widget;

pub use port::{PortSet, PortType};
pub use widget::{Widget, WidgetConnections};
pub(crate) use widget::validate_serial;
