//! Authoritative relational store for widgets and their connections.

mod sqlite;

use crate::error::Result;
use crate::types::{Widget, WidgetConnections};

pub use sqlite::SqliteDurableStore;

/// Store the reconciler persists connection batches into.
pub trait DurableStore: Send + Sync {
    /// Inserts a widget together with an empty connections row and returns
    /// it with its assigned id. Duplicate serial numbers are rejected.
    fn create_widget(&self, widget: &Widget) -> Result<Widget>;

    /// Looks a widget up by serial number.
    fn get_widget(&self, serial: &str) -> Result<Option<Widget>>;

    /// Upserts every record keyed by owner serial, overwriting all three peer
    /// columns (unset peers become NULL). Applying the same batch twice leaves
    /// the same state as applying it once; an empty batch does nothing.
    fn update_associations(&self, batch: &[WidgetConnections]) -> Result<()>;

    /// Persisted connections of `serial`, if a row exists.
    fn get_connections(&self, serial: &str) -> Result<Option<WidgetConnections>>;
}
