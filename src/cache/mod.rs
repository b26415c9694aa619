#![forbid(unsafe_code)]

//! Write-behind connection cache.
//!
//! The cache is the write path of the port graph. Each association is one
//! atomic script against a [`KvBackend`]: both endpoints' peer fields are
//! written together with an enqueue of the owner onto the pending-updates
//! list, so readers never observe a half-applied symmetric pair. The
//! reconciler later drains that list in batches.
//!
//! Backends only need two capabilities: an atomic multi-key script and a FIFO
//! list. [`MemoryBackend`] and [`SqliteBackend`] both provide them, and
//! [`ConnectionCache`] works on either.

mod backend;
mod connections;
mod dedup;
mod memory;
mod sqlite;

use crate::error::Result;
use crate::types::{Widget, WidgetConnections};

pub use backend::{atomically, KvBackend, KvTransaction};
pub use connections::{ConnectionCache, PENDING_UPDATES_KEY};
pub use dedup::dedup_latest;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// The fast store consumed by the service layer and the reconciler.
pub trait FastStore: Send + Sync {
    /// Applies every non-empty peer in `conns` to both endpoints and enqueues
    /// the owner, all in one atomic transaction.
    ///
    /// Ports without a peer are left as they are; this never disconnects.
    fn set_connections(&self, conns: &WidgetConnections) -> Result<()>;

    /// Pops up to `max_count` owners from the head of the pending-updates
    /// list and returns their current connections, one entry per owner in
    /// first-seen order. An empty list yields an empty vector.
    ///
    /// Popped entries are gone even if the caller later fails to persist them.
    fn retrieve_recent_updates(&self, max_count: usize) -> Result<Vec<WidgetConnections>>;

    /// Current connections of `serial`; unconnected if it was never written.
    fn get_connections(&self, serial: &str) -> Result<WidgetConnections>;

    /// Pushes owners back onto the tail of the pending-updates list.
    fn requeue(&self, serials: &[String]) -> Result<()>;

    /// Number of queued pending-update entries, duplicates included.
    fn pending_len(&self) -> Result<usize>;

    /// Caches widget metadata.
    fn set_widget(&self, widget: &Widget) -> Result<()>;

    /// Cached widget metadata, if any.
    fn get_widget(&self, serial: &str) -> Result<Option<Widget>>;
}
