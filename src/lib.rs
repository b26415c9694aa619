//! Portmesh keeps a graph of widgets whose typed ports (P, Q, R) are wired to
//! each other.
//!
//! Writes land in a fast write-behind cache ([`cache`]) that applies both
//! endpoints of an association atomically and queues the owner for
//! persistence. A background [`reconciler`] drains that queue in batches into
//! the relational [`durable`] store, which accepts idempotent upserts.
//! [`service`] and [`api`] expose the graph over HTTP.

#![warn(missing_docs)]

pub mod api;
pub mod cache;
pub mod config;
pub mod durable;
pub mod error;
pub mod load;
pub mod reconciler;
pub mod service;
pub mod types;

pub use cache::{ConnectionCache, FastStore, MemoryBackend, SqliteBackend};
pub use durable::{DurableStore, SqliteDurableStore};
pub use error::{PortmeshError, Result};
pub use reconciler::{FailurePolicy, Reconciler, ReconcilerConfig, ReconcilerHandle};
pub use service::WidgetService;
pub use types::{PortSet, PortType, Widget, WidgetConnections};
