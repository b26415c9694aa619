#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use portmesh::reconciler::CycleOutcome;
use portmesh::{
    ConnectionCache, DurableStore, FastStore, PortSet, PortType, Reconciler, ReconcilerConfig,
    Result, SqliteBackend, SqliteDurableStore, Widget, WidgetConnections, WidgetService,
};
use tempfile::tempdir;

#[test]
fn association_flows_from_cache_to_durable_store() -> Result<()> {
    let cache = ConnectionCache::in_memory();
    let durable = SqliteDurableStore::open_in_memory()?;

    cache.set_connections(&WidgetConnections::new("W1").with_peer(PortType::P, "W2"))?;

    let drained = cache.retrieve_recent_updates(10)?;
    assert_eq!(
        drained,
        vec![WidgetConnections::new("W1").with_peer(PortType::P, "W2")]
    );

    durable.update_associations(&drained)?;
    assert_eq!(
        durable.get_connections("W1")?.and_then(|c| c.p_peer).as_deref(),
        Some("W2")
    );
    assert_eq!(cache.get_connections("W2")?.peer(PortType::P), Some("W1"));
    Ok(())
}

#[test]
fn reconciler_persists_a_file_backed_cache() -> Result<()> {
    let dir = tempdir()?;
    let cache = Arc::new(ConnectionCache::new(SqliteBackend::open(
        dir.path().join("cache.db"),
    )?));
    let durable = Arc::new(SqliteDurableStore::open(dir.path().join("durable.db"))?);
    let service = WidgetService::new(cache.clone(), durable.clone());

    service.create_widget(&Widget::new("left", "W1", PortSet::all()))?;
    service.create_widget(&Widget::new("right", "W2", PortSet::all()))?;
    service.create_connection("W1", PortType::Q, "W2")?;
    service.create_connection("W1", PortType::R, "W3")?;

    let reconciler = Reconciler::new(cache.clone(), durable.clone(), ReconcilerConfig::default());
    assert_eq!(reconciler.run_once(), CycleOutcome::Persisted(1));
    assert_eq!(reconciler.run_once(), CycleOutcome::Idle);

    let row = durable.get_connections("W1")?.unwrap_or_default();
    assert_eq!(row.q_peer.as_deref(), Some("W2"));
    assert_eq!(row.r_peer.as_deref(), Some("W3"));
    // Only owners are queued, so the peers' rows keep their creation state.
    assert!(durable.get_connections("W2")?.is_some_and(|c| c.is_unconnected()));
    Ok(())
}

#[tokio::test]
async fn spawned_reconciler_catches_up_with_writers() -> Result<()> {
    let cache = Arc::new(ConnectionCache::in_memory());
    let durable = Arc::new(SqliteDurableStore::open_in_memory()?);
    let handle = Reconciler::new(
        cache.clone(),
        durable.clone(),
        ReconcilerConfig::default()
            .batch_size(64)
            .idle_pause(Duration::from_millis(10)),
    )
    .spawn();

    for n in 0..500 {
        cache.set_connections(
            &WidgetConnections::new(format!("W{n}")).with_peer(PortType::P, format!("X{n}")),
        )?;
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while durable.connection_count()? < 500 {
        assert!(Instant::now() < deadline, "reconciler did not catch up in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stats = handle.shutdown().await;
    assert_eq!(stats.records_persisted, 500);
    assert_eq!(stats.persist_failures, 0);
    assert_eq!(cache.pending_len()?, 0);
    Ok(())
}
