#![allow(missing_docs)]

use portmesh::{DurableStore, PortType, Result, SqliteDurableStore, WidgetConnections};
use tempfile::tempdir;

fn batch() -> Vec<WidgetConnections> {
    vec![
        WidgetConnections::new("W1")
            .with_peer(PortType::P, "W2")
            .with_peer(PortType::R, "W3"),
        WidgetConnections::new("W2").with_peer(PortType::P, "W1"),
        WidgetConnections::new("W3").with_peer(PortType::R, "W1"),
        WidgetConnections::new("W4"),
    ]
}

fn dump(store: &SqliteDurableStore) -> Result<Vec<Option<WidgetConnections>>> {
    ["W1", "W2", "W3", "W4", "W5"]
        .iter()
        .map(|serial| store.get_connections(serial))
        .collect()
}

#[test]
fn applying_a_batch_twice_matches_applying_it_once() -> Result<()> {
    let dir = tempdir()?;
    let once = SqliteDurableStore::open(dir.path().join("once.db"))?;
    let twice = SqliteDurableStore::open(dir.path().join("twice.db"))?;

    once.update_associations(&batch())?;
    twice.update_associations(&batch())?;
    twice.update_associations(&batch())?;

    assert_eq!(dump(&once)?, dump(&twice)?);
    assert_eq!(twice.connection_count()?, 4);
    Ok(())
}

#[test]
fn unset_peers_overwrite_earlier_values() -> Result<()> {
    let store = SqliteDurableStore::open_in_memory()?;
    store.update_associations(&batch())?;
    store.update_associations(&[WidgetConnections::new("W1").with_peer(PortType::Q, "W9")])?;

    let row = store.get_connections("W1")?.unwrap_or_default();
    assert_eq!(row.p_peer, None);
    assert_eq!(row.q_peer.as_deref(), Some("W9"));
    assert_eq!(row.r_peer, None);
    Ok(())
}

#[test]
fn empty_batch_changes_nothing() -> Result<()> {
    let store = SqliteDurableStore::open_in_memory()?;
    store.update_associations(&batch())?;
    let before = dump(&store)?;
    store.update_associations(&[])?;
    assert_eq!(dump(&store)?, before);
    Ok(())
}

#[test]
fn owners_need_not_exist_as_widgets() -> Result<()> {
    let store = SqliteDurableStore::open_in_memory()?;
    store.update_associations(&[WidgetConnections::new("ghost").with_peer(PortType::P, "phantom")])?;
    assert!(store.get_widget("ghost")?.is_none());
    assert_eq!(
        store.get_connections("ghost")?.and_then(|c| c.p_peer).as_deref(),
        Some("phantom")
    );
    Ok(())
}
