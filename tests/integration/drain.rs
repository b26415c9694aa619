#![allow(missing_docs)]

use portmesh::{ConnectionCache, FastStore, PortType, Result, SqliteBackend, WidgetConnections};

fn caches() -> Result<Vec<Box<dyn FastStore>>> {
    Ok(vec![
        Box::new(ConnectionCache::in_memory()),
        Box::new(ConnectionCache::new(SqliteBackend::open_in_memory()?)),
    ])
}

fn connect(cache: &dyn FastStore, owner: &str, port: PortType, peer: &str) -> Result<()> {
    cache.set_connections(&WidgetConnections::new(owner).with_peer(port, peer))
}

#[test]
fn empty_queue_drains_to_nothing() -> Result<()> {
    for cache in caches()? {
        assert!(cache.retrieve_recent_updates(1000)?.is_empty());
    }
    Ok(())
}

#[test]
fn second_drain_without_writes_is_empty() -> Result<()> {
    for cache in caches()? {
        connect(&*cache, "W1", PortType::P, "W2")?;
        assert_eq!(cache.retrieve_recent_updates(10)?.len(), 1);
        assert!(cache.retrieve_recent_updates(10)?.is_empty());
    }
    Ok(())
}

#[test]
fn repeated_owner_keeps_first_position_and_latest_peers() -> Result<()> {
    for cache in caches()? {
        connect(&*cache, "W1", PortType::P, "A")?;
        connect(&*cache, "W9", PortType::Q, "B")?;
        connect(&*cache, "W1", PortType::P, "C")?;

        let drained = cache.retrieve_recent_updates(10)?;
        let owners: Vec<&str> = drained.iter().map(|c| c.serial_number.as_str()).collect();
        assert_eq!(owners, ["W1", "W9"]);
        assert_eq!(drained[0].peer(PortType::P), Some("C"));
        assert_eq!(drained[1].peer(PortType::Q), Some("B"));
    }
    Ok(())
}

#[test]
fn batch_cap_pops_in_order_and_leaves_the_rest() -> Result<()> {
    for cache in caches()? {
        for n in 0..1500 {
            connect(&*cache, &format!("W{n:04}"), PortType::R, &format!("X{n:04}"))?;
        }
        assert_eq!(cache.pending_len()?, 1500);

        let first = cache.retrieve_recent_updates(1000)?;
        assert_eq!(first.len(), 1000);
        for (n, conns) in first.iter().enumerate() {
            assert_eq!(conns.serial_number, format!("W{n:04}"));
            assert_eq!(conns.r_peer.as_deref(), Some(format!("X{n:04}").as_str()));
        }
        assert_eq!(cache.pending_len()?, 500);

        let rest = cache.retrieve_recent_updates(1000)?;
        assert_eq!(rest.len(), 500);
        assert_eq!(rest[0].serial_number, "W1000");
        assert_eq!(cache.pending_len()?, 0);
    }
    Ok(())
}

#[test]
fn duplicates_count_against_the_cap_before_dedup() -> Result<()> {
    for cache in caches()? {
        for peer in ["A", "B", "C"] {
            connect(&*cache, "W1", PortType::P, peer)?;
        }
        connect(&*cache, "W2", PortType::Q, "D")?;

        let drained = cache.retrieve_recent_updates(3)?;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].peer(PortType::P), Some("C"));
        assert_eq!(cache.pending_len()?, 1);
    }
    Ok(())
}
