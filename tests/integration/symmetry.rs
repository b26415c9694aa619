#![allow(missing_docs)]

use portmesh::{ConnectionCache, FastStore, PortType, WidgetConnections};
use proptest::prelude::*;

const POOL: usize = 6;

#[derive(Debug, Clone)]
struct Write {
    owner: usize,
    peers: Vec<(PortType, usize)>,
}

fn serial(n: usize) -> String {
    format!("W{n}")
}

fn arb_port() -> impl Strategy<Value = PortType> {
    prop_oneof![Just(PortType::P), Just(PortType::Q), Just(PortType::R)]
}

fn arb_write() -> impl Strategy<Value = Write> {
    (
        0..POOL,
        prop::collection::vec((arb_port(), 0..POOL), 1..=3),
    )
        .prop_map(|(owner, peers)| Write { owner, peers })
}

fn to_record(write: &Write) -> WidgetConnections {
    write
        .peers
        .iter()
        .fold(WidgetConnections::new(serial(write.owner)), |conns, (port, peer)| {
            conns.with_peer(*port, serial(*peer))
        })
}

fn assert_graph_symmetric(cache: &impl FastStore) -> Result<(), TestCaseError> {
    for n in 0..POOL {
        let conns = cache.get_connections(&serial(n)).unwrap();
        for (port, peer) in conns.peers() {
            let back = cache.get_connections(peer).unwrap();
            prop_assert_eq!(
                back.peer(port),
                Some(conns.serial_number.as_str()),
                "{}.{} -> {} is not mirrored",
                conns.serial_number,
                port,
                peer
            );
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_every_write_is_mirrored_on_the_peer(writes in prop::collection::vec(arb_write(), 1..40)) {
        let cache = ConnectionCache::in_memory();
        for write in &writes {
            let record = to_record(write);
            cache.set_connections(&record).unwrap();
            for (port, peer) in record.peers() {
                let back = cache.get_connections(peer).unwrap();
                prop_assert_eq!(back.peer(port), Some(record.serial_number.as_str()));
            }
        }
    }

    #[test]
    fn prop_graph_stays_symmetric_under_rewiring(writes in prop::collection::vec(arb_write(), 1..40)) {
        let cache = ConnectionCache::in_memory();
        for write in &writes {
            cache.set_connections(&to_record(write)).unwrap();
            assert_graph_symmetric(&cache)?;
        }
        prop_assert_eq!(cache.pending_len().unwrap(), writes.len());
    }

    #[test]
    fn prop_drain_reflects_current_state(writes in prop::collection::vec(arb_write(), 1..40)) {
        let cache = ConnectionCache::in_memory();
        for write in &writes {
            cache.set_connections(&to_record(write)).unwrap();
        }
        let drained = cache.retrieve_recent_updates(writes.len()).unwrap();

        let mut expected_order: Vec<String> = Vec::new();
        for write in &writes {
            let owner = serial(write.owner);
            if !expected_order.contains(&owner) {
                expected_order.push(owner);
            }
        }
        let order: Vec<String> = drained.iter().map(|c| c.serial_number.clone()).collect();
        prop_assert_eq!(order, expected_order);
        for record in &drained {
            prop_assert_eq!(record, &cache.get_connections(&record.serial_number).unwrap());
        }
        prop_assert!(cache.retrieve_recent_updates(writes.len()).unwrap().is_empty());
    }
}
