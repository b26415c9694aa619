#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use portmesh::cache::{atomically, KvBackend, KvTransaction};
use portmesh::{ConnectionCache, FastStore, PortType, Result, SqliteBackend, WidgetConnections};
use tempfile::tempdir;

const NUM_WRITERS: usize = 6;
const WRITES_PER_THREAD: usize = 200;
const POOL: usize = 8;

fn serial(n: usize) -> String {
    format!("W{n}")
}

/// Reads the P field of every pool widget inside one backend transaction.
fn snapshot<B: KvBackend>(backend: &B) -> Result<Vec<Option<String>>> {
    atomically(backend, |txn| {
        (0..POOL)
            .map(|n| txn.hget(&format!("c:{}", serial(n)), PortType::P.peer_field()))
            .collect()
    })
}

fn assert_snapshot_symmetric(snap: &[Option<String>]) {
    for (n, peer) in snap.iter().enumerate() {
        let Some(peer) = peer else { continue };
        let idx: usize = peer[1..].parse().unwrap();
        assert_eq!(
            snap[idx].as_deref(),
            Some(serial(n).as_str()),
            "W{n}.P -> {peer} observed without its mirror"
        );
    }
}

fn hammer<B: KvBackend + 'static>(cache: Arc<ConnectionCache<B>>) {
    let barrier = Arc::new(Barrier::new(NUM_WRITERS + 1));
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            barrier.wait();
            let mut observed = 0usize;
            while !done.load(Ordering::Acquire) {
                assert_snapshot_symmetric(&snapshot(cache.backend()).unwrap());
                observed += 1;
            }
            observed
        })
    };

    let writers: Vec<_> = (0..NUM_WRITERS)
        .map(|thread_id| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<()> {
                barrier.wait();
                for i in 0..WRITES_PER_THREAD {
                    let owner = serial((thread_id + i) % POOL);
                    let peer = serial((thread_id * 3 + i * 5 + 1) % POOL);
                    cache.set_connections(&WidgetConnections::new(owner).with_peer(PortType::P, peer))?;
                }
                Ok(())
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap().unwrap();
    }
    done.store(true, Ordering::Release);
    let observed = reader.join().unwrap();
    assert!(observed > 0);

    assert_snapshot_symmetric(&snapshot(cache.backend()).unwrap());
    assert_eq!(cache.pending_len().unwrap(), NUM_WRITERS * WRITES_PER_THREAD);
}

#[test]
fn memory_backend_never_exposes_half_applied_pairs() {
    hammer(Arc::new(ConnectionCache::in_memory()));
}

#[test]
fn sqlite_backend_never_exposes_half_applied_pairs() -> Result<()> {
    let dir = tempdir()?;
    let backend = SqliteBackend::open(dir.path().join("cache.db"))?;
    hammer(Arc::new(ConnectionCache::new(backend)));
    Ok(())
}

#[test]
fn concurrent_drains_hand_out_each_entry_once() -> Result<()> {
    let cache = Arc::new(ConnectionCache::in_memory());
    for n in 0..1000 {
        cache.set_connections(&WidgetConnections::new(format!("O{n}")).with_peer(PortType::R, "hub"))?;
    }
    // The hub itself is never enqueued; only owners are.
    let barrier = Arc::new(Barrier::new(4));
    let drains: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<Vec<String>> {
                barrier.wait();
                let mut seen = Vec::new();
                loop {
                    let batch = cache.retrieve_recent_updates(37)?;
                    if batch.is_empty() {
                        return Ok(seen);
                    }
                    seen.extend(batch.into_iter().map(|c| c.serial_number));
                }
            })
        })
        .collect();

    let mut all: Vec<String> = Vec::new();
    for drain in drains {
        all.extend(drain.join().unwrap()?);
    }
    assert_eq!(all.len(), 1000);
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 1000, "an entry was handed out twice");
    assert_eq!(cache.pending_len()?, 0);
    Ok(())
}
