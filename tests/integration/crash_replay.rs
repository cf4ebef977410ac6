#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;

use pmgraph::primitives::io::{CrashIo, FileIo, MemIo};
use pmgraph::primitives::wal::SEGMENT_HEADER_LEN;
use pmgraph::storage::RecoveryAction;
use pmgraph::{props, Pool, PoolOptions, PropValue, Result, Synchronous};

const POOL_SIZE: u64 = 128 * 1024;
const BATCH: usize = 5;

/// Pool image with one graph holding one committed node.
fn base_image() -> Result<Vec<u8>> {
    let mem = Arc::new(MemIo::new());
    let pool = Pool::create_with_io(mem.clone(), POOL_SIZE, PoolOptions::default())?;
    let graph = pool.create_graph("g", 32)?;
    let mut txn = graph.begin()?;
    graph.create_node(
        &mut txn,
        "Seed",
        props([("n", PropValue::from(0)), ("tag", PropValue::from("seed"))]),
    )?;
    graph.commit(&mut txn)?;
    pool.close()?;
    Ok(mem.image())
}

/// Commits a batch of nodes through `io`, returning whether commit reported success.
///
/// The first create after a reopen extends the id lease with its own
/// commit, so a crash can also surface from `create_node`.
fn commit_batch(io: Arc<dyn FileIo>, options: PoolOptions) -> Result<bool> {
    let pool = Pool::open_with_io(io, options)?;
    let graph = pool.open_graph("g")?;
    let mut txn = graph.begin()?;
    for i in 1..=BATCH as i64 {
        let created = graph.create_node(
            &mut txn,
            "Batch",
            props([("n", PropValue::from(i)), ("tag", PropValue::from("batch"))]),
        );
        if created.is_err() {
            return Ok(false);
        }
    }
    let ok = graph.commit(&mut txn).is_ok();
    Ok(ok)
}

/// Reopens `image` and returns (recovery action, batch nodes visible).
fn reopen(image: Vec<u8>) -> Result<(RecoveryAction, usize)> {
    let pool = Pool::open_with_io(Arc::new(MemIo::from_bytes(image)), PoolOptions::default())?;
    let action = pool.stats()?.recovery.action;
    let graph = pool.open_graph("g")?;
    let batch = graph.nodes_by_label("Batch")?.len();
    assert_eq!(graph.nodes_by_label("Seed")?.len(), 1);
    let report = pool.verify()?;
    assert!(report.success, "{:?}", report.findings);
    Ok((action, batch))
}

fn bytes_for_commit(base: &[u8], options: &PoolOptions) -> Result<u64> {
    let mem = Arc::new(MemIo::with_sync_tracking(base.to_vec()));
    let crash = Arc::new(CrashIo::new(mem));
    assert!(commit_batch(crash.clone(), options.clone())?);
    Ok(crash.bytes_written())
}

#[test]
fn every_crash_point_is_all_or_nothing() -> Result<()> {
    let base = base_image()?;
    let options = PoolOptions::default();
    let total = bytes_for_commit(&base, &options)?;
    assert!(total > 0);
    let mut actions = HashSet::new();

    for budget in 0..=total {
        let mem = Arc::new(MemIo::with_sync_tracking(base.clone()));
        let crash = Arc::new(CrashIo::new(mem.clone()));
        crash.crash_after(budget);
        let committed = commit_batch(crash.clone(), options.clone())?;
        if budget < total {
            assert!(!committed, "commit succeeded with budget {budget} of {total}");
        }

        for image in [mem.image(), mem.synced_image()] {
            let (action, batch) = reopen(image)?;
            actions.insert(action);
            assert!(
                batch == 0 || batch == BATCH,
                "budget {budget}: {batch} of {BATCH} nodes visible"
            );
            if committed {
                assert_eq!(batch, BATCH, "budget {budget}: acknowledged commit lost");
            }
        }
    }
    assert!(actions.contains(&RecoveryAction::Replayed));
    assert!(actions.contains(&RecoveryAction::DiscardedTorn));
    Ok(())
}

#[test]
fn unsynced_commits_stay_atomic() -> Result<()> {
    let base = base_image()?;
    let options = PoolOptions::new().synchronous(Synchronous::Off);
    let total = bytes_for_commit(&base, &options)?;
    for budget in (0..=total).step_by(7) {
        let mem = Arc::new(MemIo::with_sync_tracking(base.clone()));
        let crash = Arc::new(CrashIo::new(mem.clone()));
        crash.crash_after(budget);
        commit_batch(crash, options.clone())?;
        for image in [mem.image(), mem.synced_image()] {
            let (_, batch) = reopen(image)?;
            assert!(batch == 0 || batch == BATCH, "budget {budget}: {batch} visible");
        }
    }
    Ok(())
}

#[test]
fn replay_is_idempotent() -> Result<()> {
    let base = base_image()?;
    let options = PoolOptions::default();
    let total = bytes_for_commit(&base, &options)?;

    // Crash just before the segment is marked applied.
    let mem = Arc::new(MemIo::with_sync_tracking(base));
    let crash = Arc::new(CrashIo::new(mem.clone()));
    crash.crash_after(total - SEGMENT_HEADER_LEN as u64);
    assert!(!commit_batch(crash, options)?);

    let first = Arc::new(MemIo::from_bytes(mem.image()));
    let pool = Pool::open_with_io(first.clone(), PoolOptions::default())?;
    assert_eq!(pool.stats()?.recovery.action, RecoveryAction::Replayed);
    let nodes = pool.open_graph("g")?.nodes()?;
    assert_eq!(nodes.len(), BATCH + 1);
    pool.close()?;

    let pool = Pool::open_with_io(first, PoolOptions::default())?;
    assert_eq!(pool.stats()?.recovery.action, RecoveryAction::Clean);
    assert_eq!(pool.open_graph("g")?.nodes()?, nodes);
    Ok(())
}

#[test]
fn graph_creation_is_atomic_under_crash() -> Result<()> {
    let mem = Arc::new(MemIo::new());
    Pool::create_with_io(mem.clone(), POOL_SIZE, PoolOptions::default())?.close()?;
    let base = mem.image();

    let measure = Arc::new(CrashIo::new(Arc::new(MemIo::from_bytes(base.clone()))));
    Pool::open_with_io(measure.clone(), PoolOptions::default())?.create_graph("fresh", 200)?;
    let total = measure.bytes_written();

    for budget in (0..total).step_by(97) {
        let mem = Arc::new(MemIo::with_sync_tracking(base.clone()));
        let crash = Arc::new(CrashIo::new(mem.clone()));
        crash.crash_after(budget);
        let pool = Pool::open_with_io(crash, PoolOptions::default())?;
        assert!(pool.create_graph("fresh", 200).is_err());
        drop(pool);

        let pool = Pool::open_with_io(Arc::new(MemIo::from_bytes(mem.image())), PoolOptions::default())?;
        match pool.graph_names()?.as_slice() {
            [] => {}
            [name] => {
                assert_eq!(name, "fresh");
                let graph = pool.open_graph("fresh")?;
                assert_eq!(graph.capacity(), 200);
                assert_eq!(graph.node_count()?, 0);
            }
            other => panic!("unexpected graphs {other:?}"),
        }
        assert!(pool.verify()?.success);
    }
    Ok(())
}
