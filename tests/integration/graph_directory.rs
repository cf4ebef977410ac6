#![allow(missing_docs)]

use pmgraph::{props, Pool, PoolError, PropValue, Result};
use tempfile::{tempdir, TempDir};

fn fresh(name: &str) -> Result<(TempDir, Pool)> {
    let dir = tempdir()?;
    let pool = Pool::create(dir.path().join(name), 4 << 20)?;
    Ok((dir, pool))
}

#[test]
fn created_graph_opens_empty_with_its_capacity() -> Result<()> {
    let (_dir, pool) = fresh("created.pool")?;
    pool.create_graph("g2", 250)?;
    let graph = pool.open_graph("g2")?;
    assert_eq!(graph.name(), "g2");
    assert_eq!(graph.capacity(), 250);
    assert_eq!(graph.node_count()?, 0);
    assert!(graph.nodes()?.is_empty());
    Ok(())
}

#[test]
fn unknown_graph_is_not_found() -> Result<()> {
    let (_dir, pool) = fresh("unknown.pool")?;
    match pool.open_graph("never") {
        Err(PoolError::NotFound { what, name }) => {
            assert_eq!(what, "graph");
            assert_eq!(name, "never");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(pool.drop_graph("never").unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn names_are_unique_and_validated() -> Result<()> {
    let (_dir, pool) = fresh("names.pool")?;
    pool.create_graph("dup", 4)?;
    assert!(matches!(
        pool.create_graph("dup", 8),
        Err(PoolError::AlreadyExists { .. })
    ));
    assert!(matches!(pool.create_graph("", 4), Err(PoolError::Invalid(_))));
    assert!(matches!(
        pool.create_graph(&"x".repeat(256), 4),
        Err(PoolError::Invalid(_))
    ));
    pool.create_graph(&"y".repeat(255), 4)?;
    assert!(matches!(pool.create_graph("zero", 0), Err(PoolError::Invalid(_))));
    assert_eq!(pool.graph_names()?.len(), 2);
    Ok(())
}

#[test]
fn oversized_graph_exceeds_the_heap() -> Result<()> {
    let (_dir, pool) = fresh("huge.pool")?;
    assert!(matches!(
        pool.create_graph("huge", 10_000_000),
        Err(PoolError::CapacityExceeded { .. })
    ));
    assert!(pool.graph_names()?.is_empty());
    pool.create_graph("small", 10)?;
    Ok(())
}

#[test]
fn directory_grows_past_its_first_block() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("many.pool");
    let pool = Pool::create(&path, 4 << 20)?;
    let names: Vec<String> = (0..40).map(|i| format!("graph-{i:02}")).collect();
    for (i, name) in names.iter().enumerate() {
        pool.create_graph(name, 4 + i as u32)?;
    }
    for name in names.iter().step_by(2) {
        pool.drop_graph(name)?;
    }
    pool.close()?;

    let pool = Pool::open(&path)?;
    let kept: Vec<String> = names.iter().skip(1).step_by(2).cloned().collect();
    assert_eq!(pool.graph_names()?, kept);
    for (i, name) in names.iter().enumerate().skip(1).step_by(2) {
        assert_eq!(pool.open_graph(name)?.capacity(), 4 + i as u32);
    }
    assert!(pool.verify()?.success);
    Ok(())
}

#[test]
fn dropped_name_can_be_reused() -> Result<()> {
    let (_dir, pool) = fresh("reuse.pool")?;
    let old = pool.create_graph("g", 8)?;
    let mut txn = old.begin()?;
    old.create_node(&mut txn, "Old", props([("v", PropValue::from(1))]))?;
    old.commit(&mut txn)?;
    pool.drop_graph("g")?;

    assert!(old.begin().unwrap_err().is_not_found());
    assert!(old.nodes().unwrap_err().is_not_found());

    let new = pool.create_graph("g", 16)?;
    assert_ne!(new.id(), old.id());
    assert_eq!(new.capacity(), 16);
    assert_eq!(new.node_count()?, 0);
    Ok(())
}

#[test]
fn drop_with_an_open_transaction_is_busy() -> Result<()> {
    let (_dir, pool) = fresh("drop_busy.pool")?;
    let graph = pool.create_graph("g", 8)?;
    let mut txn = graph.begin()?;
    graph.create_node(&mut txn, "N", props([("v", PropValue::from(1))]))?;
    assert!(matches!(pool.drop_graph("g"), Err(PoolError::Busy(_))));
    graph.commit(&mut txn)?;
    assert_eq!(graph.node_count()?, 1);
    pool.drop_graph("g")?;
    assert!(pool.graph_names()?.is_empty());
    Ok(())
}

#[test]
fn dropping_a_graph_returns_its_space() -> Result<()> {
    let (_dir, pool) = fresh("space.pool")?;
    pool.create_graph("keep", 8)?;
    let baseline = pool.stats()?;
    let graph = pool.create_graph("temp", 500)?;
    let mut txn = graph.begin()?;
    for i in 0..100i64 {
        graph.create_node(&mut txn, "T", props([("i", PropValue::from(i))]))?;
    }
    graph.commit(&mut txn)?;
    pool.drop_graph("temp")?;
    let after = pool.stats()?;
    let used = |s: &pmgraph::PoolStats| s.heap_top - s.free_bytes;
    assert!(used(&after) <= used(&baseline) + 2 * 4096);
    assert!(pool.verify()?.success);
    Ok(())
}

#[test]
fn handles_share_one_transaction_gate() -> Result<()> {
    let (_dir, pool) = fresh("gate.pool")?;
    let first = pool.create_graph("g", 8)?;
    let second = pool.open_graph("g")?;
    let mut txn = first.begin()?;
    assert!(matches!(second.try_begin(), Err(PoolError::Busy(_))));
    assert!(matches!(second.begin(), Err(PoolError::Busy(_))));
    first.abort(&mut txn)?;
    let mut txn = second.try_begin()?;
    second.abort(&mut txn)?;
    Ok(())
}
