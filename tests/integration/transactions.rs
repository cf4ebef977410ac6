#![allow(missing_docs)]

use std::sync::Arc;

use pmgraph::primitives::io::{CrashIo, FileIo, MemIo};
use pmgraph::{
    props, CounterMetrics, Pool, PoolError, PoolOptions, PropValue, Result, TxnState,
};
use tempfile::{tempdir, TempDir};

fn fresh(name: &str) -> Result<(TempDir, Pool)> {
    let dir = tempdir()?;
    let pool = Pool::create(dir.path().join(name), 4 << 20)?;
    Ok((dir, pool))
}

#[test]
fn actors_and_movies_survive_an_aborted_reader() -> Result<()> {
    let (_dir, pool) = fresh("movies.pool")?;
    let graph = pool.create_graph("g3", 100)?;

    let mut txn = graph.begin()?;
    let keanu = graph.create_node(
        &mut txn,
        "Actor",
        props([
            ("name", PropValue::from("Keanu Reeves")),
            ("born", PropValue::from(1964)),
        ]),
    )?;
    let matrix = graph.create_node(
        &mut txn,
        "Movie",
        props([
            ("title", PropValue::from("The Matrix")),
            ("released", PropValue::from(1999)),
            ("rating", PropValue::from(8.7)),
        ]),
    )?;
    graph.commit(&mut txn)?;
    assert_eq!(txn.state(), TxnState::Committed);

    let mut reader = graph.begin()?;
    let actor = graph.get_node(keanu)?;
    assert_eq!(actor.label, "Actor");
    assert_eq!(actor.properties["name"].as_str(), Some("Keanu Reeves"));
    assert_eq!(actor.properties["born"].as_int(), Some(1964));
    let movie = graph.get_node(matrix)?;
    assert_eq!(movie.label, "Movie");
    assert_eq!(movie.properties["rating"].as_float(), Some(8.7));
    graph.abort(&mut reader)?;
    assert_eq!(reader.state(), TxnState::Aborted);

    assert_eq!(graph.get_node(keanu)?, actor);
    assert_eq!(graph.get_node(matrix)?, movie);
    assert_eq!(graph.nodes_by_label("Movie")?, vec![movie]);
    assert!(graph.nodes_by_label("Director")?.is_empty());
    Ok(())
}

#[test]
fn aborted_creates_are_not_found() -> Result<()> {
    let (_dir, pool) = fresh("abort.pool")?;
    let graph = pool.create_graph("g", 16)?;
    let mut txn = graph.begin()?;
    let ids: Vec<_> = (0..5i64)
        .map(|i| graph.create_node(&mut txn, "Tmp", props([("i", PropValue::from(i))])))
        .collect::<Result<_>>()?;
    graph.abort(&mut txn)?;
    for id in ids {
        assert!(graph.get_node(id).unwrap_err().is_not_found());
    }
    assert_eq!(graph.node_count()?, 0);
    Ok(())
}

#[test]
fn aborted_ids_are_not_reissued_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("reissue.pool");
    let pool = Pool::create(&path, 1 << 20)?;
    let graph = pool.create_graph("g", 4)?;
    let mut txn = graph.begin()?;
    let aborted = graph.create_node(&mut txn, "Ghost", props([("v", PropValue::from(1))]))?;
    graph.abort(&mut txn)?;
    pool.close()?;

    let pool = Pool::open(&path)?;
    let graph = pool.open_graph("g")?;
    let mut txn = graph.begin()?;
    let kept = graph.create_node(&mut txn, "Kept", props([("v", PropValue::from(2))]))?;
    graph.commit(&mut txn)?;
    assert_ne!(kept, aborted);
    assert_eq!(kept.slot(), aborted.slot());
    assert!(graph.get_node(aborted).unwrap_err().is_not_found());
    assert_eq!(graph.get_node(kept)?.label, "Kept");
    pool.close()?;

    // The extended lease is durable too.
    let pool = Pool::open(&path)?;
    let graph = pool.open_graph("g")?;
    assert!(graph.get_node(aborted).unwrap_err().is_not_found());
    let mut txn = graph.begin()?;
    let later = graph.create_node(&mut txn, "Later", props([("v", PropValue::from(3))]))?;
    graph.commit(&mut txn)?;
    assert_ne!(later, aborted);
    assert!(pool.verify()?.success);
    Ok(())
}

#[test]
fn uncommitted_changes_are_invisible() -> Result<()> {
    let (_dir, pool) = fresh("invisible.pool")?;
    let graph = pool.create_graph("g", 16)?;
    let mut txn = graph.begin()?;
    let id = graph.create_node(&mut txn, "Draft", props([("v", PropValue::from(1))]))?;
    assert_eq!(txn.pending_len(), 1);
    assert!(graph.get_node(id).unwrap_err().is_not_found());
    assert_eq!(graph.node_count()?, 0);
    graph.commit(&mut txn)?;

    let mut txn = graph.begin()?;
    graph.update_node(&mut txn, id, props([("v", PropValue::from(2))]))?;
    assert_eq!(graph.get_node(id)?.properties["v"], PropValue::from(1));
    graph.commit(&mut txn)?;
    assert_eq!(graph.get_node(id)?.properties["v"], PropValue::from(2));
    Ok(())
}

#[test]
fn capacity_is_enforced_per_live_node() -> Result<()> {
    let (_dir, pool) = fresh("capacity.pool")?;
    let graph = pool.create_graph("small", 3)?;
    let mut txn = graph.begin()?;
    let mut ids = Vec::new();
    for i in 0..3i64 {
        ids.push(graph.create_node(&mut txn, "N", props([("i", PropValue::from(i))]))?);
    }
    assert!(matches!(
        graph.create_node(&mut txn, "N", props([("i", PropValue::from(3))])),
        Err(PoolError::CapacityExceeded { limit: 3, .. })
    ));
    graph.commit(&mut txn)?;

    let mut txn = graph.begin()?;
    assert!(matches!(
        graph.create_node(&mut txn, "N", props([("i", PropValue::from(4))])),
        Err(PoolError::CapacityExceeded { .. })
    ));
    graph.delete_node(&mut txn, ids[1])?;
    graph.commit(&mut txn)?;

    let mut txn = graph.begin()?;
    let reused = graph.create_node(&mut txn, "N", props([("i", PropValue::from(5))]))?;
    graph.commit(&mut txn)?;
    assert_eq!(reused.slot(), ids[1].slot());
    assert_ne!(reused, ids[1]);
    assert!(graph.get_node(ids[1]).unwrap_err().is_not_found());
    assert_eq!(graph.get_node(reused)?.properties["i"], PropValue::from(5));
    assert_eq!(graph.node_count()?, 3);
    Ok(())
}

#[test]
fn finished_transactions_reject_further_use() -> Result<()> {
    let (_dir, pool) = fresh("state.pool")?;
    let graph = pool.create_graph("g", 8)?;

    let mut txn = graph.begin()?;
    graph.commit(&mut txn)?;
    assert!(matches!(graph.commit(&mut txn), Err(PoolError::TransactionState(_))));
    assert!(matches!(graph.abort(&mut txn), Err(PoolError::TransactionState(_))));
    assert!(matches!(
        graph.create_node(&mut txn, "N", props([("k", PropValue::from(1))])),
        Err(PoolError::TransactionState(_))
    ));

    let mut txn = graph.begin()?;
    graph.abort(&mut txn)?;
    assert!(matches!(graph.abort(&mut txn), Err(PoolError::TransactionState(_))));
    assert!(matches!(graph.commit(&mut txn), Err(PoolError::TransactionState(_))));
    Ok(())
}

#[test]
fn transaction_ids_increase() -> Result<()> {
    let (_dir, pool) = fresh("ids.pool")?;
    let graph = pool.create_graph("g", 8)?;
    let mut first = graph.begin()?;
    let first_id = first.id();
    graph.commit(&mut first)?;
    let mut second = graph.begin()?;
    assert!(second.id() > first_id);
    graph.abort(&mut second)?;
    Ok(())
}

#[test]
fn transactions_are_bound_to_their_graph() -> Result<()> {
    let (_dir, pool) = fresh("bound.pool")?;
    let a = pool.create_graph("a", 8)?;
    let b = pool.create_graph("b", 8)?;
    let mut txn = a.begin()?;
    assert_eq!(txn.graph_name(), "a");
    assert!(matches!(
        b.create_node(&mut txn, "N", props([("k", PropValue::from(1))])),
        Err(PoolError::Invalid(_))
    ));
    assert!(matches!(b.commit(&mut txn), Err(PoolError::Invalid(_))));
    a.abort(&mut txn)?;
    Ok(())
}

#[test]
fn update_merges_and_delete_removes() -> Result<()> {
    let (_dir, pool) = fresh("update.pool")?;
    let graph = pool.create_graph("g", 8)?;
    let mut txn = graph.begin()?;
    let id = graph.create_node(
        &mut txn,
        "Person",
        props([("name", PropValue::from("Ada")), ("age", PropValue::from(36))]),
    )?;
    graph.update_node(&mut txn, id, props([("age", PropValue::from(37))]))?;
    graph.commit(&mut txn)?;

    let mut txn = graph.begin()?;
    graph.update_node(
        &mut txn,
        id,
        props([("field", PropValue::from("mathematics")), ("age", PropValue::Null)]),
    )?;
    graph.commit(&mut txn)?;
    let node = graph.get_node(id)?;
    assert_eq!(node.label, "Person");
    assert_eq!(node.properties.len(), 3);
    assert_eq!(node.properties["name"], PropValue::from("Ada"));
    assert_eq!(node.properties["age"], PropValue::Null);
    assert_eq!(node.properties["field"], PropValue::from("mathematics"));

    let mut txn = graph.begin()?;
    graph.delete_node(&mut txn, id)?;
    assert!(graph.delete_node(&mut txn, id).unwrap_err().is_not_found());
    assert!(graph
        .update_node(&mut txn, id, props([("x", PropValue::from(1))]))
        .unwrap_err()
        .is_not_found());
    graph.commit(&mut txn)?;
    assert!(graph.get_node(id).unwrap_err().is_not_found());
    assert!(graph.nodes()?.is_empty());
    Ok(())
}

#[test]
fn create_then_delete_in_one_transaction_leaves_nothing() -> Result<()> {
    let (_dir, pool) = fresh("transient.pool")?;
    let graph = pool.create_graph("g", 2)?;
    let mut txn = graph.begin()?;
    let id = graph.create_node(&mut txn, "Gone", props([("k", PropValue::from(1))]))?;
    graph.delete_node(&mut txn, id)?;
    graph.commit(&mut txn)?;
    assert!(graph.get_node(id).unwrap_err().is_not_found());

    let mut txn = graph.begin()?;
    graph.create_node(&mut txn, "A", props([("k", PropValue::from(1))]))?;
    graph.create_node(&mut txn, "B", props([("k", PropValue::from(2))]))?;
    graph.commit(&mut txn)?;
    assert_eq!(graph.node_count()?, 2);
    Ok(())
}

#[test]
fn dropping_an_open_transaction_aborts_it() -> Result<()> {
    let (_dir, pool) = fresh("dropped.pool")?;
    let graph = pool.create_graph("g", 1)?;
    let id = {
        let mut txn = graph.begin()?;
        graph.create_node(&mut txn, "N", props([("k", PropValue::from(1))]))?
    };
    assert!(graph.get_node(id).unwrap_err().is_not_found());
    let mut txn = graph.try_begin()?;
    graph.create_node(&mut txn, "N", props([("k", PropValue::from(2))]))?;
    graph.commit(&mut txn)?;
    Ok(())
}

#[test]
fn oversized_strings_are_invalid() -> Result<()> {
    let (_dir, pool) = fresh("strings.pool")?;
    let graph = pool.create_graph("g", 4)?;
    let mut txn = graph.begin()?;
    let long = "L".repeat(1025);
    assert!(matches!(
        graph.create_node(&mut txn, &long, props([("k", PropValue::from(1))])),
        Err(PoolError::Invalid(_))
    ));
    assert!(matches!(
        graph.create_node(&mut txn, "ok", props([(long.as_str(), PropValue::from(1))])),
        Err(PoolError::Invalid(_))
    ));
    let at_limit = "M".repeat(1024);
    let id = graph.create_node(&mut txn, &at_limit, props([("k", PropValue::from(1))]))?;
    graph.commit(&mut txn)?;
    assert_eq!(graph.get_node(id)?.label, at_limit);
    Ok(())
}

#[test]
fn oversized_commit_is_rejected_without_harm() -> Result<()> {
    let dir = tempdir()?;
    let pool = Pool::create_with(
        dir.path().join("log.pool"),
        1 << 20,
        PoolOptions::new().log_capacity(16 * 1024),
    )?;
    let graph = pool.create_graph("g", 8)?;
    let mut txn = graph.begin()?;
    let blob = graph.create_node(
        &mut txn,
        "Blob",
        props([("data", PropValue::Bytes(vec![7u8; 32 * 1024]))]),
    )?;
    assert!(matches!(
        graph.commit(&mut txn),
        Err(PoolError::CapacityExceeded { .. })
    ));
    assert_eq!(txn.state(), TxnState::Aborted);
    assert!(graph.get_node(blob).unwrap_err().is_not_found());

    let mut txn = graph.begin()?;
    let small = graph.create_node(&mut txn, "Small", props([("k", PropValue::from(1))]))?;
    graph.commit(&mut txn)?;
    assert_eq!(graph.get_node(small)?.label, "Small");
    assert!(pool.verify()?.success);
    Ok(())
}

#[test]
fn sync_failure_poisons_the_pool() -> Result<()> {
    let mem = Arc::new(MemIo::new());
    let crash = Arc::new(CrashIo::new(mem.clone()));
    let pool = Pool::create_with_io(crash.clone(), 1 << 20, PoolOptions::default())?;
    let graph = pool.create_graph("g", 8)?;
    let mut txn = graph.begin()?;
    let kept = graph.create_node(&mut txn, "Kept", props([("k", PropValue::from(1))]))?;
    graph.commit(&mut txn)?;

    crash.fail_syncs(true);
    let mut txn = graph.begin()?;
    graph.create_node(&mut txn, "Lost", props([("k", PropValue::from(2))]))?;
    assert!(matches!(graph.commit(&mut txn), Err(PoolError::Durability(_))));
    assert!(matches!(graph.begin(), Err(PoolError::Durability(_))));
    assert!(matches!(graph.get_node(kept), Err(PoolError::Durability(_))));
    assert!(matches!(pool.create_graph("h", 4), Err(PoolError::Durability(_))));
    crash.disarm();
    assert!(matches!(pool.graph_names(), Err(PoolError::Durability(_))));
    pool.close()?;

    let reopened = Pool::open_with_io(
        Arc::new(MemIo::from_bytes(mem.image())) as Arc<dyn FileIo>,
        PoolOptions::default(),
    )?;
    let graph = reopened.open_graph("g")?;
    assert_eq!(graph.get_node(kept)?.label, "Kept");
    assert!(reopened.verify()?.success);
    Ok(())
}

#[test]
fn metrics_see_commits_and_aborts() -> Result<()> {
    let dir = tempdir()?;
    let metrics = Arc::new(CounterMetrics::default());
    let pool = Pool::create_with(
        dir.path().join("metrics.pool"),
        1 << 20,
        PoolOptions::new().metrics(metrics.clone()),
    )?;
    let graph = pool.create_graph("g", 8)?;
    let mut txn = graph.begin()?;
    let a = graph.create_node(&mut txn, "N", props([("k", PropValue::from(1))]))?;
    graph.create_node(&mut txn, "N", props([("k", PropValue::from(2))]))?;
    graph.commit(&mut txn)?;
    let mut txn = graph.begin()?;
    graph.delete_node(&mut txn, a)?;
    graph.commit(&mut txn)?;
    let mut txn = graph.begin()?;
    graph.abort(&mut txn)?;

    use std::sync::atomic::Ordering::Relaxed;
    assert_eq!(metrics.nodes_created.load(Relaxed), 2);
    assert_eq!(metrics.nodes_deleted.load(Relaxed), 1);
    assert_eq!(metrics.commits.load(Relaxed), 3);
    assert_eq!(metrics.aborts.load(Relaxed), 1);
    assert!(metrics.log_records.load(Relaxed) > 0);
    Ok(())
}
