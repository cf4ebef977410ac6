#![allow(missing_docs)]

use std::path::Path;

use pmgraph::{props, Graph, NodeId, Pool, PoolError, PropValue, Properties, Result};
use tempfile::{tempdir, TempDir};

fn fresh(name: &str) -> Result<(TempDir, Pool)> {
    let dir = tempdir()?;
    let pool = Pool::create(dir.path().join(name), 4 << 20)?;
    Ok((dir, pool))
}

fn people(graph: &Graph, names: &[&str]) -> Result<Vec<NodeId>> {
    let mut txn = graph.begin()?;
    let ids = names
        .iter()
        .map(|name| {
            graph.create_node(&mut txn, "Person", props([("name", PropValue::from(*name))]))
        })
        .collect::<Result<Vec<_>>>()?;
    graph.commit(&mut txn)?;
    Ok(ids)
}

fn reopen(path: &Path) -> Result<(Pool, Graph)> {
    let pool = Pool::open(path)?;
    let graph = pool.open_graph("social")?;
    Ok((pool, graph))
}

#[test]
fn committed_relationships_survive_reopen() -> Result<()> {
    let (dir, pool) = fresh("social.pool")?;
    let path = dir.path().join("social.pool");
    let graph = pool.create_graph("social", 16)?;
    assert_eq!(graph.relationship_capacity(), 64);
    assert_eq!(graph.relationship_count()?, 0);
    let ids = people(&graph, &["ann", "bo", "cy"])?;

    let mut txn = graph.begin()?;
    let knows = graph.create_relationship(
        &mut txn,
        ids[0],
        ids[1],
        "KNOWS",
        props([("since", PropValue::from(2019))]),
    )?;
    let likes = graph.create_relationship(&mut txn, ids[1], ids[2], "LIKES", Properties::new())?;
    assert!(graph.get_relationship(knows).unwrap_err().is_not_found());
    graph.commit(&mut txn)?;

    let rel = graph.get_relationship(knows)?;
    assert_eq!((rel.src, rel.dst), (ids[0], ids[1]));
    assert_eq!(rel.label, "KNOWS");
    assert_eq!(rel.properties["since"].as_int(), Some(2019));
    pool.close()?;

    let (pool, graph) = reopen(&path)?;
    assert_eq!(graph.relationship_count()?, 2);
    assert_eq!(graph.get_relationship(knows)?, rel);
    let of_bo: Vec<_> = graph.relationships_of(ids[1])?.iter().map(|r| r.id).collect();
    assert_eq!(of_bo, [knows, likes]);
    assert_eq!(graph.relationships_of(ids[2])?.len(), 1);
    assert_eq!(graph.relationships()?.len(), 2);
    let report = pool.verify()?;
    assert!(report.success, "{:?}", report.findings);
    assert_eq!(report.counts.relationships, 2);
    Ok(())
}

#[test]
fn endpoints_must_be_visible_to_the_transaction() -> Result<()> {
    let (_dir, pool) = fresh("ends.pool")?;
    let graph = pool.create_graph("social", 8)?;
    let ids = people(&graph, &["ann", "bo"])?;

    let mut txn = graph.begin()?;
    let ghost = NodeId::new(5, 9);
    let err = graph
        .create_relationship(&mut txn, ids[0], ghost, "KNOWS", Properties::new())
        .unwrap_err();
    assert!(err.is_not_found());

    let fresh_node = graph.create_node(&mut txn, "Person", Properties::new())?;
    graph.create_relationship(&mut txn, fresh_node, ids[0], "KNOWS", Properties::new())?;
    graph.delete_node(&mut txn, ids[1])?;
    assert!(graph
        .create_relationship(&mut txn, ids[0], ids[1], "KNOWS", Properties::new())
        .unwrap_err()
        .is_not_found());
    graph.commit(&mut txn)?;
    assert_eq!(graph.relationships_of(ids[0])?.len(), 1);
    Ok(())
}

#[test]
fn aborted_relationships_leave_nothing_behind() -> Result<()> {
    let (dir, pool) = fresh("abort.pool")?;
    let path = dir.path().join("abort.pool");
    let graph = pool.create_graph("social", 8)?;
    let ids = people(&graph, &["ann", "bo"])?;

    let mut txn = graph.begin()?;
    let aborted = graph.create_relationship(&mut txn, ids[0], ids[1], "KNOWS", Properties::new())?;
    graph.abort(&mut txn)?;
    assert!(graph.get_relationship(aborted).unwrap_err().is_not_found());
    assert_eq!(graph.relationship_count()?, 0);
    pool.close()?;

    let (pool, graph) = reopen(&path)?;
    let mut txn = graph.begin()?;
    let kept = graph.create_relationship(&mut txn, ids[0], ids[1], "KNOWS", Properties::new())?;
    graph.commit(&mut txn)?;
    assert_ne!(kept, aborted);
    assert!(graph.get_relationship(aborted).unwrap_err().is_not_found());
    assert_eq!(graph.get_relationship(kept)?.label, "KNOWS");
    assert!(pool.verify()?.success);
    Ok(())
}

#[test]
fn deleting_a_node_detaches_its_relationships() -> Result<()> {
    let (_dir, pool) = fresh("detach.pool")?;
    let graph = pool.create_graph("social", 8)?;
    let ids = people(&graph, &["ann", "bo", "cy"])?;

    let mut txn = graph.begin()?;
    let ab = graph.create_relationship(&mut txn, ids[0], ids[1], "KNOWS", Properties::new())?;
    let bc = graph.create_relationship(&mut txn, ids[1], ids[2], "KNOWS", Properties::new())?;
    let ca = graph.create_relationship(&mut txn, ids[2], ids[0], "KNOWS", Properties::new())?;
    graph.commit(&mut txn)?;

    let mut txn = graph.begin()?;
    let pending = graph.create_relationship(&mut txn, ids[1], ids[1], "SELF", Properties::new())?;
    graph.delete_node(&mut txn, ids[1])?;
    assert!(graph
        .delete_relationship(&mut txn, ab)
        .unwrap_err()
        .is_not_found());
    graph.commit(&mut txn)?;

    assert!(graph.get_node(ids[1]).unwrap_err().is_not_found());
    for gone in [ab, bc, pending] {
        assert!(graph.get_relationship(gone).unwrap_err().is_not_found());
    }
    let left: Vec<_> = graph.relationships()?.iter().map(|r| r.id).collect();
    assert_eq!(left, [ca]);
    assert_eq!(graph.relationship_count()?, 1);
    assert!(pool.verify()?.success);
    Ok(())
}

#[test]
fn delete_relationship_keeps_its_endpoints() -> Result<()> {
    let (_dir, pool) = fresh("unlink.pool")?;
    let graph = pool.create_graph("social", 8)?;
    let ids = people(&graph, &["ann", "bo"])?;
    let mut txn = graph.begin()?;
    let rel = graph.create_relationship(&mut txn, ids[0], ids[1], "KNOWS", Properties::new())?;
    graph.commit(&mut txn)?;

    let mut txn = graph.begin()?;
    graph.delete_relationship(&mut txn, rel)?;
    assert_eq!(graph.get_relationship(rel)?.label, "KNOWS");
    graph.commit(&mut txn)?;
    assert!(graph.get_relationship(rel).unwrap_err().is_not_found());
    assert!(graph.relationships_of(ids[0])?.is_empty());
    assert_eq!(graph.node_count()?, 2);
    Ok(())
}

#[test]
fn relationship_capacity_is_enforced() -> Result<()> {
    let (_dir, pool) = fresh("full.pool")?;
    let graph = pool.create_graph("social", 1)?;
    let ids = people(&graph, &["solo"])?;
    let mut txn = graph.begin()?;
    for _ in 0..graph.relationship_capacity() {
        graph.create_relationship(&mut txn, ids[0], ids[0], "SELF", Properties::new())?;
    }
    let err = graph
        .create_relationship(&mut txn, ids[0], ids[0], "SELF", Properties::new())
        .unwrap_err();
    assert!(matches!(err, PoolError::CapacityExceeded { .. }), "{err:?}");
    graph.commit(&mut txn)?;
    assert_eq!(graph.relationship_count()?, 4);
    Ok(())
}

#[test]
fn dropping_a_graph_frees_its_relationship_table() -> Result<()> {
    let (_dir, pool) = fresh("drop.pool")?;
    let graph = pool.create_graph("social", 8)?;
    let ids = people(&graph, &["ann", "bo"])?;
    let mut txn = graph.begin()?;
    graph.create_relationship(&mut txn, ids[0], ids[1], "KNOWS", Properties::new())?;
    graph.commit(&mut txn)?;
    drop(graph);

    pool.drop_graph("social")?;
    assert!(pool.stats()?.free_bytes > 0);
    let report = pool.verify()?;
    assert!(report.success, "{:?}", report.findings);
    assert_eq!(report.counts.relationships, 0);
    Ok(())
}
