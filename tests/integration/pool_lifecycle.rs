#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use pmgraph::primitives::region::META_OFFSET;
use pmgraph::{props, Pool, PoolError, PoolOptions, PropValue, Result};
use tempfile::tempdir;

const MIB: u64 = 1 << 20;

fn poke(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).expect("open");
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.write_all(bytes).expect("write");
}

#[test]
fn drop_then_reopen_shows_no_graphs() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("pool");
    let pool = Pool::create(&path, 80 * MIB)?;
    let graph = pool.create_graph("g1", 1000)?;
    assert_eq!(graph.capacity(), 1000);
    pool.drop_graph("g1")?;
    pool.close()?;

    let pool = Pool::open(&path)?;
    assert!(pool.graph_names()?.is_empty());
    assert!(pool.open_graph("g1").unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn reopen_keeps_size_and_graphs() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("keep.pool");
    let pool = Pool::create(&path, 4 * MIB)?;
    pool.create_graph("people", 100)?;
    pool.create_graph("movies", 50)?;
    let before = pool.stats()?;
    pool.close()?;

    let pool = Pool::open(&path)?;
    assert_eq!(fs::metadata(&path)?.len(), 4 * MIB);
    assert_eq!(pool.graph_names()?, ["movies", "people"]);
    let after = pool.stats()?;
    assert_eq!(after.pool_size, 4 * MIB);
    assert_eq!(after.heap_top, before.heap_top);
    assert_eq!(after.free_blocks, before.free_blocks);
    assert_eq!(after.free_bytes, before.free_bytes);
    assert_eq!(after.last_lsn, before.last_lsn);
    let movies = pool.open_graph("movies")?;
    assert_eq!(movies.capacity(), 50);
    assert_eq!(movies.node_count()?, 0);
    Ok(())
}

#[test]
fn create_on_an_existing_pool() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("twice.pool");
    let pool = Pool::create(&path, MIB)?;
    pool.create_graph("g", 8)?;
    pool.close()?;

    let same = Pool::create(&path, MIB)?;
    assert_eq!(same.graph_names()?, ["g"]);
    same.close()?;

    assert!(matches!(
        Pool::create(&path, 2 * MIB),
        Err(PoolError::AlreadyExists { .. })
    ));
    assert_eq!(fs::metadata(&path)?.len(), MIB);

    let text = dir.path().join("notes.txt");
    fs::write(&text, b"not a pool at all")?;
    assert!(matches!(
        Pool::create(&text, MIB),
        Err(PoolError::AlreadyExists { .. })
    ));
    assert_eq!(fs::read(&text)?, b"not a pool at all");
    Ok(())
}

#[test]
fn rejects_sizes_below_the_minimum() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tiny.pool");
    assert!(matches!(
        Pool::create(&path, 1024),
        Err(PoolError::Invalid(_))
    ));
    assert!(!path.exists());
    Ok(())
}

#[test]
fn open_missing_pool_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let err = Pool::open(dir.path().join("absent.pool")).unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[test]
fn second_open_is_busy_until_close() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("busy.pool");
    let pool = Pool::create(&path, MIB)?;
    assert!(matches!(Pool::open(&path), Err(PoolError::Busy(_))));
    assert!(matches!(Pool::create(&path, MIB), Err(PoolError::Busy(_))));
    pool.close()?;
    let again = Pool::open(&path)?;
    again.close()?;
    Ok(())
}

#[test]
fn dropping_the_last_handle_releases_the_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("scoped.pool");
    {
        let pool = Pool::create(&path, MIB)?;
        pool.create_graph("g", 4)?;
    }
    let pool = Pool::open(&path)?;
    assert_eq!(pool.graph_names()?, ["g"]);
    Ok(())
}

#[test]
fn close_is_idempotent_and_final() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("closed.pool");
    let pool = Pool::create(&path, MIB)?;
    let graph = pool.create_graph("g", 4)?;
    pool.close()?;
    pool.close()?;
    assert!(matches!(pool.graph_names(), Err(PoolError::Closed)));
    assert!(matches!(pool.create_graph("h", 4), Err(PoolError::Closed)));
    assert!(matches!(graph.begin(), Err(PoolError::Closed)));
    assert!(matches!(graph.nodes(), Err(PoolError::Closed)));
    Ok(())
}

#[test]
fn close_with_an_open_transaction_is_busy() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("close_busy.pool");
    let pool = Pool::create(&path, MIB)?;
    let graph = pool.create_graph("g", 4)?;
    let mut txn = graph.begin()?;
    assert!(matches!(pool.close(), Err(PoolError::Busy(_))));
    graph.abort(&mut txn)?;
    pool.close()?;
    Ok(())
}

#[test]
fn destroy_removes_a_closed_pool() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("gone.pool");
    let pool = Pool::create(&path, MIB)?;
    assert!(matches!(Pool::destroy(&path), Err(PoolError::Busy(_))));
    pool.close()?;
    Pool::destroy(&path)?;
    assert!(!path.exists());
    assert!(Pool::destroy(&path).unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn resized_file_is_a_size_mismatch() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("grown.pool");
    Pool::create(&path, MIB)?.close()?;
    OpenOptions::new()
        .write(true)
        .open(&path)?
        .set_len(MIB + 4096)?;
    match Pool::open(&path) {
        Err(PoolError::SizeMismatch { expected, found }) => {
            assert_eq!(expected, MIB);
            assert_eq!(found, MIB + 4096);
        }
        other => panic!("expected size mismatch, got {other:?}"),
    }
    Ok(())
}

#[test]
fn damaged_superblock_is_corruption() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("damaged.pool");
    let pool = Pool::create(&path, MIB)?;
    pool.create_graph("g", 4)?;
    pool.close()?;
    poke(&path, META_OFFSET + 9, &[0x5A, 0xA5]);
    assert!(matches!(Pool::open(&path), Err(PoolError::Corruption(_))));
    Ok(())
}

#[test]
fn allocator_state_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("alloc.pool");
    let pool = Pool::create(&path, 2 * MIB)?;
    let graph = pool.create_graph("g", 64)?;
    let mut txn = graph.begin()?;
    let mut ids = Vec::new();
    for i in 0..40i64 {
        ids.push(graph.create_node(&mut txn, "Item", props([("n", PropValue::from(i))]))?);
    }
    graph.commit(&mut txn)?;
    let mut txn = graph.begin()?;
    for id in ids.iter().step_by(3) {
        graph.delete_node(&mut txn, *id)?;
    }
    graph.commit(&mut txn)?;
    let before = pool.stats()?;
    assert!(before.free_blocks > 0);
    pool.close()?;

    let pool = Pool::open(&path)?;
    let after = pool.stats()?;
    assert_eq!(after.heap_top, before.heap_top);
    assert_eq!(after.free_blocks, before.free_blocks);
    assert_eq!(after.free_bytes, before.free_bytes);
    let graph = pool.open_graph("g")?;
    assert_eq!(graph.node_count()?, 40 - ids.iter().step_by(3).count() as u32);
    assert!(pool.verify()?.success);
    Ok(())
}

#[test]
fn options_are_honoured() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("opts.pool");
    let pool = Pool::create_with(
        &path,
        MIB,
        PoolOptions::new()
            .log_capacity(64 * 1024)
            .synchronous(pmgraph::Synchronous::Off),
    )?;
    assert_eq!(pool.stats()?.log_capacity, 64 * 1024);
    let graph = pool.create_graph("g", 4)?;
    let mut txn = graph.begin()?;
    let id = graph.create_node(&mut txn, "A", props([("k", PropValue::from(1))]))?;
    graph.commit(&mut txn)?;
    pool.close()?;

    let pool = Pool::open_with(&path, PoolOptions::new().verify_checksums(false))?;
    assert_eq!(pool.open_graph("g")?.get_node(id)?.label, "A");
    Ok(())
}

#[test]
fn create_refuses_a_file_with_data_past_the_header() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("foreign.bin");
    let mut contents = vec![0u8; 4096];
    contents.extend_from_slice(b"precious user data");
    fs::write(&path, &contents)?;

    let err = Pool::create(&path, 4 * MIB).unwrap_err();
    assert!(matches!(err, PoolError::AlreadyExists { .. }), "{err:?}");
    assert_eq!(fs::metadata(&path)?.len(), contents.len() as u64);
    assert_eq!(fs::read(&path)?, contents);
    Ok(())
}
