#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use pmgraph::primitives::io::MemIo;
use pmgraph::primitives::region::LOG_OFFSET;
use pmgraph::{props, Pool, PoolOptions, PropValue};

/// A small pool with one committed node; its log slot is overwritten per input.
fn base_image() -> &'static Vec<u8> {
    static IMAGE: OnceLock<Vec<u8>> = OnceLock::new();
    IMAGE.get_or_init(|| {
        let mem = Arc::new(MemIo::new());
        let pool = Pool::create_with_io(mem.clone(), 128 * 1024, PoolOptions::default())
            .expect("create pool");
        let graph = pool.create_graph("g", 16).expect("create graph");
        let mut txn = graph.begin().expect("begin");
        graph
            .create_node(&mut txn, "Seed", props([("v", PropValue::from(1))]))
            .expect("create node");
        graph.commit(&mut txn).expect("commit");
        pool.close().expect("close");
        mem.image()
    })
}

fuzz_target!(|data: &[u8]| {
    let mut image = base_image().clone();
    let start = LOG_OFFSET as usize;
    let end = (start + data.len()).min(image.len());
    image[start..end].copy_from_slice(&data[..end - start]);

    let io = Arc::new(MemIo::from_bytes(image));
    // Recovery may refuse the region, but it must never panic, and whatever
    // it accepts must read back cleanly.
    if let Ok(pool) = Pool::open_with_io(io, PoolOptions::default()) {
        if let Ok(names) = pool.graph_names() {
            for name in names {
                if let Ok(graph) = pool.open_graph(&name) {
                    let _ = graph.nodes();
                }
            }
        }
        let _ = pool.verify();
    }
});
