#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use pmgraph::primitives::io::MemIo;
use pmgraph::{props, Graph, NodeId, Pool, PoolOptions, PropValue, Properties, Result, Transaction};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

const LABELS: [&str; 3] = ["Person", "City", "Thing"];

#[derive(Debug, Clone)]
enum Op {
    Create { label: usize, value: i64 },
    Update { pick: usize, key: u8, value: i64 },
    Delete { pick: usize },
    Commit,
    Abort,
    Reopen,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..LABELS.len(), any::<i64>()).prop_map(|(label, value)| Op::Create { label, value }),
        3 => (any::<usize>(), 0u8..3, any::<i64>())
            .prop_map(|(pick, key, value)| Op::Update { pick, key, value }),
        2 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
        2 => Just(Op::Commit),
        1 => Just(Op::Abort),
        1 => Just(Op::Reopen),
    ]
}

type Model = BTreeMap<NodeId, (String, Properties)>;

struct Harness {
    mem: Arc<MemIo>,
    pool: Pool,
    graph: Graph,
    committed: Model,
    open: Option<(Transaction, Model)>,
}

impl Harness {
    fn new() -> Result<Self> {
        let mem = Arc::new(MemIo::new());
        let pool = Pool::create_with_io(mem.clone(), 1 << 20, PoolOptions::default())?;
        let graph = pool.create_graph("model", 1024)?;
        Ok(Self {
            mem,
            pool,
            graph,
            committed: Model::new(),
            open: None,
        })
    }

    fn working(&mut self) -> Result<&mut (Transaction, Model)> {
        if self.open.is_none() {
            let txn = self.graph.begin()?;
            self.open = Some((txn, self.committed.clone()));
        }
        Ok(self.open.as_mut().expect("transaction just opened"))
    }

    fn apply(&mut self, op: Op) -> Result<()> {
        let graph = self.graph.clone();
        match op {
            Op::Create { label, value } => {
                let label = LABELS[label];
                let properties = props([("v", PropValue::from(value))]);
                let (txn, model) = self.working()?;
                let id = graph.create_node(txn, label, properties.clone())?;
                assert!(!model.contains_key(&id), "id {id} handed out twice");
                model.insert(id, (label.to_owned(), properties));
            }
            Op::Update { pick, key, value } => {
                let (txn, model) = self.working()?;
                let Some(id) = nth_key(model, pick) else {
                    return Ok(());
                };
                let change = props([(format!("k{key}"), PropValue::from(value))]);
                graph.update_node(txn, id, change.clone())?;
                if let Some((_, properties)) = model.get_mut(&id) {
                    properties.extend(change);
                }
            }
            Op::Delete { pick } => {
                let (txn, model) = self.working()?;
                let Some(id) = nth_key(model, pick) else {
                    return Ok(());
                };
                graph.delete_node(txn, id)?;
                model.remove(&id);
                assert!(graph.delete_node(txn, id).unwrap_err().is_not_found());
            }
            Op::Commit => {
                if let Some((mut txn, model)) = self.open.take() {
                    graph.commit(&mut txn)?;
                    self.committed = model;
                }
            }
            Op::Abort => {
                if let Some((mut txn, _)) = self.open.take() {
                    graph.abort(&mut txn)?;
                }
            }
            Op::Reopen => {
                self.open = None;
                self.pool.close()?;
                self.pool = Pool::open_with_io(self.mem.clone(), PoolOptions::default())?;
                self.graph = self.pool.open_graph("model")?;
            }
        }
        self.check()
    }

    fn check(&self) -> Result<()> {
        let stored: Model = self
            .graph
            .nodes()?
            .into_iter()
            .map(|node| (node.id, (node.label, node.properties)))
            .collect();
        assert_eq!(stored, self.committed);
        assert_eq!(self.graph.node_count()? as usize, self.committed.len());
        for label in LABELS {
            let expected = self.committed.values().filter(|(l, _)| l == label).count();
            assert_eq!(self.graph.nodes_by_label(label)?.len(), expected);
        }
        Ok(())
    }
}

fn nth_key(model: &Model, pick: usize) -> Option<NodeId> {
    if model.is_empty() {
        return None;
    }
    model.keys().nth(pick % model.len()).copied()
}

fn run(ops: Vec<Op>) -> Result<()> {
    let mut harness = Harness::new()?;
    for op in ops {
        harness.apply(op)?;
    }
    harness.open = None;
    let report = harness.pool.verify()?;
    assert!(report.success, "{:?}", report.findings);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn graph_matches_an_in_memory_model(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        run(ops).map_err(|err| TestCaseError::fail(err.to_string()))?;
    }
}
