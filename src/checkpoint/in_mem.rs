//! Checkpoint store with all bundles in memory.
//!
//! Useful for tests and for handing bundles between loaders in one
//! process.

use std::collections::BTreeMap;

use super::{CheckpointBundle, CheckpointSeq, CheckpointStore};
use crate::errors::Result;

#[derive(Debug, Default)]
pub struct InMemStore {
    db: BTreeMap<String, BTreeMap<CheckpointSeq, CheckpointBundle>>,
}

impl InMemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all but the newest `keep` bundles for each name.
    pub fn retain_latest(&mut self, keep: usize) {
        for bundles in self.db.values_mut() {
            let drop_count = bundles.len().saturating_sub(keep);
            if let Some(split_seq) = bundles.keys().nth(drop_count).copied() {
                *bundles = bundles.split_off(&split_seq);
            } else {
                bundles.clear();
            }
        }
        self.db.retain(|_name, bundles| !bundles.is_empty());
    }
}

impl CheckpointStore for InMemStore {
    fn save(&mut self, name: &str, bundle: &CheckpointBundle) -> Result<CheckpointSeq> {
        let bundles = self.db.entry(name.to_owned()).or_default();
        let seq = bundles.keys().next_back().map_or(0, |last| last + 1);
        tracing::trace!("Saving checkpoint {name:?} #{seq}");
        bundles.insert(seq, bundle.clone());
        Ok(seq)
    }

    fn load(&self, name: &str, seq: CheckpointSeq) -> Result<Option<CheckpointBundle>> {
        Ok(self
            .db
            .get(name)
            .and_then(|bundles| bundles.get(&seq))
            .cloned())
    }

    fn latest(&self, name: &str) -> Result<Option<CheckpointBundle>> {
        Ok(self
            .db
            .get(name)
            .and_then(|bundles| bundles.values().next_back())
            .cloned())
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.db.keys().cloned().collect())
    }
}

#[test]
fn save_assigns_increasing_seqs_per_name() {
    let mut store = InMemStore::new();
    let a = CheckpointBundle::new(b"a".to_vec(), None);
    let b = CheckpointBundle::new(b"b".to_vec(), Some(b"s".to_vec()));

    assert_eq!(store.save("run", &a).unwrap(), 0);
    assert_eq!(store.save("run", &b).unwrap(), 1);
    assert_eq!(store.save("other", &a).unwrap(), 0);

    assert_eq!(store.latest("run").unwrap(), Some(b));
    assert_eq!(store.load("run", 0).unwrap(), Some(a));
    assert_eq!(store.load("run", 7).unwrap(), None);
    assert_eq!(store.latest("missing").unwrap(), None);
    assert_eq!(store.names().unwrap(), vec!["other", "run"]);
}

#[test]
fn retain_latest_keeps_newest() {
    let mut store = InMemStore::new();
    for i in 0..4_u8 {
        store
            .save("run", &CheckpointBundle::new(vec![i], None))
            .unwrap();
    }
    store.save("one", &CheckpointBundle::new(vec![9], None)).unwrap();

    store.retain_latest(2);

    assert_eq!(store.load("run", 1).unwrap(), None);
    assert_eq!(
        store.load("run", 2).unwrap(),
        Some(CheckpointBundle::new(vec![2], None))
    );
    assert_eq!(
        store.latest("run").unwrap(),
        Some(CheckpointBundle::new(vec![3], None))
    );
    assert!(store.latest("one").unwrap().is_some());
    // Sequence numbers keep increasing after pruning.
    assert_eq!(
        store.save("run", &CheckpointBundle::new(vec![4], None)).unwrap(),
        4
    );

    store.retain_latest(0);
    assert!(store.names().unwrap().is_empty());
}
