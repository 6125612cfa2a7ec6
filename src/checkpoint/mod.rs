//! Checkpoint bundles and where to keep them.
//!
//! A [`CheckpointBundle`] is what [`crate::Loader::checkpoint`]
//! returns: the graph as it was _before_ backend adaptation, encoded
//! by the loader's graph codec, plus the backend's own serialized
//! state. Both are opaque bytes; compatibility across versions is up
//! to the codec and the backend.
//!
//! Stores persist bundles under a name with an increasing sequence
//! number, so a training run can keep a history and resume from the
//! latest one.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

pub(crate) mod in_mem;
pub(crate) mod sqlite;

pub use in_mem::InMemStore;
pub use sqlite::SqliteStore;

/// Immutable snapshot of graph and backend state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckpointBundle {
    serialized_graph: Vec<u8>,
    backend_state: Option<Vec<u8>>,
}

impl CheckpointBundle {
    pub fn new(serialized_graph: Vec<u8>, backend_state: Option<Vec<u8>>) -> Self {
        Self {
            serialized_graph,
            backend_state,
        }
    }

    pub fn serialized_graph(&self) -> &[u8] {
        &self.serialized_graph
    }

    pub fn backend_state(&self) -> Option<&[u8]> {
        self.backend_state.as_deref()
    }

    /// Encode for transport between processes or machines.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| Error::Codec(err.into()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| Error::Codec(err.into()))
    }
}

/// Sequence number of a saved bundle within its name.
///
/// Starts at 0 and increases by 1 with each save.
pub type CheckpointSeq = u64;

/// Durable home for checkpoint bundles.
pub trait CheckpointStore {
    /// Append a bundle under `name`, returning its sequence number.
    fn save(&mut self, name: &str, bundle: &CheckpointBundle) -> Result<CheckpointSeq>;

    fn load(&self, name: &str, seq: CheckpointSeq) -> Result<Option<CheckpointBundle>>;

    /// The most recently saved bundle under `name`.
    fn latest(&self, name: &str) -> Result<Option<CheckpointBundle>>;

    /// All names with at least one bundle, sorted.
    fn names(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use serde_test::{assert_tokens, Token};

    use super::*;

    #[test]
    fn bundle_slots_are_named() {
        let bundle = CheckpointBundle::new(vec![1, 2], None);
        assert_tokens(
            &bundle,
            &[
                Token::Struct {
                    name: "CheckpointBundle",
                    len: 2,
                },
                Token::Str("serialized-graph"),
                Token::Seq { len: Some(2) },
                Token::U8(1),
                Token::U8(2),
                Token::SeqEnd,
                Token::Str("backend-state"),
                Token::None,
                Token::StructEnd,
            ],
        );
    }

    #[test]
    fn bundle_bytes_survive_transport() {
        let bundle = CheckpointBundle::new(b"graph".to_vec(), Some(b"state".to_vec()));
        let bytes = bundle.to_bytes().unwrap();
        let found = CheckpointBundle::from_bytes(&bytes).unwrap();
        assert_eq!(found, bundle);
        assert_eq!(found.backend_state(), Some(&b"state"[..]));
    }

    #[test]
    fn bundle_from_garbage_is_codec_error() {
        assert!(matches!(
            CheckpointBundle::from_bytes(b"{"),
            Err(Error::Codec(_))
        ));
    }
}
