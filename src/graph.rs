//! The contract a pipeline graph offers the loader.
//!
//! The loader treats a graph as opaque. It only needs to draw fresh
//! iterators from it, fork it into an independent copy, and hand it
//! to a [`GraphCodec`] for checkpointing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::errors::BoxError;

/// Non-item outcomes of pulling from a graph iterator.
#[derive(Debug, Error)]
pub enum StageError {
    /// A stage asked for a resumable suspension.
    ///
    /// The session ends like exhaustion, but the graph keeps its
    /// position so the next session continues where this one stopped.
    #[error("pipeline paused")]
    Paused,

    #[error("stage failed: {0}")]
    Failed(#[source] BoxError),
}

impl StageError {
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::Failed(err.into())
    }
}

/// A composed graph of transformation stages.
pub trait DataPipe {
    type Item;
    /// Iterators must own what they need; they may share position
    /// state with the graph they came from.
    type Iter: Iterator<Item = Result<Self::Item, StageError>>;

    /// Draw a fresh iterator over the graph's current state.
    fn iter(&self) -> Self::Iter;

    /// Copy the graph with independent state.
    ///
    /// Unlike a shallow [`Clone`] of a handle, mutating the fork must
    /// never be visible through the original.
    fn fork(&self) -> Self
    where
        Self: Sized;
}

/// Serializes graphs to opaque bytes and back.
pub trait GraphCodec<G> {
    fn encode(&self, graph: &G) -> Result<Vec<u8>, BoxError>;

    fn decode(&self, bytes: &[u8]) -> Result<G, BoxError>;
}

/// JSON codec for any serde graph.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl<G> GraphCodec<G> for JsonCodec
where
    G: Serialize + DeserializeOwned,
{
    fn encode(&self, graph: &G) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(graph)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<G, BoxError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[test]
fn json_codec_rejects_garbage() {
    let res: Result<Vec<u32>, _> = JsonCodec.decode(b"not json");
    assert!(res.is_err());
}
