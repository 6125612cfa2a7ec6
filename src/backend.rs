//! The lifecycle contract for execution backends.
//!
//! A backend decides _how_ a graph runs: in this thread, across
//! worker threads or processes, or on remote nodes. The loader only
//! calls these hooks at fixed points of a session and never assumes
//! anything about the backend's internals.
//!
//! Hook order over a loader's lifetime:
//!
//! 1. [`ExecutionBackend::initialize`] or
//!    [`CheckpointableBackend::restore`], exactly once, before the
//!    first element is pulled.
//! 2. Per session: [`ExecutionBackend::initialize_iteration`], then
//!    pulls, then [`ExecutionBackend::finalize_iteration`].
//! 3. [`ExecutionBackend::finalize`] once on shutdown.

use std::fmt;

use crate::errors::BoxError;
use crate::seed::SeedGenerator;

/// Graph rewrite returned by [`ExecutionBackend::initialize_iteration`].
///
/// Applied to the graph before the session's iterator is drawn,
/// e.g. to inject a per-session seed.
pub type GraphRewrite<G> = Box<dyn FnOnce(&mut G)>;

/// What restoring a checkpoint means for a backend.
///
/// Backends differ here, so each checkpointable backend declares it
/// instead of the loader assuming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Continue the partially consumed sequence.
    Resume,
    /// Start the sequence over from the beginning.
    Replay,
}

impl fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreMode::Resume => f.write_str("resume"),
            RestoreMode::Replay => f.write_str("replay"),
        }
    }
}

pub trait ExecutionBackend<G> {
    /// Adapt the graph for this backend.
    fn initialize(&mut self, graph: &mut G) -> Result<(), BoxError>;

    /// Called at the start of every session.
    fn initialize_iteration(
        &mut self,
        _seeds: &mut SeedGenerator,
    ) -> Result<Option<GraphRewrite<G>>, BoxError> {
        Ok(None)
    }

    /// Called when a session ends.
    ///
    /// Must be safe to call when no iteration is in progress.
    fn finalize_iteration(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release all resources. Must be safe to call more than once.
    fn finalize(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// The checkpointing capability, if this backend has it.
    fn as_checkpointable(&mut self) -> Option<&mut dyn CheckpointableBackend<G>> {
        None
    }
}

/// Backends that can persist and restore their state.
pub trait CheckpointableBackend<G> {
    fn checkpoint(&mut self) -> Result<Vec<u8>, BoxError>;

    /// Rebuild the backend-adapted graph from serialized state.
    ///
    /// Called instead of [`ExecutionBackend::initialize`].
    fn restore(&mut self, graph: &mut G, state: &[u8]) -> Result<(), BoxError>;

    fn restore_mode(&self) -> RestoreMode;
}
