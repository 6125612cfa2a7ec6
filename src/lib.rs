//! Iteration orchestration for data-loading pipelines.
//!
//! A [`Loader`] takes a pipeline graph (anything implementing
//! [`DataPipe`]), applies configured [`adapter::Adapter`]s to its own
//! copy, hands it to an optional [`ExecutionBackend`], and runs
//! iteration sessions over it. Each session hands out a
//! [`LoaderIter`] proxy; starting a new session invalidates older
//! ones.
//!
//! Sessions are seeded from a [`SeedGenerator`], so a loader with a
//! fixed seed produces the same per-session seeds every run.
//! [`Loader::checkpoint`] captures the graph and backend state in a
//! [`CheckpointBundle`], and [`Loader::restore`] or
//! [`Loader::from_checkpoint`] rebuilds from one.
//!
//! ```
//! use pipeloader::{DataPipe, Loader, StageError};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Evens(u64);
//!
//! impl DataPipe for Evens {
//!     type Item = u64;
//!     type Iter = std::vec::IntoIter<Result<u64, StageError>>;
//!
//!     fn iter(&self) -> Self::Iter {
//!         (0..self.0).map(|x| Ok(x * 2)).collect::<Vec<_>>().into_iter()
//!     }
//!
//!     fn fork(&self) -> Self {
//!         Evens(self.0)
//!     }
//! }
//!
//! let mut loader = Loader::new(&Evens(3)).unwrap();
//! let items: Vec<u64> = loader
//!     .start_session()
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(items, vec![0, 2, 4]);
//! ```
//!
//! Logging goes through `tracing`; see [`logging`] to install a
//! subscriber. Metrics go through OpenTelemetry; see [`metrics`].

pub mod adapter;
pub mod backend;
pub mod checkpoint;
pub mod config;
mod errors;
pub mod graph;
mod loader;
pub mod logging;
pub mod metrics;
pub mod seed;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::backend::{CheckpointableBackend, ExecutionBackend, GraphRewrite, RestoreMode};
pub use crate::checkpoint::{CheckpointBundle, CheckpointStore};
pub use crate::config::{ConcurrencySpec, LoaderConfig};
pub use crate::errors::{BoxError, Error, Result};
pub use crate::graph::{DataPipe, GraphCodec, JsonCodec, StageError};
pub use crate::loader::{BoxBackend, Loader, LoaderBuilder, LoaderIter};
pub use crate::seed::SeedGenerator;
