//! The iteration orchestrator.
//!
//! A [`Loader`] owns a pipeline graph and an optional execution
//! backend and hands out one [`LoaderIter`] per session. It is the
//! only place backend lifecycle hooks are called from.
//!
//! Session Phases
//! --------------
//!
//! ```text
//! Fresh ──start──▶ Iterating ──end / pause──▶ Exhausted ──start──▶ Iterating
//!                      │                                                │
//!                      └────────── failure / shutdown ──▶ Terminated ◀──┘
//! ```
//!
//! Starting a session while an iterator is live issues a new id and
//! so invalidates every older [`LoaderIter`]. If the live iterator was
//! already pulled from, the round is over and a fresh iterator is
//! drawn; if not, the new proxy takes over the untouched iterator.
//!
//! Adaptation
//! ----------
//!
//! The graph is adapted by the backend exactly once, lazily at the
//! first session: with [`ExecutionBackend::initialize`], or with
//! [`CheckpointableBackend::restore`] when the loader was restored
//! from a [`CheckpointBundle`] carrying backend state. The graph as it
//! was right before that adaptation is kept as a separate fork, and
//! that fork is what checkpoints serialize.
//!
//! [`CheckpointableBackend::restore`]: crate::backend::CheckpointableBackend::restore

use std::cell::RefCell;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use tracing::instrument;

use crate::adapter::{self, Adapter};
use crate::backend::{ExecutionBackend, RestoreMode};
use crate::checkpoint::CheckpointBundle;
use crate::config::{ConcurrencySpec, LoaderConfig};
use crate::errors::{panic_message, Error, HookResult, Result};
use crate::graph::{DataPipe, GraphCodec, JsonCodec, StageError};
use crate::metrics::LoaderMetrics;
use crate::seed::{validate_seed, SeedGenerator};
use crate::with_timer;

mod iter;

pub use iter::LoaderIter;

/// Boxed backend as stored by a loader.
pub type BoxBackend<G> = Box<dyn ExecutionBackend<G>>;

/// Where the loader's session lifecycle is at.
enum Phase<I> {
    /// No iterator drawn yet.
    Fresh,
    /// An iterator is live. `started` once it was pulled from.
    Iterating { iter: I, started: bool },
    /// The last session ended by exhaustion or pause.
    Exhausted,
    Terminated,
}

impl<I> Phase<I> {
    fn needs_new_iterator(&self) -> bool {
        match self {
            Phase::Fresh | Phase::Exhausted => true,
            Phase::Iterating { started, .. } => *started,
            Phase::Terminated => false,
        }
    }

    fn is_live(&self) -> bool {
        matches!(self, Phase::Iterating { .. })
    }

    fn is_terminated(&self) -> bool {
        matches!(self, Phase::Terminated)
    }

    /// End the session, keeping the loader usable.
    fn exhaust(&mut self) {
        if !self.is_terminated() {
            *self = Phase::Exhausted;
        }
    }

    /// Enter the absorbing state. Returns whether this was the first
    /// time.
    fn terminate(&mut self) -> bool {
        let first = !self.is_terminated();
        *self = Phase::Terminated;
        first
    }
}

/// Outcome of one pull through a proxy.
pub(crate) enum Pull<T> {
    Item(T),
    /// The session is over; the proxy should report end of sequence.
    End,
    Failed(Error),
}

/// State shared between a [`Loader`] and its proxies.
pub(crate) struct Inner<G, C>
where
    G: DataPipe,
{
    /// Adapter-applied graph used for iteration. Backend adaptation
    /// and per-session rewrites mutate it in place.
    graph: Option<G>,
    /// Fork of `graph` from before backend adaptation.
    snapshot: Option<G>,
    adapters: Vec<Box<dyn Adapter<G>>>,
    backend: Option<BoxBackend<G>>,
    /// Backend state from a restored bundle, consumed by adaptation.
    pending_backend_state: Option<Vec<u8>>,
    adapted: bool,
    codec: C,
    seeds: SeedGenerator,
    seed: Option<u64>,
    reset_seed: bool,
    phase: Phase<G::Iter>,
    live_id: u64,
    concurrency: Option<ConcurrencySpec>,
    metrics: LoaderMetrics,
}

impl<G, C> Inner<G, C>
where
    G: DataPipe,
{
    fn start_session(&mut self) -> Result<u64> {
        if self.phase.is_terminated() {
            return Err(Error::Terminated);
        }
        if self.graph.is_none() {
            return Err(Error::MissingGraph);
        }

        if self.phase.needs_new_iterator() {
            if self.phase.is_live() {
                // The previous round was pulled from but never ran to
                // the end; close it before the backend sees a new one.
                tracing::debug!("Abandoning live iterator for new session");
                self.phase = Phase::Exhausted;
                if let Some(backend) = self.backend.as_mut() {
                    backend.finalize_iteration().hook("finalize_iteration")?;
                }
            }

            self.apply_seed();
            self.adapt()?;
            self.initialize_iteration()?;

            let graph = self.graph.as_ref().ok_or(Error::MissingGraph)?;
            self.phase = Phase::Iterating {
                iter: graph.iter(),
                started: false,
            };
            self.metrics.sessions.add(1, &[]);
        }

        self.live_id += 1;
        tracing::debug!("Issued iterator {}", self.live_id);
        Ok(self.live_id)
    }

    fn apply_seed(&mut self) {
        match self.seed {
            Some(seed) => {
                // A user seed applies once; later sessions keep
                // advancing the same streams.
                if self.reset_seed {
                    self.seeds.seed(seed);
                    self.reset_seed = false;
                }
            }
            None => self.seeds.reseed_from_entropy(),
        }
        tracing::trace!("Session root seed {}", self.seeds.root_seed());
    }

    fn adapt(&mut self) -> Result<()> {
        if self.adapted {
            return Ok(());
        }
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        let graph = self.graph.as_mut().ok_or(Error::MissingGraph)?;

        match &self.pending_backend_state {
            None => {
                tracing::info!("Initializing backend");
                backend.initialize(graph).hook("initialize")?;
            }
            Some(state) => {
                let backend = backend.as_checkpointable().ok_or_else(|| {
                    Error::IncompatibleBackend(
                        "backend is not checkpointable but the loader holds backend state"
                            .to_string(),
                    )
                })?;
                tracing::info!("Restoring backend ({})", backend.restore_mode());
                backend.restore(graph, state).hook("restore")?;
            }
        }

        self.pending_backend_state = None;
        self.adapted = true;
        Ok(())
    }

    fn initialize_iteration(&mut self) -> Result<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        let rewrite = backend
            .initialize_iteration(&mut self.seeds)
            .hook("initialize_iteration")?;
        if let (Some(rewrite), Some(graph)) = (rewrite, self.graph.as_mut()) {
            rewrite(graph);
        }
        Ok(())
    }

    pub(crate) fn pull(&mut self, id: u64) -> Pull<G::Item> {
        if self.phase.is_terminated() {
            return Pull::Failed(Error::Terminated);
        }
        if id != self.live_id {
            tracing::warn!("Pull through stale iterator {id}; live is {}", self.live_id);
            if let Some(backend) = self.backend.as_mut() {
                if let Err(err) = backend.finalize_iteration() {
                    tracing::warn!("finalize_iteration after stale pull failed: {err}");
                }
            }
            return Pull::Failed(Error::StaleIterator);
        }
        let Phase::Iterating { iter, started } = &mut self.phase else {
            return Pull::End;
        };
        *started = true;

        let step = with_timer!(
            self.metrics.next_duration,
            [],
            std::panic::catch_unwind(AssertUnwindSafe(|| iter.next()))
        );
        match step {
            Ok(Some(Ok(item))) => {
                self.metrics.items.add(1, &[]);
                Pull::Item(item)
            }
            Ok(Some(Err(StageError::Paused))) => {
                tracing::debug!("Pipeline paused; ending session");
                self.phase.exhaust();
                Pull::End
            }
            Ok(None) => {
                tracing::debug!("Pipeline exhausted; ending session");
                self.phase.exhaust();
                match self.backend.as_mut() {
                    Some(backend) => match backend.finalize_iteration().hook("finalize_iteration") {
                        Ok(()) => Pull::End,
                        Err(err) => Pull::Failed(err),
                    },
                    None => Pull::End,
                }
            }
            Ok(Some(Err(StageError::Failed(err)))) => {
                tracing::error!("Pipeline stage failed, shutting down: {err}");
                self.shutdown();
                Pull::Failed(Error::Stage(err))
            }
            Err(payload) => {
                tracing::error!(
                    "Pipeline panicked, shutting down: {}",
                    panic_message(payload.as_ref())
                );
                self.shutdown();
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Run `f` on the live iterator if `id` is current.
    pub(crate) fn with_live<R>(&mut self, id: u64, f: impl FnOnce(&mut G::Iter) -> R) -> Result<R> {
        if self.phase.is_terminated() {
            return Err(Error::Terminated);
        }
        match &mut self.phase {
            Phase::Iterating { iter, .. } if id == self.live_id => Ok(f(iter)),
            _ => Err(Error::NotReady),
        }
    }

    pub(crate) fn size_hint(&self, id: u64) -> Option<(usize, Option<usize>)> {
        match &self.phase {
            Phase::Iterating { iter, .. } if id == self.live_id => Some(iter.size_hint()),
            _ => None,
        }
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
        self.reset_seed = true;
    }

    pub(crate) fn shutdown(&mut self) {
        if !self.phase.terminate() {
            return;
        }
        if let Some(backend) = self.backend.as_mut() {
            if let Err(err) = backend.finalize_iteration() {
                tracing::warn!("finalize_iteration during shutdown failed: {err}");
            }
            if let Err(err) = backend.finalize() {
                tracing::warn!("finalize during shutdown failed: {err}");
            }
        }
        tracing::info!("Loader shut down");
    }

    fn restore_mode(&mut self) -> Option<RestoreMode> {
        self.backend
            .as_mut()
            .and_then(|backend| backend.as_checkpointable())
            .map(|backend| backend.restore_mode())
    }
}

impl<G, C> Inner<G, C>
where
    G: DataPipe,
    C: GraphCodec<G>,
{
    fn checkpoint(&mut self) -> Result<CheckpointBundle> {
        if self.phase.is_terminated() {
            return Err(Error::Terminated);
        }
        let snapshot = self.snapshot.as_ref().ok_or(Error::MissingGraph)?;

        let backend_state = match self.backend.as_mut() {
            None => None,
            Some(backend) => {
                let backend = backend.as_checkpointable().ok_or(Error::NotCheckpointable)?;
                match &self.pending_backend_state {
                    // Restored but not yet adapted: the pending state is
                    // still the most recent one.
                    Some(state) if !self.adapted => Some(state.clone()),
                    _ => Some(backend.checkpoint().hook("checkpoint")?),
                }
            }
        };

        let serialized_graph = self.codec.encode(snapshot).map_err(Error::Codec)?;
        Ok(CheckpointBundle::new(serialized_graph, backend_state))
    }

    fn restore(&mut self, bundle: &CheckpointBundle, backend: Option<BoxBackend<G>>) -> Result<()> {
        if self.phase.is_terminated() {
            return Err(Error::Terminated);
        }
        if self.phase.is_live() {
            return Err(Error::InvalidState(
                "an iterator is live; restore must happen between sessions".to_string(),
            ));
        }
        if bundle.backend_state().is_some() && backend.is_none() {
            return Err(Error::IncompatibleBackend(
                "checkpoint carries backend state but no backend was given".to_string(),
            ));
        }

        let graph = self
            .codec
            .decode(bundle.serialized_graph())
            .map_err(Error::Codec)?;
        let graph = adapter::apply_all(&self.adapters, graph)?;

        if let Some(mut old) = std::mem::replace(&mut self.backend, backend) {
            if self.adapted {
                if let Err(err) = old.finalize_iteration() {
                    tracing::warn!("finalize_iteration on replaced backend failed: {err}");
                }
                if let Err(err) = old.finalize() {
                    tracing::warn!("finalize on replaced backend failed: {err}");
                }
            }
        }

        self.snapshot = Some(graph.fork());
        self.graph = Some(graph);
        self.pending_backend_state = bundle.backend_state().map(<[u8]>::to_vec);
        self.adapted = false;
        self.phase = Phase::Fresh;
        tracing::info!("Restored loader from checkpoint");
        Ok(())
    }
}

/// Builds a [`Loader`].
pub struct LoaderBuilder<G, C = JsonCodec>
where
    G: DataPipe,
{
    graph: Option<G>,
    adapters: Vec<Box<dyn Adapter<G>>>,
    backend: Option<BoxBackend<G>>,
    codec: C,
    config: LoaderConfig,
}

impl<G, C> LoaderBuilder<G, C>
where
    G: DataPipe + 'static,
{
    /// Add an adapter. Adapters run in the order they were added.
    pub fn adapter(mut self, adapter: impl Adapter<G> + 'static) -> Self {
        self.adapters.push(Box::new(adapter));
        self
    }

    pub fn adapters(mut self, adapters: impl IntoIterator<Item = Box<dyn Adapter<G>>>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    pub fn backend(mut self, backend: impl ExecutionBackend<G> + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn boxed_backend(mut self, backend: Option<BoxBackend<G>>) -> Self {
        self.backend = backend;
        self
    }

    /// Replace the graph codec used for checkpoints.
    pub fn codec<C2>(self, codec: C2) -> LoaderBuilder<G, C2>
    where
        C2: GraphCodec<G>,
    {
        LoaderBuilder {
            graph: self.graph,
            adapters: self.adapters,
            backend: self.backend,
            codec,
            config: self.config,
        }
    }

    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }
}

impl<G, C> LoaderBuilder<G, C>
where
    G: DataPipe + 'static,
    C: GraphCodec<G>,
{
    pub fn build(self) -> Result<Loader<G, C>> {
        self.config.validate()?;

        let graph = self
            .graph
            .map(|graph| adapter::apply_all(&self.adapters, graph))
            .transpose()?;
        let snapshot = graph.as_ref().map(|graph| graph.fork());

        let inner = Inner {
            graph,
            snapshot,
            adapters: self.adapters,
            backend: self.backend,
            pending_backend_state: None,
            adapted: false,
            codec: self.codec,
            seeds: SeedGenerator::new(),
            seed: None,
            reset_seed: true,
            phase: Phase::Fresh,
            live_id: 0,
            concurrency: self.config.concurrency,
            metrics: LoaderMetrics::new(),
        };
        let mut loader = Loader {
            inner: Rc::new(RefCell::new(inner)),
        };
        if let Some(seed) = self.config.seed {
            loader.set_seed(seed)?;
        }
        Ok(loader)
    }
}

/// Owns a pipeline graph and drives iteration sessions over it.
///
/// Dropping the loader shuts it down. Outstanding [`LoaderIter`]s then
/// report [`Error::Terminated`].
///
/// The loader and its iterators share state without locking and are
/// not [`Send`]; concurrency belongs to the backend.
pub struct Loader<G, C = JsonCodec>
where
    G: DataPipe,
{
    inner: Rc<RefCell<Inner<G, C>>>,
}

impl<G> Loader<G, JsonCodec>
where
    G: DataPipe + 'static,
{
    /// Start building a loader over an independent fork of `graph`.
    pub fn builder(graph: &G) -> LoaderBuilder<G, JsonCodec> {
        LoaderBuilder {
            graph: Some(graph.fork()),
            adapters: Vec::new(),
            backend: None,
            codec: JsonCodec,
            config: LoaderConfig::default(),
        }
    }

    /// Start building a loader with no graph.
    ///
    /// Sessions fail with [`Error::MissingGraph`] until
    /// [`Loader::restore`] attaches one.
    pub fn builder_empty() -> LoaderBuilder<G, JsonCodec> {
        LoaderBuilder {
            graph: None,
            adapters: Vec::new(),
            backend: None,
            codec: JsonCodec,
            config: LoaderConfig::default(),
        }
    }
}

impl<G> Loader<G, JsonCodec>
where
    G: DataPipe + 'static,
    JsonCodec: GraphCodec<G>,
{
    /// A loader over `graph` with no adapters or backend.
    pub fn new(graph: &G) -> Result<Self> {
        Self::builder(graph).build()
    }

    /// A loader rebuilt from a checkpoint, with `backend` attached.
    ///
    /// Adapters are not re-applied; the bundle's graph already went
    /// through them.
    pub fn from_checkpoint(
        bundle: &CheckpointBundle,
        backend: Option<BoxBackend<G>>,
    ) -> Result<Self> {
        let loader = Self::builder_empty().build()?;
        loader.inner.borrow_mut().restore(bundle, backend)?;
        Ok(loader)
    }
}

impl<G, C> Loader<G, C>
where
    G: DataPipe + 'static,
    C: GraphCodec<G>,
{
    /// Start an iteration session.
    ///
    /// Invalidates every iterator previously returned by this loader.
    #[instrument(name = "start_session", skip_all)]
    pub fn start_session(&mut self) -> Result<LoaderIter<G, C>> {
        let id = self.inner.borrow_mut().start_session()?;
        Ok(LoaderIter::new(Rc::clone(&self.inner), id))
    }

    /// Seed the next session.
    ///
    /// Accepts any integer type; values outside `0..2^64` fail with
    /// [`Error::SeedOutOfRange`] and leave the current seed alone.
    pub fn set_seed<S>(&mut self, seed: S) -> Result<()>
    where
        S: TryInto<u64> + Copy + fmt::Display,
    {
        let seed = validate_seed(seed)?;
        self.inner.borrow_mut().set_seed(seed);
        Ok(())
    }

    /// The user seed, if one was set.
    pub fn seed(&self) -> Option<u64> {
        self.inner.borrow().seed
    }

    /// Snapshot the pre-adaptation graph and the backend state.
    pub fn checkpoint(&mut self) -> Result<CheckpointBundle> {
        self.inner.borrow_mut().checkpoint()
    }

    /// Replace the graph and backend with those from `bundle`.
    ///
    /// Only allowed between sessions. Configured adapters are applied
    /// to the decoded graph, and the backend adapts it again at the
    /// next session using the bundle's backend state.
    pub fn restore(
        &mut self,
        bundle: &CheckpointBundle,
        backend: Option<BoxBackend<G>>,
    ) -> Result<()> {
        self.inner.borrow_mut().restore(bundle, backend)
    }

    /// End all sessions and finalize the backend.
    ///
    /// Idempotent and infallible; backend errors are logged.
    pub fn shutdown(&mut self) {
        self.inner.borrow_mut().shutdown();
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.borrow().phase.is_terminated()
    }

    /// How the attached backend treats restored checkpoints.
    ///
    /// `None` without a checkpointable backend.
    pub fn restore_mode(&self) -> Option<RestoreMode> {
        self.inner.borrow_mut().restore_mode()
    }

    pub fn concurrency(&self) -> Option<ConcurrencySpec> {
        self.inner.borrow().concurrency.clone()
    }
}

impl<G, C> Drop for Loader<G, C>
where
    G: DataPipe,
{
    fn drop(&mut self) {
        // Only fails while unwinding out of a pull.
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.shutdown();
        }
    }
}
