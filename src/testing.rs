//! Test graphs and backends.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::adapter::ShuffleControl;
use crate::backend::{CheckpointableBackend, ExecutionBackend, GraphRewrite, RestoreMode};
use crate::errors::BoxError;
use crate::graph::{DataPipe, StageError};
use crate::seed::SeedGenerator;

/// A graph over a fixed list of numbers.
///
/// All iterators drawn from one graph share its cursor, so a paused
/// or restored graph continues where it stopped. Reaching the end
/// rewinds the cursor for the next session.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Numbers {
    pub(crate) items: Vec<u64>,
    /// Added to every item; set per session by [`Recording`].
    pub(crate) offset: u64,
    /// `None` means the graph has no shuffle stage.
    pub(crate) shuffle: Option<bool>,
    pub(crate) pause_at: Option<usize>,
    pub(crate) fail_at: Option<usize>,
    pub(crate) panic_at: Option<usize>,
    #[serde(skip)]
    pub(crate) cursor: Rc<Cell<usize>>,
    // Pauses fire once per graph, not once per iterator.
    #[serde(skip)]
    pub(crate) paused: Rc<Cell<bool>>,
}

impl Numbers {
    pub(crate) fn new(count: u64) -> Self {
        Self {
            items: (1..=count).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.cursor.get()
    }
}

impl DataPipe for Numbers {
    type Item = u64;
    type Iter = NumbersIter;

    fn iter(&self) -> Self::Iter {
        NumbersIter {
            items: self.items.clone(),
            offset: self.offset,
            pause_at: self.pause_at,
            fail_at: self.fail_at,
            panic_at: self.panic_at,
            cursor: Rc::clone(&self.cursor),
            paused: Rc::clone(&self.paused),
        }
    }

    fn fork(&self) -> Self {
        Self {
            items: self.items.clone(),
            offset: self.offset,
            shuffle: self.shuffle,
            pause_at: self.pause_at,
            fail_at: self.fail_at,
            panic_at: self.panic_at,
            cursor: Rc::new(Cell::new(self.cursor.get())),
            paused: Rc::new(Cell::new(self.paused.get())),
        }
    }
}

impl ShuffleControl for Numbers {
    fn set_shuffle(&mut self, enable: bool) -> usize {
        match &mut self.shuffle {
            Some(shuffle) => {
                *shuffle = enable;
                1
            }
            None => 0,
        }
    }
}

pub(crate) struct NumbersIter {
    items: Vec<u64>,
    offset: u64,
    pause_at: Option<usize>,
    fail_at: Option<usize>,
    panic_at: Option<usize>,
    cursor: Rc<Cell<usize>>,
    paused: Rc<Cell<bool>>,
}

impl NumbersIter {
    pub(crate) fn cursor(&self) -> usize {
        self.cursor.get()
    }
}

impl Iterator for NumbersIter {
    type Item = Result<u64, StageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.cursor.get();
        if self.pause_at == Some(pos) && !self.paused.get() {
            self.paused.set(true);
            return Some(Err(StageError::Paused));
        }
        if self.fail_at == Some(pos) {
            return Some(Err(StageError::failed(format!("bad record at {pos}"))));
        }
        if self.panic_at == Some(pos) {
            panic!("stage blew up at {pos}");
        }
        match self.items.get(pos) {
            Some(item) => {
                self.cursor.set(pos + 1);
                Some(Ok(item.wrapping_add(self.offset)))
            }
            None => {
                self.cursor.set(0);
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.items.len().saturating_sub(self.cursor.get());
        (0, Some(left + 1))
    }
}

/// Shared log of backend hook calls.
pub(crate) type CallLog = Rc<RefCell<Vec<&'static str>>>;

pub(crate) fn count(log: &CallLog, hook: &str) -> usize {
    log.borrow().iter().filter(|call| **call == hook).count()
}

/// Backend that records its hook calls.
///
/// Each session it rewrites the graph's offset with the next shared
/// seed, so element values depend on seeding. Its checkpoint is the
/// graph cursor.
pub(crate) struct Recording {
    pub(crate) log: CallLog,
    pub(crate) checkpointable: bool,
    pub(crate) mode: RestoreMode,
    pub(crate) fail_initialize: bool,
    cursor: Option<Rc<Cell<usize>>>,
}

impl Recording {
    pub(crate) fn new() -> Self {
        Self {
            log: CallLog::default(),
            checkpointable: true,
            mode: RestoreMode::Resume,
            fail_initialize: false,
            cursor: None,
        }
    }

    pub(crate) fn with_mode(mode: RestoreMode) -> Self {
        Self {
            mode,
            ..Self::new()
        }
    }

    pub(crate) fn not_checkpointable() -> Self {
        Self {
            checkpointable: false,
            ..Self::new()
        }
    }
}

impl ExecutionBackend<Numbers> for Recording {
    fn initialize(&mut self, graph: &mut Numbers) -> Result<(), BoxError> {
        self.log.borrow_mut().push("initialize");
        if self.fail_initialize {
            return Err("no workers available".into());
        }
        self.cursor = Some(Rc::clone(&graph.cursor));
        Ok(())
    }

    fn initialize_iteration(
        &mut self,
        seeds: &mut SeedGenerator,
    ) -> Result<Option<GraphRewrite<Numbers>>, BoxError> {
        self.log.borrow_mut().push("initialize_iteration");
        let offset = seeds.generate_shared_seed();
        Ok(Some(Box::new(move |graph: &mut Numbers| graph.offset = offset)))
    }

    fn finalize_iteration(&mut self) -> Result<(), BoxError> {
        self.log.borrow_mut().push("finalize_iteration");
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), BoxError> {
        self.log.borrow_mut().push("finalize");
        Ok(())
    }

    fn as_checkpointable(&mut self) -> Option<&mut dyn CheckpointableBackend<Numbers>> {
        if self.checkpointable {
            Some(self)
        } else {
            None
        }
    }
}

impl CheckpointableBackend<Numbers> for Recording {
    fn checkpoint(&mut self) -> Result<Vec<u8>, BoxError> {
        self.log.borrow_mut().push("checkpoint");
        let position = self.cursor.as_ref().map_or(0, |cursor| cursor.get());
        Ok(serde_json::to_vec(&position)?)
    }

    fn restore(&mut self, graph: &mut Numbers, state: &[u8]) -> Result<(), BoxError> {
        self.log.borrow_mut().push("restore");
        let position: usize = serde_json::from_slice(state)?;
        match self.mode {
            RestoreMode::Resume => graph.cursor.set(position),
            RestoreMode::Replay => graph.cursor.set(0),
        }
        self.cursor = Some(Rc::clone(&graph.cursor));
        Ok(())
    }

    fn restore_mode(&self) -> RestoreMode {
        self.mode
    }
}
