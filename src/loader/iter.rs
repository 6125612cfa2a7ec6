use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::{Inner, Pull};
use crate::errors::Result;
use crate::graph::DataPipe;

/// Proxy over one session's iterator.
///
/// Every pull goes through the owning loader, which is how a proxy
/// finds out it was superseded by a newer session
/// ([`crate::Error::StaleIterator`]) or that the loader shut down
/// ([`crate::Error::Terminated`]).
///
/// The proxy is fused: after the end of its session or its first
/// error it only yields `None`.
pub struct LoaderIter<G, C>
where
    G: DataPipe,
{
    inner: Rc<RefCell<Inner<G, C>>>,
    id: u64,
    done: bool,
}

impl<G, C> LoaderIter<G, C>
where
    G: DataPipe,
{
    pub(super) fn new(inner: Rc<RefCell<Inner<G, C>>>, id: u64) -> Self {
        Self {
            inner,
            id,
            done: false,
        }
    }

    /// Run `f` against the underlying graph iterator.
    ///
    /// For graph-specific queries the proxy doesn't forward. Fails
    /// with [`crate::Error::NotReady`] once the session has ended.
    pub fn with_inner<R>(&self, f: impl FnOnce(&mut G::Iter) -> R) -> Result<R> {
        self.inner.borrow_mut().with_live(self.id, f)
    }
}

impl<G, C> Iterator for LoaderIter<G, C>
where
    G: DataPipe,
{
    type Item = Result<G::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let pull = self.inner.borrow_mut().pull(self.id);
        match pull {
            Pull::Item(item) => Some(Ok(item)),
            Pull::End => {
                self.done = true;
                None
            }
            Pull::Failed(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        self.inner
            .borrow()
            .size_hint(self.id)
            .unwrap_or((0, None))
    }
}

impl<G, C> fmt::Debug for LoaderIter<G, C>
where
    G: DataPipe,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderIter")
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}
