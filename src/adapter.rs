//! Graph rewrites applied when a loader is built.
//!
//! Adapters run in order on the loader's own copy of the graph,
//! before any backend adaptation, and again on the decoded graph
//! after [`crate::Loader::restore`].

use crate::errors::BoxError;

pub trait Adapter<G> {
    fn apply(&self, graph: G) -> Result<G, BoxError>;
}

/// Any infallible graph rewrite is an adapter.
impl<G, F> Adapter<G> for F
where
    F: Fn(G) -> G,
{
    fn apply(&self, graph: G) -> Result<G, BoxError> {
        Ok(self(graph))
    }
}

/// Graphs with shuffle stages that can be toggled.
pub trait ShuffleControl {
    /// Enable or disable every shuffle stage. Returns how many
    /// stages were toggled.
    fn set_shuffle(&mut self, enable: bool) -> usize;
}

/// Turn all shuffle stages of a graph on or off.
///
/// Fails if the graph has no shuffle stage at all, since that
/// almost always means the adapter was attached to the wrong graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shuffle(pub bool);

impl<G> Adapter<G> for Shuffle
where
    G: ShuffleControl,
{
    fn apply(&self, mut graph: G) -> Result<G, BoxError> {
        let Shuffle(enable) = *self;
        match graph.set_shuffle(enable) {
            0 => Err("graph has no shuffle stage to toggle".into()),
            toggled => {
                tracing::debug!("Set {toggled} shuffle stage(s) to {enable}");
                Ok(graph)
            }
        }
    }
}

/// Run adapters in order, naming the failing one.
pub(crate) fn apply_all<G>(
    adapters: &[Box<dyn Adapter<G>>],
    mut graph: G,
) -> Result<G, crate::Error> {
    for (index, adapter) in adapters.iter().enumerate() {
        graph = adapter.apply(graph).map_err(|err| {
            crate::Error::Configuration(format!("adapter {index} failed: {err}"))
        })?;
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Stages(Vec<bool>);

    impl ShuffleControl for Stages {
        fn set_shuffle(&mut self, enable: bool) -> usize {
            self.0.iter_mut().for_each(|stage| *stage = enable);
            self.0.len()
        }
    }

    #[test]
    fn shuffle_toggles_every_stage() {
        let graph = Shuffle(false).apply(Stages(vec![true, true])).unwrap();
        assert_eq!(graph, Stages(vec![false, false]));
    }

    #[test]
    fn shuffle_without_stage_fails() {
        assert!(Shuffle(true).apply(Stages(Vec::new())).is_err());
    }

    #[test]
    fn apply_all_runs_in_order_and_names_failure() {
        let adapters: Vec<Box<dyn Adapter<Vec<u8>>>> = vec![
            Box::new(|mut g: Vec<u8>| {
                g.push(1);
                g
            }),
            Box::new(|mut g: Vec<u8>| {
                g.push(2);
                g
            }),
        ];
        assert_eq!(apply_all(&adapters, Vec::new()).unwrap(), vec![1, 2]);

        let failing: Vec<Box<dyn Adapter<Stages>>> = vec![Box::new(Shuffle(true))];
        let err = apply_all(&failing, Stages(Vec::new())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid loader configuration: adapter 0 failed: graph has no shuffle stage to toggle"
        );
    }
}
