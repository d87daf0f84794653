//! A concrete sequence graph over plain symbols.
//!
//! The petgraph storage is shared behind `Rc`, so cursors are
//! self-contained values that satisfy [`GraphCursor`] without borrowing
//! from the graph.

use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use smallvec::SmallVec;

use crate::graphs::GraphCursor;

type SequenceGraphInner = DiGraph<u8, (), u32>;

#[derive(Debug, Clone)]
pub struct SequenceGraph {
    inner: Rc<SequenceGraphInner>,
}

impl SequenceGraph {
    pub fn new(graph: DiGraph<u8, (), u32>) -> Self {
        Self { inner: Rc::new(graph) }
    }

    /// Build disjoint linear chains, one per sequence.
    pub fn from_sequences(sequences: &[&str]) -> Self {
        let mut graph = SequenceGraphInner::default();
        for sequence in sequences {
            let mut previous: Option<NodeIndex<u32>> = None;
            for symbol in sequence.bytes() {
                let node = graph.add_node(symbol);
                if let Some(prev) = previous {
                    graph.add_edge(prev, node, ());
                }
                previous = Some(node);
            }
        }
        Self::new(graph)
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Cursors for every position without incoming edges.
    pub fn begins(&self) -> Vec<SequenceCursor> {
        self.inner.externals(Direction::Incoming)
            .map(|node| self.cursor(node))
            .collect()
    }

    pub fn all_cursors(&self) -> Vec<SequenceCursor> {
        self.inner.node_indices()
            .map(|node| self.cursor(node))
            .collect()
    }

    fn cursor(&self, node: NodeIndex<u32>) -> SequenceCursor {
        SequenceCursor { graph: Some(Rc::clone(&self.inner)), node }
    }
}

#[derive(Clone, Default)]
pub struct SequenceCursor {
    graph: Option<Rc<SequenceGraphInner>>,
    node: NodeIndex<u32>,
}

impl PartialEq for SequenceCursor {
    fn eq(&self, other: &Self) -> bool {
        match (&self.graph, &other.graph) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b) && self.node == other.node,
            _ => false,
        }
    }
}

impl Eq for SequenceCursor {}

impl Hash for SequenceCursor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.graph {
            Some(graph) => {
                (Rc::as_ptr(graph) as usize).hash(state);
                self.node.index().hash(state);
            }
            None => 0usize.hash(state),
        }
    }
}

impl Debug for SequenceCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.graph {
            Some(_) => write!(f, "SequenceCursor({}, {:?})", self.node.index(), self.letter() as char),
            None => write!(f, "SequenceCursor(empty)"),
        }
    }
}

impl GraphCursor for SequenceCursor {
    fn is_empty(&self) -> bool {
        self.graph.is_none()
    }

    fn letter(&self) -> u8 {
        let graph = self.graph.as_ref().expect("letter() on the empty cursor");
        graph[self.node]
    }

    fn next(&self) -> SmallVec<[Self; 4]> {
        let Some(graph) = &self.graph else { return SmallVec::new() };
        graph.neighbors(self.node)
            .map(|node| Self { graph: Some(Rc::clone(graph)), node })
            .collect()
    }

    fn prev(&self) -> SmallVec<[Self; 4]> {
        let Some(graph) = &self.graph else { return SmallVec::new() };
        graph.neighbors_directed(self.node, Direction::Incoming)
            .map(|node| Self { graph: Some(Rc::clone(graph)), node })
            .collect()
    }
}
