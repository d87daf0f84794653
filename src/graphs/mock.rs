//! Mock sequence graphs for unit tests.

use petgraph::graph::DiGraph;

use crate::graphs::sequence::SequenceGraph;

pub(crate) fn linear(symbols: &str) -> SequenceGraph {
    SequenceGraph::from_sequences(&[symbols])
}

/// `A - C - (G | A) - T`: two parallel middle branches.
pub(crate) fn fork() -> SequenceGraph {
    let mut g = DiGraph::<u8, (), u32>::default();

    let a = g.add_node(b'A');
    let c = g.add_node(b'C');
    let g1 = g.add_node(b'G');
    let g2 = g.add_node(b'A');
    let t = g.add_node(b'T');

    g.add_edge(a, c, ());
    g.add_edge(c, g1, ());
    g.add_edge(c, g2, ());
    g.add_edge(g1, t, ());
    g.add_edge(g2, t, ());

    SequenceGraph::new(g)
}

/// `A - C - G - A - C - G - ...`: a three-node cycle.
pub(crate) fn looped() -> SequenceGraph {
    let mut g = DiGraph::<u8, (), u32>::default();

    let a = g.add_node(b'A');
    let c = g.add_node(b'C');
    let g1 = g.add_node(b'G');

    g.add_edge(a, c, ());
    g.add_edge(c, g1, ());
    g.add_edge(g1, a, ());

    SequenceGraph::new(g)
}
