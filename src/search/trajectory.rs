//! Shared provenance records for the path search.
//!
//! A [`Trajectory`] holds the cheapest known ways to reach one search
//! state: a map from predecessor cursor to a scored reference to that
//! predecessor's own trajectory. Many later states point at the same
//! record, so the whole structure is a reference-counted DAG rather than
//! a tree, and sub-paths are never duplicated. Reconstruction walks the
//! DAG backwards, best-first, yielding the k cheapest distinct paths.

use std::cell::RefCell;
use std::rc::Rc;

use log::warn;
use rustc_hash::FxHashMap;

use crate::graphs::GraphCursor;
use crate::search::alignment::AnnotatedPath;
use crate::search::queue::MinCostQueue;

/// What a finalized state contributed to the alignment. Delete states
/// never consume a graph position, so they carry no event; the rendering
/// step infers them from gaps in the position sequence.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum EventKind {
    #[default]
    None,
    Match,
    Insertion,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Event {
    /// Profile position, 1-based; 0 for pre-profile insertions.
    pub position: u32,
    pub kind: EventKind,
}

pub type TrajectoryRef<C> = Rc<RefCell<Trajectory<C>>>;

type Ancestor<C> = (f64, Option<TrajectoryRef<C>>);

pub struct Trajectory<C: GraphCursor> {
    ancestors: FxHashMap<C, Ancestor<C>>,
    pub event: Event,
}

impl<C: GraphCursor> Trajectory<C> {
    pub fn new() -> TrajectoryRef<C> {
        Rc::new(RefCell::new(Self {
            ancestors: FxHashMap::default(),
            event: Event::default(),
        }))
    }

    /// The designated source: reachable from outside the graph at no cost.
    pub fn source() -> TrajectoryRef<C> {
        let node = Self::new();
        node.borrow_mut().ancestors.insert(C::default(), (0.0, None));
        node
    }

    /// Insert or relax the edge from `from`. Only a strictly lower score
    /// replaces a stored edge; an exact tie keeps the first-seen edge.
    pub fn update(&mut self, from: C, score: f64, ancestor: Option<TrajectoryRef<C>>) -> bool {
        use std::collections::hash_map::Entry;

        match self.ancestors.entry(from) {
            Entry::Occupied(mut entry) => {
                if score < entry.get().0 {
                    entry.insert((score, ancestor));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert((score, ancestor));
                true
            }
        }
    }

    /// Import every ancestor edge of `other`, shifted by `added_fee`.
    pub fn merge_update(&mut self, other: &Trajectory<C>, added_fee: f64) -> bool {
        let mut changed = false;
        for (cursor, (score, ancestor)) in &other.ancestors {
            changed |= self.update(cursor.clone(), score + added_fee, ancestor.clone());
        }
        changed
    }

    /// Like `merge_update`, but collapses `other` to its single best edge
    /// first, bounding fan-in on high-volume merges.
    pub fn merge_update_best(&mut self, other: &Trajectory<C>, added_fee: f64) -> bool {
        match other.best_ancestor() {
            Some((cursor, score, ancestor)) => self.update(cursor, score + added_fee, ancestor),
            None => false,
        }
    }

    /// Minimum score over all stored edges; infinite when unreachable.
    pub fn score(&self) -> f64 {
        self.ancestors.values()
            .map(|ancestor| ancestor.0)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn best_ancestor(&self) -> Option<(C, f64, Option<TrajectoryRef<C>>)> {
        self.ancestors.iter()
            .min_by(|(_, (a, _)), (_, (b, _))| a.total_cmp(b))
            .map(|(cursor, (score, ancestor))| (cursor.clone(), *score, ancestor.clone()))
    }

    pub fn num_ancestors(&self) -> usize {
        self.ancestors.len()
    }

    /// Independent copy of the edge map. The ancestors themselves stay
    /// shared; the copy exists so same-position relaxation can mutate one
    /// version while nodes referencing the other keep what they saw.
    pub fn clone_node(node: &TrajectoryRef<C>) -> TrajectoryRef<C> {
        let inner = node.borrow();
        Rc::new(RefCell::new(Trajectory {
            ancestors: inner.ancestors.clone(),
            event: inner.event,
        }))
    }

    /// Ancestor edges prepared for reconstruction: sorted by score and
    /// normalized so the cheapest edge has delta zero. A state either
    /// restarts a local alignment (edge to the empty sentinel) or
    /// continues through real predecessors, never both; whichever side
    /// scores better survives, so prefixes and suffixes of a better path
    /// are not reported as distinct paths.
    fn ancestor_deltas_trimmed(&self) -> Vec<(C, f64, Option<TrajectoryRef<C>>)> {
        let mut edges: Vec<_> = self.ancestors.iter()
            .map(|(cursor, (score, ancestor))| (cursor.clone(), *score, ancestor.clone()))
            .collect();
        edges.sort_by(|a, b| a.1.total_cmp(&b.1));

        if let Some(restart) = edges.iter().position(|(cursor, _, _)| cursor.is_empty()) {
            let mut keep = restart + 1;
            if keep > 1 {
                // Real predecessors beat the restart: drop the restart edge.
                keep -= 1;
            }
            edges.truncate(keep);
        }

        if let Some(&(_, best, _)) = edges.first() {
            if best.is_finite() {
                for edge in &mut edges {
                    edge.1 -= best;
                }
            }
        }

        edges
    }

    /// Best-first reconstruction of the `k` cheapest distinct paths
    /// ending at `terminal`, in non-decreasing score order.
    pub fn top_k(terminal: &TrajectoryRef<C>, k: usize) -> Vec<AnnotatedPath<C>> {
        let mut queue = MinCostQueue::new();
        let root = Rc::new(BacktraceNode {
            cursor: C::default(),
            link: Rc::clone(terminal),
            parent: None,
        });
        queue.push(terminal.borrow().score(), root);

        // Per trajectory node: the continuation edges reconstructions have
        // committed to, keyed by the cursor they continued to.
        let mut chosen_edges: FxHashMap<*const RefCell<Trajectory<C>>, FxHashMap<C, *const RefCell<Trajectory<C>>>> =
            FxHashMap::default();

        let mut paths = Vec::new();
        while paths.len() < k {
            let Some((cost, node)) = queue.pop() else { break };

            if let Some(parent) = &node.parent {
                let chosen = chosen_edges.entry(Rc::as_ptr(&node.link)).or_default();
                let parent_link = Rc::as_ptr(&parent.link);

                if parent.cursor.is_empty() {
                    // This node would end a path right at the sink. If a
                    // reconstruction already continued through it, the
                    // shorter path is a duplicate prefix.
                    chosen.insert(parent.cursor.clone(), parent_link);
                    if chosen.keys().any(|cursor| !cursor.is_empty()) {
                        continue;
                    }
                } else if chosen.contains_key(&C::default()) {
                    continue;
                }

                // Collapsing: a second branch proposing a different node
                // for an already-chosen continuation cursor is a
                // tie-broken duplicate of the first.
                match chosen.get(&parent.cursor) {
                    Some(&existing) if existing != parent_link => continue,
                    None => {
                        chosen.insert(parent.cursor.clone(), parent_link);
                    }
                    _ => {}
                }
            }

            if node.cursor.is_empty() && node.parent.is_some() {
                let path = annotate(&node, cost);
                if path.path.is_empty() {
                    warn!("empty path reconstructed during top-k extraction");
                    break;
                }
                paths.push(path);
                continue;
            }

            for (cursor, delta, ancestor) in node.link.borrow().ancestor_deltas_trimmed() {
                let Some(ancestor) = ancestor else { continue };
                queue.push(cost + delta, Rc::new(BacktraceNode {
                    cursor,
                    link: ancestor,
                    parent: Some(Rc::clone(&node)),
                }));
            }
        }

        paths
    }
}

/// One step of a partial reconstruction: a parent-linked list growing
/// from the sink toward the source, shared between queue entries.
struct BacktraceNode<C: GraphCursor> {
    cursor: C,
    link: TrajectoryRef<C>,
    parent: Option<Rc<BacktraceNode<C>>>,
}

fn annotate<C: GraphCursor>(leaf: &Rc<BacktraceNode<C>>, score: f64) -> AnnotatedPath<C> {
    let mut path = Vec::new();
    let mut events = Vec::new();

    // Walking leaf to root visits cursors in graph order: the leaf is the
    // source end of the reconstruction.
    let mut node = Some(leaf);
    while let Some(current) = node {
        if !current.cursor.is_empty() {
            path.push(current.cursor.clone());
            events.push(current.link.borrow().event);
        }
        node = current.parent.as_ref();
    }

    AnnotatedPath { path, score, events }
}

/// The result of a search: the terminal trajectory folded over the final
/// state sets, plus the extraction API.
pub struct PathSet<C: GraphCursor> {
    terminal: TrajectoryRef<C>,
}

impl<C: GraphCursor> PathSet<C> {
    pub(crate) fn new(terminal: TrajectoryRef<C>) -> Self {
        Self { terminal }
    }

    /// Cost of the best alignment; infinite when no path was found.
    pub fn best_score(&self) -> f64 {
        self.terminal.borrow().score()
    }

    pub fn best_path(&self) -> Option<AnnotatedPath<C>> {
        self.top_k(1).into_iter().next()
    }

    pub fn top_k(&self, k: usize) -> Vec<AnnotatedPath<C>> {
        Trajectory::top_k(&self.terminal, k)
    }
}
