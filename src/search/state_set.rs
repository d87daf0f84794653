//! Working sets of live search states, one per HMM state kind per
//! profile position.

use std::collections::hash_map::Entry;

use log::error;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::graphs::GraphCursor;
use crate::search::trajectory::{Event, EventKind, Trajectory, TrajectoryRef};

/// One live search state: a cursor, its trajectory, and the score used
/// for ordering and pruning.
#[derive(Clone)]
pub struct State<C: GraphCursor> {
    pub cursor: C,
    pub trajectory: TrajectoryRef<C>,
    pub score: f64,
}

/// Common view over the per-kind state sets, so graph transfers and the
/// terminal fold are written once.
pub trait StateCollection<C: GraphCursor> {
    fn states(&self) -> Vec<State<C>>;
}

/// Cursor-to-trajectory map for the Match and Insert state kinds.
#[derive(Default)]
pub struct StateSet<C: GraphCursor> {
    entries: FxHashMap<C, TrajectoryRef<C>>,
}

impl<C: GraphCursor> StateSet<C> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&C, &TrajectoryRef<C>)> {
        self.entries.iter()
    }

    pub fn get(&self, cursor: &C) -> Option<&TrajectoryRef<C>> {
        self.entries.get(cursor)
    }

    pub fn insert(&mut self, cursor: C, trajectory: TrajectoryRef<C>) {
        self.entries.insert(cursor, trajectory);
    }

    pub fn get_or_create(&mut self, cursor: &C) -> TrajectoryRef<C> {
        self.entries.entry(cursor.clone())
            .or_insert_with(Trajectory::new)
            .clone()
    }

    /// Relax the trajectory at `cursor` with an edge from `from`. Returns
    /// whether the state's score improved.
    pub fn update(&mut self, cursor: C, score: f64, from: C, trajectory: &TrajectoryRef<C>) -> bool {
        let (previous, link) = match self.entries.entry(cursor) {
            Entry::Occupied(entry) => {
                let previous = entry.get().borrow().score();
                (previous, entry.into_mut())
            }
            Entry::Vacant(entry) => (f64::INFINITY, entry.insert(Trajectory::new())),
        };
        link.borrow_mut().update(from, score, Some(trajectory.clone()));
        previous > score
    }

    /// Tag every non-empty entry with its finalized role. Must run
    /// exactly once per consumed set per profile position.
    pub fn set_event(&mut self, position: usize, kind: EventKind) {
        for (cursor, link) in &self.entries {
            if !cursor.is_empty() {
                link.borrow_mut().event = Event { position: position as u32, kind };
            }
        }
    }

    /// Structural check: a finalized non-empty state carries a real
    /// event, the empty sentinel never does.
    pub fn check_events(&self) -> bool {
        for (cursor, link) in &self.entries {
            let kind = link.borrow().event.kind;
            if !cursor.is_empty() && kind == EventKind::None {
                error!("missing event on state {:?}", cursor);
                return false;
            }
            if cursor.is_empty() && kind != EventKind::None {
                error!("event tagged on the empty sentinel");
                return false;
            }
        }
        true
    }

    /// Deep copy: every trajectory is cloned so relaxing one set cannot
    /// be observed through the other.
    pub fn clone_deep(&self) -> Self {
        let entries = self.entries.iter()
            .map(|(cursor, link)| (cursor.clone(), Trajectory::clone_node(link)))
            .collect();
        Self { entries }
    }

    pub fn scores(&self) -> Vec<f64> {
        self.entries.values()
            .map(|link| link.borrow().score())
            .collect()
    }

    /// Drop every entry the predicate flags. Returns the removed count.
    pub fn filter_by(&mut self, mut predicate: impl FnMut(&C, f64) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|cursor, link| !predicate(cursor, link.borrow().score()));
        before - self.entries.len()
    }

    /// Keep at most `top_n` entries by score, and none above
    /// `score_ceiling`. Selection uses nth-element, not a full sort, so
    /// ties at the cut-off all survive.
    pub fn filter_top(&mut self, top_n: usize, score_ceiling: f64) -> usize {
        let mut scores = self.scores();
        match retain_threshold(&mut scores, top_n, score_ceiling) {
            Some(threshold) => self.filter_by(|_, score| score > threshold),
            None => {
                let removed = self.entries.len();
                self.entries.clear();
                removed
            }
        }
    }

    /// States for the given cursors only; absent cursors are skipped.
    pub fn states_for(&self, cursors: &FxHashSet<C>) -> Vec<State<C>> {
        cursors.iter()
            .filter_map(|cursor| {
                self.entries.get(cursor).map(|link| State {
                    cursor: cursor.clone(),
                    trajectory: link.clone(),
                    score: link.borrow().score(),
                })
            })
            .collect()
    }
}

impl<C: GraphCursor> StateCollection<C> for StateSet<C> {
    fn states(&self) -> Vec<State<C>> {
        self.entries.iter()
            .map(|(cursor, link)| State {
                cursor: cursor.clone(),
                trajectory: link.clone(),
                score: link.borrow().score(),
            })
            .collect()
    }
}

/// Flattened state set for the Delete kind. Delete states never consume
/// a graph step, so a single scored reference per cursor is enough; the
/// referenced trajectory is whatever Match or Insert state last emitted
/// that cursor.
#[derive(Clone, Default)]
pub struct DeletionStateSet<C: GraphCursor> {
    entries: FxHashMap<C, (f64, TrajectoryRef<C>)>,
}

impl<C: GraphCursor> DeletionStateSet<C> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn update(&mut self, cursor: C, score: f64, trajectory: TrajectoryRef<C>) -> bool {
        match self.entries.entry(cursor) {
            Entry::Occupied(mut entry) => {
                if score < entry.get().0 {
                    entry.insert((score, trajectory));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert((score, trajectory));
                true
            }
        }
    }

    /// Fold another set in, relaxing each entry against the stored best.
    /// Returns how many entries changed.
    pub fn merge<S: StateCollection<C>>(&mut self, source: &S, added_fee: f64) -> usize {
        let mut changed = 0;
        for state in source.states() {
            if self.update(state.cursor, state.score + added_fee, state.trajectory) {
                changed += 1;
            }
        }
        changed
    }

    /// Advance every stored score in place: the Delete self-loop moves
    /// the profile position while the graph cursor stays put.
    pub fn increment(&mut self, added_fee: f64) {
        for entry in self.entries.values_mut() {
            entry.0 += added_fee;
        }
    }

    pub fn scores(&self) -> Vec<f64> {
        self.entries.values().map(|entry| entry.0).collect()
    }

    pub fn filter_by(&mut self, mut predicate: impl FnMut(&C, f64) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|cursor, entry| !predicate(cursor, entry.0));
        before - self.entries.len()
    }

    pub fn filter_top(&mut self, top_n: usize, score_ceiling: f64) -> usize {
        let mut scores = self.scores();
        match retain_threshold(&mut scores, top_n, score_ceiling) {
            Some(threshold) => self.filter_by(|_, score| score > threshold),
            None => {
                let removed = self.entries.len();
                self.entries.clear();
                removed
            }
        }
    }
}

impl<C: GraphCursor> StateCollection<C> for DeletionStateSet<C> {
    fn states(&self) -> Vec<State<C>> {
        self.entries.iter()
            .map(|(cursor, (score, trajectory))| State {
                cursor: cursor.clone(),
                trajectory: trajectory.clone(),
                score: *score,
            })
            .collect()
    }
}

/// The score at or below which entries survive `filter_top`; `None`
/// means nothing survives.
fn retain_threshold(scores: &mut [f64], top_n: usize, score_ceiling: f64) -> Option<f64> {
    let n = top_n.min(scores.len());
    if n == 0 {
        return None;
    }
    let (_, nth, _) = scores.select_nth_unstable_by(n - 1, f64::total_cmp);
    Some(score_ceiling.min(*nth))
}
