//! The profile-position scan: generalized Viterbi alignment of a profile
//! HMM against paths through a graph.

pub mod alignment;
pub mod depth;
pub mod queue;
pub mod state_set;
pub mod trajectory;

use log::{info, trace, warn};
use rustc_hash::FxHashSet;

use crate::fees::{Fees, TR_DD, TR_DM, TR_II, TR_IM, TR_MD, TR_MI, TR_MM};
use crate::graphs::GraphCursor;
use crate::search::depth::DepthFilter;
use crate::search::queue::MinCostQueue;
use crate::search::state_set::{DeletionStateSet, StateCollection, StateSet};
use crate::search::trajectory::{EventKind, PathSet, Trajectory, TrajectoryRef};

/// Pruning knobs. The defaults reproduce the schedule the engine ships
/// with; all of them trade accuracy for memory and time, none is a
/// correctness requirement.
#[derive(Debug, Clone)]
pub struct PruningParams {
    /// Scores above this are treated as negligibly probable.
    pub score_ceiling: f64,

    /// State-count caps, tightening as the scan moves into the profile.
    pub states_after_10: usize,
    pub states_after_50: usize,
    pub states_after_500: usize,

    /// A cursor must still reach `positions_left / depth_divisor -
    /// depth_offset` graph steps to stay alive.
    pub depth_divisor: f64,
    pub depth_offset: f64,

    /// Relaxation rounds used when an insertion self-loop may be
    /// negative and best-first relaxation would not terminate.
    pub insertion_rounds: usize,

    /// Confine the search to the cursors given as the initial set.
    pub restrict_to_neighborhood: bool,
}

impl Default for PruningParams {
    fn default() -> Self {
        Self {
            score_ceiling: 100.0,
            states_after_10: 1_000_000,
            states_after_50: 20_000,
            states_after_500: 10_000,
            depth_divisor: 3.0,
            depth_offset: 10.0,
            insertion_rounds: 30,
            restrict_to_neighborhood: true,
        }
    }
}

impl PruningParams {
    fn state_cap(&self, position: usize) -> Option<usize> {
        if position > 500 {
            Some(self.states_after_500)
        } else if position > 50 {
            Some(self.states_after_50)
        } else if position > 10 {
            Some(self.states_after_10)
        } else {
            None
        }
    }

    fn depth_requirement(&self, positions_left: usize) -> f64 {
        positions_left as f64 / self.depth_divisor - self.depth_offset
    }
}

/// The reachability filters applied while scanning: depth (can this
/// cursor still reach the profile end) and the optional neighborhood
/// restriction.
struct ScanFilters<'a, C: GraphCursor> {
    depth: DepthFilter<C>,
    requirement: f64,
    neighborhood: Option<&'a FxHashSet<C>>,
}

impl<C: GraphCursor> ScanFilters<'_, C> {
    fn out_of_neighborhood(&self, cursor: &C) -> bool {
        !cursor.is_empty()
            && self.neighborhood.map_or(false, |neighborhood| !neighborhood.contains(cursor))
    }

    fn too_shallow(&mut self, cursor: &C) -> bool {
        !self.depth.depth_at_least(cursor, self.requirement)
    }

    fn rejects(&mut self, cursor: &C) -> bool {
        self.out_of_neighborhood(cursor) || self.too_shallow(cursor)
    }
}

/// Align the profile against all paths reachable from `initial`,
/// returning the terminal path set. Uses the default pruning schedule.
pub fn find_best_path<C: GraphCursor>(fees: &Fees, initial: &[C]) -> PathSet<C> {
    PathSearcher::new(fees).search(initial)
}

/// Drives the profile-position scan over any graph exposing
/// [`GraphCursor`]. The fee tables stay read-only, so one searcher can
/// serve many graphs, and independent searches may run on separate
/// threads with their own state.
pub struct PathSearcher<'a> {
    fees: &'a Fees,
    params: PruningParams,
}

impl<'a> PathSearcher<'a> {
    pub fn new(fees: &'a Fees) -> Self {
        Self { fees, params: PruningParams::default() }
    }

    pub fn with_params(fees: &'a Fees, params: PruningParams) -> Self {
        Self { fees, params }
    }

    pub fn search<C: GraphCursor>(&self, initial_cursors: &[C]) -> PathSet<C> {
        let fees = self.fees;

        info!("profile length: {}", fees.length);
        let negative_loops = fees.count_negative_insert_loops();
        if negative_loops > 0 {
            warn!(
                "{} profile positions carry a negative-cost insertion loop; \
                 their relaxation is bounded, not exact",
                negative_loops
            );
        }

        let neighborhood: Option<FxHashSet<C>> = self.params.restrict_to_neighborhood
            .then(|| initial_cursors.iter().cloned().collect());
        let mut filters = ScanFilters {
            depth: DepthFilter::default(),
            requirement: self.params.depth_requirement(fees.length),
            neighborhood: neighborhood.as_ref(),
        };

        let initial: Vec<C> = initial_cursors.iter()
            .filter(|cursor| filters.depth.depth_at_least(cursor, filters.requirement))
            .cloned()
            .collect();
        info!(
            "initial cursors: {} of {} pass the depth filter",
            initial.len(),
            initial_cursors.len()
        );

        let empty = C::default();
        let source = Trajectory::source();

        let mut matches = StateSet::default();
        matches.insert(empty.clone(), source.clone());
        let mut inserts = StateSet::default();
        let mut deletes = DeletionStateSet::default();

        // Pre-profile insertions: symbols consumed before the first
        // match column.
        self.transfer(
            &mut inserts,
            &matches,
            fees.transitions[0][TR_MI],
            &fees.insert_emissions[0],
            &initial,
        );
        self.insert_loop(&mut inserts, 0, &mut filters);
        inserts.set_event(0, EventKind::Insertion);

        let mut next_report = 1usize;
        for m in 1..=fees.length {
            let positions_left = fees.length - m;
            filters.requirement = self.params.depth_requirement(positions_left);

            self.advance_position(&mut deletes, &mut matches, &inserts, m, &initial);

            inserts = StateSet::default();
            self.transfer(
                &mut inserts,
                &matches,
                fees.transitions[m][TR_MI],
                &fees.insert_emissions[m],
                &initial,
            );
            self.insert_loop(&mut inserts, m, &mut filters);

            inserts.set_event(m, EventKind::Insertion);
            matches.set_event(m, EventKind::Match);

            let live = deletes.len() + inserts.len() + matches.len();
            let cap = self.params.state_cap(m).unwrap_or(live);
            let mut capped = inserts.filter_top(cap, self.params.score_ceiling);
            capped += matches.filter_top(cap, self.params.score_ceiling);
            capped += deletes.filter_top(cap, self.params.score_ceiling);

            let mut shallow = inserts.filter_by(|cursor, _| filters.too_shallow(cursor));
            shallow += matches.filter_by(|cursor, _| filters.too_shallow(cursor));
            shallow += deletes.filter_by(|cursor, _| filters.too_shallow(cursor));

            let mut outside = inserts.filter_by(|cursor, _| filters.out_of_neighborhood(cursor));
            outside += matches.filter_by(|cursor, _| filters.out_of_neighborhood(cursor));
            outside += deletes.filter_by(|cursor, _| filters.out_of_neighborhood(cursor));

            if m >= next_report {
                info!(
                    "position {}: I = {} M = {} D = {} \
                     ({} capped, {} too shallow, {} out of neighborhood)",
                    m, inserts.len(), matches.len(), deletes.len(),
                    capped, shallow, outside
                );
                next_report <<= 1;
            }
        }

        debug_assert!(matches.check_events());
        debug_assert!(inserts.check_events());

        let terminal = Trajectory::new();
        terminal.borrow_mut().update(empty, f64::INFINITY, Some(source));

        let exit = &fees.transitions[fees.length];
        Self::fold_terminal(&terminal, &deletes, exit[TR_DM]);
        // Insert states leave through the same End-state wiring as
        // Delete states.
        Self::fold_terminal(&terminal, &inserts, exit[TR_DM]);
        Self::fold_terminal(&terminal, &matches, exit[TR_MM]);

        PathSet::new(terminal)
    }

    /// Move every state one graph step forward, paying the transition
    /// fee plus the emission at the successor. States still outside the
    /// graph (the empty sentinel) step onto the initial cursors instead.
    fn transfer<C: GraphCursor, S: StateCollection<C>>(
        &self,
        to: &mut StateSet<C>,
        from: &S,
        transition_fee: f64,
        emissions: &[f64],
        initial: &[C],
    ) {
        for state in from.states() {
            if state.cursor.is_empty() {
                for next in initial {
                    let cost = state.score
                        + transition_fee
                        + emissions[self.fees.code.encode(next.letter())];
                    to.update(next.clone(), cost, state.cursor.clone(), &state.trajectory);
                }
            } else {
                for next in state.cursor.next() {
                    let cost = state.score
                        + transition_fee
                        + emissions[self.fees.code.encode(next.letter())];
                    to.update(next, cost, state.cursor.clone(), &state.trajectory);
                }
            }
        }
    }

    /// One profile step: relax the Delete set in place (self-loop plus
    /// Match fold, no graph advance), pool the best contribution per
    /// cursor from the previous Match, Delete and Insert sets, then
    /// advance the pool one graph step under the Match emissions.
    fn advance_position<C: GraphCursor>(
        &self,
        deletes: &mut DeletionStateSet<C>,
        matches: &mut StateSet<C>,
        inserts: &StateSet<C>,
        m: usize,
        initial: &[C],
    ) {
        let transitions = &self.fees.transitions[m - 1];

        let mut pool = deletes.clone();
        deletes.increment(transitions[TR_DD]);
        deletes.merge(matches, transitions[TR_MD]);

        pool.increment(transitions[TR_DM]);
        pool.merge(matches, transitions[TR_MM]);
        pool.merge(inserts, transitions[TR_IM]);

        let mut advanced = StateSet::default();
        self.transfer(&mut advanced, &pool, 0.0, &self.fees.match_emissions[m], initial);
        *matches = advanced;
    }

    fn insert_loop<C: GraphCursor>(
        &self,
        inserts: &mut StateSet<C>,
        m: usize,
        filters: &mut ScanFilters<'_, C>,
    ) {
        if self.fees.is_insert_loop_non_negative(m) {
            self.insert_loop_best_first(inserts, m, filters);
        } else {
            self.insert_loop_bounded(inserts, m);
        }
    }

    /// Absorb chains of same-position insertions by best-first
    /// relaxation. With a non-negative self-loop cost this is Dijkstra
    /// over the implicit insertion graph: each cursor is finalized at
    /// most once, in ascending score order, and anything above the score
    /// ceiling is discarded.
    fn insert_loop_best_first<C: GraphCursor>(
        &self,
        inserts: &mut StateSet<C>,
        m: usize,
        filters: &mut ScanFilters<'_, C>,
    ) {
        let loop_fee = self.fees.transitions[m][TR_II];
        let emissions = &self.fees.insert_emissions[m];
        let ceiling = self.params.score_ceiling;

        struct Pending<C: GraphCursor> {
            cursor: C,
            source: C,
            source_link: TrajectoryRef<C>,
        }

        let mut queue = MinCostQueue::new();
        for (cursor, link) in inserts.iter() {
            let Some((source, score, Some(source_link))) = link.borrow().best_ancestor() else {
                continue;
            };
            if score > ceiling {
                continue;
            }
            if !filters.rejects(cursor) {
                queue.push(score, Pending { cursor: cursor.clone(), source, source_link });
            }
        }

        let mut finalized: FxHashSet<C> = FxHashSet::default();
        let mut pops = 0usize;
        while let Some((score, pending)) = queue.pop() {
            pops += 1;
            if score > ceiling {
                break;
            }
            if !finalized.insert(pending.cursor.clone()) {
                continue;
            }

            inserts.update(pending.cursor.clone(), score, pending.source, &pending.source_link);
            let link = inserts.get(&pending.cursor).unwrap().clone();

            for next in pending.cursor.next() {
                if finalized.contains(&next) {
                    continue;
                }
                let cost = score + loop_fee + emissions[self.fees.code.encode(next.letter())];
                if !filters.rejects(&next) {
                    queue.push(cost, Pending {
                        cursor: next,
                        source: pending.cursor.clone(),
                        source_link: link.clone(),
                    });
                }
            }
        }

        trace!(
            "insertion loop at position {}: {} cursors finalized, {} queue pops",
            m, finalized.len(), pops
        );
    }

    /// Bounded relaxation for positions whose insertion self-loop can go
    /// negative: a fixed number of rounds over an isolated clone, so a
    /// node never observes a relaxed version of itself as its own
    /// ancestor. The result is a documented approximation, not an exact
    /// shortest path.
    fn insert_loop_bounded<C: GraphCursor>(&self, inserts: &mut StateSet<C>, m: usize) {
        let loop_fee = self.fees.transitions[m][TR_II];
        let emissions = &self.fees.insert_emissions[m];

        let mut updated: FxHashSet<C> = inserts.iter().map(|(cursor, _)| cursor.clone()).collect();
        inserts.set_event(m, EventKind::Insertion);
        let mut relaxed = inserts.clone_deep();

        for round in 0..self.params.insertion_rounds {
            updated = self.transfer_updated(&mut relaxed, inserts, loop_fee, emissions, &updated);
            relaxed.set_event(m, EventKind::Insertion);
            trace!(
                "insertion round {} at position {}: {} states updated",
                round, m, updated.len()
            );
            if updated.is_empty() {
                break;
            }
            for cursor in &updated {
                let node = relaxed.get(cursor).unwrap();
                inserts.insert(cursor.clone(), Trajectory::clone_node(node));
            }
        }

        *inserts = relaxed;
    }

    /// Like `transfer`, but restricted to the given source cursors;
    /// returns the cursors whose states improved.
    fn transfer_updated<C: GraphCursor>(
        &self,
        to: &mut StateSet<C>,
        from: &StateSet<C>,
        transition_fee: f64,
        emissions: &[f64],
        sources: &FxHashSet<C>,
    ) -> FxHashSet<C> {
        let mut updated = FxHashSet::default();
        for state in from.states_for(sources) {
            for next in state.cursor.next() {
                let cost = state.score
                    + transition_fee
                    + emissions[self.fees.code.encode(next.letter())];
                if to.update(next.clone(), cost, state.cursor.clone(), &state.trajectory) {
                    updated.insert(next);
                }
            }
        }
        updated
    }

    fn fold_terminal<C: GraphCursor, S: StateCollection<C>>(
        terminal: &TrajectoryRef<C>,
        set: &S,
        exit_fee: f64,
    ) {
        let mut terminal = terminal.borrow_mut();
        for state in set.states() {
            terminal.update(state.cursor, state.score + exit_fee, Some(state.trajectory));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::mock;
    use crate::graphs::sequence::SequenceCursor;
    use crate::graphs::translated::make_aa_cursors;
    use crate::search::alignment::compress_alignment;

    const ANTIBODY_NTS: &str = "GAGGTGCAGCTGGTGGAGTCTGGGGGAGGTGTGGTACGGCCTGGGGGGTCCCTGAGACTCTCCTGTGCAGCCTCTGGATTCACCTTTGATGATTATGGCATGAGCTGGGTCCGCCAAGCTCCAGGGAAGGGGCTGGAGTGGGTCTCTGGTATTAATTGGAATGGTGGTAGCACAGGTTATGCAGACTCTGTGAAGGGCCGATTCACCATCTCCAGAGACAACGCCAAGAACTCCCTGTATCTGCAAATGAACAGTCTGAGAGCCGAGGACACGGCCTTGTATCACTGTGCGAGAGATCATGATAGTAGTAGCCCGGGGTCCAACTGGTTCGACCCCTGGGGCCAGGGAACCCTGGTCACC";
    const ANTIBODY_AAS: &str = "EVQLVESGGGVVRPGGSLRLSCAASGFTFDDYGMSWVRQAPGKGLEWVSGINWNGGSTGYADSVKGRFTISRDNAKNSLYLQMNSLRAEDTALYHCARDHDSSSPGSNWFDPWGQGTLVT";

    fn levenshtein(consensus: &str) -> Fees {
        Fees::levenshtein(consensus, 1.0, 1.0, 1.0)
    }

    #[test]
    fn test_exact_substring_scores_zero() {
        let graph = mock::linear("ACGTACGT");
        let fees = levenshtein("GTAC");

        let result = find_best_path(&fees, &graph.all_cursors());
        assert_eq!(result.best_score(), 0.0);

        let best = result.best_path().unwrap();
        assert_eq!(best.path_string(), "GTAC");
        assert_eq!(best.score, 0.0);
        assert_eq!(compress_alignment(&best.alignment(&fees).unwrap()), "4M");
    }

    #[test]
    fn test_single_mismatch_costs_one() {
        let graph = mock::linear("ACGTACGT");
        let fees = levenshtein("GTTC");

        let result = find_best_path(&fees, &graph.all_cursors());
        assert_eq!(result.best_score(), 1.0);
    }

    #[test]
    fn test_deletion_costs_one() {
        // The consensus carries one extra symbol the graph cannot spell.
        let graph = mock::linear("ACGT");
        let fees = levenshtein("ACGGT");

        let result = find_best_path(&fees, &graph.all_cursors());
        assert_eq!(result.best_score(), 1.0);
    }

    #[test]
    fn test_insertion_costs_one() {
        // The graph path carries one symbol the consensus lacks.
        let graph = mock::linear("ACGTA");
        let fees = levenshtein("ACTA");

        let result = find_best_path(&fees, &graph.all_cursors());
        assert_eq!(result.best_score(), 1.0);
    }

    #[test]
    fn test_search_is_deterministic() {
        let graph = mock::linear("ACGTACGT");
        let fees = levenshtein("CGTA");

        let first = find_best_path(&fees, &graph.all_cursors());
        let second = find_best_path(&fees, &graph.all_cursors());

        assert_eq!(first.best_score(), second.best_score());

        let paths_a = first.top_k(3);
        let paths_b = second.top_k(3);
        assert_eq!(paths_a.len(), paths_b.len());
        for (a, b) in paths_a.iter().zip(&paths_b) {
            assert_eq!(a.score, b.score);
            assert_eq!(a.path, b.path);
            assert_eq!(a.events, b.events);
        }
    }

    #[test]
    fn test_top_k_paths_are_distinct_and_ordered() {
        let graph = mock::fork();
        let fees = levenshtein("ACGT");
        let params = PruningParams { restrict_to_neighborhood: false, ..Default::default() };

        let searcher = PathSearcher::with_params(&fees, params);
        let result = searcher.search(&graph.begins());

        let paths = result.top_k(2);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].score, 0.0);
        assert_eq!(paths[0].path_string(), "ACGT");
        assert_eq!(paths[1].score, 1.0);
        assert_eq!(paths[1].path_string(), "ACAT");
        assert_ne!(paths[0].path, paths[1].path);
    }

    #[test]
    fn test_empty_initial_set_yields_no_paths() {
        let fees = levenshtein("ACGT");
        let initial: Vec<SequenceCursor> = Vec::new();

        let result = find_best_path(&fees, &initial);
        // The terminal retains only the degenerate route that deletes the
        // whole profile without entering the graph; reconstruction refuses
        // to report it as a path.
        assert_eq!(result.best_score(), 4.0);
        assert!(result.top_k(2).is_empty());
        assert!(result.best_path().is_none());
    }

    #[test]
    fn test_unreachable_outcome_is_representable() {
        // Nothing in the graph matches, and a tight score ceiling prunes
        // every surviving state mid-scan.
        let graph = mock::linear("TTTT");
        let fees = levenshtein("ACGT");
        let params = PruningParams { score_ceiling: 1.5, ..Default::default() };

        let result = PathSearcher::with_params(&fees, params).search(&graph.all_cursors());
        assert!(result.best_score().is_infinite());
        assert!(result.top_k(1).is_empty());
    }

    #[test]
    fn test_negative_insert_loop_still_terminates() {
        let graph = mock::linear("ACACAC");
        let mut fees = levenshtein("AC");
        for row in &mut fees.transitions {
            row[crate::fees::TR_II] = -0.25;
        }
        assert!(fees.count_negative_insert_loops() > 0);

        let result = find_best_path(&fees, &graph.all_cursors());
        assert!(result.best_score().is_finite());
        assert!(!result.best_path().unwrap().is_empty());
    }

    #[test]
    fn test_antibody_round_trip() {
        let graph = mock::linear(ANTIBODY_NTS);
        let aa_cursors = make_aa_cursors(&graph.all_cursors());
        let fees = levenshtein(ANTIBODY_AAS);

        let result = find_best_path(&fees, &aa_cursors);
        assert_eq!(result.best_score(), 0.0);

        let best = result.best_path().unwrap();
        assert_eq!(best.path_string(), ANTIBODY_AAS);
        assert_eq!(
            compress_alignment(&best.alignment(&fees).unwrap()),
            format!("{}M", ANTIBODY_AAS.len())
        );
    }
}
