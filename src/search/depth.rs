use rustc_hash::{FxHashMap, FxHashSet};

use crate::graphs::GraphCursor;

/// Answers "are at least `d` further graph steps reachable from here".
///
/// A cursor that cannot make enough forward steps can never reach the
/// profile end, so the scan drops it early. Exploration is bounded by the
/// demanded depth, and results are memoized as lower bounds: a cached
/// bound proves reachability for any smaller demand and is only
/// recomputed when a larger demand arrives. A cycle on the exploration
/// path pumps depth indefinitely and saturates to the demand.
#[derive(Default)]
pub struct DepthFilter<C: GraphCursor> {
    cache: FxHashMap<C, usize>,
}

impl<C: GraphCursor> DepthFilter<C> {
    pub fn depth_at_least(&mut self, cursor: &C, depth: f64) -> bool {
        if depth <= 0.0 {
            return true;
        }
        // The empty sentinel has not entered the graph yet; it may still
        // step onto any initial cursor.
        if cursor.is_empty() {
            return true;
        }

        let needed = depth.ceil() as usize;
        let mut on_path = FxHashSet::default();
        self.lower_bound(cursor, needed, &mut on_path) >= needed
    }

    fn lower_bound(&mut self, cursor: &C, limit: usize, on_path: &mut FxHashSet<C>) -> usize {
        if limit == 0 {
            return 0;
        }
        if let Some(&bound) = self.cache.get(cursor) {
            if bound >= limit {
                return bound;
            }
        }
        if !on_path.insert(cursor.clone()) {
            return limit;
        }

        let mut best = 0;
        for next in cursor.next() {
            best = best.max(1 + self.lower_bound(&next, limit - 1, on_path));
            if best >= limit {
                break;
            }
        }

        on_path.remove(cursor);
        let cached = self.cache.entry(cursor.clone()).or_insert(0);
        *cached = (*cached).max(best);
        best
    }
}

#[cfg(test)]
mod tests {
    use super::DepthFilter;
    use crate::graphs::mock;
    use crate::graphs::sequence::SequenceCursor;

    #[test]
    fn test_linear_chain_depth() {
        let graph = mock::linear("ACGTA");
        let begin = &graph.begins()[0];
        let mut filter = DepthFilter::default();

        assert!(filter.depth_at_least(begin, 4.0));
        assert!(!filter.depth_at_least(begin, 5.0));
        // Re-querying a smaller demand hits the cached bound.
        assert!(filter.depth_at_least(begin, 3.0));
    }

    #[test]
    fn test_cycle_is_bottomless() {
        let graph = mock::looped();
        let cursor = &graph.all_cursors()[0];
        let mut filter = DepthFilter::default();

        assert!(filter.depth_at_least(cursor, 1000.0));
    }

    #[test]
    fn test_empty_cursor_always_passes() {
        let mut filter: DepthFilter<SequenceCursor> = DepthFilter::default();
        assert!(filter.depth_at_least(&SequenceCursor::default(), 1000.0));
    }

    #[test]
    fn test_non_positive_demand() {
        let graph = mock::linear("A");
        let begin = &graph.begins()[0];
        let mut filter = DepthFilter::default();

        assert!(filter.depth_at_least(begin, 0.0));
        assert!(filter.depth_at_least(begin, -5.0));
    }
}
