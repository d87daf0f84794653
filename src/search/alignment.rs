//! Reconstructed paths and their rendering against the profile.

use itertools::Itertools;

use crate::errors::GrappaError;
use crate::fees::Fees;
use crate::graphs::GraphCursor;
use crate::search::trajectory::{Event, EventKind};

/// A reconstructed path: the cursors in graph order, the accumulated
/// cost, and one event per cursor.
#[derive(Debug, Clone)]
pub struct AnnotatedPath<C: GraphCursor> {
    pub path: Vec<C>,
    pub score: f64,
    pub events: Vec<Event>,
}

impl<C: GraphCursor> AnnotatedPath<C> {
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.path.len(), self.events.len());
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// The symbols emitted along the path.
    pub fn path_string(&self) -> String {
        self.path.iter().map(|cursor| cursor.letter() as char).collect()
    }

    /// Per-profile-position alignment codes: `M` for a consensus match,
    /// `X` for a mismatch, `I` for an insertion, `-` for a deleted
    /// profile position (inferred from gaps in the event positions).
    pub fn alignment(&self, fees: &Fees) -> Result<String, GrappaError> {
        debug_assert_eq!(self.path.len(), self.events.len());

        let consensus = fees.consensus.as_bytes();
        let mut rendered = String::new();
        let mut previous = 0usize;

        for (index, (cursor, event)) in self.path.iter().zip(&self.events).enumerate() {
            if event.kind == EventKind::None {
                return Err(GrappaError::InvalidPathEvent { position: index });
            }

            let position = event.position as usize;
            for _ in previous + 1..position {
                rendered.push('-');
            }
            previous = position;

            rendered.push(match event.kind {
                EventKind::Match => {
                    if consensus[position - 1] == cursor.letter() { 'M' } else { 'X' }
                }
                EventKind::Insertion => 'I',
                EventKind::None => unreachable!(),
            });
        }

        for _ in previous + 1..=fees.length {
            rendered.push('-');
        }

        Ok(rendered)
    }
}

/// Run-length encode an alignment string; deletion runs render as `D`.
pub fn compress_alignment(alignment: &str) -> String {
    alignment.chars()
        .chunk_by(|&code| code)
        .into_iter()
        .map(|(code, run)| {
            let code = if code == '-' { 'D' } else { code };
            format!("{}{}", run.count(), code)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::mock;
    use crate::search::trajectory::EventKind;

    fn event(position: u32, kind: EventKind) -> Event {
        Event { position, kind }
    }

    #[test]
    fn test_alignment_codes() {
        let fees = Fees::levenshtein("ACGT", 1.0, 1.0, 1.0);
        let path = mock::linear("AAT").all_cursors();

        // A matches position 1, the second A mismatches position 2,
        // position 3 is deleted, T matches position 4.
        let annotated = AnnotatedPath {
            path,
            score: 2.0,
            events: vec![
                event(1, EventKind::Match),
                event(2, EventKind::Match),
                event(4, EventKind::Match),
            ],
        };

        assert_eq!(annotated.alignment(&fees).unwrap(), "MX-M");
    }

    #[test]
    fn test_alignment_renders_insertions_and_tail_gaps() {
        let fees = Fees::levenshtein("ACGT", 1.0, 1.0, 1.0);
        let path = mock::linear("ACC").all_cursors();

        let annotated = AnnotatedPath {
            path,
            score: 3.0,
            events: vec![
                event(1, EventKind::Match),
                event(2, EventKind::Match),
                event(2, EventKind::Insertion),
            ],
        };

        assert_eq!(annotated.alignment(&fees).unwrap(), "MMI--");
    }

    #[test]
    fn test_alignment_rejects_untagged_positions() {
        let fees = Fees::levenshtein("A", 1.0, 1.0, 1.0);
        let annotated = AnnotatedPath {
            path: mock::linear("A").all_cursors(),
            score: 0.0,
            events: vec![event(0, EventKind::None)],
        };

        assert!(matches!(
            annotated.alignment(&fees),
            Err(GrappaError::InvalidPathEvent { position: 0 })
        ));
    }

    #[test]
    fn test_compress_alignment() {
        assert_eq!(compress_alignment("MMMM"), "4M");
        assert_eq!(compress_alignment("MMX-"), "2M1X1D");
        assert_eq!(compress_alignment("MM--MI"), "2M2D1M1I");
        assert_eq!(compress_alignment(""), "");
    }
}
