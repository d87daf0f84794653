//! Per-position cost tables derived from a profile HMM.
//!
//! Costs are additive negative-log probabilities: lower is better, and
//! `f64::INFINITY` marks a forbidden transition. Tables are produced by an
//! external profile loader and stay read-only for the whole search.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::errors::GrappaError;

pub const TR_MM: usize = 0;
pub const TR_MI: usize = 1;
pub const TR_MD: usize = 2;
pub const TR_IM: usize = 3;
pub const TR_II: usize = 4;
pub const TR_ID: usize = 5;
pub const TR_DM: usize = 6;
pub const TR_DI: usize = 7;
pub const TR_DD: usize = 8;
pub const NUM_TRANSITIONS: usize = 9;

/// Maps emitted symbols to emission-table columns. Symbols outside the
/// alphabet share a trailing "unknown" column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolCode {
    alphabet: String,
}

impl SymbolCode {
    pub fn new(alphabet: &str) -> Self {
        Self { alphabet: alphabet.to_string() }
    }

    pub fn encode(&self, symbol: u8) -> usize {
        self.alphabet.bytes()
            .position(|c| c == symbol)
            .unwrap_or(self.alphabet.len())
    }

    /// Number of proper alphabet symbols.
    pub fn size(&self) -> usize {
        self.alphabet.len()
    }

    /// Width of an emission row: every symbol plus the unknown column.
    pub fn num_columns(&self) -> usize {
        self.alphabet.len() + 1
    }
}

/// Cost tables for a profile of `length` positions.
///
/// Rows are indexed `0..=length`; row 0 carries the Begin-state transitions
/// and the pre-profile insert emissions, row `length` the exit transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fees {
    pub length: usize,
    pub transitions: Vec<[f64; NUM_TRANSITIONS]>,
    pub match_emissions: Vec<Vec<f64>>,
    pub insert_emissions: Vec<Vec<f64>>,
    pub code: SymbolCode,
    pub consensus: String,
}

impl Fees {
    /// Read a fee table produced by an external profile loader.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, GrappaError> {
        let fees: Fees = serde_json::from_reader(reader)?;
        fees.validate()?;
        Ok(fees)
    }

    pub fn validate(&self) -> Result<(), GrappaError> {
        let rows = self.length + 1;
        if self.transitions.len() != rows {
            return Err(GrappaError::FeesDimension {
                table: "transition", expected: rows, found: self.transitions.len(),
            });
        }
        if self.match_emissions.len() != rows {
            return Err(GrappaError::FeesDimension {
                table: "match emission", expected: rows, found: self.match_emissions.len(),
            });
        }
        if self.insert_emissions.len() != rows {
            return Err(GrappaError::FeesDimension {
                table: "insert emission", expected: rows, found: self.insert_emissions.len(),
            });
        }
        if self.consensus.len() != self.length {
            return Err(GrappaError::FeesDimension {
                table: "consensus", expected: self.length, found: self.consensus.len(),
            });
        }

        let width = self.code.num_columns();
        for (position, row) in self.match_emissions.iter().chain(self.insert_emissions.iter()).enumerate() {
            if row.len() != width {
                return Err(GrappaError::EmissionWidth {
                    position: position % rows, expected: width, found: row.len(),
                });
            }
        }

        Ok(())
    }

    /// A degenerate profile equivalent to unit-cost edit distance against
    /// `consensus`: matches are free, a mismatch costs `mismatch`, and gap
    /// runs cost `gap_open + (len - 1) * gap_ext`.
    pub fn levenshtein(consensus: &str, mismatch: f64, gap_open: f64, gap_ext: f64) -> Self {
        let mut alphabet: Vec<u8> = consensus.bytes().collect();
        alphabet.sort_unstable();
        alphabet.dedup();
        let alphabet = String::from_utf8(alphabet).expect("consensus must be ASCII");
        let code = SymbolCode::new(&alphabet);

        let length = consensus.len();
        let row = {
            let mut t = [0.0; NUM_TRANSITIONS];
            t[TR_MI] = gap_open;
            t[TR_MD] = gap_open;
            t[TR_II] = gap_ext;
            t[TR_DD] = gap_ext;
            t[TR_ID] = f64::INFINITY;
            t[TR_DI] = f64::INFINITY;
            t
        };

        let width = code.num_columns();
        let mut match_emissions = vec![vec![0.0; width]];
        for c in consensus.bytes() {
            let mut emissions = vec![mismatch; width];
            emissions[code.encode(c)] = 0.0;
            match_emissions.push(emissions);
        }

        Fees {
            length,
            transitions: vec![row; length + 1],
            match_emissions,
            insert_emissions: vec![vec![0.0; width]; length + 1],
            code,
            consensus: consensus.to_string(),
        }
    }

    /// True when a chain of insertions at position `m` cannot lower the
    /// score, which is what lets the search relax the insertion self-loop
    /// with a single best-first pass.
    pub fn is_insert_loop_non_negative(&self, m: usize) -> bool {
        let min_emission = self.insert_emissions[m].iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        self.transitions[m][TR_II] + min_emission >= 0.0
    }

    pub fn count_negative_insert_loops(&self) -> usize {
        (0..=self.length)
            .filter(|&m| !self.is_insert_loop_non_negative(m))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_code() {
        let code = SymbolCode::new("ACGT");
        assert_eq!(code.encode(b'A'), 0);
        assert_eq!(code.encode(b'T'), 3);
        assert_eq!(code.encode(b'N'), 4);
        assert_eq!(code.num_columns(), 5);
    }

    #[test]
    fn test_levenshtein_fees() {
        let fees = Fees::levenshtein("ACGT", 1.0, 1.0, 1.0);

        assert_eq!(fees.length, 4);
        assert!(fees.validate().is_ok());
        assert_eq!(fees.count_negative_insert_loops(), 0);

        // Matching the consensus symbol is free, anything else costs one.
        let m1 = &fees.match_emissions[1];
        assert_eq!(m1[fees.code.encode(b'A')], 0.0);
        assert_eq!(m1[fees.code.encode(b'C')], 1.0);
        assert_eq!(m1[fees.code.encode(b'N')], 1.0);
    }

    #[test]
    fn test_validate_catches_short_tables() {
        let mut fees = Fees::levenshtein("ACGT", 1.0, 1.0, 1.0);
        fees.transitions.pop();
        assert!(matches!(
            fees.validate(),
            Err(GrappaError::FeesDimension { table: "transition", .. })
        ));
    }

    #[test]
    fn test_json_round_trip() {
        // Finite costs only: JSON has no representation for infinity.
        let fees = Fees {
            length: 2,
            transitions: vec![[0.25; NUM_TRANSITIONS]; 3],
            match_emissions: vec![vec![0.0, 0.5, 1.0]; 3],
            insert_emissions: vec![vec![0.2, 0.2, 0.2]; 3],
            code: SymbolCode::new("AC"),
            consensus: "AC".to_string(),
        };

        let json = serde_json::to_string(&fees).unwrap();
        let loaded = Fees::from_json_reader(json.as_bytes()).unwrap();

        assert_eq!(loaded.length, fees.length);
        assert_eq!(loaded.consensus, fees.consensus);
        assert_eq!(loaded.transitions[1], fees.transitions[1]);
        assert_eq!(loaded.match_emissions[2], fees.match_emissions[2]);
    }
}
