//! The language oracle: row and column pattern compliance plus random
//! compliant line generation.
//!
//! Legal shapes are fixed per axis:
//! * row:    `4* ⟨pivot⟩? e*` with pivot ∈ {2, 7}
//! * column: `7* ⟨pivot⟩? 2*` with pivot ∈ {4, e}
//!
//! The empty marker is tolerated as a gap between occupied spans: a line
//! complies iff every *maximal run* of non-empty symbols matches the
//! axis pattern. Both the per-run matching and the at-most-one pivot are
//! load-bearing: cutting a subtree may split a run in two and may orphan
//! an arm from its pivot, and cuts must never introduce a language
//! violation. Every fragment of a compliant run is itself compliant
//! under these patterns, so symbol removal can only preserve
//! compliance.
//!
//! Generation is pure string work — the oracle proposes a pivot plus two
//! random-length arms and the board decides whether the proposal fits
//! the free cells; retries live with the caller who knows the geometry.

use core_grid::EMPTY_SYMBOL;
use rand::rngs::SmallRng;
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

static ROW_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^4*[27]?e*$").expect("static row pattern compiles"));
static COL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^7*[4e]?2*$").expect("static column pattern compiles"));

/// Which axis a line of symbols belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Row,
    Col,
}

impl Axis {
    fn pattern(self) -> &'static Regex {
        match self {
            Axis::Row => &ROW_PATTERN,
            Axis::Col => &COL_PATTERN,
        }
    }

    /// Pivot candidates for this axis.
    pub const fn pivots(self) -> [char; 2] {
        match self {
            Axis::Row => ['2', '7'],
            Axis::Col => ['4', 'e'],
        }
    }

    /// Arm symbols `(before_pivot, after_pivot)` in reading order
    /// (left→right for rows, top→bottom for columns).
    pub const fn arms(self) -> (char, char) {
        match self {
            Axis::Row => ('4', 'e'),
            Axis::Col => ('7', '2'),
        }
    }
}

/// Evaluates row/column compliance and generates random compliant lines.
#[derive(Debug, Default, Clone)]
pub struct LanguageOracle;

impl LanguageOracle {
    pub fn new() -> Self {
        Self
    }

    /// True iff a gap-free run of symbols matches the axis pattern.
    pub fn run_compliant(&self, axis: Axis, run: &str) -> bool {
        axis.pattern().is_match(run)
    }

    /// True iff every maximal non-empty run in `symbols` matches the
    /// axis pattern. An all-empty line is trivially compliant.
    pub fn line_compliant(&self, axis: Axis, symbols: &[char]) -> bool {
        let mut run = String::new();
        for &sym in symbols.iter().chain(std::iter::once(&EMPTY_SYMBOL)) {
            if sym == EMPTY_SYMBOL {
                if !run.is_empty() {
                    if !self.run_compliant(axis, &run) {
                        return false;
                    }
                    run.clear();
                }
            } else {
                run.push(sym);
            }
        }
        true
    }

    /// Propose a random compliant line anchored at a pivot.
    ///
    /// `max_before` / `max_after` bound the arm lengths (typically the
    /// free space the caller measured on the board); `depth` caps both
    /// arms regardless of space. Offsets in the result are relative to
    /// the pivot, so index 0 of `symbols` sits at `pivot + start`.
    pub fn generate_line(
        &self,
        rng: &mut SmallRng,
        axis: Axis,
        max_before: i32,
        max_after: i32,
        depth: i32,
    ) -> GeneratedLine {
        let pivots = axis.pivots();
        let pivot = pivots[rng.gen_range(0..pivots.len())];
        self.generate_line_with_pivot(rng, axis, pivot, max_before, max_after, depth)
    }

    /// [`generate_line`] with the pivot fixed — used when a branch is
    /// grafted onto an existing cell whose symbol is already decided.
    pub fn generate_line_with_pivot(
        &self,
        rng: &mut SmallRng,
        axis: Axis,
        pivot: char,
        max_before: i32,
        max_after: i32,
        depth: i32,
    ) -> GeneratedLine {
        debug_assert!(axis.pivots().contains(&pivot), "pivot fits the axis");
        let before_cap = max_before.min(depth).max(0);
        let after_cap = max_after.min(depth).max(0);
        let before = rng.gen_range(0..=before_cap);
        let after = rng.gen_range(0..=after_cap);
        let (arm_before, arm_after) = axis.arms();

        let mut symbols = Vec::with_capacity((before + after + 1) as usize);
        symbols.extend(std::iter::repeat(arm_before).take(before as usize));
        symbols.push(pivot);
        symbols.extend(std::iter::repeat(arm_after).take(after as usize));

        debug_assert!(
            self.run_compliant(axis, &symbols.iter().collect::<String>()),
            "generator produced a non-compliant run"
        );

        GeneratedLine {
            start: -before,
            symbols,
        }
    }
}

/// A generated compliant line. `start` is the offset of the first symbol
/// relative to the pivot position (always ≤ 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedLine {
    pub start: i32,
    pub symbols: Vec<char>,
}

impl GeneratedLine {
    /// Offset of the last symbol relative to the pivot.
    pub fn end(&self) -> i32 {
        self.start + self.symbols.len() as i32 - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn row_runs() {
        let oracle = LanguageOracle::new();
        // Arms without a pivot are legal: a cut may orphan them.
        for ok in ["2", "7", "4", "e", "44", "ee", "4e", "42", "4447eee", "2eee", "4442"] {
            assert!(oracle.run_compliant(Axis::Row, ok), "{ok} should match");
        }
        for bad in ["", "24", "e2", "e4", "427e", "44e7", "472", "72"] {
            assert!(!oracle.run_compliant(Axis::Row, bad), "{bad} should not match");
        }
    }

    #[test]
    fn col_runs() {
        let oracle = LanguageOracle::new();
        for ok in ["4", "e", "7", "2", "74", "72", "22", "777e222", "e2", "7774"] {
            assert!(oracle.run_compliant(Axis::Col, ok), "{ok} should match");
        }
        for bad in ["", "47", "2e", "27", "7e7", "242"] {
            assert!(!oracle.run_compliant(Axis::Col, bad), "{bad} should not match");
        }
    }

    #[test]
    fn every_fragment_of_a_compliant_run_stays_compliant() {
        // The property behind cut-safety: removing symbols (splitting a
        // run, dropping its pivot) never turns a legal line illegal.
        let oracle = LanguageOracle::new();
        let full = "4447eee";
        for start in 0..full.len() {
            for end in (start + 1)..=full.len() {
                let frag = &full[start..end];
                assert!(oracle.run_compliant(Axis::Row, frag), "{frag}");
            }
        }
    }

    #[test]
    fn line_compliance_tolerates_gaps_between_runs() {
        let oracle = LanguageOracle::new();
        assert!(oracle.line_compliant(Axis::Row, &chars("****")));
        assert!(oracle.line_compliant(Axis::Row, &chars("*442e**7e*")));
        assert!(!oracle.line_compliant(Axis::Row, &chars("*4e2*")));
        assert!(oracle.line_compliant(Axis::Col, &chars("77e2**4*")));
    }

    #[test]
    fn generated_lines_are_compliant_and_anchored() {
        let oracle = LanguageOracle::new();
        let mut rng = SmallRng::seed_from_u64(7);
        for axis in [Axis::Row, Axis::Col] {
            for _ in 0..50 {
                let line = oracle.generate_line(&mut rng, axis, 6, 6, 4);
                let run: String = line.symbols.iter().collect();
                assert!(oracle.run_compliant(axis, &run), "{axis:?} {run}");
                // The pivot sits at offset 0.
                let pivot = line.symbols[(-line.start) as usize];
                assert!(axis.pivots().contains(&pivot));
                assert!(line.start >= -4 && line.end() <= 4);
            }
        }
    }

    #[test]
    fn generation_respects_space_bounds() {
        let oracle = LanguageOracle::new();
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..20 {
            let line = oracle.generate_line(&mut rng, Axis::Row, 0, 2, 10);
            assert_eq!(line.start, 0, "no space before the pivot");
            assert!(line.end() <= 2);
        }
    }
}
