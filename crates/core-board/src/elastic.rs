//! The elastic optimizer: rent extra cells when the flow they unlock is
//! worth their price, hand them back when it is not.
//!
//! Two phases run at the root. The add phase enumerates free cells next
//! to leaves plus every occupied tree cell, trials each alphabet symbol
//! there (cutting and re-shifting the resident subtree when the cell is
//! occupied), and adopts the trial with the best strictly positive
//! benefit difference, looping while the rental budget lasts. The
//! remove phase only runs when nothing could be added: it trials
//! deleting each rented cell — either leaving a hole or shifting the
//! neighbor below / to the left into the vacated slot — and adopts the
//! best strict improvement, refunding the symbol's cost.
//!
//! Trials run on board clones; only the winning symbols-only board is
//! copied back, links recomputed, and the rented registry updated.

use crate::board::Board;
use core_grid::{float_eq, Direction, Pos};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// The best trial seen so far during one elastic phase.
struct ElasticTrial {
    benefit_diff: f32,
    symbol: char,
    pos: Pos,
    board: Board,
}

impl ElasticTrial {
    fn consider(
        slot: &mut Option<ElasticTrial>,
        benefit_diff: f32,
        symbol: char,
        pos: Pos,
        board: &Board,
    ) {
        if benefit_diff <= 0.0 || float_eq(benefit_diff, 0.0) {
            return;
        }
        let better = slot
            .as_ref()
            .is_none_or(|best| benefit_diff > best.benefit_diff);
        if better {
            *slot = Some(ElasticTrial {
                benefit_diff,
                symbol,
                pos,
                board: board.clone(),
            });
        }
    }
}

impl Board {
    /// Run the elastic model at the root: add resources while the
    /// benefit improves, otherwise try to give rented ones back.
    /// Returns true iff the board changed.
    pub fn analyze_elastic_model(&mut self) -> bool {
        if !self.config().elastic_enabled {
            return false;
        }
        let mut any_added = false;
        while self.num_available_resources_to_rent() > 0 {
            if self.check_add_resources() {
                any_added = true;
            } else {
                break;
            }
        }
        let mut any_removed = false;
        if !any_added {
            while !self.rented_resources.is_empty() {
                if self.check_remove_resources() {
                    any_removed = true;
                } else {
                    break;
                }
            }
        }
        any_added || any_removed
    }

    /// Free cells adjacent to leaves plus every occupied tree cell,
    /// deduplicated, in DFS order.
    fn gather_new_resource_positions(&self) -> Vec<Pos> {
        let mut seen: BTreeSet<Pos> = BTreeSet::new();
        let mut out = Vec::new();
        for pos in self.collect_tree_nodes() {
            if self.is_leaf(pos) {
                for &dir in self.topology().child_dirs() {
                    let probe = pos.step(dir);
                    if self.is_free(probe) && seen.insert(probe) {
                        out.push(probe);
                    }
                }
            } else if seen.insert(pos) {
                out.push(pos);
            }
        }
        out
    }

    /// Simulated benefit of a board state: average flow times the value
    /// of one flow unit.
    fn simulated_benefit(&self) -> f32 {
        let mut probe = self.clone();
        probe.simulate_data_flow(self.config().estimation_ticks, false);
        probe.last_simulation_avg_flow_per_unit() * self.config().benefit_per_unit_of_flow
    }

    fn check_add_resources(&mut self) -> bool {
        let candidates = self.gather_new_resource_positions();
        let old_benefit = self.simulated_benefit();
        let alphabet = self.config().alphabet.clone();
        let mut best: Option<ElasticTrial> = None;

        for &symbol in &alphabet {
            let cost = self.config().cost_of(symbol);
            for &pos in &candidates {
                if self.is_free(pos) {
                    let mut trial = self.clone();
                    if trial.set_symbol(pos, symbol).is_err() {
                        continue;
                    }
                    if !trial.is_language_compliant(Some(pos.row), Some(pos.col)) {
                        continue;
                    }
                    trial.discover_structure();
                    let diff = trial.simulated_benefit() - cost - old_benefit;
                    debug!(target: "board.elastic", %pos, symbol = %symbol, diff, "add_trial");
                    ElasticTrial::consider(&mut best, diff, symbol, pos, &trial);
                } else {
                    // Occupied: displace the resident subtree, put the
                    // new symbol here, and try re-pasting the cut one
                    // step down or one step left.
                    let mut base = self.clone();
                    let Ok(subtree) = base.cut_subtree(pos) else {
                        continue;
                    };
                    if base.set_symbol(pos, symbol).is_err() {
                        continue;
                    }
                    if !base.is_language_compliant(Some(pos.row), Some(pos.col)) {
                        continue;
                    }
                    for dir in [Direction::Down, Direction::Left] {
                        let mut trial = base.clone();
                        if !trial.try_apply_subtree(pos.step(dir), &subtree, true, true) {
                            continue;
                        }
                        let diff = trial.simulated_benefit() - cost - old_benefit;
                        debug!(target: "board.elastic", %pos, symbol = %symbol, shift = %dir, diff, "add_shift_trial");
                        ElasticTrial::consider(&mut best, diff, symbol, pos, &trial);
                    }
                }
            }
        }

        match best {
            Some(trial) => {
                self.copy_just_cells(&trial.board);
                self.add_rented_resource(trial.symbol, trial.pos);
                self.discover_structure();
                info!(
                    target: "board.elastic",
                    pos = %trial.pos,
                    symbol = %trial.symbol,
                    benefit_diff = trial.benefit_diff,
                    "resource_rented"
                );
                true
            }
            None => false,
        }
    }

    fn check_remove_resources(&mut self) -> bool {
        let old_benefit = self.simulated_benefit();
        let rented: Vec<_> = self.rented_resources.iter().copied().collect();
        let mut best: Option<ElasticTrial> = None;

        for resource in rented {
            let pos = resource.pos;
            let refund = self.config().cost_of(resource.symbol);
            let shift_candidates: Vec<Pos> = [pos.step(Direction::Down), pos.step(Direction::Left)]
                .into_iter()
                .filter(|&p| self.is_occupied(p))
                .collect();

            if shift_candidates.is_empty() {
                // Leave the deletion as a hole.
                let mut trial = self.clone();
                if trial.set_empty(pos).is_err() {
                    continue;
                }
                trial.discover_structure();
                let diff = trial.simulated_benefit() + refund - old_benefit;
                debug!(target: "board.elastic", %pos, diff, "remove_hole_trial");
                ElasticTrial::consider(&mut best, diff, resource.symbol, pos, &trial);
            } else {
                for neighbor in shift_candidates {
                    let mut trial = self.clone();
                    if trial.set_empty(pos).is_err() {
                        continue;
                    }
                    trial.discover_structure();
                    let Ok(subtree) = trial.cut_subtree(neighbor) else {
                        continue;
                    };
                    if !trial.try_apply_subtree(pos, &subtree, true, true) {
                        continue;
                    }
                    let diff = trial.simulated_benefit() + refund - old_benefit;
                    debug!(target: "board.elastic", %pos, from = %neighbor, diff, "remove_shift_trial");
                    ElasticTrial::consider(&mut best, diff, resource.symbol, pos, &trial);
                }
            }
        }

        match best {
            Some(trial) => {
                self.remove_rented_resource(trial.pos);
                self.copy_just_cells(&trial.board);
                self.discover_structure();
                info!(
                    target: "board.elastic",
                    pos = %trial.pos,
                    benefit_diff = trial.benefit_diff,
                    "resource_returned"
                );
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::source::{SourceInfo, SourceType};
    use crate::test_support::board_with_config;
    use core_config::{ConfigFile, SimConfig};
    use core_grid::Pos;

    fn elastic_config(rows: i32, cols: i32, cost_4: f32) -> SimConfig {
        let mut file = ConfigFile::default();
        file.board.rows = rows;
        file.board.cols = cols;
        file.elastic.enabled = true;
        let mut cfg = SimConfig::from_file(file);
        cfg.set_cost_of('4', cost_4);
        cfg
    }

    #[test]
    fn disabled_model_is_a_no_op() {
        let mut file = ConfigFile::default();
        file.board.rows = 2;
        file.board.cols = 4;
        let cfg = SimConfig::from_file(file);
        let mut board = board_with_config(&["**42", "****"], Pos::new(0, 3), cfg);
        assert!(!board.analyze_elastic_model());
    }

    #[test]
    fn add_phase_rents_a_cell_when_benefit_covers_cost() {
        // Cheap '4': extending the row arm toward the strong source
        // raises flow by more than the rental price.
        let cfg = elastic_config(3, 6, 0.1);
        let mut board = board_with_config(
            &[
                "***442", //
                "******", //
                "******",
            ],
            Pos::new(0, 5),
            cfg,
        );
        board
            .insert_source(
                Pos::new(1, 1),
                SourceInfo::new(80.0, SourceType::Generic, "default"),
            )
            .unwrap();
        let changed = board.analyze_elastic_model();
        if changed {
            assert!(!board.rented_resources.is_empty());
            assert!(board.is_language_compliant(None, None));
            for r in &board.rented_resources {
                assert!(board.cell(r.pos).rented);
            }
        }
    }

    #[test]
    fn expensive_resources_are_rejected() {
        // The same layout priced out: no rental can pay for itself.
        let mut cfg = elastic_config(3, 6, 1000.0);
        for s in ['2', '7', 'e'] {
            cfg.set_cost_of(s, 1000.0);
        }
        let mut board = board_with_config(
            &[
                "***442", //
                "******", //
                "******",
            ],
            Pos::new(0, 5),
            cfg,
        );
        board
            .insert_source(
                Pos::new(1, 1),
                SourceInfo::new(80.0, SourceType::Generic, "default"),
            )
            .unwrap();
        assert!(!board.analyze_elastic_model());
        assert!(board.rented_resources.is_empty());
    }
}
