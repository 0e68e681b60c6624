//! Per-tick data-flow simulation.
//!
//! A tick is one deterministic post-order walk anchored at the root:
//! children simulate before their parent, then the parent captures. In
//! the left/down regime every leaf captures from the environment and
//! every internal cell pulls from its children proportionally to their
//! buffered amounts, capped by its own remaining capacity. In the
//! directional regime only exterior cells capture; membrane cells relay
//! what their exterior children buffered, and at the end of the tick the
//! root donates the collected flow inward to the interior cells.
//!
//! Whatever reaches the root in a tick is recorded into the statistics
//! window and drained, so the window average is "delivered flow per
//! tick". A cell whose parent changed during reorganization skips
//! capture for a configured number of ticks.

use crate::board::Board;
use crate::cell::CellType;
use crate::topology::TreeTopology;
use core_grid::{manhattan, Pos};
use std::collections::BTreeMap;
use std::collections::VecDeque;
use tracing::trace;

/// Number of per-tick flow records retained for averaging.
pub const FLOW_STATS_WINDOW: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct FlowStats {
    window: VecDeque<f32>,
}

impl FlowStats {
    pub fn record(&mut self, flow: f32) {
        if self.window.len() == FLOW_STATS_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(flow);
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn average(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f32>() / self.window.len() as f32
    }
}

/// Environment values captured by leaves during one simulation: filled
/// once per simulation so candidate boards are scored against the same
/// environment.
#[derive(Debug, Clone, Default)]
pub struct SimulationContext {
    leaf_capture: BTreeMap<Pos, f32>,
}

impl SimulationContext {
    pub fn leaf_capture_value(&self, pos: Pos) -> f32 {
        self.leaf_capture.get(&pos).copied().unwrap_or(0.0)
    }
}

impl Board {
    /// Environment contribution collected by a leaf from one source:
    /// the source's power decayed by the remapped manhattan distance
    /// (which is never zero).
    pub fn compute_score_for_leaf_and_source(&self, leaf: Pos, src_pos: Pos, power: f32) -> f32 {
        power / manhattan(leaf, src_pos) as f32
    }

    /// Precompute each leaf's per-tick environment capture, capped at
    /// the per-cell flow limit.
    pub fn fill_simulation_context(&self) -> SimulationContext {
        let mut ctx = SimulationContext::default();
        let cap = self.config().max_flow_per_cell;
        for leaf in self.gather_leaf_nodes() {
            let mut value = 0.0;
            for (&src_pos, info) in &self.sources {
                value += self.compute_score_for_leaf_and_source(leaf, src_pos, info.power());
            }
            ctx.leaf_capture.insert(leaf, value.min(cap));
        }
        ctx
    }

    /// Run `ticks` flow ticks. `real_tick` additionally advances the
    /// scheduled source-power drift; candidate evaluations pass `false`
    /// so scoring has no side effects on the environment model.
    pub fn simulate_data_flow(&mut self, ticks: u32, real_tick: bool) {
        let ctx = self.fill_simulation_context();
        self.flow_stats.reset();
        for _ in 0..ticks {
            if real_tick {
                self.advance_power_schedule();
            }
            match self.topology() {
                TreeTopology::LeftDown => self.tick_left_down(&ctx),
                TreeTopology::Directional => self.tick_directional(&ctx),
            }
        }
    }

    /// Mean delivered flow per tick over the last simulation window.
    pub fn last_simulation_avg_flow_per_unit(&self) -> f32 {
        self.flow_stats.average()
    }

    fn root_if_occupied(&self) -> Option<Pos> {
        self.root().filter(|&r| self.is_occupied(r))
    }

    fn tick_left_down(&mut self, ctx: &SimulationContext) {
        let Some(root) = self.root_if_occupied() else {
            self.flow_stats.record(0.0);
            return;
        };
        self.tick_cell(root, ctx, None);
        let delivered = self.cell(root).buffered.value();
        self.flow_stats.record(delivered);
        self.cell_mut(root).buffered.subtract(delivered);
        trace!(target: "board.flow", delivered, "tick");
    }

    fn tick_directional(&mut self, ctx: &SimulationContext) {
        let Some(root) = self.root_if_occupied() else {
            self.flow_stats.record(0.0);
            return;
        };
        // Capture pass: membrane and exterior cells only; interior
        // cells receive by donation below.
        self.tick_cell(root, ctx, Some(CellType::Exterior));
        let collected = self.cell(root).buffered.value();

        // Donation pass: walk the membrane and push the collected flow
        // inward through every interior child hanging off it.
        let mut remaining = collected;
        let mut donated = 0.0;
        for membrane in self.collect_tree_nodes() {
            if self.cell(membrane).cell_type != CellType::Membrane {
                continue;
            }
            for child in self.children_of(membrane) {
                if self.cell(child).cell_type != CellType::Interior {
                    continue;
                }
                if remaining <= 0.0 {
                    break;
                }
                let used = self.donate_flow(child, remaining);
                remaining -= used;
                donated += used;
            }
        }

        self.flow_stats.record(collected);
        self.cell_mut(root).buffered.subtract(collected);
        // Interior buffers model per-tick bandwidth, not storage: they
        // reset so the next tick starts unconstrained.
        for pos in self.collect_tree_nodes() {
            if self.cell(pos).cell_type == CellType::Interior {
                self.cell_mut(pos).buffered.reset();
            }
        }
        trace!(target: "board.flow", collected, donated, "tick_directional");
    }

    /// Post-order walk: simulate children, then capture. Returns the
    /// energy consumed by the subtree during this tick.
    fn tick_cell(&mut self, pos: Pos, ctx: &SimulationContext, capture_type: Option<CellType>) -> f32 {
        let mut energy = 0.0;
        for child in self.children_of(pos) {
            if capture_type.is_some() && self.cell(child).cell_type == CellType::Interior {
                continue;
            }
            energy += self.tick_cell(child, ctx, capture_type);
        }
        energy += self.config().cost_of(self.cell(pos).symbol());
        self.capture_data_flow(pos, ctx, capture_type);
        self.cell_mut(pos).last_energy_consumed = energy;
        energy
    }

    fn capture_data_flow(&mut self, pos: Pos, ctx: &SimulationContext, capture_type: Option<CellType>) {
        if self.cell(pos).restructure_delay > 0 {
            self.cell_mut(pos).restructure_delay -= 1;
            return;
        }
        if let Some(ty) = capture_type {
            let cell_type = self.cell(pos).cell_type;
            // Membrane cells relay; only the requested type captures
            // from the environment.
            if cell_type != ty && cell_type != CellType::Membrane {
                return;
            }
        }
        if self.is_leaf(pos) {
            // Environment capture is the leaves' job — and in the
            // directional regime, exclusively the exterior leaves'.
            if let Some(ty) = capture_type {
                if self.cell(pos).cell_type != ty {
                    return;
                }
            }
            let remaining = self.cell(pos).buffered.remaining();
            let take = ctx.leaf_capture_value(pos).min(remaining);
            self.cell_mut(pos).buffered.add(take);
        } else {
            self.capture_from_children(pos, capture_type);
        }
    }

    /// Pull from children proportionally to their buffered amounts,
    /// capped by this cell's remaining capacity.
    fn capture_from_children(&mut self, pos: Pos, capture_type: Option<CellType>) {
        let remaining = self.cell(pos).buffered.remaining();
        let children: Vec<Pos> = self
            .children_of(pos)
            .into_iter()
            .filter(|&c| {
                capture_type.is_none() || self.cell(c).cell_type != CellType::Interior
            })
            .collect();
        let mut amounts: Vec<f32> = children
            .iter()
            .map(|&c| self.cell(c).buffered.value())
            .collect();
        let total: f32 = amounts.iter().sum();
        if total <= 0.0 {
            return;
        }
        if total > remaining {
            let ratio = remaining / total;
            for a in &mut amounts {
                *a *= ratio;
            }
        }
        for (child, take) in children.into_iter().zip(amounts) {
            self.cell_mut(child).buffered.subtract(take);
            self.cell_mut(pos).buffered.add(take);
        }
    }

    /// Push donated flow inward: an interior leaf consumes what it can,
    /// an interior branch hands the budget to its children in traversal
    /// order. Returns the amount actually consumed.
    pub fn donate_flow(&mut self, pos: Pos, max_flow: f32) -> f32 {
        debug_assert_eq!(
            self.cell(pos).cell_type,
            CellType::Interior,
            "donation target must be interior"
        );
        let mut budget = self.cell(pos).buffered.remaining().min(max_flow);
        let children = self.children_of(pos);
        if children.is_empty() {
            self.cell_mut(pos).buffered.add(budget);
            return budget;
        }
        let mut consumed = 0.0;
        for child in children {
            if budget <= 0.0 {
                break;
            }
            let used = self.donate_flow(child, budget);
            self.cell_mut(pos).buffered.add(used);
            budget -= used;
            consumed += used;
        }
        consumed
    }

    /// Scheduled source-power adjustment: when the countdown elapses,
    /// each source's current power snaps to its target, floored at the
    /// power already committed to connections.
    fn advance_power_schedule(&mut self) {
        self.ticks_until_power_update = self.ticks_until_power_update.saturating_sub(1);
        if self.ticks_until_power_update > 0 {
            return;
        }
        self.ticks_until_power_update = self.config().source_power_update_ticks;
        for info in self.sources.values_mut() {
            let floor = info.used_power();
            let target = info.target().max(floor);
            info.set_current_power(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceInfo, SourceType};
    use crate::test_support::board_from_rows;

    #[test]
    fn stats_window_is_bounded_and_averaged() {
        let mut stats = FlowStats::default();
        for i in 0..(FLOW_STATS_WINDOW + 5) {
            stats.record(i as f32);
        }
        // Only the last FLOW_STATS_WINDOW records remain: 5..=14.
        assert_eq!(stats.average(), (5..15).sum::<i32>() as f32 / 10.0);
        stats.reset();
        assert_eq!(stats.average(), 0.0);
    }

    #[test]
    fn empty_board_ticks_record_zero_flow() {
        let mut board = board_from_rows(&["****"], Pos::new(0, 3));
        board.simulate_data_flow(3, false);
        assert_eq!(board.last_simulation_avg_flow_per_unit(), 0.0);
    }

    #[test]
    fn leaf_capture_flows_to_the_root_over_ticks() {
        let mut board = board_from_rows(
            &[
                "**42", //
                "****",
            ],
            Pos::new(0, 3),
        );
        // A generic source right next to the leaf at (0,2).
        board
            .insert_source(
                Pos::new(1, 2),
                SourceInfo::new(10.0, SourceType::Generic, "default"),
            )
            .unwrap();
        board.simulate_data_flow(4, false);
        // The post-order walk moves freshly captured data the whole way
        // up within a tick, so every tick delivers.
        assert!(board.last_simulation_avg_flow_per_unit() > 0.0);
        // Buffers never left their bounds along the way.
        for pos in board.dims().iter() {
            let v = board.cell(pos).buffered.value();
            assert!((0.0..=board.config().max_flow_per_cell).contains(&v));
        }
    }

    #[test]
    fn restructure_delay_suspends_capture() {
        let mut board = board_from_rows(&["**42"], Pos::new(0, 3));
        board
            .insert_source(
                Pos::new(0, 1),
                SourceInfo::new(10.0, SourceType::Generic, "default"),
            )
            .unwrap();
        board.cell_mut(Pos::new(0, 2)).restructure_delay = 2;
        board.simulate_data_flow(2, false);
        // The leaf skipped both ticks, so nothing reached the root.
        assert_eq!(board.last_simulation_avg_flow_per_unit(), 0.0);
        board.simulate_data_flow(2, false);
        assert!(board.last_simulation_avg_flow_per_unit() > 0.0);
    }

    #[test]
    fn proportional_pull_respects_parent_capacity() {
        // Root with two arms; the root can absorb everything its
        // children buffered, and buffers stay within bounds.
        let mut board = board_from_rows(
            &[
                "*442", //
                "*2**", //
            ],
            Pos::new(0, 3),
        );
        board
            .insert_source(
                Pos::new(1, 0),
                SourceInfo::new(50.0, SourceType::Generic, "default"),
            )
            .unwrap();
        board.simulate_data_flow(6, false);
        for pos in board.dims().iter() {
            let v = board.cell(pos).buffered.value();
            assert!(v >= 0.0 && v <= board.config().max_flow_per_cell);
        }
        assert!(board.last_simulation_avg_flow_per_unit() > 0.0);
    }

    #[test]
    fn directional_regime_classifies_and_donates() {
        use crate::cell::CellType;
        use crate::test_support::board_with_topology;
        use crate::topology::TreeTopology;
        use core_config::{ConfigFile, SimConfig};
        use core_grid::Direction;

        // A closed membrane ring around (1,1) with one exterior cell
        // hanging off at (0,3): each ring symbol points at the next
        // ring cell when read as motion.
        let mut file = ConfigFile::default();
        file.board.rows = 3;
        file.board.cols = 4;
        let board_rows = [
            "4472", //
            "2*7*", //
            "2ee*",
        ];
        let mut board = board_with_topology(
            &board_rows,
            Pos::new(0, 0),
            SimConfig::from_file(file),
            TreeTopology::Directional,
        );
        board.set_symbol(Pos::new(1, 1), '4').unwrap();
        board.discover_structure();

        assert_eq!(board.cell(Pos::new(0, 0)).cell_type, CellType::Membrane);
        assert_eq!(board.cell(Pos::new(2, 2)).cell_type, CellType::Membrane);
        assert_eq!(board.cell(Pos::new(1, 1)).cell_type, CellType::Interior);
        assert_eq!(board.cell(Pos::new(0, 3)).cell_type, CellType::Exterior);
        assert_eq!(board.decide_cell_type(Pos::new(1, 1), Direction::Up), CellType::Interior);
        assert_eq!(board.decide_cell_type(Pos::new(0, 3), Direction::Up), CellType::Exterior);
        // Only membrane cells can be roots in this regime.
        assert!(board.cell(Pos::new(0, 0)).is_root(true));

        // Supply next to the exterior cell; ticks must deliver flow to
        // the root and stay within buffer bounds.
        board
            .insert_source(
                Pos::new(1, 3),
                SourceInfo::new(30.0, SourceType::Generic, "default"),
            )
            .unwrap();
        board.simulate_data_flow(3, false);
        assert!(board.last_simulation_avg_flow_per_unit() > 0.0);
        for pos in board.dims().iter() {
            let v = board.cell(pos).buffered.value();
            assert!((0.0..=board.config().max_flow_per_cell).contains(&v));
        }
    }

    #[test]
    fn power_schedule_snaps_toward_target_on_real_ticks() {
        let mut board = board_from_rows(&["**42"], Pos::new(0, 3));
        let mut info = SourceInfo::new(10.0, SourceType::Generic, "default");
        info.set_power_target(20.0);
        board.insert_source(Pos::new(0, 0), info).unwrap();
        let update_every = board.config().source_power_update_ticks;
        board.simulate_data_flow(update_every, true);
        assert_eq!(board.source(Pos::new(0, 0)).unwrap().power(), 20.0);
    }
}
