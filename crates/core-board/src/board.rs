//! The board: cell arena, sources, tree discovery, and the subtree
//! cut/paste machinery.
//!
//! Mutation discipline:
//! * Symbols are written through `set_symbol` / `set_empty`; callers
//!   that bypass the higher-level operations must re-run
//!   `discover_structure` before links are read again.
//! * `cut_subtree` is purely topological (no language consultation) and
//!   leaves the remaining board's links valid without rediscovery.
//! * `try_apply_subtree` is transactional: on any failure the board is
//!   restored to the pre-call state before returning.
//!
//! Invariants after every public call: links mutually consistent (a
//! child's `prev[d]` names the parent whose `next[d]` names the child),
//! `distance_to_root` equals the prev-path length or `-1`, and every
//! occupied row/column satisfies the language (callers only commit
//! language-checked writes).

use crate::cell::{Cell, CellType};
use crate::error::{SimError, SimResult};
use crate::flow::FlowStats;
use crate::source::{RentedResource, SourceInfo};
use crate::subtree::{OffsetAndSymbol, SubtreeInfo};
use crate::topology::TreeTopology;
use core_config::SimConfig;
use core_grid::{Direction, GridDims, Pos, EMPTY_SYMBOL};
use core_lang::{Axis, LanguageOracle};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::trace;

/// One candidate translation for a cut subtree, scored by simulating a
/// flow tick on the resulting board.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOption {
    /// The cell whose subtree was cut.
    pub subroot: Pos,
    /// Translation target for the subroot.
    pub target: Pos,
    /// Projected average flow per tick after the move.
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct Board {
    dims: GridDims,
    cells: Vec<Cell>,
    root: Option<Pos>,
    pub sources: BTreeMap<Pos, SourceInfo>,
    pub rented_resources: BTreeSet<RentedResource>,
    topology: TreeTopology,
    oracle: LanguageOracle,
    config: Arc<SimConfig>,
    pub(crate) flow_stats: FlowStats,
    pub(crate) ticks_until_power_update: u32,
}

impl Board {
    pub fn new(config: Arc<SimConfig>, topology: TreeTopology) -> Self {
        let dims = GridDims::new(config.rows, config.cols);
        let cells = (0..dims.cell_count())
            .map(|_| Cell::new(config.max_flow_per_cell))
            .collect();
        Self {
            dims,
            cells,
            root: None,
            sources: BTreeMap::new(),
            rented_resources: BTreeSet::new(),
            topology,
            oracle: LanguageOracle::new(),
            config: Arc::clone(&config),
            flow_stats: FlowStats::default(),
            ticks_until_power_update: config.source_power_update_ticks,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn topology(&self) -> TreeTopology {
        self.topology
    }

    #[inline]
    pub fn is_valid(&self, pos: Pos) -> bool {
        self.dims.contains(pos)
    }

    pub fn ensure_valid(&self, pos: Pos) -> SimResult<()> {
        if self.is_valid(pos) {
            Ok(())
        } else {
            Err(SimError::InvalidPosition(pos))
        }
    }

    #[inline]
    pub fn cell(&self, pos: Pos) -> &Cell {
        &self.cells[self.dims.index(pos)]
    }

    #[inline]
    pub fn cell_mut(&mut self, pos: Pos) -> &mut Cell {
        let idx = self.dims.index(pos);
        &mut self.cells[idx]
    }

    /// True for a valid, unoccupied position.
    pub fn is_free(&self, pos: Pos) -> bool {
        self.is_valid(pos) && self.cell(pos).is_empty()
    }

    pub fn is_occupied(&self, pos: Pos) -> bool {
        self.is_valid(pos) && !self.cell(pos).is_empty()
    }

    pub fn root(&self) -> Option<Pos> {
        self.root
    }

    pub fn set_root(&mut self, pos: Pos) -> SimResult<()> {
        self.ensure_valid(pos)?;
        self.root = Some(pos);
        Ok(())
    }

    pub fn set_symbol(&mut self, pos: Pos, symbol: char) -> SimResult<()> {
        self.ensure_valid(pos)?;
        self.cell_mut(pos).set_symbol(symbol);
        Ok(())
    }

    pub fn set_empty(&mut self, pos: Pos) -> SimResult<()> {
        self.ensure_valid(pos)?;
        self.cell_mut(pos).set_empty();
        Ok(())
    }

    pub fn count_nodes(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    pub fn row_symbols(&self, row: i32) -> Vec<char> {
        (0..self.dims.cols)
            .map(|c| self.cell(Pos::new(row, c)).symbol())
            .collect()
    }

    pub fn col_symbols(&self, col: i32) -> Vec<char> {
        (0..self.dims.rows)
            .map(|r| self.cell(Pos::new(r, col)).symbol())
            .collect()
    }

    /// Language compliance over the whole board, or restricted to one
    /// row and/or one column when the caller knows what was touched.
    pub fn is_language_compliant(&self, only_row: Option<i32>, only_col: Option<i32>) -> bool {
        let rows: Vec<i32> = match only_row {
            Some(r) => vec![r],
            None if only_col.is_some() => vec![],
            None => (0..self.dims.rows).collect(),
        };
        let cols: Vec<i32> = match only_col {
            Some(c) => vec![c],
            None if only_row.is_some() => vec![],
            None => (0..self.dims.cols).collect(),
        };
        rows.iter()
            .all(|&r| self.oracle.line_compliant(Axis::Row, &self.row_symbols(r)))
            && cols
                .iter()
                .all(|&c| self.oracle.line_compliant(Axis::Col, &self.col_symbols(c)))
    }

    /// Children of `pos` in deterministic traversal order.
    pub fn children_of(&self, pos: Pos) -> Vec<Pos> {
        self.topology
            .child_dirs()
            .iter()
            .filter_map(|&d| self.cell(pos).next(d))
            .collect()
    }

    pub fn is_leaf(&self, pos: Pos) -> bool {
        self.is_occupied(pos) && !self.cell(pos).has_children()
    }

    /// All tree nodes reachable from the root, in DFS order.
    pub fn collect_tree_nodes(&self) -> Vec<Pos> {
        let mut out = Vec::new();
        if let Some(root) = self.root {
            if self.is_occupied(root) {
                self.collect_from(root, &mut out);
            }
        }
        out
    }

    fn collect_from(&self, pos: Pos, out: &mut Vec<Pos>) {
        out.push(pos);
        for child in self.children_of(pos) {
            self.collect_from(child, out);
        }
    }

    /// Leaves of the tree, in DFS order.
    pub fn gather_leaf_nodes(&self) -> Vec<Pos> {
        self.collect_tree_nodes()
            .into_iter()
            .filter(|&p| self.is_leaf(p))
            .collect()
    }

    // ------------------------------------------------------------------
    // Link discovery

    /// Recompute every occupied cell's `prev`/`next` links and
    /// `distance_to_root` from the root outward. Must be called after
    /// any symbol mutation that bypassed the transactional operations.
    pub fn discover_structure(&mut self) {
        let directional = self.topology == TreeTopology::Directional;
        for cell in &mut self.cells {
            cell.reset_links();
            cell.distance_to_root = -1;
            if directional {
                cell.cell_type = CellType::Plain;
            }
        }
        let Some(root) = self.root else {
            return;
        };
        if !self.is_occupied(root) {
            return;
        }
        // Classification first: it only reads symbols, and the link walk
        // below must not cross from the interior back onto the membrane.
        if self.topology == TreeTopology::Directional {
            self.classify_directional(root);
        }
        self.discover_from(root, 0);
    }

    fn discover_from(&mut self, pos: Pos, depth: i32) {
        self.cell_mut(pos).distance_to_root = depth;
        for &dir in self.topology.child_dirs() {
            let child = pos.step(dir);
            if !self.is_occupied(child) {
                continue;
            }
            // Already linked or the root itself: the walk found it first
            // along another edge; a tree keeps the first parent.
            if self.cell(child).distance_to_root != -1 {
                continue;
            }
            if !self.may_link(pos, child) {
                continue;
            }
            self.cell_mut(child).set_prev(dir, Some(pos));
            self.cell_mut(pos).set_next(dir, Some(child));
            self.discover_from(child, depth + 1);
        }
    }

    /// Directional regime: membrane cells may parent any region, but
    /// interior and exterior subtrees stay within their own region, so
    /// flow and donation walks never tunnel through the membrane.
    fn may_link(&self, parent: Pos, child: Pos) -> bool {
        if self.topology != TreeTopology::Directional {
            return true;
        }
        match self.cell(parent).cell_type {
            CellType::Membrane => true,
            ty => self.cell(child).cell_type == ty,
        }
    }

    // ------------------------------------------------------------------
    // Directional-regime classification

    /// Classify cells into membrane / interior / exterior. The membrane
    /// is the ring traced from the root by reading each symbol as
    /// motion; remaining occupied cells are classified by ray parity.
    fn classify_directional(&mut self, root: Pos) {
        let ring = self.trace_membrane(root);
        if ring.is_empty() {
            // No closed ring: everything occupied counts as exterior.
            for pos in self.dims.iter() {
                if self.is_occupied(pos) {
                    self.cell_mut(pos).cell_type = CellType::Exterior;
                }
            }
            return;
        }
        let ring_set: BTreeSet<Pos> = ring.iter().copied().collect();
        for &pos in &ring {
            self.cell_mut(pos).cell_type = CellType::Membrane;
        }
        for pos in self.dims.iter() {
            if !self.is_occupied(pos) || ring_set.contains(&pos) {
                continue;
            }
            let ty = self.decide_cell_type_inner(pos, Direction::Up, &ring_set);
            self.cell_mut(pos).cell_type = ty;
        }
    }

    /// Follow symbol motion from the membrane start until the walk
    /// returns to it; a walk that leaves the tree yields no ring.
    fn trace_membrane(&self, start: Pos) -> Vec<Pos> {
        let mut ring = vec![start];
        let mut current = start;
        loop {
            let Some(dir) = Direction::from_symbol(self.cell(current).symbol()) else {
                return Vec::new();
            };
            let next = current.step(dir);
            if next == start {
                return ring;
            }
            if !self.is_occupied(next) || ring.len() > self.dims.cell_count() {
                return Vec::new();
            }
            ring.push(next);
            current = next;
        }
    }

    /// Decide whether the cell at `start` lies inside or outside the
    /// membrane by casting a ray along `dir` and counting membrane
    /// crossings: odd parity is interior.
    pub fn decide_cell_type(&self, start: Pos, dir: Direction) -> CellType {
        let Some(root) = self.root else {
            return CellType::Plain;
        };
        let ring: BTreeSet<Pos> = self.trace_membrane(root).into_iter().collect();
        if ring.contains(&start) {
            return CellType::Membrane;
        }
        self.decide_cell_type_inner(start, dir, &ring)
    }

    fn decide_cell_type_inner(
        &self,
        start: Pos,
        dir: Direction,
        ring: &BTreeSet<Pos>,
    ) -> CellType {
        let mut crossings = 0;
        let mut cursor = start.step(dir);
        while self.is_valid(cursor) {
            if ring.contains(&cursor) {
                crossings += 1;
            }
            cursor = cursor.step(dir);
        }
        if crossings % 2 == 1 {
            CellType::Interior
        } else {
            CellType::Exterior
        }
    }

    // ------------------------------------------------------------------
    // Subtree cut & paste

    /// Detach the subtree rooted at `pos`, recording each included cell
    /// as an offset from the subroot. Purely topological: the language
    /// oracle is not consulted and the remaining links stay valid.
    pub fn cut_subtree(&mut self, pos: Pos) -> SimResult<SubtreeInfo> {
        self.ensure_valid(pos)?;
        if self.cell(pos).is_empty() {
            return Err(SimError::InvalidPosition(pos));
        }

        // Unhook from the parent before the cells forget their links.
        if let Some((dir, parent)) = self.cell(pos).parent() {
            self.cell_mut(parent).set_next(dir, None);
        }

        let mut members = Vec::new();
        self.collect_from(pos, &mut members);
        let mut subtree = SubtreeInfo::new();
        for member in &members {
            let cell = self.cell(*member);
            subtree.add(OffsetAndSymbol {
                row_off: member.row - pos.row,
                col_off: member.col - pos.col,
                symbol: cell.symbol(),
                rented: cell.rented,
            });
        }
        for member in members {
            self.cell_mut(member).set_empty();
        }
        trace!(target: "board.cut", subroot = %pos, cells = subtree.len(), "subtree_cut");
        Ok(subtree)
    }

    /// True iff every offset of `subtree`, translated to `target`, lands
    /// on a valid free cell.
    pub fn can_paste_at(&self, target: Pos, subtree: &SubtreeInfo) -> bool {
        subtree.positions_at(target).all(|p| self.is_free(p))
    }

    /// Write the subtree's symbols at the translated positions.
    ///
    /// With `check_positions`, `can_paste_at` gates the write; with
    /// `check_language`, every touched row and column is re-validated
    /// after writing. Any failure rolls the board back to the pre-call
    /// state and returns `false`. Success refreshes link discovery.
    pub fn try_apply_subtree(
        &mut self,
        target: Pos,
        subtree: &SubtreeInfo,
        check_positions: bool,
        check_language: bool,
    ) -> bool {
        if check_positions && !self.can_paste_at(target, subtree) {
            return false;
        }

        let mut written: Vec<Pos> = Vec::with_capacity(subtree.len());
        for entry in subtree.iter() {
            let pos = target.translated(entry.row_off, entry.col_off);
            if !self.is_free(pos) {
                for undo in written {
                    self.cell_mut(undo).set_empty();
                }
                return false;
            }
            let cell = self.cell_mut(pos);
            cell.set_symbol(entry.symbol);
            cell.rented = entry.rented;
            written.push(pos);
        }

        if check_language {
            let rows: BTreeSet<i32> = written.iter().map(|p| p.row).collect();
            let cols: BTreeSet<i32> = written.iter().map(|p| p.col).collect();
            let compliant = rows
                .iter()
                .all(|&r| self.is_language_compliant(Some(r), None))
                && cols
                    .iter()
                    .all(|&c| self.is_language_compliant(None, Some(c)));
            if !compliant {
                for undo in written {
                    self.cell_mut(undo).set_empty();
                }
                return false;
            }
        }

        self.discover_structure();
        trace!(target: "board.paste", target = %target, cells = subtree.len(), "subtree_pasted");
        true
    }

    /// Enumerate candidate translation targets for a cut subtree and
    /// score each by simulating flow on the resulting board. Returns
    /// the candidates plus the index of the best option strictly above
    /// `baseline` (ties resolved to the lowest `(row, col)` target by
    /// the row-major scan).
    ///
    /// `self` must be the board *without* the subtree.
    pub fn evaluate_positions_to_move(
        &self,
        subroot: Pos,
        subtree: &SubtreeInfo,
        baseline: f32,
    ) -> (Vec<MoveOption>, Option<usize>) {
        let mut options = Vec::new();
        let mut best: Option<usize> = None;
        for target in self.dims.iter() {
            if target == subroot {
                continue; // the no-op placement
            }
            if !self.can_paste_at(target, subtree) {
                continue;
            }
            let mut trial = self.clone();
            if !trial.try_apply_subtree(target, subtree, false, true) {
                continue;
            }
            trial.simulate_data_flow(self.config.estimation_ticks, false);
            let score = trial.last_simulation_avg_flow_per_unit();
            options.push(MoveOption {
                subroot,
                target,
                score,
            });
            let idx = options.len() - 1;
            let improves = score > baseline && !core_grid::float_eq(score, baseline);
            if improves && best.is_none_or(|b| score > options[b].score) {
                best = Some(idx);
            }
        }
        (options, best)
    }

    // ------------------------------------------------------------------
    // Sources

    pub fn insert_source(&mut self, pos: Pos, info: SourceInfo) -> SimResult<()> {
        self.ensure_valid(pos)?;
        if self.sources.contains_key(&pos) {
            return Err(SimError::DuplicateSource(pos));
        }
        self.sources.insert(pos, info);
        Ok(())
    }

    pub fn take_source(&mut self, pos: Pos) -> SimResult<SourceInfo> {
        self.sources
            .remove(&pos)
            .ok_or(SimError::InvalidPosition(pos))
    }

    pub fn source(&self, pos: Pos) -> SimResult<&SourceInfo> {
        self.sources.get(&pos).ok_or(SimError::InvalidPosition(pos))
    }

    pub fn source_mut(&mut self, pos: Pos) -> SimResult<&mut SourceInfo> {
        self.sources
            .get_mut(&pos)
            .ok_or(SimError::InvalidPosition(pos))
    }

    // ------------------------------------------------------------------
    // Rented resources

    pub fn add_rented_resource(&mut self, symbol: char, pos: Pos) {
        self.rented_resources.insert(RentedResource { pos, symbol });
        if self.is_valid(pos) {
            self.cell_mut(pos).rented = true;
        }
    }

    pub fn remove_rented_resource(&mut self, pos: Pos) -> bool {
        // Eq/Ord key by position; the symbol is irrelevant for lookup.
        self.rented_resources
            .remove(&RentedResource { pos, symbol: EMPTY_SYMBOL })
    }

    pub fn num_available_resources_to_rent(&self) -> usize {
        self.config
            .max_resources_to_rent
            .saturating_sub(self.rented_resources.len())
    }

    // ------------------------------------------------------------------

    /// Copy symbols, emptiness and rented flags from `other`, leaving
    /// sources, statistics and configuration untouched. Links must be
    /// rebuilt by the caller (`discover_structure`).
    pub fn copy_just_cells(&mut self, other: &Board) {
        debug_assert_eq!(self.dims, other.dims, "mismatched board dimensions");
        for pos in self.dims.iter() {
            let src = other.cell(pos);
            let dst = self.cell_mut(pos);
            if src.is_empty() {
                dst.set_empty();
            } else {
                let symbol = src.symbol();
                let rented = src.rented;
                dst.set_empty();
                dst.set_symbol(symbol);
                dst.rented = rented;
            }
        }
    }

    /// Render the board as the line-oriented file format: one row per
    /// line, `*` for empty cells.
    pub fn print_board(&self, out: &mut impl Write) -> io::Result<()> {
        for row in 0..self.dims.rows {
            let line: String = self.row_symbols(row).into_iter().collect();
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}
