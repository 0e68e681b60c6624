//! A single board position: symbol, links, buffered flow.
//!
//! Cells live in the board's row-major arena and are never reallocated;
//! only their symbol, links and buffer mutate. Links are `Option<Pos>`
//! pairs indexed by direction: `prev[d]` names the parent for which this
//! cell is the `d`-child (the parent sits one step against `d`), and
//! `next[d]` names the child one step along `d`. Link discovery keeps
//! the two arrays mutually consistent; everything else treats them as
//! read-only.

use core_grid::{Direction, Pos, EMPTY_SYMBOL};

/// Role a cell plays in the directional (4-way) regime. `Plain` is the
/// only value used by the left/down regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellType {
    #[default]
    Plain,
    Membrane,
    Interior,
    Exterior,
}

/// Per-cell flow buffer with a hard capacity bound. The value stays in
/// `[0, max]` at all times; callers compute transfer amounts against
/// `remaining()` before adding.
#[derive(Debug, Clone)]
pub struct BufferedFlow {
    value: f32,
    max: f32,
}

impl BufferedFlow {
    pub fn new(max: f32) -> Self {
        Self { value: 0.0, max }
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    #[inline]
    pub fn remaining(&self) -> f32 {
        let rem = self.max - self.value;
        debug_assert!(rem >= 0.0, "buffered value above capacity");
        rem.max(0.0)
    }

    pub fn add(&mut self, amount: f32) {
        debug_assert!(amount >= 0.0, "negative flow added to buffer");
        debug_assert!(
            self.value + amount <= self.max + core_grid::EPSILON,
            "buffer overflow: {} + {} > {}",
            self.value,
            amount,
            self.max
        );
        self.value = (self.value + amount).clamp(0.0, self.max);
    }

    pub fn subtract(&mut self, amount: f32) {
        debug_assert!(amount >= 0.0, "negative flow subtracted from buffer");
        debug_assert!(
            self.value - amount >= -core_grid::EPSILON,
            "buffer underflow: {} - {}",
            self.value,
            amount
        );
        self.value = (self.value - amount).clamp(0.0, self.max);
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

#[derive(Debug)]
pub struct Cell {
    symbol: char,
    empty: bool,
    /// Length of the `prev` path to the root; `-1` when detached.
    pub distance_to_root: i32,
    /// True when the elastic layer introduced this cell.
    pub rented: bool,
    pub cell_type: CellType,
    prev: [Option<Pos>; 4],
    next: [Option<Pos>; 4],
    pub buffered: BufferedFlow,
    /// Ticks left during which this cell skips data capture after a
    /// restructure moved it.
    pub restructure_delay: u32,
    /// Energy consumed by this cell's subtree during the last tick.
    pub last_energy_consumed: f32,
}

impl Clone for Cell {
    /// Clones carry the durable cell state only. The settle countdown
    /// and the per-tick energy stat stay behind: board copies exist to
    /// evaluate candidate futures, and those probes must score the
    /// structure, not the transient tick state of the original.
    fn clone(&self) -> Self {
        Self {
            symbol: self.symbol,
            empty: self.empty,
            distance_to_root: self.distance_to_root,
            rented: self.rented,
            cell_type: self.cell_type,
            prev: self.prev,
            next: self.next,
            buffered: self.buffered.clone(),
            restructure_delay: 0,
            last_energy_consumed: 0.0,
        }
    }
}

impl Cell {
    pub fn new(max_flow: f32) -> Self {
        Self {
            symbol: EMPTY_SYMBOL,
            empty: true,
            distance_to_root: -1,
            rented: false,
            cell_type: CellType::default(),
            prev: [None; 4],
            next: [None; 4],
            buffered: BufferedFlow::new(max_flow),
            restructure_delay: 0,
            last_energy_consumed: 0.0,
        }
    }

    #[inline]
    pub fn symbol(&self) -> char {
        self.symbol
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn set_symbol(&mut self, symbol: char) {
        debug_assert_ne!(symbol, EMPTY_SYMBOL, "use set_empty to clear a cell");
        self.symbol = symbol;
        self.empty = false;
    }

    pub fn set_empty(&mut self) {
        self.symbol = EMPTY_SYMBOL;
        self.empty = true;
        self.rented = false;
        self.distance_to_root = -1;
        self.cell_type = CellType::default();
        self.buffered.reset();
        self.restructure_delay = 0;
        self.reset_links();
    }

    pub fn reset_links(&mut self) {
        self.prev = [None; 4];
        self.next = [None; 4];
    }

    #[inline]
    pub fn prev(&self, dir: Direction) -> Option<Pos> {
        self.prev[dir.index()]
    }

    #[inline]
    pub fn next(&self, dir: Direction) -> Option<Pos> {
        self.next[dir.index()]
    }

    pub fn set_prev(&mut self, dir: Direction, parent: Option<Pos>) {
        self.prev[dir.index()] = parent;
    }

    pub fn set_next(&mut self, dir: Direction, child: Option<Pos>) {
        self.next[dir.index()] = child;
    }

    /// The parent link, if any, together with the direction this cell
    /// hangs off it.
    pub fn parent(&self) -> Option<(Direction, Pos)> {
        Direction::ALL
            .into_iter()
            .find_map(|d| self.prev(d).map(|p| (d, p)))
    }

    /// Topology-defined root test: an occupied cell with no departing
    /// `prev` link. The directional regime additionally restricts roots
    /// to membrane cells.
    pub fn is_root(&self, membrane_only: bool) -> bool {
        if self.empty || self.prev.iter().any(Option::is_some) {
            return false;
        }
        !membrane_only || self.cell_type == CellType::Membrane
    }

    pub fn has_children(&self) -> bool {
        self.next.iter().any(Option::is_some)
    }
}
