//! The two structural regimes, factored so link walking never branches
//! at call sites.
//!
//! * `LeftDown` — the 2-way tree: children hang left and down, the root
//!   sits wherever discovery anchored it (conventionally the top-right
//!   corner), and every occupied cell may capture.
//! * `Directional` — the 4-way tree: children hang in all four
//!   directions, roots must be membrane cells, and capture is restricted
//!   to exterior cells while interior cells receive donated flow.

use core_grid::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeTopology {
    #[default]
    LeftDown,
    Directional,
}

impl TreeTopology {
    /// Directions children may hang off a parent, in deterministic
    /// traversal order.
    pub const fn child_dirs(self) -> &'static [Direction] {
        match self {
            TreeTopology::LeftDown => &[Direction::Left, Direction::Down],
            TreeTopology::Directional => &[
                Direction::Left,
                Direction::Down,
                Direction::Right,
                Direction::Up,
            ],
        }
    }

    /// Whether the root test is restricted to membrane cells.
    pub const fn membrane_roots_only(self) -> bool {
        matches!(self, TreeTopology::Directional)
    }
}
