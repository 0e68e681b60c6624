//! Builders shared by unit tests, integration suites and benches.
//!
//! Boards are described as string rows using the board-file characters
//! (`*` for empty), so fixtures read like the files they would load
//! from.

use crate::board::Board;
use crate::topology::TreeTopology;
use core_config::{ConfigFile, SimConfig};
use core_grid::{Pos, EMPTY_SYMBOL};
use std::sync::Arc;

/// Build a left/down board sized to the fixture, fill it, set the root
/// and run discovery.
pub fn board_from_rows(rows: &[&str], root: Pos) -> Board {
    let mut file = ConfigFile::default();
    file.board.rows = rows.len() as i32;
    file.board.cols = rows[0].chars().count() as i32;
    board_with_config(rows, root, SimConfig::from_file(file))
}

/// Same as [`board_from_rows`] with an explicit configuration; the
/// configured dimensions must cover the fixture.
pub fn board_with_config(rows: &[&str], root: Pos, config: SimConfig) -> Board {
    board_with_topology(rows, root, config, TreeTopology::LeftDown)
}

pub fn board_with_topology(
    rows: &[&str],
    root: Pos,
    config: SimConfig,
    topology: TreeTopology,
) -> Board {
    assert!(
        config.rows >= rows.len() as i32,
        "fixture taller than configured board"
    );
    let mut board = Board::new(Arc::new(config), topology);
    for (r, line) in rows.iter().enumerate() {
        assert!(
            board.dims().cols >= line.chars().count() as i32,
            "fixture wider than configured board"
        );
        for (c, ch) in line.chars().enumerate() {
            if ch != EMPTY_SYMBOL {
                board
                    .set_symbol(Pos::new(r as i32, c as i32), ch)
                    .expect("fixture position in bounds");
            }
        }
    }
    board.set_root(root).expect("fixture root in bounds");
    board.discover_structure();
    board
}
