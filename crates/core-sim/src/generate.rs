//! Random compliant board and source generation.
//!
//! Boards grow level by level: a row expression anchored at the root,
//! then columns grafted onto `4`/`e` cells, then rows grafted onto the
//! `2`/`7` cells those columns produced, alternating until the depth
//! budget runs out. Every grafted line is written tentatively and
//! undone if the touched row or column stops matching the language, so
//! generation never commits a violation no matter how the arms collide.

use core_board::{Board, SourceInfo, SourceType};
use core_config::SimConfig;
use core_grid::{Direction, Pos};
use core_lang::{Axis, GeneratedLine, LanguageOracle};
use rand::rngs::SmallRng;
use rand::Rng;
use tracing::debug;

const GROWTH_PROBABILITY: f64 = 0.6;

/// Write a generated line along `axis` with its pivot at `pivot_pos`,
/// skipping the pivot cell itself (already occupied). Rolls back and
/// reports false when a touched line would stop matching the language
/// or a target cell is taken.
fn apply_line(board: &mut Board, axis: Axis, pivot_pos: Pos, line: &GeneratedLine) -> bool {
    let mut written: Vec<Pos> = Vec::new();
    for (i, &symbol) in line.symbols.iter().enumerate() {
        let offset = line.start + i as i32;
        if offset == 0 {
            continue;
        }
        let pos = match axis {
            Axis::Row => Pos::new(pivot_pos.row, pivot_pos.col + offset),
            Axis::Col => Pos::new(pivot_pos.row + offset, pivot_pos.col),
        };
        if !board.is_free(pos) || board.set_symbol(pos, symbol).is_err() {
            for undo in written {
                board.set_empty(undo).expect("undoing own writes");
            }
            return false;
        }
        written.push(pos);
    }
    let compliant = written.iter().all(|p| {
        board.is_language_compliant(Some(p.row), None) && board.is_language_compliant(None, Some(p.col))
    });
    if !compliant {
        for undo in written {
            board.set_empty(undo).expect("undoing own writes");
        }
        return false;
    }
    !written.is_empty()
}

/// Free space from `from` (exclusive) along `dir` before the board edge
/// or the next occupied cell.
fn free_run(board: &Board, from: Pos, dir: Direction) -> i32 {
    let mut n = 0;
    let mut cursor = from.step(dir);
    while board.is_free(cursor) {
        n += 1;
        cursor = cursor.step(dir);
    }
    n
}

const MAX_GENERATION_ATTEMPTS: u32 = 8;

/// Grow a random compliant tree from the root, retrying a few times
/// when the dice leave nothing beyond the root cell. Returns false when
/// every attempt came up bare.
pub fn generate_random_board(
    board: &mut Board,
    oracle: &LanguageOracle,
    rng: &mut SmallRng,
    max_depth: i32,
) -> bool {
    for _ in 0..MAX_GENERATION_ATTEMPTS {
        if grow_once(board, oracle, rng, max_depth) {
            return true;
        }
    }
    false
}

fn grow_once(
    board: &mut Board,
    oracle: &LanguageOracle,
    rng: &mut SmallRng,
    max_depth: i32,
) -> bool {
    let Some(root) = board.root() else {
        return false;
    };
    for pos in board.dims().iter() {
        board.set_empty(pos).expect("iterating own dimensions");
    }

    // The root anchors the first row expression; `2` keeps its column
    // trivially compliant wherever the root sits.
    board.set_symbol(root, '2').expect("root is in bounds");
    let line = oracle.generate_line_with_pivot(
        rng,
        Axis::Row,
        '2',
        free_run(board, root, Direction::Left),
        free_run(board, root, Direction::Right),
        max_depth.max(1),
    );
    apply_line(board, Axis::Row, root, &line);

    // Alternate graft levels: columns hang off 4/e cells, rows hang off
    // 2/7 cells.
    let mut anchors: Vec<(Pos, Axis)> = collect_anchors(board, Axis::Col);
    for _level in 1..max_depth.max(1) {
        let mut next: Vec<(Pos, Axis)> = Vec::new();
        for (pivot_pos, axis) in anchors {
            if !rng.gen_bool(GROWTH_PROBABILITY) {
                continue;
            }
            let pivot = board.cell(pivot_pos).symbol();
            // Left/down regime: only arms the tree can reach integrate —
            // rows grow leftward from their pivot, columns downward.
            let (max_before, max_after) = match axis {
                Axis::Row => (free_run(board, pivot_pos, Direction::Left), 0),
                Axis::Col => (0, free_run(board, pivot_pos, Direction::Down)),
            };
            let line = oracle.generate_line_with_pivot(
                rng,
                axis,
                pivot,
                max_before,
                max_after,
                max_depth,
            );
            if apply_line(board, axis, pivot_pos, &line) {
                let perpendicular = match axis {
                    Axis::Row => Axis::Col,
                    Axis::Col => Axis::Row,
                };
                for anchor in collect_anchors(board, perpendicular) {
                    if !next.contains(&anchor) {
                        next.push(anchor);
                    }
                }
            }
        }
        anchors = next;
        if anchors.is_empty() {
            break;
        }
    }

    board.discover_structure();
    debug_assert!(board.is_language_compliant(None, None));
    debug!(target: "sim.generate", nodes = board.count_nodes(), "random_board_generated");
    board.count_nodes() > 1
}

/// Cells that could anchor a new line along `axis`: column pivots are
/// `4`/`e` cells without a column arm yet, row pivots `2`/`7` cells
/// without a row arm.
fn collect_anchors(board: &Board, axis: Axis) -> Vec<(Pos, Axis)> {
    let mut out = Vec::new();
    for pos in board.dims().iter() {
        if !board.is_occupied(pos) {
            continue;
        }
        let symbol = board.cell(pos).symbol();
        if !axis.pivots().contains(&symbol) {
            continue;
        }
        // Skip pivots already embedded in a line along that axis.
        let (a, b) = match axis {
            Axis::Row => (pos.step(Direction::Left), pos.step(Direction::Right)),
            Axis::Col => (pos.step(Direction::Up), pos.step(Direction::Down)),
        };
        if board.is_occupied(a) || board.is_occupied(b) {
            continue;
        }
        out.push((pos, axis));
    }
    out
}

/// A random wireless source: publisher or subscriber by configured
/// probability, powered within the given range.
pub fn random_source_info(config: &SimConfig, rng: &mut SmallRng, min_power: i32, max_power: i32) -> SourceInfo {
    let max_power = max_power.max(min_power);
    let power = rng.gen_range(min_power..=max_power) as f32;
    let source_type = if rng.gen_bool(config.publisher_probability as f64) {
        SourceType::Publisher
    } else {
        SourceType::Subscriber
    };
    SourceInfo::new(power, source_type, "default")
}

/// A random board position (not necessarily free).
pub fn random_pos(board: &Board, rng: &mut SmallRng) -> Pos {
    Pos::new(
        rng.gen_range(0..board.dims().rows),
        rng.gen_range(0..board.dims().cols),
    )
}
