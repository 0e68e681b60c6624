//! Cut/paste scenarios on a full-size board.

use core_board::{Board, SourceInfo, SourceType, TreeTopology};
use core_config::SimConfig;
use core_grid::Pos;
use std::sync::Arc;

/// Default 20×20 board with a column arm under a pivot at (0,4):
/// `4` at (0,4), `2`s from (1,4) down to (5,4).
fn column_board() -> Board {
    let mut board = Board::new(Arc::new(SimConfig::default()), TreeTopology::LeftDown);
    board.set_root(Pos::new(0, 4)).unwrap();
    board.set_symbol(Pos::new(0, 4), '4').unwrap();
    for row in 1..=5 {
        board.set_symbol(Pos::new(row, 4), '2').unwrap();
    }
    board.discover_structure();
    board
}

fn render(board: &Board) -> String {
    let mut out = Vec::new();
    board.print_board(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn cut_three_cells_and_paste_nearby() {
    let mut board = column_board();
    let subtree = board.cut_subtree(Pos::new(3, 4)).unwrap();
    assert_eq!(subtree.len(), 3);

    assert!(board.try_apply_subtree(Pos::new(3, 2), &subtree, true, true));
    for row in 3..=5 {
        assert!(board.is_occupied(Pos::new(row, 2)), "row {row}");
        assert_eq!(board.cell(Pos::new(row, 2)).symbol(), '2');
        assert!(board.is_free(Pos::new(row, 4)));
    }
    assert!(board.is_language_compliant(None, None));
}

#[test]
fn paste_out_of_bounds_restores_the_board() {
    let mut board = column_board();
    let subtree = board.cut_subtree(Pos::new(3, 4)).unwrap();
    let before = render(&board);

    // Offsets reach rows 18..20; row 20 is off-board.
    assert!(!board.try_apply_subtree(Pos::new(18, 2), &subtree, true, true));
    assert_eq!(render(&board), before);
}

#[test]
fn paste_onto_occupied_cells_restores_the_board() {
    let mut board = column_board();
    let subtree = board.cut_subtree(Pos::new(3, 4)).unwrap();
    let before = render(&board);

    // (1,4) still carries the upper arm.
    assert!(!board.try_apply_subtree(Pos::new(1, 4), &subtree, true, true));
    assert_eq!(render(&board), before);
}

#[test]
fn unchecked_position_paste_still_rolls_back_cleanly() {
    let mut board = column_board();
    let subtree = board.cut_subtree(Pos::new(3, 4)).unwrap();
    let before = render(&board);

    // Even with the position pre-check skipped, hitting an occupied
    // cell mid-write undoes the partial write.
    assert!(!board.try_apply_subtree(Pos::new(1, 4), &subtree, false, true));
    assert_eq!(render(&board), before);
}

#[test]
fn rejected_reorganization_leaves_the_board_bit_identical() {
    // No sources: nothing can improve, and the board must come out
    // untouched, statistics included.
    let mut board = column_board();
    let before = render(&board);
    assert!(!board.reorganize());
    assert_eq!(render(&board), before);
    assert_eq!(board.count_nodes(), 6);
}

#[test]
fn accepted_reorganization_strictly_improves_flow() {
    let mut board = column_board();
    // Strong supply far from the arm's current place.
    board
        .insert_source(
            Pos::new(8, 15),
            SourceInfo::new(60.0, SourceType::Generic, "default"),
        )
        .unwrap();

    let mut probe = board.clone();
    probe.simulate_data_flow(1, false);
    let before = probe.last_simulation_avg_flow_per_unit();
    let rendered_before = render(&board);

    if board.reorganize() {
        let mut probe = board.clone();
        probe.simulate_data_flow(1, false);
        let after = probe.last_simulation_avg_flow_per_unit();
        assert!(after > before, "{before} -> {after}");
    } else {
        assert_eq!(render(&board), rendered_before);
    }
}
