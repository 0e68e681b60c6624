#![allow(dead_code)] // Shared across integration tests; each test binary uses a subset.

use core_board::{Board, SourceInfo, SourceType, TreeTopology};
use core_config::SimConfig;
use core_grid::{float_eq, manhattan, Pos};
use core_psm::PsManager;
use std::sync::Arc;

/// A default 20×20 left/down board (max_hop 5, max_flow 100) with the
/// given cells occupied, rooted at the top-right corner.
pub fn board_with_cells(cells: &[(i32, i32, char)]) -> Board {
    let config = Arc::new(SimConfig::default());
    let mut board = Board::new(config, TreeTopology::LeftDown);
    board.set_root(Pos::new(0, 19)).unwrap();
    for &(row, col, symbol) in cells {
        board.set_symbol(Pos::new(row, col), symbol).unwrap();
    }
    board.discover_structure();
    board
}

pub fn publisher(power: f32, service: &str) -> SourceInfo {
    SourceInfo::new(power, SourceType::Publisher, service)
}

pub fn subscriber(power: f32, service: &str) -> SourceInfo {
    SourceInfo::new(power, SourceType::Subscriber, service)
}

/// Every link appears on both endpoints with identical flow and
/// relay path.
pub fn assert_link_symmetry(board: &Board) {
    for (&pos, info) in &board.sources {
        for (&other, link) in &info.connected_to {
            let mirrored = board
                .sources
                .get(&other)
                .unwrap_or_else(|| panic!("{other} missing for link from {pos}"))
                .connected_to
                .get(&pos)
                .unwrap_or_else(|| panic!("no reverse link {other} -> {pos}"));
            assert!(float_eq(mirrored.flow, link.flow), "flow asymmetry {pos}<->{other}");
            assert_eq!(
                mirrored.mirror_nodes_used, link.mirror_nodes_used,
                "path asymmetry {pos}<->{other}"
            );
        }
    }
}

/// Used power stays within capacity and equals the link sum.
pub fn assert_capacity_safety(board: &Board) {
    for (&pos, info) in &board.sources {
        info.sanity_check_power(pos).expect("capacity invariant");
    }
}

/// The mirror registry survives a rebuild from the links.
pub fn assert_registry_consistent(psm: &PsManager, board: &Board) {
    psm.do_sanity_checks(board).expect("registry invariant");
}

/// Consecutive hops along every relay path stay within the bound,
/// publisher prepended and subscriber appended.
pub fn assert_hop_bound(board: &Board) {
    let max_hop = board.config().max_hop_distance;
    for (&pos, info) in &board.sources {
        if info.source_type != SourceType::Publisher {
            continue;
        }
        for (&sub, link) in &info.connected_to {
            let mut chain = vec![pos];
            chain.extend(link.mirror_nodes_used.iter().copied());
            chain.push(sub);
            for pair in chain.windows(2) {
                assert!(
                    manhattan(pair[0], pair[1]) <= max_hop,
                    "hop {} -> {} exceeds {max_hop}",
                    pair[0],
                    pair[1]
                );
            }
        }
    }
}

pub fn assert_all_invariants(psm: &PsManager, board: &Board) {
    assert_link_symmetry(board);
    assert_capacity_safety(board);
    assert_registry_consistent(psm, board);
    assert_hop_bound(board);
}
