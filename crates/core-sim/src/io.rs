//! Board file parsing and saving.
//!
//! The format is line-oriented: one line per row, one character per
//! cell in column order, `*` for empty. Everything after `//` on a line
//! is a comment; surrounding whitespace is stripped; blank lines are
//! skipped. A loaded board must satisfy the row/column language or the
//! load is rejected.

use anyhow::{bail, Context, Result};
use core_board::Board;
use core_grid::{Pos, EMPTY_SYMBOL};
use std::fs;
use std::path::Path;
use tracing::info;

/// Strip a `//` comment and surrounding whitespace.
pub fn trim_comments_and_whitespace(line: &str) -> &str {
    let uncommented = match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    };
    uncommented.trim_matches([' ', '\t'])
}

/// Populate `board` from the file contents. The text is fully parsed
/// and bounds-checked before any cell mutates, so a rejected file never
/// leaves the board half-filled.
pub fn load_board_str(board: &mut Board, content: &str) -> Result<()> {
    let mut writes: Vec<(Pos, char)> = Vec::new();
    let mut row = 0;
    for raw in content.lines() {
        let line = trim_comments_and_whitespace(raw);
        if line.is_empty() {
            continue;
        }
        if row >= board.dims().rows {
            bail!("board file has more than {} rows", board.dims().rows);
        }
        for (col, symbol) in line.chars().enumerate() {
            let col = col as i32;
            if col >= board.dims().cols {
                bail!("row {row} has more than {} columns", board.dims().cols);
            }
            if symbol != EMPTY_SYMBOL {
                writes.push((Pos::new(row, col), symbol));
            }
        }
        row += 1;
    }

    for pos in board.dims().iter() {
        board.set_empty(pos).expect("iterating own dimensions");
    }
    for (pos, symbol) in writes {
        board.set_symbol(pos, symbol).expect("validated coordinates");
    }

    if !board.is_language_compliant(None, None) {
        for pos in board.dims().iter() {
            board.set_empty(pos).expect("iterating own dimensions");
        }
        bail!("board file violates the row/column language");
    }
    board.discover_structure();
    Ok(())
}

pub fn load_board_file(board: &mut Board, path: &Path) -> Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading board file {}", path.display()))?;
    load_board_str(board, &content)?;
    info!(target: "sim.io", path = %path.display(), nodes = board.count_nodes(), "board_loaded");
    Ok(())
}

pub fn save_board_file(board: &Board, path: &Path) -> Result<()> {
    let mut out = Vec::new();
    board
        .print_board(&mut out)
        .context("rendering board for save")?;
    fs::write(path, out).with_context(|| format!("writing board file {}", path.display()))?;
    info!(target: "sim.io", path = %path.display(), "board_saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_board::test_support::board_from_rows;

    #[test]
    fn comments_and_whitespace_are_stripped() {
        assert_eq!(trim_comments_and_whitespace("  *442  // tree row"), "*442");
        assert_eq!(trim_comments_and_whitespace("// only comment"), "");
        assert_eq!(trim_comments_and_whitespace("\t*2**\t"), "*2**");
    }

    #[test]
    fn load_round_trips_through_save_format() {
        let mut board = board_from_rows(&["****", "****", "****"], Pos::new(0, 3));
        load_board_str(&mut board, "*442 // arm\n*2**\n\n*2**\n").unwrap();
        assert!(board.is_occupied(Pos::new(0, 1)));
        assert_eq!(board.cell(Pos::new(0, 3)).symbol(), '2');
        assert_eq!(board.count_nodes(), 5);
        // Discovery ran: the arm hangs off the root.
        assert_eq!(board.cell(Pos::new(2, 1)).distance_to_root, 4);

        let mut rendered = Vec::new();
        board.print_board(&mut rendered).unwrap();
        assert_eq!(String::from_utf8(rendered).unwrap(), "*442\n*2**\n*2**\n");
    }

    #[test]
    fn non_compliant_file_is_rejected_and_board_cleared() {
        let mut board = board_from_rows(&["****", "****"], Pos::new(0, 3));
        // "24" is not a legal row run.
        let err = load_board_str(&mut board, "24**\n****\n");
        assert!(err.is_err());
        assert_eq!(board.count_nodes(), 0);
    }

    #[test]
    fn oversized_file_is_rejected() {
        let mut board = board_from_rows(&["****"], Pos::new(0, 3));
        assert!(load_board_str(&mut board, "*2**\n*2**\n").is_err());
    }
}
