//! Cut subtrees as relocatable stamps.
//!
//! A cut records every included cell as an offset from the subroot plus
//! the symbol and rented flag that were there, and tracks the
//! axis-aligned bounding box of the offsets so paste-candidate
//! enumeration can reject out-of-bounds translations cheaply.

use core_grid::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetAndSymbol {
    pub row_off: i32,
    pub col_off: i32,
    pub symbol: char,
    pub rented: bool,
}

#[derive(Debug, Clone)]
pub struct SubtreeInfo {
    offsets: Vec<OffsetAndSymbol>,
    min_row_off: i32,
    max_row_off: i32,
    min_col_off: i32,
    max_col_off: i32,
}

impl Default for SubtreeInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl SubtreeInfo {
    pub fn new() -> Self {
        Self {
            offsets: Vec::new(),
            min_row_off: i32::MAX,
            max_row_off: i32::MIN,
            min_col_off: i32::MAX,
            max_col_off: i32::MIN,
        }
    }

    pub fn add(&mut self, entry: OffsetAndSymbol) {
        self.min_row_off = self.min_row_off.min(entry.row_off);
        self.max_row_off = self.max_row_off.max(entry.row_off);
        self.min_col_off = self.min_col_off.min(entry.col_off);
        self.max_col_off = self.max_col_off.max(entry.col_off);
        self.offsets.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OffsetAndSymbol> {
        self.offsets.iter()
    }

    /// Bounding box as `(min_row, max_row, min_col, max_col)` offsets.
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        debug_assert!(!self.is_empty(), "bounds of an empty subtree");
        (
            self.min_row_off,
            self.max_row_off,
            self.min_col_off,
            self.max_col_off,
        )
    }

    /// The absolute positions this subtree covers when its subroot is
    /// translated to `target`.
    pub fn positions_at<'a>(&'a self, target: Pos) -> impl Iterator<Item = Pos> + 'a {
        self.offsets
            .iter()
            .map(move |o| target.translated(o.row_off, o.col_off))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_track_extremes() {
        let mut s = SubtreeInfo::new();
        s.add(OffsetAndSymbol { row_off: 0, col_off: 0, symbol: '2', rented: false });
        s.add(OffsetAndSymbol { row_off: 2, col_off: -1, symbol: '4', rented: false });
        s.add(OffsetAndSymbol { row_off: -1, col_off: 3, symbol: 'e', rented: true });
        assert_eq!(s.bounds(), (-1, 2, -1, 3));
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn positions_translate_offsets() {
        let mut s = SubtreeInfo::new();
        s.add(OffsetAndSymbol { row_off: 0, col_off: 0, symbol: '2', rented: false });
        s.add(OffsetAndSymbol { row_off: 1, col_off: 0, symbol: '7', rented: false });
        let at: Vec<Pos> = s.positions_at(Pos::new(3, 4)).collect();
        assert_eq!(at, vec![Pos::new(3, 4), Pos::new(4, 4)]);
    }
}
