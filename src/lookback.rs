/*
    Tagged cells of the onesweep look-back chain.

    Every tile owns one cell per bucket and stage. A cell is a tagged count:
        bit 31 set: the tile published its own count
        bit 30 set: the count also contains every earlier tile
    A tile publishes its local counts first, then walks back over its predecessors summing
    counts until it meets an accumulated cell, and finally republishes its own cell as
    accumulated. Tile 0 publishes accumulated counts right away. The walk itself runs in the
    onesweep_sweep kernel, the flags are handed to the shader as constants.
*/

pub(crate) const FLAG_UPDATED: u32 = 0x8000_0000;
pub(crate) const FLAG_ACCUMULATED: u32 = 0x4000_0000;
pub(crate) const COUNT_MASK: u32 = 0x3fff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cell {
    Empty,
    Local(u32),
    /// count of the tile plus all earlier tiles
    Inclusive(u32),
}

impl Cell {
    pub(crate) fn decode(word: u32) -> Self {
        let count = word & COUNT_MASK;
        if word & FLAG_ACCUMULATED != 0 {
            Cell::Inclusive(count)
        } else if word & FLAG_UPDATED != 0 {
            Cell::Local(count)
        } else {
            Cell::Empty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_leave_room_for_the_count() {
        assert_eq!(FLAG_UPDATED & COUNT_MASK, 0);
        assert_eq!(FLAG_ACCUMULATED & COUNT_MASK, 0);
        assert_eq!(FLAG_UPDATED | FLAG_ACCUMULATED | COUNT_MASK, u32::MAX);
    }

    #[test]
    fn decode_cells() {
        assert_eq!(Cell::decode(0), Cell::Empty);
        assert_eq!(Cell::decode(FLAG_UPDATED), Cell::Local(0));
        assert_eq!(Cell::decode(17 | FLAG_UPDATED), Cell::Local(17));
        assert_eq!(
            Cell::decode(COUNT_MASK | FLAG_UPDATED | FLAG_ACCUMULATED),
            Cell::Inclusive(COUNT_MASK)
        );
    }
}
