//! Mapping between logical slots and the rendered grid.

use crate::data::{Assignment, PeriodIndex, RoomIndex};
use serde::Serialize;

/// A 1-based, end-exclusive grid area. Rows are periods, columns are rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub row_start: usize,
    pub col_start: usize,
    pub row_end: usize,
    pub col_end: usize,
}

impl Region {
    pub fn rows(&self) -> usize {
        self.row_end - self.row_start
    }

    pub fn cols(&self) -> usize {
        self.col_end - self.col_start
    }
}

/// Grid area covered by a class of `duration` periods placed at (`room`, `period`).
pub fn region_of(room: RoomIndex, period: PeriodIndex, duration: usize) -> Region {
    let row_start = period + 1;
    let col_start = room + 1;
    Region {
        row_start,
        col_start,
        row_end: row_start + duration,
        col_end: col_start + 1,
    }
}

pub fn region_of_assignment(a: &Assignment) -> Region {
    region_of(a.room, a.period, a.duration)
}

/// True iff both classes sit in the same room and their periods intersect.
pub fn overlaps(a: &Assignment, b: &Assignment) -> bool {
    a.room == b.room && a.period < b.end() && b.period < a.end()
}
