use crate::data::{Assignment, RoomIndex, TimeTable};
use crate::error::{ConflictError, ValidationError};
use crate::geometry::overlaps;
use itertools::Itertools;
use log::trace;
use std::collections::{HashMap, HashSet};

/// Checks that every class fits the grid and no two classes share a room at the same time.
///
/// Conflicts are reported for the lowest room first, and within a room for the
/// earliest pair in `class_list` order.
pub fn validate(table: &TimeTable) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(table.class_list.len());
    for a in &table.class_list {
        if a.duration == 0 {
            return Err(ValidationError::EmptyDuration(a.id));
        }
        if a.room >= table.room_size || a.end() > table.period_size {
            return Err(ValidationError::OutOfGrid {
                id: a.id,
                room: a.room,
                period: a.period,
                duration: a.duration,
            });
        }
        if !seen.insert(a.id) {
            return Err(ValidationError::DuplicateId(a.id));
        }
    }

    let by_room: HashMap<RoomIndex, Vec<&Assignment>> =
        table.class_list.iter().map(|a| (a.room, a)).into_group_map();

    for room in by_room.keys().sorted() {
        let classes = &by_room[room];
        for (a, b) in classes.iter().tuple_combinations() {
            if overlaps(a, b) {
                trace!("{} overlaps {}", a, b);
                return Err(ConflictError::new(a.id, b.id, *room).into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table(classes: Vec<Assignment>) -> TimeTable {
        TimeTable {
            class_list: classes,
            room_size: 3,
            period_size: 5,
        }
    }

    #[test]
    fn empty_table_is_valid() {
        assert_eq!(validate(&TimeTable::default()), Ok(()));
    }

    #[test]
    fn overlapping_pair_reports_both_ids_and_room() {
        let t = table(vec![Assignment::new(1, 0, 0, 2), Assignment::new(2, 0, 1, 1)]);
        assert_eq!(
            validate(&t),
            Err(ValidationError::Conflict(ConflictError::new(1, 2, 0)))
        );
    }

    #[test]
    fn same_period_in_different_rooms_is_fine() {
        let t = table(vec![Assignment::new(1, 0, 0, 2), Assignment::new(2, 1, 0, 2)]);
        assert_eq!(validate(&t), Ok(()));
    }

    #[test]
    fn class_running_past_last_period_is_rejected() {
        let t = table(vec![Assignment::new(1, 0, 4, 2)]);
        assert!(matches!(
            validate(&t),
            Err(ValidationError::OutOfGrid { id: 1, .. })
        ));
    }

    #[test]
    fn room_outside_grid_is_rejected() {
        let t = table(vec![Assignment::new(1, 3, 0, 1)]);
        assert!(matches!(
            validate(&t),
            Err(ValidationError::OutOfGrid { id: 1, room: 3, .. })
        ));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let t = table(vec![Assignment::new(1, 0, 0, 0)]);
        assert_eq!(validate(&t), Err(ValidationError::EmptyDuration(1)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let t = table(vec![Assignment::new(1, 0, 0, 1), Assignment::new(1, 1, 0, 1)]);
        assert_eq!(validate(&t), Err(ValidationError::DuplicateId(1)));
    }

    #[test]
    fn lowest_room_conflict_is_reported_first() {
        let t = table(vec![
            Assignment::new(5, 2, 0, 2),
            Assignment::new(6, 2, 1, 2),
            Assignment::new(7, 1, 3, 2),
            Assignment::new(8, 1, 4, 1),
        ]);
        assert_eq!(
            validate(&t),
            Err(ValidationError::Conflict(ConflictError::new(7, 8, 1)))
        );
    }

    proptest! {
        #[test]
        fn accepted_tables_have_disjoint_room_intervals(
            slots in prop::collection::vec((0usize..3, 0usize..6, 1usize..3), 0..8)
        ) {
            let classes = slots
                .into_iter()
                .enumerate()
                .map(|(i, (room, period, duration))| Assignment::new(i as u64, room, period, duration))
                .collect();
            let t = TimeTable { class_list: classes, room_size: 3, period_size: 6 };
            if validate(&t).is_ok() {
                for room in 0..3 {
                    let mut busy = [false; 6];
                    for a in t.class_list.iter().filter(|a| a.room == room) {
                        for p in a.period..a.end() {
                            prop_assert!(!busy[p]);
                            busy[p] = true;
                        }
                    }
                }
            }
        }
    }
}
