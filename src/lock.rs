use crate::data::{ClassId, TimeTable};
use log::{debug, trace};

/// Flips the lock flag of the class `id`. Unknown ids leave the table untouched.
///
/// Only the flag changes, so the result is valid whenever `table` is, and
/// toggling the same id twice gives back the original table.
pub fn toggle_lock(mut table: TimeTable, id: ClassId) -> TimeTable {
    match table.get_mut(id) {
        Some(a) => {
            a.locked = !a.locked;
            debug!("class {} locked: {}", id, a.locked);
        }
        None => trace!("toggle_lock: class {} not in table, ignoring", id),
    }
    table
}
