use crate::data::{ClassId, LOCKED_COLOR, PeriodIndex, ReferenceData, RoomIndex, TimeTable};
use crate::error::{SessionError, ValidationError};
use crate::lock;
use crate::validate::validate;
use log::{debug, info, warn};

/// Sole owner of the current timetable.
///
/// Every mutation builds a candidate copy, validates it, and only then swaps it
/// in, so readers never observe an invalid table.
#[derive(Debug, Clone, Default)]
pub struct Session {
    table: TimeTable,
    reference: Option<ReferenceData>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an unsolved skeleton sized by the reference data.
    pub fn with_reference(reference: ReferenceData) -> Self {
        info!(
            "Session with {} classes, {} rooms and {} periods",
            reference.classes.len(),
            reference.rooms.len(),
            reference.periods.len()
        );
        Self {
            table: reference.skeleton(),
            reference: Some(reference),
        }
    }

    pub fn current(&self) -> TimeTable {
        self.table.clone()
    }

    pub fn table(&self) -> &TimeTable {
        &self.table
    }

    pub fn reference(&self) -> Result<&ReferenceData, SessionError> {
        self.reference.as_ref().ok_or(SessionError::NoReferenceData)
    }

    pub fn room_names(&self) -> Vec<String> {
        self.reference
            .as_ref()
            .map(ReferenceData::room_names)
            .unwrap_or_default()
    }

    pub fn period_names(&self) -> Vec<String> {
        self.reference
            .as_ref()
            .map(|r| r.periods.clone())
            .unwrap_or_default()
    }

    /// Commits `candidate` if it validates, otherwise keeps the current table.
    pub fn replace(&mut self, candidate: TimeTable) -> Result<TimeTable, ValidationError> {
        if let Err(e) = validate(&candidate) {
            warn!("Rejected candidate timetable: {}", e);
            return Err(e);
        }
        debug!(
            "Committed timetable with {} classes",
            candidate.class_list.len()
        );
        self.table = candidate;
        Ok(self.table.clone())
    }

    /// Moves class `id` to (`room`, `period`), keeping its duration.
    pub fn apply_edit(
        &mut self,
        id: ClassId,
        room: RoomIndex,
        period: PeriodIndex,
    ) -> Result<TimeTable, SessionError> {
        self.edit(id, room, period, false)
    }

    /// Moves class `id` and locks it there in the same commit.
    pub fn pin_at(
        &mut self,
        id: ClassId,
        room: RoomIndex,
        period: PeriodIndex,
    ) -> Result<TimeTable, SessionError> {
        self.edit(id, room, period, true)
    }

    fn edit(
        &mut self,
        id: ClassId,
        room: RoomIndex,
        period: PeriodIndex,
        pin: bool,
    ) -> Result<TimeTable, SessionError> {
        let mut candidate = self.table.clone();
        let a = candidate
            .get_mut(id)
            .ok_or(SessionError::UnknownAssignmentId(id))?;
        a.room = room;
        a.period = period;
        if pin {
            a.locked = true;
            a.display_color = Some(LOCKED_COLOR.to_string());
        }
        Ok(self.replace(candidate)?)
    }

    /// Flips the lock flag of `id`; unknown ids are ignored.
    pub fn toggle_lock(&mut self, id: ClassId) -> TimeTable {
        self.table = lock::toggle_lock(std::mem::take(&mut self.table), id);
        self.table.clone()
    }
}
