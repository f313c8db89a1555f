use serde::{Deserialize, Serialize};
use std::fmt;

// Type aliases for clarity
pub type ClassId = u64;
pub type RoomIndex = usize;
pub type PeriodIndex = usize;
pub type TeacherId = u64;
pub type StudentGroupId = u64;

/// Colour used for assignments pinned by the user.
pub const LOCKED_COLOR: &str = "#AAAAFF";

/// One scheduled class placed at a (room, period) slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: ClassId,
    pub room: RoomIndex,
    pub period: PeriodIndex,
    pub duration: usize,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub display_label: String,
    #[serde(default)]
    pub display_color: Option<String>,
}

impl Assignment {
    pub fn new(id: ClassId, room: RoomIndex, period: PeriodIndex, duration: usize) -> Self {
        Self {
            id,
            room,
            period,
            duration,
            locked: false,
            display_label: String::new(),
            display_color: None,
        }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    /// First period after the class ends.
    pub fn end(&self) -> PeriodIndex {
        self.period + self.duration
    }

    /// True when room, period and duration all match `other`.
    pub fn same_slot(&self, other: &Assignment) -> bool {
        self.id == other.id
            && self.room == other.room
            && self.period == other.period
            && self.duration == other.duration
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "class {} in room {} at [{}, {})",
            self.id,
            self.room,
            self.period,
            self.end()
        )
    }
}

/// A candidate timetable: the placed classes plus the grid dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeTable {
    pub class_list: Vec<Assignment>,
    pub room_size: usize,
    pub period_size: usize,
}

impl TimeTable {
    /// An unsolved table: the grid dimensions and nothing placed yet.
    pub fn skeleton(room_size: usize, period_size: usize) -> Self {
        Self {
            class_list: Vec::new(),
            room_size,
            period_size,
        }
    }

    pub fn get(&self, id: ClassId) -> Option<&Assignment> {
        self.class_list.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: ClassId) -> Option<&mut Assignment> {
        self.class_list.iter_mut().find(|a| a.id == id)
    }

    pub fn locked(&self) -> impl Iterator<Item = &Assignment> {
        self.class_list.iter().filter(|a| a.locked)
    }
}

/// A physical room with a given capacity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Room {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Teacher {
    pub id: TeacherId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StudentGroup {
    pub id: StudentGroupId,
    pub name: String,
}

/// A class to be scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSpec {
    pub id: ClassId,
    pub name: String,
    pub duration: usize,
    #[serde(default)]
    pub teacher_ids: Vec<TeacherId>,
    #[serde(default)]
    pub student_group_ids: Vec<StudentGroupId>,
    #[serde(default)]
    pub num_of_students: usize,
}

/// Read-only lookup tables the timetable is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceData {
    pub rooms: Vec<Room>,
    pub periods: Vec<String>,
    #[serde(default = "default_periods_per_day")]
    pub periods_per_day: usize,
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub student_groups: Vec<StudentGroup>,
    #[serde(default)]
    pub classes: Vec<ClassSpec>,
}

fn default_periods_per_day() -> usize {
    5
}

impl ReferenceData {
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.iter().map(|r| r.name.clone()).collect()
    }

    pub fn class(&self, id: ClassId) -> Option<&ClassSpec> {
        self.classes.iter().find(|c| c.id == id)
    }

    /// Periods per day, never zero.
    pub fn day_length(&self) -> usize {
        self.periods_per_day.max(1)
    }

    pub fn skeleton(&self) -> TimeTable {
        TimeTable::skeleton(self.rooms.len(), self.periods.len())
    }
}

/// Describes a soft constraint that was not met in a timetable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub constraint_type: String,
    pub period: PeriodIndex,
    pub class_ids: Vec<ClassId>,
    pub description: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.constraint_type, self.description)
    }
}

/// Soft-constraint quality of a timetable. Lower penalty is better.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub penalty: f64,
    pub violations: Vec<Violation>,
}

/// The result of one generation step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    pub time_table: TimeTable,
    pub evaluation: Evaluation,
}
