use crate::data::{
    Assignment, ClassId, ClassSpec, Evaluation, PeriodIndex, ReferenceData, TimeTable, Violation,
};
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

pub const CAPACITY_WEIGHT: f64 = 2.0;
pub const TEACHER_WEIGHT: f64 = 3.0;
pub const STUDENT_WEIGHT: f64 = 3.0;
pub const STRADDLE_WEIGHT: f64 = 1.0;

/// True when a class starting at `period` runs past the end of its day.
pub fn straddles_days(period: PeriodIndex, duration: usize, day_length: usize) -> bool {
    period % day_length + duration > day_length
}

/// Number of conflicting pairs among `f` simultaneous classes.
pub fn clash_pairs(f: usize) -> f64 {
    let f = f as f64;
    f * (f - 1.0) / 2.0
}

/// Scores the soft constraints of `table` against `reference`.
///
/// The penalty starts at 1 so it can be used as a divisor.
pub fn evaluate(table: &TimeTable, reference: &ReferenceData) -> Evaluation {
    let classes: HashMap<ClassId, &ClassSpec> =
        reference.classes.iter().map(|c| (c.id, c)).collect();
    let day = reference.day_length();
    let mut penalty = 1.0;
    let mut violations = Vec::new();

    // who is busy when: (person, period) -> classes
    let mut teacher_busy: BTreeMap<(u64, PeriodIndex), Vec<ClassId>> = BTreeMap::new();
    let mut group_busy: BTreeMap<(u64, PeriodIndex), Vec<ClassId>> = BTreeMap::new();

    for a in &table.class_list {
        if straddles_days(a.period, a.duration, day) {
            penalty += STRADDLE_WEIGHT;
            violations.push(Violation {
                constraint_type: "Straddles Days".to_string(),
                period: a.period,
                class_ids: vec![a.id],
                description: format!(
                    "Class {} starts at period {} and runs past the end of the day ({} periods per day).",
                    a.id, a.period, day
                ),
            });
        }

        let Some(class) = classes.get(&a.id) else {
            continue;
        };

        if let Some(room) = reference.rooms.get(a.room) {
            if room.capacity < class.num_of_students {
                penalty += CAPACITY_WEIGHT;
                violations.push(Violation {
                    constraint_type: "Room Capacity".to_string(),
                    period: a.period,
                    class_ids: vec![a.id],
                    description: format!(
                        "Class {} has {} students but room {} holds {}.",
                        a.id, class.num_of_students, room.name, room.capacity
                    ),
                });
            }
        }

        for p in a.period..a.end() {
            for t in &class.teacher_ids {
                teacher_busy.entry((*t, p)).or_default().push(a.id);
            }
            for g in &class.student_group_ids {
                group_busy.entry((*g, p)).or_default().push(a.id);
            }
        }
    }

    for ((teacher, period), ids) in teacher_busy.into_iter().filter(|(_, v)| v.len() > 1) {
        penalty += clash_pairs(ids.len()) * TEACHER_WEIGHT;
        violations.push(Violation {
            constraint_type: "Teacher Clash".to_string(),
            period,
            description: format!(
                "Teacher {} is booked for classes {} in period {}.",
                teacher,
                ids.iter().join(", "),
                period
            ),
            class_ids: ids,
        });
    }
    for ((group, period), ids) in group_busy.into_iter().filter(|(_, v)| v.len() > 1) {
        penalty += clash_pairs(ids.len()) * STUDENT_WEIGHT;
        violations.push(Violation {
            constraint_type: "Student Group Clash".to_string(),
            period,
            description: format!(
                "Student group {} is booked for classes {} in period {}.",
                group,
                ids.iter().join(", "),
                period
            ),
            class_ids: ids,
        });
    }

    Evaluation {
        penalty,
        violations,
    }
}

/// Penalty of a single class placed at `assignment`, ignoring interactions with other classes.
pub fn placement_cost(assignment: &Assignment, class: &ClassSpec, reference: &ReferenceData) -> f64 {
    let mut cost = 0.0;
    if let Some(room) = reference.rooms.get(assignment.room) {
        if room.capacity < class.num_of_students {
            cost += CAPACITY_WEIGHT;
        }
    }
    if straddles_days(assignment.period, assignment.duration, reference.day_length()) {
        cost += STRADDLE_WEIGHT;
    }
    cost
}
