use super::Optimizer;
use crate::data::{Assignment, ClassId, LOCKED_COLOR, PeriodIndex, ReferenceData, RoomIndex, TimeTable};
use crate::error::OptimizerError;
use crate::score::placement_cost;
use good_lp::variable;
use good_lp::{
    Expression, ProblemVariables, Solution, SolverModel, Variable, constraint, default_solver,
};
use itertools::Itertools;
use log::{info, trace};
use std::collections::HashMap;
use std::time::Instant;

/// A possible placement: (class index, room, start period, duration).
type Candidate = (usize, RoomIndex, PeriodIndex, usize);

/// Exact backend: solves the whole placement as a binary program with HiGHS.
///
/// Teacher and student group clashes are hard constraints here, capacity and
/// day straddling are minimised. Every `advance` re-solves from scratch, so
/// repeated steps return the same optimum unless the pins change.
pub struct IlpOptimizer {
    reference: ReferenceData,
    locked: Vec<Assignment>,
}

impl IlpOptimizer {
    pub fn new(reference: ReferenceData) -> Self {
        Self {
            reference,
            locked: Vec::new(),
        }
    }
}

impl Optimizer for IlpOptimizer {
    async fn submit(&mut self, base: &TimeTable) -> Result<(), OptimizerError> {
        self.locked = base.locked().cloned().collect();
        Ok(())
    }

    async fn advance(&mut self) -> Result<TimeTable, OptimizerError> {
        let reference = self.reference.clone();
        let locked = self.locked.clone();
        tokio::task::spawn_blocking(move || solve(&reference, &locked))
            .await
            .map_err(|e| OptimizerError::Unavailable(format!("solver task failed: {}", e)))?
    }
}

/// Solves the placement problem, keeping every class in `locked` at its slot.
pub fn solve(reference: &ReferenceData, locked: &[Assignment]) -> Result<TimeTable, OptimizerError> {
    let start_time = Instant::now();
    let periods = reference.periods.len();
    let pinned: HashMap<ClassId, &Assignment> = locked.iter().map(|a| (a.id, a)).collect();

    info!(
        "Setting up ILP model with {} classes, {} rooms, {} periods and {} pinned classes...",
        reference.classes.len(),
        reference.rooms.len(),
        periods,
        pinned.len()
    );
    let mut problem = ProblemVariables::new();

    // x_crp = 1 if class c starts in room r at period p
    let mut candidates: Vec<Candidate> = Vec::new();
    for (c, class) in reference.classes.iter().enumerate() {
        if let Some(a) = pinned.get(&class.id) {
            candidates.push((c, a.room, a.period, a.duration));
            continue;
        }
        if class.duration == 0 {
            return Err(OptimizerError::Unavailable(format!(
                "class {} has zero duration",
                class.id
            )));
        }
        for room in 0..reference.rooms.len() {
            for start in 0..(periods + 1).saturating_sub(class.duration) {
                candidates.push((c, room, start, class.duration));
            }
        }
    }
    trace!(
        "Generated {} placement variables for {} classes.",
        candidates.len(),
        reference.classes.len()
    );

    let by_class: HashMap<usize, Vec<usize>> = candidates
        .iter()
        .enumerate()
        .map(|(i, (c, ..))| (*c, i))
        .into_group_map();
    if let Some(class) = reference
        .classes
        .iter()
        .enumerate()
        .find(|(c, _)| !by_class.contains_key(c))
        .map(|(_, class)| class)
    {
        return Err(OptimizerError::NoFeasibleSlot(class.id));
    }

    let vars: Vec<Variable> = problem.add_vector(variable().binary(), candidates.len());

    let objective: Expression = candidates
        .iter()
        .zip(&vars)
        .map(|(&(c, room, start, duration), var)| {
            let class = &reference.classes[c];
            let cost = placement_cost(&Assignment::new(class.id, room, start, duration), class, reference);
            cost * *var
        })
        .sum();
    info!("Objective defined with capacity and day-straddle penalties.");

    let mut model = problem
        .minimise(objective)
        .using(default_solver)
        .set_option("threads", 1) // limit to 1 thread for reproducibility
        .set_option("random_seed", 1234)
        .set_option("log_to_console", "false");

    let busy_at = |indexes: &[usize], k: PeriodIndex| -> Vec<Variable> {
        indexes
            .iter()
            .filter(|&&i| {
                let (_, _, start, duration) = candidates[i];
                k >= start && k < start + duration
            })
            .map(|&i| vars[i])
            .collect()
    };

    info!("Adding 'class scheduled once' constraints...");
    for indexes in by_class.values() {
        let once: Expression = indexes.iter().map(|&i| vars[i]).sum();
        model.add_constraint(constraint!(once == 1));
    }

    info!("Adding 'no room overlap' constraints...");
    let by_room: HashMap<RoomIndex, Vec<usize>> = candidates
        .iter()
        .enumerate()
        .map(|(i, (_, room, ..))| (*room, i))
        .into_group_map();
    for indexes in by_room.values() {
        for k in 0..periods {
            let occupying = busy_at(indexes, k);
            if occupying.len() > 1 {
                let occupied: Expression = occupying.into_iter().sum();
                model.add_constraint(constraint!(occupied <= 1));
            }
        }
    }

    info!("Adding 'no teacher overlap' and 'no student group overlap' constraints...");
    let people = reference.classes.iter().enumerate().flat_map(|(c, class)| {
        let teachers = class.teacher_ids.iter().map(move |t| (("teacher", *t), c));
        let groups = class.student_group_ids.iter().map(move |g| (("group", *g), c));
        teachers.chain(groups)
    });
    let person_classes: HashMap<(&str, u64), Vec<usize>> = people.into_group_map();
    for classes in person_classes.values().filter(|cs| cs.len() > 1) {
        let indexes: Vec<usize> = classes
            .iter()
            .filter_map(|c| by_class.get(c))
            .flatten()
            .copied()
            .collect();
        for k in 0..periods {
            let busy = busy_at(&indexes, k);
            if busy.len() > 1 {
                let busy: Expression = busy.into_iter().sum();
                model.add_constraint(constraint!(busy <= 1));
            }
        }
    }

    info!("Starting ILP solver...");
    let solution = match model.solve() {
        Ok(s) => s,
        Err(e) => {
            return Err(OptimizerError::Unavailable(format!(
                "No solution found. The problem might be too constrained. Solver error: {}",
                e
            )));
        }
    };
    info!("Solution found in {:.2?}", start_time.elapsed());

    let class_list = candidates
        .iter()
        .zip(&vars)
        .filter(|(_, var)| solution.value(**var) > 0.9)
        .map(|(&(c, room, period, duration), _)| {
            let class = &reference.classes[c];
            let is_pinned = pinned.contains_key(&class.id);
            Assignment {
                id: class.id,
                room,
                period,
                duration,
                locked: is_pinned,
                display_label: class.name.clone(),
                display_color: is_pinned.then(|| LOCKED_COLOR.to_string()),
            }
        })
        .collect();

    Ok(TimeTable {
        class_list,
        room_size: reference.rooms.len(),
        period_size: periods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ClassSpec, Room};
    use crate::score::evaluate;
    use crate::validate::validate;

    fn reference() -> ReferenceData {
        let class = |id, duration, teacher, students| ClassSpec {
            id,
            name: format!("class {}", id),
            duration,
            teacher_ids: vec![teacher],
            student_group_ids: vec![],
            num_of_students: students,
        };
        ReferenceData {
            rooms: vec![
                Room { id: 1, name: "Hall".into(), capacity: 60 },
                Room { id: 2, name: "Lab".into(), capacity: 15 },
            ],
            periods: (1..=6).map(|p| p.to_string()).collect(),
            periods_per_day: 3,
            teachers: vec![],
            student_groups: vec![],
            classes: vec![class(1, 2, 1, 40), class(2, 1, 1, 10), class(3, 3, 2, 50)],
        }
    }

    #[test]
    fn solution_is_valid_and_clash_free() {
        let r = reference();
        let table = solve(&r, &[]).unwrap();
        assert_eq!(table.class_list.len(), 3);
        assert_eq!(validate(&table), Ok(()));
        let eval = evaluate(&table, &r);
        assert_eq!(eval.penalty, 1.0, "{:?}", eval.violations);
    }

    #[test]
    fn pinned_class_is_kept() {
        let r = reference();
        let pin = Assignment::new(2, 1, 5, 1).locked();
        let table = solve(&r, std::slice::from_ref(&pin)).unwrap();
        let a = table.get(2).unwrap();
        assert!(a.same_slot(&pin));
        assert!(a.locked);
        assert_eq!(validate(&table), Ok(()));
    }

    #[test]
    fn class_longer_than_grid_is_infeasible() {
        let mut r = reference();
        r.classes[0].duration = 7;
        assert_eq!(solve(&r, &[]), Err(OptimizerError::NoFeasibleSlot(1)));
    }
}
