//! Ant colony search over (class, room, period) placements.
//!
//! Each iteration sends `num_of_ants` ants through the classes in random
//! order. Locked classes are placed first at their pinned slot; every other
//! class picks a free contiguous slot with probability proportional to
//! `tau^alpha * (q / edge)^beta`, where `edge` is the penalty the placement
//! adds given what the ant has already placed. Trails then evaporate, each ant
//! deposits `q / penalty` on its choices, and the values are clamped to
//! `[tau_min, tau_max]`. The best timetable seen so far is what `advance`
//! returns.

use super::Optimizer;
use crate::config::ColonyConfig;
use crate::data::{
    Assignment, ClassId, ClassSpec, LOCKED_COLOR, PeriodIndex, ReferenceData, RoomIndex,
    TimeTable,
};
use crate::error::OptimizerError;
use crate::score::{
    CAPACITY_WEIGHT, STRADDLE_WEIGHT, STUDENT_WEIGHT, TEACHER_WEIGHT, clash_pairs, straddles_days,
};
use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    room: RoomIndex,
    period: PeriodIndex,
    duration: usize,
}

/// Static description of the search space plus the current pins.
#[derive(Debug, Clone)]
struct Problem {
    classes: Vec<ClassSpec>,
    // per class, dense teacher / student group indexes
    teachers: Vec<Vec<usize>>,
    groups: Vec<Vec<usize>>,
    capacities: Vec<usize>,
    num_teachers: usize,
    num_groups: usize,
    rooms: usize,
    periods: usize,
    day_length: usize,
    locked: Vec<Option<Slot>>,
}

fn dense_indexes(ids: &[u64], index: &mut HashMap<u64, usize>) -> Vec<usize> {
    ids.iter()
        .map(|id| {
            let next = index.len();
            *index.entry(*id).or_insert(next)
        })
        .collect()
}

impl Problem {
    fn new(reference: &ReferenceData) -> Result<Self, OptimizerError> {
        if let Some(class) = reference.classes.iter().find(|c| c.duration == 0) {
            return Err(OptimizerError::Unavailable(format!(
                "class {} has zero duration",
                class.id
            )));
        }
        let mut teacher_index = HashMap::new();
        let mut group_index = HashMap::new();
        let teachers = reference
            .classes
            .iter()
            .map(|c| dense_indexes(&c.teacher_ids, &mut teacher_index))
            .collect();
        let groups = reference
            .classes
            .iter()
            .map(|c| dense_indexes(&c.student_group_ids, &mut group_index))
            .collect();
        Ok(Self {
            classes: reference.classes.clone(),
            teachers,
            groups,
            capacities: reference.rooms.iter().map(|r| r.capacity).collect(),
            num_teachers: teacher_index.len(),
            num_groups: group_index.len(),
            rooms: reference.rooms.len(),
            periods: reference.periods.len(),
            day_length: reference.day_length(),
            locked: vec![None; reference.classes.len()],
        })
    }

    fn index_of(&self, id: ClassId) -> Option<usize> {
        self.classes.iter().position(|c| c.id == id)
    }

    /// Penalty of `class` at `slot` that does not depend on other classes.
    fn placement_cost(&self, class: usize, slot: Slot) -> f64 {
        let mut cost = 0.0;
        if self.capacities[slot.room] < self.classes[class].num_of_students {
            cost += CAPACITY_WEIGHT;
        }
        if straddles_days(slot.period, slot.duration, self.day_length) {
            cost += STRADDLE_WEIGHT;
        }
        cost
    }
}

/// Pheromone per (class, room, start period).
#[derive(Debug, Clone)]
struct Trails {
    tau: Vec<f64>,
    rooms: usize,
    periods: usize,
}

impl Trails {
    fn new(classes: usize, rooms: usize, periods: usize, initial: f64) -> Self {
        Self {
            tau: vec![initial; classes * rooms * periods],
            rooms,
            periods,
        }
    }

    #[inline]
    fn idx(&self, class: usize, room: RoomIndex, period: PeriodIndex) -> usize {
        (class * self.rooms + room) * self.periods + period
    }

    fn get(&self, class: usize, room: RoomIndex, period: PeriodIndex) -> f64 {
        self.tau[self.idx(class, room, period)]
    }

    fn evaporate(&mut self, rou: f64) {
        self.tau.iter_mut().for_each(|t| *t *= 1.0 - rou);
    }

    fn deposit(&mut self, class: usize, room: RoomIndex, period: PeriodIndex, amount: f64) {
        let i = self.idx(class, room, period);
        self.tau[i] += amount;
    }

    fn clamp(&mut self, min: f64, max: f64) {
        self.tau.iter_mut().for_each(|t| *t = t.clamp(min, max));
    }

    /// Share of the class's total pheromone sitting on this slot.
    fn share(&self, class: usize, room: RoomIndex, period: PeriodIndex) -> f64 {
        let start = self.idx(class, 0, 0);
        let total: f64 = self.tau[start..start + self.rooms * self.periods].iter().sum();
        if total > 0.0 {
            self.get(class, room, period) / total
        } else {
            0.0
        }
    }

    /// Magenta shade, stronger for slots the colony favours.
    fn color(&self, class: usize, room: RoomIndex, period: PeriodIndex) -> String {
        let shade = (255.0 - self.share(class, room, period) * 255.0) as u8;
        format!("#ff{:02x}{:02x}ff", shade, shade)
    }
}

#[derive(Debug, Clone)]
struct Ant {
    placement: Vec<Option<Slot>>,
    // rooms x periods
    occupied: Vec<bool>,
    // teachers x periods, groups x periods
    teacher_load: Vec<usize>,
    group_load: Vec<usize>,
    penalty: f64,
}

impl Ant {
    fn new(problem: &Problem) -> Self {
        Self {
            placement: vec![None; problem.classes.len()],
            occupied: vec![false; problem.rooms * problem.periods],
            teacher_load: vec![0; problem.num_teachers * problem.periods],
            group_load: vec![0; problem.num_groups * problem.periods],
            penalty: f64::INFINITY,
        }
    }

    fn is_free(&self, problem: &Problem, room: RoomIndex, start: PeriodIndex, duration: usize) -> bool {
        let base = room * problem.periods;
        self.occupied[base + start..base + start + duration]
            .iter()
            .all(|o| !o)
    }

    fn allocate(&mut self, problem: &Problem, class: usize, slot: Slot) {
        self.placement[class] = Some(slot);
        for p in slot.period..slot.period + slot.duration {
            self.occupied[slot.room * problem.periods + p] = true;
            for t in &problem.teachers[class] {
                self.teacher_load[t * problem.periods + p] += 1;
            }
            for g in &problem.groups[class] {
                self.group_load[g * problem.periods + p] += 1;
            }
        }
    }

    /// Penalty added by placing `class` at `slot` on top of what is already placed.
    fn edge_length(&self, problem: &Problem, class: usize, slot: Slot) -> f64 {
        let mut edge = 1.0 + problem.placement_cost(class, slot);
        for p in slot.period..slot.period + slot.duration {
            for t in &problem.teachers[class] {
                edge += self.teacher_load[t * problem.periods + p] as f64 * TEACHER_WEIGHT;
            }
            for g in &problem.groups[class] {
                edge += self.group_load[g * problem.periods + p] as f64 * STUDENT_WEIGHT;
            }
        }
        edge
    }

    fn total_penalty(&self, problem: &Problem) -> f64 {
        let placements: f64 = self
            .placement
            .iter()
            .enumerate()
            .filter_map(|(c, slot)| slot.map(|s| problem.placement_cost(c, s)))
            .sum();
        let teachers: f64 = self.teacher_load.iter().map(|f| clash_pairs(*f)).sum();
        let groups: f64 = self.group_load.iter().map(|f| clash_pairs(*f)).sum();
        1.0 + placements + teachers * TEACHER_WEIGHT + groups * STUDENT_WEIGHT
    }

    fn construct(
        problem: &Problem,
        trails: &Trails,
        config: &ColonyConfig,
        rng: &mut StdRng,
    ) -> Result<Ant, OptimizerError> {
        let mut ant = Ant::new(problem);
        for (class, slot) in problem.locked.iter().enumerate() {
            if let Some(slot) = slot {
                ant.allocate(problem, class, *slot);
            }
        }

        let mut order: Vec<usize> = (0..problem.classes.len())
            .filter(|c| problem.locked[*c].is_none())
            .collect();
        order.shuffle(rng);

        let mut candidates = Vec::new();
        let mut weights = Vec::new();
        for class in order {
            let duration = problem.classes[class].duration;
            candidates.clear();
            weights.clear();
            for room in 0..problem.rooms {
                for period in 0..(problem.periods + 1).saturating_sub(duration) {
                    if !ant.is_free(problem, room, period, duration) {
                        continue;
                    }
                    let slot = Slot {
                        room,
                        period,
                        duration,
                    };
                    let heuristic = config.q / ant.edge_length(problem, class, slot);
                    weights.push(
                        trails.get(class, room, period).powf(config.alpha)
                            * heuristic.powf(config.beta),
                    );
                    candidates.push(slot);
                }
            }
            if candidates.is_empty() {
                return Err(OptimizerError::NoFeasibleSlot(problem.classes[class].id));
            }
            let pick = if rng.random::<f64>() < config.ant_prob_random {
                rng.random_range(0..candidates.len())
            } else {
                roulette(&weights, rng)
            };
            ant.allocate(problem, class, candidates[pick]);
        }
        ant.penalty = ant.total_penalty(problem);
        Ok(ant)
    }
}

/// Picks an index with probability proportional to its weight.
fn roulette(weights: &[f64], rng: &mut StdRng) -> usize {
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return rng.random_range(0..weights.len());
    }
    let target = rng.random::<f64>() * total;
    let mut acc = 0.0;
    for (i, w) in weights.iter().enumerate() {
        acc += w;
        if acc > target {
            return i;
        }
    }
    weights.len() - 1
}

/// In-process ant colony optimizer.
pub struct AntColony {
    config: ColonyConfig,
    problem: Problem,
    trails: Trails,
    best: Option<Ant>,
    rng: StdRng,
    iterations: usize,
}

impl AntColony {
    pub fn new(reference: &ReferenceData, config: ColonyConfig) -> Result<Self, OptimizerError> {
        config.validate().map_err(OptimizerError::Unavailable)?;
        let problem = Problem::new(reference)?;
        let trails = Trails::new(
            problem.classes.len(),
            problem.rooms,
            problem.periods,
            config.tau_max,
        );
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            config,
            problem,
            trails,
            best: None,
            rng,
            iterations: 0,
        })
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Penalty of the best timetable found since the lock set last changed.
    pub fn best_penalty(&self) -> Option<f64> {
        self.best.as_ref().map(|a| a.penalty)
    }

    fn apply_locks(&mut self, base: &TimeTable) {
        let mut locked = vec![None; self.problem.classes.len()];
        for a in base.locked() {
            let fits = a.duration > 0 && a.room < self.problem.rooms && a.end() <= self.problem.periods;
            match self.problem.index_of(a.id) {
                Some(class) if fits => {
                    locked[class] = Some(Slot {
                        room: a.room,
                        period: a.period,
                        duration: a.duration,
                    })
                }
                Some(_) => warn!("Locked {} does not fit the colony grid, ignoring", a),
                None => warn!("Locked class {} is unknown to the colony, ignoring", a.id),
            }
        }
        if locked != self.problem.locked {
            debug!("Lock set changed; discarding best-so-far timetable");
            self.best = None;
            self.problem.locked = locked;
        }
    }

    fn construct_ant(&mut self) -> Result<Ant, OptimizerError> {
        Ant::construct(&self.problem, &self.trails, &self.config, &mut self.rng)
    }

    /// Runs one colony iteration.
    pub fn run_once(&mut self) -> Result<(), OptimizerError> {
        let mut ants = Vec::with_capacity(self.config.num_of_ants);
        for _ in 0..self.config.num_of_ants {
            ants.push(self.construct_ant()?);
        }
        self.absorb(ants);
        Ok(())
    }

    /// Same as `run_once`, yielding to the runtime after every ant.
    ///
    /// Trails and the best-so-far ant are only touched once all ants exist, so
    /// dropping the future part way leaves the colony as it was.
    async fn run_once_yielding(&mut self) -> Result<(), OptimizerError> {
        let mut ants = Vec::with_capacity(self.config.num_of_ants);
        for _ in 0..self.config.num_of_ants {
            ants.push(self.construct_ant()?);
            tokio::task::yield_now().await;
        }
        self.absorb(ants);
        Ok(())
    }

    fn absorb(&mut self, ants: Vec<Ant>) {
        self.trails.evaporate(self.config.rou);
        for ant in &ants {
            let amount = self.config.q / ant.penalty;
            for (class, slot) in ant.placement.iter().enumerate() {
                if let Some(s) = slot {
                    self.trails.deposit(class, s.room, s.period, amount);
                }
            }
        }
        self.trails.clamp(self.config.tau_min, self.config.tau_max);

        if let Some(ant) = ants.into_iter().min_by(|a, b| a.penalty.total_cmp(&b.penalty)) {
            trace!("iteration {} best penalty {}", self.iterations, ant.penalty);
            if self.best.as_ref().is_none_or(|b| ant.penalty < b.penalty) {
                debug!("New best timetable with penalty {}", ant.penalty);
                self.best = Some(ant);
            }
        }
        self.iterations += 1;
    }

    fn to_time_table(&self, ant: &Ant) -> TimeTable {
        let class_list = ant
            .placement
            .iter()
            .enumerate()
            .filter_map(|(class, slot)| {
                let slot = (*slot)?;
                let spec = &self.problem.classes[class];
                let locked = self.problem.locked[class].is_some();
                let color = if locked {
                    LOCKED_COLOR.to_string()
                } else {
                    self.trails.color(class, slot.room, slot.period)
                };
                Some(Assignment {
                    id: spec.id,
                    room: slot.room,
                    period: slot.period,
                    duration: slot.duration,
                    locked,
                    display_label: spec.name.clone(),
                    display_color: Some(color),
                })
            })
            .collect();
        TimeTable {
            class_list,
            room_size: self.problem.rooms,
            period_size: self.problem.periods,
        }
    }
}

impl Optimizer for AntColony {
    async fn submit(&mut self, base: &TimeTable) -> Result<(), OptimizerError> {
        self.apply_locks(base);
        Ok(())
    }

    async fn advance(&mut self) -> Result<TimeTable, OptimizerError> {
        self.run_once_yielding().await?;
        let best = self
            .best
            .as_ref()
            .ok_or_else(|| OptimizerError::Unavailable("colony produced no timetable".into()))?;
        Ok(self.to_time_table(best))
    }
}
