//! One generation step as a request/response cycle.
//!
//! `Idle -> AwaitingOptimizer -> Merging -> Idle`. A step hands the current
//! table (with its locks) to the optimizer, waits for a candidate, then merges
//! it: every locked class of the base must come back unchanged and the whole
//! candidate must validate, otherwise the previous table stays current.

use crate::data::{ClassId, TimeTable};
use crate::error::{OptimizerError, ProtocolError};
use crate::optimizer::Optimizer;
use crate::session::Session;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolState {
    #[default]
    Idle,
    AwaitingOptimizer,
    Merging,
}

#[derive(Debug, Default)]
pub struct GenerationProtocol {
    state: ProtocolState,
    base: Option<TimeTable>,
    committed: u64,
}

impl GenerationProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == ProtocolState::Idle
    }

    /// Number of steps whose candidate was committed.
    pub fn committed_steps(&self) -> u64 {
        self.committed
    }

    /// Fails with `StepInFlight` unless no step is outstanding.
    pub fn ensure_idle(&self) -> Result<(), ProtocolError> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(ProtocolError::StepInFlight)
        }
    }

    /// Starts a step and returns the base state to hand to the optimizer.
    pub fn begin(&mut self, session: &Session) -> Result<TimeTable, ProtocolError> {
        self.ensure_idle()?;
        let base = session.current();
        debug!(
            "Step started with {} classes, {} locked",
            base.class_list.len(),
            base.locked().count()
        );
        self.base = Some(base.clone());
        self.state = ProtocolState::AwaitingOptimizer;
        Ok(base)
    }

    /// Merges the optimizer's answer and returns to idle.
    ///
    /// Any failure leaves the session's table as it was before the step.
    pub fn complete(
        &mut self,
        session: &mut Session,
        response: Result<TimeTable, OptimizerError>,
    ) -> Result<TimeTable, ProtocolError> {
        if self.state != ProtocolState::AwaitingOptimizer {
            return Err(ProtocolError::NotAwaiting);
        }
        let base = self.base.take().unwrap_or_default();
        self.state = ProtocolState::Merging;
        let outcome = response
            .map_err(ProtocolError::from)
            .and_then(|candidate| merge(session, &base, candidate));
        self.state = ProtocolState::Idle;

        match &outcome {
            Ok(_) => {
                self.committed += 1;
                info!("Generation step {} committed", self.committed);
            }
            Err(e) => warn!("Generation step failed: {}", e),
        }
        outcome
    }

    /// Gives up on the outstanding step without touching the session.
    pub fn abort(&mut self) {
        if self.state == ProtocolState::AwaitingOptimizer {
            warn!("Generation step aborted");
            self.base = None;
            self.state = ProtocolState::Idle;
        }
    }

    /// Runs a whole step against `optimizer`.
    pub async fn step<O: Optimizer>(
        &mut self,
        session: &mut Session,
        optimizer: &mut O,
        timeout: Option<Duration>,
    ) -> Result<TimeTable, ProtocolError> {
        let base = self.begin(session)?;
        let response = consult(optimizer, &base, timeout).await;
        self.complete(session, response)
    }
}

/// Submits `base` and asks for one refinement, giving up after `timeout`.
pub async fn consult<O: Optimizer>(
    optimizer: &mut O,
    base: &TimeTable,
    timeout: Option<Duration>,
) -> Result<TimeTable, OptimizerError> {
    let exchange = async {
        optimizer.submit(base).await?;
        optimizer.advance().await
    };
    match timeout {
        Some(limit) => tokio::time::timeout(limit, exchange)
            .await
            .unwrap_or(Err(OptimizerError::Timeout)),
        None => exchange.await,
    }
}

/// Fails with the first class locked in `base` that `candidate` moved or dropped.
pub fn check_locks(base: &TimeTable, candidate: &TimeTable) -> Result<(), ProtocolError> {
    for pinned in base.locked() {
        match candidate.get(pinned.id) {
            Some(a) if a.same_slot(pinned) => {}
            _ => return Err(ProtocolError::LockViolated(pinned.id)),
        }
    }
    Ok(())
}

fn merge(
    session: &mut Session,
    base: &TimeTable,
    mut candidate: TimeTable,
) -> Result<TimeTable, ProtocolError> {
    check_locks(base, &candidate)?;
    // lock flags belong to the user, not the optimizer
    let pinned: HashSet<ClassId> = base.locked().map(|a| a.id).collect();
    for a in &mut candidate.class_list {
        a.locked = pinned.contains(&a.id);
    }
    Ok(session.replace(candidate)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Assignment;
    use crate::error::{ConflictError, ValidationError};
    use std::collections::VecDeque;

    /// Replays canned answers and records what it was given.
    #[derive(Default)]
    struct Scripted {
        answers: VecDeque<Result<TimeTable, OptimizerError>>,
        submitted: Vec<TimeTable>,
        delay: Option<Duration>,
    }

    impl Scripted {
        fn answering(answers: Vec<Result<TimeTable, OptimizerError>>) -> Self {
            Self {
                answers: answers.into(),
                ..Self::default()
            }
        }
    }

    impl Optimizer for Scripted {
        async fn submit(&mut self, base: &TimeTable) -> Result<(), OptimizerError> {
            self.submitted.push(base.clone());
            Ok(())
        }

        async fn advance(&mut self) -> Result<TimeTable, OptimizerError> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.answers
                .pop_front()
                .unwrap_or(Err(OptimizerError::Unavailable("script exhausted".into())))
        }
    }

    fn grid(classes: Vec<Assignment>) -> TimeTable {
        TimeTable {
            class_list: classes,
            room_size: 3,
            period_size: 5,
        }
    }

    fn session_with(classes: Vec<Assignment>) -> Session {
        let mut s = Session::new();
        s.replace(grid(classes)).unwrap();
        s
    }

    #[tokio::test]
    async fn valid_candidate_is_committed() {
        let mut session = session_with(vec![]);
        let candidate = grid(vec![Assignment::new(1, 0, 0, 2), Assignment::new(2, 1, 0, 2)]);
        let mut opt = Scripted::answering(vec![Ok(candidate.clone())]);
        let mut protocol = GenerationProtocol::new();

        let table = protocol.step(&mut session, &mut opt, None).await.unwrap();
        assert_eq!(table, candidate);
        assert_eq!(session.current(), candidate);
        assert!(protocol.is_idle());
        assert_eq!(protocol.committed_steps(), 1);
    }

    #[tokio::test]
    async fn empty_table_is_a_legal_base() {
        let mut session = Session::new();
        let mut opt = Scripted::answering(vec![Ok(TimeTable::default())]);
        let mut protocol = GenerationProtocol::new();
        protocol.step(&mut session, &mut opt, None).await.unwrap();
        assert_eq!(opt.submitted, vec![TimeTable::default()]);
    }

    #[tokio::test]
    async fn base_carries_lock_flags() {
        let mut session = session_with(vec![Assignment::new(1, 0, 0, 2).locked()]);
        let mut opt = Scripted::answering(vec![Ok(session.current())]);
        GenerationProtocol::new()
            .step(&mut session, &mut opt, None)
            .await
            .unwrap();
        assert!(opt.submitted[0].class_list[0].locked);
    }

    #[tokio::test]
    async fn overlapping_candidate_is_rejected_and_previous_kept() {
        let mut session = session_with(vec![Assignment::new(1, 0, 0, 2)]);
        let before = session.current();
        let bad = grid(vec![Assignment::new(1, 0, 0, 2), Assignment::new(2, 0, 1, 1)]);
        let mut opt = Scripted::answering(vec![Ok(bad)]);
        let mut protocol = GenerationProtocol::new();

        let err = protocol.step(&mut session, &mut opt, None).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Rejected(ValidationError::Conflict(ConflictError::new(1, 2, 0)))
        );
        assert_eq!(session.current(), before);
        assert!(protocol.is_idle());
        assert_eq!(protocol.committed_steps(), 0);
    }

    #[tokio::test]
    async fn moving_a_locked_class_is_rejected() {
        let mut session = session_with(vec![Assignment::new(1, 0, 0, 2).locked()]);
        let before = session.current();
        let moved = grid(vec![Assignment::new(1, 0, 1, 2).locked()]);
        let mut opt = Scripted::answering(vec![Ok(moved)]);

        let err = GenerationProtocol::new()
            .step(&mut session, &mut opt, None)
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::LockViolated(1));
        assert_eq!(session.current(), before);
    }

    #[tokio::test]
    async fn dropping_a_locked_class_is_rejected() {
        let mut session = session_with(vec![Assignment::new(1, 0, 0, 2).locked()]);
        let mut opt = Scripted::answering(vec![Ok(grid(vec![]))]);
        let err = GenerationProtocol::new()
            .step(&mut session, &mut opt, None)
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::LockViolated(1));
    }

    #[tokio::test]
    async fn lock_flags_follow_the_base() {
        let mut session = session_with(vec![Assignment::new(1, 0, 0, 2).locked()]);
        // optimizer forgets the flag on 1 and invents one on 2
        let candidate = grid(vec![Assignment::new(1, 0, 0, 2), Assignment::new(2, 1, 0, 1).locked()]);
        let mut opt = Scripted::answering(vec![Ok(candidate)]);
        let table = GenerationProtocol::new()
            .step(&mut session, &mut opt, None)
            .await
            .unwrap();
        assert!(table.get(1).unwrap().locked);
        assert!(!table.get(2).unwrap().locked);
    }

    #[tokio::test]
    async fn optimizer_error_is_surfaced_verbatim() {
        let mut session = session_with(vec![Assignment::new(1, 0, 0, 2)]);
        let before = session.current();
        let mut opt =
            Scripted::answering(vec![Err(OptimizerError::Unavailable("down".into()))]);
        let mut protocol = GenerationProtocol::new();

        let err = protocol.step(&mut session, &mut opt, None).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Optimizer(OptimizerError::Unavailable("down".into()))
        );
        assert_eq!(session.current(), before);
        assert!(protocol.is_idle());
    }

    #[tokio::test]
    async fn slow_optimizer_times_out_and_keeps_table() {
        let mut session = session_with(vec![Assignment::new(1, 0, 0, 2)]);
        let before = session.current();
        let mut opt = Scripted {
            answers: VecDeque::from(vec![Ok(grid(vec![]))]),
            delay: Some(Duration::from_secs(5)),
            ..Scripted::default()
        };
        let mut protocol = GenerationProtocol::new();

        let err = protocol
            .step(&mut session, &mut opt, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::Optimizer(OptimizerError::Timeout));
        assert_eq!(session.current(), before);
        assert!(protocol.is_idle());
    }

    #[test]
    fn second_begin_is_a_caller_error() {
        let session = Session::new();
        let mut protocol = GenerationProtocol::new();
        protocol.begin(&session).unwrap();
        assert_eq!(protocol.state(), ProtocolState::AwaitingOptimizer);
        assert_eq!(protocol.begin(&session), Err(ProtocolError::StepInFlight));
        assert_eq!(protocol.ensure_idle(), Err(ProtocolError::StepInFlight));
    }

    #[test]
    fn complete_without_begin_is_rejected() {
        let mut session = Session::new();
        let mut protocol = GenerationProtocol::new();
        assert_eq!(
            protocol.complete(&mut session, Ok(TimeTable::default())),
            Err(ProtocolError::NotAwaiting)
        );
    }

    #[test]
    fn abort_returns_to_idle() {
        let session = session_with(vec![Assignment::new(1, 0, 0, 2)]);
        let mut protocol = GenerationProtocol::new();
        protocol.begin(&session).unwrap();
        protocol.abort();
        assert!(protocol.is_idle());
        assert!(protocol.begin(&session).is_ok());
    }
}
