//! Generation steps against the ant colony, checked against the table invariants.

use proptest::prelude::*;
use std::time::Duration;
use timetable_generator::config::ColonyConfig;
use timetable_generator::data::{ClassSpec, ReferenceData, Room, TimeTable};
use timetable_generator::error::{OptimizerError, ProtocolError};
use timetable_generator::optimizer::AntColony;
use timetable_generator::protocol::GenerationProtocol;
use timetable_generator::session::Session;
use timetable_generator::validate::validate;

fn reference(classes: usize) -> ReferenceData {
    sized_reference(3, 10, classes)
}

fn sized_reference(rooms: usize, periods: usize, classes: usize) -> ReferenceData {
    ReferenceData {
        rooms: (0..rooms as u64)
            .map(|i| Room {
                id: i,
                name: format!("R{}", i),
                capacity: 25,
            })
            .collect(),
        periods: (0..periods).map(|p| format!("P{}", p)).collect(),
        periods_per_day: 5,
        teachers: vec![],
        student_groups: vec![],
        classes: (0..classes as u64)
            .map(|id| ClassSpec {
                id,
                name: format!("C{}", id),
                duration: 1 + (id as usize % 3),
                teacher_ids: vec![id % 3],
                student_group_ids: vec![id % 2],
                num_of_students: 10 + 5 * id as usize,
            })
            .collect(),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn committed_steps_keep_locks_and_never_overlap(
        seed in any::<u64>(),
        classes in 1usize..8,
        lock_mask in any::<u8>(),
        steps in 1usize..4,
    ) {
        runtime().block_on(async {
            let reference = reference(classes);
            let config = ColonyConfig { seed: Some(seed), ..ColonyConfig::default() };
            let mut colony = AntColony::new(&reference, config).unwrap();
            let mut session = Session::with_reference(reference);
            let mut protocol = GenerationProtocol::new();

            let first = protocol.step(&mut session, &mut colony, None).await.unwrap();
            for a in &first.class_list {
                if lock_mask & (1 << (a.id % 8)) != 0 {
                    session.toggle_lock(a.id);
                }
            }
            let pinned: TimeTable = session.current();

            for _ in 0..steps {
                let table = protocol.step(&mut session, &mut colony, None).await.unwrap();
                prop_assert_eq!(validate(&table), Ok(()));
                for p in pinned.locked() {
                    let a = table.get(p.id).unwrap();
                    prop_assert!(a.same_slot(p));
                    prop_assert!(a.locked);
                }
            }
            prop_assert_eq!(protocol.committed_steps(), steps as u64 + 1);
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn empty_reference_steps_to_empty_table() {
    let reference = ReferenceData {
        rooms: vec![Room { id: 1, name: "A".into(), capacity: 10 }],
        periods: vec!["1".into()],
        ..ReferenceData::default()
    };
    let mut colony = AntColony::new(&reference, ColonyConfig::default()).unwrap();
    let mut session = Session::with_reference(reference);
    let table = GenerationProtocol::new()
        .step(&mut session, &mut colony, None)
        .await
        .unwrap();
    assert_eq!(table, TimeTable::skeleton(1, 1));
}

#[tokio::test]
async fn colony_step_honours_the_timeout() {
    let reference = sized_reference(20, 40, 200);
    let config = ColonyConfig {
        num_of_ants: 40,
        seed: Some(3),
        ..ColonyConfig::default()
    };
    let mut colony = AntColony::new(&reference, config).unwrap();
    let mut session = Session::with_reference(reference);
    let before = session.current();
    let mut protocol = GenerationProtocol::new();

    let err = protocol
        .step(&mut session, &mut colony, Some(Duration::from_millis(1)))
        .await
        .unwrap_err();
    assert_eq!(err, ProtocolError::Optimizer(OptimizerError::Timeout));
    assert_eq!(session.current(), before);
    assert!(protocol.is_idle());
    assert_eq!(protocol.committed_steps(), 0);
    // the cut-off iteration left no trace in the colony
    assert_eq!(colony.iterations(), 0);
    assert_eq!(colony.best_penalty(), None);
}
