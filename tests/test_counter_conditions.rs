mod common;

use std::sync::Arc;
use std::thread;

use phasegate::engine::{ConditionId, ConditionKind, ConditionPart, ConditionType, PartId, PartSpec};
use phasegate::fsm::{ConditionState, PartState, PhaseState};
use phasegate::strategy::StrategyFactory;
use proptest::prelude::*;

use common::{counter_condition, phase};

fn armed_part(reference: i64) -> Arc<ConditionPart> {
    let part = ConditionPart::new(PartSpec::counter_at_least(1, "hits", reference));
    let strategy = StrategyFactory::new().create(ConditionKind::Counter).unwrap();
    part.set_strategy(strategy).unwrap();
    part.activate().unwrap();
    part
}

#[test]
fn part_satisfies_on_the_call_that_crosses_the_reference() {
    let part = armed_part(5);

    assert_eq!(part.process(3).unwrap(), PartState::Processing);
    assert_eq!(part.current_value(), 3);

    assert_eq!(part.process(3).unwrap(), PartState::Satisfied);
    assert_eq!(part.current_value(), 6);
    assert!(part.is_clear());
    assert!(part.finish_time().is_some());
}

#[test]
fn processing_a_satisfied_part_is_rejected_and_does_not_count() {
    let part = armed_part(1);
    part.process(1).unwrap();

    let err = part.process(1).unwrap_err();
    assert!(err.is_invalid_transition());
    assert_eq!(part.current_value(), 1);
}

#[test]
fn concurrent_increments_are_not_lost() {
    const THREADS: i64 = 8;
    const CALLS: i64 = 250;
    let part = armed_part(THREADS * CALLS);

    let satisfied: usize = (0..THREADS)
        .map(|_| {
            let part = Arc::clone(&part);
            thread::spawn(move || {
                (0..CALLS)
                    .filter(|_| part.process(1).unwrap() == PartState::Satisfied)
                    .count()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .sum();

    assert_eq!(part.current_value(), THREADS * CALLS);
    assert_eq!(satisfied, 1);
    assert_eq!(part.state(), PartState::Satisfied);
}

#[test]
fn and_phase_waits_for_every_condition_in_any_order() {
    let orders: [[u32; 3]; 3] = [[1, 2, 3], [3, 1, 2], [2, 3, 1]];
    for order in orders {
        let conditions: Vec<_> = (1..=3).map(|id| counter_condition(id, &[1])).collect();
        let gate = phase(1, 1, ConditionType::And, conditions.clone());
        gate.activate().unwrap();

        for (i, id) in order.iter().enumerate() {
            assert_eq!(gate.state(), PhaseState::Active, "order {order:?} step {i}");
            let condition = gate.condition(ConditionId(*id)).unwrap();
            condition.part(PartId(1)).unwrap().process(1).unwrap();
            assert_eq!(condition.state(), ConditionState::Satisfied);
        }
        assert_eq!(gate.state(), PhaseState::Next, "order {order:?}");
        assert!(gate.is_clear());
    }
}

#[test]
fn or_phase_advances_on_the_first_condition() {
    let conditions = vec![counter_condition(1, &[5]), counter_condition(2, &[1])];
    let gate = phase(1, 1, ConditionType::Or, conditions);
    gate.activate().unwrap();

    gate.condition(ConditionId(2))
        .unwrap()
        .part(PartId(1))
        .unwrap()
        .process(1)
        .unwrap();

    assert_eq!(gate.state(), PhaseState::Next);
    assert_eq!(
        gate.condition(ConditionId(1)).unwrap().state(),
        ConditionState::Unsatisfied
    );
}

#[test]
fn multi_part_condition_needs_every_part() {
    let condition = counter_condition(1, &[2, 1]);
    condition.activate().unwrap();

    condition.part(PartId(2)).unwrap().process(1).unwrap();
    assert_eq!(condition.state(), ConditionState::Unsatisfied);
    assert_eq!(condition.satisfied_parts(), vec![PartId(2)]);

    condition.part(PartId(1)).unwrap().process(2).unwrap();
    assert_eq!(condition.state(), ConditionState::Satisfied);
}

#[test]
fn single_phase_rejects_more_than_one_condition() {
    let gate = phase(
        1,
        1,
        ConditionType::Single,
        vec![counter_condition(1, &[1]), counter_condition(2, &[1])],
    );
    assert!(gate.validate().is_err());
}

proptest! {
    #[test]
    fn gte_condition_tracks_the_running_sum(
        reference in 1i64..50,
        increments in proptest::collection::vec(0i64..10, 0..20),
    ) {
        let condition = counter_condition(1, &[reference]);
        condition.activate().unwrap();
        let part = condition.part(PartId(1)).unwrap();

        let mut sum = 0;
        for inc in increments {
            if sum >= reference {
                break;
            }
            part.process(inc).unwrap();
            sum += inc;
        }

        if sum >= reference {
            prop_assert_eq!(condition.state(), ConditionState::Satisfied);
        } else {
            prop_assert_eq!(condition.state(), ConditionState::Unsatisfied);
        }
        prop_assert_eq!(part.current_value(), sum);
    }
}
