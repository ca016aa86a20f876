mod common;

use std::time::Duration;

use phasegate::engine::{ConditionId, ConditionType, PartId};
use phasegate::fsm::{ConditionState, PartState, PhaseState};

use common::{phase, time_condition};

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn and_phase_of_three_timers_reaches_next_after_the_longest() {
    let gate = phase(
        1,
        1,
        ConditionType::And,
        vec![time_condition(1, 1), time_condition(2, 2), time_condition(3, 3)],
    );
    gate.activate().unwrap();

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    settle().await;
    assert_eq!(
        gate.condition(ConditionId(1)).unwrap().state(),
        ConditionState::Satisfied
    );
    assert_eq!(gate.state(), PhaseState::Active);

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    settle().await;
    for id in 1..=3 {
        assert_eq!(
            gate.condition(ConditionId(id)).unwrap().state(),
            ConditionState::Satisfied,
            "condition {id}"
        );
    }
    assert_eq!(gate.state(), PhaseState::Next);
    assert!(gate.is_clear());
}

#[tokio::test(start_paused = true)]
async fn or_phase_fires_on_the_shortest_timer() {
    let gate = phase(
        1,
        1,
        ConditionType::Or,
        vec![time_condition(1, 5), time_condition(2, 1)],
    );
    gate.activate().unwrap();

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    settle().await;
    assert_eq!(gate.state(), PhaseState::Next);
    assert_eq!(
        gate.condition(ConditionId(1)).unwrap().state(),
        ConditionState::Unsatisfied
    );

    // The losing timer was halted when the phase left active.
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(
        gate.condition(ConditionId(1)).unwrap().state(),
        ConditionState::Unsatisfied
    );
}

#[tokio::test(start_paused = true)]
async fn reset_stops_running_timers() {
    let gate = phase(1, 1, ConditionType::And, vec![time_condition(1, 2)]);
    gate.activate().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    gate.reset().unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    let part = gate
        .condition(ConditionId(1))
        .unwrap()
        .part(PartId(1))
        .unwrap();
    assert_eq!(part.state(), PartState::Ready);
    assert_eq!(gate.state(), PhaseState::Ready);
}

#[test]
fn time_part_outside_a_runtime_stays_unsatisfied() {
    let gate = phase(1, 1, ConditionType::And, vec![time_condition(1, 1)]);
    gate.activate().unwrap();
    let part = gate
        .condition(ConditionId(1))
        .unwrap()
        .part(PartId(1))
        .unwrap();
    assert_eq!(part.state(), PartState::Unsatisfied);
    assert!(part.process(1).is_err());
}
