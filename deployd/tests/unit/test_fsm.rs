//! FSM unit tests

use deployd::deploy::fsm::{is_valid_transition, DeploymentFsm, DeploymentTrigger};
use deployd::models::deployment::DeploymentStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentStatus::Pending);
    assert!(fsm.error().is_none());
    assert!(!fsm.is_terminal());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = DeploymentFsm::new();

    // Pending -> Building
    assert_eq!(fsm.process(DeploymentTrigger::Start).unwrap(), DeploymentStatus::Building);

    // Building -> Deploying
    assert_eq!(
        fsm.process(DeploymentTrigger::BuildSucceeded).unwrap(),
        DeploymentStatus::Deploying
    );

    // Deploying -> Running
    assert_eq!(
        fsm.process(DeploymentTrigger::DeploySucceeded).unwrap(),
        DeploymentStatus::Running
    );
    assert!(fsm.is_terminal());
}

#[test]
fn test_fsm_failure_from_every_active_state() {
    for setup in [
        vec![],
        vec![DeploymentTrigger::Start],
        vec![DeploymentTrigger::Start, DeploymentTrigger::BuildSucceeded],
    ] {
        let mut fsm = DeploymentFsm::new();
        for trigger in setup {
            fsm.process(trigger).unwrap();
        }

        fsm.process(DeploymentTrigger::Fail("boom".to_string())).unwrap();
        assert_eq!(fsm.state(), DeploymentStatus::Failed);
        assert_eq!(fsm.error(), Some("boom"));
    }
}

#[test]
fn test_fsm_terminal_states_accept_nothing() {
    let mut failed = DeploymentFsm::resume(DeploymentStatus::Failed);
    assert!(failed.process(DeploymentTrigger::Start).is_err());
    assert!(failed.process(DeploymentTrigger::Fail("again".to_string())).is_err());
    assert_eq!(failed.state(), DeploymentStatus::Failed);

    let mut running = DeploymentFsm::resume(DeploymentStatus::Running);
    assert!(running.process(DeploymentTrigger::Fail("late".to_string())).is_err());
    assert_eq!(running.state(), DeploymentStatus::Running);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = DeploymentFsm::new();

    // Cannot skip the build phase
    let err = fsm.process(DeploymentTrigger::BuildSucceeded).unwrap_err();
    assert_eq!(err.from, DeploymentStatus::Pending);
    assert_eq!(fsm.state(), DeploymentStatus::Pending);
}

#[test]
fn test_transition_table_matches_fsm() {
    use DeploymentStatus::*;
    let all = [Pending, Building, Deploying, Running, Failed];

    for from in all {
        for to in all {
            let expected = matches!(
                (from, to),
                (Pending, Building)
                    | (Building, Deploying)
                    | (Deploying, Running)
                    | (Pending, Failed)
                    | (Building, Failed)
                    | (Deploying, Failed)
            );
            assert_eq!(is_valid_transition(from, to), expected, "{} -> {}", from, to);
        }
    }
}
