//! Supervisor module tests.

mod runner_test;

/// Verify all public supervisor types are exported from the library.
#[test]
fn test_all_supervisor_types_exported() {
    use server_console::supervisor::{
        ProcessSupervisor, ShutdownOutcome, SupervisorError, SupervisorEvent, SupervisorEvents,
        SupervisorOptions, SupervisorState, SupervisorStateMachine, SupervisorStats,
        DEFAULT_SHUTDOWN_TIMEOUT,
    };

    let _ = SupervisorStateMachine::new();
    let _ = SupervisorOptions::default();
    let _ = SupervisorStats::default();
    assert_eq!(DEFAULT_SHUTDOWN_TIMEOUT.as_secs(), 10);

    let _: fn() -> SupervisorError = || SupervisorError::Closed;
    let _: fn(SupervisorOptions) -> (ProcessSupervisor, SupervisorEvents) = ProcessSupervisor::spawn;

    let _ = SupervisorEvent::StateChanged {
        from: SupervisorState::Stopped,
        to: SupervisorState::Starting,
    };
    assert!(ShutdownOutcome::GRACEFUL.graceful);
    assert!(ShutdownOutcome::FORCED.forced);
}
