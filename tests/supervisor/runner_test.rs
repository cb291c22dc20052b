//! Integration tests for the process supervisor.

use server_console::supervisor::{SupervisorError, SupervisorState};

#[test]
fn supervisor_error_display() {
    let errors = [
        SupervisorError::Closed,
        SupervisorError::NotRunning {
            state: SupervisorState::Crashed,
        },
        SupervisorError::AlreadyRunning {
            state: SupervisorState::Running,
        },
        SupervisorError::WriteFailed(std::io::ErrorKind::BrokenPipe.into()),
    ];

    for err in errors {
        let display = format!("{err}");
        assert!(!display.is_empty());
    }
}

#[test]
fn not_running_names_state() {
    let err = SupervisorError::NotRunning {
        state: SupervisorState::Stopping,
    };
    assert!(err.to_string().contains("stopping"));
}

#[cfg(unix)]
mod unix {
    use std::path::Path;
    use std::time::Duration;

    use server_console::console::{LaunchTarget, LineOrigin, OutputCategory};
    use server_console::supervisor::{
        ProcessSupervisor, ShutdownOutcome, SupervisorError, SupervisorEvent, SupervisorOptions,
        SupervisorState,
    };

    use crate::common::{child_output, collect_until_rest, write_script};

    const SETTLE: Duration = Duration::from_secs(10);

    /// Exits cleanly when it reads `stop`, echoing everything else.
    const OBEDIENT: &str = r#"echo "[INFO] Done"
while read line; do
  if [ "$line" = "stop" ]; then
    echo "Stopping the server"
    exit 0
  fi
  echo "got $line"
done"#;

    /// Records its pid and ignores input.
    const STUBBORN: &str = "echo $$ > server.pid\nwhile true; do sleep 1; done";

    fn supervisor() -> (ProcessSupervisor, server_console::supervisor::SupervisorEvents) {
        ProcessSupervisor::spawn(SupervisorOptions::default())
    }

    async fn wait_for_pid(dir: &Path) -> i32 {
        let path = dir.join("server.pid");
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(&path) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("server never wrote its pid");
    }

    fn is_alive(pid: i32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }

    fn state_changes(events: &[SupervisorEvent]) -> Vec<(SupervisorState, SupervisorState)> {
        events
            .iter()
            .filter_map(|e| match e {
                SupervisorEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn start_runs_server_from_launch_target() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "start.sh", OBEDIENT);
        let target = LaunchTarget::find_in(dir.path(), None).unwrap();

        let (supervisor, mut events) = supervisor();
        let mut state = supervisor.subscribe_state();
        supervisor.start_target(&target).await.unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(*state.borrow_and_update(), SupervisorState::Running);

        let outcome = supervisor.request_shutdown(SETTLE).await;
        assert_eq!(outcome, ShutdownOutcome::GRACEFUL);

        let seen = events.drain();
        assert_eq!(
            state_changes(&seen),
            [
                (SupervisorState::Stopped, SupervisorState::Starting),
                (SupervisorState::Starting, SupervisorState::Running),
                (SupervisorState::Running, SupervisorState::Stopping),
                (SupervisorState::Stopping, SupervisorState::Stopped),
            ]
        );
        assert!(child_output(&seen).contains("[INFO] Done"));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", OBEDIENT);

        let (supervisor, _events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();

        let err = supervisor.start(&script, dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::AlreadyRunning {
                state: SupervisorState::Running
            }
        ));
        assert_eq!(supervisor.stats().await.unwrap().starts, 1);

        supervisor.close(SETTLE).await;
    }

    #[tokio::test]
    async fn commands_reach_server_and_are_echoed() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", OBEDIENT);

        let (supervisor, mut events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();
        supervisor.submit_command("list").await.unwrap();
        supervisor.submit_command("").await.unwrap();

        let outcome = supervisor.request_shutdown(SETTLE).await;
        assert_eq!(outcome, ShutdownOutcome::GRACEFUL);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        let seen = events.drain();
        let echoes: Vec<_> = seen
            .iter()
            .filter_map(SupervisorEvent::as_line)
            .filter(|l| l.origin == LineOrigin::Echo)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(echoes, ["> list", "> stop"]);

        let output = child_output(&seen);
        assert!(output.contains("got list\n"));
        assert!(output.contains("Stopping the server\n"));
        assert!(!output.contains("got \n"));
        assert!(seen.contains(&SupervisorEvent::Exited {
            code: Some(0),
            expected: true,
        }));
    }

    #[tokio::test]
    async fn multiline_command_is_rejected_whole() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", OBEDIENT);

        let (supervisor, mut events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();

        let err = supervisor.submit_command("say hi\nstop").await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidCommand));
        assert_eq!(supervisor.state(), SupervisorState::Running);
        supervisor.submit_command("list").await.unwrap();

        let outcome = supervisor.request_shutdown(SETTLE).await;
        assert_eq!(outcome, ShutdownOutcome::GRACEFUL);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        let seen = events.drain();
        let output = child_output(&seen);
        assert!(output.contains("got list\n"));
        assert!(!output.contains("got say hi"));
        assert!(!state_changes(&seen).contains(&(SupervisorState::Running, SupervisorState::Crashed)));

        let errors: Vec<_> = seen
            .iter()
            .filter_map(SupervisorEvent::as_line)
            .filter(|l| l.origin == LineOrigin::Supervisor && l.category == OutputCategory::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].text.contains("single line"));
    }

    #[tokio::test]
    async fn unresponsive_server_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", STUBBORN);

        let (supervisor, mut events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();
        let pid = wait_for_pid(dir.path()).await;
        assert!(is_alive(pid));

        let outcome = supervisor
            .request_shutdown(Duration::from_millis(300))
            .await;
        assert_eq!(outcome, ShutdownOutcome::FORCED);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(!is_alive(pid));

        let stats = supervisor.stats().await.unwrap();
        assert_eq!(stats.forced_stops, 1);
        assert_eq!(stats.crashes, 0);

        let seen = events.drain();
        assert_eq!(
            state_changes(&seen).last(),
            Some(&(SupervisorState::Stopping, SupervisorState::Stopped))
        );
    }

    #[tokio::test]
    async fn concurrent_shutdowns_share_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", STUBBORN);

        let (supervisor, _events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();
        wait_for_pid(dir.path()).await;

        let timeout = Duration::from_millis(300);
        let (first, second) = tokio::join!(
            supervisor.request_shutdown(timeout),
            supervisor.request_shutdown(timeout)
        );
        assert_eq!(first, ShutdownOutcome::FORCED);
        assert_eq!(second, ShutdownOutcome::FORCED);
        assert_eq!(supervisor.stats().await.unwrap().forced_stops, 1);
    }

    #[tokio::test]
    async fn stopping_rejects_commands_and_start() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", STUBBORN);

        let (supervisor, _events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();
        wait_for_pid(dir.path()).await;

        let (outcome, (submit, restart)) = tokio::join!(
            supervisor.request_shutdown(Duration::from_millis(500)),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                (
                    supervisor.submit_command("list").await,
                    supervisor.start(&script, dir.path()).await,
                )
            }
        );
        assert_eq!(outcome, ShutdownOutcome::FORCED);
        assert!(matches!(
            submit,
            Err(SupervisorError::NotRunning {
                state: SupervisorState::Stopping
            })
        ));
        assert!(matches!(
            restart,
            Err(SupervisorError::AlreadyRunning {
                state: SupervisorState::Stopping
            })
        ));
    }

    #[tokio::test]
    async fn unexpected_exit_is_crash_with_output_first() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "start.sh",
            "echo \"[INFO] Server started\"\nsleep 1\nexit 0",
        );

        let (supervisor, mut events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();
        let seen = collect_until_rest(&mut events, SETTLE).await;

        assert_eq!(supervisor.state(), SupervisorState::Crashed);

        let started = seen
            .iter()
            .position(|e| {
                e.as_line().is_some_and(|l| {
                    l.origin == LineOrigin::Stdout
                        && l.category == OutputCategory::Info
                        && l.text.contains("Server started")
                })
            })
            .expect("missing server output");
        let crashed: Vec<_> = seen
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                matches!(
                    e,
                    SupervisorEvent::StateChanged {
                        to: SupervisorState::Crashed,
                        ..
                    }
                )
            })
            .map(|(i, _)| i)
            .collect();
        assert_eq!(crashed.len(), 1);
        assert!(started < crashed[0]);
        assert!(seen.contains(&SupervisorEvent::Exited {
            code: Some(0),
            expected: false,
        }));

        let notice = seen
            .iter()
            .filter_map(SupervisorEvent::as_line)
            .find(|l| l.origin == LineOrigin::Supervisor && l.category == OutputCategory::Error)
            .expect("missing crash notice");
        assert!(notice.text.contains("exit code 0"));
    }

    #[tokio::test]
    async fn crashed_server_can_restart() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", "exit 3");

        let (supervisor, mut events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();
        let seen = collect_until_rest(&mut events, SETTLE).await;
        assert!(seen.contains(&SupervisorEvent::Exited {
            code: Some(3),
            expected: false,
        }));
        assert_eq!(supervisor.state(), SupervisorState::Crashed);

        let err = supervisor.submit_command("list").await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::NotRunning {
                state: SupervisorState::Crashed
            }
        ));

        let outcome = supervisor.request_shutdown(SETTLE).await;
        assert_eq!(outcome, ShutdownOutcome::GRACEFUL);
        assert_eq!(supervisor.state(), SupervisorState::Crashed);

        supervisor.start(&script, dir.path()).await.unwrap();
        collect_until_rest(&mut events, SETTLE).await;
        assert_eq!(supervisor.state(), SupervisorState::Crashed);

        let stats = supervisor.stats().await.unwrap();
        assert_eq!(stats.starts, 2);
        assert_eq!(stats.crashes, 2);
    }

    #[tokio::test]
    async fn closed_input_fails_command() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", "exec 0<&-\necho closed\nsleep 5");

        let (supervisor, mut events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();

        // Wait until the server has closed its input.
        let deadline = tokio::time::Instant::now() + SETTLE;
        loop {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .unwrap()
                .unwrap();
            if event.as_line().is_some_and(|l| l.text.contains("closed")) {
                break;
            }
        }

        let err = supervisor.submit_command("list").await.unwrap_err();
        assert!(matches!(err, SupervisorError::WriteFailed(_)));

        let errors: Vec<_> = events
            .drain()
            .into_iter()
            .filter_map(|e| e.as_line().cloned())
            .filter(|l| l.category == OutputCategory::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].text.starts_with("Error sending command"));

        supervisor.close(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn close_kills_running_server() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", STUBBORN);

        let (supervisor, _events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();
        let pid = wait_for_pid(dir.path()).await;

        let outcome = supervisor.close(Duration::from_millis(200)).await;
        assert_eq!(outcome, ShutdownOutcome::FORCED);
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn dropping_handle_terminates_server() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", STUBBORN);

        let (supervisor, mut events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();
        let pid = wait_for_pid(dir.path()).await;
        drop(supervisor);

        let mut remaining = Vec::new();
        while let Some(event) = tokio::time::timeout(SETTLE, events.recv()).await.unwrap() {
            remaining.push(event);
        }
        assert!(remaining.contains(&SupervisorEvent::StateChanged {
            from: SupervisorState::Running,
            to: SupervisorState::Stopped,
        }));
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn force_terminate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "start.sh", STUBBORN);

        let (supervisor, _events) = supervisor();
        supervisor.start(&script, dir.path()).await.unwrap();
        wait_for_pid(dir.path()).await;

        supervisor.force_terminate().await;
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        supervisor.force_terminate().await;
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(supervisor.stats().await.unwrap().forced_stops, 1);
    }
}
