use super::*;
use crate::agent::{AgentEvent, OutputMode};
use crate::bus::Subscription;

struct Fixture {
    registry: AgentRegistry,
    subscription: Subscription,
    workspace: tempfile::TempDir,
    _logs: tempfile::TempDir,
}

fn fixture(output_mode: OutputMode) -> Fixture {
    let logs = tempfile::tempdir().expect("log dir");
    let mut command = AssistantCommandConfig::for_program("sh");
    command.args_prefix = vec!["-c".to_string()];
    command.output_mode = output_mode;
    let registry = AgentRegistry::new(RegistrySettings {
        command,
        log_root: logs.path().to_path_buf(),
        stop_grace: Duration::from_millis(300),
    });
    let subscription = registry.subscribe();
    Fixture {
        registry,
        subscription,
        workspace: tempfile::tempdir().expect("workspace dir"),
        _logs: logs,
    }
}

fn wait_completed(subscription: &Subscription, agent_id: &AgentId) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Some(bus_event) = subscription.recv_timeout(Duration::from_millis(50))
            && &bus_event.agent_id == agent_id
            && matches!(bus_event.event, AgentEvent::Completed { .. })
        {
            return;
        }
    }
    panic!("agent {agent_id} did not complete");
}

#[test]
fn resolve_rejects_missing_directories_and_files() {
    let dir = tempfile::tempdir().expect("dir");
    let missing = dir.path().join("nope");
    assert!(matches!(
        WorkspaceKey::resolve(&missing),
        Err(DeckError::WorkspaceNotFound(_))
    ));

    let file = dir.path().join("file.txt");
    std::fs::write(&file, "x").expect("write file");
    assert!(matches!(
        WorkspaceKey::resolve(&file),
        Err(DeckError::WorkspaceNotFound(_))
    ));
}

#[test]
fn equivalent_paths_share_one_key() {
    let dir = tempfile::tempdir().expect("dir");
    std::fs::create_dir(dir.path().join("proj")).expect("mkdir");
    let direct = WorkspaceKey::resolve(&dir.path().join("proj")).expect("direct");
    let dotted = WorkspaceKey::resolve(&dir.path().join("proj/./")).expect("dotted");
    assert_eq!(direct, dotted);
    assert_eq!(direct.name(), "proj");
}

#[test]
fn launch_registers_agent_and_publishes_tagged_events() {
    let mut fx = fixture(OutputMode::PlainText);
    let agent_id = fx
        .registry
        .launch(fx.workspace.path(), "echo hello")
        .expect("launch");

    let key = WorkspaceKey::resolve(fx.workspace.path()).expect("key");
    let first = fx
        .subscription
        .recv_timeout(Duration::from_secs(5))
        .expect("first event");
    assert_eq!(first.agent_id, agent_id);
    assert_eq!(first.workspace, key);
    wait_completed(&fx.subscription, &agent_id);

    let listed = fx.registry.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, agent_id);
    assert_eq!(listed[0].workspace, key);
    assert!(listed[0].log_path.exists());
}

#[test]
fn second_launch_is_rejected_while_busy() {
    let mut fx = fixture(OutputMode::PlainText);
    let first = fx
        .registry
        .launch(fx.workspace.path(), "sleep 30")
        .expect("first launch");

    let err = fx
        .registry
        .launch(fx.workspace.path(), "echo second")
        .expect_err("busy workspace");
    assert!(matches!(err, DeckError::AgentBusy { .. }));
    assert_eq!(
        fx.registry.get(fx.workspace.path()).map(|h| h.id().clone()),
        Some(first)
    );

    fx.registry.kill(fx.workspace.path()).expect("kill");
}

#[test]
fn relaunch_after_exit_replaces_agent_and_reuses_session() {
    let mut fx = fixture(OutputMode::AssistantJson);
    let script = r#"echo '{"type":"thread.started","thread_id":"0199a5a3-4cbd-7d91"}'"#;
    let first = fx
        .registry
        .launch(fx.workspace.path(), script)
        .expect("first launch");
    wait_completed(&fx.subscription, &first);

    let second = fx
        .registry
        .launch(fx.workspace.path(), "true")
        .expect("second launch");
    assert_ne!(first, second);
    assert_eq!(fx.registry.len(), 1);
    let handle = fx.registry.get(fx.workspace.path()).expect("handle");
    assert_eq!(
        handle.saved_session_id().as_deref(),
        Some("0199a5a3-4cbd-7d91")
    );
    wait_completed(&fx.subscription, &second);
}

#[test]
fn reset_session_forgets_the_carried_id() {
    let mut fx = fixture(OutputMode::AssistantJson);
    let script = r#"echo '{"session_id":"abcdef12-3456"}'"#;
    let first = fx
        .registry
        .launch(fx.workspace.path(), script)
        .expect("launch");
    wait_completed(&fx.subscription, &first);

    fx.registry
        .reset_session(fx.workspace.path())
        .expect("reset");
    let second = fx
        .registry
        .launch(fx.workspace.path(), "true")
        .expect("relaunch");
    let handle = fx.registry.get(fx.workspace.path()).expect("handle");
    assert!(handle.saved_session_id().is_none());
    wait_completed(&fx.subscription, &second);
}

#[test]
fn launch_in_missing_workspace_fails_without_registering() {
    let mut fx = fixture(OutputMode::PlainText);
    let missing = fx.workspace.path().join("missing");
    let err = fx.registry.launch(&missing, "echo hi").expect_err("missing");
    assert!(matches!(err, DeckError::WorkspaceNotFound(_)));
    assert!(fx.registry.is_empty());
}

#[test]
fn controls_on_unknown_workspace_report_it() {
    let fx = fixture(OutputMode::PlainText);
    assert!(matches!(
        fx.registry.stop(fx.workspace.path()),
        Err(DeckError::UnknownWorkspace(_))
    ));
    assert!(matches!(
        fx.registry.kill(fx.workspace.path()),
        Err(DeckError::UnknownWorkspace(_))
    ));
    assert!(fx.registry.status(fx.workspace.path()).is_none());
}

#[test]
fn stop_moves_agent_to_stopping_then_exited() {
    let mut fx = fixture(OutputMode::PlainText);
    let agent_id = fx
        .registry
        .launch(fx.workspace.path(), "sleep 30")
        .expect("launch");

    fx.registry.stop(fx.workspace.path()).expect("stop");
    assert!(
        fx.registry
            .status(fx.workspace.path())
            .is_some_and(AgentStatus::is_active)
    );
    wait_completed(&fx.subscription, &agent_id);
    assert!(matches!(
        fx.registry.status(fx.workspace.path()),
        Some(AgentStatus::Exited { success: false, .. })
    ));
}

#[test]
fn remove_terminates_and_forgets_the_agent() {
    let mut fx = fixture(OutputMode::PlainText);
    let agent_id = fx
        .registry
        .launch(fx.workspace.path(), "sleep 30")
        .expect("launch");

    let summary = fx.registry.remove(fx.workspace.path()).expect("remove");
    assert_eq!(summary.id, agent_id);
    assert!(fx.registry.is_empty());
    wait_completed(&fx.subscription, &agent_id);
    assert!(matches!(
        fx.registry.remove(fx.workspace.path()),
        Err(DeckError::UnknownWorkspace(_))
    ));
}

#[test]
fn list_is_sorted_by_workspace() {
    let mut fx = fixture(OutputMode::PlainText);
    let root = fx.workspace.path().to_path_buf();
    for name in ["zeta", "alpha"] {
        std::fs::create_dir(root.join(name)).expect("mkdir");
        fx.registry.launch(&root.join(name), "true").expect("launch");
    }
    let names = fx
        .registry
        .list()
        .into_iter()
        .map(|summary| summary.workspace.name())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["alpha", "zeta"]);
    fx.registry.shutdown(Duration::from_secs(5));
    assert!(fx.registry.list().iter().all(|s| !s.status.is_active()));
}

#[test]
fn agent_stays_controllable_after_its_directory_is_deleted() {
    let mut fx = fixture(OutputMode::PlainText);
    let project = fx.workspace.path().join("proj");
    std::fs::create_dir(&project).expect("mkdir");
    let key = WorkspaceKey::resolve(&project).expect("key");
    let agent_id = fx.registry.launch(&project, "sleep 30").expect("launch");

    std::fs::remove_dir(&project).expect("remove workspace dir");
    assert!(WorkspaceKey::resolve(key.path()).is_err());
    assert!(
        fx.registry
            .status(key.path())
            .is_some_and(AgentStatus::is_active)
    );

    fx.registry.stop(key.path()).expect("stop");
    let summary = fx.registry.remove(key.path()).expect("remove");
    assert_eq!(summary.id, agent_id);
    assert!(fx.registry.is_empty());
    wait_completed(&fx.subscription, &agent_id);
}

#[test]
fn failed_stop_keeps_the_agent_registered() {
    let mut fx = fixture(OutputMode::PlainText);
    let agent_id = fx
        .registry
        .launch(fx.workspace.path(), "sleep 30")
        .expect("launch");

    let err = fx
        .registry
        .remove_after(fx.workspace.path(), |handle| {
            Err(DeckError::Signal {
                pid: handle.pid(),
                source: std::io::Error::from_raw_os_error(1),
            })
        })
        .expect_err("stop failure");
    assert!(matches!(err, DeckError::Signal { .. }));
    assert_eq!(fx.registry.len(), 1);
    assert_eq!(
        fx.registry.get(fx.workspace.path()).map(|h| h.id().clone()),
        Some(agent_id.clone())
    );

    fx.registry.kill(fx.workspace.path()).expect("kill");
    wait_completed(&fx.subscription, &agent_id);
}
