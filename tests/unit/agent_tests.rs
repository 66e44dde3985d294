use super::*;
use crate::bus::Subscription;
use std::fs;
use std::time::{Duration, Instant};

struct Scratch {
    workspace: tempfile::TempDir,
    logs: tempfile::TempDir,
}

impl Scratch {
    fn new() -> Self {
        Self {
            workspace: tempfile::tempdir().expect("workspace dir"),
            logs: tempfile::tempdir().expect("log dir"),
        }
    }

    fn launch(&self, command: AssistantCommandConfig, prompt: &str) -> LaunchSpec {
        LaunchSpec {
            workspace: WorkspaceKey::resolve(self.workspace.path()).expect("workspace key"),
            prompt: prompt.to_string(),
            command,
            session_id: None,
            log_root: self.logs.path().to_path_buf(),
        }
    }
}

fn sh_config() -> AssistantCommandConfig {
    let mut config = AssistantCommandConfig::for_program("sh");
    config.args_prefix = vec!["-c".to_string()];
    config
}

fn events_until_completed(subscription: &Subscription, timeout: Duration) -> Vec<AgentEvent> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while Instant::now() < deadline {
        if let Some(bus_event) = subscription.recv_timeout(Duration::from_millis(50)) {
            let done = matches!(bus_event.event, AgentEvent::Completed { .. });
            out.push(bus_event.event);
            if done {
                return out;
            }
        }
    }
    panic!("agent did not complete in time; events so far: {out:?}");
}

fn wait_for_output(subscription: &Subscription, expected: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(bus_event) = subscription.recv_timeout(Duration::from_millis(50))
            && bus_event.event
                == (AgentEvent::Output {
                    stream: StreamKind::Stdout,
                    line: expected.to_string(),
                })
        {
            return;
        }
    }
    panic!("never saw output line {expected:?}");
}

fn lines_of(events: &[AgentEvent], wanted: StreamKind) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::Output { stream, line } if *stream == wanted => Some(line.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn default_config_targets_claude_with_persistent_sessions() {
    let config = AssistantCommandConfig::default();
    assert_eq!(config.program, "claude");
    assert_eq!(
        config.args_prefix,
        vec!["--dangerously-skip-permissions".to_string()]
    );
    assert_eq!(config.output_mode, OutputMode::PlainText);
    assert!(config.persistent_session);
    assert!(config.model.is_none());
}

#[test]
fn default_codex_config_is_unsandboxed() {
    let config = AssistantCommandConfig::default_for_backend(BackendKind::Codex);
    assert_eq!(config.program, "codex");
    assert_eq!(
        config.args_prefix,
        vec![
            "exec",
            "--dangerously-bypass-approvals-and-sandbox",
            "--color",
            "never"
        ]
    );
}

#[test]
fn backend_kind_detects_program_family() {
    assert_eq!(
        BackendKind::from_program("/usr/local/bin/claude-code"),
        BackendKind::Claude
    );
    assert_eq!(BackendKind::from_program("codex"), BackendKind::Codex);
    assert_eq!(BackendKind::from_program("/bin/sh"), BackendKind::Custom);
}

#[test]
fn for_program_drops_prefix_for_custom_programs() {
    let config = AssistantCommandConfig::for_program("my-assistant");
    assert_eq!(config.program, "my-assistant");
    assert!(config.args_prefix.is_empty());
    assert_eq!(config.prompt_args(Some("ignored-session"), "hi"), vec!["hi"]);
}

#[test]
fn custom_backend_has_no_default_shell() {
    let config = AssistantCommandConfig::default_for_backend(BackendKind::Custom);
    assert!(config.program.is_empty());
    assert!(config.args_prefix.is_empty());
}

#[test]
fn claude_args_for_new_and_resumed_sessions() {
    let mut config = AssistantCommandConfig::default();
    assert_eq!(
        config.prompt_args(None, "fix it"),
        vec!["--dangerously-skip-permissions", "-p", "fix it"]
    );

    config.output_mode = OutputMode::AssistantJson;
    config.model = Some("sonnet".to_string());
    assert_eq!(
        config.prompt_args(Some("abc12345-session"), "again"),
        vec![
            "--dangerously-skip-permissions",
            "--output-format",
            "stream-json",
            "--verbose",
            "--model",
            "sonnet",
            "--resume",
            "abc12345-session",
            "-p",
            "again"
        ]
    );
}

#[test]
fn codex_new_session_carries_model_selection() {
    let mut config = AssistantCommandConfig::default_for_backend(BackendKind::Codex);
    config.model = Some("gpt-5".to_string());
    config.model_reasoning_effort = Some(" high ".to_string());
    assert_eq!(
        config.prompt_args(None, "hello"),
        vec![
            "exec",
            "--dangerously-bypass-approvals-and-sandbox",
            "--color",
            "never",
            "--model",
            "gpt-5",
            "-c",
            "model_reasoning_effort=\"high\"",
            "hello"
        ]
    );
}

#[test]
fn codex_resume_strips_color_flag_and_places_session_before_prompt() {
    let config = AssistantCommandConfig::default_for_backend(BackendKind::Codex);
    assert_eq!(
        config.prompt_args(Some("0199a5a3-4cbd-7d91"), "continue"),
        vec![
            "exec",
            "resume",
            "--dangerously-bypass-approvals-and-sandbox",
            "0199a5a3-4cbd-7d91",
            "continue"
        ]
    );
}

#[test]
fn session_is_ignored_when_not_persistent() {
    let mut config = AssistantCommandConfig::default();
    config.persistent_session = false;
    assert_eq!(
        config.prompt_args(Some("abc12345-session"), "hi"),
        vec!["--dangerously-skip-permissions", "-p", "hi"]
    );
}

#[test]
fn parses_session_ids_from_jsonl_events() {
    let nested =
        r#"{"type":"session.started","session":{"id":"123e4567-e89b-12d3-a456-426614174000"}}"#;
    assert_eq!(
        parse_session_id_from_jsonl_line(nested).as_deref(),
        Some("123e4567-e89b-12d3-a456-426614174000")
    );
    let thread = r#"{"type":"thread.started","thread_id":"0199a5a3-4cbd"}"#;
    assert_eq!(
        parse_session_id_from_jsonl_line(thread).as_deref(),
        Some("0199a5a3-4cbd")
    );
    assert!(parse_session_id_from_jsonl_line(r#"{"session_id":"short"}"#).is_none());
    assert!(parse_session_id_from_jsonl_line(r#"{"session_id":"has space inside"}"#).is_none());
    assert!(parse_session_id_from_jsonl_line("not json").is_none());
}

#[test]
fn extracts_assistant_text_from_codex_and_claude_streams() {
    let codex = r#"{"type":"item.completed","item":{"type":"agent_message","text":"Done."}}"#;
    assert_eq!(
        parse_assistant_text_from_jsonl_line(codex).as_deref(),
        Some("Done.")
    );

    let reasoning = r#"{"type":"item.completed","item":{"type":"reasoning","text":"hmm"}}"#;
    assert!(parse_assistant_text_from_jsonl_line(reasoning).is_none());

    let claude = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"one"},{"type":"tool_use","name":"Bash"},{"type":"text","text":"two"}]}}"#;
    assert_eq!(
        parse_assistant_text_from_jsonl_line(claude).as_deref(),
        Some("one\ntwo")
    );

    let tool_only = r#"{"type":"assistant","message":{"content":[{"type":"tool_use"}]}}"#;
    assert!(parse_assistant_text_from_jsonl_line(tool_only).is_none());
}

#[test]
fn status_labels() {
    assert_eq!(AgentStatus::Running.label(), "running");
    assert_eq!(AgentStatus::Stopping.label(), "stopping");
    assert_eq!(
        AgentStatus::Exited {
            success: true,
            code: 0
        }
        .label(),
        "done"
    );
    assert_eq!(
        AgentStatus::Exited {
            success: false,
            code: 2
        }
        .label(),
        "exited 2"
    );
    assert!(AgentStatus::Stopping.is_active());
}

#[test]
fn command_line_quotes_arguments_with_spaces() {
    let args = vec!["-c".to_string(), "echo hi".to_string()];
    assert_eq!(command_line("sh", &args), "sh -c \"echo hi\"");
}

#[test]
fn forwards_both_streams_in_order_and_completes_last() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let handle = AgentHandle::spawn(
        scratch.launch(sh_config(), "printf 'a\\nb\\nc\\n'; echo oops >&2"),
        &bus,
    )
    .expect("spawn sh");

    let events = events_until_completed(&subscription, Duration::from_secs(10));
    assert_eq!(lines_of(&events, StreamKind::Stdout), vec!["a", "b", "c"]);
    assert_eq!(lines_of(&events, StreamKind::Stderr), vec!["oops"]);
    assert_eq!(
        events.last(),
        Some(&AgentEvent::Completed {
            success: true,
            code: 0
        })
    );
    assert!(subscription.recv_timeout(Duration::from_millis(100)).is_none());
    assert_eq!(
        handle.status(),
        AgentStatus::Exited {
            success: true,
            code: 0
        }
    );
}

#[test]
fn failing_exit_reports_code_before_completion() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let _handle =
        AgentHandle::spawn(scratch.launch(sh_config(), "exit 3"), &bus).expect("spawn sh");

    let events = events_until_completed(&subscription, Duration::from_secs(10));
    assert_eq!(
        events,
        vec![
            AgentEvent::System("Assistant exited with status code 3".to_string()),
            AgentEvent::Completed {
                success: false,
                code: 3
            },
        ]
    );
}

#[test]
fn runs_in_the_workspace_directory() {
    let scratch = Scratch::new();
    fs::write(scratch.workspace.path().join("marker.txt"), "here").expect("write marker");
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let _handle =
        AgentHandle::spawn(scratch.launch(sh_config(), "cat marker.txt"), &bus).expect("spawn");

    let events = events_until_completed(&subscription, Duration::from_secs(10));
    assert_eq!(lines_of(&events, StreamKind::Stdout), vec!["here"]);
}

#[test]
fn log_file_records_header_tagged_lines_and_exit() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let handle = AgentHandle::spawn(scratch.launch(sh_config(), "echo out; echo err >&2"), &bus)
        .expect("spawn sh");
    events_until_completed(&subscription, Duration::from_secs(10));

    assert!(handle.log_path().starts_with(scratch.logs.path()));
    let text = fs::read_to_string(handle.log_path()).expect("read log");
    let first = text.lines().next().expect("header line");
    assert!(first.starts_with("# deckhand agent "));
    assert!(first.contains(handle.id().as_str()));
    assert!(first.contains("command sh -c"));
    assert!(text.contains("[stdout] out"));
    assert!(text.contains("[stderr] err"));
    assert!(text.lines().last().is_some_and(|line| line.contains("[exit]")));
}

#[test]
fn assistant_json_mode_forwards_prose_and_captures_session() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let mut config = sh_config();
    config.output_mode = OutputMode::AssistantJson;
    let script = r#"echo '{"type":"thread.started","thread_id":"0199a5a3-4cbd-7d91"}'; echo '{"type":"item.completed","item":{"type":"agent_message","text":"All set."}}'"#;
    let handle = AgentHandle::spawn(scratch.launch(config, script), &bus).expect("spawn sh");

    let events = events_until_completed(&subscription, Duration::from_secs(10));
    assert_eq!(lines_of(&events, StreamKind::Stdout), vec!["All set."]);
    assert_eq!(
        handle.saved_session_id().as_deref(),
        Some("0199a5a3-4cbd-7d91")
    );

    handle.reset_session();
    assert!(handle.saved_session_id().is_none());
}

#[test]
fn spawn_failure_returns_error_without_bus_events() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let config = AssistantCommandConfig::for_program("/nonexistent/deckhand-missing-assistant");

    let err = AgentHandle::spawn(scratch.launch(config, "hi"), &bus).expect_err("spawn fails");
    assert!(matches!(err, DeckError::Spawn { .. }));
    assert!(subscription.recv_timeout(Duration::from_millis(200)).is_none());
}

#[test]
fn terminate_ends_a_cooperative_child() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let handle = AgentHandle::spawn(scratch.launch(sh_config(), "echo ready; sleep 30"), &bus)
        .expect("spawn sh");
    wait_for_output(&subscription, "ready");

    handle
        .terminate(Duration::from_secs(5))
        .expect("terminate should signal");
    let status = handle.wait_exit(Duration::from_secs(4));
    assert!(!status.is_active(), "child still {status:?}");
    assert!(matches!(status, AgentStatus::Exited { success: false, .. }));
}

#[test]
fn terminate_escalates_when_sigterm_is_ignored() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let handle = AgentHandle::spawn(
        scratch.launch(sh_config(), "trap '' TERM; echo ready; sleep 30"),
        &bus,
    )
    .expect("spawn sh");
    wait_for_output(&subscription, "ready");

    handle
        .terminate(Duration::from_millis(300))
        .expect("terminate should signal");
    assert_eq!(handle.status(), AgentStatus::Stopping);
    let status = handle.wait_exit(Duration::from_secs(5));
    assert!(!status.is_active(), "child survived escalation: {status:?}");
}

#[test]
fn kill_stops_child_immediately_and_is_idempotent_after_exit() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let handle = AgentHandle::spawn(scratch.launch(sh_config(), "echo ready; sleep 30"), &bus)
        .expect("spawn sh");
    wait_for_output(&subscription, "ready");

    handle.kill().expect("kill should signal");
    let status = handle.wait_exit(Duration::from_secs(5));
    assert!(!status.is_active());
    handle.kill().expect("killing an exited agent is a no-op");
    handle
        .terminate(Duration::from_millis(10))
        .expect("terminating an exited agent is a no-op");
}

#[test]
fn output_from_lingering_descendants_is_logged_but_not_published() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let handle = AgentHandle::spawn(
        scratch.launch(sh_config(), "echo first; (sleep 1; echo late) &"),
        &bus,
    )
    .expect("spawn sh");

    let events = events_until_completed(&subscription, Duration::from_secs(5));
    assert_eq!(lines_of(&events, StreamKind::Stdout), vec!["first"]);
    assert!(matches!(events.last(), Some(AgentEvent::Completed { .. })));

    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if let Some(bus_event) = subscription.recv_timeout(Duration::from_millis(100)) {
            panic!("event published after completion: {:?}", bus_event.event);
        }
    }
    let log = fs::read_to_string(handle.log_path()).expect("read log");
    assert!(log.contains("[stdout] late"), "log was: {log}");
}

#[test]
fn repeated_terminate_signals_once() {
    let scratch = Scratch::new();
    let bus = EventBus::new();
    let subscription = bus.subscribe();
    let handle = AgentHandle::spawn(
        scratch.launch(
            sh_config(),
            "trap 'echo term' TERM; echo ready; while true; do sleep 0.05; done",
        ),
        &bus,
    )
    .expect("spawn sh");
    wait_for_output(&subscription, "ready");

    handle
        .terminate(Duration::from_millis(800))
        .expect("first terminate");
    handle
        .terminate(Duration::from_millis(800))
        .expect("second terminate is a no-op");
    assert_eq!(handle.status(), AgentStatus::Stopping);

    let events = events_until_completed(&subscription, Duration::from_secs(5));
    let terms = lines_of(&events, StreamKind::Stdout)
        .into_iter()
        .filter(|line| line == "term")
        .count();
    assert_eq!(terms, 1);
    assert!(!handle.status().is_active());
}
