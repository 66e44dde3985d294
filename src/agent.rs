use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::bus::{BusEvent, EventBus};
use crate::error::{DeckError, Result};
use crate::output_log::OutputLog;
use crate::registry::WorkspaceKey;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Output { stream: StreamKind, line: String },
    System(String),
    Completed { success: bool, code: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(String);

impl AgentId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Stopping,
    Exited { success: bool, code: i32 },
}

impl AgentStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }

    pub fn label(self) -> String {
        match self {
            Self::Running => "running".to_string(),
            Self::Stopping => "stopping".to_string(),
            Self::Exited { success: true, .. } => "done".to_string(),
            Self::Exited { code, .. } => format!("exited {code}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Codex,
    Claude,
    Custom,
}

impl BackendKind {
    pub fn from_program(program: &str) -> Self {
        let binary = Path::new(program)
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or(program)
            .to_ascii_lowercase();
        if binary.contains("claude") {
            Self::Claude
        } else if binary.contains("codex") {
            Self::Codex
        } else {
            Self::Custom
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    PlainText,
    /// Parse JSONL and forward only assistant message text.
    AssistantJson,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantCommandConfig {
    pub program: String,
    pub args_prefix: Vec<String>,
    pub output_mode: OutputMode,
    pub persistent_session: bool,
    pub model: Option<String>,
    pub model_reasoning_effort: Option<String>,
}

impl AssistantCommandConfig {
    /// `Custom` has no default program or arguments; callers set `program`.
    pub fn default_for_backend(backend: BackendKind) -> Self {
        let (program, args_prefix) = match backend {
            // Runs with approvals and sandboxing disabled: the assistant owns the workspace.
            BackendKind::Codex => (
                "codex",
                vec![
                    "exec".to_string(),
                    "--dangerously-bypass-approvals-and-sandbox".to_string(),
                    "--color".to_string(),
                    "never".to_string(),
                ],
            ),
            BackendKind::Claude => ("claude", vec!["--dangerously-skip-permissions".to_string()]),
            BackendKind::Custom => ("", Vec::new()),
        };
        Self {
            program: program.to_string(),
            args_prefix,
            output_mode: OutputMode::PlainText,
            persistent_session: true,
            model: None,
            model_reasoning_effort: None,
        }
    }

    /// Backend defaults for whatever `program` looks like.
    pub fn for_program(program: &str) -> Self {
        let mut config = Self::default_for_backend(BackendKind::from_program(program));
        config.program = program.to_string();
        config
    }

    pub fn backend_kind(&self) -> BackendKind {
        BackendKind::from_program(&self.program)
    }

    /// Full argv (without the program) for one turn.
    pub fn prompt_args(&self, session_id: Option<&str>, prompt: &str) -> Vec<String> {
        let resume = session_id.filter(|_| self.persistent_session);
        let mut args = match resume {
            Some(existing) => build_resume_prompt_args(self, existing),
            None => build_new_session_args(self),
        };
        args.push(prompt.to_string());
        args
    }
}

impl Default for AssistantCommandConfig {
    fn default() -> Self {
        Self::default_for_backend(BackendKind::Claude)
    }
}

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub workspace: WorkspaceKey,
    pub prompt: String,
    pub command: AssistantCommandConfig,
    pub session_id: Option<String>,
    pub log_root: PathBuf,
}

#[derive(Debug, Default)]
struct SessionSlot {
    id: Option<String>,
    captured_this_run: bool,
}

/// One launched assistant process and the threads forwarding its output.
#[derive(Debug)]
pub struct AgentHandle {
    id: AgentId,
    workspace: WorkspaceKey,
    pid: u32,
    started_at: DateTime<Utc>,
    log: OutputLog,
    child: Arc<Mutex<Child>>,
    status: Arc<Mutex<AgentStatus>>,
    session: Arc<Mutex<SessionSlot>>,
}

impl AgentHandle {
    pub fn spawn(launch: LaunchSpec, bus: &EventBus) -> Result<Self> {
        let id = AgentId::generate();
        let log = OutputLog::create(&launch.log_root, &launch.workspace, &id)?;
        let args = launch
            .command
            .prompt_args(launch.session_id.as_deref(), &launch.prompt);
        log.write_header(
            &id,
            &launch.workspace,
            &command_line(&launch.command.program, &args),
        );

        let mut command = Command::new(&launch.command.program);
        command
            .args(&args)
            .current_dir(launch.workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so signals also reach tools the assistant started.
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                log.write_system(&format!("Assistant failed to start: {source}"));
                log.write_exit(false, -1);
                tracing::warn!(
                    program = %launch.command.program,
                    workspace = %launch.workspace,
                    "failed to start assistant: {source}"
                );
                return Err(DeckError::Spawn {
                    program: launch.command.program,
                    source,
                });
            }
        };

        let pid = child.id();
        let publisher = Publisher {
            bus: bus.clone(),
            agent_id: id.clone(),
            workspace: launch.workspace.clone(),
            closed: Arc::new(Mutex::new(false)),
        };
        let session = Arc::new(Mutex::new(SessionSlot {
            id: launch.session_id.clone(),
            captured_this_run: false,
        }));

        let (done_tx, done_rx) = mpsc::channel();
        let mut reader_count = 0;
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(
                stdout,
                StreamKind::Stdout,
                ReaderContext {
                    publisher: publisher.clone(),
                    log: log.clone(),
                    output_mode: launch.command.output_mode,
                    session: Some(session.clone()),
                },
                done_tx.clone(),
            );
            reader_count += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(
                stderr,
                StreamKind::Stderr,
                ReaderContext {
                    publisher: publisher.clone(),
                    log: log.clone(),
                    output_mode: launch.command.output_mode,
                    session: None,
                },
                done_tx,
            );
            reader_count += 1;
        }

        let child = Arc::new(Mutex::new(child));
        let status = Arc::new(Mutex::new(AgentStatus::Running));
        spawn_waiter(
            child.clone(),
            status.clone(),
            log.clone(),
            publisher,
            done_rx,
            reader_count,
        );

        tracing::info!(agent = %id, pid, workspace = %launch.workspace, "assistant started");
        Ok(Self {
            id,
            workspace: launch.workspace,
            pid,
            started_at: Utc::now(),
            log,
            child,
            status,
            session,
        })
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn workspace(&self) -> &WorkspaceKey {
        &self.workspace
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn status(&self) -> AgentStatus {
        read_status(&self.status)
    }

    pub fn saved_session_id(&self) -> Option<String> {
        self.session.lock().ok().and_then(|slot| slot.id.clone())
    }

    pub fn reset_session(&self) {
        if let Ok(mut slot) = self.session.lock() {
            slot.id = None;
        }
    }

    /// Sends SIGTERM and escalates to SIGKILL once `grace` has passed.
    /// Returns without waiting for the process. A no-op while already stopping.
    pub fn terminate(&self, grace: Duration) -> Result<()> {
        if !self.mark_stopping() {
            return Ok(());
        }
        tracing::info!(agent = %self.id, pid = self.pid, "stopping assistant");
        deliver_signal(&self.child, self.pid, false).map_err(|source| DeckError::Signal {
            pid: self.pid,
            source,
        })?;

        let child = self.child.clone();
        let status = self.status.clone();
        let pid = self.pid;
        let id = self.id.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if !read_status(&status).is_active() {
                    return;
                }
                thread::sleep(EXIT_POLL_INTERVAL);
            }
            if read_status(&status).is_active() {
                tracing::warn!(agent = %id, pid, "assistant ignored SIGTERM, killing");
                if let Err(err) = deliver_signal(&child, pid, true) {
                    tracing::warn!(agent = %id, pid, "failed to kill assistant: {err}");
                }
            }
        });
        Ok(())
    }

    pub fn kill(&self) -> Result<()> {
        self.mark_stopping();
        tracing::info!(agent = %self.id, pid = self.pid, "killing assistant");
        deliver_signal(&self.child, self.pid, true).map_err(|source| DeckError::Signal {
            pid: self.pid,
            source,
        })
    }

    /// Blocks until the process has exited or `timeout` passes; returns the
    /// status observed last.
    pub fn wait_exit(&self, timeout: Duration) -> AgentStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status();
            if !status.is_active() || Instant::now() >= deadline {
                return status;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    fn mark_stopping(&self) -> bool {
        let Ok(mut status) = self.status.lock() else {
            return false;
        };
        match *status {
            AgentStatus::Running => {
                *status = AgentStatus::Stopping;
                true
            }
            AgentStatus::Stopping | AgentStatus::Exited { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Publisher {
    bus: EventBus,
    agent_id: AgentId,
    workspace: WorkspaceKey,
    /// Set together with publishing `Completed`; nothing is published after.
    closed: Arc<Mutex<bool>>,
}

impl Publisher {
    /// Returns false once the agent's event stream is closed.
    fn send(&self, event: AgentEvent) -> bool {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return false;
        }
        self.publish(event);
        true
    }

    /// Publishes the closing events and closes the stream under one lock.
    fn finish(&self, events: Vec<AgentEvent>) {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return;
        }
        for event in events {
            self.publish(event);
        }
        *closed = true;
    }

    fn publish(&self, event: AgentEvent) {
        self.bus.publish(BusEvent {
            agent_id: self.agent_id.clone(),
            workspace: self.workspace.clone(),
            event,
        });
    }
}

struct ReaderContext {
    publisher: Publisher,
    log: OutputLog,
    output_mode: OutputMode,
    session: Option<Arc<Mutex<SessionSlot>>>,
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    stream: StreamKind,
    ctx: ReaderContext,
    done: Sender<()>,
) {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            forward_line(&ctx, stream, line);
        }
        let _ = done.send(());
    });
}

fn forward_line(ctx: &ReaderContext, stream: StreamKind, line: String) {
    ctx.log.write_line(stream, &line);
    if let Some(session) = &ctx.session
        && let Some(found) = parse_session_id_from_jsonl_line(&line)
        && let Ok(mut slot) = session.lock()
        && !slot.captured_this_run
    {
        slot.id = Some(found);
        slot.captured_this_run = true;
    }
    let forwarded = match (stream, ctx.output_mode) {
        (StreamKind::Stderr, _) | (_, OutputMode::PlainText) => Some(line),
        (StreamKind::Stdout, OutputMode::AssistantJson) => parse_assistant_text_from_jsonl_line(&line),
    };
    if let Some(line) = forwarded
        && !ctx.publisher.send(AgentEvent::Output { stream, line })
    {
        tracing::debug!(
            agent = %ctx.publisher.agent_id,
            stream = stream.tag(),
            "output after completion kept in log only"
        );
    }
}

fn spawn_waiter(
    child: Arc<Mutex<Child>>,
    status: Arc<Mutex<AgentStatus>>,
    log: OutputLog,
    publisher: Publisher,
    readers_done: Receiver<()>,
    reader_count: usize,
) {
    thread::spawn(move || {
        let exit = wait_for_exit(&child);
        // Descendants can inherit the pipes and keep them open after the
        // assistant itself exited; give the readers a bounded drain window.
        let deadline = Instant::now() + READER_DRAIN_TIMEOUT;
        for _ in 0..reader_count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if readers_done.recv_timeout(remaining).is_err() {
                break;
            }
        }

        let mut closing = Vec::with_capacity(2);
        let (success, code) = match &exit {
            Ok(exit_status) => (exit_status.success(), exit_status.code().unwrap_or(-1)),
            Err(err) => {
                let message = format!("Assistant failed while waiting for process: {err}");
                log.write_system(&message);
                closing.push(AgentEvent::System(message));
                (false, -1)
            }
        };
        log.write_exit(success, code);
        if let Ok(mut current) = status.lock() {
            *current = AgentStatus::Exited { success, code };
        }
        if exit.is_ok() && !success {
            closing.push(AgentEvent::System(format!(
                "Assistant exited with status code {code}"
            )));
        }
        closing.push(AgentEvent::Completed { success, code });
        tracing::info!(agent = %publisher.agent_id, code, success, "assistant exited");
        publisher.finish(closing);
    });
}

fn wait_for_exit(child: &Mutex<Child>) -> io::Result<ExitStatus> {
    loop {
        let polled = match child.lock() {
            Ok(mut child) => child.try_wait(),
            Err(_) => return Err(io::Error::other("assistant process lock poisoned")),
        };
        match polled {
            Ok(Some(exit_status)) => return Ok(exit_status),
            Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
            Err(err) => return Err(err),
        }
    }
}

fn read_status(status: &Mutex<AgentStatus>) -> AgentStatus {
    status
        .lock()
        .map(|guard| *guard)
        .unwrap_or(AgentStatus::Exited {
            success: false,
            code: -1,
        })
}

/// Signals the child under its lock, after checking it has not been reaped,
/// so a recycled pid is never targeted.
fn deliver_signal(child: &Mutex<Child>, pid: u32, hard: bool) -> io::Result<()> {
    let mut child = child
        .lock()
        .map_err(|_| io::Error::other("assistant process lock poisoned"))?;
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        signal_process_group(pid, if hard { libc::SIGKILL } else { libc::SIGTERM })
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, hard);
        child.kill()
    }
}

#[cfg(unix)]
fn signal_process_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = pid as libc::pid_t;
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

fn command_line(program: &str, args: &[String]) -> String {
    let mut out = program.to_string();
    for arg in args {
        out.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('"') {
            out.push_str(&format!("{arg:?}"));
        } else {
            out.push_str(arg);
        }
    }
    out
}

fn sanitize_resume_args(args: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--color" {
            let _ = iter.next();
            continue;
        }
        out.push(arg);
    }
    out
}

fn build_new_session_args(config: &AssistantCommandConfig) -> Vec<String> {
    let mut args = config.args_prefix.clone();
    match config.backend_kind() {
        BackendKind::Codex => {
            append_codex_model_selection_args(
                &mut args,
                config.model.as_deref(),
                config.model_reasoning_effort.as_deref(),
            );
        }
        BackendKind::Claude => {
            append_claude_output_args(&mut args, config.output_mode);
            append_model_arg(&mut args, config.model.as_deref());
            args.push("-p".to_string());
        }
        BackendKind::Custom => {}
    }
    args
}

fn build_resume_prompt_args(config: &AssistantCommandConfig, existing_session: &str) -> Vec<String> {
    match config.backend_kind() {
        BackendKind::Codex => {
            let mut prefix = config.args_prefix.clone();
            if prefix.first().is_some_and(|arg| arg == "exec") {
                prefix.remove(0);
            }
            let mut args = vec!["exec".to_string(), "resume".to_string()];
            args.extend(sanitize_resume_args(prefix));
            append_codex_model_selection_args(
                &mut args,
                config.model.as_deref(),
                config.model_reasoning_effort.as_deref(),
            );
            args.push(existing_session.to_string());
            args
        }
        BackendKind::Claude => {
            let mut args = config.args_prefix.clone();
            append_claude_output_args(&mut args, config.output_mode);
            append_model_arg(&mut args, config.model.as_deref());
            args.push("--resume".to_string());
            args.push(existing_session.to_string());
            args.push("-p".to_string());
            args
        }
        BackendKind::Custom => build_new_session_args(config),
    }
}

fn append_claude_output_args(args: &mut Vec<String>, output_mode: OutputMode) {
    if output_mode == OutputMode::AssistantJson {
        args.push("--output-format".to_string());
        args.push("stream-json".to_string());
        args.push("--verbose".to_string());
    }
}

fn append_codex_model_selection_args(
    args: &mut Vec<String>,
    model: Option<&str>,
    model_reasoning_effort: Option<&str>,
) {
    append_model_arg(args, model);
    if let Some(effort) = model_reasoning_effort
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        args.push("-c".to_string());
        args.push(format!("model_reasoning_effort={effort:?}"));
    }
}

fn append_model_arg(args: &mut Vec<String>, model: Option<&str>) {
    if let Some(model) = model.map(str::trim).filter(|value| !value.is_empty()) {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
}

/// Assistant prose from one JSONL line, for both Codex and Claude streams.
fn parse_assistant_text_from_jsonl_line(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    match value.get("type")?.as_str()? {
        "item.completed" => {
            let item = value.get("item")?;
            if item.get("type")?.as_str()? != "agent_message" {
                return None;
            }
            item.get("text")?.as_str().map(ToString::to_string)
        }
        "assistant" => {
            let blocks = value.get("message")?.get("content")?.as_array()?;
            let text = blocks
                .iter()
                .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n");
            (!text.trim().is_empty()).then_some(text)
        }
        _ => None,
    }
}

fn parse_session_id_from_jsonl_line(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let direct = value
        .get("session_id")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("conversation_id").and_then(|v| v.as_str()))
        .or_else(|| value.get("thread_id").and_then(|v| v.as_str()));
    if let Some(id) = direct
        && looks_like_session_id(id)
    {
        return Some(id.to_string());
    }
    let session_obj = value.get("session")?;
    let nested = session_obj
        .get("id")
        .and_then(|v| v.as_str())
        .or_else(|| session_obj.get("session_id").and_then(|v| v.as_str()));
    nested
        .filter(|id| looks_like_session_id(id))
        .map(ToString::to_string)
}

fn looks_like_session_id(id: &str) -> bool {
    let trimmed = id.trim();
    if trimmed.len() < 8 || trimmed.contains(char::is_whitespace) {
        return false;
    }
    trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

#[cfg(test)]
#[path = "../tests/unit/agent_tests.rs"]
mod tests;
