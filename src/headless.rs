use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::agent::{AgentEvent, AssistantCommandConfig, StreamKind};
use crate::config::DeckConfig;
use crate::error::Result;
use crate::registry::{AgentRegistry, RegistrySettings};

const EVENT_WAIT: Duration = Duration::from_millis(200);

/// One prompt, one agent, no terminal UI.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Directory the assistant runs in.
    #[arg(long, short = 'w')]
    pub workspace: PathBuf,
    /// Assistant program; overrides the configured backend.
    #[arg(long)]
    pub program: Option<String>,
    /// Argument placed before the prompt; repeatable.
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Where the per-agent output log is written.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    #[arg(long)]
    pub model: Option<String>,
    pub prompt: String,
}

impl RunArgs {
    fn command(&self, config: &DeckConfig) -> Result<AssistantCommandConfig> {
        let mut command = match &self.program {
            Some(program) => AssistantCommandConfig::for_program(program),
            None => config.assistant_command()?,
        };
        if !self.args.is_empty() {
            command.args_prefix = self.args.clone();
        }
        if self.model.is_some() {
            command.model = self.model.clone();
        }
        Ok(command)
    }
}

/// Streams the agent's output to this process's stdout/stderr and returns
/// the exit code to use.
pub fn run(config: &DeckConfig, args: RunArgs) -> Result<i32> {
    let log_root = match &args.log_dir {
        Some(dir) => dir.clone(),
        None => config.log_dir()?,
    };
    let mut registry = AgentRegistry::new(RegistrySettings {
        command: args.command(config)?,
        log_root,
        stop_grace: config.stop_grace(),
    });
    let subscription = registry.subscribe();
    let agent_id = registry.launch(&args.workspace, &args.prompt)?;
    let log_path = registry
        .get(&args.workspace)
        .map(|handle| handle.log_path().to_path_buf());

    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    let code = loop {
        let Some(bus_event) = subscription.recv_timeout(EVENT_WAIT) else {
            continue;
        };
        if bus_event.agent_id != agent_id {
            continue;
        }
        match bus_event.event {
            AgentEvent::Output {
                stream: StreamKind::Stdout,
                line,
            } => writeln!(stdout, "{line}")?,
            AgentEvent::Output {
                stream: StreamKind::Stderr,
                line,
            } => writeln!(stderr, "{line}")?,
            AgentEvent::System(line) => writeln!(stderr, "deckhand: {line}")?,
            AgentEvent::Completed { code, .. } => break code,
        }
    };
    stdout.flush()?;
    if let Some(path) = log_path {
        writeln!(stderr, "log: {}", path.display())?;
    }
    tracing::debug!(agent = %agent_id, code, "headless run finished");
    Ok(exit_code(code))
}

fn exit_code(code: i32) -> i32 {
    if (0..=255).contains(&code) { code } else { 1 }
}
