use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeckError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config '{}': {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid assistant config: {0}")]
    InvalidAssistant(String),

    #[error("Workspace is not an existing directory: {}", .0.display())]
    WorkspaceNotFound(PathBuf),

    #[error("An agent is already running in {workspace}")]
    AgentBusy { workspace: String },

    #[error("No agent registered for workspace: {0}")]
    UnknownWorkspace(String),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DeckError>;
