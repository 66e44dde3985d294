use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{AssistantCommandConfig, BackendKind, OutputMode};
use crate::error::{DeckError, Result};

const CONFIG_DIR: &str = ".deckhand";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeckConfig {
    pub assistant: AssistantSection,
    pub storage: StorageSection,
    pub agents: AgentsSection,
    pub ui: UiSection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendName {
    #[default]
    Claude,
    Codex,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputName {
    #[default]
    Plain,
    AssistantJson,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantSection {
    pub backend: BackendName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    pub output: OutputName,
    pub persistent_session: bool,
}

impl Default for AssistantSection {
    fn default() -> Self {
        Self {
            backend: BackendName::default(),
            program: None,
            args: None,
            model: None,
            reasoning_effort: None,
            output: OutputName::default(),
            persistent_session: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSection {
    pub log_dir: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            log_dir: "~/.deckhand/logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsSection {
    pub stop_grace_ms: u64,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            stop_grace_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiSection {
    pub theme: String,
    pub max_output_lines: usize,
}

impl Default for UiSection {
    fn default() -> Self {
        Self {
            theme: "~/.deckhand/theme.toml".to_string(),
            max_output_lines: 2000,
        }
    }
}

impl DeckConfig {
    /// An explicit path must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match home_dir() {
                Ok(home) => (home.join(CONFIG_DIR).join("config.toml"), false),
                Err(_) => return Ok(Self::default()),
            },
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if !required && err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        Self::from_toml_str(&text).map_err(|source| DeckError::Config { path, source })
    }

    pub fn from_toml_str(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// The `custom` backend has no default program and needs `program` set.
    pub fn assistant_command(&self) -> Result<AssistantCommandConfig> {
        let section = &self.assistant;
        let program = section
            .program
            .as_deref()
            .map(str::trim)
            .filter(|program| !program.is_empty());
        let mut command = match (program, section.backend) {
            (Some(program), _) => AssistantCommandConfig::for_program(program),
            (None, BackendName::Claude) => {
                AssistantCommandConfig::default_for_backend(BackendKind::Claude)
            }
            (None, BackendName::Codex) => {
                AssistantCommandConfig::default_for_backend(BackendKind::Codex)
            }
            (None, BackendName::Custom) => {
                return Err(DeckError::InvalidAssistant(
                    "backend \"custom\" requires [assistant] program".to_string(),
                ));
            }
        };
        if let Some(args) = &section.args {
            command.args_prefix = args.clone();
        }
        command.model = section.model.clone();
        command.model_reasoning_effort = section.reasoning_effort.clone();
        command.output_mode = match section.output {
            OutputName::Plain => OutputMode::PlainText,
            OutputName::AssistantJson => OutputMode::AssistantJson,
        };
        command.persistent_session = section.persistent_session;
        Ok(command)
    }

    pub fn log_dir(&self) -> io::Result<PathBuf> {
        expand_home(&self.storage.log_dir)
    }

    pub fn theme_path(&self) -> io::Result<PathBuf> {
        expand_home(&self.ui.theme)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.agents.stop_grace_ms)
    }
}

pub fn expand_home(raw_path: &str) -> io::Result<PathBuf> {
    if raw_path == "~" {
        return home_dir();
    }
    if let Some(rest) = raw_path.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }
    Ok(PathBuf::from(raw_path))
}

fn home_dir() -> io::Result<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "HOME is not set"))
}
