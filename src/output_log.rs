use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::agent::{AgentId, StreamKind};
use crate::registry::WorkspaceKey;

/// Append-only transcript of one agent's streams.
#[derive(Debug, Clone)]
pub struct OutputLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl OutputLog {
    pub fn create(log_root: &Path, workspace: &WorkspaceKey, agent_id: &AgentId) -> io::Result<Self> {
        let dir = log_root.join(workspace_slug(workspace.path()));
        fs::create_dir_all(&dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let path = dir.join(format!("{stamp}-{agent_id}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_header(&self, agent_id: &AgentId, workspace: &WorkspaceKey, command_line: &str) {
        self.write_raw(&format!(
            "# deckhand agent {agent_id} workspace {} command {command_line}",
            workspace.path().display()
        ));
    }

    pub fn write_line(&self, stream: StreamKind, line: &str) {
        self.write_tagged(stream.tag(), line);
    }

    pub fn write_system(&self, line: &str) {
        self.write_tagged("system", line);
    }

    pub fn write_exit(&self, success: bool, code: i32) {
        self.write_tagged("exit", &format!("code={code} success={success}"));
    }

    fn write_tagged(&self, tag: &str, line: &str) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.write_raw(&format!("{now} [{tag}] {line}"));
    }

    fn write_raw(&self, text: &str) {
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        let result = writeln!(file, "{text}").and_then(|_| file.flush());
        if let Err(err) = result {
            tracing::warn!(path = %self.path.display(), "failed to write agent log: {err}");
        }
    }
}

/// Directory name for a workspace: readable final component plus a short
/// hash of the full path.
pub fn workspace_slug(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("workspace");
    let mut readable: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    readable.truncate(48);
    if readable.trim_matches('-').is_empty() {
        readable = "workspace".to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    let digest = hasher.finalize();
    let suffix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("{readable}-{suffix}")
}
