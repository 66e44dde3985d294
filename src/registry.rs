use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::agent::{AgentHandle, AgentId, AgentStatus, AssistantCommandConfig, LaunchSpec};
use crate::bus::{EventBus, Subscription};
use crate::error::{DeckError, Result};

/// Canonical workspace directory; the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceKey(PathBuf);

impl WorkspaceKey {
    pub fn resolve(path: &Path) -> Result<Self> {
        let canonical = path
            .canonicalize()
            .map_err(|_| DeckError::WorkspaceNotFound(path.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(DeckError::WorkspaceNotFound(path.to_path_buf()));
        }
        Ok(Self(canonical))
    }

    pub fn from_canonical(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn name(&self) -> String {
        self.0
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.0.display().to_string())
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub id: AgentId,
    pub workspace: WorkspaceKey,
    pub pid: u32,
    pub status: AgentStatus,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub command: AssistantCommandConfig,
    pub log_root: PathBuf,
    pub stop_grace: Duration,
}

/// In-memory map of the latest agent per workspace.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<WorkspaceKey, AgentHandle>,
    bus: EventBus,
    settings: RegistrySettings,
}

impl AgentRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            agents: HashMap::new(),
            bus: EventBus::new(),
            settings,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn launch(&mut self, workspace: &Path, prompt: &str) -> Result<AgentId> {
        let key = WorkspaceKey::resolve(workspace)?;
        // Keep the assistant conversation going across turns in the same workspace.
        let carried_session = match self.agents.get(&key) {
            Some(existing) if existing.status().is_active() => {
                return Err(DeckError::AgentBusy {
                    workspace: key.to_string(),
                });
            }
            Some(existing) => existing.saved_session_id(),
            None => None,
        };

        let handle = AgentHandle::spawn(
            LaunchSpec {
                workspace: key.clone(),
                prompt: prompt.to_string(),
                command: self.settings.command.clone(),
                session_id: carried_session,
                log_root: self.settings.log_root.clone(),
            },
            &self.bus,
        )?;
        let id = handle.id().clone();
        self.agents.insert(key, handle);
        Ok(id)
    }

    pub fn get(&self, workspace: &Path) -> Option<&AgentHandle> {
        let key = self.find_key(workspace)?;
        self.agents.get(&key)
    }

    pub fn status(&self, workspace: &Path) -> Option<AgentStatus> {
        self.get(workspace).map(AgentHandle::status)
    }

    pub fn list(&self) -> Vec<AgentSummary> {
        let mut out = self
            .agents
            .values()
            .map(|handle| AgentSummary {
                id: handle.id().clone(),
                workspace: handle.workspace().clone(),
                pid: handle.pid(),
                status: handle.status(),
                log_path: handle.log_path().to_path_buf(),
                started_at: handle.started_at(),
            })
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.workspace.cmp(&b.workspace));
        out
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn stop(&self, workspace: &Path) -> Result<()> {
        self.require(workspace)?.terminate(self.settings.stop_grace)
    }

    pub fn kill(&self, workspace: &Path) -> Result<()> {
        self.require(workspace)?.kill()
    }

    pub fn reset_session(&self, workspace: &Path) -> Result<()> {
        self.require(workspace)?.reset_session();
        Ok(())
    }

    pub fn remove(&mut self, workspace: &Path) -> Result<AgentSummary> {
        let grace = self.settings.stop_grace;
        self.remove_after(workspace, |handle| handle.terminate(grace))
    }

    /// Runs `stop` on the registered handle and forgets it only if that
    /// succeeded, so a failed stop leaves the agent controllable.
    fn remove_after<F>(&mut self, workspace: &Path, stop: F) -> Result<AgentSummary>
    where
        F: FnOnce(&AgentHandle) -> Result<()>,
    {
        let key = self
            .find_key(workspace)
            .ok_or_else(|| DeckError::UnknownWorkspace(workspace.display().to_string()))?;
        if let Some(handle) = self.agents.get(&key) {
            stop(handle)?;
        }
        let handle = self
            .agents
            .remove(&key)
            .ok_or_else(|| DeckError::UnknownWorkspace(key.to_string()))?;
        Ok(AgentSummary {
            id: handle.id().clone(),
            workspace: key,
            pid: handle.pid(),
            status: handle.status(),
            log_path: handle.log_path().to_path_buf(),
            started_at: handle.started_at(),
        })
    }

    /// Terminates every active agent and waits up to `timeout` in total.
    pub fn shutdown(&self, timeout: Duration) {
        for handle in self.agents.values() {
            if let Err(err) = handle.terminate(self.settings.stop_grace) {
                tracing::warn!(agent = %handle.id(), "failed to stop assistant: {err}");
            }
        }
        let deadline = Instant::now() + timeout;
        for handle in self.agents.values() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if handle.wait_exit(remaining).is_active() {
                tracing::warn!(agent = %handle.id(), "assistant still running at shutdown");
            }
        }
    }

    /// Matches by canonical path, or by the stored path once the directory
    /// is gone, so agents outlive their workspace directory.
    fn find_key(&self, workspace: &Path) -> Option<WorkspaceKey> {
        if let Ok(key) = WorkspaceKey::resolve(workspace)
            && self.agents.contains_key(&key)
        {
            return Some(key);
        }
        self.agents
            .keys()
            .find(|key| key.path() == workspace)
            .cloned()
    }

    fn require(&self, workspace: &Path) -> Result<&AgentHandle> {
        self.get(workspace)
            .ok_or_else(|| DeckError::UnknownWorkspace(workspace.display().to_string()))
    }
}

impl Drop for AgentRegistry {
    fn drop(&mut self) {
        for handle in self.agents.values() {
            if handle.status().is_active() {
                let _ = handle.kill();
            }
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/registry_tests.rs"]
mod tests;
