//! Agent checkpoints: snapshots of execution state for save/restore.
//!
//! A checkpoint captures the serialized history, turn budget and count,
//! tools used, and scratchpad — plus, when present, the shared-memory
//! entries and the plan lifecycle. The [`CheckpointStore`] writes one JSON
//! file per checkpoint and enforces a per-agent retention policy: only the
//! N most recent checkpoints survive, older ones are deleted in name-sorted
//! order.

use crate::agentflow::content::Content;
use crate::agentflow::error::AgentError;
use crate::agentflow::memory::MemoryEntry;
use crate::agentflow::plan::PlanLifecycle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Checkpoints kept per agent by default.
pub const DEFAULT_RETENTION: usize = 5;

/// The agent-local slice of a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    /// Serialized conversation history.
    pub history: Vec<Content>,
    /// Turn budget at snapshot time.
    pub max_turns: usize,
    /// Turns already consumed.
    pub turn_count: usize,
    /// Distinct tool names used.
    pub tools_used: Vec<String>,
    /// Scratchpad text.
    pub scratchpad: String,
}

/// A full snapshot of agent execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    /// Checkpoint id: `<agent>-<serial>` ordering lexically by recency.
    pub id: String,
    /// Name of the agent the snapshot belongs to.
    pub agent_name: String,
    /// The agent-local state.
    pub agent_state: AgentState,
    /// Shared-memory entries, when the agent carried a memory handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_memory: Option<Vec<MemoryEntry>>,
    /// Plan lifecycle, when the agent carried a planner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_state: Option<PlanLifecycle>,
    /// Snapshot timestamp.
    pub timestamp: DateTime<Utc>,
    /// Why the snapshot was taken (`"manual"`, `"interval"`, ...).
    pub trigger_reason: String,
    /// Turn number at snapshot time.
    pub turn_number: usize,
}

impl AgentCheckpoint {
    /// Assemble a checkpoint for `agent_name`.
    pub fn new(
        agent_name: &str,
        agent_state: AgentState,
        shared_memory: Option<Vec<MemoryEntry>>,
        plan_state: Option<PlanLifecycle>,
        trigger_reason: &str,
        turn_number: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{}-{}", sanitize(agent_name), now.format("%Y%m%dT%H%M%S%3f")),
            agent_name: agent_name.to_string(),
            agent_state,
            shared_memory,
            plan_state,
            timestamp: now,
            trigger_reason: trigger_reason.to_string(),
            turn_number,
        }
    }
}

/// Directory-backed checkpoint store with retention.
pub struct CheckpointStore {
    dir: PathBuf,
    retention: usize,
}

impl CheckpointStore {
    /// Open a store rooted at `dir` with the default retention.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| AgentError::other(format!("create checkpoint dir: {}", e)))?;
        Ok(Self {
            dir,
            retention: DEFAULT_RETENTION,
        })
    }

    /// Override how many checkpoints survive per agent (builder pattern).
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Save a checkpoint and apply the retention policy for its agent.
    pub fn save(&self, checkpoint: &AgentCheckpoint) -> Result<(), AgentError> {
        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| AgentError::other(format!("serialize checkpoint: {}", e)))?;
        std::fs::write(self.path_for(&checkpoint.id), json)
            .map_err(|e| AgentError::other(format!("write checkpoint: {}", e)))?;
        self.apply_retention(&checkpoint.agent_name)?;
        Ok(())
    }

    /// Load a checkpoint by id.
    pub fn load(&self, id: &str) -> Result<AgentCheckpoint, AgentError> {
        let raw = std::fs::read_to_string(self.path_for(id))
            .map_err(|e| AgentError::other(format!("read checkpoint '{}': {}", id, e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| AgentError::other(format!("parse checkpoint '{}': {}", id, e)))
    }

    /// Checkpoint ids for one agent, oldest first.
    pub fn list_for(&self, agent_name: &str) -> Result<Vec<String>, AgentError> {
        let prefix = format!("{}-", sanitize(agent_name));
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| AgentError::other(format!("list checkpoints: {}", e)))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if stem.starts_with(&prefix) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// The most recent checkpoint for one agent.
    pub fn latest_for(&self, agent_name: &str) -> Result<Option<AgentCheckpoint>, AgentError> {
        let ids = self.list_for(agent_name)?;
        match ids.last() {
            Some(id) => self.load(id).map(Some),
            None => Ok(None),
        }
    }

    fn apply_retention(&self, agent_name: &str) -> Result<(), AgentError> {
        let ids = self.list_for(agent_name)?;
        if ids.len() <= self.retention {
            return Ok(());
        }
        let excess = ids.len() - self.retention;
        for id in ids.into_iter().take(excess) {
            if let Err(err) = std::fs::remove_file(self.path_for(&id)) {
                log::warn!("failed to prune checkpoint '{}': {}", id, err);
            }
        }
        Ok(())
    }
}

/// File-name-safe form of an agent name.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
