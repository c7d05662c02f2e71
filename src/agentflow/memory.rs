//! Process-wide shared memory for cross-agent context.
//!
//! A [`SharedMemory`] is a keyed store of typed entries. Keys are unique with
//! last-write-wins semantics. Entries are surfaced to agents as an injected
//! context block via [`SharedMemory::render_context`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Semantic category of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A verified piece of information.
    Fact,
    /// An interpretation or conclusion.
    Insight,
    /// The known state of a file.
    FileState,
    /// A decision another agent already made.
    Decision,
}

/// One entry in shared memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique key.
    pub key: String,
    /// Entry body, rendered verbatim into agent context.
    pub value: String,
    /// Semantic category.
    pub kind: MemoryKind,
    /// Name of the agent that wrote the entry.
    pub source_agent: String,
    /// Write timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Keyed, typed, process-wide store shared between agents.
pub struct SharedMemory {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl SharedMemory {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Write an entry; an existing entry under the same key is replaced.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        kind: MemoryKind,
        source_agent: impl Into<String>,
    ) {
        let key = key.into();
        let entry = MemoryEntry {
            key: key.clone(),
            value: value.into(),
            kind,
            source_agent: source_agent.into(),
            timestamp: Utc::now(),
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, entry);
    }

    /// Read an entry by key.
    pub fn get(&self, key: &str) -> Option<MemoryEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Remove an entry by key, returning it when present.
    pub fn remove(&self, key: &str) -> Option<MemoryEntry> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    /// Every entry, sorted by key for stable rendering.
    pub fn entries(&self) -> Vec<MemoryEntry> {
        let mut all: Vec<MemoryEntry> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole store, used when restoring from a checkpoint.
    pub fn replace_all(&self, entries: Vec<MemoryEntry>) {
        let mut map = HashMap::new();
        for entry in entries {
            map.insert(entry.key.clone(), entry);
        }
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = map;
    }

    /// Render every entry into a context block for injection into an agent's
    /// system instruction. Empty string when the store is empty.
    pub fn render_context(&self) -> String {
        let entries = self.entries();
        if entries.is_empty() {
            return String::new();
        }
        let mut out = String::from("Shared knowledge from other agents:\n");
        for entry in entries {
            let kind = match entry.kind {
                MemoryKind::Fact => "fact",
                MemoryKind::Insight => "insight",
                MemoryKind::FileState => "file",
                MemoryKind::Decision => "decision",
            };
            out.push_str(&format!(
                "- [{}] {} = {} (from {})\n",
                kind, entry.key, entry.value, entry.source_agent
            ));
        }
        out
    }
}

impl Default for SharedMemory {
    fn default() -> Self {
        Self::new()
    }
}
