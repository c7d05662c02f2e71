//! Persisted success-rate trackers.
//!
//! Three document stores share one shape: an in-memory map behind a lock,
//! persisted as a single JSON document that is atomically replaced after
//! every update.
//!
//! - [`StrategyOptimizer`] — success metrics keyed by strategy, with
//!   per-task-type counts. Consulted by the planner to order candidate
//!   actions and by the smart router to pick a tier.
//! - [`PromptOptimizer`] — success metrics keyed by prompt variant.
//! - [`TaskExampleStore`] — recorded successful runs, for few-shot reuse.
//!
//! Whole-document rewrites are deliberate: at hundreds to low-thousands of
//! entries they eliminate incremental-consistency concerns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

/// Aggregate metrics for one strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyMetrics {
    /// Number of successful executions.
    pub success_count: u64,
    /// Number of failed executions.
    pub failure_count: u64,
    /// Total wall-clock seconds across executions.
    pub total_time: f64,
    /// Average execution seconds.
    pub avg_duration: f64,
    /// Timestamp of the most recent execution.
    pub last_used: Option<DateTime<Utc>>,
    /// Execution counts per task type.
    #[serde(default)]
    pub task_types: HashMap<String, u64>,
}

impl StrategyMetrics {
    /// Fraction of executions that succeeded; 0.0 when never used.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

fn write_doc<T: Serialize>(path: &Option<PathBuf>, doc: &T) {
    if let Some(path) = path {
        match serde_json::to_string_pretty(doc) {
            Ok(json) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(err) = std::fs::write(path, json) {
                    log::warn!("failed to persist {}: {}", path.display(), err);
                }
            }
            Err(err) => log::warn!("failed to serialize store: {}", err),
        }
    }
}

fn read_doc<T: Default + for<'de> Deserialize<'de>>(path: &PathBuf) -> T {
    if path.exists() {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    } else {
        T::default()
    }
}

/// Success metrics keyed by `(strategy, task type)`.
pub struct StrategyOptimizer {
    path: Option<PathBuf>,
    metrics: RwLock<HashMap<String, StrategyMetrics>>,
}

impl StrategyOptimizer {
    /// An in-memory optimizer with no persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or create) an optimizer backed by the given file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let metrics = read_doc(&path);
        Self {
            path: Some(path),
            metrics: RwLock::new(metrics),
        }
    }

    /// Record one execution of `strategy` on `task_type`.
    pub fn record(&self, strategy: &str, task_type: &str, success: bool, duration: Duration) {
        let serialized = {
            let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
            let entry = metrics.entry(strategy.to_string()).or_default();
            if success {
                entry.success_count += 1;
            } else {
                entry.failure_count += 1;
            }
            entry.total_time += duration.as_secs_f64();
            let total = entry.success_count + entry.failure_count;
            entry.avg_duration = entry.total_time / total as f64;
            entry.last_used = Some(Utc::now());
            *entry.task_types.entry(task_type.to_string()).or_insert(0) += 1;
            serde_json::to_string_pretty(&*metrics).ok()
        };
        if let (Some(path), Some(json)) = (&self.path, serialized) {
            let path = path.clone();
            tokio::spawn(async move {
                if let Err(err) = tokio::fs::write(&path, json).await {
                    log::warn!("failed to persist strategy metrics: {}", err);
                }
            });
        }
    }

    /// Historical success rate of `strategy`, or `None` when never used.
    pub fn success_rate(&self, strategy: &str) -> Option<f64> {
        self.metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(strategy)
            .filter(|m| m.success_count + m.failure_count > 0)
            .map(StrategyMetrics::success_rate)
    }

    /// The strategy with the best success rate among those used on
    /// `task_type`, with its rate.
    pub fn best_strategy(&self, task_type: &str) -> Option<(String, f64)> {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        metrics
            .iter()
            .filter(|(_, m)| m.task_types.contains_key(task_type))
            .map(|(name, m)| (name.clone(), m.success_rate()))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Snapshot of the metrics for a strategy.
    pub fn metrics_for(&self, strategy: &str) -> Option<StrategyMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(strategy)
            .cloned()
    }
}

/// Aggregate metrics for one prompt variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVariant {
    /// Stable variant id.
    pub id: String,
    /// The unmodified base prompt.
    pub base_prompt: String,
    /// The variation applied on top of the base.
    pub variation: String,
    /// Fraction of uses that succeeded.
    pub success_rate: f64,
    /// Average tokens per use.
    pub avg_tokens: f64,
    /// Average seconds per use.
    pub avg_duration: f64,
    /// Number of uses.
    pub use_count: u64,
    /// Number of successful uses.
    pub success_count: u64,
    /// Number of failed uses.
    pub failure_count: u64,
    /// Timestamp of the most recent use.
    pub last_used: Option<DateTime<Utc>>,
    /// When the variant was first recorded.
    pub created: DateTime<Utc>,
}

/// Success metrics keyed by `(base prompt, variation)`.
pub struct PromptOptimizer {
    path: Option<PathBuf>,
    variants: RwLock<HashMap<String, PromptVariant>>,
}

impl PromptOptimizer {
    /// An in-memory optimizer with no persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            variants: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or create) an optimizer backed by the given file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let variants = read_doc(&path);
        Self {
            path: Some(path),
            variants: RwLock::new(variants),
        }
    }

    fn variant_id(base_prompt: &str, variation: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(base_prompt.as_bytes());
        hasher.update(b"\x00");
        hasher.update(variation.as_bytes());
        let digest = hasher.finalize();
        format!("{:x}", digest)[..12].to_string()
    }

    /// Record one use of a variant.
    pub fn record(
        &self,
        base_prompt: &str,
        variation: &str,
        success: bool,
        tokens: u64,
        duration: Duration,
    ) {
        let id = Self::variant_id(base_prompt, variation);
        let serialized = {
            let mut variants = self.variants.write().unwrap_or_else(|e| e.into_inner());
            let entry = variants.entry(id.clone()).or_insert_with(|| PromptVariant {
                id: id.clone(),
                base_prompt: base_prompt.to_string(),
                variation: variation.to_string(),
                success_rate: 0.0,
                avg_tokens: 0.0,
                avg_duration: 0.0,
                use_count: 0,
                success_count: 0,
                failure_count: 0,
                last_used: None,
                created: Utc::now(),
            });
            entry.use_count += 1;
            if success {
                entry.success_count += 1;
            } else {
                entry.failure_count += 1;
            }
            let n = entry.use_count as f64;
            entry.success_rate = entry.success_count as f64 / n;
            entry.avg_tokens = entry.avg_tokens + (tokens as f64 - entry.avg_tokens) / n;
            entry.avg_duration =
                entry.avg_duration + (duration.as_secs_f64() - entry.avg_duration) / n;
            entry.last_used = Some(Utc::now());
            serde_json::to_string_pretty(&*variants).ok()
        };
        if let (Some(path), Some(json)) = (&self.path, serialized) {
            let path = path.clone();
            tokio::spawn(async move {
                if let Err(err) = tokio::fs::write(&path, json).await {
                    log::warn!("failed to persist prompt variants: {}", err);
                }
            });
        }
    }

    /// The best-performing variation of `base_prompt` with at least one use.
    pub fn best_variant(&self, base_prompt: &str) -> Option<PromptVariant> {
        let variants = self.variants.read().unwrap_or_else(|e| e.into_inner());
        variants
            .values()
            .filter(|v| v.base_prompt == base_prompt && v.use_count > 0)
            .max_by(|a, b| {
                a.success_rate
                    .partial_cmp(&b.success_rate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    /// Snapshot of a variant by id.
    pub fn variant(&self, id: &str) -> Option<PromptVariant> {
        self.variants
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

/// One recorded successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExample {
    /// Stable example id.
    pub id: String,
    /// Classified task type.
    pub task_type: String,
    /// The original input prompt.
    pub input_prompt: String,
    /// Agent type that ran it.
    pub agent_type: String,
    /// Distinct tools used.
    pub tools_used: Vec<String>,
    /// Tool names in invocation order.
    pub tool_sequence: Vec<String>,
    /// Final output text.
    pub final_output: String,
    /// Wall-clock seconds.
    pub duration: f64,
    /// Tokens billed.
    pub tokens_used: u64,
    /// Caller-assigned quality score in `0.0..=1.0`.
    pub success_score: f64,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the example was recorded.
    pub created: DateTime<Utc>,
    /// How many times the example has been surfaced.
    #[serde(default)]
    pub use_count: u64,
}

/// Recorded successful runs for few-shot reuse.
pub struct TaskExampleStore {
    path: Option<PathBuf>,
    examples: RwLock<HashMap<String, TaskExample>>,
}

impl TaskExampleStore {
    /// An in-memory store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            examples: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or create) a store backed by the given file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let examples = read_doc(&path);
        Self {
            path: Some(path),
            examples: RwLock::new(examples),
        }
    }

    /// Record an example; the id is generated when empty.
    pub fn record(&self, mut example: TaskExample) -> String {
        if example.id.is_empty() {
            example.id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        }
        let id = example.id.clone();
        let snapshot = {
            let mut examples = self.examples.write().unwrap_or_else(|e| e.into_inner());
            examples.insert(id.clone(), example);
            examples.clone()
        };
        write_doc(&self.path, &snapshot);
        id
    }

    /// Best-scoring examples for `task_type`, bumping their use counts.
    pub fn examples_for(&self, task_type: &str, limit: usize) -> Vec<TaskExample> {
        let mut examples = self.examples.write().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<TaskExample> = examples
            .values()
            .filter(|e| e.task_type == task_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.success_score
                .partial_cmp(&a.success_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matching.truncate(limit);
        for example in &matching {
            if let Some(stored) = examples.get_mut(&example.id) {
                stored.use_count += 1;
            }
        }
        matching
    }

    /// Number of stored examples.
    pub fn len(&self) -> usize {
        self.examples
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
