//! Data-driven delegation: when one agent should hand off to another.
//!
//! A [`DelegationStrategy`] holds an ordered rule set. On each eligible turn
//! the agent builds a [`DelegationContext`] and asks the strategy to
//! [`evaluate`](DelegationStrategy::evaluate) it. The first rule whose type
//! filter and predicate match wins — unless the metric gate vetoes it: when
//! [`DelegationMetrics`] are attached, a rule whose historical
//! `success_rate · weight` falls below an adaptive threshold is skipped.
//!
//! Metrics are updated after every delegated execution and persisted
//! asynchronously as a single JSON document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Default cap on delegation chain depth.
pub const MAX_DELEGATION_DEPTH: u32 = 5;

/// Bounded ring of recent per-path outcomes.
pub const MAX_RECENT_RESULTS: usize = 20;

/// Cap on tracked delegation paths before LRU eviction.
pub const MAX_DELEGATION_PATHS: usize = 200;

/// Weight-update smoothing factor.
const WEIGHT_ALPHA: f64 = 0.1;

/// Weight target on success / failure.
const WEIGHT_TARGET_SUCCESS: f64 = 1.2;
const WEIGHT_TARGET_FAILURE: f64 = 0.8;

/// Weight clamp bounds.
const WEIGHT_MIN: f64 = 0.5;
const WEIGHT_MAX: f64 = 2.0;

/// Everything a rule predicate can see about the current turn.
#[derive(Debug, Clone)]
pub struct DelegationContext {
    /// Type of the agent evaluating the rules.
    pub agent_type: String,
    /// Turn number within the current run.
    pub current_turn: usize,
    /// Name of the most recently executed tool.
    pub last_tool_name: Option<String>,
    /// Error of the most recent tool, when it failed.
    pub last_tool_error: Option<String>,
    /// Consecutive failed-tool turns.
    pub stuck_count: u32,
    /// Depth of the delegation chain this agent sits in.
    pub delegation_depth: u32,
}

/// Outcome of evaluating the rule set.
#[derive(Debug, Clone)]
pub enum DelegationDecision {
    /// Hand off to a sub-agent.
    Delegate {
        /// Agent type to spawn.
        target_type: String,
        /// Prompt for the sub-agent.
        prompt: String,
        /// Name of the rule that fired.
        rule_name: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Keep going without delegating.
    Stay,
}

impl DelegationDecision {
    /// Whether this decision delegates.
    pub fn is_delegate(&self) -> bool {
        matches!(self, DelegationDecision::Delegate { .. })
    }
}

type Predicate = Arc<dyn Fn(&DelegationContext) -> bool + Send + Sync>;
type PromptBuilder = Arc<dyn Fn(&DelegationContext) -> String + Send + Sync>;

/// One delegation rule.
#[derive(Clone)]
pub struct DelegationRule {
    /// Stable rule name, used as the metrics key.
    pub name: String,
    /// Only agents of this type may fire the rule; `None` matches all.
    pub from_type: Option<String>,
    /// Predicate over the turn context.
    pub predicate: Predicate,
    /// Agent type to delegate to.
    pub target_type: String,
    /// Builds the sub-agent prompt from the turn context.
    pub prompt_builder: PromptBuilder,
    /// Human-readable reason surfaced in the decision.
    pub reason: String,
}

impl DelegationRule {
    /// Create a rule; use the `with_*` builders to refine it.
    pub fn new(
        name: impl Into<String>,
        target_type: impl Into<String>,
        predicate: Predicate,
        prompt_builder: PromptBuilder,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_type: None,
            predicate,
            target_type: target_type.into(),
            prompt_builder,
            reason: reason.into(),
        }
    }

    /// Restrict the rule to a source agent type (builder pattern).
    pub fn with_from_type(mut self, from_type: impl Into<String>) -> Self {
        self.from_type = Some(from_type.into());
        self
    }
}

/// The default rule set.
///
/// Covers the common escalation paths: an explore agent that needs to run a
/// command, a shell agent that needs file context, a stuck agent escalating
/// to planning, a plan agent that needs exploration, any agent hitting a
/// missing file, and a deep-turn escalation to the general agent.
pub fn default_rules() -> Vec<DelegationRule> {
    vec![
        DelegationRule::new(
            "explore_needs_shell",
            "shell",
            Arc::new(|ctx: &DelegationContext| {
                ctx.last_tool_error
                    .as_deref()
                    .map(|e| e.contains("command") || e.contains("shell"))
                    .unwrap_or(false)
            }),
            Arc::new(|ctx: &DelegationContext| {
                format!(
                    "Run the command the exploration got stuck on. Last error: {}",
                    ctx.last_tool_error.as_deref().unwrap_or("unknown")
                )
            }),
            "exploration needs shell access",
        )
        .with_from_type("explore"),
        DelegationRule::new(
            "shell_needs_files",
            "file",
            Arc::new(|ctx: &DelegationContext| {
                ctx.last_tool_name
                    .as_deref()
                    .map(|n| n.contains("bash") || n.contains("shell"))
                    .unwrap_or(false)
                    && ctx.stuck_count >= 2
            }),
            Arc::new(|ctx: &DelegationContext| {
                format!(
                    "Gather the file context the shell work is missing. Last error: {}",
                    ctx.last_tool_error.as_deref().unwrap_or("unknown")
                )
            }),
            "shell work is missing file context",
        )
        .with_from_type("shell"),
        DelegationRule::new(
            "stuck_escalate_plan",
            "plan",
            Arc::new(|ctx: &DelegationContext| ctx.stuck_count >= 4),
            Arc::new(|ctx: &DelegationContext| {
                format!(
                    "Progress has stalled after {} failed attempts. Produce a step-by-step plan to get unstuck.",
                    ctx.stuck_count
                )
            }),
            "repeated failures call for a plan",
        ),
        DelegationRule::new(
            "plan_needs_explore",
            "explore",
            Arc::new(|ctx: &DelegationContext| {
                ctx.last_tool_error
                    .as_deref()
                    .map(|e| e.contains("not found") || e.contains("unknown"))
                    .unwrap_or(false)
            }),
            Arc::new(|_ctx: &DelegationContext| {
                "Explore the workspace and report the relevant files and structure.".to_string()
            }),
            "planning needs exploration first",
        )
        .with_from_type("plan"),
        DelegationRule::new(
            "missing_file_explore",
            "explore",
            Arc::new(|ctx: &DelegationContext| {
                ctx.last_tool_error
                    .as_deref()
                    .map(|e| {
                        let lowered = e.to_lowercase();
                        lowered.contains("no such file") || lowered.contains("file not found")
                    })
                    .unwrap_or(false)
            }),
            Arc::new(|ctx: &DelegationContext| {
                format!(
                    "A file lookup failed: {}. Find where the file actually lives.",
                    ctx.last_tool_error.as_deref().unwrap_or("unknown")
                )
            }),
            "a referenced file is missing",
        ),
        DelegationRule::new(
            "deep_turn_general",
            "general",
            Arc::new(|ctx: &DelegationContext| ctx.current_turn >= 7),
            Arc::new(|_ctx: &DelegationContext| {
                "Take over this task with a fresh perspective and finish it.".to_string()
            }),
            "long run escalates to the general agent",
        ),
    ]
}

/// Ordered rule set plus the depth and metric gates.
pub struct DelegationStrategy {
    rules: Vec<DelegationRule>,
    max_depth: u32,
    metrics: Option<Arc<DelegationMetrics>>,
}

impl DelegationStrategy {
    /// A strategy over the default rule set.
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
            max_depth: MAX_DELEGATION_DEPTH,
            metrics: None,
        }
    }

    /// A strategy over a custom rule set.
    pub fn with_rules(rules: Vec<DelegationRule>) -> Self {
        Self {
            rules,
            max_depth: MAX_DELEGATION_DEPTH,
            metrics: None,
        }
    }

    /// Override the depth cap (builder pattern).
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Attach delegation metrics, enabling the metric gate (builder pattern).
    pub fn with_metrics(mut self, metrics: Arc<DelegationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Evaluate the rules against `ctx`.
    ///
    /// Returns [`DelegationDecision::Stay`] immediately when the delegation
    /// depth has reached the cap. Otherwise rules are walked in order; the
    /// first whose filter and predicate match — and that survives the metric
    /// gate — wins.
    pub fn evaluate(&self, ctx: &DelegationContext) -> DelegationDecision {
        if ctx.delegation_depth >= self.max_depth {
            log::debug!(
                "delegation suppressed at depth {} (cap {})",
                ctx.delegation_depth,
                self.max_depth
            );
            return DelegationDecision::Stay;
        }

        for rule in &self.rules {
            if let Some(from) = &rule.from_type {
                if from != &ctx.agent_type {
                    continue;
                }
            }
            if !(rule.predicate)(ctx) {
                continue;
            }
            if let Some(metrics) = &self.metrics {
                if !metrics.should_use(&ctx.agent_type, &rule.target_type, &rule.name) {
                    log::debug!("rule '{}' vetoed by delegation metrics", rule.name);
                    continue;
                }
            }
            return DelegationDecision::Delegate {
                target_type: rule.target_type.clone(),
                prompt: (rule.prompt_builder)(ctx),
                rule_name: rule.name.clone(),
                reason: rule.reason.clone(),
            };
        }
        DelegationDecision::Stay
    }
}

impl Default for DelegationStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-path aggregate: one `(from, to, rule)` delegation edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathMetrics {
    /// Source agent type.
    pub from: String,
    /// Target agent type.
    pub to: String,
    /// Rule name the path belongs to.
    pub context: String,
    /// Number of successful delegations.
    pub success: u64,
    /// Number of failed delegations.
    pub failure: u64,
    /// Total wall-clock seconds.
    pub total_time: f64,
    /// Bounded ring of recent outcomes, newest last.
    pub recent_results: VecDeque<bool>,
    /// Timestamp of the most recent delegation.
    pub last_used: DateTime<Utc>,
}

impl PathMetrics {
    fn success_rate(&self) -> f64 {
        let total = self.success + self.failure;
        if total == 0 {
            1.0
        } else {
            self.success as f64 / total as f64
        }
    }

    /// Trend over the recent ring: recent-half success minus older-half
    /// success.
    fn trend(&self) -> f64 {
        if self.recent_results.len() < 4 {
            return 0.0;
        }
        let half = self.recent_results.len() / 2;
        let older: Vec<bool> = self.recent_results.iter().take(half).cloned().collect();
        let recent: Vec<bool> = self.recent_results.iter().skip(half).cloned().collect();
        let rate = |v: &[bool]| {
            if v.is_empty() {
                0.0
            } else {
                v.iter().filter(|s| **s).count() as f64 / v.len() as f64
            }
        };
        rate(&recent) - rate(&older)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetricsDoc {
    path_metrics: HashMap<String, PathMetrics>,
    rule_weights: HashMap<String, f64>,
    updated_at: Option<DateTime<Utc>>,
}

/// Persisted per-path delegation outcomes and rule weights.
pub struct DelegationMetrics {
    path: Option<PathBuf>,
    doc: RwLock<MetricsDoc>,
}

impl DelegationMetrics {
    /// An in-memory store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: RwLock::new(MetricsDoc::default()),
        }
    }

    /// Open (or create) a store backed by the given file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = if path.exists() {
            std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default()
        } else {
            MetricsDoc::default()
        };
        Self {
            path: Some(path),
            doc: RwLock::new(doc),
        }
    }

    fn path_key(from: &str, to: &str, rule: &str) -> String {
        format!("{}->{}:{}", from, to, rule)
    }

    /// The metric gate: whether the path's historical `success_rate · weight`
    /// clears the adaptive threshold.
    ///
    /// The threshold is 0.3 nominally, 0.2 when the recent trend is
    /// improving, 0.4 when it is declining. An unseen path always passes.
    pub fn should_use(&self, from: &str, to: &str, rule: &str) -> bool {
        let key = Self::path_key(from, to, rule);
        let doc = self.doc.read().unwrap_or_else(|e| e.into_inner());
        let path = match doc.path_metrics.get(&key) {
            Some(path) => path,
            None => return true,
        };
        let weight = doc.rule_weights.get(&key).copied().unwrap_or(1.0);
        let trend = path.trend();
        let threshold = if trend > 0.1 {
            0.2
        } else if trend < -0.1 {
            0.4
        } else {
            0.3
        };
        path.success_rate() * weight >= threshold
    }

    /// Record one delegated execution, adjust the path weight, evict the
    /// least-recently-used path beyond the cap, and persist asynchronously.
    pub fn record(&self, from: &str, to: &str, rule: &str, success: bool, duration: Duration) {
        let key = Self::path_key(from, to, rule);
        let serialized = {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            let entry = doc
                .path_metrics
                .entry(key.clone())
                .or_insert_with(|| PathMetrics {
                    from: from.to_string(),
                    to: to.to_string(),
                    context: rule.to_string(),
                    success: 0,
                    failure: 0,
                    total_time: 0.0,
                    recent_results: VecDeque::new(),
                    last_used: Utc::now(),
                });
            if success {
                entry.success += 1;
            } else {
                entry.failure += 1;
            }
            entry.total_time += duration.as_secs_f64();
            entry.recent_results.push_back(success);
            while entry.recent_results.len() > MAX_RECENT_RESULTS {
                entry.recent_results.pop_front();
            }
            entry.last_used = Utc::now();

            let target = if success {
                WEIGHT_TARGET_SUCCESS
            } else {
                WEIGHT_TARGET_FAILURE
            };
            let weight = doc.rule_weights.entry(key).or_insert(1.0);
            *weight = (*weight * (1.0 - WEIGHT_ALPHA) + target * WEIGHT_ALPHA)
                .clamp(WEIGHT_MIN, WEIGHT_MAX);

            if doc.path_metrics.len() > MAX_DELEGATION_PATHS {
                if let Some(oldest) = doc
                    .path_metrics
                    .iter()
                    .min_by_key(|(_, p)| p.last_used)
                    .map(|(k, _)| k.clone())
                {
                    doc.path_metrics.remove(&oldest);
                    doc.rule_weights.remove(&oldest);
                    log::debug!("evicted delegation path '{}'", oldest);
                }
            }

            doc.updated_at = Some(Utc::now());
            serde_json::to_string_pretty(&*doc).ok()
        };

        if let (Some(path), Some(json)) = (&self.path, serialized) {
            let path = path.clone();
            tokio::spawn(async move {
                if let Err(err) = tokio::fs::write(&path, json).await {
                    log::warn!("failed to persist delegation metrics: {}", err);
                }
            });
        }
    }

    /// Current weight of a path, 1.0 when unseen.
    pub fn weight(&self, from: &str, to: &str, rule: &str) -> f64 {
        let key = Self::path_key(from, to, rule);
        self.doc
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .rule_weights
            .get(&key)
            .copied()
            .unwrap_or(1.0)
    }

    /// Number of tracked paths.
    pub fn path_count(&self) -> usize {
        self.doc
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .path_metrics
            .len()
    }
}
