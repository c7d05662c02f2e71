//! The runner: factory and supervisor for sub-agents.
//!
//! A [`Runner`] owns a base provider, a base tool registry, a shared-memory
//! instance, and the optional reflector/delegation to propagate into every
//! agent it spawns. Spawning:
//!
//! - generates a short random-hex id;
//! - clones the provider (independent tools/system-instruction state over a
//!   shared transport);
//! - builds a filtered registry when the agent type carries a tool
//!   allow-list;
//! - constructs the agent with a type-specialized default system prompt,
//!   turn/timeout limits, and the propagated memory/reflector/delegation.
//!
//! [`Runner::spawn`] runs the task inline; [`Runner::spawn_async`] runs it
//! under a cancellation-capable scope with at most [`MAX_AGENTS`] tasks
//! running concurrently. Completed results are kept in a bounded ring.

use crate::agentflow::agent::{Agent, AgentConfig, AgentResult};
use crate::agentflow::delegation::{DelegationMetrics, DelegationStrategy};
use crate::agentflow::error::AgentError;
use crate::agentflow::memory::SharedMemory;
use crate::agentflow::provider::Provider;
use crate::agentflow::reflector::Reflector;
use crate::agentflow::registry::ToolRegistry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Concurrent async spawns allowed.
pub const MAX_AGENTS: usize = 8;

/// Completed results retained before eviction.
pub const MAX_RUNNER_RESULTS: usize = 100;

/// Default turn budget for spawned agents.
const SPAWN_MAX_TURNS: usize = 10;

/// Type-specialized default system prompt.
pub fn default_system_prompt(agent_type: &str) -> String {
    match agent_type {
        "explore" => "You are an exploration agent. Map the workspace: find the relevant \
                      files, read what matters, and report structure and findings concisely."
            .to_string(),
        "shell" => "You are a shell agent. Run the commands needed to finish the task and \
                    report their outcomes. Prefer non-destructive commands."
            .to_string(),
        "file" => "You are a file agent. Read, create, and edit files precisely. Confirm \
                   the state of every file you touch."
            .to_string(),
        "plan" => "You are a planning agent. Produce a short, concrete, ordered list of \
                   steps that would finish the task. Do not execute anything."
            .to_string(),
        _ => "You are a capable general agent. Use the available tools to finish the task \
              and report the result."
            .to_string(),
    }
}

/// Tool allow-list per agent type; `None` passes the whole base registry
/// through.
pub fn allowed_tools(agent_type: &str) -> Option<Vec<String>> {
    match agent_type {
        "explore" => Some(
            ["read", "list_dir", "tree", "glob", "grep", "search"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ),
        "shell" => Some(
            ["bash", "shell", "exec", "read"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ),
        "file" => Some(
            ["read", "write", "edit", "list_dir"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ),
        "plan" => Some(Vec::new()),
        _ => None,
    }
}

/// Lifecycle of a tracked spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One tracked spawn.
#[derive(Debug, Clone)]
pub struct RunnerRecord {
    /// Short random-hex spawn id.
    pub id: String,
    /// Agent type that was spawned.
    pub agent_type: String,
    /// Current status.
    pub status: RunnerStatus,
    /// Result, present once the spawn finished.
    pub result: Option<AgentResult>,
}

/// Handle to an async spawn.
pub struct SpawnHandle {
    /// Spawn id, usable with [`Runner::result`].
    pub id: String,
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl SpawnHandle {
    /// Cancel the underlying agent scope.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the spawn to finish.
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

struct ResultTable {
    order: VecDeque<String>,
    records: HashMap<String, RunnerRecord>,
}

/// Overrides applied to every spawned agent.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Turn budget per spawned agent.
    pub max_turns: usize,
    /// Overall timeout per spawned agent.
    pub timeout: Option<Duration>,
    /// System prompt override; the type preset applies when `None`.
    pub system_prompt: Option<String>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            max_turns: SPAWN_MAX_TURNS,
            timeout: Some(Duration::from_secs(300)),
            system_prompt: None,
        }
    }
}

/// Factory and supervisor for agents sharing one base provider.
pub struct Runner {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    memory: Arc<SharedMemory>,
    reflector: Option<Arc<Reflector>>,
    delegation: Option<Arc<DelegationStrategy>>,
    delegation_metrics: Option<Arc<DelegationMetrics>>,
    spawn_config: SpawnConfig,
    limiter: Arc<Semaphore>,
    results: Mutex<ResultTable>,
}

impl Runner {
    /// A runner over the given base provider and registry.
    pub fn new(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            registry,
            memory: Arc::new(SharedMemory::new()),
            reflector: None,
            delegation: None,
            delegation_metrics: None,
            spawn_config: SpawnConfig::default(),
            limiter: Arc::new(Semaphore::new(MAX_AGENTS)),
            results: Mutex::new(ResultTable {
                order: VecDeque::new(),
                records: HashMap::new(),
            }),
        }
    }

    /// Share an existing memory instance (builder pattern).
    pub fn with_memory(mut self, memory: Arc<SharedMemory>) -> Self {
        self.memory = memory;
        self
    }

    /// Propagate a reflector into spawned agents (builder pattern).
    pub fn with_reflector(mut self, reflector: Arc<Reflector>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    /// Propagate a delegation strategy into spawned agents (builder
    /// pattern).
    pub fn with_delegation(mut self, delegation: Arc<DelegationStrategy>) -> Self {
        self.delegation = Some(delegation);
        self
    }

    /// Attach delegation metrics for outcome recording (builder pattern).
    pub fn with_delegation_metrics(mut self, metrics: Arc<DelegationMetrics>) -> Self {
        self.delegation_metrics = Some(metrics);
        self
    }

    /// Override the per-spawn configuration (builder pattern).
    pub fn with_spawn_config(mut self, spawn_config: SpawnConfig) -> Self {
        self.spawn_config = spawn_config;
        self
    }

    /// The shared memory propagated to spawned agents.
    pub fn memory(&self) -> &Arc<SharedMemory> {
        &self.memory
    }

    /// Record a delegated execution outcome into the attached metrics.
    pub fn record_delegation(
        &self,
        from: &str,
        to: &str,
        rule: &str,
        success: bool,
        duration: Duration,
    ) {
        if let Some(metrics) = &self.delegation_metrics {
            metrics.record(from, to, rule, success, duration);
        }
    }

    /// Build an agent of the given type at the given delegation depth.
    async fn build_agent(self: &Arc<Self>, id: &str, agent_type: &str, depth: u32) -> Agent {
        let provider = self.provider.clone_provider();
        let registry = match allowed_tools(agent_type) {
            Some(allow) => Arc::new(self.registry.filtered(&allow).await),
            None => Arc::clone(&self.registry),
        };
        let system_instruction = self
            .spawn_config
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_system_prompt(agent_type));

        let mut agent = Agent::new(format!("{}-{}", agent_type, id), provider, registry)
            .with_agent_type(agent_type)
            .with_config(AgentConfig {
                max_turns: self.spawn_config.max_turns,
                overall_timeout: self.spawn_config.timeout,
                system_instruction,
            })
            .with_memory(Arc::clone(&self.memory))
            .with_delegation_depth(depth)
            .with_runner(Arc::clone(self));
        if let Some(reflector) = &self.reflector {
            agent = agent.with_reflector(Arc::clone(reflector));
        }
        if let Some(delegation) = &self.delegation {
            agent = agent.with_delegation(Arc::clone(delegation));
        }
        agent
    }

    fn store_record(&self, record: RunnerRecord) {
        let mut table = self.results.lock().unwrap_or_else(|e| e.into_inner());
        if !table.records.contains_key(&record.id) {
            table.order.push_back(record.id.clone());
        }
        table.records.insert(record.id.clone(), record);

        // Evict oldest finished records beyond the cap.
        while table.order.len() > MAX_RUNNER_RESULTS {
            let evictable = table
                .order
                .iter()
                .position(|id| {
                    table
                        .records
                        .get(id)
                        .map(|r| r.status != RunnerStatus::Running)
                        .unwrap_or(true)
                });
            match evictable {
                Some(pos) => {
                    if let Some(id) = table.order.remove(pos) {
                        table.records.remove(&id);
                    }
                }
                None => break,
            }
        }
    }

    /// Look up a tracked spawn by id.
    pub fn result(&self, id: &str) -> Option<RunnerRecord> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .get(id)
            .cloned()
    }

    /// Number of tracked spawns.
    pub fn tracked_count(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .len()
    }

    /// Spawn an agent and run the task to completion inline.
    pub async fn spawn(self: &Arc<Self>, agent_type: &str, prompt: &str) -> AgentResult {
        self.spawn_at_depth(agent_type, prompt, 1).await
    }

    /// Spawn at an explicit delegation depth; used when one agent delegates
    /// to another.
    pub async fn spawn_at_depth(
        self: &Arc<Self>,
        agent_type: &str,
        prompt: &str,
        depth: u32,
    ) -> AgentResult {
        let id = spawn_id();
        log::info!("runner: spawning '{}' agent {} (depth {})", agent_type, id, depth);
        self.store_record(RunnerRecord {
            id: id.clone(),
            agent_type: agent_type.to_string(),
            status: RunnerStatus::Running,
            result: None,
        });

        let agent = self.build_agent(&id, agent_type, depth).await;
        let result = Box::pin(agent.run(prompt)).await;

        let status = if result.error.is_none() {
            RunnerStatus::Completed
        } else {
            RunnerStatus::Failed
        };
        self.store_record(RunnerRecord {
            id,
            agent_type: agent_type.to_string(),
            status,
            result: Some(result.clone()),
        });
        result
    }

    /// Spawn an agent as a background task under the concurrency cap.
    ///
    /// The returned handle cancels the underlying agent scope; a cancelled
    /// spawn's record transitions to failed with the cancellation error.
    pub async fn spawn_async(self: &Arc<Self>, agent_type: &str, prompt: &str) -> SpawnHandle {
        let id = spawn_id();
        self.store_record(RunnerRecord {
            id: id.clone(),
            agent_type: agent_type.to_string(),
            status: RunnerStatus::Running,
            result: None,
        });

        let agent = self.build_agent(&id, agent_type, 1).await;
        let token = agent.scope().cancellation.clone();
        let runner = Arc::clone(self);
        let record_id = id.clone();
        let record_type = agent_type.to_string();
        let prompt = prompt.to_string();
        let limiter = Arc::clone(&self.limiter);

        let join = tokio::spawn(async move {
            let _permit = limiter.acquire_owned().await.ok();
            let result = agent.run(&prompt).await;
            let status = match &result.error {
                None => RunnerStatus::Completed,
                Some(err) if err.kind == crate::agentflow::error::ErrorKind::Cancelled => {
                    RunnerStatus::Cancelled
                }
                Some(_) => RunnerStatus::Failed,
            };
            runner.store_record(RunnerRecord {
                id: record_id,
                agent_type: record_type,
                status,
                result: Some(result),
            });
        });

        SpawnHandle { id, token, join }
    }

    /// Cancel a tracked running spawn by marking its record failed.
    ///
    /// The underlying task is stopped through its own scope when it was
    /// started via [`Runner::spawn_async`] (use the handle); this method
    /// covers bookkeeping for callers that only kept the id.
    pub fn cancel(&self, id: &str) {
        let mut table = self.results.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = table.records.get_mut(id) {
            if record.status == RunnerStatus::Running {
                record.status = RunnerStatus::Cancelled;
                record.result = Some(AgentResult {
                    text: String::new(),
                    turns: 0,
                    duration: Duration::from_secs(0),
                    error: Some(AgentError::cancelled("spawn cancelled")),
                });
            }
        }
    }
}

/// Short random hex id for spawns.
fn spawn_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
