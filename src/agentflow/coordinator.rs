//! Dependency-aware task scheduling atop a runner.
//!
//! The [`Coordinator`] runs a DAG of [`CoordinatedTask`]s: tasks become
//! ready when every dependency has completed, ready tasks launch in priority
//! order up to `max_parallel` at a time, and a failed dependency fails its
//! dependents with a dependency-failure result. The dependency graph is
//! validated to be acyclic before anything runs.

use crate::agentflow::agent::AgentResult;
use crate::agentflow::error::AgentError;
use crate::agentflow::runner::Runner;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default concurrent task cap.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Scheduling status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One node of the task graph.
#[derive(Debug, Clone)]
pub struct CoordinatedTask {
    /// Unique task id.
    pub id: String,
    /// Prompt for the spawned agent.
    pub prompt: String,
    /// Agent type to spawn.
    pub agent_type: String,
    /// Higher runs earlier among ready tasks.
    pub priority: i32,
    /// Ids that must complete before this task is ready.
    pub dependencies: Vec<String>,
    /// Scheduling status.
    pub status: TaskStatus,
    /// Result, present once the task is terminal.
    pub result: Option<AgentResult>,
}

impl CoordinatedTask {
    /// A pending task with default type and priority.
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            agent_type: "general".to_string(),
            priority: 0,
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
        }
    }

    /// Set the agent type (builder pattern).
    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    /// Set the priority (builder pattern).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependency list (builder pattern).
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Dependency-aware scheduler over a [`Runner`].
pub struct Coordinator {
    runner: Arc<Runner>,
    max_parallel: usize,
    cancellation: CancellationToken,
    cancelled_tasks: Mutex<HashSet<String>>,
}

impl Coordinator {
    /// A coordinator with the default parallelism.
    pub fn new(runner: Arc<Runner>) -> Self {
        Self {
            runner,
            max_parallel: DEFAULT_MAX_PARALLEL,
            cancellation: CancellationToken::new(),
            cancelled_tasks: Mutex::new(HashSet::new()),
        }
    }

    /// Override the concurrent task cap (builder pattern).
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Cancel the whole coordination run. Unstarted and running tasks end
    /// with a cancellation error.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Mark one task failed before or while it runs; failure propagates to
    /// its dependents through the normal dependency rule.
    pub fn cancel_task(&self, id: &str) {
        self.cancelled_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string());
    }

    /// Validate the task list: unique ids, known dependencies, and an
    /// acyclic graph.
    pub fn validate(tasks: &[CoordinatedTask]) -> Result<(), AgentError> {
        let mut ids = HashSet::new();
        for task in tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(AgentError::coordination(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }
        for task in tasks {
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(AgentError::coordination(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        // Kahn's algorithm: leftovers mean a cycle.
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in tasks {
            indegree.entry(task.id.as_str()).or_insert(0);
            for dep in &task.dependencies {
                *indegree.entry(task.id.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_insert_with(Vec::new)
                    .push(task.id.as_str());
            }
        }
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            if let Some(children) = dependents.get(id) {
                for &child in children {
                    if let Some(deg) = indegree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(child);
                        }
                    }
                }
            }
        }
        if visited != tasks.len() {
            return Err(AgentError::coordination(
                "dependency graph contains a cycle",
            ));
        }
        Ok(())
    }

    /// Run the task graph to completion.
    ///
    /// Returns the terminal task table keyed by id. Fails fast only on an
    /// invalid graph; individual task failures are recorded on the tasks
    /// and propagated to dependents.
    pub async fn run_tasks(
        &self,
        tasks: Vec<CoordinatedTask>,
    ) -> Result<HashMap<String, CoordinatedTask>, AgentError> {
        Self::validate(&tasks)?;

        let mut table: HashMap<String, CoordinatedTask> = tasks
            .into_iter()
            .map(|mut task| {
                task.status = TaskStatus::Pending;
                (task.id.clone(), task)
            })
            .collect();

        let mut running: JoinSet<(String, AgentResult)> = JoinSet::new();

        loop {
            if self.cancellation.is_cancelled() {
                running.abort_all();
                for task in table.values_mut() {
                    if matches!(task.status, TaskStatus::Pending | TaskStatus::Running) {
                        task.status = TaskStatus::Failed;
                        task.result = Some(cancelled_result());
                    }
                }
                break;
            }

            self.apply_task_cancellations(&mut table);
            propagate_dependency_failures(&mut table);

            // Collect ready tasks, best priority first.
            let mut ready: Vec<String> = table
                .values()
                .filter(|task| {
                    task.status == TaskStatus::Pending
                        && task.dependencies.iter().all(|dep| {
                            table
                                .get(dep)
                                .map(|d| d.status == TaskStatus::Completed)
                                .unwrap_or(false)
                        })
                })
                .map(|task| task.id.clone())
                .collect();
            ready.sort_by_key(|id| {
                std::cmp::Reverse(table.get(id).map(|t| t.priority).unwrap_or(0))
            });

            let slots = self.max_parallel.saturating_sub(running.len());
            for id in ready.into_iter().take(slots) {
                let task = match table.get_mut(&id) {
                    Some(task) => task,
                    None => continue,
                };
                task.status = TaskStatus::Running;
                log::info!(
                    "coordinator: launching task '{}' ({}, priority {})",
                    task.id,
                    task.agent_type,
                    task.priority
                );
                let runner = Arc::clone(&self.runner);
                let agent_type = task.agent_type.clone();
                let prompt = task.prompt.clone();
                let task_id = id.clone();
                running.spawn(async move {
                    let result = runner.spawn(&agent_type, &prompt).await;
                    (task_id, result)
                });
            }

            if running.is_empty() {
                break;
            }

            // Wait for at least one completion (or cancellation).
            let joined = tokio::select! {
                _ = self.cancellation.cancelled() => continue,
                joined = running.join_next() => joined,
            };
            match joined {
                Some(Ok((task_id, result))) => {
                    if let Some(task) = table.get_mut(&task_id) {
                        task.status = if result.error.is_none() {
                            TaskStatus::Completed
                        } else {
                            TaskStatus::Failed
                        };
                        task.result = Some(result);
                    }
                }
                Some(Err(join_err)) => {
                    log::error!("coordinator: task join error: {}", join_err);
                }
                None => break,
            }
        }

        Ok(table)
    }

    fn apply_task_cancellations(&self, table: &mut HashMap<String, CoordinatedTask>) {
        let cancelled = {
            let mut set = self
                .cancelled_tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *set)
        };
        for id in cancelled {
            if let Some(task) = table.get_mut(&id) {
                if matches!(task.status, TaskStatus::Pending | TaskStatus::Running) {
                    task.status = TaskStatus::Failed;
                    task.result = Some(cancelled_result());
                }
            }
        }
    }

    /// Fan a flat task list through the runner under the parallelism cap.
    pub async fn run_parallel(&self, tasks: Vec<CoordinatedTask>) -> Vec<AgentResult> {
        let limiter = Arc::new(tokio::sync::Semaphore::new(self.max_parallel));
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let runner = Arc::clone(&self.runner);
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                runner.spawn(&task.agent_type, &task.prompt).await
            }));
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => results.push(AgentResult {
                    text: String::new(),
                    turns: 0,
                    duration: Duration::from_secs(0),
                    error: Some(AgentError::coordination(format!(
                        "task join error: {}",
                        join_err
                    ))),
                }),
            }
        }
        results
    }

    /// Run tasks in order, short-circuiting on the first error.
    pub async fn run_sequential(
        &self,
        tasks: Vec<CoordinatedTask>,
    ) -> Result<Vec<AgentResult>, AgentError> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = self.runner.spawn(&task.agent_type, &task.prompt).await;
            let failed = result.error.clone();
            results.push(result);
            if let Some(error) = failed {
                return Err(error);
            }
        }
        Ok(results)
    }
}

/// Mark pending tasks whose dependencies failed, transitively.
fn propagate_dependency_failures(table: &mut HashMap<String, CoordinatedTask>) {
    loop {
        let failing: Vec<String> = table
            .values()
            .filter(|task| {
                task.status == TaskStatus::Pending
                    && task.dependencies.iter().any(|dep| {
                        table
                            .get(dep)
                            .map(|d| d.status == TaskStatus::Failed)
                            .unwrap_or(false)
                    })
            })
            .map(|task| task.id.clone())
            .collect();
        if failing.is_empty() {
            break;
        }
        for id in failing {
            let failed_dep = table
                .get(&id)
                .and_then(|task| {
                    task.dependencies
                        .iter()
                        .find(|dep| {
                            table
                                .get(*dep)
                                .map(|d| d.status == TaskStatus::Failed)
                                .unwrap_or(false)
                        })
                        .cloned()
                })
                .unwrap_or_default();
            if let Some(task) = table.get_mut(&id) {
                task.status = TaskStatus::Failed;
                task.result = Some(AgentResult {
                    text: String::new(),
                    turns: 0,
                    duration: Duration::from_secs(0),
                    error: Some(AgentError::coordination(format!(
                        "dependency failed: '{}'",
                        failed_dep
                    ))),
                });
                log::warn!("coordinator: task '{}' failed via dependency", id);
            }
        }
    }
}

fn cancelled_result() -> AgentResult {
    AgentResult {
        text: String::new(),
        turns: 0,
        duration: Duration::from_secs(0),
        error: Some(AgentError::cancelled("coordination cancelled")),
    }
}
