//! The agent turn loop.
//!
//! An [`Agent`] drives a provider through a multi-turn conversation toward a
//! single user message. Each turn it streams a response, detects
//! call loops *before* executing anything, dispatches tool calls through the
//! executor, folds failures through the reflector, and — when it has been
//! stuck long enough — consults the delegation strategy to hand off to a
//! sub-agent. The loop ends on the first response with no function calls, or
//! fails once `max_turns` (plus any loop-recovery bonus turns) is exhausted.
//!
//! Loop detection works on two independent layers:
//!
//! - **exact**: a key of `name + canonicalized args` (zero-valued arguments
//!   dropped, rest sorted) — three identical calls trigger an intervention
//!   with a tool-specific suggestion and grant up to three bonus turns;
//! - **broad**: the tool name alone — eight calls of the same tool trigger a
//!   stronger change-approach intervention (no bonus turns).
//!
//! Interventions are synthetic user-role messages injected into history; the
//! offending calls are *not* executed.
//!
//! Tool errors never abort the run — they are captured into the
//! conversation. All per-agent mutable state (call history, tools used,
//! progress) sits behind its own lock and is safe to read from progress
//! callbacks while a run is in flight.

use crate::agentflow::checkpoint::{AgentCheckpoint, AgentState, CheckpointStore};
use crate::agentflow::content::{Content, FunctionCall, Part};
use crate::agentflow::delegation::{DelegationContext, DelegationDecision, DelegationStrategy};
use crate::agentflow::error::{AgentError, ErrorKind};
use crate::agentflow::executor::{ExecutedCall, ToolExecutor};
use crate::agentflow::memory::SharedMemory;
use crate::agentflow::planner::{PlanEnv, Planner};
use crate::agentflow::provider::Provider;
use crate::agentflow::reflector::Reflector;
use crate::agentflow::registry::ToolRegistry;
use crate::agentflow::runner::Runner;
use crate::agentflow::tool::ToolContext;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Identical exact-key calls tolerated before an intervention fires.
pub const EXACT_LOOP_THRESHOLD: u32 = 3;

/// Same-name calls tolerated before the broad intervention fires.
pub const BROAD_LOOP_THRESHOLD: u32 = 8;

/// Bonus turns granted when the exact-loop intervention fires.
pub const LOOP_BONUS_TURNS: usize = 3;

/// Failed-tool turns tolerated before delegation is considered.
pub const STUCK_DELEGATION_THRESHOLD: u32 = 3;

/// Agent tuning knobs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum provider round-trips per run.
    pub max_turns: usize,
    /// Overall wall-clock bound for a run.
    pub overall_timeout: Option<Duration>,
    /// Base system instruction; pinned context and shared memory are
    /// appended.
    pub system_instruction: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            overall_timeout: None,
            system_instruction: "You are a capable assistant that uses tools to finish tasks."
                .to_string(),
        }
    }
}

/// Where a run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Progress snapshot readable from other threads.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Current lifecycle status.
    pub status: ProgressStatus,
    /// Turn the loop is on (1-based; 0 before the first turn).
    pub turn: usize,
    /// Name of the most recently executed tool.
    pub last_tool: Option<String>,
}

/// Callback fired on every progress change.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// The outcome of one run.
///
/// A failed run still returns normally: `error` is set, `text` carries any
/// partial output, and `turns`/`duration` reflect what actually happened.
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Final (or partial, on failure) output text.
    pub text: String,
    /// Provider round-trips observed; for plan-driven runs, the replan
    /// count.
    pub turns: usize,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Terminal error, `None` on success.
    pub error: Option<AgentError>,
}

/// What the next provider call should deliver.
enum NextSend {
    /// A user message delta (may be empty after an intervention).
    UserMessage(String),
    /// Function responses for the calls of the last model turn.
    FunctionResponses(Vec<Part>),
}

/// Mutable state of one run, kept separate so partial output survives
/// failures.
struct RunState {
    text: String,
    turns: usize,
}

/// A named driver that iterates a provider with a tool set toward a single
/// user message.
pub struct Agent {
    /// Display name used in logs and shared-memory attribution.
    pub name: String,
    /// Agent type consulted by delegation rules (e.g. `"general"`,
    /// `"explore"`).
    pub agent_type: String,
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    config: AgentConfig,
    reflector: Option<Arc<Reflector>>,
    delegation: Option<Arc<DelegationStrategy>>,
    runner: Option<Arc<Runner>>,
    planner: Option<Arc<Planner>>,
    memory: Option<Arc<SharedMemory>>,
    pinned_context: Vec<String>,
    scratchpad: Mutex<String>,
    history: Mutex<Vec<Content>>,
    call_history: Mutex<HashMap<String, u32>>,
    broad_history: Mutex<HashMap<String, u32>>,
    tools_used: Mutex<Vec<String>>,
    progress: Mutex<Progress>,
    progress_callback: Option<ProgressCallback>,
    delegation_depth: u32,
    scope: ToolContext,
    checkpoint_store: Option<Arc<CheckpointStore>>,
    checkpoint_interval: Option<usize>,
}

impl Agent {
    /// Create an agent over the given provider and registry.
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let executor = Arc::new(ToolExecutor::new(Arc::clone(&registry)));
        Self {
            name: name.into(),
            agent_type: "general".to_string(),
            provider,
            registry,
            executor,
            config: AgentConfig::default(),
            reflector: None,
            delegation: None,
            runner: None,
            planner: None,
            memory: None,
            pinned_context: Vec::new(),
            scratchpad: Mutex::new(String::new()),
            history: Mutex::new(Vec::new()),
            call_history: Mutex::new(HashMap::new()),
            broad_history: Mutex::new(HashMap::new()),
            tools_used: Mutex::new(Vec::new()),
            progress: Mutex::new(Progress {
                status: ProgressStatus::Idle,
                turn: 0,
                last_tool: None,
            }),
            progress_callback: None,
            delegation_depth: 0,
            scope: ToolContext::new(),
            checkpoint_store: None,
            checkpoint_interval: None,
        }
    }

    /// Override the configuration (builder pattern).
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the agent type consulted by delegation rules (builder pattern).
    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    /// Attach a reflector (builder pattern).
    pub fn with_reflector(mut self, reflector: Arc<Reflector>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    /// Attach a delegation strategy (builder pattern).
    pub fn with_delegation(mut self, delegation: Arc<DelegationStrategy>) -> Self {
        self.delegation = Some(delegation);
        self
    }

    /// Attach a runner for sub-agent spawning (builder pattern).
    pub fn with_runner(mut self, runner: Arc<Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Attach a planner; runs will go through plan execution
    /// (builder pattern).
    pub fn with_planner(mut self, planner: Arc<Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Attach shared memory (builder pattern).
    pub fn with_memory(mut self, memory: Arc<SharedMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Append a pinned context line (builder pattern).
    pub fn with_pinned_context(mut self, context: impl Into<String>) -> Self {
        self.pinned_context.push(context.into());
        self
    }

    /// Set the delegation chain depth this agent sits in (builder pattern).
    pub fn with_delegation_depth(mut self, depth: u32) -> Self {
        self.delegation_depth = depth;
        self
    }

    /// Attach a progress callback (builder pattern).
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Enable interval auto-checkpointing (builder pattern).
    pub fn with_checkpoints(mut self, store: Arc<CheckpointStore>, every_turns: usize) -> Self {
        self.checkpoint_store = Some(store);
        self.checkpoint_interval = Some(every_turns.max(1));
        self
    }

    /// The cancellation scope of this agent. Cancelling it stops the current
    /// provider call, outstanding tool executions, and the loop.
    pub fn scope(&self) -> &ToolContext {
        &self.scope
    }

    /// Cancel the agent's scope.
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> Progress {
        self.progress.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Distinct tool names used so far, in first-use order.
    pub fn tools_used(&self) -> Vec<String> {
        self.tools_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Copy of the conversation history.
    pub fn history(&self) -> Vec<Content> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the scratchpad text.
    pub fn set_scratchpad(&self, text: impl Into<String>) {
        *self.scratchpad.lock().unwrap_or_else(|e| e.into_inner()) = text.into();
    }

    /// Snapshot of the scratchpad text.
    pub fn scratchpad(&self) -> String {
        self.scratchpad.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_progress(&self, status: ProgressStatus, turn: Option<usize>, last_tool: Option<String>) {
        let snapshot = {
            let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
            progress.status = status;
            if let Some(turn) = turn {
                progress.turn = turn;
            }
            if last_tool.is_some() {
                progress.last_tool = last_tool;
            }
            progress.clone()
        };
        // Callbacks fire outside the lock.
        if let Some(callback) = &self.progress_callback {
            callback(&snapshot);
        }
    }

    fn push_history(&self, content: Content) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(content);
    }

    /// Run the agent on one user message.
    ///
    /// Always returns an [`AgentResult`]; failures are reported through its
    /// `error` field, alongside partial text and the observed turn count.
    pub async fn run(&self, message: &str) -> AgentResult {
        let started = Instant::now();
        self.set_progress(ProgressStatus::Running, Some(0), None);

        let mut state = RunState {
            text: String::new(),
            turns: 0,
        };

        let run_future = self.run_inner(message, &mut state);
        let outcome = match self.config.overall_timeout {
            Some(timeout) => {
                tokio::select! {
                    _ = self.scope.cancellation.cancelled() => {
                        Err(AgentError::cancelled("agent scope cancelled"))
                    }
                    result = tokio::time::timeout(timeout, run_future) => match result {
                        Ok(inner) => inner,
                        Err(_) => Err(AgentError::timeout(format!(
                            "agent run exceeded {:?}",
                            timeout
                        ))),
                    },
                }
            }
            None => {
                let cancelled = self.scope.cancellation.clone();
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        Err(AgentError::cancelled("agent scope cancelled"))
                    }
                    inner = run_future => inner,
                }
            }
        };

        let duration = started.elapsed();
        match outcome {
            Ok(text) => {
                self.set_progress(ProgressStatus::Completed, None, None);
                AgentResult {
                    text,
                    turns: state.turns,
                    duration,
                    error: None,
                }
            }
            Err(error) => {
                self.set_progress(ProgressStatus::Failed, None, None);
                log::warn!("agent '{}' failed after {} turns: {}", self.name, state.turns, error);
                AgentResult {
                    text: state.text,
                    turns: state.turns,
                    duration,
                    error: Some(error),
                }
            }
        }
    }

    async fn run_inner(&self, message: &str, state: &mut RunState) -> Result<String, AgentError> {
        // Publish instruction and tool set on the owned provider clone.
        self.provider
            .set_system_instruction(&self.compose_system_instruction())
            .await;
        self.provider
            .set_tools(self.registry.declarations().await)
            .await;

        if self.planner.is_some() {
            return self.run_with_plan(message, state).await;
        }
        self.run_loop(message, state).await
    }

    /// Plan-driven execution. The reported turn count is the replan count.
    async fn run_with_plan(&self, goal: &str, state: &mut RunState) -> Result<String, AgentError> {
        let planner = match &self.planner {
            Some(planner) => Arc::clone(planner),
            None => return Err(AgentError::planning("no planner attached")),
        };
        let env = PlanEnv {
            provider: Arc::clone(&self.provider),
            executor: Some(Arc::clone(&self.executor)),
            runner: self.runner.clone(),
            reflector: self.reflector.clone(),
            ctx: self.scope.child(),
        };
        let outcome = planner.run_plan(goal, &env).await?;
        state.turns = outcome.replans as usize;
        state.text = outcome.text.clone();
        self.set_progress(ProgressStatus::Running, Some(state.turns), None);
        match outcome.error {
            None => Ok(outcome.text),
            Some(error) => Err(error),
        }
    }

    /// The plain turn loop.
    async fn run_loop(&self, message: &str, state: &mut RunState) -> Result<String, AgentError> {
        let mut bonus_turns = 0usize;
        let mut stuck_count = 0u32;
        let mut next_send = NextSend::UserMessage(message.to_string());

        loop {
            state.turns += 1;
            if state.turns > self.config.max_turns + bonus_turns {
                return Err(AgentError::new(
                    ErrorKind::Other,
                    format!("maximum turns ({}) exhausted", self.config.max_turns),
                ));
            }
            self.set_progress(ProgressStatus::Running, Some(state.turns), None);

            // Send, then fold the delta into history.
            let history = self.history();
            let stream = match &next_send {
                NextSend::UserMessage(delta) => {
                    self.provider
                        .send_message_with_history(&history, delta)
                        .await?
                }
                NextSend::FunctionResponses(parts) => {
                    self.provider
                        .send_function_responses_with_history(&history, parts)
                        .await?
                }
            };
            match &next_send {
                NextSend::UserMessage(delta) if !delta.is_empty() => {
                    self.push_history(Content::user_text(delta.clone()));
                }
                NextSend::FunctionResponses(parts) => {
                    self.push_history(Content::user(parts.clone()));
                }
                _ => {}
            }

            let response = stream.collect().await?;
            self.push_history(Content::model(response.to_parts()));
            if !response.text.is_empty() {
                state.text = response.text.clone();
            }

            self.maybe_checkpoint(state).await;

            // Terminal: a response with no tool calls is the answer.
            if !response.has_function_calls() {
                return Ok(response.text);
            }

            // Loop detection runs before any execution.
            if let Some(intervention) =
                self.detect_loops(&response.function_calls, &mut bonus_turns)
            {
                self.push_history(Content::user_text(intervention));
                next_send = NextSend::UserMessage(String::new());
                continue;
            }

            // Execute.
            let executed = self
                .executor
                .execute_calls(&self.scope, &response.function_calls)
                .await;
            self.note_tools_used(&executed);

            // Reflect on failures; a turn with any failure bumps the stuck
            // counter, a clean turn resets it.
            let any_failed = executed.iter().any(|call| !call.result.success);
            if any_failed {
                stuck_count += 1;
                self.reflect_failures(&response.function_calls, &executed).await;
            } else {
                stuck_count = 0;
            }

            // Build the function responses in call order.
            let mut parts = Vec::with_capacity(executed.len());
            for call in &executed {
                let origin = FunctionCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: serde_json::Map::new(),
                };
                parts.push(Part::function_response(
                    &origin,
                    Value::Object(call.result.to_response_map()),
                ));
                parts.extend(call.result.multimodal_parts.iter().cloned());
            }

            // Delegation: only once the loop has been stuck for a while.
            if stuck_count >= STUCK_DELEGATION_THRESHOLD {
                if let Some(summary) = self.try_delegate(state.turns, stuck_count, &executed).await
                {
                    self.push_history(Content::user_text(summary));
                    stuck_count = 0;
                }
            }

            next_send = NextSend::FunctionResponses(parts);
        }
    }

    fn compose_system_instruction(&self) -> String {
        let mut instruction = self.config.system_instruction.clone();
        for pinned in &self.pinned_context {
            instruction.push_str("\n\n");
            instruction.push_str(pinned);
        }
        if let Some(memory) = &self.memory {
            let context = memory.render_context();
            if !context.is_empty() {
                instruction.push_str("\n\n");
                instruction.push_str(&context);
            }
        }
        instruction
    }

    /// Run both loop-detection layers over a response's calls.
    ///
    /// Exact-match fires first. Returns the intervention text to inject, or
    /// `None` when no layer tripped.
    fn detect_loops(
        &self,
        calls: &[FunctionCall],
        bonus_turns: &mut usize,
    ) -> Option<String> {
        // Exact layer.
        {
            let mut call_history = self.call_history.lock().unwrap_or_else(|e| e.into_inner());
            for call in calls {
                let key = canonical_call_key(call);
                let count = call_history.entry(key.clone()).or_insert(0);
                *count += 1;
                if *count >= EXACT_LOOP_THRESHOLD {
                    *count = 0;
                    *bonus_turns = LOOP_BONUS_TURNS;
                    log::info!(
                        "agent '{}': exact call loop on '{}', intervening",
                        self.name,
                        call.name
                    );
                    return Some(format!(
                        "You have repeated the exact same '{}' call {} times; it will not \
                         produce new information. {} Then continue with the task.",
                        call.name,
                        EXACT_LOOP_THRESHOLD,
                        loop_suggestion(&call.name)
                    ));
                }
            }
        }

        // Broad layer.
        let mut broad_history = self.broad_history.lock().unwrap_or_else(|e| e.into_inner());
        for call in calls {
            let count = broad_history.entry(call.name.clone()).or_insert(0);
            *count += 1;
            if *count >= BROAD_LOOP_THRESHOLD {
                *count = 0;
                log::info!(
                    "agent '{}': broad call loop on '{}', intervening",
                    self.name,
                    call.name
                );
                return Some(format!(
                    "You have called '{}' {} times without finishing the task. Stop using \
                     this tool for now, step back, and change your approach entirely: \
                     summarize what you know, decide what is actually missing, and use a \
                     different tool or answer directly.",
                    call.name, BROAD_LOOP_THRESHOLD
                ));
            }
        }
        None
    }

    fn note_tools_used(&self, executed: &[ExecutedCall]) {
        let mut tools_used = self.tools_used.lock().unwrap_or_else(|e| e.into_inner());
        let mut last_tool = None;
        for call in executed {
            if !tools_used.contains(&call.name) {
                tools_used.push(call.name.clone());
            }
            last_tool = Some(call.name.clone());
        }
        drop(tools_used);
        if last_tool.is_some() {
            self.set_progress(ProgressStatus::Running, None, last_tool);
        }
    }

    /// For every failed result, look up the triggering call's arguments and
    /// inject a reflection intervention when the reflector matches.
    async fn reflect_failures(&self, calls: &[FunctionCall], executed: &[ExecutedCall]) {
        let reflector = match &self.reflector {
            Some(reflector) => reflector,
            None => return,
        };
        for call in executed.iter().filter(|c| !c.result.success) {
            let error = call
                .result
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            let args = calls
                .iter()
                .find(|c| {
                    if !call.id.is_empty() {
                        c.id == call.id
                    } else {
                        c.name == call.name
                    }
                })
                .map(|c| c.args.clone())
                .unwrap_or_default();
            let reflection = reflector.analyze(&call.name, &args, &error).await;
            let intervention = reflector.render_intervention(&call.name, &error, &reflection);
            self.push_history(Content::user_text(intervention));
        }
    }

    /// Evaluate delegation and, when positive, spawn the sub-agent and wait
    /// for it. Returns the summary to inject.
    async fn try_delegate(
        &self,
        current_turn: usize,
        stuck_count: u32,
        executed: &[ExecutedCall],
    ) -> Option<String> {
        let delegation = self.delegation.as_ref()?;
        let runner = self.runner.as_ref()?;

        let last = executed.last();
        let ctx = DelegationContext {
            agent_type: self.agent_type.clone(),
            current_turn,
            last_tool_name: last.map(|c| c.name.clone()),
            last_tool_error: last.and_then(|c| c.result.error.clone()),
            stuck_count,
            delegation_depth: self.delegation_depth,
        };

        match delegation.evaluate(&ctx) {
            DelegationDecision::Delegate {
                target_type,
                prompt,
                rule_name,
                reason,
            } => {
                log::info!(
                    "agent '{}' delegating to '{}' ({}): {}",
                    self.name,
                    target_type,
                    rule_name,
                    reason
                );
                let started = Instant::now();
                let result = runner
                    .spawn_at_depth(&target_type, &prompt, self.delegation_depth + 1)
                    .await;
                let success = result.error.is_none();
                runner.record_delegation(
                    &self.agent_type,
                    &target_type,
                    &rule_name,
                    success,
                    started.elapsed(),
                );
                if success {
                    Some(format!(
                        "A specialized '{}' agent was consulted ({}). Its findings:\n{}",
                        target_type, reason, result.text
                    ))
                } else {
                    Some(format!(
                        "A specialized '{}' agent was consulted but failed: {}. Continue \
                         with your own approach.",
                        target_type,
                        result
                            .error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "unknown error".to_string())
                    ))
                }
            }
            DelegationDecision::Stay => None,
        }
    }

    async fn maybe_checkpoint(&self, state: &RunState) {
        let (store, interval) = match (&self.checkpoint_store, self.checkpoint_interval) {
            (Some(store), Some(interval)) => (store, interval),
            _ => return,
        };
        if state.turns == 0 || state.turns % interval != 0 {
            return;
        }
        let checkpoint = self.build_checkpoint("interval", state.turns);
        if let Err(err) = store.save(&checkpoint) {
            log::warn!("auto-checkpoint failed for '{}': {}", self.name, err);
        }
    }

    /// Snapshot the agent execution state into a checkpoint.
    pub fn build_checkpoint(&self, trigger_reason: &str, turn_number: usize) -> AgentCheckpoint {
        AgentCheckpoint::new(
            &self.name,
            AgentState {
                history: self.history(),
                max_turns: self.config.max_turns,
                turn_count: self.progress().turn,
                tools_used: self.tools_used(),
                scratchpad: self.scratchpad(),
            },
            self.memory.as_ref().map(|m| m.entries()),
            self.planner.as_ref().and_then(|p| p.lifecycle_snapshot()),
            trigger_reason,
            turn_number,
        )
    }

    /// Restore history, scratchpad, tools-used, and turn count from a
    /// checkpoint. Shared memory is restored when this agent carries one.
    pub fn restore_checkpoint(&self, checkpoint: &AgentCheckpoint) {
        *self.history.lock().unwrap_or_else(|e| e.into_inner()) =
            checkpoint.agent_state.history.clone();
        *self.scratchpad.lock().unwrap_or_else(|e| e.into_inner()) =
            checkpoint.agent_state.scratchpad.clone();
        *self.tools_used.lock().unwrap_or_else(|e| e.into_inner()) =
            checkpoint.agent_state.tools_used.clone();
        {
            let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
            progress.turn = checkpoint.agent_state.turn_count;
        }
        if let (Some(memory), Some(entries)) = (&self.memory, &checkpoint.shared_memory) {
            memory.replace_all(entries.clone());
        }
    }
}

/// Canonical loop-detection key: drop zero-valued arguments, sort the rest by
/// key, render `key=value` joined by commas, wrap in `name:{...}`.
///
/// Dropping zero values keeps the key stable when the model sometimes omits
/// an optional parameter and sometimes passes its default.
pub fn canonical_call_key(call: &FunctionCall) -> String {
    let mut entries: Vec<(String, String)> = call
        .args
        .iter()
        .filter(|(_, value)| !is_zero_value(value))
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let joined = entries
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}:{{{}}}", call.name, joined)
}

/// Whether a JSON value is the zero of its type.
fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Tool-specific recovery hint used by the exact-loop intervention.
fn loop_suggestion(tool_name: &str) -> &'static str {
    let name = tool_name.to_lowercase();
    if name.contains("grep") || name.contains("search") || name.contains("find") {
        "Switch to a path glob or search a different directory instead of re-running \
         the same query."
    } else if name.contains("read") || name.contains("cat") {
        "The file has not changed since you last read it; act on the content you \
         already have."
    } else if name.contains("ls") || name.contains("list") || name.contains("tree") || name.contains("glob") {
        "The listing is stable; pick a concrete file from it and proceed."
    } else if name.contains("bash") || name.contains("shell") || name.contains("exec") {
        "The command keeps producing the same outcome; change the command or inspect \
         why it fails first."
    } else {
        "Try different arguments, or a different tool that can make progress."
    }
}
