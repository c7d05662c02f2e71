//! Bounded-parallel tool dispatch.
//!
//! The [`ToolExecutor`] takes the function calls from one model turn and runs
//! them against a [`ToolRegistry`]:
//!
//! - the call list is capped at [`MAX_FUNCTION_CALLS_PER_RESPONSE`];
//! - a single call runs inline, multiple calls run concurrently under a
//!   semaphore of [`MAX_CONCURRENT_TOOL_EXECUTIONS`] permits;
//! - each call runs under a child scope bounded by the tool's timeout;
//! - validation failures and panics become failed [`ToolResult`]s — they
//!   never propagate and never prevent sibling calls from completing;
//! - results come back in the same positional order as the input calls,
//!   each tagged with the originating call's id and name.

use crate::agentflow::content::FunctionCall;
use crate::agentflow::registry::ToolRegistry;
use crate::agentflow::tool::{Tool, ToolContext, ToolResult};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Calls beyond this cap are dropped (with a warning) before dispatch.
pub const MAX_FUNCTION_CALLS_PER_RESPONSE: usize = 16;

/// Maximum number of tools executing at the same time.
pub const MAX_CONCURRENT_TOOL_EXECUTIONS: usize = 4;

/// Callback fired just before a tool runs: `(call_name, call_id)`.
pub type OnToolStart = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Callback fired after a tool finishes: `(call_name, result)`.
pub type OnToolEnd = Arc<dyn Fn(&str, &ToolResult) + Send + Sync>;

/// One dispatched call paired with its result, in input order.
#[derive(Debug, Clone)]
pub struct ExecutedCall {
    /// Id of the originating call.
    pub id: String,
    /// Name of the originating call.
    pub name: String,
    /// The tool's result (failed results included).
    pub result: ToolResult,
}

/// Dispatcher for the function calls of a single model turn.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    semaphore: Arc<Semaphore>,
    on_start: Option<OnToolStart>,
    on_end: Option<OnToolEnd>,
}

impl ToolExecutor {
    /// An executor over the given registry with the default concurrency cap.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_TOOL_EXECUTIONS)),
            on_start: None,
            on_end: None,
        }
    }

    /// Override the concurrency cap (builder pattern).
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Set a callback fired before each execution (builder pattern).
    pub fn with_on_start(mut self, on_start: OnToolStart) -> Self {
        self.on_start = Some(on_start);
        self
    }

    /// Set a callback fired after each execution (builder pattern).
    pub fn with_on_end(mut self, on_end: OnToolEnd) -> Self {
        self.on_end = Some(on_end);
        self
    }

    /// The registry this executor dispatches against.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute `calls` and return one [`ExecutedCall`] per input call, in
    /// input order.
    ///
    /// When `ctx` is already cancelled, every call yields a "cancelled"
    /// failed result without dispatching.
    pub async fn execute_calls(&self, ctx: &ToolContext, calls: &[FunctionCall]) -> Vec<ExecutedCall> {
        let calls = if calls.len() > MAX_FUNCTION_CALLS_PER_RESPONSE {
            log::warn!(
                "dropping {} calls beyond the per-response cap of {}",
                calls.len() - MAX_FUNCTION_CALLS_PER_RESPONSE,
                MAX_FUNCTION_CALLS_PER_RESPONSE
            );
            &calls[..MAX_FUNCTION_CALLS_PER_RESPONSE]
        } else {
            calls
        };

        if ctx.is_cancelled() {
            return calls
                .iter()
                .map(|call| ExecutedCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    result: ToolResult::failure("cancelled before dispatch"),
                })
                .collect();
        }

        match calls.len() {
            0 => Vec::new(),
            1 => {
                let call = &calls[0];
                let result = self.execute_one(ctx, call).await;
                vec![ExecutedCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    result,
                }]
            }
            _ => self.execute_parallel(ctx, calls).await,
        }
    }

    /// Run multiple calls concurrently under the semaphore, preserving
    /// positional order in the returned vector.
    async fn execute_parallel(&self, ctx: &ToolContext, calls: &[FunctionCall]) -> Vec<ExecutedCall> {
        let mut handles = Vec::with_capacity(calls.len());
        for call in calls {
            let permit_source = Arc::clone(&self.semaphore);
            let call = call.clone();
            let child_ctx = ctx.child();
            let registry = Arc::clone(&self.registry);
            let on_start = self.on_start.clone();
            let on_end = self.on_end.clone();
            handles.push(tokio::spawn(async move {
                // The semaphore is never closed, so acquisition only fails on
                // shutdown; running unpermitted then is harmless.
                let _permit = permit_source.acquire_owned().await.ok();
                let result =
                    run_call(&registry, &child_ctx, &call, on_start.as_ref(), on_end.as_ref())
                        .await;
                ExecutedCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    result,
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (idx, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(executed) => results.push(executed),
                Err(join_err) => {
                    // The call task itself died; synthesize a failed result so
                    // positional order holds.
                    let call = &calls[idx];
                    results.push(ExecutedCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        result: ToolResult::failure(format!("tool task failed: {}", join_err)),
                    });
                }
            }
        }
        results
    }

    /// Run one call without taking a semaphore permit.
    async fn execute_one(&self, ctx: &ToolContext, call: &FunctionCall) -> ToolResult {
        let child_ctx = ctx.child();
        run_call(
            &self.registry,
            &child_ctx,
            call,
            self.on_start.as_ref(),
            self.on_end.as_ref(),
        )
        .await
    }
}

/// Full lifecycle of one call: lookup, validation, bracketing callbacks,
/// timeout, panic isolation, duration fill-in.
async fn run_call(
    registry: &Arc<ToolRegistry>,
    ctx: &ToolContext,
    call: &FunctionCall,
    on_start: Option<&OnToolStart>,
    on_end: Option<&OnToolEnd>,
) -> ToolResult {
    let tool = match registry.get(&call.name).await {
        Some(tool) => tool,
        None => return ToolResult::failure(format!("unknown tool: {}", call.name)),
    };

    if let Err(reason) = tool.validate(&call.args) {
        return ToolResult::failure(format!("invalid arguments: {}", reason));
    }

    if let Some(hook) = on_start {
        hook(&call.name, &call.id);
    }

    let started = Instant::now();
    let mut result = dispatch(tool, ctx, call).await;
    if result.duration.is_none() {
        result.duration = Some(started.elapsed());
    }

    if let Some(hook) = on_end {
        hook(&call.name, &result);
    }

    result
}

/// Dispatch the execute future under timeout, cancellation, and panic
/// isolation.
async fn dispatch(tool: Arc<dyn Tool>, ctx: &ToolContext, call: &FunctionCall) -> ToolResult {
    let timeout = tool.timeout();
    let name = call.name.clone();
    let args = call.args.clone();
    let task_ctx = ctx.clone();

    // Spawn so a panicking tool converts to a JoinError instead of tearing
    // down sibling calls.
    let handle = tokio::spawn(async move { tool.execute(&task_ctx, args).await });
    let abort = handle.abort_handle();

    let outcome = tokio::select! {
        _ = ctx.cancellation.cancelled() => {
            abort.abort();
            return ToolResult::failure(format!("tool '{}' cancelled", name));
        }
        joined = tokio::time::timeout(timeout, handle) => joined,
    };

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            if join_err.is_panic() {
                ToolResult::failure(format!("tool '{}' panicked: {}", name, join_err))
            } else {
                ToolResult::failure(format!("tool '{}' cancelled", name))
            }
        }
        Err(_elapsed) => {
            abort.abort();
            ToolResult::failure(format!("tool '{}' timed out after {:?}", name, timeout))
        }
    }
}
