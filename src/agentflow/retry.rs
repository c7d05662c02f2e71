//! Transport resilience: retry with backoff, provider failover, and the
//! circuit breaker.
//!
//! Three layers compose around any [`Provider`]:
//!
//! - [`with_retry`] / [`RetryingProvider`] — re-attempt a send on retryable
//!   errors with exponential backoff and jitter, before the stream handle is
//!   returned to the caller.
//! - [`FallbackProvider`] — an ordered member list; retryable failure of the
//!   current member advances cyclically, success pins the member as the new
//!   starting point.
//! - [`CircuitBreaker`] / [`GuardedProvider`] — stop calling a failing
//!   backend until a reset timeout elapses, then admit a probe.
//!
//! ```text
//! GuardedProvider ── CircuitBreaker
//!   └─ FallbackProvider
//!        ├─ RetryingProvider ── primary client
//!        └─ RetryingProvider ── fallback client
//! ```

use crate::agentflow::content::{Content, Part};
use crate::agentflow::error::{AgentError, ErrorKind};
use crate::agentflow::provider::{Provider, StreamResponse};
use crate::agentflow::tool::ToolDeclaration;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Backoff parameters for [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt: `initial_delay * multiplier^attempt`.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based), jittered by up to
    /// 25% and capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.25);
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Run `attempt` up to `1 + max_retries` times, sleeping between attempts.
///
/// Only errors whose [`ErrorKind`] is retryable are re-attempted;
/// non-retryable errors propagate immediately.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut attempt: F) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut last_err = None;
    for round in 0..=config.max_retries {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && round < config.max_retries => {
                let delay = config.delay_for(round);
                log::warn!(
                    "retryable failure (attempt {}/{}), sleeping {:?}: {}",
                    round + 1,
                    config.max_retries + 1,
                    delay,
                    err
                );
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| AgentError::other("retry budget exhausted")))
}

/// A provider wrapper that applies [`with_retry`] to every send.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    config: RetryConfig,
}

impl RetryingProvider {
    /// Wrap `inner` with the given retry policy.
    pub fn new(inner: Arc<dyn Provider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    async fn send_message_with_history(
        &self,
        history: &[Content],
        message: &str,
    ) -> Result<StreamResponse, AgentError> {
        with_retry(&self.config, || {
            self.inner.send_message_with_history(history, message)
        })
        .await
    }

    async fn send_function_responses_with_history(
        &self,
        history: &[Content],
        responses: &[Part],
    ) -> Result<StreamResponse, AgentError> {
        with_retry(&self.config, || {
            self.inner
                .send_function_responses_with_history(history, responses)
        })
        .await
    }

    async fn set_tools(&self, tools: Vec<ToolDeclaration>) {
        self.inner.set_tools(tools).await;
    }

    async fn set_system_instruction(&self, instruction: &str) {
        self.inner.set_system_instruction(instruction).await;
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn clone_provider(&self) -> Arc<dyn Provider> {
        Arc::new(RetryingProvider {
            inner: self.inner.clone_provider(),
            config: self.config.clone(),
        })
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

/// Composite provider holding an ordered member list.
///
/// Sends go to the current member. A retryable failure advances cyclically to
/// the next member; a non-retryable failure propagates immediately. On
/// success the member index is remembered as the new starting point.
/// Exhausting every member yields a single wrapped exhaustion error.
pub struct FallbackProvider {
    members: Vec<Arc<dyn Provider>>,
    current: RwLock<usize>,
    label: String,
}

impl FallbackProvider {
    /// Build a fallback chain over `members`. At least one member is
    /// required.
    pub fn new(members: Vec<Arc<dyn Provider>>) -> Self {
        assert!(!members.is_empty(), "FallbackProvider requires members");
        let label = format!(
            "fallback({})",
            members
                .iter()
                .map(|m| m.model_name().to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        Self {
            members,
            current: RwLock::new(0),
            label,
        }
    }

    /// Index of the member the next send will try first.
    pub fn current_index(&self) -> usize {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn try_members<'a, F, Fut>(&'a self, mut send: F) -> Result<StreamResponse, AgentError>
    where
        F: FnMut(&'a Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<StreamResponse, AgentError>> + 'a,
    {
        let start = self.current_index();
        let count = self.members.len();
        let mut last_err: Option<AgentError> = None;

        for offset in 0..count {
            let idx = (start + offset) % count;
            match send(&self.members[idx]).await {
                Ok(stream) => {
                    *self.current.write().unwrap_or_else(|e| e.into_inner()) = idx;
                    return Ok(stream);
                }
                Err(err) if err.is_retryable() => {
                    log::warn!(
                        "fallback member {} ({}) failed retryably: {}",
                        idx,
                        self.members[idx].model_name(),
                        err
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        let detail = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        Err(AgentError::new(
            ErrorKind::ResourceExhausted,
            format!("all fallbacks exhausted: {}", detail),
        ))
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    async fn send_message_with_history(
        &self,
        history: &[Content],
        message: &str,
    ) -> Result<StreamResponse, AgentError> {
        self.try_members(|member| member.send_message_with_history(history, message))
            .await
    }

    async fn send_function_responses_with_history(
        &self,
        history: &[Content],
        responses: &[Part],
    ) -> Result<StreamResponse, AgentError> {
        self.try_members(|member| member.send_function_responses_with_history(history, responses))
            .await
    }

    async fn set_tools(&self, tools: Vec<ToolDeclaration>) {
        for member in &self.members {
            member.set_tools(tools.clone()).await;
        }
    }

    async fn set_system_instruction(&self, instruction: &str) {
        for member in &self.members {
            member.set_system_instruction(instruction).await;
        }
    }

    fn model_name(&self) -> &str {
        &self.label
    }

    fn clone_provider(&self) -> Arc<dyn Provider> {
        Arc::new(FallbackProvider::new(
            self.members.iter().map(|m| m.clone_provider()).collect(),
        ))
    }

    async fn close(&self) {
        for member in &self.members {
            member.close().await;
        }
    }
}

/// Circuit breaker state visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// All calls pass; consecutive failures are counted.
    Closed,
    /// All calls are rejected until the reset timeout elapses.
    Open,
    /// One probe is admitted; its outcome decides the next state.
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Stop calling a failing backend until a reset timeout elapses.
///
/// Closed: calls pass; each failure increments a counter, reaching
/// `threshold` opens the breaker, any success resets the counter.
/// Open: calls are rejected until `reset_timeout` has elapsed since the last
/// failure, then the breaker moves to half-open. Half-open: a probe is
/// admitted — success closes the breaker, failure re-opens it.
///
/// Checks take a read lock and upgrade only when a state change is required;
/// the state is re-checked after the upgrade since the locks are not
/// atomically exchangeable.
pub struct CircuitBreaker {
    inner: RwLock<BreakerInner>,
    threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    /// A closed breaker that opens after `threshold` consecutive failures and
    /// probes again `reset_timeout` after the last failure.
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            threshold,
            reset_timeout,
        }
    }

    /// Current state, transitioning open → half-open when the reset timeout
    /// has elapsed.
    pub fn state(&self) -> BreakerState {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Ask to make a call. Returns `Err` with a sentinel error while the
    /// breaker is open.
    pub fn try_acquire(&self) -> Result<(), AgentError> {
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match inner.state {
                BreakerState::Closed | BreakerState::HalfOpen => return Ok(()),
                BreakerState::Open => {
                    let elapsed = inner
                        .last_failure
                        .map(|at| at.elapsed() >= self.reset_timeout)
                        .unwrap_or(true);
                    if !elapsed {
                        return Err(AgentError::new(
                            ErrorKind::ResourceExhausted,
                            "circuit breaker open",
                        ));
                    }
                }
            }
        }

        // Upgrade and re-check: another caller may have transitioned first.
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    log::info!("circuit breaker half-open, admitting probe");
                    Ok(())
                } else {
                    Err(AgentError::new(
                        ErrorKind::ResourceExhausted,
                        "circuit breaker open",
                    ))
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                log::info!("circuit breaker closed after successful probe");
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                log::warn!("circuit breaker re-opened after failed probe");
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.threshold {
                    inner.state = BreakerState::Open;
                    log::warn!(
                        "circuit breaker opened after {} consecutive failures",
                        inner.failure_count
                    );
                }
            }
            BreakerState::Open => {}
        }
    }
}

/// Provider wrapper gating every send through a [`CircuitBreaker`].
pub struct GuardedProvider {
    inner: Arc<dyn Provider>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedProvider {
    /// Wrap `inner` behind `breaker`. The breaker may be shared between
    /// clones so failure history survives cloning.
    pub fn new(inner: Arc<dyn Provider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    /// The breaker guarding this provider.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn guard<Fut>(&self, send: Fut) -> Result<StreamResponse, AgentError>
    where
        Fut: Future<Output = Result<StreamResponse, AgentError>>,
    {
        self.breaker.try_acquire()?;
        match send.await {
            Ok(stream) => {
                self.breaker.record_success();
                Ok(stream)
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Provider for GuardedProvider {
    async fn send_message_with_history(
        &self,
        history: &[Content],
        message: &str,
    ) -> Result<StreamResponse, AgentError> {
        self.guard(self.inner.send_message_with_history(history, message))
            .await
    }

    async fn send_function_responses_with_history(
        &self,
        history: &[Content],
        responses: &[Part],
    ) -> Result<StreamResponse, AgentError> {
        self.guard(
            self.inner
                .send_function_responses_with_history(history, responses),
        )
        .await
    }

    async fn set_tools(&self, tools: Vec<ToolDeclaration>) {
        self.inner.set_tools(tools).await;
    }

    async fn set_system_instruction(&self, instruction: &str) {
        self.inner.set_system_instruction(instruction).await;
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn clone_provider(&self) -> Arc<dyn Provider> {
        Arc::new(GuardedProvider {
            inner: self.inner.clone_provider(),
            breaker: Arc::clone(&self.breaker),
        })
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
