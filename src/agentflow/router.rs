//! Request routing: classify an incoming request and pick a handler and a
//! model tier.

use crate::agentflow::optimizer::StrategyOptimizer;
use crate::agentflow::planner::classify_task_type;
use std::sync::Arc;

/// How a request should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Plain chat; no tools expected.
    Chat,
    /// Tool-driven agent loop.
    ToolUse,
    /// Plan-tree execution.
    Planning,
    /// Multi-agent coordination.
    Coordination,
}

/// Model capability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Cheapest, lowest latency.
    Fast,
    /// Default tier.
    Balanced,
    /// Strongest reasoning.
    Deep,
}

/// A routing decision.
#[derive(Debug, Clone)]
pub struct Route {
    /// Chosen handler.
    pub handler: HandlerKind,
    /// Chosen model tier.
    pub tier: ModelTier,
    /// Keyword-classified task type (bugfix, exploration, ...).
    pub task_type: &'static str,
}

/// Keyword classifier from request text to handler + tier.
pub struct Router;

impl Router {
    /// A router with the default keyword tables.
    pub fn new() -> Self {
        Router
    }

    /// Classify one request.
    pub fn classify(&self, request: &str) -> Route {
        let lowered = request.to_lowercase();
        let task_type = classify_task_type(request);

        let handler = if lowered.contains("plan") || lowered.contains("step by step") {
            HandlerKind::Planning
        } else if lowered.contains("in parallel") || lowered.contains("all of these") {
            HandlerKind::Coordination
        } else if lowered.contains("file")
            || lowered.contains("run ")
            || lowered.contains("command")
            || lowered.contains("search")
            || task_type == "bugfix"
            || task_type == "implementation"
        {
            HandlerKind::ToolUse
        } else {
            HandlerKind::Chat
        };

        let word_count = request.split_whitespace().count();
        let tier = if handler == HandlerKind::Chat && word_count < 40 {
            ModelTier::Fast
        } else if handler == HandlerKind::Planning
            || task_type == "refactoring"
            || word_count > 200
        {
            ModelTier::Deep
        } else {
            ModelTier::Balanced
        };

        Route {
            handler,
            tier,
            task_type,
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router that additionally consults strategy metrics: a task type with a
/// poor historical success rate is escalated one tier.
pub struct SmartRouter {
    base: Router,
    optimizer: Arc<StrategyOptimizer>,
}

impl SmartRouter {
    /// A smart router over the given optimizer.
    pub fn new(optimizer: Arc<StrategyOptimizer>) -> Self {
        Self {
            base: Router::new(),
            optimizer,
        }
    }

    /// Classify one request, escalating the tier when history is poor.
    pub fn classify(&self, request: &str) -> Route {
        let mut route = self.base.classify(request);
        if let Some((_, rate)) = self.optimizer.best_strategy(route.task_type) {
            if rate < 0.4 {
                route.tier = match route.tier {
                    ModelTier::Fast => ModelTier::Balanced,
                    _ => ModelTier::Deep,
                };
                log::debug!(
                    "smart router: escalating tier for '{}' (best success rate {:.2})",
                    route.task_type,
                    rate
                );
            }
        }
        route
    }
}
