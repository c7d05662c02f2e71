// src/lib.rs

// Import the top-level `agentflow` module.
pub mod agentflow;

// Re-exporting key items for easier external access.
pub use agentflow::agent::{Agent, AgentConfig, AgentResult, Progress, ProgressStatus};
pub use agentflow::content::{Content, FunctionCall, Part, Role};
pub use agentflow::error::{AgentError, ErrorKind};
pub use agentflow::provider::{AccumulatedResponse, Provider, StreamChunk, StreamResponse};
pub use agentflow::registry::ToolRegistry;
pub use agentflow::runner::Runner;
pub use agentflow::tool::{Tool, ToolContext, ToolDeclaration, ToolResult};

// Module shorthands mirroring the internal layout.
pub use agentflow::agent;
pub use agentflow::checkpoint;
pub use agentflow::content;
pub use agentflow::context;
pub use agentflow::coordinator;
pub use agentflow::delegation;
pub use agentflow::error;
pub use agentflow::executor;
pub use agentflow::memory;
pub use agentflow::optimizer;
pub use agentflow::plan;
pub use agentflow::planner;
pub use agentflow::provider;
pub use agentflow::reflector;
pub use agentflow::registry;
pub use agentflow::retry;
pub use agentflow::router;
pub use agentflow::runner;
pub use agentflow::search;
pub use agentflow::session;
pub use agentflow::tool;
