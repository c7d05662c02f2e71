//! Tool capability surface.
//!
//! The runtime never knows what a tool *does* — it only sees the [`Tool`]
//! trait: a stable name, a description, a parameter schema describing a
//! named-argument map, and an async execute operation returning a
//! [`ToolResult`]. Concrete tools (shell, file I/O, search, HTTP) live in
//! application code.
//!
//! # Implementing a tool
//!
//! ```rust
//! use agentflow::tool::{ParameterSchema, ParameterType, Tool, ToolContext, ToolResult};
//! use async_trait::async_trait;
//! use serde_json::{Map, Value};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn description(&self) -> &str {
//!         "Echo the input back"
//!     }
//!
//!     fn parameters(&self) -> ParameterSchema {
//!         ParameterSchema::object().with_property(
//!             "x",
//!             ParameterSchema::new(ParameterType::String).with_description("text to echo"),
//!             true,
//!         )
//!     }
//!
//!     async fn execute(&self, _ctx: &ToolContext, args: Map<String, Value>) -> ToolResult {
//!         let x = args.get("x").and_then(Value::as_str).unwrap_or_default();
//!         ToolResult::success(x)
//!     }
//! }
//! ```

use crate::agentflow::content::Part;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default per-tool dispatch timeout applied by the executor.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Cap on tool content embedded into a function response. Longer content is
/// truncated with a marker so one verbose tool cannot drown the prompt.
pub const MAX_TOOL_CONTENT_CHARS: usize = 10_000;

/// Rough risk classification a tool can attach to its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    /// Read-only or otherwise harmless.
    Safe,
    /// Mutates state the caller may want to review.
    Caution,
    /// Destructive or irreversible.
    Dangerous,
}

impl Default for SafetyLevel {
    fn default() -> Self {
        SafetyLevel::Safe
    }
}

/// The outcome of a single tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Human-readable output embedded into the function response.
    pub content: String,
    /// Structured output for programmatic consumers.
    #[serde(default)]
    pub data: Value,
    /// Whether the execution succeeded.
    pub success: bool,
    /// Error description when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
    /// Wall-clock duration; filled in by the executor when the tool leaves
    /// it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    /// Risk classification of what the tool did.
    #[serde(default)]
    pub safety_level: SafetyLevel,
    /// Additional parts (images, preserved payloads) to append alongside the
    /// function response.
    #[serde(default)]
    pub multimodal_parts: Vec<Part>,
}

impl ToolResult {
    /// A successful result with the given content.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: Value::Null,
            success: true,
            error: None,
            duration: None,
            safety_level: SafetyLevel::Safe,
            multimodal_parts: Vec::new(),
        }
    }

    /// A failed result carrying an error description.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            content: String::new(),
            data: Value::Null,
            success: false,
            error: Some(error),
            duration: None,
            safety_level: SafetyLevel::Safe,
            multimodal_parts: Vec::new(),
        }
    }

    /// Attach structured data (builder pattern).
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Attach a wall-clock duration (builder pattern).
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Attach a safety level (builder pattern).
    pub fn with_safety_level(mut self, level: SafetyLevel) -> Self {
        self.safety_level = level;
        self
    }

    /// Project this result into the map embedded in a function-response part.
    ///
    /// Content is truncated to [`MAX_TOOL_CONTENT_CHARS`]; failed results
    /// carry an `error` field, successful ones an `output` field.
    pub fn to_response_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let content = truncate_chars(&self.content, MAX_TOOL_CONTENT_CHARS);
        if self.success {
            map.insert("output".to_string(), Value::String(content));
        } else {
            map.insert(
                "error".to_string(),
                Value::String(
                    self.error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                ),
            );
            if !content.is_empty() {
                map.insert("output".to_string(), Value::String(content));
            }
        }
        if !self.data.is_null() {
            map.insert("data".to_string(), self.data.clone());
        }
        map
    }
}

/// Truncate `text` to at most `max` characters, appending a marker when
/// anything was dropped. Respects UTF-8 boundaries.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}\n[... output truncated ...]", truncated)
    } else {
        truncated
    }
}

/// Primitive type of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// A parameter tree describing a named-argument map.
///
/// Captures primitive types, objects, arrays, and string enums — enough to be
/// projected to a native function-calling schema or to JSON-schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Node type.
    #[serde(rename = "type")]
    pub kind: ParameterType,
    /// Human-readable description surfaced to the model.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Allowed string values, for enum-constrained strings.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Child properties, for object nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, ParameterSchema>>,
    /// Names of required properties, for object nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    /// Element schema, for array nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
}

impl ParameterSchema {
    /// A schema node of the given type.
    pub fn new(kind: ParameterType) -> Self {
        Self {
            kind,
            description: String::new(),
            enum_values: None,
            properties: None,
            required: None,
            items: None,
        }
    }

    /// An empty object schema — the usual root for a tool's parameters.
    pub fn object() -> Self {
        Self::new(ParameterType::Object)
    }

    /// Attach a description (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Constrain a string node to a fixed set of values (builder pattern).
    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }

    /// Add a property to an object node, optionally marking it required
    /// (builder pattern).
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        schema: ParameterSchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties
            .get_or_insert_with(HashMap::new)
            .insert(name.clone(), schema);
        if required {
            self.required.get_or_insert_with(Vec::new).push(name);
        }
        self
    }

    /// Set the element schema of an array node (builder pattern).
    pub fn with_items(mut self, items: ParameterSchema) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    /// Whether `name` is listed as required on this (object) node.
    pub fn is_required(&self, name: &str) -> bool {
        self.required
            .as_ref()
            .map(|req| req.iter().any(|r| r == name))
            .unwrap_or(false)
    }
}

/// Provider-facing projection of a tool: what gets published via
/// `Provider::set_tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Globally unique tool name.
    pub name: String,
    /// Description surfaced to the model.
    pub description: String,
    /// Parameter tree.
    pub parameters: ParameterSchema,
}

/// Cancellation-capable scope handed to every tool execution.
///
/// Derived scopes are children of the caller's scope: cancelling the parent
/// cancels every child, cancelling a child leaves siblings running.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Token the tool must observe for prompt termination.
    pub cancellation: CancellationToken,
}

impl ToolContext {
    /// A fresh root scope.
    pub fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
        }
    }

    /// A scope derived from this one; cancelled when the parent is.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
        }
    }

    /// Whether this scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this scope and all children.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A named capability the model can invoke via a function call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable name, globally unique within a registry.
    fn name(&self) -> &str;

    /// Human-readable description surfaced to the model.
    fn description(&self) -> &str;

    /// Parameter tree describing the accepted named-argument map.
    fn parameters(&self) -> ParameterSchema;

    /// Synchronous argument validation, run before execution when
    /// implemented. A validation failure yields a failed [`ToolResult`]
    /// with no side effect.
    fn validate(&self, _args: &Map<String, Value>) -> Result<(), String> {
        Ok(())
    }

    /// Execute the tool under `ctx` with the given arguments.
    async fn execute(&self, ctx: &ToolContext, args: Map<String, Value>) -> ToolResult;

    /// Per-tool dispatch timeout; the executor derives a deadline from it.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    /// Project this tool into provider-declaration form.
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}
