//! Provider abstraction: the runtime's only view of an LLM backend.
//!
//! A [`Provider`] sends messages or function responses and returns a
//! [`StreamResponse`] — a lazy producer of [`StreamChunk`]s. Concrete
//! providers (streaming HTTP/gRPC clients) live outside this crate; the
//! runtime only relies on the contract spelled out here:
//!
//! - chunk ordering within a stream is preserved;
//! - the producer closes the channel exactly once (normal completion, error,
//!   or cancellation);
//! - the consumer may stop reading at any time, and the producer must observe
//!   that and terminate promptly.
//!
//! Cloning via [`Provider::clone_provider`] returns an independent value that
//! shares the underlying transport but has its own tools and
//! system-instruction state — the only sanctioned way to drive one provider
//! from multiple concurrent agents.
//!
//! For backends without native function calling, [`parse_text_tool_calls`]
//! recognizes tool calls embedded in model text and
//! [`tool_prompt_addendum`] generates the matching system-prompt section.

use crate::agentflow::content::{Content, FunctionCall, Part};
use crate::agentflow::error::AgentError;
use crate::agentflow::tool::ToolDeclaration;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Buffer size for the chunk channel backing a [`StreamResponse`].
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// One increment of a streamed model response.
///
/// A chunk carries zero or more of: a text delta, completed function calls,
/// opaque thought parts to preserve, a finish reason, token counts, a
/// terminal error, and a `done` flag.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Incremental text, when present.
    pub text: Option<String>,
    /// Function calls completed in this chunk.
    pub function_calls: Vec<FunctionCall>,
    /// Opaque provider parts to preserve in history.
    pub thoughts: Vec<Part>,
    /// Provider finish reason (e.g. `"stop"`, `"tool_calls"`).
    pub finish_reason: Option<String>,
    /// Prompt tokens billed, when the provider reports them.
    pub input_tokens: Option<u32>,
    /// Completion tokens billed, when the provider reports them.
    pub output_tokens: Option<u32>,
    /// Terminal stream error. A chunk carrying an error is also terminal.
    pub error: Option<AgentError>,
    /// Set on the final chunk of a well-formed stream.
    pub done: bool,
}

impl StreamChunk {
    /// A chunk carrying only a text delta.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// A chunk carrying completed function calls.
    pub fn calls(calls: Vec<FunctionCall>) -> Self {
        Self {
            function_calls: calls,
            ..Self::default()
        }
    }

    /// A terminal chunk signalling normal completion.
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    /// A terminal chunk carrying an error.
    pub fn error(error: AgentError) -> Self {
        Self {
            error: Some(error),
            done: true,
            ..Self::default()
        }
    }

    /// Attach a finish reason (builder pattern).
    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Attach token counts (builder pattern).
    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.input_tokens = Some(input_tokens);
        self.output_tokens = Some(output_tokens);
        self
    }

    /// Mark this chunk terminal (builder pattern).
    pub fn finished(mut self) -> Self {
        self.done = true;
        self
    }
}

/// The accumulated form of a fully-consumed stream.
#[derive(Debug, Clone, Default)]
pub struct AccumulatedResponse {
    /// Concatenated text deltas.
    pub text: String,
    /// Every function call, in emission order.
    pub function_calls: Vec<FunctionCall>,
    /// Every preserved thought part, in emission order.
    pub thoughts: Vec<Part>,
    /// Last finish reason observed.
    pub finish_reason: Option<String>,
    /// Sum of reported prompt tokens.
    pub input_tokens: u32,
    /// Sum of reported completion tokens.
    pub output_tokens: u32,
}

impl AccumulatedResponse {
    /// Whether the response requested any tool invocations.
    pub fn has_function_calls(&self) -> bool {
        !self.function_calls.is_empty()
    }

    /// Project this response into the parts of a model-role [`Content`].
    ///
    /// Order: text (when non-empty), thoughts, then function calls — matching
    /// how responses are replayed to providers.
    pub fn to_parts(&self) -> Vec<Part> {
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(Part::text(self.text.clone()));
        }
        parts.extend(self.thoughts.iter().cloned());
        for call in &self.function_calls {
            parts.push(Part::from_call(call.clone()));
        }
        parts
    }
}

/// Lazy chunk stream handed back by every provider send.
///
/// Internally a bounded mpsc channel: the producer side is a plain
/// [`mpsc::Sender`] obtained from [`StreamResponse::channel`], and dropping
/// it closes the stream exactly once.
pub struct StreamResponse {
    rx: mpsc::Receiver<StreamChunk>,
}

impl StreamResponse {
    /// Wrap an existing receiver.
    pub fn new(rx: mpsc::Receiver<StreamChunk>) -> Self {
        Self { rx }
    }

    /// Create a producer/consumer pair with the default buffer.
    pub fn channel() -> (mpsc::Sender<StreamChunk>, Self) {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        (tx, Self { rx })
    }

    /// Build a stream that replays the given chunks in order.
    ///
    /// Useful for tests and for providers that buffer whole responses.
    pub fn from_chunks(chunks: Vec<StreamChunk>) -> Self {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    // Consumer stopped reading; terminate promptly.
                    break;
                }
            }
        });
        Self { rx }
    }

    /// Receive the next chunk, or `None` once the producer has closed.
    pub async fn next_chunk(&mut self) -> Option<StreamChunk> {
        self.rx.recv().await
    }

    /// Drain the stream into an [`AccumulatedResponse`].
    ///
    /// Chunks are folded in emission order. The first in-stream error aborts
    /// accumulation and is returned as `Err`.
    pub async fn collect(mut self) -> Result<AccumulatedResponse, AgentError> {
        let mut acc = AccumulatedResponse::default();
        while let Some(chunk) = self.rx.recv().await {
            if let Some(err) = chunk.error {
                return Err(err);
            }
            if let Some(text) = chunk.text {
                acc.text.push_str(&text);
            }
            acc.function_calls.extend(chunk.function_calls);
            acc.thoughts.extend(chunk.thoughts);
            if chunk.finish_reason.is_some() {
                acc.finish_reason = chunk.finish_reason;
            }
            acc.input_tokens += chunk.input_tokens.unwrap_or(0);
            acc.output_tokens += chunk.output_tokens.unwrap_or(0);
            if chunk.done {
                break;
            }
        }
        Ok(acc)
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse").finish_non_exhaustive()
    }
}

impl futures_util::Stream for StreamResponse {
    type Item = StreamChunk;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<StreamChunk>> {
        self.rx.poll_recv(cx)
    }
}

/// Capability set of an LLM backend.
///
/// Implementations must be `Send + Sync` so an agent can drive them from
/// spawned tasks. Tools and the system instruction are provider-side state —
/// set once per run, consulted by every subsequent send.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send a single user message with no prior history.
    async fn send_message(&self, message: &str) -> Result<StreamResponse, AgentError> {
        self.send_message_with_history(&[], message).await
    }

    /// Send a user message on top of an existing history.
    ///
    /// `message` may be empty on continuation turns where the history already
    /// ends in the content to respond to.
    async fn send_message_with_history(
        &self,
        history: &[Content],
        message: &str,
    ) -> Result<StreamResponse, AgentError>;

    /// Send function responses on top of an existing history.
    ///
    /// `responses` are the function-response parts produced for the calls in
    /// the last model turn, in call order.
    async fn send_function_responses_with_history(
        &self,
        history: &[Content],
        responses: &[Part],
    ) -> Result<StreamResponse, AgentError>;

    /// Publish the tool set for subsequent sends.
    async fn set_tools(&self, tools: Vec<ToolDeclaration>);

    /// Set the system instruction for subsequent sends.
    async fn set_system_instruction(&self, instruction: &str);

    /// Identifier of the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;

    /// An independent provider sharing the transport but owning its tools
    /// and system-instruction state.
    fn clone_provider(&self) -> Arc<dyn Provider>;

    /// Release any held resources. Default is a no-op.
    async fn close(&self) {}
}

/// Recognize tool calls embedded in model text.
///
/// Accepts either a fenced ```json block or a bare JSON object containing a
/// `tool` or `name` field, with an optional `args` map. Used when a backend
/// has no native function calling.
///
/// # Example
///
/// ```rust
/// use agentflow::provider::parse_text_tool_calls;
///
/// let text = "I'll check the file.\n```json\n{\"tool\": \"read\", \"args\": {\"path\": \"/tmp/x\"}}\n```";
/// let calls = parse_text_tool_calls(text);
/// assert_eq!(calls.len(), 1);
/// assert_eq!(calls[0].name, "read");
///
/// assert!(parse_text_tool_calls("no calls here").is_empty());
/// ```
pub fn parse_text_tool_calls(text: &str) -> Vec<FunctionCall> {
    let mut calls = Vec::new();

    // Fenced blocks first: every ```json ... ``` section is a candidate.
    let mut remainder = text;
    while let Some(start) = remainder.find("```json") {
        let after = &remainder[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            if let Some(call) = call_from_json_text(&after[..end]) {
                calls.push(call);
            }
            remainder = &after[end + 3..];
        } else {
            break;
        }
    }

    if !calls.is_empty() {
        return calls;
    }

    // Fall back to the first bare JSON object in the text.
    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                if let Some(call) = call_from_json_text(&text[start..=end]) {
                    calls.push(call);
                }
            }
        }
    }

    calls
}

/// Parse one JSON fragment into a call: `tool` or `name` selects the tool,
/// `args` (or `arguments`/`parameters`) carries the argument map.
fn call_from_json_text(fragment: &str) -> Option<FunctionCall> {
    let value: Value = serde_json::from_str(fragment.trim()).ok()?;
    let obj = value.as_object()?;
    let name = obj
        .get("tool")
        .or_else(|| obj.get("name"))?
        .as_str()?
        .trim()
        .to_string();
    if name.is_empty() {
        return None;
    }
    let args = obj
        .get("args")
        .or_else(|| obj.get("arguments"))
        .or_else(|| obj.get("parameters"))
        .cloned()
        .unwrap_or(Value::Null);
    Some(FunctionCall::new(name, args))
}

/// Generate the system-prompt addendum that teaches a non-native backend the
/// embedded tool-call format: tool names, descriptions, parameter names, and
/// required flags, followed by the expected JSON shape.
pub fn tool_prompt_addendum(tools: &[ToolDeclaration]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str("\n\nYou can use the following tools:\n");
    for decl in tools {
        out.push_str(&format!("- {}: {}\n", decl.name, decl.description));
        if let Some(props) = &decl.parameters.properties {
            let mut names: Vec<&String> = props.keys().collect();
            names.sort();
            for name in names {
                let required = if decl.parameters.is_required(name) {
                    " (required)"
                } else {
                    ""
                };
                let desc = &props[name].description;
                if desc.is_empty() {
                    out.push_str(&format!("    {}{}\n", name, required));
                } else {
                    out.push_str(&format!("    {}{}: {}\n", name, required, desc));
                }
            }
        }
    }
    out.push_str(
        "\nTo call a tool, reply with a JSON object in a ```json fenced block:\n\
         ```json\n{\"tool\": \"tool_name\", \"args\": {\"param\": \"value\"}}\n```\n\
         I will run the tool and send you the result.\n",
    );
    out
}
