//! Conversation history model.
//!
//! A conversation is an ordered sequence of [`Content`] entries, each carrying
//! a [`Role`] and an ordered list of [`Part`]s. Parts are exactly one of:
//! plain text, a function call, a function response, or an opaque "thought"
//! the provider asked us to preserve.
//!
//! The history is append-only within a turn. The agent may inject synthetic
//! `User`-role entries that carry intervention text or summaries — these are
//! ordinary [`Content`] values as far as this module is concerned.
//!
//! The serialized form is the on-disk session format: each part is tagged
//! with a `type` field (`text` / `function_call` / `function_response` /
//! `thought`).
//!
//! # Example
//!
//! ```rust
//! use agentflow::content::{Content, FunctionCall, Part, Role};
//!
//! let call = FunctionCall::new("read", serde_json::json!({"path": "/tmp/x"}));
//! let history = vec![
//!     Content::user_text("open the file"),
//!     Content::model(vec![Part::from_call(call.clone())]),
//!     Content::user(vec![Part::function_response(&call, serde_json::json!({"output": "ok"}))]),
//! ];
//! assert!(agentflow::content::history_is_well_formed(&history));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who authored a [`Content`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Caller-authored input, tool responses, and injected interventions.
    User,
    /// Model-authored output, including function calls.
    Model,
}

/// A completed function call extracted from a model response.
///
/// Providers assign an opaque `id` so the matching response can be correlated
/// back; when a provider does not assign ids the field is empty and
/// correlation falls back to the name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Provider-assigned call id, or empty when the provider has none.
    #[serde(default)]
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Named-argument map supplied by the model.
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl FunctionCall {
    /// Create a call with an empty id.
    ///
    /// Accepts any JSON value for `args`; non-object values become an empty
    /// map, which mirrors how lenient provider payloads are treated.
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            args: match args {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    /// Attach a provider-assigned id (builder pattern).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// One element of a [`Content`] entry.
///
/// Serialized with an adjacent `type` tag so persisted sessions are
/// self-describing:
///
/// ```text
/// {"type":"text","text":"hello"}
/// {"type":"function_call","id":"c1","name":"read","args":{"path":"x"}}
/// {"type":"function_response","id":"c1","name":"read","response":{"output":"..."}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Plain text.
    Text {
        /// The text body.
        text: String,
    },
    /// A tool invocation requested by the model.
    FunctionCall {
        /// Provider-assigned call id, empty when absent.
        #[serde(default)]
        id: String,
        /// Tool name.
        name: String,
        /// Named-argument map.
        #[serde(default)]
        args: Map<String, Value>,
    },
    /// The result of a tool invocation, echoed back to the model.
    FunctionResponse {
        /// Id of the originating call, empty when the provider assigns none.
        #[serde(default)]
        id: String,
        /// Tool name of the originating call.
        name: String,
        /// Result map.
        #[serde(default)]
        response: Map<String, Value>,
    },
    /// An opaque provider part (reasoning traces, signatures) preserved
    /// verbatim so follow-up requests can replay it.
    Thought {
        /// The raw provider payload.
        #[serde(default)]
        value: Value,
    },
}

impl Part {
    /// Build a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Build a function-call part from a [`FunctionCall`].
    pub fn from_call(call: FunctionCall) -> Self {
        Part::FunctionCall {
            id: call.id,
            name: call.name,
            args: call.args,
        }
    }

    /// Build a function-response part correlated with `call`.
    pub fn function_response(call: &FunctionCall, response: Value) -> Self {
        Part::FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            response: match response {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("output".to_string(), other);
                    map
                }
            },
        }
    }

    /// Extract a [`FunctionCall`] if this is a function-call part.
    pub fn as_call(&self) -> Option<FunctionCall> {
        match self {
            Part::FunctionCall { id, name, args } => Some(FunctionCall {
                id: id.clone(),
                name: name.clone(),
                args: args.clone(),
            }),
            _ => None,
        }
    }

    /// The text body, if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// One entry in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Who authored this entry.
    pub role: Role,
    /// Ordered parts.
    pub parts: Vec<Part>,
}

impl Content {
    /// A user-role entry with the given parts.
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    /// A model-role entry with the given parts.
    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }

    /// A user-role entry carrying a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::text(text)])
    }

    /// A model-role entry carrying a single text part.
    pub fn model_text(text: impl Into<String>) -> Self {
        Self::model(vec![Part::text(text)])
    }

    /// All function calls contained in this entry, in order.
    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.parts.iter().filter_map(Part::as_call).collect()
    }

    /// Concatenated text of every text part.
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// Check the history-shape invariant: every function-response part must be
/// preceded by a function-call part with the same id, or — when the id is
/// empty — the same name.
///
/// # Example
///
/// ```rust
/// use agentflow::content::{Content, Part, history_is_well_formed};
///
/// // A response with no earlier call is malformed.
/// let bad = vec![Content::user(vec![Part::FunctionResponse {
///     id: "c1".to_string(),
///     name: "read".to_string(),
///     response: serde_json::Map::new(),
/// }])];
/// assert!(!history_is_well_formed(&bad));
/// ```
pub fn history_is_well_formed(history: &[Content]) -> bool {
    let mut seen_ids: Vec<String> = Vec::new();
    let mut seen_names: Vec<String> = Vec::new();

    for content in history {
        for part in &content.parts {
            match part {
                Part::FunctionCall { id, name, .. } => {
                    if !id.is_empty() {
                        seen_ids.push(id.clone());
                    }
                    seen_names.push(name.clone());
                }
                Part::FunctionResponse { id, name, .. } => {
                    let matched = if !id.is_empty() {
                        seen_ids.iter().any(|seen| seen == id)
                    } else {
                        seen_names.iter().any(|seen| seen == name)
                    };
                    if !matched {
                        return false;
                    }
                }
                _ => {}
            }
        }
    }
    true
}
