//! Reflective error recovery.
//!
//! The [`Reflector`] classifies a failed tool invocation and produces an
//! intervention — a synthetic user-role message that steers the model toward
//! a fix. Classification tries four layers in order, first non-empty wins:
//!
//! 1. **Learned**: a lookup in the persistent [`ErrorStore`] for a fragment
//!    matching the error message.
//! 2. **Pattern**: a fixed table of regex rules, each carrying a category,
//!    a suggestion, a retry flag, and optionally an alternative tool.
//! 3. **Semantic**: ask the provider to classify the error as JSON; a
//!    successful classification is persisted back into the store.
//! 4. **Fallback**: a generic inspect/verify/try-alternative message.
//!
//! For `file_not_found` failures the reflector extracts a candidate path from
//! the call arguments or the message and, when a [`FilePredictor`] is
//! attached, asks it for up to three nearby suggestions.

use crate::agentflow::provider::Provider;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Maximum file suggestions carried in an intervention.
const MAX_PREDICTED_FILES: usize = 3;

/// Classification of a failed tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    FileNotFound,
    PermissionDenied,
    CommandNotFound,
    Timeout,
    NetworkError,
    SyntaxError,
    CompilationError,
    InvalidArgs,
    TestFailure,
    ResourceError,
    GitError,
    RateLimit,
    AuthError,
    AlreadyExists,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::FileNotFound => "file_not_found",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::CommandNotFound => "command_not_found",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::CompilationError => "compilation_error",
            ErrorCategory::InvalidArgs => "invalid_args",
            ErrorCategory::TestFailure => "test_failure",
            ErrorCategory::ResourceError => "resource_error",
            ErrorCategory::GitError => "git_error",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::AuthError => "auth_error",
            ErrorCategory::AlreadyExists => "already_exists",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

impl ErrorCategory {
    /// Parse the snake_case name back into a category.
    pub fn parse(name: &str) -> ErrorCategory {
        match name.trim().to_lowercase().as_str() {
            "file_not_found" => ErrorCategory::FileNotFound,
            "permission_denied" => ErrorCategory::PermissionDenied,
            "command_not_found" => ErrorCategory::CommandNotFound,
            "timeout" => ErrorCategory::Timeout,
            "network_error" => ErrorCategory::NetworkError,
            "syntax_error" => ErrorCategory::SyntaxError,
            "compilation_error" => ErrorCategory::CompilationError,
            "invalid_args" => ErrorCategory::InvalidArgs,
            "test_failure" => ErrorCategory::TestFailure,
            "resource_error" => ErrorCategory::ResourceError,
            "git_error" => ErrorCategory::GitError,
            "rate_limit" => ErrorCategory::RateLimit,
            "auth_error" => ErrorCategory::AuthError,
            "already_exists" => ErrorCategory::AlreadyExists,
            _ => ErrorCategory::Unknown,
        }
    }
}

struct PatternRule {
    pattern: Regex,
    category: ErrorCategory,
    suggestion: &'static str,
    should_retry: bool,
    alternative_tool: Option<&'static str>,
}

lazy_static! {
    static ref PATTERN_RULES: Vec<PatternRule> = vec![
        PatternRule {
            pattern: Regex::new(r"(?i)no such file or directory|file not found|cannot find the (?:file|path)|does not exist").unwrap(),
            category: ErrorCategory::FileNotFound,
            suggestion: "The target file does not exist at that path. List the directory or search for the file first.",
            should_retry: false,
            alternative_tool: Some("glob"),
        },
        PatternRule {
            pattern: Regex::new(r"(?i)permission denied|access denied|operation not permitted|read-only file system").unwrap(),
            category: ErrorCategory::PermissionDenied,
            suggestion: "Access was denied. Check ownership and permissions, or work in a writable location.",
            should_retry: false,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)command not found|not recognized as an internal|executable file not found|no such command").unwrap(),
            category: ErrorCategory::CommandNotFound,
            suggestion: "The command is not installed or not on PATH. Verify the name or use an equivalent that exists.",
            should_retry: false,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)timed? ?out|deadline exceeded").unwrap(),
            category: ErrorCategory::Timeout,
            suggestion: "The operation exceeded its deadline. Narrow the scope or split the work into smaller steps.",
            should_retry: true,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)connection (?:refused|reset)|network is unreachable|could not resolve|dns").unwrap(),
            category: ErrorCategory::NetworkError,
            suggestion: "A network failure occurred. Retry once; if it persists the endpoint is likely unreachable.",
            should_retry: true,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)syntax ?error|unexpected token|unexpected EOF|invalid syntax").unwrap(),
            category: ErrorCategory::SyntaxError,
            suggestion: "The input has a syntax error. Re-read the failing snippet and fix the structure before retrying.",
            should_retry: false,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)compil(?:e|ation) (?:error|failed)|cannot find (?:symbol|crate|module)|undefined reference|error\[E\d+\]").unwrap(),
            category: ErrorCategory::CompilationError,
            suggestion: "Compilation failed. Read the first compiler error, fix it, then rebuild.",
            should_retry: false,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)invalid argument|missing (?:required )?(?:argument|parameter|field)|unknown (?:flag|option|argument)").unwrap(),
            category: ErrorCategory::InvalidArgs,
            suggestion: "The arguments were rejected. Compare them against the tool's parameter schema.",
            should_retry: false,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)test(?:s)? failed|assertion failed|FAILED\b|\d+ failed").unwrap(),
            category: ErrorCategory::TestFailure,
            suggestion: "A test failed. Read the assertion message and the failing test before changing code.",
            should_retry: false,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)out of memory|no space left|disk full|too many open files|resource temporarily unavailable").unwrap(),
            category: ErrorCategory::ResourceError,
            suggestion: "A system resource was exhausted. Free resources or reduce the working set before retrying.",
            should_retry: true,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)not a git repository|merge conflict|detached HEAD|nothing to commit|git ").unwrap(),
            category: ErrorCategory::GitError,
            suggestion: "Git rejected the operation. Check repository state with a status command first.",
            should_retry: false,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)rate limit|too many requests|429").unwrap(),
            category: ErrorCategory::RateLimit,
            suggestion: "You are being rate limited. Wait before retrying and batch requests where possible.",
            should_retry: true,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)unauthorized|authentication failed|invalid (?:token|credentials|api key)|401|403").unwrap(),
            category: ErrorCategory::AuthError,
            suggestion: "Authentication failed. The credentials are missing or wrong; retrying will not help.",
            should_retry: false,
            alternative_tool: None,
        },
        PatternRule {
            pattern: Regex::new(r"(?i)already exists|file exists|duplicate key").unwrap(),
            category: ErrorCategory::AlreadyExists,
            suggestion: "The target already exists. Use the existing one, or remove/rename it first.",
            should_retry: false,
            alternative_tool: None,
        },
    ];

    /// `no such file or directory: /path` and friends.
    static ref PATH_AFTER_MESSAGE: Regex =
        Regex::new(r#"(?i)(?:no such file or directory|not found)[:\s]+['"]?([^\s'"]+)"#).unwrap();

    /// `cat: data.csv: No such file` / `'src/x.rs' was not found` — a
    /// dotted path appearing before the message.
    static ref PATH_BEFORE_MESSAGE: Regex =
        Regex::new(r#"(?i)['"]?([^\s:'"]+\.[^\s:'"]+)['"]?[^'"]*(?:no such file|not found)"#)
            .unwrap();
}

/// Argument keys inspected when extracting a candidate path.
const PATH_ARG_KEYS: &[&str] = &["path", "file_path", "filepath", "file", "filename"];

/// Extract a candidate path from call arguments or the error message.
pub fn extract_path(args: &Map<String, Value>, message: &str) -> Option<String> {
    for key in PATH_ARG_KEYS {
        if let Some(value) = args.get(*key).and_then(Value::as_str) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    if let Some(caps) = PATH_AFTER_MESSAGE.captures(message) {
        return Some(caps[1].trim_end_matches(&[',', '.', ';'][..]).to_string());
    }
    if let Some(caps) = PATH_BEFORE_MESSAGE.captures(message) {
        return Some(caps[1].to_string());
    }
    None
}

/// Suggests nearby files for a path that does not exist.
pub trait FilePredictor: Send + Sync {
    /// Up to three plausible alternatives for `missing`.
    fn predict(&self, missing: &str) -> Vec<String>;
}

/// One learned classification persisted in the [`ErrorStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedEntry {
    /// Classified category.
    pub category: ErrorCategory,
    /// Message fragment the entry matches against (substring,
    /// case-insensitive).
    pub message: String,
    /// Suggestion surfaced when the entry matches.
    pub suggestion: String,
    /// Tool the entry was learned from, when known.
    #[serde(default)]
    pub tool: Option<String>,
    /// When the entry was learned.
    pub created: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ErrorStoreDoc {
    entries: Vec<LearnedEntry>,
}

/// Persistent store of learned error classifications.
///
/// One JSON document on disk; every update rewrites the whole file.
pub struct ErrorStore {
    path: Option<PathBuf>,
    doc: RwLock<ErrorStoreDoc>,
}

impl ErrorStore {
    /// An in-memory store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: RwLock::new(ErrorStoreDoc::default()),
        }
    }

    /// Open (or create) a store backed by the given file.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            ErrorStoreDoc::default()
        };
        Ok(Self {
            path: Some(path),
            doc: RwLock::new(doc),
        })
    }

    /// Find a learned entry whose fragment appears in `message`.
    pub fn lookup(&self, message: &str) -> Option<LearnedEntry> {
        let lowered = message.to_lowercase();
        let doc = self.doc.read().unwrap_or_else(|e| e.into_inner());
        doc.entries
            .iter()
            .find(|entry| !entry.message.is_empty() && lowered.contains(&entry.message.to_lowercase()))
            .cloned()
    }

    /// Learn a classification and persist the store.
    pub fn learn(
        &self,
        category: ErrorCategory,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        tool: Option<String>,
    ) {
        let serialized = {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            doc.entries.push(LearnedEntry {
                category,
                message: message.into(),
                suggestion: suggestion.into(),
                tool,
                created: Utc::now(),
            });
            serde_json::to_string_pretty(&*doc).ok()
        };
        // Write outside the lock.
        if let (Some(path), Some(json)) = (&self.path, serialized) {
            if let Err(err) = std::fs::write(path, json) {
                log::warn!("failed to persist error store: {}", err);
            }
        }
    }

    /// Number of learned entries.
    pub fn len(&self) -> usize {
        self.doc
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Whether nothing has been learned yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The outcome of analyzing a failed tool invocation.
#[derive(Debug, Clone)]
pub struct Reflection {
    /// Classified category.
    pub category: ErrorCategory,
    /// Concrete next step for the model.
    pub suggestion: String,
    /// Root cause, when the semantic layer produced one.
    pub root_cause: Option<String>,
    /// Whether retrying the same call could work.
    pub should_retry: bool,
    /// Alternative tool to try, when the rule suggests one.
    pub alternative_tool: Option<String>,
    /// Plausible alternatives for a missing file.
    pub predicted_files: Vec<String>,
}

/// Classifies failed tool invocations and renders interventions.
pub struct Reflector {
    store: Option<Arc<ErrorStore>>,
    provider: Option<Arc<dyn Provider>>,
    predictor: Option<Box<dyn FilePredictor>>,
}

impl Reflector {
    /// A reflector with only the pattern and fallback layers.
    pub fn new() -> Self {
        Self {
            store: None,
            provider: None,
            predictor: None,
        }
    }

    /// Attach a persistent error store, enabling the learned layer
    /// (builder pattern).
    pub fn with_store(mut self, store: Arc<ErrorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a provider, enabling the semantic layer (builder pattern).
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Attach a file predictor (builder pattern).
    pub fn with_predictor(mut self, predictor: Box<dyn FilePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Analyze a failed call: classify, then enrich `file_not_found` results
    /// with a candidate path and predictions.
    pub async fn analyze(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        error: &str,
    ) -> Reflection {
        let mut reflection = self.classify(tool_name, error).await;

        if reflection.category == ErrorCategory::FileNotFound {
            if let Some(path) = extract_path(args, error) {
                reflection.predicted_files.push(path.clone());
                if let Some(predictor) = &self.predictor {
                    for candidate in predictor.predict(&path).into_iter().take(MAX_PREDICTED_FILES)
                    {
                        if !reflection.predicted_files.contains(&candidate) {
                            reflection.predicted_files.push(candidate);
                        }
                    }
                }
            }
        }

        reflection
    }

    async fn classify(&self, tool_name: &str, error: &str) -> Reflection {
        // Layer 1: learned.
        if let Some(store) = &self.store {
            if let Some(entry) = store.lookup(error) {
                log::debug!("reflector: learned match for '{}'", tool_name);
                return Reflection {
                    category: entry.category,
                    suggestion: entry.suggestion,
                    root_cause: None,
                    should_retry: false,
                    alternative_tool: None,
                    predicted_files: Vec::new(),
                };
            }
        }

        // Layer 2: pattern rules.
        for rule in PATTERN_RULES.iter() {
            if rule.pattern.is_match(error) {
                return Reflection {
                    category: rule.category,
                    suggestion: rule.suggestion.to_string(),
                    root_cause: None,
                    should_retry: rule.should_retry,
                    alternative_tool: rule.alternative_tool.map(str::to_string),
                    predicted_files: Vec::new(),
                };
            }
        }

        // Layer 3: semantic.
        if let Some(provider) = &self.provider {
            if let Some(reflection) = self.semantic_classify(provider, tool_name, error).await {
                return reflection;
            }
        }

        // Layer 4: fallback.
        Reflection {
            category: ErrorCategory::Unknown,
            suggestion: "Inspect the arguments you passed, verify the target exists, and try an \
                         alternative approach if the same call keeps failing."
                .to_string(),
            root_cause: None,
            should_retry: false,
            alternative_tool: None,
            predicted_files: Vec::new(),
        }
    }

    /// Ask the provider for a JSON classification and persist it on success.
    async fn semantic_classify(
        &self,
        provider: &Arc<dyn Provider>,
        tool_name: &str,
        error: &str,
    ) -> Option<Reflection> {
        let prompt = format!(
            "A tool named '{}' failed with this error:\n{}\n\n\
             Reply with only a JSON object: {{\"category\": \"...\", \"suggestion\": \"...\", \
             \"root_cause\": \"...\", \"should_retry\": true|false}}. \
             Category must be one of: file_not_found, permission_denied, command_not_found, \
             timeout, network_error, syntax_error, compilation_error, invalid_args, \
             test_failure, resource_error, git_error, rate_limit, auth_error, already_exists.",
            tool_name, error
        );
        let stream = provider.send_message(&prompt).await.ok()?;
        let response = stream.collect().await.ok()?;
        let parsed = parse_json_object(&response.text)?;

        let category = ErrorCategory::parse(parsed.get("category")?.as_str()?);
        let suggestion = parsed.get("suggestion")?.as_str()?.to_string();
        let root_cause = parsed
            .get("root_cause")
            .and_then(Value::as_str)
            .map(str::to_string);
        let should_retry = parsed
            .get("should_retry")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if let Some(store) = &self.store {
            store.learn(category, error, suggestion.clone(), Some(tool_name.to_string()));
        }

        Some(Reflection {
            category,
            suggestion,
            root_cause,
            should_retry,
            alternative_tool: None,
            predicted_files: Vec::new(),
        })
    }

    /// Render the multi-section intervention message injected into history.
    pub fn render_intervention(
        &self,
        tool_name: &str,
        error: &str,
        reflection: &Reflection,
    ) -> String {
        let mut out = String::from("A tool call just failed. Analysis:\n");
        out.push_str(&format!("Tool: {}\n", tool_name));
        out.push_str(&format!("Category: {}\n", reflection.category));
        out.push_str(&format!("Error: {}\n", error));
        out.push_str(&format!("Assessment: {}", reflection.suggestion));
        if let Some(root_cause) = &reflection.root_cause {
            out.push_str(&format!("\nRoot cause: {}", root_cause));
        }
        if let Some(alternative) = &reflection.alternative_tool {
            out.push_str(&format!("\nAlternative: consider the '{}' tool instead.", alternative));
        }
        if !reflection.predicted_files.is_empty() {
            out.push_str(&format!(
                "\nPredicted files: {}",
                reflection.predicted_files.join(", ")
            ));
        }
        if reflection.should_retry {
            out.push_str("\nThis failure looks transient; retry the call once before changing approach.");
        } else {
            out.push_str("\nDo not repeat the same call unchanged; adjust it per the assessment above.");
        }
        out
    }
}

impl Default for Reflector {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the first JSON object from a response, tolerating fenced blocks.
fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    let cleaned = text.trim();
    let candidate = if let Some(start) = cleaned.find('{') {
        let end = cleaned.rfind('}')?;
        &cleaned[start..=end]
    } else {
        return None;
    };
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
