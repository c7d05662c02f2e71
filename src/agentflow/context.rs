//! Context management: token estimation, importance scoring, summarization,
//! and tool-output compaction.
//!
//! The [`ContextManager`] keeps a conversation inside a token budget. When
//! the estimated size of the history crosses `threshold · max_tokens` it
//! splits the history into an *older* segment and the last `keep_recent`
//! entries, summarizes the older segment into a single synthetic user
//! message, and returns `[summary, …recent]`. Summaries are cached by a hash
//! over the older segment so repeated optimization of a stable prefix is
//! free.
//!
//! Token estimation is content-aware: JSON, code, mixed, and prose content
//! each use a different characters-per-token ratio. Estimates are cached
//! under a short content hash with halving eviction when the cache fills.
//!
//! [`compact_tool_output`] shrinks verbose tool output before it enters the
//! prompt, choosing a shape per tool (shell head+tail, file-read key
//! declarations, search error-lines-first, tree head+count).

use crate::agentflow::content::{Content, Part, Role};
use crate::agentflow::error::AgentError;
use crate::agentflow::provider::Provider;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Default token budget.
pub const DEFAULT_MAX_TOKENS: usize = 100_000;

/// Default fraction of the budget at which optimization triggers.
pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Default number of recent entries kept verbatim.
pub const DEFAULT_KEEP_RECENT: usize = 10;

/// Fraction of the budget granted to scored recent messages.
const IMPORTANCE_BUDGET_FRACTION: f64 = 0.6;

/// Maximum entries in the token-estimate cache before halving.
const ESTIMATE_CACHE_CAP: usize = 4096;

/// Per-message token overhead.
const MESSAGE_OVERHEAD: usize = 4;

/// Per-function-call token overhead.
const FUNCTION_CALL_OVERHEAD: usize = 20;

/// Per-function-response token overhead.
const FUNCTION_RESPONSE_OVERHEAD: usize = 10;

/// Prefix of the synthetic summary message.
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]";

// ---------------------------------------------------------------------------
// Token estimation
// ---------------------------------------------------------------------------

/// Detected content shape, driving the characters-per-token ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Bracket-balanced JSON documents.
    Json,
    /// Source code (high keyword density).
    Code,
    /// Interleaved code and prose.
    Mixed,
    /// Natural-language text.
    Prose,
}

const CODE_KEYWORDS: &[&str] = &[
    "fn ", "let ", "impl ", "struct ", "pub ", "use ", "def ", "class ", "import ", "return ",
    "const ", "var ", "function ", "if ", "else ", "for ", "while ", "match ", "async ", "await ",
    "=>", "==", "!=", "&&", "||", "();", "{}", "*/",
];

/// Classify `text` into a [`ContentKind`].
///
/// JSON is detected by a bracket-balanced start/end; code by the ratio of
/// language-keyword occurrences to line count (≥ 0.3 is code, 0.1–0.3 is
/// mixed); everything else is prose.
pub fn detect_content_kind(text: &str) -> ContentKind {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ContentKind::Prose;
    }

    let json_shaped = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if json_shaped && serde_json::from_str::<Value>(trimmed).is_ok() {
        return ContentKind::Json;
    }

    let lines = trimmed.lines().count().max(1);
    let keyword_hits: usize = CODE_KEYWORDS
        .iter()
        .map(|kw| trimmed.matches(kw).count())
        .sum();
    let score = keyword_hits as f64 / lines as f64;

    if score >= 0.3 {
        ContentKind::Code
    } else if score >= 0.1 {
        ContentKind::Mixed
    } else {
        ContentKind::Prose
    }
}

/// Estimate tokens for raw text using the kind-specific ratio.
///
/// Code: `len / 3.2`; JSON: `len / 3`; prose: `words · 1.3`; mixed: the
/// average of the code and prose estimates.
pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let code_estimate = text.len() as f64 / 3.2;
    let prose_estimate = text.split_whitespace().count() as f64 * 1.3;
    let estimate = match detect_content_kind(text) {
        ContentKind::Code => code_estimate,
        ContentKind::Json => text.len() as f64 / 3.0,
        ContentKind::Mixed => (code_estimate + prose_estimate) / 2.0,
        ContentKind::Prose => prose_estimate,
    };
    estimate.ceil().max(1.0) as usize
}

/// Short content hash used as the estimate-cache key.
fn short_hash(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Caching token estimator.
///
/// Estimates are deterministic, so the cache maps a short content hash to
/// the computed estimate. When the cache reaches capacity, half the entries
/// are evicted.
pub struct TokenEstimator {
    cache: Mutex<HashMap<u64, usize>>,
}

impl TokenEstimator {
    /// A fresh estimator with an empty cache.
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Estimate tokens for `text`, consulting the cache.
    pub fn estimate(&self, text: &str) -> usize {
        let key = short_hash(text);
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(&cached) = cache.get(&key) {
                return cached;
            }
        }
        let estimate = estimate_text_tokens(text);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= ESTIMATE_CACHE_CAP {
            let keep: Vec<u64> = cache.keys().take(ESTIMATE_CACHE_CAP / 2).cloned().collect();
            let mut halved = HashMap::with_capacity(keep.len());
            for k in keep {
                if let Some(v) = cache.remove(&k) {
                    halved.insert(k, v);
                }
            }
            *cache = halved;
        }
        cache.insert(key, estimate);
        estimate
    }

    /// Estimate tokens for a whole [`Content`] entry, including the
    /// per-message and per-part overheads.
    pub fn estimate_content(&self, content: &Content) -> usize {
        let mut total = MESSAGE_OVERHEAD;
        for part in &content.parts {
            total += match part {
                Part::Text { text } => self.estimate(text),
                Part::FunctionCall { args, .. } => {
                    FUNCTION_CALL_OVERHEAD + self.estimate_map(args)
                }
                Part::FunctionResponse { response, .. } => {
                    FUNCTION_RESPONSE_OVERHEAD + self.estimate_map(response)
                }
                Part::Thought { value } => self.estimate(&value.to_string()),
            };
        }
        total
    }

    /// Estimate tokens for an entire history.
    pub fn estimate_history(&self, history: &[Content]) -> usize {
        history.iter().map(|c| self.estimate_content(c)).sum()
    }

    fn estimate_map(&self, map: &Map<String, Value>) -> usize {
        map.iter()
            .map(|(k, v)| self.estimate(k) + self.estimate(&v.to_string()))
            .sum()
    }

    /// Number of cached estimates.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Importance scoring
// ---------------------------------------------------------------------------

/// Priority class of a scored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Scores a message's importance for retention during optimization.
pub trait MessageScorer: Send + Sync {
    /// Importance score; higher is more important.
    fn score(&self, content: &Content) -> f64;

    /// Priority class for the message.
    fn priority(&self, content: &Content) -> Priority;
}

const CRITICAL_TOOLS: &[&str] = &["edit", "write", "bash", "git_commit"];
const VERBOSE_TOOLS: &[&str] = &[
    "read",
    "list_dir",
    "tree",
    "glob",
    "git_log",
    "env",
    "task_output",
];
const IMPORTANT_KEYWORDS: &[&str] = &[
    "error",
    "fail",
    "panic",
    "decision",
    "decided",
    "important",
    "must",
    "system",
    "warning",
];
const FILE_EXTENSIONS: &[&str] = &[".rs", ".go", ".py", ".js", ".ts", ".java", ".toml", ".json"];

/// Default keyword/tool-weight scorer.
pub struct ImportanceScorer;

impl ImportanceScorer {
    /// A scorer with the default weights.
    pub fn new() -> Self {
        ImportanceScorer
    }
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageScorer for ImportanceScorer {
    fn score(&self, content: &Content) -> f64 {
        let mut score: f64 = 0.0;
        if content.role == Role::User {
            score += 1.0;
        }

        for part in &content.parts {
            match part {
                Part::Text { text } => {
                    let lowered = text.to_lowercase();
                    for keyword in IMPORTANT_KEYWORDS {
                        if lowered.contains(keyword) {
                            score += 0.5;
                        }
                    }
                    for ext in FILE_EXTENSIONS {
                        if lowered.contains(ext) {
                            score += 0.3;
                            break;
                        }
                    }
                }
                Part::FunctionCall { name, .. } => {
                    if CRITICAL_TOOLS.contains(&name.as_str()) {
                        score += 2.0;
                    } else if VERBOSE_TOOLS.contains(&name.as_str()) {
                        score += 0.1;
                    } else {
                        score += 0.5;
                    }
                }
                Part::FunctionResponse { name, response, .. } => {
                    if response.contains_key("error") {
                        score += 3.0;
                    } else if VERBOSE_TOOLS.contains(&name.as_str()) {
                        score += 0.1;
                    } else {
                        score += 0.4;
                    }
                }
                Part::Thought { .. } => {}
            }
        }
        score
    }

    fn priority(&self, content: &Content) -> Priority {
        let has_error = content.parts.iter().any(|p| match p {
            Part::FunctionResponse { response, .. } => response.contains_key("error"),
            Part::Text { text } => text.to_lowercase().contains("error"),
            _ => false,
        });
        if has_error {
            return Priority::Critical;
        }
        let has_edit = content.parts.iter().any(|p| match p {
            Part::FunctionCall { name, .. } => CRITICAL_TOOLS.contains(&name.as_str()),
            _ => false,
        });
        let score = self.score(content);
        if has_edit || score >= 3.0 {
            Priority::High
        } else if score >= 1.0 {
            Priority::Normal
        } else {
            Priority::Low
        }
    }
}

// ---------------------------------------------------------------------------
// Summarization
// ---------------------------------------------------------------------------

/// Produces a summary of an older history segment.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `history` into a short text.
    async fn summarize(&self, history: &[Content]) -> Result<String, AgentError>;
}

/// Summarizer that asks a provider to write the summary.
pub struct ProviderSummarizer {
    provider: Arc<dyn Provider>,
}

impl ProviderSummarizer {
    /// Summarize through the given provider.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, history: &[Content]) -> Result<String, AgentError> {
        let mut transcript = String::new();
        for content in history {
            let who = match content.role {
                Role::User => "user",
                Role::Model => "assistant",
            };
            let text = content.joined_text();
            if !text.is_empty() {
                transcript.push_str(&format!("{}: {}\n", who, text));
            }
            for call in content.function_calls() {
                transcript.push_str(&format!("{} called tool {}\n", who, call.name));
            }
        }
        let prompt = format!(
            "Summarize this conversation segment concisely, preserving decisions, \
             file paths, errors, and open questions:\n\n{}",
            transcript
        );
        let stream = self.provider.send_message(&prompt).await?;
        let response = stream.collect().await?;
        Ok(response.text)
    }
}

/// Cache key over an older segment: roles, text, and call names.
fn summary_cache_key(history: &[Content]) -> String {
    let mut hasher = Sha256::new();
    for content in history {
        hasher.update(match content.role {
            Role::User => b"u" as &[u8],
            Role::Model => b"m",
        });
        for part in &content.parts {
            match part {
                Part::Text { text } => hasher.update(text.as_bytes()),
                Part::FunctionCall { name, .. } => hasher.update(name.as_bytes()),
                Part::FunctionResponse { name, .. } => hasher.update(name.as_bytes()),
                Part::Thought { .. } => {}
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Context manager
// ---------------------------------------------------------------------------

/// Keeps a conversation inside its token budget.
pub struct ContextManager {
    max_tokens: usize,
    threshold: f64,
    keep_recent: usize,
    estimator: TokenEstimator,
    scorer: Option<Box<dyn MessageScorer>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    summary_cache: Mutex<HashMap<String, String>>,
}

impl ContextManager {
    /// A manager with the default budget (100k), threshold (0.75), and
    /// recent window (10).
    pub fn new() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            threshold: DEFAULT_THRESHOLD,
            keep_recent: DEFAULT_KEEP_RECENT,
            estimator: TokenEstimator::new(),
            scorer: None,
            summarizer: None,
            summary_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Override the token budget (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the optimization threshold (builder pattern).
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Override the recent window (builder pattern).
    pub fn with_keep_recent(mut self, keep_recent: usize) -> Self {
        self.keep_recent = keep_recent;
        self
    }

    /// Attach a message scorer (builder pattern).
    pub fn with_scorer(mut self, scorer: Box<dyn MessageScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Attach a summarizer (builder pattern). Without one, a plain textual
    /// digest of the older segment is used.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// The token estimator, shared for ad-hoc estimates.
    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Whether `history` has crossed the optimization threshold.
    pub fn needs_optimization(&self, history: &[Content]) -> bool {
        let estimated = self.estimator.estimate_history(history);
        estimated as f64 > self.threshold * self.max_tokens as f64
    }

    /// Optimize `history` into `[summary, …recent]`.
    ///
    /// The older segment (everything but the last `keep_recent` entries) is
    /// summarized into a synthetic user message prefixed with
    /// [`SUMMARY_PREFIX`]. When a scorer is attached, the recent segment is
    /// additionally filtered to the most important entries under 60% of the
    /// budget, ranked by score with a recency boost.
    pub async fn optimize(&self, history: &[Content]) -> Result<Vec<Content>, AgentError> {
        if history.len() <= self.keep_recent {
            return Ok(history.to_vec());
        }
        let split = history.len() - self.keep_recent;
        let older = &history[..split];
        let recent = &history[split..];

        let recent: Vec<Content> = match &self.scorer {
            Some(scorer) => self.select_important(recent, scorer.as_ref()),
            None => recent.to_vec(),
        };

        let summary_text = self.summarize_cached(older).await?;
        let mut optimized =
            vec![Content::user_text(format!("{} {}", SUMMARY_PREFIX, summary_text))];
        optimized.extend(recent);
        log::info!(
            "context optimized: {} entries -> {} (older segment of {} summarized)",
            history.len(),
            optimized.len(),
            older.len()
        );
        Ok(optimized)
    }

    /// Greedy selection of recent messages under 60% of the budget.
    ///
    /// Each message's rank is its score plus a recency boost proportional to
    /// its position; messages are taken best-first until the cap, then
    /// restored to chronological order.
    fn select_important(&self, recent: &[Content], scorer: &dyn MessageScorer) -> Vec<Content> {
        let cap = (self.max_tokens as f64 * IMPORTANCE_BUDGET_FRACTION) as usize;
        let mut ranked: Vec<(usize, f64, usize)> = recent
            .iter()
            .enumerate()
            .map(|(idx, content)| {
                let recency_boost = idx as f64 / recent.len().max(1) as f64;
                let rank = scorer.score(content) + recency_boost;
                (idx, rank, self.estimator.estimate_content(content))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut kept = Vec::new();
        let mut spent = 0usize;
        for (idx, _rank, cost) in ranked {
            if spent + cost > cap && !kept.is_empty() {
                continue;
            }
            spent += cost;
            kept.push(idx);
        }
        kept.sort_unstable();
        kept.into_iter().map(|idx| recent[idx].clone()).collect()
    }

    /// Summarize `older`, consulting the summary cache first.
    async fn summarize_cached(&self, older: &[Content]) -> Result<String, AgentError> {
        let key = summary_cache_key(older);
        {
            let cache = self.summary_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.get(&key) {
                return Ok(cached.clone());
            }
        }
        let summary = match &self.summarizer {
            Some(summarizer) => summarizer.summarize(older).await?,
            None => digest_history(older),
        };
        self.summary_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, summary.clone());
        Ok(summary)
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain extractive digest used when no summarizer is attached: one line per
/// entry, text truncated, tool calls named.
fn digest_history(history: &[Content]) -> String {
    let mut out = String::new();
    for content in history {
        let who = match content.role {
            Role::User => "user",
            Role::Model => "assistant",
        };
        let text = content.joined_text();
        if !text.is_empty() {
            let line: String = text.chars().take(120).collect();
            out.push_str(&format!("{}: {}\n", who, line));
        }
        for call in content.function_calls() {
            out.push_str(&format!("{} used {}\n", who, call.name));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tool-output compaction
// ---------------------------------------------------------------------------

/// Language-agnostic error indicators used by the compaction strategies.
pub const ERROR_INDICATORS: &[&str] = &[
    "error",
    "panic",
    "failed",
    "failure",
    "traceback",
    "exception",
    "fatal",
    ".go:",
    ".py:",
    ".js:",
    ".ts:",
    ".java:",
];

fn has_error_indicators(text: &str) -> bool {
    let lowered = text.to_lowercase();
    ERROR_INDICATORS.iter().any(|ind| lowered.contains(ind))
}

fn line_has_error(line: &str) -> bool {
    let lowered = line.to_lowercase();
    ERROR_INDICATORS.iter().any(|ind| lowered.contains(ind))
}

/// Compact `output` of the named tool down to roughly `max_chars`.
///
/// The shape is chosen per tool:
/// - shell-style tools keep a 3-line head and a 25-line tail when error
///   indicators are present;
/// - file reads prepend a "key declarations" block (function/type/class
///   signatures) before the truncated body;
/// - search tools put error-matching lines first;
/// - tree/listing tools keep a head plus an entry count;
/// - everything else keeps error lines verbatim and fills with the rest.
pub fn compact_tool_output(tool_name: &str, output: &str, max_chars: usize) -> String {
    if output.len() <= max_chars {
        return output.to_string();
    }
    let compacted = match tool_shape(tool_name) {
        ToolShape::Shell => compact_shell(output, max_chars),
        ToolShape::FileRead => compact_file_read(output, max_chars),
        ToolShape::Search => compact_search(output, max_chars),
        ToolShape::Listing => compact_listing(output, max_chars),
        ToolShape::Default => compact_default(output, max_chars),
    };
    log::debug!(
        "compacted '{}' output: {} -> {} chars",
        tool_name,
        output.len(),
        compacted.len()
    );
    compacted
}

enum ToolShape {
    Shell,
    FileRead,
    Search,
    Listing,
    Default,
}

fn tool_shape(tool_name: &str) -> ToolShape {
    let name = tool_name.to_lowercase();
    if ["bash", "shell", "sh", "exec", "run", "cmd"]
        .iter()
        .any(|n| name.contains(n))
    {
        ToolShape::Shell
    } else if ["read", "cat", "open"].iter().any(|n| name.contains(n)) {
        ToolShape::FileRead
    } else if ["grep", "search", "find", "rg"].iter().any(|n| name.contains(n)) {
        ToolShape::Search
    } else if ["tree", "list", "ls", "glob"].iter().any(|n| name.contains(n)) {
        ToolShape::Listing
    } else {
        ToolShape::Default
    }
}

const SHELL_HEAD_LINES: usize = 3;
const SHELL_TAIL_LINES: usize = 25;

fn compact_shell(output: &str, max_chars: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if has_error_indicators(output) && lines.len() > SHELL_HEAD_LINES + SHELL_TAIL_LINES {
        let head = lines[..SHELL_HEAD_LINES].join("\n");
        let tail = lines[lines.len() - SHELL_TAIL_LINES..].join("\n");
        let omitted = lines.len() - SHELL_HEAD_LINES - SHELL_TAIL_LINES;
        let combined = format!("{}\n[... {} lines omitted ...]\n{}", head, omitted, tail);
        return clamp_chars(&combined, max_chars);
    }
    clamp_chars(output, max_chars)
}

const DECLARATION_MARKERS: &[&str] = &[
    "fn ",
    "pub fn ",
    "struct ",
    "enum ",
    "trait ",
    "impl ",
    "type ",
    "def ",
    "class ",
    "function ",
    "interface ",
    "func ",
];

fn compact_file_read(output: &str, max_chars: usize) -> String {
    let declarations: Vec<&str> = output
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            DECLARATION_MARKERS.iter().any(|m| trimmed.starts_with(m))
        })
        .take(40)
        .collect();
    let mut out = String::new();
    if !declarations.is_empty() {
        out.push_str("Key declarations:\n");
        out.push_str(&declarations.join("\n"));
        out.push_str("\n---\n");
    }
    let remaining = max_chars.saturating_sub(out.len());
    out.push_str(&clamp_chars(output, remaining));
    out
}

fn compact_search(output: &str, max_chars: usize) -> String {
    let (error_lines, other_lines): (Vec<&str>, Vec<&str>) =
        output.lines().partition(|line| line_has_error(line));
    let mut out = String::new();
    for line in error_lines.iter().chain(other_lines.iter()) {
        if out.len() + line.len() + 1 > max_chars {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn compact_listing(output: &str, max_chars: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let mut out = String::new();
    for line in &lines {
        if out.len() + line.len() + 1 > max_chars.saturating_sub(40) {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    let shown = out.lines().count();
    if shown < lines.len() {
        out.push_str(&format!("[{} of {} entries shown]\n", shown, lines.len()));
    }
    out
}

fn compact_default(output: &str, max_chars: usize) -> String {
    let mut out = String::new();
    // Error lines survive verbatim, then the rest fills up to the cap.
    for line in output.lines().filter(|l| line_has_error(l)) {
        if out.len() + line.len() + 1 > max_chars {
            return out;
        }
        out.push_str(line);
        out.push('\n');
    }
    for line in output.lines().filter(|l| !line_has_error(l)) {
        if out.len() + line.len() + 1 > max_chars {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn clamp_chars(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let clamped: String = text.chars().take(max).collect();
    clamped
}
