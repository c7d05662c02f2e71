use agentflow::content::{Content, Part};
use agentflow::error::AgentError;
use agentflow::provider::{Provider, StreamChunk, StreamResponse};
use agentflow::reflector::{
    extract_path, ErrorCategory, ErrorStore, FilePredictor, Reflector,
};
use agentflow::tool::ToolDeclaration;
use async_trait::async_trait;
use serde_json::Map;
use std::sync::Arc;

fn args(json: serde_json::Value) -> Map<String, serde_json::Value> {
    match json {
        serde_json::Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[tokio::test]
async fn file_not_found_matches_pattern_and_extracts_path() {
    let reflector = Reflector::new();
    let reflection = reflector
        .analyze(
            "read",
            &args(serde_json::json!({"path": "/tmp/missing.txt"})),
            "no such file or directory: /tmp/missing.txt",
        )
        .await;

    assert_eq!(reflection.category, ErrorCategory::FileNotFound);
    assert_eq!(reflection.alternative_tool.as_deref(), Some("glob"));
    assert_eq!(reflection.predicted_files, vec!["/tmp/missing.txt".to_string()]);
    assert!(!reflection.should_retry);
}

#[tokio::test]
async fn path_extraction_falls_back_to_the_message() {
    // No path-like argument keys: the message regexes take over.
    let found = extract_path(
        &args(serde_json::json!({"command": "cat data.csv"})),
        "cat: data.csv: No such file or directory",
    );
    assert!(found.is_some());

    let quoted = extract_path(
        &Map::new(),
        "the file 'src/missing.rs' was not found in the workspace",
    );
    assert_eq!(quoted.as_deref(), Some("src/missing.rs"));
}

#[tokio::test]
async fn predictor_contributes_up_to_three_suggestions() {
    struct NearbyFiles;
    impl FilePredictor for NearbyFiles {
        fn predict(&self, _missing: &str) -> Vec<String> {
            vec![
                "/tmp/missing.json".to_string(),
                "/tmp/missing.yaml".to_string(),
                "/tmp/missing.toml".to_string(),
                "/tmp/too-many.txt".to_string(),
            ]
        }
    }

    let reflector = Reflector::new().with_predictor(Box::new(NearbyFiles));
    let reflection = reflector
        .analyze(
            "read",
            &args(serde_json::json!({"path": "/tmp/missing.txt"})),
            "no such file or directory: /tmp/missing.txt",
        )
        .await;

    // The extracted path plus at most three predictions.
    assert_eq!(reflection.predicted_files.len(), 4);
    assert_eq!(reflection.predicted_files[0], "/tmp/missing.txt");
}

#[tokio::test]
async fn pattern_rules_cover_the_major_categories() {
    let reflector = Reflector::new();
    let cases = vec![
        ("permission denied: /etc/shadow", ErrorCategory::PermissionDenied),
        ("bash: florble: command not found", ErrorCategory::CommandNotFound),
        ("operation timed out after 30s", ErrorCategory::Timeout),
        ("connection refused by 10.0.0.2:443", ErrorCategory::NetworkError),
        ("SyntaxError: unexpected token '}'", ErrorCategory::SyntaxError),
        ("error[E0308]: mismatched types", ErrorCategory::CompilationError),
        ("missing required argument 'path'", ErrorCategory::InvalidArgs),
        ("assertion failed: left == right", ErrorCategory::TestFailure),
        ("fork: out of memory", ErrorCategory::ResourceError),
        ("fatal: not a git repository", ErrorCategory::GitError),
        ("429 too many requests", ErrorCategory::RateLimit),
        ("401 unauthorized", ErrorCategory::AuthError),
        ("mkdir: /tmp/x: already exists", ErrorCategory::AlreadyExists),
    ];
    for (message, expected) in cases {
        let reflection = reflector.analyze("tool", &Map::new(), message).await;
        assert_eq!(reflection.category, expected, "message: {}", message);
    }
}

#[tokio::test]
async fn unmatched_errors_fall_back_to_generic_advice() {
    let reflector = Reflector::new();
    let reflection = reflector
        .analyze("tool", &Map::new(), "the frobnicator went sideways")
        .await;
    assert_eq!(reflection.category, ErrorCategory::Unknown);
    assert!(reflection.suggestion.contains("alternative"));
}

#[tokio::test]
async fn learned_entries_win_over_patterns() {
    let store = Arc::new(ErrorStore::in_memory());
    store.learn(
        ErrorCategory::ResourceError,
        "frobnicator went sideways",
        "Restart the frobnicator service first.",
        Some("tool".to_string()),
    );

    let reflector = Reflector::new().with_store(store);
    let reflection = reflector
        .analyze("tool", &Map::new(), "the frobnicator went sideways again")
        .await;
    assert_eq!(reflection.category, ErrorCategory::ResourceError);
    assert!(reflection.suggestion.contains("Restart the frobnicator"));
}

#[tokio::test]
async fn error_store_round_trips_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("errors.json");
    {
        let store = ErrorStore::open(&path).unwrap();
        store.learn(
            ErrorCategory::GitError,
            "detached head",
            "Check out a branch before committing.",
            None,
        );
        assert_eq!(store.len(), 1);
    }
    let reopened = ErrorStore::open(&path).unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.lookup("we are in detached HEAD state").is_some());
}

/// Provider whose only job is to answer the semantic classification prompt.
struct ClassifierProvider {
    reply: String,
}

#[async_trait]
impl Provider for ClassifierProvider {
    async fn send_message_with_history(
        &self,
        _history: &[Content],
        _message: &str,
    ) -> Result<StreamResponse, AgentError> {
        Ok(StreamResponse::from_chunks(vec![
            StreamChunk::text(self.reply.clone()).finished(),
        ]))
    }

    async fn send_function_responses_with_history(
        &self,
        _history: &[Content],
        _responses: &[Part],
    ) -> Result<StreamResponse, AgentError> {
        Ok(StreamResponse::from_chunks(vec![
            StreamChunk::text("").finished(),
        ]))
    }

    async fn set_tools(&self, _tools: Vec<ToolDeclaration>) {}
    async fn set_system_instruction(&self, _instruction: &str) {}

    fn model_name(&self) -> &str {
        "classifier"
    }

    fn clone_provider(&self) -> Arc<dyn Provider> {
        Arc::new(ClassifierProvider {
            reply: self.reply.clone(),
        })
    }
}

#[tokio::test]
async fn semantic_layer_classifies_and_learns() {
    let store = Arc::new(ErrorStore::in_memory());
    let provider = Arc::new(ClassifierProvider {
        reply: r#"{"category": "resource_error", "suggestion": "Close unused handles.", "root_cause": "fd leak", "should_retry": true}"#
            .to_string(),
    });
    let reflector = Reflector::new()
        .with_store(Arc::clone(&store))
        .with_provider(provider);

    let reflection = reflector
        .analyze("tool", &Map::new(), "weird unclassifiable failure xyzzy")
        .await;
    assert_eq!(reflection.category, ErrorCategory::ResourceError);
    assert_eq!(reflection.root_cause.as_deref(), Some("fd leak"));
    assert!(reflection.should_retry);

    // The classification was persisted for next time.
    assert_eq!(store.len(), 1);
    assert!(store.lookup("weird unclassifiable failure xyzzy").is_some());
}

#[tokio::test]
async fn intervention_renders_all_sections() {
    struct NearbyFiles;
    impl FilePredictor for NearbyFiles {
        fn predict(&self, _missing: &str) -> Vec<String> {
            vec!["/tmp/real.txt".to_string()]
        }
    }

    let reflector = Reflector::new().with_predictor(Box::new(NearbyFiles));
    let error = "no such file or directory: /tmp/missing.txt";
    let reflection = reflector
        .analyze("read", &args(serde_json::json!({"path": "/tmp/missing.txt"})), error)
        .await;
    let text = reflector.render_intervention("read", error, &reflection);

    assert!(text.contains("Tool: read"));
    assert!(text.contains("Category: file_not_found"));
    assert!(text.contains("Error: no such file"));
    assert!(text.contains("Assessment:"));
    assert!(text.contains("Alternative: consider the 'glob' tool"));
    assert!(text.contains("Predicted files: /tmp/missing.txt, /tmp/real.txt"));
}
