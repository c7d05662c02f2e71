use agentflow::optimizer::{PromptOptimizer, StrategyOptimizer, TaskExample, TaskExampleStore};
use agentflow::router::{HandlerKind, ModelTier, Router, SmartRouter};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn strategy_metrics_accumulate() {
    let optimizer = StrategyOptimizer::in_memory();
    optimizer.record("tool_call", "bugfix", true, Duration::from_secs(2));
    optimizer.record("tool_call", "bugfix", true, Duration::from_secs(4));
    optimizer.record("tool_call", "bugfix", false, Duration::from_secs(6));

    let metrics = optimizer.metrics_for("tool_call").unwrap();
    assert_eq!(metrics.success_count, 2);
    assert_eq!(metrics.failure_count, 1);
    assert!((metrics.avg_duration - 4.0).abs() < 1e-9);
    assert_eq!(metrics.task_types.get("bugfix"), Some(&3));

    let rate = optimizer.success_rate("tool_call").unwrap();
    assert!((rate - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn best_strategy_is_scoped_to_the_task_type() {
    let optimizer = StrategyOptimizer::in_memory();
    optimizer.record("decompose", "refactoring", true, Duration::from_secs(1));
    optimizer.record("tool_call", "refactoring", false, Duration::from_secs(1));
    optimizer.record("verify", "testing", true, Duration::from_secs(1));

    let (best, rate) = optimizer.best_strategy("refactoring").unwrap();
    assert_eq!(best, "decompose");
    assert!((rate - 1.0).abs() < 1e-9);

    // "verify" was never used on refactoring tasks.
    assert!(optimizer.best_strategy("exploration").is_none());
}

#[tokio::test]
async fn strategy_metrics_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strategies.json");
    {
        let optimizer = StrategyOptimizer::open(&path);
        optimizer.record("tool_call", "general", true, Duration::from_secs(1));
        // Persistence is kicked off asynchronously; give it a moment.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let reopened = StrategyOptimizer::open(&path);
    assert!(reopened.success_rate("tool_call").is_some());
}

#[test]
fn prompt_variants_track_success_rate() {
    let optimizer = PromptOptimizer::in_memory();
    optimizer.record("base", "terse", true, 120, Duration::from_secs(1));
    optimizer.record("base", "terse", false, 80, Duration::from_secs(3));
    optimizer.record("base", "verbose", true, 300, Duration::from_secs(2));

    let best = optimizer.best_variant("base").unwrap();
    assert_eq!(best.variation, "verbose");
    assert!((best.success_rate - 1.0).abs() < 1e-9);

    // Averages update incrementally.
    let terse = optimizer
        .best_variant("missing-base")
        .map(|_| ())
        .is_none();
    assert!(terse);
}

#[test]
fn task_examples_round_trip_and_rank() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("examples.json");
    let store = TaskExampleStore::open(&path);

    for (score, tag) in [(0.4, "weak"), (0.9, "strong")].iter() {
        store.record(TaskExample {
            id: String::new(),
            task_type: "bugfix".to_string(),
            input_prompt: "fix the thing".to_string(),
            agent_type: "general".to_string(),
            tools_used: vec!["read".to_string()],
            tool_sequence: vec!["read".to_string(), "edit".to_string()],
            final_output: "fixed".to_string(),
            duration: 12.0,
            tokens_used: 900,
            success_score: *score,
            tags: vec![tag.to_string()],
            created: Utc::now(),
            use_count: 0,
        });
    }

    let top = store.examples_for("bugfix", 1);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].tags, vec!["strong".to_string()]);

    let reopened = TaskExampleStore::open(&path);
    assert_eq!(reopened.len(), 2);
}

#[test]
fn router_classifies_handlers_and_tiers() {
    let router = Router::new();

    let chat = router.classify("what is a monad?");
    assert_eq!(chat.handler, HandlerKind::Chat);
    assert_eq!(chat.tier, ModelTier::Fast);

    let tooling = router.classify("fix the bug in the parser file");
    assert_eq!(tooling.handler, HandlerKind::ToolUse);
    assert_eq!(tooling.task_type, "bugfix");

    let planning = router.classify("plan the migration step by step");
    assert_eq!(planning.handler, HandlerKind::Planning);
    assert_eq!(planning.tier, ModelTier::Deep);

    let coordination = router.classify("run all of these conversions in parallel");
    assert_eq!(coordination.handler, HandlerKind::Coordination);
}

#[test]
fn smart_router_escalates_on_poor_history() {
    let optimizer = Arc::new(StrategyOptimizer::in_memory());
    for _ in 0..5 {
        optimizer.record("tool_call", "bugfix", false, Duration::from_secs(1));
    }
    let smart = SmartRouter::new(optimizer);

    let route = smart.classify("fix the broken build");
    assert_eq!(route.tier, ModelTier::Deep);
}
