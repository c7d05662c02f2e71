use agentflow::delegation::{
    default_rules, DelegationContext, DelegationDecision, DelegationMetrics, DelegationStrategy,
    MAX_DELEGATION_PATHS,
};
use agentflow::memory::{MemoryKind, SharedMemory};
use std::sync::Arc;
use std::time::Duration;

fn ctx() -> DelegationContext {
    DelegationContext {
        agent_type: "general".to_string(),
        current_turn: 3,
        last_tool_name: None,
        last_tool_error: None,
        stuck_count: 0,
        delegation_depth: 0,
    }
}

#[test]
fn depth_cap_always_wins() {
    let strategy = DelegationStrategy::new();
    let mut context = ctx();
    context.stuck_count = 10;
    context.current_turn = 50;
    context.delegation_depth = 5;

    assert!(!strategy.evaluate(&context).is_delegate());
}

#[test]
fn missing_file_routes_to_explore() {
    let strategy = DelegationStrategy::new();
    let mut context = ctx();
    context.last_tool_error = Some("no such file or directory: src/lib.rs".to_string());

    match strategy.evaluate(&context) {
        DelegationDecision::Delegate {
            target_type,
            rule_name,
            prompt,
            ..
        } => {
            assert_eq!(target_type, "explore");
            assert_eq!(rule_name, "missing_file_explore");
            assert!(prompt.contains("src/lib.rs"));
        }
        DelegationDecision::Stay => panic!("expected delegation"),
    }
}

#[test]
fn stuck_agent_escalates_to_planning() {
    let strategy = DelegationStrategy::new();
    let mut context = ctx();
    context.stuck_count = 4;

    match strategy.evaluate(&context) {
        DelegationDecision::Delegate { target_type, .. } => assert_eq!(target_type, "plan"),
        DelegationDecision::Stay => panic!("expected delegation"),
    }
}

#[test]
fn from_type_filters_apply() {
    let strategy = DelegationStrategy::new();
    // The explore_needs_shell rule only fires for explore agents.
    let mut context = ctx();
    context.agent_type = "general".to_string();
    context.last_tool_error = Some("shell access required".to_string());
    // No rule without a type filter matches this context.
    assert!(!strategy.evaluate(&context).is_delegate());

    context.agent_type = "explore".to_string();
    match strategy.evaluate(&context) {
        DelegationDecision::Delegate { target_type, .. } => assert_eq!(target_type, "shell"),
        DelegationDecision::Stay => panic!("expected delegation"),
    }
}

#[test]
fn deep_turns_escalate_to_general() {
    let strategy = DelegationStrategy::new();
    let mut context = ctx();
    context.current_turn = 7;
    match strategy.evaluate(&context) {
        DelegationDecision::Delegate { target_type, .. } => assert_eq!(target_type, "general"),
        DelegationDecision::Stay => panic!("expected delegation"),
    }
}

#[test]
fn there_are_six_default_rules() {
    assert_eq!(default_rules().len(), 6);
}

#[test]
fn weights_stay_clamped() {
    let metrics = DelegationMetrics::in_memory();
    for _ in 0..100 {
        metrics.record("a", "b", "rule", true, Duration::from_millis(10));
    }
    let weight = metrics.weight("a", "b", "rule");
    assert!(weight <= 2.0, "weight {} above clamp", weight);

    for _ in 0..200 {
        metrics.record("a", "b", "rule", false, Duration::from_millis(10));
    }
    let weight = metrics.weight("a", "b", "rule");
    assert!(weight >= 0.5, "weight {} below clamp", weight);
}

#[test]
fn failing_paths_get_vetoed() {
    let metrics = Arc::new(DelegationMetrics::in_memory());
    for _ in 0..20 {
        metrics.record("general", "plan", "stuck_escalate_plan", false, Duration::from_millis(1));
    }
    assert!(!metrics.should_use("general", "plan", "stuck_escalate_plan"));

    // An unseen path always passes.
    assert!(metrics.should_use("general", "explore", "missing_file_explore"));

    // And the veto flows through strategy evaluation.
    let strategy = DelegationStrategy::new().with_metrics(metrics);
    let mut context = ctx();
    context.stuck_count = 4;
    assert!(!strategy.evaluate(&context).is_delegate());
}

#[test]
fn path_table_evicts_least_recently_used() {
    let metrics = DelegationMetrics::in_memory();
    for i in 0..(MAX_DELEGATION_PATHS + 10) {
        metrics.record(
            "from",
            &format!("to{}", i),
            "rule",
            true,
            Duration::from_millis(1),
        );
    }
    assert!(metrics.path_count() <= MAX_DELEGATION_PATHS);
}

#[test]
fn shared_memory_is_last_write_wins() {
    let memory = SharedMemory::new();
    memory.set("branch", "main", MemoryKind::Fact, "agent-a");
    memory.set("branch", "feature/login", MemoryKind::Fact, "agent-b");

    let entry = memory.get("branch").unwrap();
    assert_eq!(entry.value, "feature/login");
    assert_eq!(entry.source_agent, "agent-b");
    assert_eq!(memory.len(), 1);
}

#[test]
fn shared_memory_renders_context_block() {
    let memory = SharedMemory::new();
    assert!(memory.render_context().is_empty());

    memory.set("api_design", "REST over gRPC", MemoryKind::Decision, "architect");
    memory.set("entry_point", "src/main.rs", MemoryKind::FileState, "explorer");

    let context = memory.render_context();
    assert!(context.contains("Shared knowledge"));
    assert!(context.contains("[decision] api_design = REST over gRPC (from architect)"));
    assert!(context.contains("[file] entry_point = src/main.rs (from explorer)"));
}

#[test]
fn shared_memory_replace_all_restores_a_snapshot() {
    let memory = SharedMemory::new();
    memory.set("a", "1", MemoryKind::Fact, "x");
    let snapshot = memory.entries();

    memory.set("b", "2", MemoryKind::Insight, "y");
    assert_eq!(memory.len(), 2);

    memory.replace_all(snapshot);
    assert_eq!(memory.len(), 1);
    assert!(memory.get("a").is_some());
    assert!(memory.get("b").is_none());
}
