//! End-to-end executor tests.
//!
//! These tests run whole queries through planning, scheduling and
//! consolidation with fake capabilities and check the final answer or the
//! structured run error.

use std::time::Duration;

use tokio::sync::mpsc;

use planex::core::{TaskId, TaskStatus};
use planex::orchestration::{ExecutorConfig, FailurePolicy, SchedulerEvent};
use planex::{AnswerStatus, CapabilityError, Error, RunPhase};

use crate::fixtures::{
    descriptor, diamond, drain_events, executor, ids, independent, RecordingSynthesizer,
    ScriptedPlanner, ScriptedSolver,
};

fn require_all() -> ExecutorConfig {
    ExecutorConfig {
        failure_policy: FailurePolicy::RequireAll,
        ..ExecutorConfig::default()
    }
}

/// Test: Single-task run
/// Given a plan with one task
/// When the query runs
/// Then the answer comes from the synthesizer and the status is success
#[tokio::test]
async fn test_single_task_run() {
    let planner = ScriptedPlanner::new(vec![descriptor("task-001", &[])]);
    let solver = ScriptedSolver::new().build();
    let synthesizer = RecordingSynthesizer::new();
    let exec = executor(
        planner.clone(),
        solver,
        synthesizer.clone(),
        ExecutorConfig::default(),
    );

    let answer = exec.run_query("what is rust?", 1).await.unwrap();

    assert_eq!(answer.status, AnswerStatus::Success);
    assert_eq!(answer.answer, "answer to what is rust?: result of task-001");
    assert!(answer.caveat.is_none());
    assert!(answer.failed_tasks.is_empty());
    assert_eq!(answer.task_results.len(), 1);
    assert_eq!(planner.calls(), 1);

    let calls = synthesizer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "what is rust?");
}

/// Test: Diamond run
/// Given A -> {B, C} -> D
/// When the query runs
/// Then all four results reach the synthesizer in id order
#[tokio::test]
async fn test_diamond_run_consolidates_every_result() {
    let synthesizer = RecordingSynthesizer::new();
    let exec = executor(
        ScriptedPlanner::new(diamond()),
        ScriptedSolver::new().build(),
        synthesizer.clone(),
        ExecutorConfig::default(),
    );

    let answer = exec.run("q").await.unwrap();

    assert_eq!(
        answer.answer,
        "answer to q: result of A | result of B | result of C | result of D"
    );
    let (_, results) = &synthesizer.calls()[0];
    assert_eq!(results.len(), 4);
}

/// Test: Partial failure under best effort
/// Given A fails, B is independent and C depends on A
/// When the query runs with the default policy
/// Then the answer is partial, names A and C, and only B reaches the synthesizer
#[tokio::test]
async fn test_partial_failure_best_effort() {
    let planner = ScriptedPlanner::new(vec![
        descriptor("A", &[]),
        descriptor("B", &[]),
        descriptor("C", &["A"]),
    ]);
    let solver = ScriptedSolver::new().fail("A", "source offline").build();
    let synthesizer = RecordingSynthesizer::new();
    let exec = executor(planner, solver, synthesizer.clone(), ExecutorConfig::default());

    let answer = exec.run_query("q", 2).await.unwrap();

    assert_eq!(answer.status, AnswerStatus::Partial);
    assert!(answer.is_partial());
    assert_eq!(answer.failed_tasks, ids(&["A"]));
    let caveat = answer.caveat.as_deref().unwrap();
    assert!(caveat.contains("failed tasks: A"), "caveat: {}", caveat);
    assert!(caveat.contains("skipped tasks: C"), "caveat: {}", caveat);

    let (_, results) = &synthesizer.calls()[0];
    assert_eq!(results.keys().cloned().collect::<Vec<_>>(), vec![TaskId::from("B")]);
}

/// Test: Partial failure under require-all
/// Given A fails and B depends on A while C succeeds
/// When the query runs with the require-all policy
/// Then the run fails in Scheduling with a snapshot and no synthesis
#[tokio::test]
async fn test_partial_failure_require_all() {
    let planner = ScriptedPlanner::new(vec![
        descriptor("A", &[]),
        descriptor("B", &["A"]),
        descriptor("C", &[]),
    ]);
    let solver = ScriptedSolver::new().fail("A", "nope").build();
    let synthesizer = RecordingSynthesizer::new();
    let exec = executor(planner, solver, synthesizer.clone(), require_all());

    let err = exec.run_query("q", 2).await.unwrap_err();

    assert_eq!(err.phase, RunPhase::Scheduling);
    assert!(matches!(err.source, Error::PartialFailure { ref failed } if *failed == ids(&["A"])));
    let snapshot = err.snapshot.as_ref().unwrap();
    assert_eq!(snapshot.status_of(&TaskId::from("A")), Some(TaskStatus::Failed));
    assert_eq!(snapshot.status_of(&TaskId::from("B")), Some(TaskStatus::Pending));
    assert_eq!(snapshot.status_of(&TaskId::from("C")), Some(TaskStatus::Done));
    assert_eq!(err.failed_tasks(), ids(&["A"]));
    assert!(synthesizer.calls().is_empty());
}

/// Test: Every task failed
/// Given two independent tasks that both fail
/// When the query runs
/// Then the run fails in Scheduling without consolidation
#[tokio::test]
async fn test_all_tasks_failed() {
    let planner = ScriptedPlanner::new(vec![descriptor("A", &[]), descriptor("B", &[])]);
    let solver = ScriptedSolver::new()
        .fail("A", "x")
        .fail("B", "y")
        .build();
    let synthesizer = RecordingSynthesizer::new();
    let exec = executor(planner, solver, synthesizer.clone(), ExecutorConfig::default());

    let err = exec.run_query("q", 2).await.unwrap_err();

    assert_eq!(err.phase, RunPhase::Scheduling);
    assert!(matches!(err.source, Error::AllTasksFailed { ref failed } if *failed == ids(&["A", "B"])));
    assert!(synthesizer.calls().is_empty());
}

/// Test: Failed root with a skipped dependent under best effort
/// Given A fails and B depends on A
/// When the query runs with the default policy
/// Then the synthesizer is still called once, with no results, and the
/// answer is partial naming A as failed and B as skipped
#[tokio::test]
async fn test_failed_root_best_effort_consolidates_empty_results() {
    let planner = ScriptedPlanner::new(vec![descriptor("A", &[]), descriptor("B", &["A"])]);
    let solver = ScriptedSolver::new().fail("A", "source offline").build();
    let synthesizer = RecordingSynthesizer::new();
    let exec = executor(
        planner,
        solver.clone(),
        synthesizer.clone(),
        ExecutorConfig::default(),
    );

    let answer = exec.run_query("q", 2).await.unwrap();

    assert_eq!(answer.status, AnswerStatus::Partial);
    assert_eq!(answer.failed_tasks, ids(&["A"]));
    assert!(answer.task_results.is_empty());
    assert_eq!(
        answer.caveat.as_deref(),
        Some("Partial answer: failed tasks: A; skipped tasks: B.")
    );
    assert!(!solver.was_called("B"));

    let calls = synthesizer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "q");
    assert!(calls[0].1.is_empty());
}

/// Test: Failed root with a skipped dependent under require-all
/// Given A fails and B depends on A
/// When the query runs with the require-all policy
/// Then the run fails in Scheduling with PartialFailure({A}) and no synthesis
#[tokio::test]
async fn test_failed_root_require_all_fails_run() {
    let planner = ScriptedPlanner::new(vec![descriptor("A", &[]), descriptor("B", &["A"])]);
    let solver = ScriptedSolver::new().fail("A", "source offline").build();
    let synthesizer = RecordingSynthesizer::new();
    let exec = executor(planner, solver, synthesizer.clone(), require_all());

    let err = exec.run_query("q", 2).await.unwrap_err();

    assert_eq!(err.phase, RunPhase::Scheduling);
    assert!(matches!(err.source, Error::PartialFailure { ref failed } if *failed == ids(&["A"])));
    let snapshot = err.snapshot.as_ref().unwrap();
    assert_eq!(snapshot.status_of(&TaskId::from("A")), Some(TaskStatus::Failed));
    assert_eq!(snapshot.status_of(&TaskId::from("B")), Some(TaskStatus::Pending));
    assert!(synthesizer.calls().is_empty());
}

/// Test: Malformed plan
/// Given a plan with a cycle
/// When the query runs
/// Then the run fails in Planning, no task is solved and no snapshot exists
#[tokio::test]
async fn test_cyclic_plan_fails_in_planning() {
    let planner = ScriptedPlanner::new(vec![
        descriptor("A", &["B"]),
        descriptor("B", &["A"]),
    ]);
    let solver = ScriptedSolver::new().build();
    let exec = executor(
        planner,
        solver.clone(),
        RecordingSynthesizer::new(),
        ExecutorConfig::default(),
    );

    let err = exec.run_query("q", 2).await.unwrap_err();

    assert_eq!(err.phase, RunPhase::Planning);
    assert!(matches!(err.source, Error::MalformedGraph(_)));
    assert!(err.snapshot.is_none());
    assert!(solver.started().is_empty());
}

/// Test: Unknown dependency
/// Given a task that depends on an id not in the plan
/// When the query runs
/// Then the run fails in Planning with MalformedGraph
#[tokio::test]
async fn test_unknown_dependency_fails_in_planning() {
    let planner = ScriptedPlanner::new(vec![descriptor("A", &["ghost"])]);
    let exec = executor(
        planner,
        ScriptedSolver::new().build(),
        RecordingSynthesizer::new(),
        ExecutorConfig::default(),
    );

    let err = exec.run_query("q", 2).await.unwrap_err();

    assert_eq!(err.phase, RunPhase::Planning);
    assert!(matches!(err.source, Error::MalformedGraph(ref m) if m.contains("ghost")));
}

/// Test: Duplicate ids
#[tokio::test]
async fn test_duplicate_ids_fail_in_planning() {
    let planner = ScriptedPlanner::new(vec![descriptor("A", &[]), descriptor("A", &[])]);
    let exec = executor(
        planner,
        ScriptedSolver::new().build(),
        RecordingSynthesizer::new(),
        ExecutorConfig::default(),
    );

    let err = exec.run_query("q", 2).await.unwrap_err();
    assert!(matches!(err.source, Error::MalformedGraph(_)));
}

/// Test: Empty plan
#[tokio::test]
async fn test_empty_plan_fails_in_planning() {
    let exec = executor(
        ScriptedPlanner::new(vec![]),
        ScriptedSolver::new().build(),
        RecordingSynthesizer::new(),
        ExecutorConfig::default(),
    );

    let err = exec.run_query("q", 2).await.unwrap_err();

    assert_eq!(err.phase, RunPhase::Planning);
    assert!(matches!(err.source, Error::EmptyPlan));
}

/// Test: Planner error
#[tokio::test]
async fn test_planner_error_fails_in_planning() {
    let exec = executor(
        ScriptedPlanner::failing("rate limited"),
        ScriptedSolver::new().build(),
        RecordingSynthesizer::new(),
        ExecutorConfig::default(),
    );

    let err = exec.run_query("q", 2).await.unwrap_err();

    assert_eq!(err.phase, RunPhase::Planning);
    assert!(matches!(
        err.source,
        Error::Capability(CapabilityError::Planning(ref m)) if m == "rate limited"
    ));
}

/// Test: Consolidation failure
/// Given every task succeeds but the synthesizer errors
/// When the query runs
/// Then the run fails in Consolidating with every task Done in the snapshot
#[tokio::test]
async fn test_consolidation_failure() {
    let exec = executor(
        ScriptedPlanner::new(independent(2)),
        ScriptedSolver::new().build(),
        RecordingSynthesizer::responding(Err(CapabilityError::Synthesis(
            "context window exceeded".to_string(),
        ))),
        ExecutorConfig::default(),
    );

    let err = exec.run_query("q", 2).await.unwrap_err();

    assert_eq!(err.phase, RunPhase::Consolidating);
    assert!(matches!(err.source, Error::ConsolidationFailed(ref m) if m.contains("context window")));
    let snapshot = err.snapshot.unwrap();
    assert!(snapshot.tasks.iter().all(|t| t.status() == TaskStatus::Done));
}

/// Test: Empty synthesis
#[tokio::test]
async fn test_empty_synthesis_is_consolidation_failure() {
    let exec = executor(
        ScriptedPlanner::new(independent(1)),
        ScriptedSolver::new().build(),
        RecordingSynthesizer::responding(Ok("   ".to_string())),
        ExecutorConfig::default(),
    );

    let err = exec.run_query("q", 1).await.unwrap_err();
    assert!(matches!(err.source, Error::ConsolidationFailed(_)));
}

/// Test: Worker bound through the executor
/// Given 6 independent tasks
/// When the query runs with max_workers = 2
/// Then no more than 2 solves overlap
#[tokio::test(start_paused = true)]
async fn test_run_query_respects_max_workers() {
    let solver = ScriptedSolver::new()
        .default_delay(Duration::from_millis(10))
        .build();
    let exec = executor(
        ScriptedPlanner::new(independent(6)),
        solver.clone(),
        RecordingSynthesizer::new(),
        ExecutorConfig::default(),
    );

    let answer = exec.run_query("q", 2).await.unwrap();

    assert_eq!(answer.task_results.len(), 6);
    assert_eq!(solver.peak(), 2);
}

/// Test: Zero workers
#[tokio::test]
async fn test_zero_workers_is_rejected() {
    let exec = executor(
        ScriptedPlanner::new(independent(1)),
        ScriptedSolver::new().build(),
        RecordingSynthesizer::new(),
        ExecutorConfig::default(),
    );

    let err = exec.run_query("q", 0).await.unwrap_err();

    assert_eq!(err.phase, RunPhase::Scheduling);
    assert!(matches!(err.source, Error::Validation(_)));
}

/// Test: Scheduler events are forwarded
#[tokio::test]
async fn test_executor_forwards_scheduler_events() {
    let (tx, mut rx) = mpsc::channel(100);
    let exec = executor(
        ScriptedPlanner::new(independent(2)),
        ScriptedSolver::new().build(),
        RecordingSynthesizer::new(),
        ExecutorConfig::default(),
    )
    .with_events(tx);

    exec.run("q").await.unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(events.last(), Some(&SchedulerEvent::AllTasksComplete));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SchedulerEvent::TaskCompleted { .. }))
            .count(),
        2
    );
}

/// Test: Run error report serializes
#[tokio::test]
async fn test_run_error_report_is_json() {
    let exec = executor(
        ScriptedPlanner::new(vec![descriptor("A", &[])]),
        ScriptedSolver::new().fail("A", "nope").build(),
        RecordingSynthesizer::new(),
        ExecutorConfig::default(),
    );

    let err = exec.run_query("q", 1).await.unwrap_err();
    let json = serde_json::to_value(err.report()).unwrap();

    assert_eq!(json["phase"], "scheduling");
    assert!(json["error"].as_str().unwrap().contains("Every task failed"));
    assert_eq!(json["snapshot"]["tasks"][0]["status"], "failed");
}
