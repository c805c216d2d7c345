//! Scheduling correctness tests.
//!
//! These tests verify that the scheduler respects dependencies, never
//! exceeds its worker bound and isolates failures.

use std::time::Duration;

use tokio::sync::mpsc;

use planex::core::{TaskId, TaskStatus};
use planex::orchestration::{Scheduler, SchedulerEvent, SchedulerReport};

use crate::fixtures::{
    chain, descriptor, diamond, drain_events, fan_out, graph, ids, independent, worker,
    ScriptedSolver, SolverEvent,
};

/// Test: Fan-out with two workers
/// Given A -> {B, C} and max_workers = 2
/// When the scheduler runs
/// Then A runs alone first, then B and C run with A's result
#[tokio::test(start_paused = true)]
async fn test_fan_out_runs_root_first_then_children_in_parallel() {
    let solver = ScriptedSolver::new()
        .default_delay(Duration::from_millis(10))
        .build();
    let mut g = graph(fan_out());
    let mut scheduler = Scheduler::new(worker(solver.clone()), 2);

    let report = scheduler.run(&mut g).await.unwrap();

    assert!(report.is_complete());
    let events = solver.events();
    assert_eq!(events[0], SolverEvent::Started(TaskId::from("A")));
    assert_eq!(events[1], SolverEvent::Finished(TaskId::from("A")));
    assert_eq!(solver.peak(), 2, "B and C should overlap");

    for child in ["B", "C"] {
        let context = solver.context_of(child).unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[&TaskId::from("A")], "result of A");
    }
    assert_eq!(g.count(TaskStatus::Done), 3);
}

/// Test: Worker bound
/// Given 10 independent tasks and max_workers = 3
/// When the scheduler runs
/// Then at most 3 solves are ever in flight, and exactly 3 at peak
#[tokio::test(start_paused = true)]
async fn test_max_workers_never_exceeded() {
    let solver = ScriptedSolver::new()
        .default_delay(Duration::from_millis(20))
        .build();
    let mut g = graph(independent(10));
    let mut scheduler = Scheduler::new(worker(solver.clone()), 3);

    let report = scheduler.run(&mut g).await.unwrap();

    assert_eq!(report.results().len(), 10);
    assert_eq!(solver.peak(), 3);
    assert_eq!(scheduler.peak_running(), 3);
}

/// Test: Single worker serializes everything
/// Given 5 independent tasks and max_workers = 1
/// When the scheduler runs
/// Then tasks are dispatched one at a time in ascending id order
#[tokio::test]
async fn test_single_worker_dispatches_in_id_order() {
    let solver = ScriptedSolver::new().build();
    let mut g = graph(vec![
        descriptor("e", &[]),
        descriptor("c", &[]),
        descriptor("a", &[]),
        descriptor("d", &[]),
        descriptor("b", &[]),
    ]);
    let mut scheduler = Scheduler::new(worker(solver.clone()), 1);

    scheduler.run(&mut g).await.unwrap();

    let order: Vec<String> = solver.started().iter().map(|id| id.to_string()).collect();
    assert_eq!(order, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(solver.peak(), 1);
}

/// Test: Dependencies finish before dependents start
/// Given a diamond with uneven task durations
/// When the scheduler runs
/// Then every task starts only after all its dependencies finished
#[tokio::test(start_paused = true)]
async fn test_dependencies_done_before_running() {
    let solver = ScriptedSolver::new()
        .delay("B", Duration::from_millis(50))
        .delay("C", Duration::from_millis(5))
        .build();
    let descriptors = diamond();
    let mut g = graph(descriptors.clone());
    let mut scheduler = Scheduler::new(worker(solver.clone()), 4);

    scheduler.run(&mut g).await.unwrap();

    let events = solver.events();
    let position = |event: SolverEvent| events.iter().position(|e| *e == event).unwrap();
    for task in &descriptors {
        let started = position(SolverEvent::Started(task.id.clone()));
        for dep in &task.dependencies {
            let finished = position(SolverEvent::Finished(dep.clone()));
            assert!(
                finished < started,
                "{} started before dependency {} finished",
                task.id,
                dep
            );
        }
        let context = solver.context_of(task.id.as_str()).unwrap();
        let keys: Vec<&TaskId> = context.keys().collect();
        let deps: Vec<&TaskId> = task.dependencies.iter().collect();
        assert_eq!(keys, deps);
    }
}

/// Test: Failure isolation
/// Given A fails, B depends on A, C and D (C -> D) are independent of A
/// When the scheduler runs
/// Then C and D complete, B never starts, and the report names A and B
#[tokio::test]
async fn test_failure_blocks_only_downstream_tasks() {
    let solver = ScriptedSolver::new().fail("A", "no data").build();
    let mut g = graph(vec![
        descriptor("A", &[]),
        descriptor("B", &["A"]),
        descriptor("C", &[]),
        descriptor("D", &["C"]),
    ]);
    let mut scheduler = Scheduler::new(worker(solver.clone()), 2);

    let report = scheduler.run(&mut g).await.unwrap();

    match report {
        SchedulerReport::PartialFailure {
            failed,
            blocked,
            results,
        } => {
            assert_eq!(failed, ids(&["A"]));
            assert_eq!(blocked, ids(&["B"]));
            assert_eq!(results.keys().cloned().collect::<Vec<_>>(), vec![
                TaskId::from("C"),
                TaskId::from("D")
            ]);
        }
        other => panic!("Expected PartialFailure, got {:?}", other),
    }
    assert!(!solver.was_called("B"));
    assert_eq!(g.get_task(&TaskId::from("B")).unwrap().status(), TaskStatus::Pending);
    assert_eq!(
        g.get_task(&TaskId::from("A")).unwrap().error(),
        Some("Solver error: no data")
    );
}

/// Test: A failure does not abort a running sibling
/// Given A fails quickly while B is still running
/// When the scheduler runs
/// Then B still completes
#[tokio::test(start_paused = true)]
async fn test_failure_does_not_abort_running_sibling() {
    let solver = ScriptedSolver::new()
        .fail("A", "bad input")
        .delay("A", Duration::from_millis(1))
        .delay("B", Duration::from_millis(100))
        .build();
    let mut g = graph(vec![descriptor("A", &[]), descriptor("B", &[])]);
    let mut scheduler = Scheduler::new(worker(solver.clone()), 2);

    let report = scheduler.run(&mut g).await.unwrap();

    assert_eq!(report.failed(), ids(&["A"]));
    assert_eq!(report.results()[&TaskId::from("B")], "result of B");
}

/// Test: Failures block transitively
/// Given t0 -> t1 -> t2 -> t3 and t1 fails
/// When the scheduler runs
/// Then t2 and t3 are blocked and never dispatched
#[tokio::test]
async fn test_failure_blocks_transitively() {
    let solver = ScriptedSolver::new().fail("t1", "broken").build();
    let mut g = graph(chain(4));
    let mut scheduler = Scheduler::new(worker(solver.clone()), 4);

    let report = scheduler.run(&mut g).await.unwrap();

    match report {
        SchedulerReport::PartialFailure { failed, blocked, .. } => {
            assert_eq!(failed, ids(&["t1"]));
            assert_eq!(blocked, ids(&["t2", "t3"]));
        }
        other => panic!("Expected PartialFailure, got {:?}", other),
    }
    assert_eq!(solver.started().len(), 2);
    assert!(g.is_terminal());
}

/// Test: Panicking solver
/// Given the solver panics for one task
/// When the scheduler runs
/// Then that task fails and the rest of the graph still completes
#[tokio::test]
async fn test_solver_panic_becomes_task_failure() {
    let solver = ScriptedSolver::new().panic("t0").build();
    let mut g = graph(independent(3));
    let mut scheduler = Scheduler::new(worker(solver), 3);

    let report = scheduler.run(&mut g).await.unwrap();

    assert_eq!(report.failed(), ids(&["t0"]));
    assert_eq!(report.results().len(), 2);
    let error = g.get_task(&TaskId::from("t0")).unwrap().error().unwrap();
    assert!(error.contains("panicked"), "unexpected error: {}", error);
}

/// Test: Termination
/// Given a chain of 6 tasks
/// When the scheduler runs
/// Then it applies exactly one outcome per task and stops
#[tokio::test]
async fn test_terminates_after_one_iteration_per_task() {
    let solver = ScriptedSolver::new().build();
    let mut g = graph(chain(6));
    let mut scheduler = Scheduler::new(worker(solver), 3);

    let report = scheduler.run(&mut g).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(scheduler.iterations(), 6);
    assert_eq!(scheduler.peak_running(), 1);
    assert_eq!(report.results()[&TaskId::from("t5")], "result of t5");
}

/// Test: Event stream
/// Given A fails and B depends on A
/// When the scheduler runs with an event channel
/// Then the stream ends with Stalled naming the failed and blocked tasks
#[tokio::test]
async fn test_events_for_partial_failure() {
    let solver = ScriptedSolver::new().fail("A", "oops").build();
    let (tx, mut rx) = mpsc::channel(100);
    let mut g = graph(vec![descriptor("A", &[]), descriptor("B", &["A"])]);
    let mut scheduler = Scheduler::new(worker(solver), 2).with_events(tx);

    scheduler.run(&mut g).await.unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(
        events,
        vec![
            SchedulerEvent::TaskReady {
                task_id: TaskId::from("A")
            },
            SchedulerEvent::TaskStarted {
                task_id: TaskId::from("A")
            },
            SchedulerEvent::TaskFailed {
                task_id: TaskId::from("A"),
                error: "Solver error: oops".to_string()
            },
            SchedulerEvent::Stalled {
                failed: ids(&["A"]),
                blocked: ids(&["B"])
            },
        ]
    );
}

/// Test: Event stream for a clean run
/// Given a diamond
/// When the scheduler runs
/// Then every task gets ready, started and completed events and the stream ends with AllTasksComplete
#[tokio::test]
async fn test_events_for_complete_run() {
    let solver = ScriptedSolver::new().build();
    let (tx, mut rx) = mpsc::channel(100);
    let mut g = graph(diamond());
    let mut scheduler = Scheduler::new(worker(solver), 2).with_events(tx);

    scheduler.run(&mut g).await.unwrap();

    let events = drain_events(&mut rx);
    let count = |pred: fn(&SchedulerEvent) -> bool| events.iter().filter(|e| pred(e)).count();
    assert_eq!(count(|e| matches!(e, SchedulerEvent::TaskReady { .. })), 4);
    assert_eq!(count(|e| matches!(e, SchedulerEvent::TaskStarted { .. })), 4);
    assert_eq!(count(|e| matches!(e, SchedulerEvent::TaskCompleted { .. })), 4);
    assert_eq!(events.last(), Some(&SchedulerEvent::AllTasksComplete));
}
