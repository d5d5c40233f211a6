#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use hive_bus::*;
use hive_core::{TaskExecutionError, TaskMetadata, TaskPriority};
use hive_scheduler::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        dispatch_idle_ms: 100,
        health_check_interval_ms: 1_000,
        heartbeat_interval_ms: 1_000,
        heartbeat_timeout_ms: 5_000,
        ..SchedulerConfig::default()
    }
}

async fn wait_for_stats(
    manager: &ManagerHandle,
    condition: impl FnMut(&ManagerStats) -> bool,
) -> ManagerStats {
    let mut rx = manager.subscribe_stats();
    let stats = tokio::time::timeout(Duration::from_secs(600), rx.wait_for(condition))
        .await
        .expect("timed out waiting for manager stats")
        .expect("manager stopped");
    (*stats).clone()
}

struct Failing;

#[async_trait]
impl TaskHandler for Failing {
    async fn execute(&self, _task: &TaskAssignment) -> Result<Value, TaskExecutionError> {
        Err(TaskExecutionError::Failed("model unavailable".into()))
    }
}

struct Panicking;

#[async_trait]
impl TaskHandler for Panicking {
    async fn execute(&self, _task: &TaskAssignment) -> Result<Value, TaskExecutionError> {
        panic!("corrupt input");
    }
}

// ---------------------------------------------------------------------------
// 1. A task flows from creation to completion through a real worker
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn task_runs_end_to_end() {
    let mut system = HiveSystem::new(fast_config()).unwrap();
    let manager = system.create_manager("m1").unwrap();
    let worker = system
        .create_worker("w1", "text", vec!["text_processing".into()], "m1")
        .await
        .unwrap();

    let spec = TaskSpec::new(
        "Summarise",
        "Summarise the quarterly report",
        "text_processing",
        TaskPriority::High,
    )
    .with_estimated_duration(2.0);
    let task_id = manager.create_task(spec).await.unwrap();

    let stats = wait_for_stats(&manager, |s| s.completed_tasks == 1).await;
    assert_eq!(stats.queue_size, 0);
    assert_eq!(stats.active_tasks, 0);
    assert_eq!(stats.success_rate, 1.0);

    let task = manager.get_task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_ref().unwrap()["type"], "text_processing");
    assert!(task.started_at.is_some());
    assert!(task.actual_duration.unwrap() >= 2.0);

    let worker_stats = worker.stats();
    assert_eq!(worker_stats.tasks_completed, 1);
    assert!(worker_stats.is_available);
    let history = worker.history().await;
    assert_eq!(history.len(), 1);
    assert!(history[0].success);

    let system_stats = system.get_system_stats();
    assert_eq!(system_stats.total_managers, 1);
    assert_eq!(system_stats.total_workers, 1);
    assert_eq!(system_stats.completed_tasks, 1);

    system.shutdown().await;
    assert!(!manager.is_running());
    assert!(!worker.is_running());
}

// ---------------------------------------------------------------------------
// 2. Dependencies run strictly after the task they depend on
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dependent_task_starts_after_dependency_completes() {
    let mut system = HiveSystem::new(fast_config()).unwrap();
    let manager = system.create_manager("m1").unwrap();
    for id in ["w1", "w2"] {
        system
            .create_worker(id, "analyst", vec!["data_analysis".into()], "m1")
            .await
            .unwrap();
    }

    let load = manager
        .create_task(
            TaskSpec::new("Load", "", "data_analysis", TaskPriority::Low)
                .with_estimated_duration(3.0),
        )
        .await
        .unwrap();
    let report = manager
        .create_task(
            TaskSpec::new("Report", "", "data_analysis", TaskPriority::Critical)
                .with_dependencies(vec![load])
                .with_estimated_duration(1.0),
        )
        .await
        .unwrap();

    wait_for_stats(&manager, |s| s.completed_tasks == 2).await;
    let load = manager.get_task(load).await.unwrap();
    let report = manager.get_task(report).await.unwrap();
    assert!(report.started_at.unwrap() >= load.completed_at.unwrap());

    system.shutdown().await;
}

// ---------------------------------------------------------------------------
// 3. A silent worker is removed and its task re-queued
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_requeues_in_flight_task() {
    let clock = ManualClock::default();
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(64));
    let manager = Manager::spawn("m1", fast_config(), bus.clone(), Arc::new(clock.clone()));

    assert!(
        manager
            .register_worker("W1", "text", vec!["text_processing".into()], 1)
            .await
    );
    let t1 = manager
        .create_task(TaskSpec::new("T1", "", "text_processing", TaskPriority::Normal))
        .await
        .unwrap();
    let task = manager.get_task(t1).await.unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assigned_worker.as_deref(), Some("W1"));

    bus.publish(
        Event::new(
            "W1",
            EventPayload::TaskStarted {
                task_id: t1,
                worker_id: "W1".into(),
            },
        )
        .to("m1"),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        manager.get_task(t1).await.unwrap().status,
        TaskStatus::InProgress
    );

    clock.advance(chrono::Duration::seconds(10));
    let stats = wait_for_stats(&manager, |s| s.total_workers == 0).await;
    assert_eq!(stats.queue_size, 1);
    assert_eq!(stats.tasks_reassigned, 1);

    let task = manager.get_task(t1).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.assigned_worker.is_none());
    assert!(!manager.unregister_worker("W1").await);

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// 4. Handler errors and panics become task failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn handler_errors_and_panics_fail_the_task() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("flaky", Arc::new(Failing));
    handlers.register("fragile", Arc::new(Panicking));
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(256));
    let mut system =
        HiveSystem::with_parts(fast_config(), bus, Arc::new(SystemClock), handlers).unwrap();
    let manager = system.create_manager("m1").unwrap();
    let worker = system
        .create_worker("w1", "llm", vec!["flaky".into(), "fragile".into()], "m1")
        .await
        .unwrap();

    let flaky = manager
        .create_task(TaskSpec::new("Ask", "", "flaky", TaskPriority::Normal).retryable(false))
        .await
        .unwrap();
    let fragile = manager
        .create_task(TaskSpec::new("Parse", "", "fragile", TaskPriority::Normal).retryable(false))
        .await
        .unwrap();

    let stats = wait_for_stats(&manager, |s| s.failed_tasks == 2).await;
    assert_eq!(stats.completed_tasks, 0);
    assert_eq!(stats.success_rate, 0.0);

    let flaky = manager.get_task(flaky).await.unwrap();
    assert_eq!(flaky.status, TaskStatus::Failed);
    assert_eq!(
        flaky.error.as_deref(),
        Some("task execution failed: model unavailable")
    );
    let fragile = manager.get_task(fragile).await.unwrap();
    assert_eq!(
        fragile.error.as_deref(),
        Some("task handler panicked: corrupt input")
    );

    // The worker survived the panic.
    assert!(worker.is_running());
    assert_eq!(worker.stats().tasks_failed, 2);

    system.shutdown().await;
}

// ---------------------------------------------------------------------------
// 5. A busy worker rejects a second assignment
// ---------------------------------------------------------------------------

fn assignment_event(task_id: Uuid, estimate: f64) -> Event {
    Event::new(
        "m1",
        EventPayload::TaskAssignment(TaskAssignment {
            task_id,
            title: "Resize".into(),
            description: String::new(),
            task_type: "image_processing".into(),
            priority: TaskPriority::Normal,
            estimated_duration: Some(estimate),
            dependencies: vec![],
            metadata: TaskMetadata::new(),
        }),
    )
    .to("w1")
    .with_correlation(task_id)
}

#[tokio::test(start_paused = true)]
async fn busy_worker_rejects_and_reports_lifecycle() {
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(64));
    let mut to_manager = bus.subscribe(
        SubscriptionFilter::topics([
            EventType::TaskStarted,
            EventType::TaskCompleted,
            EventType::TaskRejected,
            EventType::WorkerBusy,
            EventType::WorkerAvailable,
        ])
        .addressed_to("m1"),
    );
    let worker = Worker::initialize(
        WorkerIdentity {
            worker_id: "w1".into(),
            agent_type: "vision".into(),
            capabilities: vec!["image_processing".into()],
            manager_id: "m1".into(),
        },
        &fast_config(),
        bus.clone(),
        HandlerRegistry::with_builtins(),
    );

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    bus.publish(assignment_event(first, 5.0)).await.unwrap();
    bus.publish(assignment_event(second, 5.0)).await.unwrap();

    let mut seen = Vec::new();
    while seen.len() < 5 {
        let event = to_manager.recv().await.unwrap();
        assert_eq!(event.source, "w1");
        seen.push(event.payload);
    }

    assert!(matches!(seen[0], EventPayload::TaskStarted { task_id, .. } if task_id == first));
    assert!(matches!(seen[1], EventPayload::WorkerBusy { .. }));
    assert!(matches!(seen[2], EventPayload::TaskRejected { task_id, .. } if task_id == second));
    match &seen[3] {
        EventPayload::TaskCompleted {
            task_id, result, ..
        } => {
            assert_eq!(*task_id, first);
            assert_eq!(result["resolution"], json!("1920x1080"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(seen[4], EventPayload::WorkerAvailable { .. }));

    worker.shutdown().await;
}

// ---------------------------------------------------------------------------
// 6. Workers heartbeat on their interval
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn worker_sends_heartbeats() {
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(64));
    let mut beats =
        bus.subscribe(SubscriptionFilter::topics([EventType::WorkerHeartbeat]).addressed_to("m1"));
    let worker = Worker::initialize(
        WorkerIdentity {
            worker_id: "w1".into(),
            agent_type: "text".into(),
            capabilities: vec!["text_processing".into()],
            manager_id: "m1".into(),
        },
        &fast_config(),
        bus.clone(),
        HandlerRegistry::with_builtins(),
    );

    let start = tokio::time::Instant::now();
    for _ in 0..3 {
        let event = beats.recv().await.unwrap();
        match event.payload {
            EventPayload::WorkerHeartbeat(beat) => {
                assert_eq!(beat.worker_id, "w1");
                assert_eq!(beat.current_load, 0);
                assert!(beat.is_available);
                assert_eq!(beat.capabilities, vec!["text_processing".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    // First beat is immediate, then one per interval.
    assert!(start.elapsed() >= Duration::from_secs(2));

    worker.shutdown().await;
}

// ---------------------------------------------------------------------------
// 7. Handle surface reports rejections as false / None
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn manager_handle_rejections() {
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(64));
    let manager = Manager::spawn("m1", fast_config(), bus.clone(), Arc::new(SystemClock));

    assert!(manager.register_worker("w1", "text", vec!["text_processing".into()], 2).await);
    assert!(!manager.register_worker("w1", "text", vec![], 2).await);
    assert!(!manager.register_worker("w2", "text", vec![], 0).await);
    assert!(!manager.unregister_worker("ghost").await);
    assert!(manager
        .create_task(TaskSpec::new("", "", "text_processing", TaskPriority::Low))
        .await
        .is_none());

    // Busy worker: tasks queue up instead of being assigned.
    bus.publish(
        Event::new(
            "w1",
            EventPayload::WorkerBusy {
                worker_id: "w1".into(),
            },
        )
        .to("m1"),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.get_manager_stats().available_workers, 0);
    let a = manager
        .create_task(TaskSpec::new("A", "", "text_processing", TaskPriority::High))
        .await
        .unwrap();
    assert_eq!(manager.queued_task_ids().await, vec![a]);
    assert!(manager.assign_task(a, "w1").await);
    assert!(!manager.assign_task(a, "w1").await);
    assert!(manager.cancel_task(a).await);
    assert!(!manager.cancel_task(a).await);

    let stats = manager.get_manager_stats();
    assert_eq!(stats.cancelled_tasks, 1);
    assert_eq!(stats.workers[0].current_load, 0);

    manager.shutdown().await;
    assert!(!manager.register_worker("w3", "text", vec![], 1).await);
    assert_eq!(manager.get_manager_stats().total_workers, 1);
}

// ---------------------------------------------------------------------------
// 8. Coordinator validation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn system_rejects_unknown_and_duplicate_ids() {
    let mut system = HiveSystem::new(fast_config()).unwrap();
    system.create_manager("m1").unwrap();
    assert!(system.create_manager("m1").is_err());

    let err = system
        .create_worker("w1", "text", vec![], "nowhere")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, hive_core::HiveError::UnknownManager(_)));

    system.create_worker("w1", "text", vec![], "m1").await.unwrap();
    assert!(system.create_worker("w1", "text", vec![], "m1").await.is_err());
    assert!(system.worker("w1").is_some());
    assert!(system.manager("m2").is_none());

    system.shutdown().await;
}

#[test]
fn invalid_config_is_rejected() {
    let config = SchedulerConfig {
        heartbeat_interval_ms: 10_000,
        heartbeat_timeout_ms: 1_000,
        ..SchedulerConfig::default()
    };
    assert!(HiveSystem::new(config).is_err());
}

// ---------------------------------------------------------------------------
// 9. An outcome lost to bus overflow is reclaimed through heartbeats
// ---------------------------------------------------------------------------

fn idle_heartbeat(worker_id: &str) -> Event {
    Event::new(
        worker_id,
        EventPayload::WorkerHeartbeat(Heartbeat {
            worker_id: worker_id.into(),
            agent_type: "text".into(),
            capabilities: vec!["text_processing".into()],
            current_load: 0,
            is_available: true,
            performance_metrics: hive_core::PerformanceMetrics::default(),
            timestamp: chrono::Utc::now(),
        }),
    )
    .to("m1")
}

#[tokio::test(start_paused = true)]
async fn lost_completion_is_reclaimed_from_idle_heartbeats() {
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(4));
    let manager = Manager::spawn("m1", fast_config(), bus.clone(), Arc::new(SystemClock));
    assert!(
        manager
            .register_worker("W1", "text", vec!["text_processing".into()], 1)
            .await
    );
    let t1 = manager
        .create_task(TaskSpec::new("T1", "", "text_processing", TaskPriority::Normal))
        .await
        .unwrap();
    assert_eq!(manager.get_task(t1).await.unwrap().status, TaskStatus::Assigned);

    // Publishing without yielding overflows the manager's subscription, so
    // the completion is overwritten before the manager reads it.
    bus.publish(
        Event::new(
            "W1",
            EventPayload::TaskCompleted {
                task_id: t1,
                worker_id: "W1".into(),
                result: json!({"ok": true}),
                duration: 0.1,
            },
        )
        .to("m1"),
    )
    .await
    .unwrap();
    for _ in 0..8 {
        bus.publish(
            Event::new(
                "ghost",
                EventPayload::WorkerBusy {
                    worker_id: "ghost".into(),
                },
            )
            .to("m1"),
        )
        .await
        .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    let stats = manager.get_manager_stats();
    assert_eq!(stats.completed_tasks, 0);
    assert_eq!(stats.workers[0].current_load, 1);

    for _ in 0..2 {
        bus.publish(idle_heartbeat("W1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stats = wait_for_stats(&manager, |s| s.tasks_reassigned == 1).await;
    assert_eq!(stats.total_workers, 1);
    // Reclaimed and dispatched again to the only capable worker.
    let task = manager.get_task(t1).await.unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assigned_worker.as_deref(), Some("W1"));
    assert_eq!(task.attempts, 2);

    manager.shutdown().await;
}
