//! Worker actor.
//!
//! A worker executes at most one task at a time. It receives assignments
//! addressed to it on the event bus, runs them through its
//! [`HandlerRegistry`], and reports every transition back to its manager.

use crate::config::SchedulerConfig;
use crate::handler::HandlerRegistry;
use crate::stats::WorkerStats;
use chrono::{DateTime, Utc};
use hive_bus::{
    Event, EventBus, EventPayload, EventPriority, EventType, Heartbeat, Subscription,
    SubscriptionFilter, TaskAssignment,
};
use hive_core::{PerformanceMetrics, TaskExecutionError, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcomes kept in a worker's history.
pub const HISTORY_LIMIT: usize = 100;

/// Identity of a worker and the manager it reports to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub worker_id: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub manager_id: String,
}

/// One finished task in a worker's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub task_type: String,
    pub success: bool,
    /// Seconds.
    pub duration: f64,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

enum WorkerCommand {
    History {
        reply: oneshot::Sender<Vec<TaskOutcome>>,
    },
    Shutdown,
}

struct Finished {
    task_id: TaskId,
    result: Result<serde_json::Value, TaskExecutionError>,
    duration: f64,
}

struct Running {
    assignment: TaskAssignment,
    correlation_id: uuid::Uuid,
    execution: JoinHandle<()>,
    handler: AbortHandle,
}

/// Spawns worker actors.
pub struct Worker;

impl Worker {
    /// Subscribe to assignments addressed to this worker, then start its
    /// event loop and heartbeat.
    pub fn initialize(
        identity: WorkerIdentity,
        config: &SchedulerConfig,
        bus: Arc<dyn EventBus>,
        handlers: HandlerRegistry,
    ) -> WorkerHandle {
        let assignments = bus.subscribe(
            SubscriptionFilter::topics([EventType::TaskAssignment])
                .addressed_to(&identity.worker_id),
        );
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (finished_tx, finished_rx) = mpsc::channel(1);
        let metrics = PerformanceMetrics::default();
        let (stats_tx, stats_rx) = watch::channel(snapshot(&identity, None, &metrics));
        let worker_id = identity.worker_id.clone();

        let actor = WorkerActor {
            identity,
            bus,
            handlers: Arc::new(handlers),
            assignments,
            commands: command_rx,
            finished_tx,
            finished_rx,
            heartbeat_interval: config.heartbeat_interval(),
            running: None,
            metrics,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            stats: stats_tx,
        };
        tokio::spawn(actor.run());

        WorkerHandle {
            worker_id,
            commands: command_tx,
            stats: stats_rx,
        }
    }
}

struct WorkerActor {
    identity: WorkerIdentity,
    bus: Arc<dyn EventBus>,
    handlers: Arc<HandlerRegistry>,
    assignments: Subscription,
    commands: mpsc::Receiver<WorkerCommand>,
    finished_tx: mpsc::Sender<Finished>,
    finished_rx: mpsc::Receiver<Finished>,
    heartbeat_interval: Duration,
    running: Option<Running>,
    metrics: PerformanceMetrics,
    history: VecDeque<TaskOutcome>,
    stats: watch::Sender<WorkerStats>,
}

impl WorkerActor {
    async fn run(mut self) {
        let worker_id = self.identity.worker_id.clone();
        info!(
            worker_id = %worker_id,
            manager_id = %self.identity.manager_id,
            capabilities = ?self.identity.capabilities,
            "Worker started"
        );

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut bus_open = true;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(WorkerCommand::History { reply }) => {
                        let _ = reply.send(self.history.iter().cloned().collect());
                    }
                    Some(WorkerCommand::Shutdown) | None => break,
                },
                Some(finished) = self.finished_rx.recv() => self.on_finished(finished).await,
                event = self.assignments.recv(), if bus_open => match event {
                    Ok(event) => self.on_event(event).await,
                    Err(e) => {
                        error!(worker_id = %worker_id, error = %e, "Assignment subscription ended");
                        bus_open = false;
                    }
                },
                _ = heartbeat.tick() => self.send_heartbeat().await,
            }
        }

        if let Some(running) = self.running.take() {
            running.handler.abort();
            running.execution.abort();
            warn!(
                worker_id = %worker_id,
                task_id = %running.assignment.task_id,
                "Worker stopped with a task in progress"
            );
        }
        info!(worker_id = %worker_id, "Worker stopped");
    }

    async fn on_event(&mut self, event: Event) {
        let correlation_id = event.correlation_id;
        let EventPayload::TaskAssignment(assignment) = event.payload else {
            return;
        };
        let task_id = assignment.task_id;

        if let Some(current) = &self.running {
            warn!(
                worker_id = %self.identity.worker_id,
                task_id = %task_id,
                current_task = %current.assignment.task_id,
                "Already executing a task, rejecting assignment"
            );
            let reason = format!(
                "worker {} is busy with task {}",
                self.identity.worker_id, current.assignment.task_id
            );
            self.publish(
                EventPayload::TaskRejected {
                    task_id,
                    worker_id: self.identity.worker_id.clone(),
                    reason,
                },
                correlation_id,
                EventPriority::High,
            )
            .await;
            return;
        }

        info!(
            worker_id = %self.identity.worker_id,
            task_id = %task_id,
            task_type = %assignment.task_type,
            "Received task"
        );
        let (execution, handler) = self.spawn_execution(assignment.clone());
        self.running = Some(Running {
            assignment,
            correlation_id,
            execution,
            handler,
        });
        self.publish_stats();

        let worker_id = self.identity.worker_id.clone();
        self.publish(
            EventPayload::TaskStarted {
                task_id,
                worker_id: worker_id.clone(),
            },
            correlation_id,
            EventPriority::Normal,
        )
        .await;
        self.publish(
            EventPayload::WorkerBusy { worker_id },
            correlation_id,
            EventPriority::Normal,
        )
        .await;
    }

    /// Run the handler on its own task so a panic surfaces as a `JoinError`
    /// instead of taking the worker down.
    fn spawn_execution(&self, assignment: TaskAssignment) -> (JoinHandle<()>, AbortHandle) {
        let handlers = self.handlers.clone();
        let finished = self.finished_tx.clone();
        let task_id = assignment.task_id;
        let started = Instant::now();
        let handler = tokio::spawn(async move { handlers.execute(&assignment).await });
        let abort = handler.abort_handle();
        let execution = tokio::spawn(async move {
            let result = match handler.await {
                Ok(result) => result,
                Err(e) => Err(TaskExecutionError::Panicked(panic_message(e))),
            };
            let duration = started.elapsed().as_secs_f64();
            let _ = finished
                .send(Finished {
                    task_id,
                    result,
                    duration,
                })
                .await;
        });
        (execution, abort)
    }

    async fn on_finished(&mut self, finished: Finished) {
        let Some(running) = self.running.take() else {
            return;
        };
        if running.assignment.task_id != finished.task_id {
            debug!(task_id = %finished.task_id, "Result for a task no longer running");
            self.running = Some(running);
            return;
        }

        let worker_id = self.identity.worker_id.clone();
        let task_id = finished.task_id;
        let duration = finished.duration;
        let (payload, error) = match finished.result {
            Ok(result) => {
                self.metrics.record_success(duration);
                info!(worker_id = %worker_id, task_id = %task_id, duration, "Task completed");
                (
                    EventPayload::TaskCompleted {
                        task_id,
                        worker_id: worker_id.clone(),
                        result,
                        duration,
                    },
                    None,
                )
            }
            Err(e) => {
                self.metrics.record_failure();
                error!(worker_id = %worker_id, task_id = %task_id, error = %e, "Task failed");
                (
                    EventPayload::TaskFailed {
                        task_id,
                        worker_id: worker_id.clone(),
                        error: e.to_string(),
                        duration,
                    },
                    Some(e.to_string()),
                )
            }
        };

        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(TaskOutcome {
            task_id,
            task_type: running.assignment.task_type.clone(),
            success: error.is_none(),
            duration,
            error,
            finished_at: Utc::now(),
        });
        self.publish_stats();

        self.publish(payload, running.correlation_id, EventPriority::High)
            .await;
        self.publish(
            EventPayload::WorkerAvailable { worker_id },
            running.correlation_id,
            EventPriority::Normal,
        )
        .await;
    }

    async fn send_heartbeat(&mut self) {
        let heartbeat = Heartbeat {
            worker_id: self.identity.worker_id.clone(),
            agent_type: self.identity.agent_type.clone(),
            capabilities: self.identity.capabilities.clone(),
            current_load: usize::from(self.running.is_some()),
            is_available: self.running.is_none(),
            performance_metrics: self.metrics.clone(),
            timestamp: Utc::now(),
        };
        self.publish(
            EventPayload::WorkerHeartbeat(heartbeat),
            uuid::Uuid::new_v4(),
            EventPriority::Low,
        )
        .await;
    }

    async fn publish(&self, payload: EventPayload, correlation_id: uuid::Uuid, priority: EventPriority) {
        let topic = payload.event_type();
        let event = Event::new(self.identity.worker_id.as_str(), payload)
            .to(self.identity.manager_id.as_str())
            .with_priority(priority)
            .with_correlation(correlation_id);
        if let Err(e) = self.bus.publish(event).await {
            warn!(
                worker_id = %self.identity.worker_id,
                topic = %topic,
                error = %e,
                "Failed to publish event"
            );
        }
    }

    fn publish_stats(&self) {
        let current = self.running.as_ref().map(|r| r.assignment.task_id);
        self.stats
            .send_replace(snapshot(&self.identity, current, &self.metrics));
    }
}

fn snapshot(
    identity: &WorkerIdentity,
    current_task: Option<TaskId>,
    metrics: &PerformanceMetrics,
) -> WorkerStats {
    WorkerStats {
        worker_id: identity.worker_id.clone(),
        manager_id: identity.manager_id.clone(),
        agent_type: identity.agent_type.clone(),
        capabilities: identity.capabilities.clone(),
        current_task,
        tasks_completed: metrics.tasks_completed,
        tasks_failed: metrics.tasks_failed,
        success_rate: metrics.success_rate,
        avg_task_duration: metrics.avg_duration,
        is_available: current_task.is_none(),
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return "handler task was cancelled".to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cloneable handle to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    worker_id: String,
    commands: mpsc::Sender<WorkerCommand>,
    stats: watch::Receiver<WorkerStats>,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Latest published stats snapshot.
    pub fn stats(&self) -> WorkerStats {
        self.stats.borrow().clone()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<WorkerStats> {
        self.stats.clone()
    }

    /// The last [`HISTORY_LIMIT`] outcomes, oldest first.
    pub async fn history(&self) -> Vec<TaskOutcome> {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(WorkerCommand::History { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop the worker, aborting a task in progress, and wait for its loop
    /// to exit.
    pub async fn shutdown(&self) {
        if self.commands.send(WorkerCommand::Shutdown).await.is_ok() {
            self.commands.closed().await;
        }
    }
}
