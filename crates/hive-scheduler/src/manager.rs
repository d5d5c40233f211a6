//! Manager actor.
//!
//! A manager runs as a single tokio task that owns its [`ManagerState`].
//! Callers talk to it through a cloneable [`ManagerHandle`]; workers talk to
//! it through the event bus. Nothing else ever touches the state, so it
//! needs no locks.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::state::ManagerState;
use crate::stats::ManagerStats;
use crate::task::{Task, TaskSpec};
use hive_bus::{EventBus, EventPayload, EventType, Subscription, SubscriptionFilter};
use hive_core::{HiveError, HiveResult, TaskId};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

enum Command {
    RegisterWorker {
        worker_id: String,
        agent_type: String,
        capabilities: Vec<String>,
        load_capacity: usize,
        reply: oneshot::Sender<HiveResult<()>>,
    },
    UnregisterWorker {
        worker_id: String,
        reply: oneshot::Sender<HiveResult<usize>>,
    },
    CreateTask {
        spec: TaskSpec,
        reply: oneshot::Sender<HiveResult<TaskId>>,
    },
    AssignTask {
        task_id: TaskId,
        worker_id: String,
        reply: oneshot::Sender<HiveResult<()>>,
    },
    CancelTask {
        task_id: TaskId,
        reply: oneshot::Sender<HiveResult<()>>,
    },
    GetTask {
        task_id: TaskId,
        reply: oneshot::Sender<Option<Task>>,
    },
    QueuedTasks {
        reply: oneshot::Sender<Vec<TaskId>>,
    },
    Shutdown,
}

/// Spawns manager actors.
pub struct Manager;

impl Manager {
    /// Start a manager with the default weighted scoring.
    pub fn spawn(
        manager_id: impl Into<String>,
        config: SchedulerConfig,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> ManagerHandle {
        Self::spawn_with_state(ManagerState::new(manager_id, config), bus, clock)
    }

    /// Start a manager around an existing state, e.g. one with a custom
    /// scoring strategy.
    pub fn spawn_with_state(
        state: ManagerState,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> ManagerHandle {
        let manager_id = state.manager_id().to_string();
        // Subscribe before spawning so no worker event is missed.
        let events = bus.subscribe(
            SubscriptionFilter::topics(EventType::WORKER_EVENTS).addressed_to(&manager_id),
        );
        let (command_tx, command_rx) = mpsc::channel(state.config().command_buffer);
        let (stats_tx, stats_rx) = watch::channel(state.stats(clock.now()));

        let actor = ManagerActor {
            state,
            bus,
            clock,
            commands: command_rx,
            events,
            stats: stats_tx,
        };
        tokio::spawn(actor.run());

        ManagerHandle {
            manager_id,
            commands: command_tx,
            stats: stats_rx,
        }
    }
}

struct ManagerActor {
    state: ManagerState,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    commands: mpsc::Receiver<Command>,
    events: Subscription,
    stats: watch::Sender<ManagerStats>,
}

impl ManagerActor {
    async fn run(mut self) {
        let manager_id = self.state.manager_id().to_string();
        info!(manager_id = %manager_id, "Manager started");

        let mut health = tokio::time::interval(self.state.config().health_check_interval());
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        health.tick().await;
        let idle = self.state.config().dispatch_idle();
        let mut bus_open = true;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = self.events.recv(), if bus_open => match event {
                    Ok(event) => {
                        let now = self.clock.now();
                        self.state.handle_event(&event, now);
                    }
                    Err(e) => {
                        error!(manager_id = %manager_id, error = %e, "Event subscription ended");
                        bus_open = false;
                    }
                },
                _ = health.tick() => {
                    let now = self.clock.now();
                    let removed = self.state.check_health(now);
                    if !removed.is_empty() {
                        warn!(manager_id = %manager_id, workers = ?removed, "Removed unresponsive workers");
                    }
                }
                _ = tokio::time::sleep(idle) => {}
            }
            self.settle().await;
        }

        info!(manager_id = %manager_id, "Manager stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let now = self.clock.now();
        match command {
            Command::RegisterWorker {
                worker_id,
                agent_type,
                capabilities,
                load_capacity,
                reply,
            } => {
                let result = self.state.register_worker(
                    &worker_id,
                    &agent_type,
                    capabilities,
                    load_capacity,
                    now,
                );
                self.respond(reply, result).await;
            }
            Command::UnregisterWorker { worker_id, reply } => {
                let result = self.state.unregister_worker(&worker_id);
                self.respond(reply, result).await;
            }
            Command::CreateTask { spec, reply } => {
                let result = self.state.create_task(spec, now);
                self.respond(reply, result).await;
            }
            Command::AssignTask {
                task_id,
                worker_id,
                reply,
            } => {
                let result = self.state.assign_task(task_id, &worker_id);
                self.respond(reply, result).await;
            }
            Command::CancelTask { task_id, reply } => {
                let result = self.state.cancel_task(task_id, now);
                self.respond(reply, result).await;
            }
            Command::GetTask { task_id, reply } => {
                let _ = reply.send(self.state.get_task(task_id).cloned());
            }
            Command::QueuedTasks { reply } => {
                let _ = reply.send(self.state.queued_task_ids());
            }
            Command::Shutdown => {}
        }
    }

    /// Bring state, bus and stats in line before answering, so a caller
    /// that awaited a command observes its effects.
    async fn respond<T>(&mut self, reply: oneshot::Sender<T>, value: T) {
        self.settle().await;
        let _ = reply.send(value);
    }

    /// Dispatch everything assignable, publish the resulting events and
    /// refresh the stats snapshot.
    async fn settle(&mut self) {
        while self.state.dispatch_once().is_some() {}

        for event in self.state.take_outbox() {
            let task_id = match &event.payload {
                EventPayload::TaskAssignment(assignment) => Some(assignment.task_id),
                _ => None,
            };
            if let Err(e) = self.bus.publish(event).await {
                error!(
                    manager_id = %self.state.manager_id(),
                    error = %e,
                    "Failed to publish event"
                );
                if let Some(task_id) = task_id {
                    self.state.abandon_assignment(task_id);
                }
            }
        }

        self.stats.send_replace(self.state.stats(self.clock.now()));
    }
}

/// Cloneable handle to a running manager.
///
/// Mutating calls return `bool` or `Option` and log the reason of a
/// rejection; the `try_` variants return the error instead.
#[derive(Clone)]
pub struct ManagerHandle {
    manager_id: String,
    commands: mpsc::Sender<Command>,
    stats: watch::Receiver<ManagerStats>,
}

impl ManagerHandle {
    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> HiveResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| HiveError::ActorStopped(self.manager_id.clone()))?;
        response
            .await
            .map_err(|_| HiveError::ActorStopped(self.manager_id.clone()))
    }

    fn accepted<T>(&self, operation: &str, result: HiveResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(manager_id = %self.manager_id, operation, error = %e, "Request rejected");
                None
            }
        }
    }

    /// Like [`register_worker`](Self::register_worker), but returns the reason for a rejection.
    pub async fn try_register_worker(
        &self,
        worker_id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
        load_capacity: usize,
    ) -> HiveResult<()> {
        let worker_id = worker_id.into();
        let agent_type = agent_type.into();
        self.request(|reply| Command::RegisterWorker {
            worker_id,
            agent_type,
            capabilities,
            load_capacity,
            reply,
        })
        .await?
    }

    /// Register a worker. `false` for an empty id, zero capacity or a
    /// duplicate id.
    pub async fn register_worker(
        &self,
        worker_id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
        load_capacity: usize,
    ) -> bool {
        let result = self
            .try_register_worker(worker_id, agent_type, capabilities, load_capacity)
            .await;
        self.accepted("register_worker", result).is_some()
    }

    /// Unregister a worker, re-queueing whatever it held. `false` for an
    /// unknown id.
    pub async fn unregister_worker(&self, worker_id: impl Into<String>) -> bool {
        let worker_id = worker_id.into();
        let result = self
            .request(|reply| Command::UnregisterWorker { worker_id, reply })
            .await
            .and_then(|r| r);
        match result {
            Ok(_) => true,
            Err(e) => {
                debug!(manager_id = %self.manager_id, error = %e, "Unregister ignored");
                false
            }
        }
    }

    /// Like [`create_task`](Self::create_task), but returns the reason for a rejection.
    pub async fn try_create_task(&self, spec: TaskSpec) -> HiveResult<TaskId> {
        self.request(|reply| Command::CreateTask { spec, reply })
            .await?
    }

    /// Create and queue a task. `None` when the arguments are invalid.
    pub async fn create_task(&self, spec: TaskSpec) -> Option<TaskId> {
        let result = self.try_create_task(spec).await;
        self.accepted("create_task", result)
    }

    /// Like [`assign_task`](Self::assign_task), but returns the reason for a rejection.
    pub async fn try_assign_task(
        &self,
        task_id: TaskId,
        worker_id: impl Into<String>,
    ) -> HiveResult<()> {
        let worker_id = worker_id.into();
        self.request(|reply| Command::AssignTask {
            task_id,
            worker_id,
            reply,
        })
        .await?
    }

    /// Manually assign a pending task, bypassing scoring but not admission.
    pub async fn assign_task(&self, task_id: TaskId, worker_id: impl Into<String>) -> bool {
        let result = self.try_assign_task(task_id, worker_id).await;
        self.accepted("assign_task", result).is_some()
    }

    /// Cancel a task that has not finished yet.
    pub async fn cancel_task(&self, task_id: TaskId) -> bool {
        let result = self
            .request(|reply| Command::CancelTask { task_id, reply })
            .await
            .and_then(|r| r);
        self.accepted("cancel_task", result).is_some()
    }

    /// A copy of the task record, if the manager knows it.
    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.request(|reply| Command::GetTask { task_id, reply })
            .await
            .ok()
            .flatten()
    }

    /// Queued task ids in dispatch order.
    pub async fn queued_task_ids(&self) -> Vec<TaskId> {
        self.request(|reply| Command::QueuedTasks { reply })
            .await
            .unwrap_or_default()
    }

    /// Latest stats snapshot. Keeps returning the last snapshot after the
    /// manager has stopped.
    pub fn get_manager_stats(&self) -> ManagerStats {
        self.stats.borrow().clone()
    }

    /// Receiver that is notified whenever the snapshot changes.
    pub fn subscribe_stats(&self) -> watch::Receiver<ManagerStats> {
        self.stats.clone()
    }

    /// False once the actor has stopped.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop the manager and wait for its loop to exit.
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_ok() {
            self.commands.closed().await;
        }
    }
}
