use crate::config::SchedulerConfig;
use crate::registry::{WorkerHealth, WorkerRecord};
use crate::scoring::{ScoringStrategy, WeightedScore};
use crate::stats::ManagerStats;
use crate::task::{Task, TaskSpec, TaskStatus};
use crate::task_queue::TaskQueue;
use chrono::{DateTime, Utc};
use hive_bus::{Event, EventPayload, Heartbeat};
use hive_core::{HiveError, HiveResult, TaskId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Idle heartbeats tolerated before a worker's recorded tasks are taken back.
/// The first one may have been sent before the worker saw its assignment.
const IDLE_HEARTBEATS_BEFORE_RECLAIM: u32 = 2;

/// Everything a manager owns: task table, queue, worker registry and the
/// eligible pool.
///
/// All methods are synchronous and take the current time as an argument, so
/// the manager actor is the only place that touches a clock or the bus.
/// Events produced by a mutation (task assignments) are collected in an
/// outbox and drained with [`ManagerState::take_outbox`].
pub struct ManagerState {
    manager_id: String,
    config: SchedulerConfig,
    scorer: Box<dyn ScoringStrategy>,
    tasks: HashMap<TaskId, Task>,
    queue: TaskQueue,
    workers: BTreeMap<String, WorkerRecord>,
    available: HashSet<String>,
    completed: HashSet<TaskId>,
    outbox: Vec<Event>,
    avg_task_completion_time: f64,
    tasks_retried: u64,
    tasks_reassigned: u64,
}

impl ManagerState {
    pub fn new(manager_id: impl Into<String>, config: SchedulerConfig) -> Self {
        let scorer = Box::new(WeightedScore::from_config(&config));
        Self::with_scorer(manager_id, config, scorer)
    }

    /// A manager state that ranks workers with `scorer` instead of the configured weights.
    pub fn with_scorer(
        manager_id: impl Into<String>,
        config: SchedulerConfig,
        scorer: Box<dyn ScoringStrategy>,
    ) -> Self {
        Self {
            manager_id: manager_id.into(),
            config,
            scorer,
            tasks: HashMap::new(),
            queue: TaskQueue::new(),
            workers: BTreeMap::new(),
            available: HashSet::new(),
            completed: HashSet::new(),
            outbox: Vec::new(),
            avg_task_completion_time: 0.0,
            tasks_retried: 0,
            tasks_reassigned: 0,
        }
    }

    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // --- registry ---

    /// Add a worker to the registry and the eligible pool.
    pub fn register_worker(
        &mut self,
        worker_id: &str,
        agent_type: &str,
        capabilities: Vec<String>,
        load_capacity: usize,
        now: DateTime<Utc>,
    ) -> HiveResult<()> {
        if worker_id.trim().is_empty() {
            return Err(HiveError::Validation("worker id must not be empty".into()));
        }
        if load_capacity == 0 {
            return Err(HiveError::Validation(format!(
                "worker '{worker_id}' must have a load capacity of at least 1"
            )));
        }
        if self.workers.contains_key(worker_id) {
            return Err(HiveError::DuplicateWorker(worker_id.to_string()));
        }

        let record = WorkerRecord::new(
            worker_id,
            agent_type,
            capabilities,
            load_capacity,
            self.config.default_success_rate,
            now,
        );
        info!(
            manager_id = %self.manager_id,
            worker_id,
            agent_type,
            load_capacity,
            capabilities = ?record.capabilities,
            "Worker registered"
        );
        self.workers.insert(worker_id.to_string(), record);
        self.available.insert(worker_id.to_string());
        Ok(())
    }

    /// Remove a worker, returning its in-flight tasks to the queue.
    ///
    /// Returns how many tasks were re-queued.
    pub fn unregister_worker(&mut self, worker_id: &str) -> HiveResult<usize> {
        if self.workers.remove(worker_id).is_none() {
            return Err(HiveError::UnknownWorker(worker_id.to_string()));
        }
        self.available.remove(worker_id);

        let orphaned = self.tasks_held_by(worker_id);

        for task_id in &orphaned {
            self.requeue(*task_id);
        }
        self.tasks_reassigned += orphaned.len() as u64;

        info!(
            manager_id = %self.manager_id,
            worker_id,
            reassigned = orphaned.len(),
            "Worker unregistered"
        );
        Ok(orphaned.len())
    }

    pub fn worker(&self, worker_id: &str) -> Option<&WorkerRecord> {
        self.workers.get(worker_id)
    }

    /// Whether the worker is in the eligible pool.
    pub fn is_available(&self, worker_id: &str) -> bool {
        self.available.contains(worker_id)
    }

    // --- tasks ---

    /// Create a pending task and queue it.
    pub fn create_task(&mut self, spec: TaskSpec, now: DateTime<Utc>) -> HiveResult<TaskId> {
        if spec.title.trim().is_empty() {
            return Err(HiveError::Validation("task title must not be empty".into()));
        }
        if spec.task_type.trim().is_empty() {
            return Err(HiveError::Validation("task type must not be empty".into()));
        }
        if let Some(dep) = spec.dependencies.iter().find(|d| !self.tasks.contains_key(d)) {
            return Err(HiveError::Validation(format!("unknown dependency {dep}")));
        }
        if let Some(estimate) = spec.estimated_duration {
            if !estimate.is_finite() || estimate < 0.0 {
                return Err(HiveError::Validation(format!(
                    "estimated duration must be a non-negative number, got {estimate}"
                )));
            }
        }

        let task = Task::new(spec, self.manager_id.as_str(), now);
        let task_id = task.id;
        info!(
            manager_id = %self.manager_id,
            task_id = %task_id,
            task_type = %task.task_type,
            priority = %task.priority,
            dependencies = task.dependencies.len(),
            "Task created"
        );
        self.queue.push(task_id, task.priority);
        self.tasks.insert(task_id, task);
        Ok(task_id)
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    /// Queued task ids in dispatch order.
    pub fn queued_task_ids(&self) -> Vec<TaskId> {
        self.queue.ids()
    }

    /// Assign a pending task to a specific worker.
    ///
    /// Fails without touching any state unless the worker declares the task's
    /// capability, every dependency has completed and the worker has a free
    /// load slot.
    pub fn assign_task(&mut self, task_id: TaskId, worker_id: &str) -> HiveResult<()> {
        let task = self
            .tasks
            .get(&task_id)
            .ok_or_else(|| HiveError::UnknownTask(task_id.to_string()))?;
        if task.status != TaskStatus::Pending {
            return Err(HiveError::InvalidTransition {
                task_id: task_id.to_string(),
                reason: format!("task is {}", task.status),
            });
        }
        let worker = self
            .workers
            .get(worker_id)
            .ok_or_else(|| HiveError::UnknownWorker(worker_id.to_string()))?;
        if !worker.has_capability(&task.task_type) {
            return Err(HiveError::MissingCapability {
                worker_id: worker_id.to_string(),
                capability: task.task_type.clone(),
            });
        }
        if let Some(dep) = task.unsatisfied_dependency(|d| self.completed.contains(d)) {
            return Err(HiveError::DependencyNotSatisfied {
                task_id: task_id.to_string(),
                dependency: dep.to_string(),
            });
        }
        if !worker.has_capacity() {
            return Err(HiveError::CapacityExceeded {
                worker_id: worker_id.to_string(),
                capacity: worker.load_capacity,
            });
        }

        self.commit_assignment(task_id, worker_id);
        Ok(())
    }

    /// Assign the highest-priority admissible task to its best worker.
    ///
    /// Tasks whose dependencies are incomplete, or for which no eligible
    /// worker qualifies, stay queued and the scan moves on.
    pub fn dispatch_once(&mut self) -> Option<(TaskId, String)> {
        for task_id in self.queue.ids() {
            let Some(task) = self.tasks.get(&task_id) else {
                continue;
            };
            if task.unsatisfied_dependency(|d| self.completed.contains(d)).is_some() {
                continue;
            }
            if let Some(worker_id) = self.best_worker(task) {
                self.commit_assignment(task_id, &worker_id);
                return Some((task_id, worker_id));
            }
        }
        None
    }

    /// Cancel a task that has not finished. A worker running it is not
    /// interrupted; its eventual outcome is ignored.
    pub fn cancel_task(&mut self, task_id: TaskId, now: DateTime<Utc>) -> HiveResult<()> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| HiveError::UnknownTask(task_id.to_string()))?;
        if task.status.is_terminal() {
            return Err(HiveError::InvalidTransition {
                task_id: task_id.to_string(),
                reason: format!("task is already {}", task.status),
            });
        }
        let holder = task.assigned_worker.clone();
        task.mark_cancelled(now);
        self.queue.remove(task_id);
        if let Some(worker_id) = &holder {
            self.release_slot(worker_id);
        }
        info!(
            manager_id = %self.manager_id,
            task_id = %task_id,
            worker_id = holder.as_deref().unwrap_or("-"),
            "Task cancelled"
        );
        self.warn_blocked_dependents(task_id);
        Ok(())
    }

    /// Undo an assignment whose event could not be published.
    pub fn abandon_assignment(&mut self, task_id: TaskId) {
        let Some(task) = self.tasks.get(&task_id) else {
            return;
        };
        if task.status != TaskStatus::Assigned {
            return;
        }
        let holder = task.assigned_worker.clone();
        self.requeue(task_id);
        if let Some(worker_id) = holder {
            self.release_slot(&worker_id);
        }
        warn!(manager_id = %self.manager_id, task_id = %task_id, "Assignment abandoned, task re-queued");
    }

    /// Drain the events produced since the last call.
    pub fn take_outbox(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox)
    }

    // --- events ---

    /// Apply a worker-originated event. Returns whether any state changed.
    ///
    /// Stale events (for finished tasks, or from a worker that no longer
    /// holds the task) are logged and ignored.
    pub fn handle_event(&mut self, event: &Event, now: DateTime<Utc>) -> bool {
        match &event.payload {
            EventPayload::TaskStarted { task_id, worker_id } => {
                self.on_task_started(*task_id, worker_id, now)
            }
            EventPayload::TaskCompleted {
                task_id,
                worker_id,
                result,
                duration,
            } => self.on_task_completed(*task_id, worker_id, result.clone(), *duration, now),
            EventPayload::TaskFailed {
                task_id,
                worker_id,
                error,
                duration,
            } => self.on_task_failed(*task_id, worker_id, error.clone(), *duration, now),
            EventPayload::TaskRejected {
                task_id,
                worker_id,
                reason,
            } => self.on_task_rejected(*task_id, worker_id, reason),
            EventPayload::WorkerHeartbeat(heartbeat) => self.on_heartbeat(heartbeat, now),
            EventPayload::WorkerAvailable { worker_id } => {
                if !self.workers.contains_key(worker_id) {
                    return false;
                }
                debug!(manager_id = %self.manager_id, worker_id = %worker_id, "Worker available");
                self.available.insert(worker_id.clone())
            }
            EventPayload::WorkerBusy { worker_id } => {
                debug!(manager_id = %self.manager_id, worker_id = %worker_id, "Worker busy");
                self.available.remove(worker_id)
            }
            EventPayload::TaskAssignment(_) => false,
        }
    }

    fn on_task_started(&mut self, task_id: TaskId, worker_id: &str, now: DateTime<Utc>) -> bool {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        if task.status != TaskStatus::Assigned || task.assigned_worker.as_deref() != Some(worker_id) {
            debug!(task_id = %task_id, worker_id, status = %task.status, "Ignoring stale task_started");
            return false;
        }
        task.mark_started(now);
        debug!(task_id = %task_id, worker_id, "Task in progress");
        true
    }

    fn on_task_completed(
        &mut self,
        task_id: TaskId,
        worker_id: &str,
        result: serde_json::Value,
        duration: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            warn!(task_id = %task_id, worker_id, "Completion for unknown task");
            return false;
        };
        if task.status.is_terminal() {
            debug!(task_id = %task_id, worker_id, status = %task.status, "Ignoring completion of finished task");
            return false;
        }
        let held_by_reporter =
            task.status.is_in_flight() && task.assigned_worker.as_deref() == Some(worker_id);
        // A worker declared dead may still deliver its result.
        let orphaned = task.status == TaskStatus::Pending;
        if !held_by_reporter && !orphaned {
            warn!(
                task_id = %task_id,
                worker_id,
                holder = task.assigned_worker.as_deref().unwrap_or("-"),
                "Ignoring completion from a worker that does not hold the task"
            );
            return false;
        }

        let duration = duration.max(0.0);
        task.mark_completed(result, duration, now);
        self.queue.remove(task_id);
        self.completed.insert(task_id);
        self.avg_task_completion_time = (self.avg_task_completion_time + duration) / 2.0;
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.performance_metrics.record_success(duration);
        }
        if held_by_reporter {
            self.release_slot(worker_id);
        }
        info!(
            manager_id = %self.manager_id,
            task_id = %task_id,
            worker_id,
            duration,
            "Task completed"
        );
        true
    }

    fn on_task_failed(
        &mut self,
        task_id: TaskId,
        worker_id: &str,
        error: String,
        duration: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            warn!(task_id = %task_id, worker_id, "Failure for unknown task");
            return false;
        };
        if !task.status.is_in_flight() || task.assigned_worker.as_deref() != Some(worker_id) {
            debug!(task_id = %task_id, worker_id, status = %task.status, "Ignoring stale task_failed");
            return false;
        }

        let retry = task.retryable();
        if retry {
            task.reset_to_pending();
            task.error = Some(error.clone());
            self.queue.push(task_id, task.priority);
            self.tasks_retried += 1;
            warn!(
                manager_id = %self.manager_id,
                task_id = %task_id,
                worker_id,
                attempts = task.attempts,
                error = %error,
                "Task failed, re-queued"
            );
        } else {
            task.mark_failed(error.clone(), duration.max(0.0), now);
            error!(
                manager_id = %self.manager_id,
                task_id = %task_id,
                worker_id,
                error = %error,
                "Task failed permanently"
            );
        }

        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.performance_metrics.record_failure();
        }
        self.release_slot(worker_id);
        if !retry {
            self.warn_blocked_dependents(task_id);
        }
        true
    }

    fn on_task_rejected(&mut self, task_id: TaskId, worker_id: &str, reason: &str) -> bool {
        let Some(task) = self.tasks.get(&task_id) else {
            return false;
        };
        if !task.status.is_in_flight() || task.assigned_worker.as_deref() != Some(worker_id) {
            return false;
        }
        self.requeue(task_id);
        self.release_slot(worker_id);
        self.available.remove(worker_id);
        warn!(task_id = %task_id, worker_id, reason, "Assignment rejected, task re-queued");
        true
    }

    /// Refresh liveness and metrics. A worker that keeps reporting no load
    /// while tasks are still recorded on it lost their outcome events; those
    /// tasks go back to the queue and its slots are freed.
    fn on_heartbeat(&mut self, heartbeat: &Heartbeat, now: DateTime<Utc>) -> bool {
        let worker_id = heartbeat.worker_id.as_str();
        let held = self.tasks_held_by(worker_id);
        let Some(worker) = self.workers.get_mut(worker_id) else {
            debug!(worker_id, "Heartbeat from unregistered worker");
            return false;
        };
        worker.last_heartbeat = now;
        worker.merge_reported(&heartbeat.performance_metrics);

        if held.is_empty() || heartbeat.current_load > 0 {
            worker.idle_reports = 0;
            return true;
        }
        worker.idle_reports += 1;
        if worker.idle_reports < IDLE_HEARTBEATS_BEFORE_RECLAIM {
            return true;
        }
        worker.idle_reports = 0;

        for task_id in &held {
            self.requeue(*task_id);
            self.release_slot(worker_id);
        }
        self.tasks_reassigned += held.len() as u64;
        warn!(
            manager_id = %self.manager_id,
            worker_id,
            reclaimed = held.len(),
            "Worker reports no load for recorded tasks, re-queued them"
        );
        true
    }

    // --- health ---

    /// Unregister every worker whose last heartbeat is older than the
    /// timeout. Returns the ids of the removed workers.
    pub fn check_health(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = self.config.heartbeat_timeout();
        let mut stale = Vec::new();
        for worker in self.workers.values_mut() {
            worker.performance_metrics.uptime = elapsed(worker.registered_at, now).as_secs_f64();
            let silent = elapsed(worker.last_heartbeat, now);
            if silent > timeout {
                warn!(
                    manager_id = %self.manager_id,
                    worker_id = %worker.agent_id,
                    silent_secs = silent.as_secs_f64(),
                    "Worker heartbeat timeout"
                );
                stale.push(worker.agent_id.clone());
            }
        }
        for worker_id in &stale {
            if let Err(e) = self.unregister_worker(worker_id) {
                error!(worker_id = %worker_id, error = %e, "Failed to remove stale worker");
            }
        }
        stale
    }

    /// Point-in-time snapshot. Never fails.
    pub fn stats(&self, now: DateTime<Utc>) -> ManagerStats {
        let count = |status: TaskStatus| self.tasks.values().filter(|t| t.status == status).count();
        let completed = count(TaskStatus::Completed);
        let failed = count(TaskStatus::Failed);
        let active = self.tasks.values().filter(|t| t.status.is_in_flight()).count();
        let success_rate = if completed + failed == 0 {
            1.0
        } else {
            completed as f64 / (completed + failed) as f64
        };

        let timeout = self.config.heartbeat_timeout();
        let workers = self
            .workers
            .values()
            .map(|w| {
                let silent = elapsed(w.last_heartbeat, now);
                let mut in_flight: Vec<&Task> = self
                    .tasks
                    .values()
                    .filter(|t| t.assigned_worker.as_deref() == Some(w.agent_id.as_str()))
                    .collect();
                in_flight.sort_by_key(|t| t.created_at);
                WorkerHealth {
                    worker_id: w.agent_id.clone(),
                    agent_type: w.agent_type.clone(),
                    capabilities: w.capabilities.iter().cloned().collect(),
                    current_load: w.current_load,
                    load_capacity: w.load_capacity,
                    is_active: w.is_active,
                    is_available: self.available.contains(&w.agent_id),
                    seconds_since_heartbeat: silent.as_secs_f64(),
                    healthy: silent <= timeout,
                    in_flight: in_flight.into_iter().map(|t| t.id).collect(),
                    performance_metrics: w.performance_metrics.clone(),
                }
            })
            .collect();

        ManagerStats {
            manager_id: self.manager_id.clone(),
            queue_size: self.queue.len(),
            total_tasks: self.tasks.len(),
            active_tasks: active,
            completed_tasks: completed,
            failed_tasks: failed,
            cancelled_tasks: count(TaskStatus::Cancelled),
            blocked_tasks: self.blocked_tasks().len(),
            total_workers: self.workers.len(),
            available_workers: self.available.len(),
            success_rate,
            avg_task_completion_time: self.avg_task_completion_time,
            tasks_retried: self.tasks_retried,
            tasks_reassigned: self.tasks_reassigned,
            workers,
            timestamp: now,
        }
    }

    // --- internals ---

    /// In-flight tasks recorded on `worker_id`, oldest first.
    fn tasks_held_by(&self, worker_id: &str) -> Vec<TaskId> {
        let mut held: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.status.is_in_flight() && t.assigned_worker.as_deref() == Some(worker_id))
            .collect();
        held.sort_by_key(|t| t.created_at);
        held.into_iter().map(|t| t.id).collect()
    }

    /// Pending tasks that depend, directly or through other blocked tasks,
    /// on a failed or cancelled task.
    fn blocked_tasks(&self) -> HashSet<TaskId> {
        let mut dead: HashSet<TaskId> = self
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
            .map(|t| t.id)
            .collect();
        let mut blocked = HashSet::new();
        loop {
            let newly: Vec<TaskId> = self
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending && !blocked.contains(&t.id))
                .filter(|t| t.dependencies.iter().any(|d| dead.contains(d)))
                .map(|t| t.id)
                .collect();
            if newly.is_empty() {
                return blocked;
            }
            dead.extend(newly.iter().copied());
            blocked.extend(newly);
        }
    }

    fn warn_blocked_dependents(&self, task_id: TaskId) {
        let dependents: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.dependencies.contains(&task_id))
            .map(|t| t.id)
            .collect();
        if !dependents.is_empty() {
            warn!(
                manager_id = %self.manager_id,
                task_id = %task_id,
                dependents = ?dependents,
                "Dependent tasks can no longer run"
            );
        }
    }

    fn best_worker(&self, task: &Task) -> Option<String> {
        let mut best: Option<(&WorkerRecord, f64)> = None;
        // Registry iterates in id order, so ties go to the lowest id.
        for worker in self.workers.values() {
            if !worker.is_active
                || !self.available.contains(&worker.agent_id)
                || !worker.has_capability(&task.task_type)
                || !worker.has_capacity()
            {
                continue;
            }
            let score = self.scorer.score(worker);
            match best {
                Some((_, top)) if top >= score => {}
                _ => best = Some((worker, score)),
            }
        }
        best.map(|(worker, _)| worker.agent_id.clone())
    }

    fn commit_assignment(&mut self, task_id: TaskId, worker_id: &str) {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return;
        };
        let Some(worker) = self.workers.get_mut(worker_id) else {
            return;
        };
        if !worker.acquire() {
            return;
        }
        task.mark_assigned(worker_id);
        self.queue.remove(task_id);
        if !worker.has_capacity() {
            self.available.remove(worker_id);
        }

        let event = Event::new(
            self.manager_id.as_str(),
            EventPayload::TaskAssignment(task.to_assignment()),
        )
        .to(worker_id)
        .with_priority(task.priority.into())
        .with_correlation(task_id);
        info!(
            manager_id = %self.manager_id,
            task_id = %task_id,
            worker_id,
            load = worker.current_load,
            capacity = worker.load_capacity,
            "Task assigned"
        );
        self.outbox.push(event);
    }

    fn requeue(&mut self, task_id: TaskId) {
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.reset_to_pending();
            self.queue.push(task_id, task.priority);
        }
    }

    /// Give back one load slot; a worker with room again rejoins the pool.
    fn release_slot(&mut self, worker_id: &str) {
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.release();
            if worker.has_capacity() {
                self.available.insert(worker_id.to_string());
            }
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
