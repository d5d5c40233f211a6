use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::handler::HandlerRegistry;
use crate::manager::{Manager, ManagerHandle};
use crate::stats::SystemStats;
use crate::worker::{Worker, WorkerHandle, WorkerIdentity};
use chrono::{DateTime, Utc};
use hive_bus::{EventBus, InMemoryBus};
use hive_core::{HiveError, HiveResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Creates managers and workers on a shared event bus and aggregates their
/// statistics.
pub struct HiveSystem {
    config: SchedulerConfig,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    handlers: HandlerRegistry,
    managers: BTreeMap<String, ManagerHandle>,
    workers: BTreeMap<String, WorkerHandle>,
    started_at: DateTime<Utc>,
}

impl HiveSystem {
    /// A system on an in-memory bus with the built-in simulated handlers.
    pub fn new(config: SchedulerConfig) -> HiveResult<Self> {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(config.event_buffer));
        Self::with_parts(
            config,
            bus,
            Arc::new(SystemClock),
            HandlerRegistry::with_builtins(),
        )
    }

    /// A system over a caller-supplied bus, clock and handler set.
    pub fn with_parts(
        config: SchedulerConfig,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        handlers: HandlerRegistry,
    ) -> HiveResult<Self> {
        config.validate()?;
        let started_at = clock.now();
        Ok(Self {
            config,
            bus,
            clock,
            handlers,
            managers: BTreeMap::new(),
            workers: BTreeMap::new(),
            started_at,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    /// Start a manager.
    pub fn create_manager(&mut self, manager_id: impl Into<String>) -> HiveResult<ManagerHandle> {
        let manager_id = manager_id.into();
        if manager_id.trim().is_empty() {
            return Err(HiveError::Validation("manager id must not be empty".into()));
        }
        if self.managers.contains_key(&manager_id) {
            return Err(HiveError::DuplicateManager(manager_id));
        }

        let handle = Manager::spawn(
            manager_id.as_str(),
            self.config.clone(),
            self.bus.clone(),
            self.clock.clone(),
        );
        info!(manager_id = %manager_id, "Manager created");
        self.managers.insert(manager_id, handle.clone());
        Ok(handle)
    }

    /// Register a worker with `manager_id` and start it.
    ///
    /// The worker runs one task at a time, so it is registered with a load
    /// capacity of one.
    pub async fn create_worker(
        &mut self,
        worker_id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
        manager_id: &str,
    ) -> HiveResult<WorkerHandle> {
        let identity = WorkerIdentity {
            worker_id: worker_id.into(),
            agent_type: agent_type.into(),
            capabilities,
            manager_id: manager_id.to_string(),
        };
        let manager = self
            .managers
            .get(manager_id)
            .ok_or_else(|| HiveError::UnknownManager(manager_id.to_string()))?;
        if self.workers.contains_key(&identity.worker_id) {
            return Err(HiveError::DuplicateWorker(identity.worker_id));
        }

        manager
            .try_register_worker(
                identity.worker_id.as_str(),
                identity.agent_type.as_str(),
                identity.capabilities.clone(),
                1,
            )
            .await?;
        let handle = Worker::initialize(
            identity.clone(),
            &self.config,
            self.bus.clone(),
            self.handlers.clone(),
        );
        info!(
            worker_id = %identity.worker_id,
            manager_id = %identity.manager_id,
            agent_type = %identity.agent_type,
            "Worker created"
        );
        self.workers.insert(identity.worker_id, handle.clone());
        Ok(handle)
    }

    /// Handle of a running manager.
    pub fn manager(&self, manager_id: &str) -> Option<&ManagerHandle> {
        self.managers.get(manager_id)
    }

    /// Handle of a running worker.
    pub fn worker(&self, worker_id: &str) -> Option<&WorkerHandle> {
        self.workers.get(worker_id)
    }

    /// Aggregate of every manager's and worker's latest snapshot.
    pub fn get_system_stats(&self) -> SystemStats {
        let uptime = (self.clock.now() - self.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        SystemStats::aggregate(
            self.managers.values().map(ManagerHandle::get_manager_stats).collect(),
            self.workers.values().map(WorkerHandle::stats).collect(),
            uptime,
        )
    }

    /// Stop every worker, then every manager.
    pub async fn shutdown(&self) {
        for worker in self.workers.values() {
            worker.shutdown().await;
        }
        for manager in self.managers.values() {
            manager.shutdown().await;
        }
        info!(
            managers = self.managers.len(),
            workers = self.workers.len(),
            "Hive system stopped"
        );
    }
}
