use async_trait::async_trait;
use hive_bus::TaskAssignment;
use hive_core::TaskExecutionError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Executes tasks of one type inside a worker.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the task and return its JSON result.
    async fn execute(&self, task: &TaskAssignment) -> Result<Value, TaskExecutionError>;
}

/// Maps task types to handlers, with an optional fallback.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The simulated handlers for `text_processing`, `data_analysis` and
    /// `image_processing`, plus a generic fallback.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in [
            SimulatedKind::TextProcessing,
            SimulatedKind::DataAnalysis,
            SimulatedKind::ImageProcessing,
        ] {
            registry.register(kind.task_type(), Arc::new(SimulatedHandler::new(kind)));
        }
        registry.set_fallback(Arc::new(SimulatedHandler::new(SimulatedKind::Generic)));
        registry
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        info!(task_type = %task_type, "Registered task handler");
        self.handlers.insert(task_type, handler);
    }

    pub fn set_fallback(&mut self, handler: Arc<dyn TaskHandler>) {
        self.fallback = Some(handler);
    }

    /// Handler for `task_type`, or the fallback.
    pub fn resolve(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .get(task_type)
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// Run `task` on its handler. A missing handler is an `Unsupported` error.
    pub async fn execute(&self, task: &TaskAssignment) -> Result<Value, TaskExecutionError> {
        let handler = self
            .resolve(&task.task_type)
            .ok_or_else(|| TaskExecutionError::Unsupported(task.task_type.clone()))?;
        handler.execute(task).await
    }
}

/// Flavour of simulated work a [`SimulatedHandler`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedKind {
    TextProcessing,
    DataAnalysis,
    ImageProcessing,
    Generic,
}

impl SimulatedKind {
    pub fn task_type(self) -> &'static str {
        match self {
            SimulatedKind::TextProcessing => "text_processing",
            SimulatedKind::DataAnalysis => "data_analysis",
            SimulatedKind::ImageProcessing => "image_processing",
            SimulatedKind::Generic => "generic",
        }
    }

    /// Seconds spent when the task carries no estimate.
    fn default_duration(self) -> f64 {
        match self {
            SimulatedKind::TextProcessing => 2.0,
            SimulatedKind::DataAnalysis => 5.0,
            SimulatedKind::ImageProcessing => 3.0,
            SimulatedKind::Generic => 1.0,
        }
    }
}

/// Stand-in for real processing: sleeps for the task's estimated duration
/// and returns a canned result.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedHandler {
    kind: SimulatedKind,
}

impl SimulatedHandler {
    pub fn new(kind: SimulatedKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl TaskHandler for SimulatedHandler {
    async fn execute(&self, task: &TaskAssignment) -> Result<Value, TaskExecutionError> {
        let seconds = task
            .estimated_duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .unwrap_or_else(|| self.kind.default_duration());
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;

        let result = match self.kind {
            SimulatedKind::TextProcessing => {
                let preview: String = task.description.chars().take(50).collect();
                json!({
                    "type": "text_processing",
                    "result": format!("Processed text: {preview}"),
                    "word_count": task.description.split_whitespace().count(),
                    "processing_time": seconds,
                })
            }
            SimulatedKind::DataAnalysis => json!({
                "type": "data_analysis",
                "result": "Data analysis completed",
                "records_processed": 1000,
                "analysis_time": seconds,
            }),
            SimulatedKind::ImageProcessing => json!({
                "type": "image_processing",
                "result": "Image processed successfully",
                "resolution": "1920x1080",
                "processing_time": seconds,
            }),
            SimulatedKind::Generic => json!({
                "status": "completed",
                "task_id": task.task_id,
            }),
        };
        Ok(result)
    }
}
