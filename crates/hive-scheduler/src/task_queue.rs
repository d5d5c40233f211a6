use hive_core::{TaskId, TaskPriority};

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    task_id: TaskId,
    priority: TaskPriority,
}

/// Queue of pending task ids ordered by priority (highest first), ties broken
/// by enqueue order.
///
/// Entries are inserted at their sorted position, which yields the same order
/// as appending and stably re-sorting. A task id is never queued twice.
#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: Vec<QueueEntry>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task. Returns `false` if it is already queued.
    pub fn push(&mut self, task_id: TaskId, priority: TaskPriority) -> bool {
        if self.contains(task_id) {
            return false;
        }
        let at = self.entries.partition_point(|e| e.priority >= priority);
        self.entries.insert(at, QueueEntry { task_id, priority });
        true
    }

    /// Remove a task wherever it sits. Returns `false` if it was not queued.
    pub fn remove(&mut self, task_id: TaskId) -> bool {
        match self.entries.iter().position(|e| e.task_id == task_id) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.entries.iter().any(|e| e.task_id == task_id)
    }

    /// Queued ids in dispatch order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.entries.iter().map(|e| e.task_id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
