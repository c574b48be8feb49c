//! In-process task registry.
//!
//! Every read and write takes the same mutex and never suspends while
//! holding it, so readers always see whole records.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use robot_core::model::{TaskRecord, TaskStatus};
use robot_core::now_ms;
use thiserror::Error;
use tokio::time::Instant;

use crate::error::ServiceError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("task {0} not found")]
pub struct TaskNotFound(pub String);

impl From<TaskNotFound> for ServiceError {
    fn from(value: TaskNotFound) -> Self {
        Self::NotFound(value.0)
    }
}

#[derive(Debug)]
struct TaskEntry {
    record: TaskRecord,
    created_at: Instant,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new `running` task. An id that already exists keeps its
    /// current record.
    pub fn create(&self, task_id: &str) -> TaskRecord {
        let mut tasks = self.tasks.lock();
        tasks
            .entry(task_id.to_string())
            .or_insert_with(|| TaskEntry {
                record: TaskRecord {
                    status: TaskStatus::Running,
                    predicted_duration_seconds: None,
                    created_at_ms: now_ms(),
                },
                created_at: Instant::now(),
            })
            .record
            .clone()
    }

    pub fn get(&self, task_id: &str) -> Result<TaskRecord, TaskNotFound> {
        self.tasks
            .lock()
            .get(task_id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| TaskNotFound(task_id.to_string()))
    }

    /// Moves a task to `status`. Terminal tasks are left untouched; the
    /// returned record is whatever the task holds afterwards.
    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<TaskRecord, TaskNotFound> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskNotFound(task_id.to_string()))?;
        if entry.record.status.is_terminal() {
            if entry.record.status != status {
                tracing::debug!(
                    cmd_id = task_id,
                    current = %entry.record.status,
                    requested = %status,
                    "ignoring transition out of terminal status"
                );
            }
        } else {
            entry.record.status = status;
        }
        Ok(entry.record.clone())
    }

    pub fn set_predicted_duration(
        &self,
        task_id: &str,
        seconds: f64,
    ) -> Result<TaskRecord, TaskNotFound> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskNotFound(task_id.to_string()))?;
        entry.record.predicted_duration_seconds = Some(seconds);
        Ok(entry.record.clone())
    }

    /// Transitions every `running` task to `success`; returns their ids.
    pub fn complete_running(&self) -> Vec<String> {
        let mut tasks = self.tasks.lock();
        tasks
            .iter_mut()
            .filter(|(_, entry)| entry.record.status == TaskStatus::Running)
            .map(|(id, entry)| {
                entry.record.status = TaskStatus::Success;
                id.clone()
            })
            .collect()
    }

    /// Removes tasks created more than `window` ago, whatever their status.
    pub fn evict_older_than(&self, window: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.tasks.lock().retain(|id, entry| {
            let keep = now.saturating_duration_since(entry.created_at) <= window;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        evicted
    }

    pub fn list(&self) -> Vec<(String, TaskRecord)> {
        self.tasks
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
