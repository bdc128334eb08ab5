//! Background task plumbing for long-running batch work.
//!
//! A task reports through an `mpsc` channel of [`TaskUpdate`]s and watches a
//! shared cancel flag between items.

pub mod manager;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

pub use manager::BackgroundTaskManager;

/// Unique identifier for a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn new() -> Self {
        use std::sync::atomic::AtomicU64;
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TaskId(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FaceRedetection,
}

impl TaskType {
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskType::FaceRedetection => "Face Re-detection",
        }
    }
}

/// Progress for one processed item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    pub current: usize,
    pub total: usize,
    pub item_id: Option<i64>,
    pub success: bool,
    pub summary: Option<String>,
}

impl TaskProgress {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            item_id: None,
            success: true,
            summary: None,
        }
    }

    pub fn with_item(mut self, item_id: i64) -> Self {
        self.item_id = Some(item_id);
        self
    }

    pub fn with_outcome(mut self, success: bool, summary: impl Into<String>) -> Self {
        self.success = success;
        self.summary = Some(summary.into());
        self
    }

    /// Progress percentage (0-100).
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.current as f64 / self.total as f64) * 100.0).min(100.0) as u8
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

/// Update messages sent from background tasks, in order:
/// `Started`, one `Progress` per item, then exactly one of the terminal
/// variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskUpdate {
    Started { total: usize },
    Progress(TaskProgress),
    Completed { summary: String },
    /// Stopped early; items already reported stay committed.
    Cancelled { summary: String },
    Failed { error: String },
}

impl TaskUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskUpdate::Completed { .. } | TaskUpdate::Cancelled { .. } | TaskUpdate::Failed { .. }
        )
    }
}

/// A running background task with its state and communication channels.
pub struct BackgroundTask {
    pub id: TaskId,
    pub task_type: TaskType,
    pub state: TaskState,
    pub progress: Option<TaskProgress>,
    pub cancel_flag: Arc<AtomicBool>,
    pub receiver: mpsc::Receiver<TaskUpdate>,
    pub started_at: Instant,
}

impl BackgroundTask {
    pub fn new(
        task_type: TaskType,
        cancel_flag: Arc<AtomicBool>,
        receiver: mpsc::Receiver<TaskUpdate>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            task_type,
            state: TaskState::Running,
            progress: None,
            cancel_flag,
            receiver,
            started_at: Instant::now(),
        }
    }

    /// Request cancellation; the task stops before its next item.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    fn apply(&mut self, update: &TaskUpdate) {
        match update {
            TaskUpdate::Started { total } => self.progress = Some(TaskProgress::new(0, *total)),
            TaskUpdate::Progress(progress) => self.progress = Some(progress.clone()),
            TaskUpdate::Completed { .. } => self.state = TaskState::Completed,
            TaskUpdate::Cancelled { .. } => self.state = TaskState::Cancelled,
            TaskUpdate::Failed { error } => self.state = TaskState::Failed(error.clone()),
        }
    }
}
