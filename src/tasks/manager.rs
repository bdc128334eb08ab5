//! Tracks running background tasks and relays their updates.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;

use super::{BackgroundTask, TaskId, TaskProgress, TaskState, TaskType, TaskUpdate};

pub struct BackgroundTaskManager {
    tasks: HashMap<TaskId, BackgroundTask>,
    /// Order in which tasks were added (for "most recent" cancellation).
    task_order: Vec<TaskId>,
}

impl BackgroundTaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            task_order: Vec::new(),
        }
    }

    /// Register a new background task.
    /// Returns the TaskId, a sender for the task's updates and its cancel flag.
    pub fn register_task(&mut self, task_type: TaskType) -> (TaskId, mpsc::Sender<TaskUpdate>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let task = BackgroundTask::new(task_type, cancel_flag.clone(), rx);
        let id = task.id;

        self.tasks.insert(id, task);
        self.task_order.push(id);

        (id, tx, cancel_flag)
    }

    /// Check if a task of the given type is already running.
    pub fn is_running(&self, task_type: TaskType) -> bool {
        self.tasks.values().any(|t| t.task_type == task_type && t.is_running())
    }

    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        match self.tasks.get(&id) {
            Some(task) if task.is_running() => {
                task.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel the most recently started running task.
    pub fn cancel_most_recent(&mut self) -> bool {
        for id in self.task_order.iter().rev() {
            if let Some(task) = self.tasks.get(id) {
                if task.is_running() {
                    task.cancel();
                    return true;
                }
            }
        }
        false
    }

    pub fn cancel_all(&mut self) {
        for task in self.tasks.values() {
            if task.is_running() {
                task.cancel();
            }
        }
    }

    /// Drain every task's channel, in registration order.
    ///
    /// Tasks that sent a terminal update, or whose sender went away without
    /// one, are dropped from tracking after their updates are returned.
    pub fn poll_updates(&mut self) -> Vec<(TaskId, TaskUpdate)> {
        let mut updates = Vec::new();
        let mut finished = Vec::new();

        for id in &self.task_order {
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };
            loop {
                match task.receiver.try_recv() {
                    Ok(update) => {
                        task.apply(&update);
                        updates.push((*id, update));
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        if task.is_running() {
                            let error = "task ended without reporting completion".to_string();
                            tracing::warn!(task = task.task_type.display_name(), "{}", error);
                            task.state = TaskState::Failed(error.clone());
                            updates.push((*id, TaskUpdate::Failed { error }));
                        }
                        break;
                    }
                }
            }
            if !task.is_running() {
                finished.push(*id);
            }
        }

        for id in finished {
            self.tasks.remove(&id);
            self.task_order.retain(|t| *t != id);
        }

        updates
    }

    /// Latest progress reported by a task still being tracked.
    pub fn progress(&self, id: TaskId) -> Option<&TaskProgress> {
        self.tasks.get(&id).and_then(|t| t.progress.as_ref())
    }

    pub fn running_tasks(&self) -> Vec<&BackgroundTask> {
        self.task_order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.is_running())
            .collect()
    }

    pub fn has_running_tasks(&self) -> bool {
        self.tasks.values().any(|t| t.is_running())
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_updates_relayed_and_finished_tasks_dropped() {
        let mut manager = BackgroundTaskManager::new();
        let (id, tx, _cancel) = manager.register_task(TaskType::FaceRedetection);
        assert!(manager.is_running(TaskType::FaceRedetection));

        tx.send(TaskUpdate::Started { total: 2 }).unwrap();
        tx.send(TaskUpdate::Progress(TaskProgress::new(1, 2).with_item(10))).unwrap();
        let updates = manager.poll_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(manager.progress(id).unwrap().item_id, Some(10));

        tx.send(TaskUpdate::Completed { summary: "done".into() }).unwrap();
        let updates = manager.poll_updates();
        assert_eq!(updates, vec![(id, TaskUpdate::Completed { summary: "done".into() })]);
        assert!(!manager.has_running_tasks());
        assert!(manager.progress(id).is_none());
    }

    #[test]
    fn test_cancel_most_recent() {
        let mut manager = BackgroundTaskManager::new();
        let (_, _tx1, first) = manager.register_task(TaskType::FaceRedetection);
        let (second_id, _tx2, second) = manager.register_task(TaskType::FaceRedetection);

        assert!(manager.cancel_most_recent());
        assert!(!first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
        assert!(manager.cancel_task(second_id));

        manager.cancel_all();
        assert!(first.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dropped_sender_marks_failure() {
        let mut manager = BackgroundTaskManager::new();
        let (id, tx, _cancel) = manager.register_task(TaskType::FaceRedetection);
        drop(tx);
        let updates = manager.poll_updates();
        assert!(matches!(updates.as_slice(), [(got, TaskUpdate::Failed { .. })] if *got == id));
        assert!(manager.running_tasks().is_empty());
    }
}
