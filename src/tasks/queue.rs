//! Per-session task queue.
//!
//! Background I/O posts closures here; the application drains them by calling
//! `update`, which is the only place user callbacks run.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// A deferred unit of work. Returning `false` stops the current drain.
pub type Task = Box<dyn FnOnce() -> bool + Send + 'static>;

/// FIFO of deferred tasks, safe for concurrent producers.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a task.
    pub fn push<F>(&self, task: F)
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        self.lock().push_back(Box::new(task));
    }

    /// Run queued tasks in order until the queue is empty or a task returns
    /// `false`. Tasks pushed while draining run in the same call.
    ///
    /// Returns the number of tasks run.
    pub fn update(&self) -> usize {
        let mut ran = 0;
        loop {
            // The lock is released before the task runs so tasks may push.
            let Some(task) = self.lock().pop_front() else {
                break;
            };
            ran += 1;
            if !task() {
                break;
            }
        }
        ran
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no task is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every queued task.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}
