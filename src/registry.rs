//! Bookkeeping of active executions, keyed by resource footprint.

use crate::exec::{Execution, TaskBody};
use std::sync::{Arc, RwLock};

/// A runnable task that knows what it conflicts with.
///
/// Each pool is homogeneous in its task type, so the conflict
/// predicate compares like with like and dispatch stays static.
pub trait Task: TaskBody {
    /// True if this task and `other` cannot run at the same time.
    fn conflicts_with(&self, other: &Self) -> bool;

    /// The id under which this task is registered while it runs.
    fn task_id(&self) -> String;
}

struct Entry<T> {
    task: Arc<T>,
    execution: Execution,
}

/// Thread-safe registry of currently active `(task, execution)`
/// pairs.
///
/// Entries live from the moment a task starts until its execution
/// completes, and are never mutated in place. All methods are safe to
/// call from any number of threads; none of them blocks on anything
/// but the registry's own lock.
pub struct ConflictRegistry<T> {
    entries: RwLock<Vec<Entry<T>>>,
}

impl<T: Task> ConflictRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn insert(&self, task: Arc<T>, execution: Execution) {
        let mut entries = self.entries.write().unwrap();
        entries.push(Entry { task, execution });
    }

    /// Removes the entry for `task`, compared by identity. Removing a
    /// task that is not registered is a no-op.
    pub fn remove(&self, task: &Arc<T>) {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|entry| !Arc::ptr_eq(&entry.task, task));
    }

    /// The executions of every registered task that conflicts with
    /// `candidate`. `None` matches everything, which is how callers
    /// stop the world.
    pub fn conflicts(&self, candidate: Option<&T>) -> Vec<Execution> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .filter(|entry| match candidate {
                None => true,
                Some(candidate) => entry.task.conflicts_with(candidate),
            })
            .map(|entry| entry.execution.clone())
            .collect()
    }

    /// The execution registered under `task_id`, if any.
    pub fn find_by_task_id(&self, task_id: &str) -> Option<Execution> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .find(|entry| entry.task.task_id() == task_id)
            .map(|entry| entry.execution.clone())
    }

    /// A point-in-time copy of the registered tasks, in insertion
    /// order, safe to iterate without holding the lock.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        let entries = self.entries.read().unwrap();
        entries.iter().map(|entry| entry.task.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

impl<T: Task> Default for ConflictRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
