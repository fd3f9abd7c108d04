use crate::error::TaskSchedulerError;
use crate::pool::PoolCore;
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
    time::Instant,
};

/// A nullary work item. Invoked at most once, on whichever worker thread
/// picks up the task. A work item that panics is contained at the task
/// boundary; see [`Task::error`].
pub type WorkItem = Box<dyn FnOnce() + Send>;

/// The lifecycle state of a [`Task`].
///
/// States progress monotonically in the order declared here: a task never
/// moves backwards, and `GetState` observations for a single task are
/// always non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    /// Freshly created. Work item, dependencies and metadata may still be
    /// configured.
    New,
    /// Handed to a pool; waiting on one or more prerequisites.
    Dispatched,
    /// Every prerequisite has completed; waiting for a worker.
    DependenciesCompleted,
    /// A worker is currently executing the work item.
    Running,
    /// The work item has returned (or panicked) and successors have been
    /// notified.
    Completed,
}

/// Informational, non-functional fields attached to a task.
#[derive(Debug, Clone)]
pub struct TaskMetadata {
    pub label: Option<String>,
    pub tag: i64,
    pub submit_time: Instant,
}

struct Inner {
    work: Option<WorkItem>,
    state: TaskState,
    pending: u32,
    successors: Vec<Weak<Task>>,
    pool: Option<Weak<PoolCore>>,
    metadata: Option<TaskMetadata>,
    failure: Option<TaskSchedulerError>,
}

/// A node in a dependency graph.
///
/// A task is created with [`Task::new`], configured with [`Task::set_work`],
/// [`Task::add_dependency`] and [`Task::attach_metadata`] while in state
/// [`TaskState::New`], then handed to a [`crate::ThreadPool`] via
/// [`ThreadPool::schedule`](crate::ThreadPool::schedule).
pub struct Task {
    inner: Mutex<Inner>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Task")
            .field("state", &inner.state)
            .field("pending", &inner.pending)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Creates a new task in state [`TaskState::New`], with no work item
    /// and no dependencies.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                work: None,
                state: TaskState::New,
                pending: 0,
                successors: Vec::new(),
                pool: None,
                metadata: None,
                failure: None,
            }),
        })
    }

    /// Returns the task's current state. Safe to call concurrently with
    /// any other operation.
    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    /// Returns the error recorded by a panicking work item, if any.
    pub fn error(&self) -> Option<TaskSchedulerError> {
        self.inner.lock().failure.clone()
    }

    /// Records the work item to run when the task executes.
    ///
    /// # Panics
    /// If the task is not in state [`TaskState::New`].
    pub fn set_work(&self, work: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock();
        if inner.state != TaskState::New {
            panic!(
                "{}",
                TaskSchedulerError::InvalidState {
                    operation: "set_work",
                    state: inner.state,
                }
            );
        }
        inner.work = Some(Box::new(work));
    }

    /// Records an informational label and tag, and stamps the current
    /// time as the task's submission time.
    ///
    /// # Panics
    /// If the task has already started executing.
    pub fn attach_metadata(&self, label: impl Into<Option<String>>, tag: i64) {
        let mut inner = self.inner.lock();
        if inner.state >= TaskState::Running {
            panic!(
                "{}",
                TaskSchedulerError::InvalidState {
                    operation: "attach_metadata",
                    state: inner.state,
                }
            );
        }
        inner.metadata = Some(TaskMetadata {
            label: label.into(),
            tag,
            submit_time: Instant::now(),
        });
    }

    /// Registers `dependency` as a prerequisite of this task.
    ///
    /// If `dependency` has already been dropped, it is treated as already
    /// completed and this call has no effect on `pending`.
    ///
    /// # Panics
    /// If this task is not in state [`TaskState::New`], or if `dependency`
    /// already has this task registered as a dependent.
    pub fn add_dependency(self: &Arc<Self>, dependency: &Weak<Task>) {
        let Some(dependency) = dependency.upgrade() else {
            return;
        };
        {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::New {
                panic!(
                    "{}",
                    TaskSchedulerError::InvalidState {
                        operation: "add_dependency",
                        state: inner.state,
                    }
                );
            }
            inner.pending += 1;
        }
        // Release our own lock before reaching into the dependency, so we
        // never hold two task locks at once.
        dependency.add_dependent(self);
    }

    /// Called by [`Self::add_dependency`] on the dependency being added.
    fn add_dependent(&self, successor: &Arc<Task>) {
        let already_completed = {
            let mut inner = self.inner.lock();
            if inner.state == TaskState::Completed {
                true
            } else {
                let weak_successor = Arc::downgrade(successor);
                if inner
                    .successors
                    .iter()
                    .any(|existing| existing.ptr_eq(&weak_successor))
                {
                    panic!("{}", TaskSchedulerError::DuplicateDependent);
                }
                inner.successors.push(weak_successor);
                false
            }
        };
        // This dependency finished between the caller resolving its weak
        // handle and this call; deliver the notification inline instead of
        // registering a successor that will never be reached.
        if already_completed {
            successor.on_dependency_completed();
        }
    }

    /// Called by the pool exactly once, during scheduling.
    ///
    /// # Panics
    /// If the task is not in state [`TaskState::New`] (this is also how a
    /// task scheduled twice is detected).
    pub(crate) fn set_pool(self: &Arc<Self>, pool: &Arc<PoolCore>) {
        let became_ready = {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::New {
                panic!(
                    "{}",
                    TaskSchedulerError::InvalidState {
                        operation: "set_pool",
                        state: inner.state,
                    }
                );
            }
            inner.pool = Some(Arc::downgrade(pool));
            inner.state = TaskState::Dispatched;
            if inner.pending == 0 {
                inner.state = TaskState::DependenciesCompleted;
                true
            } else {
                false
            }
        };
        if became_ready {
            pool.notify_dependencies_completed(self);
        }
    }

    /// Called on a successor whenever one of its prerequisites completes.
    fn on_dependency_completed(self: &Arc<Self>) {
        let pool = {
            let mut inner = self.inner.lock();
            match inner.state {
                TaskState::New => {
                    inner.pending = inner
                        .pending
                        .checked_sub(1)
                        .expect("task pending count underflowed");
                    None
                }
                TaskState::Dispatched => {
                    inner.pending = inner
                        .pending
                        .checked_sub(1)
                        .expect("task pending count underflowed");
                    if inner.pending == 0 {
                        inner.state = TaskState::DependenciesCompleted;
                        inner.pool.clone()
                    } else {
                        None
                    }
                }
                state => panic!(
                    "{}",
                    TaskSchedulerError::InvalidState {
                        operation: "on_dependency_completed",
                        state,
                    }
                ),
            }
        };
        if let Some(pool) = pool {
            let pool = pool
                .upgrade()
                .expect("pool dropped while a task was still pending");
            pool.notify_dependencies_completed(self);
        }
    }

    /// Runs the work item and notifies successors. Called by a worker once
    /// the task has been popped off the ready queue.
    ///
    /// # Panics
    /// If the task is not in state [`TaskState::DependenciesCompleted`].
    pub(crate) fn execute(self: &Arc<Self>) {
        let (work, label) = {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::DependenciesCompleted {
                panic!(
                    "{}",
                    TaskSchedulerError::InvalidState {
                        operation: "execute",
                        state: inner.state,
                    }
                );
            }
            inner.state = TaskState::Running;
            let label = inner.metadata.as_ref().and_then(|m| m.label.clone());
            (inner.work.take(), label)
        };

        if let Some(work) = work {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                let message = panic_message(payload);
                weave_log::warn!(
                    "task {} failed: {message}",
                    label.as_deref().unwrap_or("<unlabeled>")
                );
                self.inner.lock().failure = Some(TaskSchedulerError::WorkItemFailed(message));
            }
        }

        let successors = {
            let mut inner = self.inner.lock();
            inner.state = TaskState::Completed;
            std::mem::take(&mut inner.successors)
        };

        for successor in successors {
            if let Some(successor) = successor.upgrade() {
                successor.on_dependency_completed();
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "work item panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn new_task_starts_in_new_state() {
        let task = Task::new();
        assert_eq!(task.state(), TaskState::New);
    }

    #[test]
    fn task_state_order_is_monotonic() {
        assert!(TaskState::New < TaskState::Dispatched);
        assert!(TaskState::Dispatched < TaskState::DependenciesCompleted);
        assert!(TaskState::DependenciesCompleted < TaskState::Running);
        assert!(TaskState::Running < TaskState::Completed);
    }

    #[test]
    #[should_panic]
    fn setting_work_after_new_panics() {
        let task = Task::new();
        {
            let mut inner = task.inner.lock();
            inner.state = TaskState::Dispatched;
        }
        task.set_work(|| {});
    }

    #[test]
    #[should_panic]
    fn adding_same_dependent_twice_panics() {
        let dependency = Task::new();
        let a = Task::new();
        let b = Task::new();
        a.add_dependency(&Arc::downgrade(&dependency));
        b.add_dependency(&Arc::downgrade(&dependency));
        // Force a second, duplicate registration directly.
        dependency.add_dependent(&a);
    }

    #[test]
    fn adding_an_expired_dependency_has_no_effect() {
        let dependency = Task::new();
        let weak = Arc::downgrade(&dependency);
        drop(dependency);

        let task = Task::new();
        task.add_dependency(&weak);
        assert_eq!(task.inner.lock().pending, 0);
    }

    #[test]
    fn dependent_on_already_completed_task_is_notified_inline() {
        let dependency = Task::new();
        let recorder = Arc::new(StdMutex::new(Vec::new()));

        // Complete the dependency by hand, bypassing a pool.
        {
            let mut inner = dependency.inner.lock();
            inner.state = TaskState::Completed;
        }

        let dependent = Task::new();
        {
            let recorder = Arc::clone(&recorder);
            dependent.set_work(move || recorder.lock().unwrap().push("ran"));
        }
        // add_dependency would increment pending then call add_dependent;
        // since the dependency is already completed, pending must come
        // back down to zero via the inline notification.
        dependent.add_dependency(&Arc::downgrade(&dependency));
        assert_eq!(dependent.inner.lock().pending, 0);
    }
}
