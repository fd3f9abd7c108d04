use crate::error::TaskSchedulerError;
use crate::task::Task;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    num::NonZeroUsize,
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
};

/// Raw identity of a task, used to key the not-ready index. Two `Arc<Task>`
/// handles to the same task compare equal under this key even though
/// neither is ever compared by value.
type TaskKey = usize;

/// A map keyed by an already-unique integer, skipping the stdlib's default
/// SipHash in favor of the identity function. `not_ready` is keyed by
/// `TaskKey`, a pointer cast that is unique per task by construction, so
/// hashing it through anything more than a pass-through just burns cycles.
type NoHashMap<K, V> = hashbrown::HashMap<K, V, nohash_hasher::BuildNoHashHasher<K>>;

fn task_key(task: &Arc<Task>) -> TaskKey {
    Arc::as_ptr(task) as TaskKey
}

struct PoolState {
    ready: VecDeque<Arc<Task>>,
    not_ready: NoHashMap<TaskKey, Arc<Task>>,
    running: bool,
}

/// The state shared between the [`ThreadPool`] and its worker threads, and
/// weakly referenced by every [`Task`] scheduled onto the pool.
///
/// Splitting this out from [`ThreadPool`] itself means a task's back
/// reference to its pool (`Weak<PoolCore>`) never has to resolve the full
/// pool, including its `Vec<JoinHandle<_>>`, just to post a notification.
pub(crate) struct PoolCore {
    state: Mutex<PoolState>,
    condvar: Condvar,
}

impl PoolCore {
    /// Moves `task` from the not-ready index to the back of the ready
    /// queue and wakes a worker.
    ///
    /// # Panics
    /// If `task` is not present in the not-ready index.
    pub(crate) fn notify_dependencies_completed(&self, task: &Arc<Task>) {
        let key = task_key(task);
        let mut state = self.state.lock();
        let task = state
            .not_ready
            .remove(&key)
            .unwrap_or_else(|| panic!("{}", TaskSchedulerError::MissingFromNotReady));
        state.ready.push_back(task);
        drop(state);
        self.condvar.notify_one();
    }
}

/// A fixed-size pool of worker threads that execute [`Task`]s as their
/// dependencies are satisfied.
///
/// Dropping the pool joins every worker thread. Callers must ensure all
/// scheduled tasks have completed first: dropping a pool with tasks still
/// outstanding is a programming error (see [`TaskSchedulerError::ShutdownWithPending`]).
pub struct ThreadPool {
    core: Arc<PoolCore>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl ThreadPool {
    /// Spawns `num_threads` worker threads and starts them waiting on the
    /// (initially empty) ready queue.
    pub fn new(num_threads: NonZeroUsize) -> Self {
        let core = Arc::new(PoolCore {
            state: Mutex::new(PoolState {
                ready: VecDeque::new(),
                not_ready: NoHashMap::default(),
                running: true,
            }),
            condvar: Condvar::new(),
        });

        weave_log::debug!("starting thread pool with {} workers", num_threads.get());

        let workers = (0..num_threads.get())
            .map(|id| {
                let core = Arc::clone(&core);
                thread::Builder::new()
                    .name(format!("weave-worker-{id}"))
                    .spawn(move || worker_loop(core))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { core, workers }
    }

    /// Takes ownership of `task` and enters it into the dependency graph,
    /// returning a weak handle whose expiry signals completion (once every
    /// strong reference the pool itself held has been dropped).
    ///
    /// # Panics
    /// If `task` has already been scheduled (on this pool or any other).
    pub fn schedule(&self, task: Arc<Task>) -> Weak<Task> {
        let key = task_key(&task);
        {
            let mut state = self.core.state.lock();
            if state.not_ready.insert(key, Arc::clone(&task)).is_some() {
                panic!(
                    "{}",
                    TaskSchedulerError::InvalidState {
                        operation: "schedule",
                        state: task.state(),
                    }
                );
            }
        }
        let handle = Arc::downgrade(&task);
        task.set_pool(&self.core);
        handle
    }
}

fn worker_loop(core: Arc<PoolCore>) {
    loop {
        let mut state = core.state.lock();
        while state.ready.is_empty() && state.running {
            core.condvar.wait(&mut state);
        }
        let Some(task) = state.ready.pop_front() else {
            // Not running, and nothing left to do.
            return;
        };
        drop(state);
        let key = task_key(&task);
        weave_log::trace!("worker picked up ready task {key:#x}");
        task.execute();
        weave_log::trace!("worker finished task {key:#x}");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        weave_log::with_timing_info_logging!("shutting down thread pool"; {
            {
                let mut state = self.core.state.lock();
                state.running = false;
            }
            self.core.condvar.notify_all();
            // A worker only returns once the ready queue is empty and
            // `running` is false, so joining drains every task whose
            // dependencies are actually satisfiable. What's left in
            // `not_ready` afterwards was never going to become ready.
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
            let state = self.core.state.lock();
            if !state.ready.is_empty() || !state.not_ready.is_empty() {
                weave_log::warn!(
                    "dropped thread pool with {} ready and {} not-ready tasks that never completed",
                    state.ready.len(),
                    state.not_ready.len(),
                );
                drop(state);
                panic!("{}", TaskSchedulerError::ShutdownWithPending);
            }
        })
    }
}
