//! A dependency-aware thread pool.
//!
//! A [`Task`] is a node in a dependency graph: it carries a work item and a
//! count of prerequisites that must complete before it can run. A
//! [`ThreadPool`] owns a fixed set of worker threads and moves tasks from a
//! not-ready index into a ready queue as their dependencies finish,
//! without any polling.
//!
//! See [`Task`] and [`ThreadPool`] for the full contract.

mod error;
mod pool;
mod task;

pub use error::TaskSchedulerError;
pub use pool::ThreadPool;
pub use task::{Task, TaskMetadata, TaskState};
