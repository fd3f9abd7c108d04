//! Logging facade for the task scheduler.
//!
//! This crate re-exports the [`log`] macros so call sites depend on
//! `weave_log` rather than on `log` directly, and adds a couple of small
//! macros for timing a block of code. Wiring an actual subscriber (e.g.
//! `env_logger`) is left to the host binary.

pub use log::{debug, error, info, log_enabled, trace, warn};

mod macros;
