// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative worker pool.
//!
//! - `arena`: generational storage for task records
//! - `queue`: per-worker local queues + global injector, of task ids
//! - `task`: task record, lifecycle state machine, suspend reasons
//! - `timer`: deadline wake-ups
//! - `scheduler`: `Pool`, worker threads and the polling loop
//! - `handle`: `TaskHandle` (status/join/cancel)

mod arena;
mod handle;
mod queue;
mod scheduler;
pub(crate) mod task;
pub(crate) mod timer;

pub use arena::TaskId;
pub use handle::{JoinFuture, TaskHandle};
pub use scheduler::{Pool, PoolStats};
pub use task::{SuspendReason, TaskStatus};

/// Warn when a thread-blocking wait runs on a pool worker. Such a wait
/// holds the worker hostage and can starve every other task.
pub(crate) fn warn_if_worker_thread(operation: &'static str) {
    if scheduler::on_worker_thread() {
        tracing::warn!(operation, "blocking wait on a pool worker thread");
    }
}
