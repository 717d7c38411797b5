// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Handles to cooperative tasks: status, join, cancel.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;

use super::arena::TaskId;
use super::scheduler::{self, PoolShared};
use super::task::{note_suspended, SuspendReason, TaskRecord, TaskState, TaskStatus};
use crate::error::JoinError;

/// Handle to a task spawned with [`Pool::spawn`](super::Pool::spawn).
///
/// Dropping the handle detaches the task; it keeps running.
pub struct TaskHandle<T> {
    record: Arc<TaskRecord>,
    result: Arc<Mutex<Option<T>>>,
    pool: Weak<PoolShared>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        record: Arc<TaskRecord>,
        result: Arc<Mutex<Option<T>>>,
        pool: Weak<PoolShared>,
    ) -> Self {
        Self {
            record,
            result,
            pool,
        }
    }

    pub fn id(&self) -> TaskId {
        self.record.id
    }

    pub fn status(&self) -> TaskStatus {
        self.record.status()
    }

    pub fn is_finished(&self) -> bool {
        self.record.is_finished()
    }

    /// Request cancellation.
    ///
    /// A suspended task is queued so its worker can drop it, which
    /// withdraws it from every channel it waits on. A running task stops
    /// at its next suspension point. A task that already finished keeps
    /// its result.
    pub fn cancel(&self) {
        if self.record.state().is_terminal() {
            return;
        }
        tracing::debug!(task = %self.record.id, "cancel requested");
        self.record.cancel.cancel();
        scheduler::schedule(&self.pool, &self.record);
    }

    /// Block the calling thread until the task finishes.
    ///
    /// From inside a pool task use [`join_async`](Self::join_async).
    pub fn join(self) -> Result<T, JoinError> {
        super::warn_if_worker_thread("TaskHandle::join");
        self.record.wait_finished();
        take_result(&self.record, &self.result)
    }

    /// Wait for the task from another task.
    pub fn join_async(self) -> JoinFuture<T> {
        JoinFuture {
            record: self.record,
            result: self.result,
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.record.id)
            .field("status", &self.record.status())
            .finish()
    }
}

fn take_result<T>(record: &TaskRecord, result: &Mutex<Option<T>>) -> Result<T, JoinError> {
    if record.state() == TaskState::Cancelled {
        return Err(JoinError::Cancelled);
    }
    if let Some(message) = record.panic_message() {
        return Err(JoinError::Panicked(message));
    }
    result
        .lock()
        .take()
        .ok_or_else(|| JoinError::Panicked("task finished without a result".to_string()))
}

/// Future returned by [`TaskHandle::join_async`].
#[must_use = "futures do nothing unless polled"]
pub struct JoinFuture<T> {
    record: Arc<TaskRecord>,
    result: Arc<Mutex<Option<T>>>,
}

impl<T> Future for JoinFuture<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.record.register_join(cx.waker()) {
            return Poll::Ready(take_result(&self.record, &self.result));
        }
        note_suspended(SuspendReason::Joining(self.record.id));
        Poll::Pending
    }
}
