// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Blocking task runner.
//!
//! Each blocking task gets its own OS thread, so it may sleep, do blocking
//! I/O, or use the `*_blocking` channel operations freely. Its result
//! arrives on a capacity-1 channel that is closed after delivery.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use tracing::{debug, warn};

use crate::cancel::{self, CancelToken};
use crate::channel::Channel;
use crate::error::{panic_message, TaskFailure};

/// What a blocking task delivers: its value, or why there is none.
pub type TaskOutcome<T> = Result<T, TaskFailure>;

/// Handle to a task started with [`spawn_blocking`].
///
/// Dropping the handle detaches the thread.
pub struct BlockingHandle<T> {
    result: Channel<TaskOutcome<T>>,
    cancel: CancelToken,
}

/// Run `f` on a dedicated thread.
///
/// Inside `f`, [`cancel::cancelled`] and every blocking channel operation
/// observe this task's cancel token.
pub fn spawn_blocking<T, F>(f: F) -> BlockingHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let result = Channel::bounded(1);
    let cancel = CancelToken::new();

    let tx = result.clone();
    let token = cancel.clone();
    let spawned = thread::Builder::new()
        .name("csp-blocking".to_string())
        .spawn(move || {
            cancel::set_current(Some(token));
            let outcome = catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                let message = panic_message(&*payload);
                warn!(panic = %message, "blocking task panicked");
                TaskFailure::new(message)
            });
            cancel::set_current(None);
            deliver(&tx, outcome);
        });

    match spawned {
        Ok(_) => debug!(channel = %result.id(), "blocking task spawned"),
        Err(e) => {
            warn!(error = %e, "could not spawn blocking thread");
            deliver(
                &result,
                Err(TaskFailure::new(format!("could not spawn blocking thread: {}", e))),
            );
        }
    }

    BlockingHandle { result, cancel }
}

fn deliver<T>(tx: &Channel<TaskOutcome<T>>, outcome: TaskOutcome<T>) {
    if tx.try_send(outcome).is_err() {
        // Only possible if a holder of the result channel closed it early.
        debug!(channel = %tx.id(), "blocking task result discarded");
    }
    tx.close();
}

impl<T> BlockingHandle<T> {
    /// The channel the outcome is delivered on. Usable as a select case.
    pub fn result_channel(&self) -> &Channel<TaskOutcome<T>> {
        &self.result
    }

    /// Ask the task to stop. It observes this through `cancelled()` or a
    /// `Cancelled` result from a blocking channel operation.
    pub fn cancel(&self) {
        debug!(channel = %self.result.id(), "blocking task cancel requested");
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Block until the outcome arrives.
    pub fn join(self) -> TaskOutcome<T> {
        flatten(self.result.recv_blocking())
    }

    /// Wait for the outcome from a cooperative task.
    pub async fn join_async(self) -> TaskOutcome<T> {
        flatten(self.result.recv().await)
    }
}

fn flatten<T>(
    received: Result<Option<TaskOutcome<T>>, crate::error::RecvError>,
) -> TaskOutcome<T> {
    match received {
        Ok(Some(outcome)) => outcome,
        Ok(None) => Err(TaskFailure::new("result was already taken")),
        Err(e) => Err(TaskFailure::new(e.to_string())),
    }
}
