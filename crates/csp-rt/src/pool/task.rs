// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative task records.
//!
//! A task is a boxed future plus an atomic lifecycle state. Workers own the
//! polling loop; wakers move a suspended task back to `Runnable` and queue
//! its id.

use std::cell::RefCell;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::{Condvar, Mutex};

use super::arena::TaskId;
use crate::cancel::CancelToken;
use crate::channel::ChannelId;
use crate::error::panic_message;

/// Lifecycle states.
///
/// `Runnable -> Running -> Suspended | Completed | Cancelled`, and
/// `Suspended -> Runnable` on wake. Terminal states never change.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Runnable = 0,
    Running = 1,
    Suspended = 2,
    Completed = 3,
    Cancelled = 4,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Runnable,
            1 => Self::Running,
            2 => Self::Suspended,
            3 => Self::Completed,
            _ => Self::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// What a suspended task is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendReason {
    SendBlocked(ChannelId),
    ReceiveBlocked(ChannelId),
    SelectBlocked(Vec<ChannelId>),
    Sleeping,
    Joining(TaskId),
    /// Pending on a future that does not report a reason.
    Other,
}

/// Observable status of a cooperative task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Runnable,
    Running,
    Suspended(SuspendReason),
    /// Finished, including by panic.
    Completed,
    Cancelled,
}

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub(crate) enum PollResult {
    Ready,
    Pending,
    Panicked(String),
}

struct Completion {
    done: bool,
    join_wakers: Vec<Waker>,
}

pub(crate) struct TaskRecord {
    pub id: TaskId,
    state: AtomicU8,
    /// Set by a wake that lands while the task is `Running`.
    notified: AtomicBool,
    pub cancel: CancelToken,
    future: Mutex<Option<BoxFuture>>,
    reason: Mutex<SuspendReason>,
    panic: Mutex<Option<String>>,
    completion: Mutex<Completion>,
    done: Condvar,
}

impl std::fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskRecord {
    pub fn new(id: TaskId, future: BoxFuture) -> Self {
        Self {
            id,
            state: AtomicU8::new(TaskState::Runnable as u8),
            notified: AtomicBool::new(false),
            cancel: CancelToken::new(),
            future: Mutex::new(Some(future)),
            reason: Mutex::new(SuspendReason::Other),
            panic: Mutex::new(None),
            completion: Mutex::new(Completion {
                done: false,
                join_wakers: Vec::new(),
            }),
            done: Condvar::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn status(&self) -> TaskStatus {
        match self.state() {
            TaskState::Runnable => TaskStatus::Runnable,
            TaskState::Running => TaskStatus::Running,
            TaskState::Suspended => TaskStatus::Suspended(self.reason.lock().clone()),
            TaskState::Completed => TaskStatus::Completed,
            TaskState::Cancelled => TaskStatus::Cancelled,
        }
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Runnable -> Running`, clearing any stale wake and reason.
    pub fn begin_poll(&self) -> bool {
        if !self.transition(TaskState::Runnable, TaskState::Running) {
            return false;
        }
        self.notified.store(false, Ordering::Release);
        *self.reason.lock() = SuspendReason::Other;
        true
    }

    /// `Running -> Suspended` after a `Pending` poll. Returns true when a
    /// wake arrived meanwhile and the task went straight back to
    /// `Runnable`; the caller must then queue it.
    pub fn suspend(&self) -> bool {
        if self.notified.swap(false, Ordering::AcqRel) {
            return self.transition(TaskState::Running, TaskState::Runnable);
        }
        if !self.transition(TaskState::Running, TaskState::Suspended) {
            return false;
        }
        self.notified.swap(false, Ordering::AcqRel)
            && self.transition(TaskState::Suspended, TaskState::Runnable)
    }

    /// Handle a wake. Returns true when the caller must queue the task.
    pub fn wake(&self) -> bool {
        loop {
            match self.state() {
                TaskState::Suspended => {
                    if self.transition(TaskState::Suspended, TaskState::Runnable) {
                        return true;
                    }
                }
                TaskState::Running => {
                    self.notified.store(true, Ordering::Release);
                    if self.state() == TaskState::Running {
                        return false;
                    }
                }
                TaskState::Runnable | TaskState::Completed | TaskState::Cancelled => return false,
            }
        }
    }

    /// Poll the future once with `waker`, catching panics.
    pub fn poll(self: &Arc<Self>, waker: &Waker) -> PollResult {
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return PollResult::Ready;
        };
        let mut cx = Context::from_waker(waker);
        let _current = CurrentTask::enter(self.clone());
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => PollResult::Pending,
            Ok(Poll::Ready(())) => {
                *slot = None;
                PollResult::Ready
            }
            Err(payload) => {
                *slot = None;
                PollResult::Panicked(panic_message(&*payload))
            }
        }
    }

    /// Drop the future. Its wait-queue entries are withdrawn by its own
    /// `Drop` impls.
    pub fn drop_future(&self) {
        let future = self.future.lock().take();
        drop(future);
    }

    pub fn set_panic(&self, message: String) {
        *self.panic.lock() = Some(message);
    }

    pub fn panic_message(&self) -> Option<String> {
        self.panic.lock().clone()
    }

    /// Enter a terminal state and release everyone joining.
    pub fn finish(&self, state: TaskState) {
        debug_assert!(state.is_terminal());
        self.state.store(state as u8, Ordering::Release);
        let wakers = {
            let mut completion = self.completion.lock();
            completion.done = true;
            self.done.notify_all();
            std::mem::take(&mut completion.join_wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completion.lock().done
    }

    /// Block the calling thread until the task is finished.
    pub fn wait_finished(&self) {
        let mut completion = self.completion.lock();
        while !completion.done {
            self.done.wait(&mut completion);
        }
    }

    /// Register a join waker unless already finished. Returns true if
    /// finished.
    pub fn register_join(&self, waker: &Waker) -> bool {
        let mut completion = self.completion.lock();
        if completion.done {
            return true;
        }
        if !completion.join_wakers.iter().any(|w| w.will_wake(waker)) {
            completion.join_wakers.push(waker.clone());
        }
        false
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<TaskRecord>>> = const { RefCell::new(None) };
}

struct CurrentTask {
    previous: Option<Arc<TaskRecord>>,
}

impl CurrentTask {
    fn enter(task: Arc<TaskRecord>) -> Self {
        let previous = CURRENT.with(|cell| cell.borrow_mut().replace(task));
        Self { previous }
    }
}

impl Drop for CurrentTask {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// Record why the task being polled on this thread is about to return
/// `Pending`. No-op outside a pool task.
pub(crate) fn note_suspended(reason: SuspendReason) {
    CURRENT.with(|cell| {
        if let Some(task) = cell.borrow().as_ref() {
            *task.reason.lock() = reason;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::arena::Arena;

    fn record(future: BoxFuture) -> Arc<TaskRecord> {
        let mut arena = Arena::new();
        let id = arena.insert(());
        Arc::new(TaskRecord::new(id, future))
    }

    fn noop_waker() -> Waker {
        crate::waiter::thread_waker()
    }

    #[test]
    fn ready_future_completes() {
        let task = record(Box::pin(async {}));
        assert!(task.begin_poll());
        assert!(matches!(task.poll(&noop_waker()), PollResult::Ready));
        task.finish(TaskState::Completed);
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(task.is_finished());
        assert!(!task.begin_poll());
    }

    #[test]
    fn wake_while_running_is_not_lost() {
        let task = record(Box::pin(std::future::pending()));
        assert!(task.begin_poll());
        assert!(!task.wake());
        assert!(task.suspend());
        assert_eq!(task.state(), TaskState::Runnable);
    }

    #[test]
    fn wake_after_suspend_requeues_once() {
        let task = record(Box::pin(std::future::pending()));
        assert!(task.begin_poll());
        assert!(!task.suspend());
        assert_eq!(task.state(), TaskState::Suspended);
        assert!(task.wake());
        assert!(!task.wake());
        assert_eq!(task.state(), TaskState::Runnable);
    }

    #[test]
    fn panics_are_caught() {
        let task = record(Box::pin(async { panic!("boom") }));
        assert!(task.begin_poll());
        match task.poll(&noop_waker()) {
            PollResult::Panicked(msg) => assert!(msg.contains("boom")),
            _ => panic!("expected a caught panic"),
        }
    }

    #[test]
    fn suspend_reason_is_recorded_during_poll() {
        let task = record(Box::pin(std::future::poll_fn(|_| {
            note_suspended(SuspendReason::Sleeping);
            Poll::<()>::Pending
        })));
        assert!(task.begin_poll());
        assert!(matches!(task.poll(&noop_waker()), PollResult::Pending));
        assert!(!task.suspend());
        assert_eq!(task.status(), TaskStatus::Suspended(SuspendReason::Sleeping));
        note_suspended(SuspendReason::Other);
        assert_eq!(task.status(), TaskStatus::Suspended(SuspendReason::Sleeping));
    }

    #[test]
    fn join_waker_released_on_finish() {
        let task = record(Box::pin(async {}));
        assert!(!task.register_join(&noop_waker()));
        task.finish(TaskState::Cancelled);
        assert!(task.register_join(&noop_waker()));
        task.wait_finished();
        assert_eq!(task.status(), TaskStatus::Cancelled);
    }
}
