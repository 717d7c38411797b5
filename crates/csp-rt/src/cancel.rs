// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative cancellation.
//!
//! A shared flag plus the wakers of everything currently suspended on it.
//! Cancelling sets the flag and wakes them; each suspended operation then
//! withdraws from its wait queues and reports `Cancelled`.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Waker;

use parking_lot::Mutex;

/// Cancellation token shared between a task's owner and the task.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    next_key: AtomicU64,
    wakers: Mutex<Vec<(u64, Waker)>>,
}

/// Registration of a waker with a token; pass back to `unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WakerKey(u64);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake everything registered. Idempotent.
    pub fn cancel(&self) {
        if self.inner.flag.swap(true, Ordering::AcqRel) {
            return;
        }
        let wakers = std::mem::take(&mut *self.inner.wakers.lock());
        for (_, waker) in wakers {
            waker.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Register a waker to fire on cancellation. Returns `None` when the
    /// token is already cancelled; the caller must then act on it directly.
    pub(crate) fn register(&self, waker: &Waker) -> Option<WakerKey> {
        let mut wakers = self.inner.wakers.lock();
        if self.is_cancelled() {
            return None;
        }
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        wakers.push((key, waker.clone()));
        Some(WakerKey(key))
    }

    pub(crate) fn unregister(&self, key: WakerKey) {
        self.inner.wakers.lock().retain(|(k, _)| *k != key.0);
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<CancelToken>> = const { RefCell::new(None) };
}

/// Token of the blocking task running on this thread, if any.
pub(crate) fn current() -> Option<CancelToken> {
    CURRENT.with(|cell| cell.borrow().clone())
}

pub(crate) fn set_current(token: Option<CancelToken>) {
    CURRENT.with(|cell| *cell.borrow_mut() = token);
}

/// Check if the blocking task running on this thread has been cancelled.
///
/// Always false outside a task started by `spawn_blocking`.
pub fn cancelled() -> bool {
    CURRENT.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    })
}
