// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Wait-queue entries and the claim-once signal behind them.
//!
//! A suspended operation owns one `Signal` and parks one `Waiter` per
//! channel it waits on (several for a select). Whoever completes it first
//! claims the signal with a CAS from `WAITING` to the chosen case; every
//! other claimant fails and discards its stale entry. Timeouts and
//! cancellation race on the same CAS (`WAITING` to `ABORTED`), so a wait
//! resolves exactly once.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};
use std::time::Instant;

use parking_lot::Mutex;

use crate::cancel::{CancelToken, WakerKey};
use crate::context::Ctx;
use crate::pool::timer::TimerEntry;

const WAITING: usize = 0;
const ABORTED: usize = 1;
const CASE_BASE: usize = 2;

pub(crate) struct Signal {
    state: AtomicUsize,
    waker: Mutex<Waker>,
}

impl Signal {
    pub fn new(waker: Waker) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicUsize::new(WAITING),
            waker: Mutex::new(waker),
        })
    }

    pub fn is_waiting(&self) -> bool {
        self.state.load(Ordering::Acquire) == WAITING
    }

    /// Claim this wait for `case`. Fails if already claimed or aborted.
    pub fn try_select(&self, case: usize) -> bool {
        self.state
            .compare_exchange(WAITING, case + CASE_BASE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Withdraw the wait. Fails if someone claimed it first.
    pub fn try_abort(&self) -> bool {
        self.state
            .compare_exchange(WAITING, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The case that claimed this wait, if any.
    pub fn selected(&self) -> Option<usize> {
        match self.state.load(Ordering::Acquire) {
            WAITING | ABORTED => None,
            n => Some(n - CASE_BASE),
        }
    }

    pub fn waker(&self) -> Waker {
        self.waker.lock().clone()
    }

    pub fn update_waker(&self, waker: &Waker) {
        let mut current = self.waker.lock();
        if !current.will_wake(waker) {
            *current = waker.clone();
        }
    }

    pub fn notify(&self) {
        self.waker().wake();
    }
}

/// Hand-off cell between a parked operation and its counterpart.
///
/// A parked sender's packet holds its value until a receiver takes it; a
/// parked receiver's packet is filled by the sender that claims it.
pub(crate) struct Packet<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Packet<T> {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
        })
    }

    pub fn with(value: T) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Some(value)),
        })
    }

    pub fn put(&self, value: T) {
        *self.slot.lock() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }
}

/// One entry in a channel's sender or receiver queue.
pub(crate) struct Waiter<T> {
    pub signal: Arc<Signal>,
    pub case: usize,
    pub packet: Arc<Packet<T>>,
}

impl<T> Waiter<T> {
    pub fn new(signal: &Arc<Signal>, case: usize, packet: &Arc<Packet<T>>) -> Self {
        Self {
            signal: signal.clone(),
            case,
            packet: packet.clone(),
        }
    }

    pub fn belongs_to(&self, signal: &Arc<Signal>) -> bool {
        Arc::ptr_eq(&self.signal, signal)
    }
}

/// Signals claimed under a channel lock, notified once the lock is gone.
#[derive(Default)]
pub(crate) struct Wakeups {
    signals: Vec<Arc<Signal>>,
}

impl Wakeups {
    pub fn push(&mut self, signal: Arc<Signal>) {
        self.signals.push(signal);
    }

    pub fn fire(self) {
        for signal in self.signals {
            signal.notify();
        }
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Selected(usize),
    TimedOut,
    Cancelled,
}

struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

/// Waker that unparks the calling thread.
pub(crate) fn thread_waker() -> Waker {
    Waker::from(Arc::new(ThreadWaker(thread::current())))
}

/// Park the calling thread until `signal` is claimed, the deadline
/// passes, or `cancel` fires. The signal must carry `thread_waker()`.
pub(crate) fn block_until_selected(
    signal: &Signal,
    deadline: Option<Instant>,
    cancel: Option<&CancelToken>,
) -> WaitOutcome {
    crate::pool::warn_if_worker_thread("blocking channel wait");

    let key = cancel.and_then(|token| token.register(&signal.waker()));
    let outcome = loop {
        if let Some(case) = signal.selected() {
            break WaitOutcome::Selected(case);
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            if signal.try_abort() {
                break WaitOutcome::Cancelled;
            }
            continue;
        }
        match deadline {
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    if signal.try_abort() {
                        break WaitOutcome::TimedOut;
                    }
                    continue;
                }
                thread::park_timeout(at - now);
            }
            None => thread::park(),
        }
    };

    if let (Some(token), Some(key)) = (cancel, key) {
        token.unregister(key);
    }
    outcome
}

/// Async side of a wait: the signal plus the cancel and deadline hooks
/// that wake the owning task. Dropping it releases both hooks.
pub(crate) struct Suspension {
    signal: Arc<Signal>,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
    cancel_key: Option<WakerKey>,
    timer: Option<TimerEntry>,
}

impl Suspension {
    pub fn begin(signal: Arc<Signal>, ctx: &Ctx, waker: &Waker) -> Self {
        let cancel = ctx.cancel_token().cloned();
        let cancel_key = cancel.as_ref().and_then(|token| token.register(waker));
        let timer = ctx
            .deadline()
            .map(|at| crate::pool::timer::wake_at(at, waker.clone()));
        Self {
            signal,
            deadline: ctx.deadline(),
            cancel,
            cancel_key,
            timer,
        }
    }

    pub fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    pub fn poll_outcome(&mut self, cx: &mut Context<'_>) -> Poll<WaitOutcome> {
        self.signal.update_waker(cx.waker());
        loop {
            if let Some(case) = self.signal.selected() {
                return Poll::Ready(WaitOutcome::Selected(case));
            }
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                if self.signal.try_abort() {
                    return Poll::Ready(WaitOutcome::Cancelled);
                }
                continue;
            }
            if self.deadline.is_some_and(|at| Instant::now() >= at) {
                if self.signal.try_abort() {
                    return Poll::Ready(WaitOutcome::TimedOut);
                }
                continue;
            }
            return Poll::Pending;
        }
    }
}

impl Drop for Suspension {
    fn drop(&mut self) {
        if let (Some(token), Some(key)) = (&self.cancel, self.cancel_key) {
            token.unregister(key);
        }
        self.timer.take();
    }
}

/// Poll a future to completion on the calling thread.
///
/// For callers outside the pool; inside a task, `.await` instead.
pub fn block_on<F: Future>(future: F) -> F::Output {
    crate::pool::warn_if_worker_thread("block_on");
    let mut future = std::pin::pin!(future);
    let waker = thread_waker();
    let mut cx = Context::from_waker(&waker);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(out) => return out,
            Poll::Pending => thread::park(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn claim_once() {
        let signal = Signal::new(thread_waker());
        assert!(signal.is_waiting());
        assert!(signal.try_select(3));
        assert!(!signal.try_select(1));
        assert!(!signal.try_abort());
        assert_eq!(signal.selected(), Some(3));
    }

    #[test]
    fn abort_blocks_claims() {
        let signal = Signal::new(thread_waker());
        assert!(signal.try_abort());
        assert!(!signal.try_select(0));
        assert_eq!(signal.selected(), None);
    }

    #[test]
    fn packet_hand_off() {
        let packet = Packet::empty();
        packet.put(5);
        assert_eq!(packet.take(), Some(5));
        assert_eq!(packet.take(), None);
        assert_eq!(Packet::with("v").take(), Some("v"));
    }

    #[test]
    fn blocked_thread_wakes_on_claim() {
        let signal = Signal::new(thread_waker());
        let remote = signal.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            assert!(remote.try_select(1));
            remote.notify();
        });
        assert_eq!(
            block_until_selected(&signal, None, None),
            WaitOutcome::Selected(1)
        );
        t.join().unwrap();
    }

    #[test]
    fn blocked_thread_times_out() {
        let signal = Signal::new(thread_waker());
        let start = Instant::now();
        let deadline = start + Duration::from_millis(10);
        assert_eq!(
            block_until_selected(&signal, Some(deadline), None),
            WaitOutcome::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert!(!signal.try_select(0));
    }

    #[test]
    fn blocked_thread_cancelled() {
        let signal = Signal::new(thread_waker());
        let token = CancelToken::new();
        let remote = token.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.cancel();
        });
        assert_eq!(
            block_until_selected(&signal, None, Some(&token)),
            WaitOutcome::Cancelled
        );
        t.join().unwrap();
    }

    #[test]
    fn block_on_ready_future() {
        assert_eq!(block_on(async { 40 + 2 }), 42);
    }
}
