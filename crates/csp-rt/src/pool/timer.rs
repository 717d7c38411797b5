// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Deadline wake-ups for suspended tasks.
//!
//! Each pool runs one timer thread over a min-heap of deadlines. Futures
//! polled outside any pool share one process-wide timer, started on first
//! use.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::sync::{Arc, OnceLock, Weak};
use std::task::Waker;
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// Below this many heap entries, cancelled keys are left for the timer
/// thread to pop.
const COMPACT_MIN: usize = 64;

pub(crate) struct Timer {
    state: Mutex<TimerState>,
    cvar: Condvar,
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    wakers: HashMap<u64, Waker>,
    next_key: u64,
    shutdown: bool,
}

impl Timer {
    /// Start the timer thread.
    pub fn start(name: String) -> io::Result<(Arc<Timer>, thread::JoinHandle<()>)> {
        let timer = Arc::new(Timer {
            state: Mutex::new(TimerState::default()),
            cvar: Condvar::new(),
        });
        let runner = timer.clone();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || runner.run())?;
        Ok((timer, handle))
    }

    pub fn register(self: &Arc<Self>, at: Instant, waker: Waker) -> TimerEntry {
        let mut state = self.state.lock();
        let key = state.next_key;
        state.next_key += 1;
        let earliest = state.heap.peek().map_or(true, |Reverse((first, _))| at < *first);
        state.heap.push(Reverse((at, key)));
        state.wakers.insert(key, waker);
        drop(state);
        if earliest {
            self.cvar.notify_one();
        }
        TimerEntry {
            timer: Arc::downgrade(self),
            key,
        }
    }

    fn cancel(&self, key: u64) {
        let mut state = self.state.lock();
        if state.wakers.remove(&key).is_none() {
            return;
        }
        let TimerState { heap, wakers, .. } = &mut *state;
        if heap.len() > COMPACT_MIN && heap.len() > 2 * wakers.len() {
            heap.retain(|Reverse((_, key))| wakers.contains_key(key));
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.state.lock().wakers.len()
    }

    #[cfg(test)]
    fn heap_len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.cvar.notify_all();
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                break;
            }
            let now = Instant::now();
            let mut due = Vec::new();
            while let Some(Reverse((at, key))) = state.heap.peek().copied() {
                let cancelled = !state.wakers.contains_key(&key);
                if !cancelled && at > now {
                    break;
                }
                state.heap.pop();
                if let Some(waker) = state.wakers.remove(&key) {
                    due.push(waker);
                }
            }
            if !due.is_empty() {
                drop(state);
                for waker in due {
                    waker.wake();
                }
                state = self.state.lock();
                continue;
            }
            let next = state.heap.peek().map(|Reverse((at, _))| *at);
            match next {
                Some(at) => {
                    self.cvar.wait_until(&mut state, at);
                }
                None => self.cvar.wait(&mut state),
            }
        }
        tracing::trace!(dropped = state.wakers.len(), "timer thread exiting");
    }
}

/// A scheduled wake-up. Dropping it cancels the wake-up.
pub(crate) struct TimerEntry {
    timer: Weak<Timer>,
    key: u64,
}

impl TimerEntry {
    /// Let the wake-up fire even though nobody holds the entry.
    pub fn detach(mut self) {
        self.timer = Weak::new();
    }
}

impl Drop for TimerEntry {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.upgrade() {
            timer.cancel(self.key);
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<Timer>>> = const { RefCell::new(None) };
}

/// Makes `timer` the one `wake_at` uses on this thread until dropped.
pub(crate) struct EnterGuard {
    previous: Option<Arc<Timer>>,
}

pub(crate) fn enter(timer: Arc<Timer>) -> EnterGuard {
    let previous = CURRENT.with(|cell| cell.borrow_mut().replace(timer));
    EnterGuard { previous }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cell| *cell.borrow_mut() = previous);
    }
}

static FALLBACK: OnceLock<Option<Arc<Timer>>> = OnceLock::new();

/// Timer for deadlines set outside any pool. Its thread lives for the
/// rest of the process.
fn fallback_timer() -> Option<&'static Arc<Timer>> {
    FALLBACK
        .get_or_init(|| match Timer::start("csp-timer".to_string()) {
            Ok((timer, _thread)) => Some(timer),
            Err(e) => {
                // Waiters still check the clock on every poll; they just are
                // not woken exactly at the deadline.
                tracing::warn!(error = %e, "could not spawn timer thread");
                None
            }
        })
        .as_ref()
}

/// Wake `waker` at `at`, on the current pool's timer if there is one.
pub(crate) fn wake_at(at: Instant, waker: Waker) -> TimerEntry {
    if let Some(timer) = CURRENT.with(|cell| cell.borrow().clone()) {
        return timer.register(at, waker);
    }
    match fallback_timer() {
        Some(timer) => timer.register(at, waker),
        None => TimerEntry {
            timer: Weak::new(),
            key: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;
    use std::time::Duration;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> (Arc<Counter>, Waker) {
        let c = Arc::new(Counter(AtomicUsize::new(0)));
        let w = Waker::from(c.clone());
        (c, w)
    }

    fn wait_for(c: &Counter, n: usize) {
        let start = Instant::now();
        while c.0.load(Ordering::SeqCst) < n {
            assert!(start.elapsed() < Duration::from_secs(5), "timer never fired");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn fires_in_deadline_order() {
        let (timer, handle) = Timer::start("timer-test".into()).unwrap();
        let (c, w) = counter();
        let now = Instant::now();
        let _late = timer.register(now + Duration::from_millis(20), w.clone());
        let _early = timer.register(now + Duration::from_millis(5), w);
        wait_for(&c, 2);
        assert!(now.elapsed() >= Duration::from_millis(20));
        assert_eq!(timer.pending(), 0);
        timer.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn dropped_entry_does_not_fire() {
        let (timer, handle) = Timer::start("timer-test".into()).unwrap();
        let (c, w) = counter();
        let entry = timer.register(Instant::now() + Duration::from_millis(10), w);
        drop(entry);
        assert_eq!(timer.pending(), 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(c.0.load(Ordering::SeqCst), 0);
        timer.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn detached_fallback_fires() {
        let (c, w) = counter();
        let _entry = wake_at(Instant::now() + Duration::from_millis(5), w);
        wait_for(&c, 1);
    }

    #[test]
    fn cancelled_entries_leave_the_heap() {
        let (timer, handle) = Timer::start("timer-test".into()).unwrap();
        let (_c, w) = counter();
        let far = Instant::now() + Duration::from_secs(60);
        let entries: Vec<_> = (0..1_000).map(|_| timer.register(far, w.clone())).collect();
        assert_eq!(timer.heap_len(), 1_000);
        drop(entries);
        assert_eq!(timer.pending(), 0);
        assert!(timer.heap_len() <= COMPACT_MIN, "heap kept {}", timer.heap_len());
        timer.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn cancelled_head_is_skipped() {
        let (timer, handle) = Timer::start("timer-test".into()).unwrap();
        let (c, w) = counter();
        let now = Instant::now();
        let early = timer.register(now + Duration::from_millis(5), w.clone());
        let _late = timer.register(now + Duration::from_millis(15), w);
        drop(early);
        wait_for(&c, 1);
        assert_eq!(c.0.load(Ordering::SeqCst), 1);
        assert_eq!(timer.heap_len(), 0);
        timer.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn off_pool_deadlines_share_one_timer() {
        let (_c, w) = counter();
        let far = Instant::now() + Duration::from_secs(60);
        let first = wake_at(far, w.clone());
        let second = wake_at(far, w);
        let shared = fallback_timer().unwrap();
        for entry in [&first, &second] {
            assert!(entry.timer.upgrade().is_some_and(|t| Arc::ptr_eq(&t, shared)));
        }
    }

    #[test]
    fn detached_entry_still_fires() {
        let (timer, handle) = Timer::start("timer-test".into()).unwrap();
        let (c, w) = counter();
        timer.register(Instant::now() + Duration::from_millis(5), w).detach();
        assert_eq!(timer.pending(), 1);
        wait_for(&c, 1);
        timer.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn enter_routes_to_pool_timer() {
        let (timer, handle) = Timer::start("timer-test".into()).unwrap();
        let (c, w) = counter();
        {
            let _guard = enter(timer.clone());
            let _entry = wake_at(Instant::now() + Duration::from_secs(60), w);
            assert_eq!(timer.pending(), 1);
        }
        assert_eq!(timer.pending(), 0);
        assert_eq!(c.0.load(Ordering::SeqCst), 0);
        timer.shutdown();
        handle.join().unwrap();
    }
}
