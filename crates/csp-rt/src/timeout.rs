// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Sleep and timeout channels.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::pool::task::{note_suspended, SuspendReason};
use crate::pool::timer::{self, TimerEntry};

/// Suspend the current task for `duration`.
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        entry: None,
        waker: None,
    }
}

/// Future returned by [`sleep`].
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    deadline: Instant,
    entry: Option<TimerEntry>,
    waker: Option<Waker>,
}

impl Sleep {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            self.entry = None;
            return Poll::Ready(());
        }
        let registered = self.waker.as_ref().is_some_and(|w| w.will_wake(cx.waker()));
        if !registered {
            let deadline = self.deadline;
            self.entry = Some(timer::wake_at(deadline, cx.waker().clone()));
            self.waker = Some(cx.waker().clone());
        }
        note_suspended(SuspendReason::Sleeping);
        Poll::Pending
    }
}

struct Fire(Channel<()>);

impl Wake for Fire {
    fn wake(self: Arc<Self>) {
        let _ = self.0.try_send(());
        self.0.close();
    }
}

/// A channel that yields one `()` after `duration` and then closes.
///
/// Meant as a timeout case in a [`Select`](crate::select::Select): the
/// receive fires once the time is up.
pub fn after(duration: Duration) -> Channel<()> {
    let channel = Channel::bounded(1);
    let fire = Waker::from(Arc::new(Fire(channel.clone())));
    timer::wake_at(Instant::now() + duration, fire).detach();
    channel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::{Pool, SuspendReason, TaskStatus};
    use crate::select::{Select, SelectOutcome};
    use crate::waiter::block_on;

    #[test]
    fn sleep_off_pool() {
        let start = Instant::now();
        block_on(sleep(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn sleeping_task_reports_reason() {
        let pool = Pool::new(PoolConfig::new().workers(1)).unwrap();
        let h = pool.spawn(sleep(Duration::from_millis(50)));
        let start = Instant::now();
        while h.status() != TaskStatus::Suspended(SuspendReason::Sleeping) {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::yield_now();
        }
        h.join().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn after_fires_then_closes() {
        let ch = after(Duration::from_millis(5));
        assert_eq!(ch.recv_blocking(), Ok(Some(())));
        assert_eq!(ch.recv_blocking(), Ok(None));
    }

    #[test]
    fn after_as_select_timeout() {
        let work = Channel::<()>::bounded(1);
        let timeout = after(Duration::from_millis(10));
        let mut sel = Select::new();
        sel.recv(&work);
        let t = sel.recv(&timeout);
        let outcome = sel.wait_blocking().unwrap();
        assert_eq!(outcome, SelectOutcome::Received { case: t, value: Some(()) });
    }
}
