// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! M:N cooperative scheduler.
//!
//! N worker threads each own a local queue of task ids. When idle,
//! workers steal from a random peer or drain the global injection queue.
//! A task that cannot make progress returns `Pending` and the worker moves
//! on; its waker queues it again.

use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Wake, Waker};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tracing::{debug, info, trace, warn};

use super::arena::{Arena, TaskId};
use super::handle::TaskHandle;
use super::queue::{InjectorQueue, LocalQueue};
use super::task::{PollResult, TaskRecord, TaskState};
use super::timer::{self, Timer};
use crate::config::PoolConfig;
use crate::error::PoolError;

/// Idle workers re-check for work at least this often.
const IDLE_PARK: Duration = Duration::from_millis(5);

static NEXT_POOL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// `(pool key, worker index)` on worker threads.
    static WORKER: Cell<Option<(u64, usize)>> = const { Cell::new(None) };
}

pub(crate) fn on_worker_thread() -> bool {
    WORKER.with(|w| w.get().is_some())
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub spawned: u64,
    /// Finished normally.
    pub completed: u64,
    pub cancelled: u64,
    pub panicked: u64,
    /// Spawned and not yet finished.
    pub live: usize,
    /// Ids waiting in ready queues.
    pub queued: usize,
}

/// A cooperative worker pool.
///
/// Created explicitly; there is no global pool. Dropping the pool cancels
/// whatever is still running and joins its threads.
pub struct Pool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// State shared between workers, wakers and handles.
pub(crate) struct PoolShared {
    key: u64,
    steal: bool,
    tasks: Mutex<Arena<Arc<TaskRecord>>>,
    /// Signalled when `tasks` becomes empty.
    all_done: Condvar,
    local_queues: Vec<LocalQueue>,
    global_queue: InjectorQueue,
    timer: Arc<Timer>,
    spawned: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
    shutdown: AtomicBool,
    work_available: (Mutex<bool>, Condvar),
}

impl Pool {
    /// Start the worker threads and the timer thread.
    pub fn new(config: PoolConfig) -> Result<Pool, PoolError> {
        let workers = config.resolved_workers();
        let (timer, timer_thread) = Timer::start(format!("{}-timer", config.thread_name))
            .map_err(|source| PoolError::Spawn {
                role: "timer",
                source,
            })?;

        let shared = Arc::new(PoolShared {
            key: NEXT_POOL.fetch_add(1, Ordering::Relaxed),
            steal: config.steal,
            tasks: Mutex::new(Arena::new()),
            all_done: Condvar::new(),
            local_queues: (0..workers).map(|_| LocalQueue::new()).collect(),
            global_queue: InjectorQueue::new(),
            timer,
            spawned: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            work_available: (Mutex::new(false), Condvar::new()),
        });

        let mut threads = Vec::with_capacity(workers + 1);
        threads.push(timer_thread);
        for id in 0..workers {
            let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name, id));
            if let Some(size) = config.stack_size {
                builder = builder.stack_size(size);
            }
            let worker_shared = shared.clone();
            match builder.spawn(move || worker_loop(id, &worker_shared)) {
                Ok(handle) => threads.push(handle),
                Err(source) => {
                    shared.stop();
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn {
                        role: "worker",
                        source,
                    });
                }
            }
        }

        info!(workers, steal = config.steal, "pool started");
        Ok(Pool {
            shared,
            threads: Mutex::new(threads),
        })
    }

    pub fn workers(&self) -> usize {
        self.shared.local_queues.len()
    }

    /// Spawn a cooperative task.
    ///
    /// The future must not block its thread; use the async channel and
    /// select operations, and `spawn_blocking` for blocking work. After
    /// shutdown the task is cancelled without running.
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();
        let wrapped = async move {
            let value = future.await;
            *slot.lock() = Some(value);
        };

        let record = {
            let mut tasks = self.shared.tasks.lock();
            let record = Arc::new(TaskRecord::new(tasks.next_id(), Box::pin(wrapped)));
            tasks.insert(record.clone());
            record
        };
        self.shared.spawned.fetch_add(1, Ordering::Relaxed);
        trace!(task = %record.id, "spawned");

        if self.shared.shutdown.load(Ordering::Acquire) {
            record.cancel.cancel();
            record.drop_future();
            self.shared.retire(&record, TaskState::Cancelled);
        } else {
            self.shared.enqueue(record.id);
        }
        TaskHandle::new(record, result, Arc::downgrade(&self.shared))
    }

    /// Drive `future` to completion on the calling thread. Deadlines inside
    /// it use this pool's timer.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let _timer = timer::enter(self.shared.timer.clone());
        crate::waiter::block_on(future)
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            workers: shared.local_queues.len(),
            spawned: shared.spawned.load(Ordering::Relaxed),
            completed: shared.completed.load(Ordering::Relaxed),
            cancelled: shared.cancelled.load(Ordering::Relaxed),
            panicked: shared.panicked.load(Ordering::Relaxed),
            live: shared.tasks.lock().len(),
            queued: shared.global_queue.len()
                + shared.local_queues.iter().map(LocalQueue::len).sum::<usize>(),
        }
    }

    /// Wait for every task to finish, then stop the threads.
    ///
    /// Calling this from one of the pool's own tasks deadlocks.
    pub fn shutdown(&self) {
        {
            let mut tasks = self.shared.tasks.lock();
            while !tasks.is_empty() {
                self.shared.all_done.wait(&mut tasks);
            }
        }
        self.join_threads();
    }

    /// Cancel every live task, wait for them to unwind, then stop.
    pub fn shutdown_now(&self) {
        let live: Vec<Arc<TaskRecord>> = self.shared.tasks.lock().values().cloned().collect();
        if !live.is_empty() {
            debug!(tasks = live.len(), "cancelling live tasks");
        }
        for record in &live {
            record.cancel.cancel();
            if record.wake() {
                self.shared.enqueue(record.id);
            }
        }
        self.shutdown();
    }

    fn join_threads(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        self.shared.stop();
        for handle in threads {
            let _ = handle.join();
        }
        let stats = self.stats();
        info!(
            spawned = stats.spawned,
            completed = stats.completed,
            cancelled = stats.cancelled,
            panicked = stats.panicked,
            "pool stopped"
        );
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("stats", &self.stats()).finish()
    }
}

impl PoolShared {
    /// Queue a runnable task: on the current worker's local queue when
    /// called from one of our workers, else on the global queue.
    pub(crate) fn enqueue(&self, id: TaskId) {
        let local = WORKER.with(|w| match w.get() {
            Some((key, worker)) if key == self.key => Some(worker),
            _ => None,
        });
        match local {
            Some(worker) => {
                if let Err(id) = self.local_queues[worker].push(id) {
                    self.global_queue.push(id);
                }
            }
            None => self.global_queue.push(id),
        }
        let (lock, cvar) = &self.work_available;
        *lock.lock() = true;
        cvar.notify_one();
    }

    /// Record a terminal state and release the arena slot.
    fn retire(&self, record: &TaskRecord, state: TaskState) {
        record.finish(state);
        let counter = match state {
            TaskState::Cancelled => &self.cancelled,
            _ if record.panic_message().is_some() => &self.panicked,
            _ => &self.completed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        trace!(task = %record.id, ?state, "task finished");

        let mut tasks = self.tasks.lock();
        tasks.remove(record.id);
        if tasks.is_empty() {
            self.all_done.notify_all();
        }
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.timer.shutdown();
        let (lock, cvar) = &self.work_available;
        *lock.lock() = true;
        cvar.notify_all();
    }

    fn lookup(&self, id: TaskId) -> Option<Arc<TaskRecord>> {
        self.tasks.lock().get(id).cloned()
    }
}

/// Queue `record` on its pool if the wake made it runnable.
pub(crate) fn schedule(pool: &Weak<PoolShared>, record: &TaskRecord) {
    if record.wake() {
        if let Some(pool) = pool.upgrade() {
            pool.enqueue(record.id);
        }
    }
}

struct TaskWaker {
    record: Arc<TaskRecord>,
    pool: Weak<PoolShared>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        schedule(&self.pool, &self.record);
    }
}

fn worker_loop(id: usize, shared: &Arc<PoolShared>) {
    WORKER.with(|w| w.set(Some((shared.key, id))));
    let _timer = timer::enter(shared.timer.clone());
    let local = &shared.local_queues[id];
    let workers = shared.local_queues.len();
    let mut rng = rand::thread_rng();

    loop {
        if let Some(task) = local.pop() {
            run_task(task, shared);
            continue;
        }

        if shared.steal && workers > 1 {
            let victim = rng.gen_range(0..workers);
            if victim != id {
                let mut stolen = shared.local_queues[victim].steal_batch().into_iter();
                if let Some(first) = stolen.next() {
                    for task in stolen {
                        if let Err(task) = local.push(task) {
                            shared.global_queue.push(task);
                        }
                    }
                    run_task(first, shared);
                    continue;
                }
            }
        }

        if let Some(task) = shared.global_queue.pop() {
            run_task(task, shared);
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let (lock, cvar) = &shared.work_available;
        let mut ready = lock.lock();
        if !*ready && shared.global_queue.is_empty() && local.is_empty() {
            cvar.wait_for(&mut ready, IDLE_PARK);
        }
        *ready = false;
    }
    WORKER.with(|w| w.set(None));
}

/// Poll one task and act on the result.
fn run_task(id: TaskId, shared: &Arc<PoolShared>) {
    // A finished task's id can linger in a queue.
    let Some(record) = shared.lookup(id) else { return };
    if !record.begin_poll() {
        return;
    }
    if record.cancel.is_cancelled() {
        cancel_task(&record, shared);
        return;
    }

    let waker = Waker::from(Arc::new(TaskWaker {
        record: record.clone(),
        pool: Arc::downgrade(shared),
    }));
    match record.poll(&waker) {
        PollResult::Ready => shared.retire(&record, TaskState::Completed),
        PollResult::Panicked(message) => {
            warn!(task = %id, panic = %message, "task panicked");
            record.set_panic(message);
            shared.retire(&record, TaskState::Completed);
        }
        PollResult::Pending => {
            if record.cancel.is_cancelled() {
                cancel_task(&record, shared);
            } else if record.suspend() {
                shared.enqueue(id);
            } else {
                trace!(task = %id, status = ?record.status(), "task suspended");
            }
        }
    }
}

fn cancel_task(record: &TaskRecord, shared: &PoolShared) {
    debug!(task = %record.id, "task cancelled");
    record.drop_future();
    shared.retire(record, TaskState::Cancelled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use std::sync::atomic::AtomicUsize;

    fn pool(workers: usize) -> Pool {
        Pool::new(PoolConfig::new().workers(workers)).unwrap()
    }

    #[test]
    fn spawn_and_shutdown() {
        let pool = pool(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = counter.clone();
            pool.spawn(async move {
                c.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        let stats = pool.stats();
        assert_eq!((stats.spawned, stats.completed, stats.live), (10, 10, 0));
    }

    #[test]
    fn default_worker_count() {
        let pool = Pool::new(PoolConfig::default()).unwrap();
        assert!(pool.workers() >= 1);
        pool.shutdown();
    }

    #[test]
    fn many_tasks_few_workers() {
        let pool = pool(2);
        let ch = Channel::bounded(8);
        let mut handles = Vec::new();
        for i in 0..200u64 {
            let tx = ch.clone();
            handles.push(pool.spawn(async move { tx.send(i).await.is_ok() }));
        }
        let rx = ch.clone();
        let sum = pool.spawn(async move {
            let mut sum = 0;
            for _ in 0..200 {
                sum += rx.recv().await.unwrap().unwrap();
            }
            sum
        });
        assert_eq!(sum.join().unwrap(), (0..200).sum::<u64>());
        for h in handles {
            assert!(h.join().unwrap());
        }
    }

    #[test]
    fn rendezvous_ping_pong_on_one_worker() {
        let pool = pool(1);
        let ping = Channel::rendezvous();
        let pong = Channel::rendezvous();
        let (p1, q1) = (ping.clone(), pong.clone());
        let a = pool.spawn(async move {
            for i in 0..100 {
                p1.send(i).await.unwrap();
                assert_eq!(q1.recv().await.unwrap(), Some(i + 1));
            }
        });
        let b = pool.spawn(async move {
            for _ in 0..100 {
                let v = ping.recv().await.unwrap().unwrap();
                pong.send(v + 1).await.unwrap();
            }
        });
        a.join().unwrap();
        b.join().unwrap();
    }

    #[test]
    fn panics_become_join_errors() {
        let pool = pool(1);
        let h: TaskHandle<()> = pool.spawn(async { panic!("kaput") });
        match h.join() {
            Err(crate::error::JoinError::Panicked(msg)) => assert!(msg.contains("kaput")),
            other => panic!("expected a panic, got {:?}", other),
        }
        let ok = pool.spawn(async { 7 });
        assert_eq!(ok.join().unwrap(), 7);
        assert_eq!(pool.stats().panicked, 1);
    }

    #[test]
    fn shutdown_now_cancels_suspended_tasks() {
        let pool = pool(2);
        let ch = Channel::<u8>::rendezvous();
        let rx = ch.clone();
        let h = pool.spawn(async move { rx.recv().await });
        while ch.waiting_receivers() == 0 {
            thread::yield_now();
        }
        pool.shutdown_now();
        assert_eq!(h.join(), Err(crate::error::JoinError::Cancelled));
        assert_eq!(ch.waiting_receivers(), 0);
        assert_eq!(pool.stats().cancelled, 1);
    }

    #[test]
    fn spawn_after_shutdown_is_cancelled() {
        let pool = pool(1);
        pool.shutdown();
        let h = pool.spawn(async { 1 });
        assert_eq!(h.join(), Err(crate::error::JoinError::Cancelled));
    }

    #[test]
    fn block_on_uses_pool_timer() {
        let pool = pool(1);
        let ch = Channel::<u8>::bounded(1);
        let ctx = crate::context::Ctx::background().with_timeout(Duration::from_millis(10));
        let result = pool.block_on(ch.recv_with(ctx));
        assert_eq!(result, Err(crate::error::RecvError::TimedOut));
        assert_eq!(ch.waiting_receivers(), 0);
    }
}
