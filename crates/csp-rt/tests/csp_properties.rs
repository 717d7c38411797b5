// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! End-to-end behaviour of channels, pool, blocking runner and select.

use std::thread;
use std::time::{Duration, Instant};

use csp_rt::{
    spawn_blocking, Channel, Ctx, JoinError, OverflowPolicy, Pool, PoolConfig, RecvError, Select,
    SelectOutcome, SuspendReason, TaskStatus,
};

fn wait_until(what: &str, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while !f() {
        assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for {}", what);
        thread::yield_now();
    }
}

#[test]
fn block_policy_sender_waits_for_room() {
    for capacity in [0usize, 1, 3] {
        let ch = Channel::new(capacity, OverflowPolicy::Block);
        for i in 0..capacity {
            ch.send_blocking(i).unwrap();
        }
        let tx = ch.clone();
        let sender = thread::spawn(move || tx.send_blocking(capacity));
        wait_until("sender to park", || ch.waiting_senders() == 1);
        assert!(!sender.is_finished());

        for i in 0..=capacity {
            assert_eq!(ch.recv_blocking(), Ok(Some(i)));
        }
        sender.join().unwrap().unwrap();
    }
}

#[test]
fn fifo_round_trip() {
    let ch = Channel::bounded(3);
    for v in ["a", "b", "c"] {
        ch.send_blocking(v).unwrap();
    }
    let got: Vec<_> = (0..3).map(|_| ch.recv_blocking().unwrap().unwrap()).collect();
    assert_eq!(got, ["a", "b", "c"]);
}

#[test]
fn drop_oldest_keeps_latest() {
    let ch = Channel::new(1, OverflowPolicy::DropOldest);
    ch.send_blocking('x').unwrap();
    ch.send_blocking('y').unwrap();
    assert_eq!(ch.recv_blocking(), Ok(Some('y')));
    assert!(ch.is_empty());
}

#[test]
fn drop_newest_keeps_first() {
    let ch = Channel::new(1, OverflowPolicy::DropNewest);
    ch.send_blocking('x').unwrap();
    ch.send_blocking('y').unwrap();
    assert_eq!(ch.recv_blocking(), Ok(Some('x')));
    assert!(ch.is_empty());
}

#[test]
fn close_then_drain() {
    let ch = Channel::bounded(2);
    ch.send_blocking(1).unwrap();
    ch.send_blocking(2).unwrap();
    assert!(ch.close());
    assert!(!ch.close());
    assert_eq!(ch.recv_blocking(), Ok(Some(1)));
    assert_eq!(ch.recv_blocking(), Ok(Some(2)));
    assert_eq!(ch.recv_blocking(), Ok(None));
    assert!(ch.send_blocking(3).unwrap_err().is_closed());
}

#[test]
fn select_is_fair_over_two_ready_channels() {
    let a = Channel::new(1, OverflowPolicy::DropOldest);
    let b = Channel::new(1, OverflowPolicy::DropOldest);
    let mut wins = [0u32; 2];
    for _ in 0..10_000 {
        a.send_blocking("a").unwrap();
        b.send_blocking("b").unwrap();
        let mut sel = Select::new();
        let ca = sel.recv(&a);
        sel.recv(&b);
        match sel.wait_blocking().unwrap() {
            SelectOutcome::Received { case, value: Some(_) } => {
                wins[usize::from(case != ca)] += 1;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert!((4_600..=5_400).contains(&wins[0]), "distribution {:?}", wins);
}

#[test]
fn cancelling_a_suspended_receiver() {
    let pool = Pool::new(PoolConfig::new().workers(2)).unwrap();
    let ch = Channel::<u32>::rendezvous();
    let rx = ch.clone();
    let task = pool.spawn(async move { rx.recv().await });

    wait_until("task to suspend", || {
        task.status() == TaskStatus::Suspended(SuspendReason::ReceiveBlocked(ch.id()))
    });
    assert_eq!(ch.waiting_receivers(), 1);

    task.cancel();
    wait_until("task to finish", || task.is_finished());
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert_eq!(ch.waiting_receivers(), 0);
    assert_eq!(task.join(), Err(JoinError::Cancelled));
}

#[test]
fn receive_deadline_times_out() {
    let ch = Channel::<u32>::bounded(1);
    let start = Instant::now();
    let ctx = Ctx::background().with_timeout(Duration::from_millis(10));
    assert_eq!(ch.recv_blocking_with(&ctx), Err(RecvError::TimedOut));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(10));
    assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
    assert_eq!(ch.waiting_receivers(), 0);
}

#[test]
fn async_receive_deadline_times_out_on_pool() {
    let pool = Pool::new(PoolConfig::new().workers(1)).unwrap();
    let ch = Channel::<u32>::bounded(1);
    let rx = ch.clone();
    let task = pool.spawn(async move {
        let start = Instant::now();
        let ctx = Ctx::background().with_timeout(Duration::from_millis(10));
        (rx.recv_with(ctx).await, start.elapsed())
    });
    let (result, elapsed) = task.join().unwrap();
    assert_eq!(result, Err(RecvError::TimedOut));
    assert!(elapsed >= Duration::from_millis(10));
    assert_eq!(ch.waiting_receivers(), 0);
}

#[test]
fn pipeline_across_domains() {
    let pool = Pool::new(PoolConfig::new().workers(2)).unwrap();
    let numbers = Channel::bounded(4);
    let squares = Channel::bounded(4);

    let tx = numbers.clone();
    let producer = pool.spawn(async move {
        for i in 1..=100u64 {
            tx.send(i).await.unwrap();
        }
        tx.close();
    });

    let (rx, out) = (numbers.clone(), squares.clone());
    let squarer = pool.spawn(async move {
        while let Some(n) = rx.recv().await.unwrap() {
            out.send(n * n).await.unwrap();
        }
        out.close();
    });

    let rx = squares.clone();
    let sink = spawn_blocking(move || {
        let mut total = 0;
        while let Some(sq) = rx.recv_blocking().unwrap() {
            total += sq;
        }
        total
    });

    assert_eq!(sink.join(), Ok((1..=100u64).map(|n| n * n).sum::<u64>()));
    producer.join().unwrap();
    squarer.join().unwrap();
    pool.shutdown();
    let stats = pool.stats();
    assert_eq!((stats.spawned, stats.completed, stats.live), (2, 2, 0));
}

#[test]
fn select_from_pool_task_with_send_and_receive_cases() {
    let pool = Pool::new(PoolConfig::new().workers(2)).unwrap();
    let inbox = Channel::<i32>::rendezvous();
    let outbox = Channel::<i32>::rendezvous();

    let (i, o) = (inbox.clone(), outbox.clone());
    let task = pool.spawn(async move {
        let mut sel = Select::new();
        let recv_case = sel.recv(&i);
        let send_case = sel.send(&o, 99);
        let outcome = sel.wait().await.unwrap();
        (outcome, recv_case, send_case)
    });

    wait_until("select to park", || {
        inbox.waiting_receivers() == 1 && outbox.waiting_senders() == 1
    });
    assert_eq!(outbox.recv_blocking(), Ok(Some(99)));

    let (outcome, _, send_case) = task.join().unwrap();
    assert_eq!(outcome, SelectOutcome::Sent { case: send_case });
    assert_eq!(inbox.waiting_receivers(), 0);
    assert_eq!(inbox.try_send(1).unwrap_err().into_inner(), 1);
}
