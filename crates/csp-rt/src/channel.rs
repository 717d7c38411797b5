// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channels.
//!
//! A `Channel<T>` is a cloneable handle to one shared queue; producers and
//! consumers hold the same handle. State (buffer, closed flag, both waiter
//! queues) sits behind one mutex that is held only for the transition
//! itself. Parked operations are woken after the lock is released.
//!
//! Each operation comes in three shapes:
//! - `send` / `recv`: futures for cooperative tasks; they suspend the task.
//! - `send_blocking` / `recv_blocking`: park the calling thread.
//! - `try_send` / `try_recv`: never wait.
//!
//! Cooperative tasks must not use the blocking shapes: a parked worker
//! thread cannot run any other task.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::buffer::{Buffer, Offer, OverflowPolicy};
use crate::context::Ctx;
use crate::error::{RecvError, SendError, TryRecvError, TrySendError};
use crate::pool::task::{note_suspended, SuspendReason};
use crate::waiter::{self, Packet, Signal, Suspension, WaitOutcome, Waiter, Wakeups};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identity, for diagnostics and select validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

pub(crate) enum SendAttempt<T> {
    Sent,
    Full(T),
    Closed(T),
}

pub(crate) enum RecvAttempt<T> {
    Item(T),
    Empty,
    Closed,
}

pub(crate) struct State<T> {
    buffer: Buffer<T>,
    closed: bool,
    senders: VecDeque<Waiter<T>>,
    receivers: VecDeque<Waiter<T>>,
}

impl<T> State<T> {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            buffer: Buffer::new(capacity, policy),
            closed: false,
            senders: VecDeque::new(),
            receivers: VecDeque::new(),
        }
    }

    /// Complete a send without waiting, if possible.
    ///
    /// A parked receiver only exists while the buffer is empty, so handing
    /// straight to the longest-waiting one keeps FIFO order.
    pub(crate) fn try_send(&mut self, value: T, id: ChannelId, wake: &mut Wakeups) -> SendAttempt<T> {
        if self.closed {
            return SendAttempt::Closed(value);
        }
        while let Some(receiver) = self.receivers.pop_front() {
            if receiver.signal.try_select(receiver.case) {
                receiver.packet.put(value);
                wake.push(receiver.signal);
                return SendAttempt::Sent;
            }
        }
        match self.buffer.offer(value) {
            Offer::Stored => SendAttempt::Sent,
            Offer::DroppedNewest(_) => {
                tracing::trace!(channel = %id, "buffer full, dropped newest item");
                SendAttempt::Sent
            }
            Offer::EvictedOldest(_) => {
                tracing::trace!(channel = %id, "buffer full, evicted oldest item");
                SendAttempt::Sent
            }
            Offer::Full(value) => SendAttempt::Full(value),
        }
    }

    /// Complete a receive without waiting, if possible.
    ///
    /// Taking from a full buffer frees a slot, which the longest-waiting
    /// parked sender fills.
    pub(crate) fn try_recv(&mut self, wake: &mut Wakeups) -> RecvAttempt<T> {
        if let Some(item) = self.buffer.pop() {
            while let Some(sender) = self.senders.pop_front() {
                if !sender.signal.try_select(sender.case) {
                    continue;
                }
                if let Some(value) = sender.packet.take() {
                    self.buffer.push_back(value);
                }
                wake.push(sender.signal);
                break;
            }
            return RecvAttempt::Item(item);
        }
        while let Some(sender) = self.senders.pop_front() {
            if !sender.signal.try_select(sender.case) {
                continue;
            }
            let value = sender.packet.take();
            wake.push(sender.signal);
            if let Some(value) = value {
                return RecvAttempt::Item(value);
            }
        }
        if self.closed {
            RecvAttempt::Closed
        } else {
            RecvAttempt::Empty
        }
    }

    /// Whether a receive would complete now. May report a parked sender
    /// that a concurrent select claims first; callers retry in that case.
    pub(crate) fn recv_ready(&self) -> bool {
        !self.buffer.is_empty() || self.closed || self.senders.iter().any(|w| w.signal.is_waiting())
    }

    pub(crate) fn send_ready(&self) -> bool {
        self.closed
            || self.buffer.accepts_without_waiting()
            || self.receivers.iter().any(|w| w.signal.is_waiting())
    }

    pub(crate) fn park_sender(&mut self, waiter: Waiter<T>) {
        self.senders.push_back(waiter);
    }

    pub(crate) fn park_receiver(&mut self, waiter: Waiter<T>) {
        self.receivers.push_back(waiter);
    }

    /// Drop every queue entry owned by `signal`.
    pub(crate) fn unpark(&mut self, signal: &Arc<Signal>) {
        self.senders.retain(|w| !w.belongs_to(signal));
        self.receivers.retain(|w| !w.belongs_to(signal));
    }

    /// Give back an item whose receive was abandoned after it was claimed.
    pub(crate) fn restore(&mut self, item: T, wake: &mut Wakeups) {
        while let Some(receiver) = self.receivers.pop_front() {
            if receiver.signal.try_select(receiver.case) {
                receiver.packet.put(item);
                wake.push(receiver.signal);
                return;
            }
        }
        self.buffer.push_front(item);
    }

    fn close(&mut self, wake: &mut Wakeups) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for waiter in self.senders.drain(..).chain(self.receivers.drain(..)) {
            if waiter.signal.try_select(waiter.case) {
                wake.push(waiter.signal);
            }
        }
        true
    }
}

pub(crate) struct Shared<T> {
    pub(crate) id: ChannelId,
    pub(crate) state: Mutex<State<T>>,
}

/// Typed, closable FIFO channel handle. Cloning shares the channel.
pub struct Channel<T> {
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("capacity", &state.buffer.capacity())
            .field("policy", &state.buffer.policy())
            .field("len", &state.buffer.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> Channel<T> {
    /// Create a channel holding at most `capacity` items.
    ///
    /// Capacity 0 is a rendezvous channel: a send completes only by
    /// handing its value to a receiver.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Channel {
            shared: Arc::new(Shared {
                id: ChannelId::next(),
                state: Mutex::new(State::new(capacity, policy)),
            }),
        }
    }

    /// Bounded channel whose senders wait when full.
    pub fn bounded(capacity: usize) -> Self {
        Self::new(capacity, OverflowPolicy::Block)
    }

    /// Unbuffered channel.
    pub fn rendezvous() -> Self {
        Self::new(0, OverflowPolicy::Block)
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().buffer.capacity()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.shared.state.lock().buffer.policy()
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Parked senders still waiting to be served.
    pub fn waiting_senders(&self) -> usize {
        let state = self.shared.state.lock();
        state.senders.iter().filter(|w| w.signal.is_waiting()).count()
    }

    /// Parked receivers still waiting to be served.
    pub fn waiting_receivers(&self) -> usize {
        let state = self.shared.state.lock();
        state.receivers.iter().filter(|w| w.signal.is_waiting()).count()
    }

    pub fn same_channel(&self, other: &Channel<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Close the channel. Returns false if it was already closed.
    ///
    /// Parked senders fail with `Closed`; parked receivers see
    /// closed-empty. Buffered items remain receivable.
    pub fn close(&self) -> bool {
        let mut wake = Wakeups::default();
        let closed = self.shared.state.lock().close(&mut wake);
        wake.fire();
        if closed {
            tracing::debug!(channel = %self.shared.id, "channel closed");
        }
        closed
    }

    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut wake = Wakeups::default();
        let attempt = self.shared.state.lock().try_send(value, self.shared.id, &mut wake);
        wake.fire();
        match attempt {
            SendAttempt::Sent => Ok(()),
            SendAttempt::Full(v) => Err(TrySendError::Full(v)),
            SendAttempt::Closed(v) => Err(TrySendError::Closed(v)),
        }
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut wake = Wakeups::default();
        let attempt = self.shared.state.lock().try_recv(&mut wake);
        wake.fire();
        match attempt {
            RecvAttempt::Item(v) => Ok(v),
            RecvAttempt::Empty => Err(TryRecvError::Empty),
            RecvAttempt::Closed => Err(TryRecvError::Closed),
        }
    }

    /// Send, parking the calling thread while the channel is full.
    pub fn send_blocking(&self, value: T) -> Result<(), SendError<T>> {
        self.send_blocking_with(&Ctx::background(), value)
    }

    pub fn send_blocking_with(&self, ctx: &Ctx, value: T) -> Result<(), SendError<T>> {
        let token = ctx.blocking_token();
        if token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(SendError::Cancelled(value));
        }

        let mut wake = Wakeups::default();
        let (signal, packet) = {
            let mut state = self.shared.state.lock();
            match state.try_send(value, self.shared.id, &mut wake) {
                SendAttempt::Sent => {
                    drop(state);
                    wake.fire();
                    return Ok(());
                }
                SendAttempt::Closed(v) => return Err(SendError::Closed(v)),
                SendAttempt::Full(v) => {
                    if ctx.is_expired() {
                        return Err(SendError::TimedOut(v));
                    }
                    let signal = Signal::new(waiter::thread_waker());
                    let packet = Packet::with(v);
                    state.park_sender(Waiter::new(&signal, 0, &packet));
                    (signal, packet)
                }
            }
        };

        let outcome = waiter::block_until_selected(&signal, ctx.deadline(), token.as_ref());
        self.finish_send(outcome, &signal, &packet)
    }

    /// Receive, parking the calling thread while the channel is empty.
    ///
    /// `Ok(None)` means the channel is closed and drained.
    pub fn recv_blocking(&self) -> Result<Option<T>, RecvError> {
        self.recv_blocking_with(&Ctx::background())
    }

    pub fn recv_blocking_with(&self, ctx: &Ctx) -> Result<Option<T>, RecvError> {
        let token = ctx.blocking_token();
        if token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(RecvError::Cancelled);
        }

        let mut wake = Wakeups::default();
        let (signal, packet) = {
            let mut state = self.shared.state.lock();
            match state.try_recv(&mut wake) {
                RecvAttempt::Item(v) => {
                    drop(state);
                    wake.fire();
                    return Ok(Some(v));
                }
                RecvAttempt::Closed => return Ok(None),
                RecvAttempt::Empty => {
                    if ctx.is_expired() {
                        return Err(RecvError::TimedOut);
                    }
                    let signal = Signal::new(waiter::thread_waker());
                    let packet = Packet::empty();
                    state.park_receiver(Waiter::new(&signal, 0, &packet));
                    (signal, packet)
                }
            }
        };

        let outcome = waiter::block_until_selected(&signal, ctx.deadline(), token.as_ref());
        self.finish_recv(outcome, &signal, &packet)
    }

    /// Send from a cooperative task, suspending it while the channel is full.
    pub fn send(&self, value: T) -> SendFuture<'_, T> {
        self.send_with(Ctx::background(), value)
    }

    pub fn send_with(&self, ctx: Ctx, value: T) -> SendFuture<'_, T> {
        SendFuture {
            channel: self,
            ctx,
            value: Some(value),
            parked: None,
        }
    }

    /// Receive from a cooperative task, suspending it while the channel is
    /// empty. Resolves to `Ok(None)` once the channel is closed and drained.
    pub fn recv(&self) -> RecvFuture<'_, T> {
        self.recv_with(Ctx::background())
    }

    pub fn recv_with(&self, ctx: Ctx) -> RecvFuture<'_, T> {
        RecvFuture {
            channel: self,
            ctx,
            started: false,
            parked: None,
        }
    }

    fn finish_send(
        &self,
        outcome: WaitOutcome,
        signal: &Arc<Signal>,
        packet: &Packet<T>,
    ) -> Result<(), SendError<T>> {
        match outcome {
            // Claimed by a receiver (value taken) or by close (value left).
            WaitOutcome::Selected(_) => match self.claimed_packet(packet) {
                None => Ok(()),
                Some(v) => Err(SendError::Closed(v)),
            },
            WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
                self.shared.state.lock().unpark(signal);
                match (packet.take(), outcome) {
                    (None, _) => Ok(()),
                    (Some(v), WaitOutcome::TimedOut) => Err(SendError::TimedOut(v)),
                    (Some(v), _) => Err(SendError::Cancelled(v)),
                }
            }
        }
    }

    fn finish_recv(
        &self,
        outcome: WaitOutcome,
        signal: &Arc<Signal>,
        packet: &Packet<T>,
    ) -> Result<Option<T>, RecvError> {
        match outcome {
            // An empty packet means close claimed us.
            WaitOutcome::Selected(_) => Ok(self.claimed_packet(packet)),
            WaitOutcome::TimedOut => {
                self.shared.state.lock().unpark(signal);
                Err(RecvError::TimedOut)
            }
            WaitOutcome::Cancelled => {
                self.shared.state.lock().unpark(signal);
                Err(RecvError::Cancelled)
            }
        }
    }

    /// Read the packet of a wait some counterpart has claimed.
    ///
    /// Claimants fill or drain the packet under the channel lock, after the
    /// claim itself, so the lock must be taken before looking inside.
    fn claimed_packet(&self, packet: &Packet<T>) -> Option<T> {
        let _state = self.shared.state.lock();
        packet.take()
    }

    /// Withdraw an abandoned async wait. If a counterpart claimed it first,
    /// a received item is put back rather than lost.
    fn abandon(&self, signal: &Arc<Signal>, packet: &Packet<T>, is_recv: bool) {
        let mut wake = Wakeups::default();
        {
            let mut state = self.shared.state.lock();
            if signal.try_abort() {
                state.unpark(signal);
                return;
            }
            if !is_recv {
                return;
            }
            if let Some(item) = packet.take() {
                state.restore(item, &mut wake);
            }
        }
        wake.fire();
    }
}

struct Parked<T> {
    suspension: Suspension,
    packet: Arc<Packet<T>>,
}

/// Future returned by [`Channel::send`].
#[must_use = "futures do nothing unless polled"]
pub struct SendFuture<'a, T> {
    channel: &'a Channel<T>,
    ctx: Ctx,
    value: Option<T>,
    parked: Option<Parked<T>>,
}

// The value is moved in and out, never pinned.
impl<T> Unpin for SendFuture<'_, T> {}

impl<T> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let id = this.channel.shared.id;

        if this.parked.is_none() {
            let Some(value) = this.value.take() else {
                panic!("SendFuture polled after completion");
            };
            if this.ctx.cancel_token().is_some_and(|t| t.is_cancelled()) {
                return Poll::Ready(Err(SendError::Cancelled(value)));
            }
            let mut wake = Wakeups::default();
            let mut state = this.channel.shared.state.lock();
            match state.try_send(value, id, &mut wake) {
                SendAttempt::Sent => {
                    drop(state);
                    wake.fire();
                    return Poll::Ready(Ok(()));
                }
                SendAttempt::Closed(v) => return Poll::Ready(Err(SendError::Closed(v))),
                SendAttempt::Full(v) => {
                    if this.ctx.is_expired() {
                        return Poll::Ready(Err(SendError::TimedOut(v)));
                    }
                    let signal = Signal::new(cx.waker().clone());
                    let packet = Packet::with(v);
                    state.park_sender(Waiter::new(&signal, 0, &packet));
                    drop(state);
                    this.parked = Some(Parked {
                        suspension: Suspension::begin(signal, &this.ctx, cx.waker()),
                        packet,
                    });
                }
            }
        }

        let Some(parked) = this.parked.as_mut() else {
            unreachable!("send parks before waiting");
        };
        match parked.suspension.poll_outcome(cx) {
            Poll::Pending => {
                note_suspended(SuspendReason::SendBlocked(id));
                Poll::Pending
            }
            Poll::Ready(outcome) => {
                let result =
                    this.channel
                        .finish_send(outcome, parked.suspension.signal(), &parked.packet);
                this.parked = None;
                Poll::Ready(result)
            }
        }
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        if let Some(parked) = self.parked.take() {
            self.channel
                .abandon(parked.suspension.signal(), &parked.packet, false);
        }
    }
}

/// Future returned by [`Channel::recv`].
#[must_use = "futures do nothing unless polled"]
pub struct RecvFuture<'a, T> {
    channel: &'a Channel<T>,
    ctx: Ctx,
    started: bool,
    parked: Option<Parked<T>>,
}

impl<T> Unpin for RecvFuture<'_, T> {}

impl<T> Future for RecvFuture<'_, T> {
    type Output = Result<Option<T>, RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let id = this.channel.shared.id;

        if !this.started {
            this.started = true;
            if this.ctx.cancel_token().is_some_and(|t| t.is_cancelled()) {
                return Poll::Ready(Err(RecvError::Cancelled));
            }
            let mut wake = Wakeups::default();
            let mut state = this.channel.shared.state.lock();
            match state.try_recv(&mut wake) {
                RecvAttempt::Item(v) => {
                    drop(state);
                    wake.fire();
                    return Poll::Ready(Ok(Some(v)));
                }
                RecvAttempt::Closed => return Poll::Ready(Ok(None)),
                RecvAttempt::Empty => {
                    if this.ctx.is_expired() {
                        return Poll::Ready(Err(RecvError::TimedOut));
                    }
                    let signal = Signal::new(cx.waker().clone());
                    let packet = Packet::empty();
                    state.park_receiver(Waiter::new(&signal, 0, &packet));
                    drop(state);
                    this.parked = Some(Parked {
                        suspension: Suspension::begin(signal, &this.ctx, cx.waker()),
                        packet,
                    });
                }
            }
        }

        let Some(parked) = this.parked.as_mut() else {
            panic!("RecvFuture polled after completion");
        };
        match parked.suspension.poll_outcome(cx) {
            Poll::Pending => {
                note_suspended(SuspendReason::ReceiveBlocked(id));
                Poll::Pending
            }
            Poll::Ready(outcome) => {
                let result =
                    this.channel
                        .finish_recv(outcome, parked.suspension.signal(), &parked.packet);
                this.parked = None;
                Poll::Ready(result)
            }
        }
    }
}

impl<T> Drop for RecvFuture<'_, T> {
    fn drop(&mut self) {
        if let Some(parked) = self.parked.take() {
            self.channel
                .abandon(parked.suspension.signal(), &parked.packet, true);
        }
    }
}
