// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Select: wait on several channel operations, commit exactly one.
//!
//! 1. Probe every case in a freshly shuffled order; the first ready case
//!    commits. A random permutation makes the winner uniform among the
//!    ready cases.
//! 2. Nothing ready: return `Default` if the select has one.
//! 3. Otherwise park one shared `Signal` on every channel. If a channel
//!    turns out to be ready while parking, withdraw everything and go back
//!    to step 1. Once parked, the first counterpart to claim the signal
//!    decides the case; the rest of the entries are removed on wake-up.
//!
//! Cases are homogeneous in `T`; callers with several message kinds use
//! an enum.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rand::seq::SliceRandom;

use crate::channel::{Channel, ChannelId, RecvAttempt, SendAttempt};
use crate::context::Ctx;
use crate::error::{CallerError, SelectError};
use crate::pool::task::{note_suspended, SuspendReason};
use crate::waiter::{self, Packet, Signal, Suspension, WaitOutcome, Waiter, Wakeups};

/// The case that fired.
#[derive(Debug, PartialEq, Eq)]
pub enum SelectOutcome<T> {
    /// A receive case fired. `None` means its channel is closed and drained.
    Received { case: usize, value: Option<T> },
    Sent { case: usize },
    /// A send case found its channel closed; the value comes back.
    SendClosed { case: usize, value: T },
    /// Nothing was ready and the select had a default.
    Default,
}

impl<T> SelectOutcome<T> {
    /// Index of the case that fired, `None` for `Default`.
    pub fn case(&self) -> Option<usize> {
        match self {
            SelectOutcome::Received { case, .. }
            | SelectOutcome::Sent { case }
            | SelectOutcome::SendClosed { case, .. } => Some(*case),
            SelectOutcome::Default => None,
        }
    }
}

enum Op<T> {
    Recv,
    Send(Option<T>),
}

struct Case<T> {
    channel: Channel<T>,
    op: Op<T>,
}

/// Per-case packets of one parking round.
type Packets<T> = Vec<Option<Arc<Packet<T>>>>;

struct Parking<T> {
    packets: Packets<T>,
    ready_seen: bool,
}

/// A set of channel operations, of which exactly one will commit.
pub struct Select<T> {
    cases: Vec<Case<T>>,
    has_default: bool,
}

impl<T> Default for Select<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Select<T> {
    pub fn new() -> Self {
        Self {
            cases: Vec::new(),
            has_default: false,
        }
    }

    /// Add a receive case. Returns its case index.
    pub fn recv(&mut self, channel: &Channel<T>) -> usize {
        self.cases.push(Case {
            channel: channel.clone(),
            op: Op::Recv,
        });
        self.cases.len() - 1
    }

    /// Add a send case. Returns its case index.
    pub fn send(&mut self, channel: &Channel<T>, value: T) -> usize {
        self.cases.push(Case {
            channel: channel.clone(),
            op: Op::Send(Some(value)),
        });
        self.cases.len() - 1
    }

    /// Return `Default` instead of suspending when nothing is ready.
    pub fn with_default(&mut self) -> &mut Self {
        self.has_default = true;
        self
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    fn validate(&self) -> Result<(), CallerError> {
        if self.cases.is_empty() && !self.has_default {
            return Err(CallerError::NoCases);
        }
        let mut seen = HashSet::with_capacity(self.cases.len());
        for case in &self.cases {
            let id = case.channel.id();
            if !seen.insert(id) {
                return Err(CallerError::DuplicateChannel(id));
            }
        }
        Ok(())
    }

    fn channel_ids(&self) -> Vec<ChannelId> {
        self.cases.iter().map(|c| c.channel.id()).collect()
    }

    fn probe_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.cases.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        order
    }

    /// Commit the first ready case in `order`, if any.
    fn attempt(&mut self, order: &[usize]) -> Option<SelectOutcome<T>> {
        for &i in order {
            let Case { channel, op } = &mut self.cases[i];
            let id = channel.id();
            let mut wake = Wakeups::default();
            let outcome = {
                let mut state = channel.shared.state.lock();
                match op {
                    Op::Recv => match state.try_recv(&mut wake) {
                        RecvAttempt::Item(v) => Some(SelectOutcome::Received {
                            case: i,
                            value: Some(v),
                        }),
                        RecvAttempt::Closed => Some(SelectOutcome::Received { case: i, value: None }),
                        RecvAttempt::Empty => None,
                    },
                    Op::Send(slot) => match slot.take() {
                        None => None,
                        Some(v) => match state.try_send(v, id, &mut wake) {
                            SendAttempt::Sent => Some(SelectOutcome::Sent { case: i }),
                            SendAttempt::Closed(v) => {
                                Some(SelectOutcome::SendClosed { case: i, value: v })
                            }
                            SendAttempt::Full(v) => {
                                *slot = Some(v);
                                None
                            }
                        },
                    },
                }
            };
            wake.fire();
            if outcome.is_some() {
                return outcome;
            }
        }
        None
    }

    /// Park `signal` on every channel, stopping early if one is ready or
    /// the signal was already claimed through an earlier channel.
    fn park_all(&mut self, signal: &Arc<Signal>, order: &[usize]) -> Parking<T> {
        let mut packets: Packets<T> = (0..self.cases.len()).map(|_| None).collect();
        let mut ready_seen = false;
        for &i in order {
            let Case { channel, op } = &mut self.cases[i];
            let mut state = channel.shared.state.lock();
            let ready = match op {
                Op::Recv => state.recv_ready(),
                Op::Send(_) => state.send_ready(),
            };
            if ready {
                ready_seen = true;
                break;
            }
            if !signal.is_waiting() {
                break;
            }
            let packet = match op {
                Op::Recv => {
                    let packet = Packet::empty();
                    state.park_receiver(Waiter::new(signal, i, &packet));
                    packet
                }
                Op::Send(slot) => {
                    let Some(value) = slot.take() else { continue };
                    let packet = Packet::with(value);
                    state.park_sender(Waiter::new(signal, i, &packet));
                    packet
                }
            };
            packets[i] = Some(packet);
        }
        Parking {
            packets,
            ready_seen,
        }
    }

    /// Remove our entries after a withdrawn round and take back unsent values.
    fn unpark_all(&mut self, signal: &Arc<Signal>, packets: &Packets<T>) {
        for (case, packet) in self.cases.iter_mut().zip(packets) {
            let Some(packet) = packet else { continue };
            case.channel.shared.state.lock().unpark(signal);
            if let Op::Send(slot) = &mut case.op {
                if let Some(value) = packet.take() {
                    *slot = Some(value);
                }
            }
        }
    }

    fn complete(
        &mut self,
        outcome: WaitOutcome,
        signal: &Arc<Signal>,
        packets: &Packets<T>,
    ) -> Result<SelectOutcome<T>, SelectError> {
        for (case, packet) in self.cases.iter().zip(packets) {
            if packet.is_some() {
                case.channel.shared.state.lock().unpark(signal);
            }
        }
        let case = match outcome {
            WaitOutcome::Selected(case) => case,
            WaitOutcome::TimedOut => return Err(SelectError::TimedOut),
            WaitOutcome::Cancelled => return Err(SelectError::Cancelled),
        };
        let value = packets
            .get(case)
            .and_then(|p| p.as_ref())
            .and_then(|p| p.take());
        Ok(match (&self.cases[case].op, value) {
            (Op::Recv, value) => SelectOutcome::Received { case, value },
            // Close claims a parked sender without taking its value.
            (Op::Send(_), Some(value)) => SelectOutcome::SendClosed { case, value },
            (Op::Send(_), None) => SelectOutcome::Sent { case },
        })
    }

    /// Withdraw an abandoned async round. A received item that was already
    /// handed to us goes back to its channel.
    fn abandon(&mut self, signal: &Arc<Signal>, packets: &Packets<T>) {
        if signal.try_abort() {
            self.unpark_all(signal, packets);
            return;
        }
        let Some(case) = signal.selected() else { return };
        for (case, packet) in self.cases.iter().zip(packets) {
            if packet.is_some() {
                case.channel.shared.state.lock().unpark(signal);
            }
        }
        if let (Some(Some(packet)), Op::Recv) = (packets.get(case), &self.cases[case].op) {
            if let Some(item) = packet.take() {
                let mut wake = Wakeups::default();
                self.cases[case].channel.shared.state.lock().restore(item, &mut wake);
                wake.fire();
            }
        }
    }

    /// Commit a ready case or return `Default`, never suspending.
    pub fn try_select(mut self) -> Result<SelectOutcome<T>, SelectError> {
        self.has_default = true;
        self.validate()?;
        let order = self.probe_order();
        Ok(self.attempt(&order).unwrap_or(SelectOutcome::Default))
    }

    /// Select, parking the calling thread until a case fires.
    pub fn wait_blocking(self) -> Result<SelectOutcome<T>, SelectError> {
        self.wait_blocking_with(&Ctx::background())
    }

    pub fn wait_blocking_with(mut self, ctx: &Ctx) -> Result<SelectOutcome<T>, SelectError> {
        self.validate()?;
        let token = ctx.blocking_token();
        loop {
            if token.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(SelectError::Cancelled);
            }
            let order = self.probe_order();
            if let Some(outcome) = self.attempt(&order) {
                return Ok(outcome);
            }
            if self.has_default {
                return Ok(SelectOutcome::Default);
            }
            if ctx.is_expired() {
                return Err(SelectError::TimedOut);
            }

            let signal = Signal::new(waiter::thread_waker());
            let parking = self.park_all(&signal, &order);
            if parking.ready_seen && signal.try_abort() {
                self.unpark_all(&signal, &parking.packets);
                continue;
            }
            let outcome = waiter::block_until_selected(&signal, ctx.deadline(), token.as_ref());
            return self.complete(outcome, &signal, &parking.packets);
        }
    }

    /// Select from a cooperative task, suspending it until a case fires.
    pub fn wait(self) -> SelectFuture<T> {
        self.wait_with(Ctx::background())
    }

    pub fn wait_with(self, ctx: Ctx) -> SelectFuture<T> {
        SelectFuture {
            select: self,
            ctx,
            validated: false,
            parked: None,
        }
    }
}

struct ParkedSelect<T> {
    suspension: Suspension,
    packets: Packets<T>,
}

/// Future returned by [`Select::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct SelectFuture<T> {
    select: Select<T>,
    ctx: Ctx,
    validated: bool,
    parked: Option<ParkedSelect<T>>,
}

impl<T> Unpin for SelectFuture<T> {}

impl<T> Future for SelectFuture<T> {
    type Output = Result<SelectOutcome<T>, SelectError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if !this.validated {
            this.validated = true;
            this.select.validate()?;
        }

        loop {
            if let Some(parked) = this.parked.as_mut() {
                return match parked.suspension.poll_outcome(cx) {
                    Poll::Pending => {
                        note_suspended(SuspendReason::SelectBlocked(this.select.channel_ids()));
                        Poll::Pending
                    }
                    Poll::Ready(outcome) => {
                        let signal = parked.suspension.signal().clone();
                        let packets = std::mem::take(&mut parked.packets);
                        this.parked = None;
                        Poll::Ready(this.select.complete(outcome, &signal, &packets))
                    }
                };
            }

            if this.ctx.cancel_token().is_some_and(|t| t.is_cancelled()) {
                return Poll::Ready(Err(SelectError::Cancelled));
            }
            let order = this.select.probe_order();
            if let Some(outcome) = this.select.attempt(&order) {
                return Poll::Ready(Ok(outcome));
            }
            if this.select.has_default {
                return Poll::Ready(Ok(SelectOutcome::Default));
            }
            if this.ctx.is_expired() {
                return Poll::Ready(Err(SelectError::TimedOut));
            }

            let signal = Signal::new(cx.waker().clone());
            let parking = this.select.park_all(&signal, &order);
            if parking.ready_seen && signal.try_abort() {
                this.select.unpark_all(&signal, &parking.packets);
                continue;
            }
            this.parked = Some(ParkedSelect {
                suspension: Suspension::begin(signal, &this.ctx, cx.waker()),
                packets: parking.packets,
            });
        }
    }
}

impl<T> Drop for SelectFuture<T> {
    fn drop(&mut self) {
        if let Some(parked) = self.parked.take() {
            self.select
                .abandon(parked.suspension.signal(), &parked.packets);
        }
    }
}
