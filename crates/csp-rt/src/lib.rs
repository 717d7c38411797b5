// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channel-based concurrency core.
//!
//! Typed CSP channels with bounded buffering and overflow policies, a
//! cooperative worker pool that suspends tasks at channel operations, a
//! blocking task runner, and random-fair selection over several channels.
//! Every suspending operation takes a `Ctx` carrying an optional deadline
//! and cancel token.
//!
//! Components:
//! - buffer: slot storage and overflow policies
//! - channel: send/receive/close, blocking, async and non-blocking
//! - pool: cooperative scheduler, task arena, timer, task handles
//! - blocking: dedicated-thread tasks with a result channel
//! - select: choose one ready operation among many
//! - timeout: sleep and timeout channels
//! - cancel/context: cancellation tokens and per-operation deadlines
//!
//! ```no_run
//! use csp_rt::{Channel, Pool, PoolConfig};
//!
//! let pool = Pool::new(PoolConfig::default()).unwrap();
//! let ch = Channel::rendezvous();
//! let tx = ch.clone();
//! pool.spawn(async move { tx.send("hi").await.unwrap() });
//! assert_eq!(ch.recv_blocking().unwrap(), Some("hi"));
//! ```

pub mod blocking;
pub mod buffer;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod pool;
pub mod select;
pub mod timeout;
mod waiter;

pub use blocking::{spawn_blocking, BlockingHandle, TaskOutcome};
pub use buffer::OverflowPolicy;
pub use cancel::CancelToken;
pub use channel::{Channel, ChannelId};
pub use config::PoolConfig;
pub use context::Ctx;
pub use error::{
    CallerError, ConfigError, JoinError, PoolError, RecvError, SelectError, SendError,
    TaskFailure, TryRecvError, TrySendError,
};
pub use pool::{Pool, PoolStats, SuspendReason, TaskHandle, TaskId, TaskStatus};
pub use select::{Select, SelectOutcome};
pub use waiter::block_on;
