// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error taxonomy.
//!
//! Every failure is an explicit value. `Closed`, `TimedOut` and `Cancelled`
//! are outcomes of suspending operations; `CallerError` rejects a malformed
//! select before anything suspends. Drop-policy discards are not errors.

use std::io;

use thiserror::Error;

use crate::channel::ChannelId;

/// Failure of a channel send. Carries the value that was not delivered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError<T> {
    /// The channel was closed before or while waiting.
    #[error("send on closed channel")]
    Closed(T),
    /// The deadline elapsed while the sender was suspended.
    #[error("send timed out")]
    TimedOut(T),
    /// The sender was cancelled while suspended.
    #[error("send cancelled")]
    Cancelled(T),
}

impl<T> SendError<T> {
    /// Recover the value that was not delivered.
    pub fn into_inner(self) -> T {
        match self {
            SendError::Closed(v) | SendError::TimedOut(v) | SendError::Cancelled(v) => v,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SendError::Closed(_))
    }
}

/// Failure of a channel receive.
///
/// A closed and drained channel is not an error: receives return `Ok(None)`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    #[error("receive timed out")]
    TimedOut,
    #[error("receive cancelled")]
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// No room, and the policy is `Block`.
    #[error("channel full")]
    Full(T),
    #[error("send on closed channel")]
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(v) | TrySendError::Closed(v) => v,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing buffered and no sender parked.
    #[error("channel empty")]
    Empty,
    /// Closed and fully drained.
    #[error("channel closed and drained")]
    Closed,
}

/// Malformed select request. Reported synchronously, never after suspending.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallerError {
    #[error("channel {0} appears in more than one select case")]
    DuplicateChannel(ChannelId),
    #[error("select has no cases and no default")]
    NoCases,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("select timed out")]
    TimedOut,
    #[error("select cancelled")]
    Cancelled,
    #[error(transparent)]
    CallerError(#[from] CallerError),
}

/// Why a cooperative task did not produce its value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was cancelled")]
    Cancelled,
}

/// Failure value delivered on a blocking task's result channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("blocking task failed: {message}")]
pub struct TaskFailure {
    pub message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: expected {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_returns_value() {
        assert_eq!(SendError::Closed(7).into_inner(), 7);
        assert_eq!(SendError::TimedOut("x").into_inner(), "x");
        assert!(SendError::Closed(()).is_closed());
        assert!(!SendError::Cancelled(()).is_closed());
    }

    #[test]
    fn select_error_wraps_caller_error() {
        let err: SelectError = CallerError::NoCases.into();
        assert_eq!(err.to_string(), "select has no cases and no default");
    }

    #[test]
    fn panic_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
