// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-operation wait context: an optional deadline and cancel token.
//!
//! Every suspending operation takes a `Ctx`. The plain variants
//! (`send`, `recv`, ...) use `Ctx::background()`.

use std::time::{Duration, Instant};

use crate::cancel::{self, CancelToken};

#[derive(Debug, Clone, Default)]
pub struct Ctx {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl Ctx {
    /// No deadline, no explicit token.
    pub fn background() -> Self {
        Self::default()
    }

    /// Give up `timeout` from now. Keeps the earlier deadline if one is set.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let at = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.with_deadline(at)
    }

    pub fn with_deadline(mut self, at: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(at),
            None => at,
        });
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Token a blocking wait should watch: the explicit one, else the token
    /// of the blocking task running on this thread.
    pub(crate) fn blocking_token(&self) -> Option<CancelToken> {
        self.cancel.clone().or_else(cancel::current)
    }
}

fn far_future() -> Instant {
    // ~30 years; Instant has no MAX.
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}
