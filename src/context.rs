// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Operation Context
//!
//! Every public blocking operation takes a [`Context`]: a cancellation token, an
//! optional deadline and the OpenTelemetry context of the caller. Critical sections
//! that must survive shutdown (processing an accepted delivery, acknowledging it,
//! forwarding a waited message) run on [`Context::background`] instead of the
//! caller's context.

use crate::errors::{Error, Kind};
use std::time::Duration;
use tokio::{
    sync::{Mutex, MutexGuard},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    trace: opentelemetry::Context,
}

impl Context {
    /// A context that is never cancelled and carries no trace.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled together with `self`, or on its own through [`Context::cancel`].
    pub fn child(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
            trace: self.trace.clone(),
        }
    }

    /// Keeps the trace but drops cancellation and deadline.
    pub fn detached(&self) -> Self {
        Context {
            token: CancellationToken::new(),
            deadline: None,
            trace: self.trace.clone(),
        }
    }

    /// A child context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A child context whose deadline is at most `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.child();
        child.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        child
    }

    pub fn with_trace(mut self, trace: opentelemetry::Context) -> Self {
        self.trace = trace;
        self
    }

    pub fn trace(&self) -> &opentelemetry::Context {
        &self.trace
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every child.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Non-blocking check, `None` while the context is live.
    pub fn err(&self) -> Option<Kind> {
        if self.token.is_cancelled() {
            return Some(Kind::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Kind::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Kind {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => Kind::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Kind::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Kind::Cancelled
            }
        }
    }

    /// Sleeps for `duration` unless the context finishes first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Error> {
        tokio::select! {
            kind = self.done() => Err(kind.into()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Acquires `mutex` unless the context finishes first.
pub async fn lock<'a, T>(ctx: &Context, mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, Error> {
    if let Some(kind) = ctx.err() {
        return Err(kind.into());
    }

    tokio::select! {
        kind = ctx.done() => Err(kind.into()),
        guard = mutex.lock() => Ok(guard),
    }
}
