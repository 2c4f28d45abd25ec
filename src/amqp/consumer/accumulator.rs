// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Accumulator
//!
//! Collects deliveries from a stream into a bounded batch. A call returns when the
//! batch is full, when the delay elapsed or when the context is cancelled, whichever
//! comes first. A zero size or a zero delay disables that bound.

use crate::{
    amqp::{channel::DeliveryStream, message::Delivery},
    context::Context,
    errors::{Error, Kind},
};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulator {
    size: usize,
    delay: Duration,
}

impl Accumulator {
    pub fn new(size: usize, delay: Duration) -> Self {
        Accumulator { size, delay }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Accumulates deliveries in stream order.
    ///
    /// The returned error is set when the stream closed or failed; the deliveries
    /// received before that are still returned and must be acknowledged.
    pub async fn accumulate(
        &self,
        ctx: &Context,
        stream: &DeliveryStream,
    ) -> (Vec<Delivery>, Option<Error>) {
        let mut batch = Vec::with_capacity(self.size.min(1024));
        let deadline = (!self.delay.is_zero()).then(|| Instant::now() + self.delay);

        loop {
            if self.size > 0 && batch.len() >= self.size {
                return (batch, None);
            }

            let next = tokio::select! {
                _ = ctx.done() => return (batch, None),
                _ = expired(deadline) => return (batch, None),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => batch.push(delivery),
                Some(Err(err)) => return (batch, Some(err.wrap("accumulator"))),
                None => {
                    return (
                        batch,
                        Some(Error::from(Kind::StreamClosed).wrap("accumulator")),
                    )
                }
            }
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
