// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Channel Pool
//!
//! Idle channels are kept in an ordered sequence and reused last-in first-out. A
//! borrower hands its channel back together with the outcome of its work: channels
//! whose failure has a broker [`ProtocolError`](crate::errors::ProtocolError) as root
//! cause are closed and dropped, every other channel goes back to the pool.

use crate::{
    amqp::channel::{Channel, ChannelGetter},
    context::{self, Context},
    errors::Error,
};
use std::{future::Future, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct ChannelPool {
    getter: Arc<dyn ChannelGetter>,
    idle: Mutex<Vec<Arc<dyn Channel>>>,
}

impl ChannelPool {
    pub fn new(getter: Arc<dyn ChannelGetter>) -> Self {
        ChannelPool {
            getter,
            idle: Mutex::new(vec![]),
        }
    }

    /// Borrows the most recently returned channel, or opens a new one.
    pub async fn get(&self, ctx: &Context) -> Result<Arc<dyn Channel>, Error> {
        {
            let mut idle = context::lock(ctx, &self.idle).await?;
            if let Some(channel) = idle.pop() {
                return Ok(channel);
            }
        }

        debug!("channel pool empty, opening a channel...");
        self.getter
            .channel(ctx)
            .await
            .map_err(|err| err.wrap("channel pool: get"))
    }

    /// Returns a borrowed channel. `outcome` is the error the borrower ended with.
    pub async fn put(&self, channel: Arc<dyn Channel>, outcome: Option<&Error>) {
        if let Some(err) = outcome.filter(|err| err.is_protocol_error()) {
            warn!(error = err.to_string(), "discarding channel after broker error");
            if let Err(close_err) = channel.close().await {
                debug!(error = close_err.to_string(), "failure to close discarded channel");
            }
            return;
        }

        self.idle.lock().await.push(channel);
    }

    /// Borrows a channel for the duration of `f` and returns it according to the
    /// outcome. The error of `f` is propagated unchanged.
    pub async fn with_channel<T, F, Fut>(&self, ctx: &Context, f: F) -> Result<T, Error>
    where
        F: FnOnce(Arc<dyn Channel>) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let channel = self.get(ctx).await?;
        let result = f(channel.clone()).await;
        self.put(channel, result.as_ref().err()).await;
        result
    }

    /// Closes every idle channel and empties the pool; the pool stays usable.
    pub async fn close(&self) -> Result<(), Error> {
        let mut idle = self.idle.lock().await;
        let mut first: Option<Error> = None;

        for channel in idle.drain(..) {
            if let Err(err) = channel.close().await {
                first.get_or_insert(err);
            }
        }

        match first {
            Some(err) => Err(err.wrap("channel pool: close")),
            None => Ok(()),
        }
    }

    pub async fn idle_len(&self) -> usize {
        self.idle.lock().await.len()
    }
}
