// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Multi Producer
//!
//! Fans concurrent calls out over a fixed set of producers. The producers travel
//! through a bounded channel sized to the set: a call receives one, uses it and sends
//! it back. Callers wait while every producer is busy.

use super::Producer;
use crate::{
    amqp::message::Envelope,
    context::{self, Context},
    errors::{Error, Kind},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Producer spreading concurrent calls over a fixed set of producers.
pub struct MultiProducer {
    size: usize,
    tx: mpsc::Sender<Arc<dyn Producer>>,
    rx: Mutex<mpsc::Receiver<Arc<dyn Producer>>>,
}

impl MultiProducer {
    /// Creates the set.
    ///
    /// # Parameters
    /// * `producers` - Producers used one call at a time each; usually one
    ///   [`SimpleProducer`](super::SimpleProducer) per channel
    ///
    /// # Returns
    /// A producer allowing as many concurrent calls as `producers` holds
    pub fn new(producers: Vec<Arc<dyn Producer>>) -> Self {
        let size = producers.len();
        let (tx, rx) = mpsc::channel(size.max(1));
        for producer in producers {
            // capacity equals the number of producers
            let _ = tx.try_send(producer);
        }

        MultiProducer {
            size,
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Number of producers calls are spread over.
    pub fn size(&self) -> usize {
        self.size
    }

    async fn claim(&self, ctx: &Context) -> Result<Arc<dyn Producer>, Error> {
        let mut rx = context::lock(ctx, &self.rx).await?;

        tokio::select! {
            kind = ctx.done() => Err(kind.into()),
            producer = rx.recv() => producer.ok_or_else(|| Error::from(Kind::ProducerClosed)),
        }
    }

    fn release(&self, producer: Arc<dyn Producer>) {
        if self.tx.try_send(producer).is_err() {
            warn!("multi producer: failure to return a producer to the set");
        }
    }
}

#[async_trait]
impl Producer for MultiProducer {
    /// Claims an idle producer, publishes through it and returns it to the set.
    ///
    /// # Errors
    /// Returns the context error when `ctx` finishes while every producer is busy,
    /// otherwise the error of the claimed producer.
    async fn produce(&self, ctx: &Context, envelope: Envelope) -> Result<(), Error> {
        let producer = self
            .claim(ctx)
            .await
            .map_err(|err| envelope.annotate(err.wrap("multi producer: claim")))?;

        let result = producer.produce(ctx, envelope).await;
        self.release(producer);
        result
    }
}
