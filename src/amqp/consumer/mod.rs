// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Consumers
//!
//! Consumers drain a delivery stream, hand each delivery (or batch of deliveries) to
//! a processor and own the acknowledgement decision. Processors never ack: they
//! return `Ok(())` or an error, optionally carrying an
//! [`Acknowledger`](crate::acknowledger::Acknowledger) hint.

mod accumulator;
mod batch;
mod multi;
mod single;

pub use accumulator::Accumulator;
pub use batch::BatchConsumer;
pub use multi::MultiConsumer;
pub use single::SingleConsumer;

use crate::{
    amqp::{
        channel::{Channel, DeliveryStream},
        message::{Delivery, Headers},
        reader::Start,
        topology::Topology,
    },
    context::Context,
    errors::{Error, Kind},
    otel::OperationSpan,
};
use async_trait::async_trait;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use opentelemetry::KeyValue;
use std::{future::Future, sync::Arc};
use tracing::debug;

/// Processes one delivery.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: &Context, delivery: &Delivery) -> Result<(), Error>;
}

/// Processes a batch of deliveries as a unit.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, ctx: &Context, deliveries: &[Delivery]) -> Result<(), Error>;
}

#[async_trait]
impl<P: Processor + ?Sized> Processor for Arc<P> {
    async fn process(&self, ctx: &Context, delivery: &Delivery) -> Result<(), Error> {
        (**self).process(ctx, delivery).await
    }
}

/// Processor backed by a closure; see [`processor_fn`].
pub struct ProcessorFn<F>(F);

/// Builds a [`Processor`] from a closure receiving owned copies of its arguments.
pub fn processor_fn<F, Fut>(f: F) -> ProcessorFn<F>
where
    F: Fn(Context, Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    ProcessorFn(f)
}

#[async_trait]
impl<F, Fut> Processor for ProcessorFn<F>
where
    F: Fn(Context, Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    async fn process(&self, ctx: &Context, delivery: &Delivery) -> Result<(), Error> {
        (self.0)(ctx.clone(), delivery.clone()).await
    }
}

/// Batch processor backed by a closure; see [`batch_processor_fn`].
pub struct BatchProcessorFn<F>(F);

/// Builds a [`BatchProcessor`] from a closure receiving owned copies of its arguments.
pub fn batch_processor_fn<F, Fut>(f: F) -> BatchProcessorFn<F>
where
    F: Fn(Context, Vec<Delivery>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    BatchProcessorFn(f)
}

#[async_trait]
impl<F, Fut> BatchProcessor for BatchProcessorFn<F>
where
    F: Fn(Context, Vec<Delivery>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    async fn process(&self, ctx: &Context, deliveries: &[Delivery]) -> Result<(), Error> {
        (self.0)(ctx.clone(), deliveries.to_vec()).await
    }
}

/// Start function consuming one queue.
///
/// Installs the topology, sets the per-consumer prefetch and declares the consumer.
#[derive(Debug, Clone)]
pub struct QueueStart {
    queue: String,
    topology: Topology,
    prefetch: u16,
    consumer_tag: String,
    args: Headers,
}

impl QueueStart {
    pub fn new(queue: impl Into<String>, topology: Topology) -> Self {
        QueueStart {
            queue: queue.into(),
            topology,
            prefetch: 1,
            consumer_tag: String::new(),
            args: Headers::new(),
        }
    }

    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Consumer tag; empty lets the broker generate one.
    pub fn consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    /// Adds a consumer argument such as `x-priority`.
    pub fn arg(mut self, key: &str, value: AMQPValue) -> Self {
        self.args.insert(ShortString::from(key), value);
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    async fn declare(&self, ctx: &Context, channel: &dyn Channel) -> Result<DeliveryStream, Error> {
        self.topology.install(ctx, channel).await?;

        channel.qos(self.prefetch).await.map_err(|err| {
            err.wrap(Kind::QoSDeclarationError(self.queue.clone()).to_string())
                .value("prefetch", self.prefetch)
        })?;

        debug!(queue = self.queue, prefetch = self.prefetch, "starting consumer");
        channel
            .consume(
                &self.queue,
                &self.consumer_tag,
                FieldTable::from(self.args.clone()),
            )
            .await
            .map_err(|err| err.wrap(Kind::ConsumerDeclarationError(self.queue.clone()).to_string()))
    }
}

#[async_trait]
impl Start for QueueStart {
    async fn start(&self, ctx: &Context, channel: &dyn Channel) -> Result<DeliveryStream, Error> {
        let (ctx, span) = OperationSpan::start(
            ctx,
            "amqp.queue_start",
            "start",
            vec![
                KeyValue::new("queue", self.queue.clone()),
                KeyValue::new("prefetch", i64::from(self.prefetch)),
            ],
        );

        let result = self
            .declare(&ctx, channel)
            .await
            .map_err(|err| err.value("queue", self.queue.as_str()));

        span.finish(&result);
        result
    }
}
