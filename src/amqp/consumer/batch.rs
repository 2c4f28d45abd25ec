// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Batch Consumer
//!
//! Accumulates deliveries, processes them as one unit on a fresh context and
//! acknowledges the whole batch with a single grouped call. A failed batch is
//! negatively acknowledged as a group (the error's acknowledger hint, or requeue)
//! and ends the reader loop.
//!
//! Grouped acknowledgements cover every outstanding delivery of the channel, so a
//! batch consumer needs a channel of its own. Scale it with
//! [`Runner::workers`](crate::amqp::reader::Runner::workers), which gives each worker
//! its own channel; a [`MultiConsumer`](super::MultiConsumer) refuses to replicate it.

use super::{Accumulator, BatchProcessor, QueueStart};
use crate::{
    acknowledger::{self, Acknowledger, Decision},
    amqp::{
        channel::DeliveryStream, headers::X_PRIORITY, message::Delivery, reader::Consume,
        topology::Topology,
    },
    context::Context,
    errors::{Error, Kind},
    otel::OperationSpan,
};
use async_trait::async_trait;
use chrono::Utc;
use lapin::types::AMQPValue;
use opentelemetry::KeyValue;
use std::{sync::Arc, time::Duration};
use tracing::debug;

pub struct BatchConsumer {
    processor: Arc<dyn BatchProcessor>,
    accumulator: Accumulator,
}

impl BatchConsumer {
    pub fn new(processor: Arc<dyn BatchProcessor>, size: usize, delay: Duration) -> Self {
        BatchConsumer {
            processor,
            accumulator: Accumulator::new(size, delay),
        }
    }

    /// Start function sized for this consumer.
    ///
    /// Prefetch is twice the batch size so the next batch accumulates while the
    /// current one is processed. The consumer priority is the negated start time:
    /// older workers win ties, which concentrates traffic and keeps batches dense.
    pub fn start_for(&self, queue: impl Into<String>, topology: Topology) -> QueueStart {
        let prefetch =
            u16::try_from(self.accumulator.size().saturating_mul(2)).unwrap_or(u16::MAX);

        QueueStart::new(queue, topology)
            .prefetch(prefetch)
            .arg(X_PRIORITY, AMQPValue::LongLongInt(-Utc::now().timestamp()))
    }

    async fn process(&self, mut batch: Vec<Delivery>) -> Result<(), Error> {
        let (ctx, span) = OperationSpan::start(
            &Context::background(),
            "amqp.batch_consumer",
            "process",
            vec![KeyValue::new("batch_size", batch.len() as i64)],
        );

        // the last delivery's handle acknowledges the whole batch
        let mut acker = None;
        for delivery in batch.iter_mut() {
            acker = delivery.take_acker().or(acker);
        }

        let result = self.processor.process(&ctx, &batch).await;
        let decision = group_decision(result);
        span.label(KeyValue::new("acknowledger", decision.acknowledger.label()));

        let report = decision.report.map(|err| {
            err.wrap("batch consumer: process")
                .value("batch_size", batch.len())
                .value(
                    "delivery_tags",
                    batch.iter().map(|d| d.delivery_tag).collect::<Vec<_>>(),
                )
        });
        span.finish_with(report.as_ref());

        let Some(acker) = acker else {
            return Err(Error::from(Kind::InternalError)
                .wrap("batch consumer: batch without ack handle"));
        };

        decision
            .acknowledger
            .apply(acker.as_ref(), true)
            .await
            .map_err(|err| err.wrap("batch consumer: acknowledge"))?;

        match report {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Batches are all-or-nothing: a reportable failure without a hint requeues the
/// batch instead of following the temporary/permanent routing.
fn group_decision(result: Result<(), Error>) -> Decision {
    let hinted = result.as_ref().err().and_then(crate::errors::acknowledger);
    let mut decision = acknowledger::decide(result);

    if decision.report.is_some() && hinted.is_none() {
        decision.acknowledger = Acknowledger::NackRequeue;
        decision.report = decision
            .report
            .map(|err| err.with_acknowledger(Acknowledger::NackRequeue));
    }
    decision
}

#[async_trait]
impl Consume for BatchConsumer {
    async fn consume(&self, ctx: &Context, stream: DeliveryStream) -> Result<(), Error> {
        loop {
            if ctx.is_done() {
                return Ok(());
            }

            let (batch, closed) = self.accumulator.accumulate(ctx, &stream).await;

            if !batch.is_empty() {
                debug!(size = batch.len(), "processing batch");
                self.process(batch).await?;
            }

            if let Some(err) = closed {
                return Err(err.wrap("batch consumer: receive"));
            }
        }
    }

    fn exclusive_channel(&self) -> bool {
        true
    }
}
