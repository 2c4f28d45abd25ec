// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Bounded Redelivery
//!
//! A [`Retryer`] re-publishes a failed delivery with an incremented `retry-attempts`
//! header and a per-message expiration, typically to an exchange routing into a
//! retry queue that dead-letters back to the work queue once the message expires.
//! Once the configured maximum is reached the delivery is acked or discarded instead.

use crate::{
    acknowledger::Acknowledger,
    amqp::{
        consumer::Processor,
        headers::{self, RETRY_ATTEMPTS},
        message::{Delivery, Envelope, Publishing},
        producer::Producer,
    },
    context::Context,
    errors::{self, Error, Kind},
    otel::OperationSpan,
};
use async_trait::async_trait;
use lapin::types::{AMQPValue, ShortString};
use opentelemetry::KeyValue;
use std::{sync::Arc, time::Duration};
use tracing::debug;

pub struct Retryer {
    producer: Arc<dyn Producer>,
    max_attempts: i64,
    ack_at_max: bool,
    delay: Duration,
    exchange: String,
    routing_key: String,
}

impl Retryer {
    /// Retries forever, without delay, discarding nothing; tune with the builders.
    pub fn new(
        producer: Arc<dyn Producer>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Retryer {
            producer,
            max_attempts: 0,
            ack_at_max: false,
            delay: Duration::ZERO,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Maximum number of retries; zero or less retries forever.
    pub fn max_attempts(mut self, max: i64) -> Self {
        self.max_attempts = max;
        self
    }

    /// Acknowledges (`true`) or discards (`false`) deliveries that reached the maximum.
    pub fn ack_at_max(mut self, ack: bool) -> Self {
        self.ack_at_max = ack;
        self
    }

    /// Delay before redelivery, carried in the publishing's expiration.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Schedules a new attempt for `delivery`.
    ///
    /// Always returns an error: an ignored one carrying [`Acknowledger::Ack`] once the
    /// retry is published, one carrying the max-reached acknowledger when no attempt
    /// is left, or the publish failure.
    pub async fn retry(&self, ctx: &Context, delivery: &Delivery) -> Error {
        let attempts = headers::retry_attempts(delivery.headers());

        let (ctx, span) = OperationSpan::start(
            ctx,
            "amqp.retryer",
            "retry",
            vec![
                KeyValue::new("exchange", self.exchange.clone()),
                KeyValue::new("routing_key", self.routing_key.clone()),
                KeyValue::new("attempts", attempts),
            ],
        );

        let err = self.schedule(&ctx, delivery, attempts).await;
        span.finish_with(Some(&err));
        err
    }

    async fn schedule(&self, ctx: &Context, delivery: &Delivery, attempts: i64) -> Error {
        if self.max_attempts > 0 && attempts >= self.max_attempts {
            let acknowledger = Acknowledger::for_max_reached(self.ack_at_max);
            debug!(attempts, acknowledger = acknowledger.label(), "max retry attempts reached");

            return Error::from(Kind::MaxAttemptsReached)
                .permanent()
                .value("attempts", attempts)
                .value("max_attempts", self.max_attempts)
                .with_acknowledger(acknowledger);
        }

        let mut publishing = Publishing::from_delivery(delivery);
        if self.max_attempts > 0 {
            publishing.headers.insert(
                ShortString::from(RETRY_ATTEMPTS),
                AMQPValue::LongLongInt(attempts + 1),
            );
        } else {
            publishing.remove_header(RETRY_ATTEMPTS);
        }
        if !self.delay.is_zero() {
            publishing = publishing.with_expiration(self.delay);
        }

        let envelope = Envelope::new(&self.exchange, &self.routing_key, publishing);
        match self.producer.produce(ctx, envelope).await {
            Ok(()) => Error::from(Kind::Retried)
                .with_acknowledger(Acknowledger::Ack)
                .ignored(),
            Err(err) => err.wrap("retryer: publish").value("attempts", attempts),
        }
    }
}

/// Routes retryable processor failures through a [`Retryer`].
///
/// Failures that are temporary, not ignored and carry no acknowledger hint are
/// retried; everything else passes through unchanged.
pub struct RetryProcessor {
    inner: Arc<dyn Processor>,
    retryer: Arc<Retryer>,
}

impl RetryProcessor {
    pub fn new(inner: Arc<dyn Processor>, retryer: Arc<Retryer>) -> Self {
        RetryProcessor { inner, retryer }
    }
}

#[async_trait]
impl Processor for RetryProcessor {
    async fn process(&self, ctx: &Context, delivery: &Delivery) -> Result<(), Error> {
        let err = match self.inner.process(ctx, delivery).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let retryable = errors::is_temporary(&err)
            && !errors::is_ignored(&err)
            && errors::acknowledger(&err).is_none();
        if !retryable {
            return Err(err);
        }

        debug!(error = err.to_string(), "processing failed, scheduling a retry");
        Err(self.retryer.retry(ctx, delivery).await)
    }
}
