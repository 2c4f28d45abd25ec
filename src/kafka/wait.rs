// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Time-Deferred Dispatch
//!
//! A [`WaitProducer`] stamps messages with a `wait-until` deadline and publishes them
//! to a wait topic. A [`WaitConsumer`] reads that topic, holds each message until its
//! deadline and forwards a copy, without the header, to the main topic.

use super::{
    client::MessageReader,
    message::{Message, WAIT_UNTIL},
    producer::Producer,
};
use crate::{context::Context, errors::Error, otel::OperationSpan};
use async_trait::async_trait;
use chrono::Utc;
use opentelemetry::KeyValue;
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// Adds a `wait-until` header of *now + wait* to every message it produces.
pub struct WaitProducer {
    inner: Arc<dyn Producer>,
    wait: Duration,
}

impl WaitProducer {
    pub fn new(inner: Arc<dyn Producer>, wait: Duration) -> Self {
        WaitProducer { inner, wait }
    }
}

#[async_trait]
impl Producer for WaitProducer {
    async fn produce(&self, ctx: &Context, mut messages: Vec<Message>) -> Result<(), Error> {
        let wait = chrono::Duration::from_std(self.wait)
            .map_err(|err| Error::from(err).wrap("wait producer: wait duration"))?;
        let deadline = Utc::now() + wait;

        for message in messages.iter_mut() {
            message.set_wait_until(deadline);
        }

        self.inner
            .produce(ctx, messages)
            .await
            .map_err(|err| err.wrap("wait producer"))
    }
}

/// Forwards messages of a wait topic once their deadline passed.
///
/// Messages are held one at a time in read order, so delays only stay ordered when
/// each instance reads a single partition. The consumer cannot check this; assign
/// partitions accordingly.
pub struct WaitConsumer {
    reader: Arc<dyn MessageReader>,
    producer: Arc<dyn Producer>,
    topic: String,
}

impl WaitConsumer {
    /// Forwards to `topic` through `producer`.
    pub fn new(
        reader: Arc<dyn MessageReader>,
        producer: Arc<dyn Producer>,
        topic: impl Into<String>,
    ) -> Self {
        WaitConsumer {
            reader,
            producer,
            topic: topic.into(),
        }
    }

    /// Waits for, forwards and commits one message.
    ///
    /// Cancellation while waiting returns the context error without forwarding or
    /// committing; the message is read again by the next reader.
    pub async fn consume_once(&self, ctx: &Context) -> Result<(), Error> {
        let message = self
            .reader
            .fetch_message(ctx)
            .await
            .map_err(|err| err.wrap("wait consumer: fetch"))?;

        if let Some(deadline) = message.wait_until() {
            // a deadline in the past converts to an error and is not waited for
            if let Ok(remaining) = (deadline - Utc::now()).to_std() {
                debug!(
                    topic = message.topic,
                    offset = message.offset,
                    wait_ms = remaining.as_millis() as u64,
                    "holding message"
                );
                ctx.sleep(remaining)
                    .await
                    .map_err(|err| message.annotate(err.wrap("wait consumer: wait")))?;
            }
        }

        let (forward_ctx, span) = OperationSpan::start(
            &Context::background().with_trace(ctx.trace().clone()),
            "kafka.wait_consumer",
            "forward",
            vec![
                KeyValue::new("topic", self.topic.clone()),
                KeyValue::new("offset", message.offset),
            ],
        );

        let result = self.forward(&forward_ctx, &message).await;
        span.finish(&result);
        result
    }

    async fn forward(&self, ctx: &Context, message: &Message) -> Result<(), Error> {
        let mut copy = Message {
            topic: self.topic.clone(),
            key: message.key.clone(),
            value: message.value.clone(),
            headers: message.headers.clone(),
            ..Default::default()
        };
        copy.remove_header(WAIT_UNTIL);

        self.producer
            .produce(ctx, vec![copy])
            .await
            .map_err(|err| message.annotate(err.wrap("wait consumer: produce")))?;

        self.reader
            .commit_messages(ctx, std::slice::from_ref(message))
            .await
            .map_err(|err| message.annotate(err.wrap("wait consumer: commit")))
    }

    /// Forwards until the context finishes or a cycle fails.
    pub async fn run(&self, ctx: &Context) -> Result<(), Error> {
        while !ctx.is_done() {
            if let Err(err) = self.consume_once(ctx).await {
                if ctx.is_done() {
                    break;
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
