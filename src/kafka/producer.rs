// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Kafka producers.

use super::{
    client::{MessageWriter, WriteErrors},
    message::Message,
};
use crate::{
    context::Context,
    errors::Error,
    otel::{self, OperationSpan},
};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::{sync::Arc, time::Duration};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, ctx: &Context, messages: Vec<Message>) -> Result<(), Error>;
}

#[async_trait]
impl<P: Producer + ?Sized> Producer for Arc<P> {
    async fn produce(&self, ctx: &Context, messages: Vec<Message>) -> Result<(), Error> {
        (**self).produce(ctx, messages).await
    }
}

/// Produces through a [`MessageWriter`], propagating the caller's trace.
pub struct WriterProducer {
    writer: Arc<dyn MessageWriter>,
}

impl WriterProducer {
    pub fn new(writer: Arc<dyn MessageWriter>) -> Self {
        WriterProducer { writer }
    }
}

#[async_trait]
impl Producer for WriterProducer {
    async fn produce(&self, ctx: &Context, mut messages: Vec<Message>) -> Result<(), Error> {
        let topics: Vec<String> = messages.iter().map(|m| m.topic.clone()).collect();
        let (ctx, span) = OperationSpan::producer(
            ctx,
            "kafka.producer",
            "produce",
            vec![
                KeyValue::new("topic", topics.first().cloned().unwrap_or_default()),
                KeyValue::new("messages", messages.len() as i64),
            ],
        );

        for message in messages.iter_mut() {
            otel::inject_kafka(&ctx, &mut message.headers);
        }
        let count = messages.len();

        let result = self.writer.write_messages(&ctx, messages).await.map_err(|err| {
            let failed = err.downcast_ref::<WriteErrors>().map(WriteErrors::count);
            let err = err
                .wrap("kafka producer: produce")
                .value("topics", topics)
                .value("messages", count);
            match failed {
                Some(failed) => err.value("failed", failed),
                None => err,
            }
        });
        span.finish(&result);
        result
    }
}

/// Bounds each produce call by a timeout.
pub struct TimeoutProducer {
    inner: Arc<dyn Producer>,
    timeout: Duration,
}

impl TimeoutProducer {
    pub fn new(inner: Arc<dyn Producer>, timeout: Duration) -> Self {
        TimeoutProducer { inner, timeout }
    }
}

#[async_trait]
impl Producer for TimeoutProducer {
    async fn produce(&self, ctx: &Context, messages: Vec<Message>) -> Result<(), Error> {
        let ctx = ctx.with_timeout(self.timeout);
        self.inner.produce(&ctx, messages).await
    }
}
