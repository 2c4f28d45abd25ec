// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Kafka Consumer
//!
//! Fetches one record at a time, processes it on a fresh background context and maps
//! the acknowledger decision onto offsets: `Ack` and `NackDiscard` commit the record,
//! `NackRequeue` stops without committing. Kafka has no per-record requeue, so the
//! caller must rebuild the reader to re-read from the last committed offset.

use super::{client::MessageReader, message::Message};
use crate::{
    acknowledger::{self, Acknowledger, Decision},
    context::Context,
    errors::{self, Error, ErrorHandler},
    otel::{self, OperationSpan},
};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::{future::Future, sync::Arc};
use tracing::debug;

#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: &Context, message: &Message) -> Result<(), Error>;
}

/// Processor built from a closure receiving an owned copy of the record.
pub struct ProcessorFn<F>(F);

pub fn processor_fn<F, Fut>(f: F) -> ProcessorFn<F>
where
    F: Fn(Context, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    ProcessorFn(f)
}

#[async_trait]
impl<F, Fut> Processor for ProcessorFn<F>
where
    F: Fn(Context, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    async fn process(&self, ctx: &Context, message: &Message) -> Result<(), Error> {
        (self.0)(ctx.clone(), message.clone()).await
    }
}

pub struct Consumer {
    reader: Arc<dyn MessageReader>,
    processor: Arc<dyn Processor>,
    on_error: ErrorHandler,
}

impl Consumer {
    pub fn new(reader: Arc<dyn MessageReader>, processor: Arc<dyn Processor>) -> Self {
        Consumer {
            reader,
            processor,
            on_error: errors::log_handler(),
        }
    }

    pub fn on_error(mut self, on_error: ErrorHandler) -> Self {
        self.on_error = on_error;
        self
    }

    /// Fetches, processes and commits one record.
    ///
    /// Processing failures that do not requeue go to the error handler; a requeue
    /// decision is returned as an error since nothing was committed.
    pub async fn consume_once(&self, ctx: &Context) -> Result<(), Error> {
        let message = self
            .reader
            .fetch_message(ctx)
            .await
            .map_err(|err| err.wrap("kafka consumer: fetch"))?;

        let remote = otel::extract_kafka(&message.headers);
        let (process_ctx, span) = OperationSpan::consumer(
            &remote,
            "kafka.consumer",
            "process",
            vec![
                KeyValue::new("topic", message.topic.clone()),
                KeyValue::new("partition", message.partition as i64),
                KeyValue::new("offset", message.offset),
            ],
        );

        debug!(
            topic = message.topic,
            partition = message.partition,
            offset = message.offset,
            "received message"
        );

        let Decision {
            acknowledger,
            report,
        } = acknowledger::decide(self.processor.process(&process_ctx, &message).await);

        span.label(KeyValue::new("acknowledger", acknowledger.label()));
        let report = report.map(|err| message.annotate(err.wrap("kafka consumer: process")));
        span.finish_with(report.as_ref());

        if acknowledger == Acknowledger::NackRequeue {
            return Err(report.unwrap_or_else(|| {
                message.annotate(Error::msg("kafka consumer: message requeued"))
            }));
        }

        if let Some(err) = report {
            (self.on_error)(err);
        }

        self.reader
            .commit_messages(&Context::background(), std::slice::from_ref(&message))
            .await
            .map_err(|err| message.annotate(err.wrap("kafka consumer: commit")))
    }

    /// Consumes until the context finishes or a cycle fails.
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
