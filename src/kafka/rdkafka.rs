// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # rdkafka Adapters
//!
//! [`MessageReader`] and [`MessageWriter`] on top of `rdkafka`. Readers disable
//! auto-commit: offsets only move through [`MessageReader::commit_messages`].

use super::{
    client::{MessageReader, MessageWriter, WriteErrors},
    message::{Header, Message},
};
use crate::{
    context::Context,
    errors::{Error, Kind},
};
use ::rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer as _, StreamConsumer},
    message::{Header as RdHeader, Headers as _, Message as _, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
    Offset, TopicPartitionList,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error};

/// Consumer-group reader subscribed to a set of topics.
pub struct RdReader {
    consumer: StreamConsumer,
}

impl RdReader {
    pub fn new(brokers: &str, group_id: &str, topics: &[&str]) -> Result<Self, Error> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|err| {
                error!(error = err.to_string(), "failure to create kafka consumer");
                Error::from(err).wrap("kafka reader: create")
            })?;

        consumer
            .subscribe(topics)
            .map_err(|err| Error::from(err).wrap("kafka reader: subscribe"))?;

        debug!(?topics, "kafka reader subscribed");
        Ok(RdReader { consumer })
    }
}

#[async_trait]
impl MessageReader for RdReader {
    async fn fetch_message(&self, ctx: &Context) -> Result<Message, Error> {
        let received = tokio::select! {
            kind = ctx.done() => return Err(kind.into()),
            received = self.consumer.recv() => received,
        };

        let borrowed =
            received.map_err(|err| Error::from(err).wrap(Kind::FetchError.to_string()))?;

        let headers = borrowed
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| Header::new(h.key, h.value.map(<[u8]>::to_vec).unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Message {
            topic: borrowed.topic().to_owned(),
            partition: borrowed.partition(),
            offset: borrowed.offset(),
            key: borrowed.key().map(<[u8]>::to_vec).unwrap_or_default(),
            value: borrowed.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
            time: borrowed
                .timestamp()
                .to_millis()
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }

    async fn commit_messages(&self, _: &Context, messages: &[Message]) -> Result<(), Error> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut offsets = TopicPartitionList::new();
        for message in messages {
            offsets
                .add_partition_offset(
                    &message.topic,
                    message.partition,
                    Offset::Offset(message.offset + 1),
                )
                .map_err(|err| Error::from(err).wrap(Kind::CommitError.to_string()))?;
        }

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|err| Error::from(err).wrap(Kind::CommitError.to_string()))
    }

    async fn close(&self) -> Result<(), Error> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// Writer sending each message through a `FutureProducer`.
pub struct RdWriter {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl RdWriter {
    pub fn new(brokers: &str, queue_timeout: Duration) -> Result<Self, Error> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()
            .map_err(|err| {
                error!(error = err.to_string(), "failure to create kafka producer");
                Error::from(err).wrap("kafka writer: create")
            })?;

        Ok(RdWriter {
            producer,
            queue_timeout,
        })
    }

    async fn send(&self, message: &Message) -> Result<(), Error> {
        let mut headers = OwnedHeaders::new_with_capacity(message.headers.len());
        for header in &message.headers {
            headers = headers.insert(RdHeader {
                key: &header.key,
                value: Some(header.value.as_slice()),
            });
        }

        let mut record = FutureRecord::<[u8], [u8]>::to(&message.topic)
            .payload(message.value.as_slice())
            .headers(headers);
        if !message.key.is_empty() {
            record = record.key(message.key.as_slice());
        }

        self.producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
            .map(|_| ())
            .map_err(|(err, _)| Error::from(err))
    }
}

#[async_trait]
impl MessageWriter for RdWriter {
    async fn write_messages(&self, ctx: &Context, messages: Vec<Message>) -> Result<(), Error> {
        let mut results = Vec::with_capacity(messages.len());
        for message in &messages {
            let sent = tokio::select! {
                kind = ctx.done() => Err(Error::from(kind)),
                sent = self.send(message) => sent,
            };
            results.push(sent.err());
        }

        let errors = WriteErrors(results);
        if errors.is_empty() {
            return Ok(());
        }
        Err(Error::from(errors).wrap(Kind::WriteError.to_string()))
    }

    async fn close(&self) -> Result<(), Error> {
        use ::rdkafka::producer::Producer as _;

        self.producer
            .flush(Timeout::After(self.queue_timeout))
            .map_err(|err| Error::from(err).wrap("kafka writer: flush"))
    }
}
