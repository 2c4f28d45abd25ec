// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Abstractions
//!
//! This module defines the seams between the messaging core and the AMQP client:
//! dialing a connection, opening channels on it, and the channel primitives the
//! topology installer, producers and readers rely on. The `lapin` adapters live in
//! [`crate::amqp::lapin`].

use crate::{
    amqp::message::{Delivery, Envelope},
    context::Context,
    errors::{Error, Kind},
};
use async_trait::async_trait;
use futures_util::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueDeclareOptions},
    types::FieldTable,
    ExchangeKind,
};
use std::{fmt, sync::Arc};
use tokio::sync::{mpsc, Mutex};

/// Broker answer to a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Publisher confirms are disabled on the channel.
    NotRequested,
    Ack,
    Nack,
}

/// A multiplexed session over a connection.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        args: FieldTable,
    ) -> Result<(), Error>;

    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        args: FieldTable,
    ) -> Result<(), Error>;

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        args: FieldTable,
    ) -> Result<(), Error>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        args: FieldTable,
    ) -> Result<(), Error>;

    /// Per-consumer prefetch count, without a byte budget.
    async fn qos(&self, prefetch: u16) -> Result<(), Error>;

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        args: FieldTable,
    ) -> Result<DeliveryStream, Error>;

    /// Enables publisher confirms.
    async fn confirm_select(&self) -> Result<(), Error>;

    /// Publishes and waits for the broker confirmation when confirms are enabled.
    async fn publish(&self, envelope: &Envelope) -> Result<Confirmation, Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// A live broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn channel(&self) -> Result<Arc<dyn Channel>, Error>;
    async fn close(&self) -> Result<(), Error>;
}

/// Opens a connection to one broker URL.
#[async_trait]
pub trait Dial: Send + Sync {
    async fn dial(&self, ctx: &Context, url: &str) -> Result<Arc<dyn Connection>, Error>;
}

/// Anything able to lend a fresh channel.
#[async_trait]
pub trait ChannelGetter: Send + Sync {
    async fn channel(&self, ctx: &Context) -> Result<Arc<dyn Channel>, Error>;
}

/// Stream of deliveries shared by the workers reading it.
///
/// Cloning shares the underlying stream: each delivery goes to exactly one reader.
#[derive(Clone)]
pub struct DeliveryStream {
    inner: Arc<Mutex<BoxStream<'static, Result<Delivery, Error>>>>,
}

impl DeliveryStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Delivery, Error>> + Send + 'static,
    {
        DeliveryStream {
            inner: Arc::new(Mutex::new(stream.fuse().boxed())),
        }
    }

    /// Stream fed by a channel; closes once every sender is dropped.
    pub fn from_receiver(receiver: mpsc::Receiver<Delivery>) -> Self {
        Self::new(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (Ok(delivery), receiver))
        }))
    }

    /// Next delivery, `None` once the broker closed the stream.
    pub async fn next(&self) -> Option<Result<Delivery, Error>> {
        self.inner.lock().await.next().await
    }

    /// Next delivery, failing with [`Kind::StreamClosed`] once the stream ended.
    pub async fn recv(&self) -> Result<Delivery, Error> {
        match self.next().await {
            Some(result) => result,
            None => Err(Error::from(Kind::StreamClosed)),
        }
    }
}

impl fmt::Debug for DeliveryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryStream")
            .field("readers", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::message::Publishing;

    #[tokio::test]
    async fn clones_share_one_stream() {
        let (tx, rx) = mpsc::channel(4);
        let stream = DeliveryStream::from_receiver(rx);
        let other = stream.clone();

        tx.send(Delivery::new(1, "", "q", Publishing::new("a")))
            .await
            .unwrap();
        tx.send(Delivery::new(2, "", "q", Publishing::new("b")))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(stream.recv().await.unwrap().delivery_tag, 1);
        assert_eq!(other.recv().await.unwrap().delivery_tag, 2);

        let err = stream.recv().await.unwrap_err();
        assert_eq!(err.kind(), Some(&Kind::StreamClosed));
    }

    #[test]
    fn debug_counts_the_readers() {
        let (_tx, rx) = mpsc::channel::<Delivery>(1);
        let stream = DeliveryStream::from_receiver(rx);
        let _other = stream.clone();

        assert_eq!(format!("{stream:?}"), "DeliveryStream { readers: 2 }");
    }
}
