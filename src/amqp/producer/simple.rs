// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Simple Producer
//!
//! A producer owning a single channel, opened on first use. Publishes are serialized
//! under a context-respecting mutex. In confirmation mode every publish waits for the
//! broker's publisher ack. Any failure closes the channel so the next call opens a
//! fresh one.

use super::Producer;
use crate::{
    amqp::{
        channel::{Channel, ChannelGetter, Confirmation},
        message::Envelope,
    },
    context::{self, Context},
    errors::{Error, Kind},
    otel::{self, OperationSpan},
};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Producer publishing over one channel it owns.
///
/// Missing message ids are filled with a UUID v4 and missing content types with
/// [`JSON_CONTENT_TYPE`]. The trace context of the caller is written into the headers.
pub struct SimpleProducer {
    getter: Arc<dyn ChannelGetter>,
    confirm: bool,
    channel: Mutex<Option<Arc<dyn Channel>>>,
}

impl SimpleProducer {
    /// Creates a producer without publisher confirms.
    ///
    /// # Parameters
    /// * `getter` - Source of the channel, asked again after every failure
    ///
    /// # Returns
    /// A producer that opens its channel on the first publish
    pub fn new(getter: Arc<dyn ChannelGetter>) -> Self {
        SimpleProducer {
            getter,
            confirm: false,
            channel: Mutex::new(None),
        }
    }

    /// Enables publisher confirms: a publish succeeds only once the broker acks it.
    pub fn with_confirmation(mut self) -> Self {
        self.confirm = true;
        self
    }

    /// Closes the owned channel, if any. The next publish opens a new one.
    ///
    /// # Errors
    /// Returns the broker error raised while closing the channel.
    pub async fn close(&self) -> Result<(), Error> {
        match self.channel.lock().await.take() {
            Some(channel) => channel.close().await,
            None => Ok(()),
        }
    }

    async fn open(&self, ctx: &Context) -> Result<Arc<dyn Channel>, Error> {
        debug!("producer has no channel, opening one...");
        let channel = self.getter.channel(ctx).await?;

        if self.confirm {
            if let Err(err) = channel.confirm_select().await {
                discard(channel.as_ref()).await;
                return Err(err.wrap("enable publisher confirms"));
            }
        }

        Ok(channel)
    }

    async fn publish(&self, ctx: &Context, mut envelope: Envelope) -> Result<(), Error> {
        let mut state = context::lock(ctx, &self.channel).await?;

        let channel = match state.as_ref() {
            Some(channel) => channel.clone(),
            None => {
                let channel = self.open(ctx).await.map_err(|err| envelope.annotate(err))?;
                *state = Some(channel.clone());
                channel
            }
        };

        otel::inject_amqp(ctx, &mut envelope.publishing.headers);
        if envelope.publishing.message_id.is_none() {
            envelope.publishing.message_id = Some(Uuid::new_v4().to_string());
        }
        if envelope.publishing.content_type.is_none() {
            envelope.publishing.content_type = Some(JSON_CONTENT_TYPE.to_owned());
        }

        let outcome = tokio::select! {
            kind = ctx.done() => Err(Error::from(kind)),
            res = channel.publish(&envelope) => res.map_err(|err| err.wrap(Kind::PublishingError.to_string())),
        };

        let result = match outcome {
            Ok(Confirmation::Nack) => Err(Error::from(Kind::PublishNotConfirmed)),
            Ok(Confirmation::NotRequested) if self.confirm => {
                Err(Error::from(Kind::PublishNotConfirmed).wrap("confirmation not requested"))
            }
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            error!(
                error = err.to_string(),
                exchange = envelope.exchange,
                routing_key = envelope.routing_key,
                "error publishing message"
            );
            state.take();
            discard(channel.as_ref()).await;
            return Err(envelope.annotate(err));
        }

        Ok(())
    }
}

async fn discard(channel: &dyn Channel) {
    if let Err(err) = channel.close().await {
        debug!(error = err.to_string(), "failure to close producer channel");
    }
}

#[async_trait]
impl Producer for SimpleProducer {
    /// Publishes one envelope.
    ///
    /// # Parameters
    /// * `ctx` - Bounds the wait for the channel lock and the broker answer
    /// * `envelope` - Routing information and message
    ///
    /// # Errors
    /// Fails with [`Kind::PublishingError`] when the broker rejects the publish and
    /// with [`Kind::PublishNotConfirmed`] on a negative confirmation. Errors carry the
    /// exchange, routing key, headers and truncated body as values.
    async fn produce(&self, ctx: &Context, envelope: Envelope) -> Result<(), Error> {
        let (ctx, span) = OperationSpan::producer(
            ctx,
            "amqp.simple_producer",
            "produce",
            vec![
                KeyValue::new("exchange", envelope.exchange.clone()),
                KeyValue::new("routing_key", envelope.routing_key.clone()),
            ],
        );

        let result = self
            .publish(&ctx, envelope)
            .await
            .map_err(|err| err.wrap("simple producer: produce"));

        span.finish(&result);
        result
    }
}
