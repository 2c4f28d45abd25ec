// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Adapters
//!
//! Implementations of the broker seams on top of `lapin`. Broker exceptions reported
//! by lapin (`lapin::Error::ProtocolError`) become [`ProtocolError`] root causes so
//! that the channel pool can recognise unusable channels.

use crate::{
    amqp::{
        channel::{Channel, Confirmation, Connection, DeliveryStream, Dial},
        message::{AckHandle, Delivery, Envelope, Publishing},
    },
    context::Context,
    errors::{Error, Kind, ProtocolError},
};
use ::lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeBindOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString, ShortString},
    BasicProperties, ConnectionProperties, ExchangeKind,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Converts a lapin error, keeping broker exceptions as [`ProtocolError`] roots.
pub(crate) fn from_lapin(err: ::lapin::Error) -> Error {
    match err {
        ::lapin::Error::ProtocolError(amqp) => Error::from(ProtocolError {
            code: amqp.get_id(),
            reason: amqp.get_message().to_string(),
        }),
        other => Error::from(other),
    }
}

/// Dials brokers with `lapin::Connection::connect`.
#[derive(Debug, Clone, Default)]
pub struct LapinDial {
    connection_name: Option<String>,
}

impl LapinDial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported to the broker for every connection.
    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }
}

#[async_trait]
impl Dial for LapinDial {
    async fn dial(&self, ctx: &Context, url: &str) -> Result<Arc<dyn Connection>, Error> {
        debug!("creating amqp connection...");

        let mut options = ConnectionProperties::default();
        if let Some(name) = &self.connection_name {
            options = options.with_connection_name(LongString::from(name.clone()));
        }

        let conn = tokio::select! {
            kind = ctx.done() => return Err(kind.into()),
            res = ::lapin::Connection::connect(url, options) => res.map_err(|err| {
                error!(error = err.to_string(), "failure to connect");
                from_lapin(err).wrap(Kind::ConnectionError.to_string())
            })?,
        };

        debug!("amqp connected");
        Ok(Arc::new(LapinConnection { inner: conn }))
    }
}

pub struct LapinConnection {
    inner: ::lapin::Connection,
}

impl LapinConnection {
    pub fn new(inner: ::lapin::Connection) -> Self {
        LapinConnection { inner }
    }
}

#[async_trait]
impl Connection for LapinConnection {
    async fn channel(&self) -> Result<Arc<dyn Channel>, Error> {
        debug!("creating amqp channel...");
        let channel = self.inner.create_channel().await.map_err(|err| {
            error!(error = err.to_string(), "error to create the channel");
            from_lapin(err)
        })?;

        debug!("channel created");
        Ok(Arc::new(LapinChannel::new(channel)))
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(from_lapin)
    }
}

pub struct LapinChannel {
    inner: ::lapin::Channel,
}

impl LapinChannel {
    pub fn new(inner: ::lapin::Channel) -> Self {
        LapinChannel { inner }
    }
}

#[async_trait]
impl Channel for LapinChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        args: FieldTable,
    ) -> Result<(), Error> {
        self.inner
            .exchange_declare(name, kind, options, args)
            .await
            .map_err(from_lapin)
    }

    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        args: FieldTable,
    ) -> Result<(), Error> {
        self.inner
            .exchange_bind(
                destination,
                source,
                routing_key,
                ExchangeBindOptions::default(),
                args,
            )
            .await
            .map_err(from_lapin)
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        args: FieldTable,
    ) -> Result<(), Error> {
        self.inner
            .queue_declare(name, options, args)
            .await
            .map(|_| ())
            .map_err(from_lapin)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        args: FieldTable,
    ) -> Result<(), Error> {
        self.inner
            .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), args)
            .await
            .map_err(from_lapin)
    }

    async fn qos(&self, prefetch: u16) -> Result<(), Error> {
        self.inner
            .basic_qos(prefetch, BasicQosOptions { global: false })
            .await
            .map_err(from_lapin)
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        args: FieldTable,
    ) -> Result<DeliveryStream, Error> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                args,
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to create the consumer");
                from_lapin(err)
            })?;

        Ok(DeliveryStream::new(consumer.map(|res| {
            res.map(into_delivery).map_err(from_lapin)
        })))
    }

    async fn confirm_select(&self) -> Result<(), Error> {
        self.inner
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
            .map_err(from_lapin)
    }

    async fn publish(&self, envelope: &Envelope) -> Result<Confirmation, Error> {
        let confirm = self
            .inner
            .basic_publish(
                &envelope.exchange,
                &envelope.routing_key,
                BasicPublishOptions {
                    mandatory: envelope.mandatory,
                    immediate: envelope.immediate,
                },
                &envelope.publishing.body,
                into_properties(&envelope.publishing),
            )
            .await
            .map_err(from_lapin)?;

        let confirmation = confirm
            .await
            .map_err(|err| from_lapin(err).wrap(Kind::ConfirmationClosed.to_string()))?;

        Ok(match confirmation {
            ::lapin::publisher_confirm::Confirmation::Ack(_) => Confirmation::Ack,
            ::lapin::publisher_confirm::Confirmation::Nack(_) => Confirmation::Nack,
            ::lapin::publisher_confirm::Confirmation::NotRequested => Confirmation::NotRequested,
        })
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(from_lapin)
    }
}

/// Ack handle backed by the lapin acker of a delivery.
pub struct LapinAcker {
    inner: Acker,
}

#[async_trait]
impl AckHandle for LapinAcker {
    async fn ack(&self, multiple: bool) -> Result<(), Error> {
        self.inner
            .ack(BasicAckOptions { multiple })
            .await
            .map(|_| ())
            .map_err(from_lapin)
    }

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), Error> {
        self.inner
            .nack(BasicNackOptions { multiple, requeue })
            .await
            .map(|_| ())
            .map_err(from_lapin)
    }
}

fn into_delivery(delivery: ::lapin::message::Delivery) -> Delivery {
    let message = from_properties(&delivery.properties, delivery.data);

    Delivery::new(
        delivery.delivery_tag,
        delivery.exchange.as_str(),
        delivery.routing_key.as_str(),
        message,
    )
    .redelivered(delivery.redelivered)
    .with_acker(Arc::new(LapinAcker {
        inner: delivery.acker,
    }))
}

fn short(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|v| v.as_str().to_owned())
}

pub(crate) fn from_properties(props: &BasicProperties, body: Vec<u8>) -> Publishing {
    Publishing {
        headers: props
            .headers()
            .as_ref()
            .map(|table| table.inner().clone())
            .unwrap_or_default(),
        content_type: short(props.content_type()),
        content_encoding: short(props.content_encoding()),
        delivery_mode: *props.delivery_mode(),
        priority: *props.priority(),
        correlation_id: short(props.correlation_id()),
        reply_to: short(props.reply_to()),
        expiration: short(props.expiration()),
        message_id: short(props.message_id()),
        timestamp: *props.timestamp(),
        kind: short(props.kind()),
        user_id: short(props.user_id()),
        app_id: short(props.app_id()),
        body,
    }
}

pub(crate) fn into_properties(publishing: &Publishing) -> BasicProperties {
    let mut props = BasicProperties::default();

    if !publishing.headers.is_empty() {
        props = props.with_headers(FieldTable::from(publishing.headers.clone()));
    }
    if let Some(v) = &publishing.content_type {
        props = props.with_content_type(ShortString::from(v.clone()));
    }
    if let Some(v) = &publishing.content_encoding {
        props = props.with_content_encoding(ShortString::from(v.clone()));
    }
    if let Some(v) = publishing.delivery_mode {
        props = props.with_delivery_mode(v);
    }
    if let Some(v) = publishing.priority {
        props = props.with_priority(v);
    }
    if let Some(v) = &publishing.correlation_id {
        props = props.with_correlation_id(ShortString::from(v.clone()));
    }
    if let Some(v) = &publishing.reply_to {
        props = props.with_reply_to(ShortString::from(v.clone()));
    }
    if let Some(v) = &publishing.expiration {
        props = props.with_expiration(ShortString::from(v.clone()));
    }
    if let Some(v) = &publishing.message_id {
        props = props.with_message_id(ShortString::from(v.clone()));
    }
    if let Some(v) = publishing.timestamp {
        props = props.with_timestamp(v);
    }
    if let Some(v) = &publishing.kind {
        props = props.with_type(ShortString::from(v.clone()));
    }
    if let Some(v) = &publishing.user_id {
        props = props.with_user_id(ShortString::from(v.clone()));
    }
    if let Some(v) = &publishing.app_id {
        props = props.with_app_id(ShortString::from(v.clone()));
    }

    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::lapin::types::AMQPValue;
    use std::time::Duration;

    #[test]
    fn properties_round_trip() {
        let publishing = Publishing::new("body")
            .with_content_type("application/json")
            .with_kind("order.created")
            .with_priority(3)
            .with_correlation_id("c-1")
            .with_reply_to("replies")
            .with_expiration(Duration::from_millis(1_500))
            .with_header("retry-attempts", AMQPValue::LongLongInt(2));

        let props = into_properties(&publishing);
        let restored = from_properties(&props, publishing.body.clone());

        assert_eq!(restored, publishing);
    }

    #[test]
    fn empty_headers_are_not_sent() {
        let props = into_properties(&Publishing::new("x"));
        assert!(props.headers().is_none());
    }

    #[test]
    fn other_lapin_errors_are_not_protocol_errors() {
        let err = from_lapin(::lapin::Error::ChannelsLimitReached);
        assert!(!err.is_protocol_error());
    }
}
