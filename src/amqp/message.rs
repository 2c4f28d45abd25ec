// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Messages
//!
//! [`Delivery`] is a message received from the broker together with its ack handle.
//! [`Publishing`] is a message prepared for sending, and [`Envelope`] adds the
//! routing information a producer needs.

use crate::{
    amqp::headers::{self, X_DEATH},
    errors::Error,
};
use async_trait::async_trait;
use lapin::types::{AMQPValue, ShortString};
use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

/// Message headers, keyed by header name.
pub type Headers = BTreeMap<ShortString, AMQPValue>;

/// Bodies are truncated to this many bytes when attached to errors.
pub const MAX_BODY_IN_ERRORS: usize = 512;

/// Broker handle used to settle a delivery.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self, multiple: bool) -> Result<(), Error>;
    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), Error>;
}

/// A message to be sent, or the message part of a delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Publishing {
    pub headers: Headers,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Per-message TTL in milliseconds, decimal encoded.
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub body: Vec<u8>,
}

impl Publishing {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Publishing {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Copies the message part of a delivery, dropping the broker's redelivery history.
    pub fn from_delivery(delivery: &Delivery) -> Self {
        let mut publishing = delivery.message.clone();
        publishing.headers.remove(X_DEATH);
        publishing
    }

    pub fn with_header(mut self, key: &str, value: AMQPValue) -> Self {
        self.headers.insert(ShortString::from(key), value);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the expiration field to `ttl` expressed in milliseconds.
    pub fn with_expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl.as_millis().to_string());
        self
    }

    /// Removes a header, returning its previous value.
    pub fn remove_header(&mut self, key: &str) -> Option<AMQPValue> {
        self.headers.remove(key)
    }
}

/// Routing information plus the message to publish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub publishing: Publishing,
}

impl Envelope {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        publishing: Publishing,
    ) -> Self {
        Envelope {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: false,
            immediate: false,
            publishing,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Adds the routing context and the message itself to `err`.
    pub(crate) fn annotate(&self, err: Error) -> Error {
        err.value("exchange", self.exchange.as_str())
            .value("routing_key", self.routing_key.as_str())
            .value("headers", headers::to_json(&self.publishing.headers))
            .value("body", truncate_body(&self.publishing.body))
    }
}

/// A message received from the broker.
#[derive(Clone, Default)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub message: Publishing,
    acker: Option<Arc<dyn AckHandle>>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: Publishing,
    ) -> Self {
        Delivery {
            delivery_tag,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered: false,
            message,
            acker: None,
        }
    }

    pub fn with_acker(mut self, acker: Arc<dyn AckHandle>) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.message.body
    }

    pub fn headers(&self) -> &Headers {
        &self.message.headers
    }

    pub fn acker(&self) -> Option<&Arc<dyn AckHandle>> {
        self.acker.as_ref()
    }

    /// Moves the ack handle out; processors only ever see deliveries without one.
    pub fn take_acker(&mut self) -> Option<Arc<dyn AckHandle>> {
        self.acker.take()
    }

    /// Adds the delivery context to `err`.
    pub(crate) fn annotate(&self, err: Error) -> Error {
        err.value("exchange", self.exchange.as_str())
            .value("routing_key", self.routing_key.as_str())
            .value("delivery_tag", self.delivery_tag)
            .value("redelivered", self.redelivered)
            .value("headers", headers::to_json(self.headers()))
            .value("body", truncate_body(self.body()))
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("message", &self.message)
            .field("acker", &self.acker.is_some())
            .finish()
    }
}

/// Lossy UTF-8 rendering of at most [`MAX_BODY_IN_ERRORS`] bytes.
pub fn truncate_body(body: &[u8]) -> String {
    if body.len() <= MAX_BODY_IN_ERRORS {
        return String::from_utf8_lossy(body).into_owned();
    }

    format!(
        "{}...",
        String::from_utf8_lossy(&body[..MAX_BODY_IN_ERRORS])
    )
}
