// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Producers
//!
//! Every producer implements [`Producer`]. They compose: a [`SimpleProducer`] owns a
//! channel, a [`TimeoutProducer`] bounds each call, a [`MultiProducer`] fans calls
//! out over several producers, a [`BufferedProducer`] publishes asynchronously and an
//! [`ErrorProducer`] hands failures to a callback instead of returning them.

mod buffered;
mod error;
mod multi;
mod simple;
mod timeout;

pub use buffered::BufferedProducer;
pub use error::ErrorProducer;
pub use multi::MultiProducer;
pub use simple::SimpleProducer;
pub use timeout::TimeoutProducer;

use crate::{
    amqp::message::{Delivery, Envelope, Publishing},
    context::Context,
    errors::Error,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Publishes envelopes to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Producer: Send + Sync {
    /// Publishes one envelope.
    ///
    /// # Parameters
    /// * `ctx` - Cancellation, deadline and trace of the call
    /// * `envelope` - Exchange, routing key and message
    ///
    /// # Errors
    /// Returns the error of the failed publish, enriched with the routing values.
    async fn produce(&self, ctx: &Context, envelope: Envelope) -> Result<(), Error>;
}

#[async_trait]
impl<P: Producer + ?Sized> Producer for Arc<P> {
    async fn produce(&self, ctx: &Context, envelope: Envelope) -> Result<(), Error> {
        (**self).produce(ctx, envelope).await
    }
}

/// Re-publishes a received message to `exchange`/`routing_key`.
///
/// The publishing keeps every field of the delivery except the broker's `x-death`
/// history.
///
/// # Parameters
/// * `ctx` - Context of the publish
/// * `producer` - Producer used for the copy
/// * `delivery` - Received message to copy
/// * `exchange` - Target exchange
/// * `routing_key` - Target routing key
///
/// # Errors
/// Returns the producer error wrapped as `reproduce`.
pub async fn reproduce(
    ctx: &Context,
    producer: &dyn Producer,
    delivery: &Delivery,
    exchange: &str,
    routing_key: &str,
) -> Result<(), Error> {
    let envelope = Envelope::new(exchange, routing_key, Publishing::from_delivery(delivery));
    producer
        .produce(ctx, envelope)
        .await
        .map_err(|err| err.wrap("reproduce"))
}
