// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use super::Producer;
use crate::{
    amqp::message::Envelope,
    context::Context,
    errors::{Error, ErrorHandler},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Delivers the failures of the wrapped producer to a handler; `produce` always
/// succeeds.
pub struct ErrorProducer {
    inner: Arc<dyn Producer>,
    on_error: ErrorHandler,
}

impl ErrorProducer {
    /// Wraps `inner`.
    ///
    /// # Parameters
    /// * `inner` - Producer whose failures are redirected
    /// * `on_error` - Receives every failure of `inner`
    pub fn new(inner: Arc<dyn Producer>, on_error: ErrorHandler) -> Self {
        ErrorProducer { inner, on_error }
    }
}

#[async_trait]
impl Producer for ErrorProducer {
    async fn produce(&self, ctx: &Context, envelope: Envelope) -> Result<(), Error> {
        if let Err(err) = self.inner.produce(ctx, envelope).await {
            (self.on_error)(err);
        }
        Ok(())
    }
}
