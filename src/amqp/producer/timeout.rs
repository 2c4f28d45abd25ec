// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use super::Producer;
use crate::{amqp::message::Envelope, context::Context, errors::Error};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Applies a fresh deadline to every call of the wrapped producer.
pub struct TimeoutProducer {
    inner: Arc<dyn Producer>,
    timeout: Duration,
}

impl TimeoutProducer {
    /// Wraps `inner`.
    ///
    /// # Parameters
    /// * `inner` - Producer receiving the bounded calls
    /// * `timeout` - Budget of each call, capped by the caller's own deadline
    pub fn new(inner: Arc<dyn Producer>, timeout: Duration) -> Self {
        TimeoutProducer { inner, timeout }
    }
}

#[async_trait]
impl Producer for TimeoutProducer {
    async fn produce(&self, ctx: &Context, envelope: Envelope) -> Result<(), Error> {
        let ctx = ctx.with_timeout(self.timeout);
        self.inner.produce(&ctx, envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        amqp::{message::Publishing, producer::MockProducer},
        errors::Kind,
    };

    struct Stalled;

    #[async_trait]
    impl Producer for Stalled {
        async fn produce(&self, ctx: &Context, _: Envelope) -> Result<(), Error> {
            Err(ctx.done().await.into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_calls_hit_the_deadline() {
        let producer = TimeoutProducer::new(Arc::new(Stalled), Duration::from_millis(100));

        let err = producer
            .produce(&Context::background(), Envelope::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(&Kind::DeadlineExceeded));
    }

    #[tokio::test]
    async fn each_call_gets_its_own_deadline() {
        let mut inner = MockProducer::new();
        inner
            .expect_produce()
            .withf(|ctx, _| ctx.deadline().is_some() && ctx.err().is_none())
            .times(2)
            .returning(|_, _| Ok(()));

        let producer = TimeoutProducer::new(Arc::new(inner), Duration::from_secs(5));
        let ctx = Context::background();
        let envelope = Envelope::new("x", "k", Publishing::new("body"));

        producer.produce(&ctx, envelope.clone()).await.unwrap();
        producer.produce(&ctx, envelope).await.unwrap();
        assert!(ctx.deadline().is_none());
    }
}
