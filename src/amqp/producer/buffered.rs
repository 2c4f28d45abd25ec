// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Buffered Producer
//!
//! `produce` only enqueues: it never waits for the broker and fails with
//! [`Kind::QueueFull`] when the queue is at capacity. A single [`BufferedProducer::run`]
//! loop publishes the queued envelopes through the wrapped producer and hands every
//! failure to the error handler.

use super::Producer;
use crate::{
    amqp::message::Envelope,
    context::{self, Context},
    errors::{Error, ErrorHandler, Kind},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{
    mpsc::{self, error::TryRecvError, error::TrySendError},
    Mutex,
};
use tracing::debug;

struct Pending {
    trace: opentelemetry::Context,
    envelope: Envelope,
}

pub struct BufferedProducer {
    inner: Arc<dyn Producer>,
    // `None` once closed; dropping the sender ends `run` after the queue drained
    tx: StdMutex<Option<mpsc::Sender<Pending>>>,
    rx: Mutex<mpsc::Receiver<Pending>>,
    on_error: ErrorHandler,
}

impl BufferedProducer {
    /// Creates a buffered producer in front of `inner`.
    ///
    /// # Parameters
    /// * `inner` - Producer the queued envelopes are published through
    /// * `size` - Queue capacity; zero is raised to one
    /// * `on_error` - Receives every failure of `inner`, wrapped as
    ///   `buffered producer: publish`
    pub fn new(inner: Arc<dyn Producer>, size: usize, on_error: ErrorHandler) -> Self {
        let (tx, rx) = mpsc::channel(size.max(1));
        BufferedProducer {
            inner,
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            on_error,
        }
    }

    /// Publishes queued envelopes until `ctx` is cancelled or the producer is closed
    /// and its queue is empty.
    ///
    /// Only one loop runs at a time: a second call waits until the first returns.
    ///
    /// # Errors
    /// Never fails on its own; publish failures go to the error handler. An error is
    /// returned only if the receiver lock could not be taken before `ctx` finished.
    pub async fn run(&self, ctx: &Context) -> Result<(), Error> {
        let mut rx = match context::lock(ctx, &self.rx).await {
            Ok(rx) => rx,
            Err(_) if ctx.is_done() => return Ok(()),
            Err(err) => return Err(err),
        };

        loop {
            tokio::select! {
                _ = ctx.done() => {
                    debug!("buffered producer: context done, stopping");
                    return Ok(());
                }
                pending = rx.recv() => match pending {
                    Some(pending) => self.publish(ctx, pending).await,
                    None => {
                        debug!("buffered producer: closed, stopping");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Publishes whatever is queued right now, then returns without waiting for more.
    ///
    /// Meant for shutdown once [`BufferedProducer::run`] has returned: while a run
    /// loop is active it owns the queue and `drain` waits for it, bounded by `ctx`.
    ///
    /// # Errors
    /// Returns the context error if `ctx` finishes before the queue is available.
    pub async fn drain(&self, ctx: &Context) -> Result<(), Error> {
        let mut rx = context::lock(ctx, &self.rx).await?;

        loop {
            match rx.try_recv() {
                Ok(pending) => self.publish(ctx, pending).await,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    /// Rejects new envelopes. Already queued envelopes stay available to `run` and
    /// `drain`; a running loop publishes them and then returns.
    ///
    /// Closing never waits for the run loop. Calling it twice is harmless.
    pub async fn close(&self) {
        if self.sender().take().is_some() {
            debug!("buffered producer: closed");
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<Pending>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn publish(&self, ctx: &Context, pending: Pending) {
        let ctx = ctx.child().with_trace(pending.trace);
        if let Err(err) = self.inner.produce(&ctx, pending.envelope).await {
            (self.on_error)(err.wrap("buffered producer: publish"));
        }
    }
}

#[async_trait]
impl Producer for BufferedProducer {
    async fn produce(&self, ctx: &Context, envelope: Envelope) -> Result<(), Error> {
        let pending = Pending {
            trace: ctx.trace().clone(),
            envelope,
        };

        let sent = match self.sender().as_ref() {
            Some(tx) => tx.try_send(pending),
            None => Err(TrySendError::Closed(pending)),
        };

        sent.map_err(|err| {
            let (kind, pending) = match err {
                TrySendError::Full(pending) => (Kind::QueueFull, pending),
                TrySendError::Closed(pending) => (Kind::ProducerClosed, pending),
            };
            pending
                .envelope
                .annotate(Error::from(kind).wrap("buffered producer: produce"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        amqp::{message::Publishing, producer::MockProducer},
        errors,
    };
    use std::{sync::Mutex as StdMutex, time::Duration};

    fn envelope(body: &str) -> Envelope {
        Envelope::new("x", "k", Publishing::new(body))
    }

    fn collecting() -> (ErrorHandler, Arc<StdMutex<Vec<String>>>) {
        let seen = Arc::new(StdMutex::new(vec![]));
        let sink = seen.clone();
        let handler: ErrorHandler = Arc::new(move |err| sink.lock().unwrap().push(err.to_string()));
        (handler, seen)
    }

    #[tokio::test]
    async fn full_queue_fails_immediately() {
        let (handler, _) = collecting();
        let producer = BufferedProducer::new(Arc::new(MockProducer::new()), 1, handler);
        let ctx = Context::background();

        producer.produce(&ctx, envelope("a")).await.unwrap();
        let err = producer.produce(&ctx, envelope("b")).await.unwrap_err();

        assert_eq!(err.kind(), Some(&Kind::QueueFull));
        assert_eq!(errors::values(&err)["body"], serde_json::json!("b"));
    }

    #[tokio::test]
    async fn drain_publishes_queued_envelopes_and_returns() {
        let mut inner = MockProducer::new();
        inner.expect_produce().times(3).returning(|_, _| Ok(()));
        let (handler, seen) = collecting();
        let producer = BufferedProducer::new(Arc::new(inner), 5, handler);
        let ctx = Context::background();

        for body in ["a", "b", "c"] {
            producer.produce(&ctx, envelope(body)).await.unwrap();
        }
        producer.drain(&ctx).await.unwrap();
        producer.drain(&ctx).await.unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_reports_failures_and_stops_when_closed() {
        let mut inner = MockProducer::new();
        inner
            .expect_produce()
            .times(2)
            .returning(|_, envelope| match envelope.publishing.body.as_slice() {
                b"bad" => Err(Error::msg("unroutable")),
                _ => Ok(()),
            });
        let (handler, seen) = collecting();
        let producer = BufferedProducer::new(Arc::new(inner), 5, handler);
        let ctx = Context::background();

        producer.produce(&ctx, envelope("ok")).await.unwrap();
        producer.produce(&ctx, envelope("bad")).await.unwrap();
        producer.close().await;

        let err = producer.produce(&ctx, envelope("late")).await.unwrap_err();
        assert_eq!(err.kind(), Some(&Kind::ProducerClosed));

        producer.run(&ctx).await.unwrap();
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec!["buffered producer: publish: unroutable".to_owned()]
        );
    }

    #[tokio::test]
    async fn close_does_not_wait_for_a_running_loop() {
        let mut inner = MockProducer::new();
        inner.expect_produce().times(1).returning(|_, _| Ok(()));
        let (handler, seen) = collecting();
        let producer = Arc::new(BufferedProducer::new(Arc::new(inner), 5, handler));
        let ctx = Context::background();

        let task = tokio::spawn({
            let producer = producer.clone();
            let ctx = ctx.clone();
            async move { producer.run(&ctx).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        producer.produce(&ctx, envelope("queued")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), producer.close())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert!(!ctx.is_done());

        let err = producer.produce(&ctx, envelope("late")).await.unwrap_err();
        assert_eq!(err.kind(), Some(&Kind::ProducerClosed));
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (handler, _) = collecting();
        let producer = Arc::new(BufferedProducer::new(
            Arc::new(MockProducer::new()),
            1,
            handler,
        ));
        let ctx = Context::background();

        let task = tokio::spawn({
            let producer = producer.clone();
            let ctx = ctx.clone();
            async move { producer.run(&ctx).await }
        });

        ctx.cancel();
        task.await.unwrap().unwrap();
    }
}
