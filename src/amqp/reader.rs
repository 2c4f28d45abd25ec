// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reader Loop
//!
//! A [`Reader`] owns one channel per read: it opens the channel, lets a [`Start`]
//! function prepare it (topology, prefetch, consumer declaration), hands the delivery
//! stream to a [`Consume`] function and closes the channel when consumption ends.
//!
//! A [`Runner`] repeats reads until the context is cancelled, reporting each failure
//! and waiting a backoff before rebuilding. With several workers every worker runs
//! its own reader, so each one has its own channel and its own prefetch budget.

use crate::{
    amqp::channel::{Channel, ChannelGetter, DeliveryStream},
    context::Context,
    errors::{self, Error, ErrorHandler, Kind},
    otel::OperationSpan,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default pause between two reads of a [`Runner`].
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Prepares a fresh channel and opens its delivery stream.
#[async_trait]
pub trait Start: Send + Sync {
    async fn start(&self, ctx: &Context, channel: &dyn Channel) -> Result<DeliveryStream, Error>;
}

/// Drains a delivery stream.
///
/// Returns `Ok(())` when `ctx` is cancelled; any error is fatal to the current read.
#[async_trait]
pub trait Consume: Send + Sync {
    async fn consume(&self, ctx: &Context, stream: DeliveryStream) -> Result<(), Error>;

    /// Returns `true` when acknowledgements issued by this consumer may cover
    /// deliveries it did not receive, so it must not share a channel with another
    /// consumer.
    fn exclusive_channel(&self) -> bool {
        false
    }
}

pub struct Reader {
    getter: Arc<dyn ChannelGetter>,
    start: Arc<dyn Start>,
    consume: Arc<dyn Consume>,
}

impl Reader {
    pub fn new(
        getter: Arc<dyn ChannelGetter>,
        start: Arc<dyn Start>,
        consume: Arc<dyn Consume>,
    ) -> Self {
        Reader {
            getter,
            start,
            consume,
        }
    }

    /// Opens a channel, starts consumption and consumes until the stream ends or
    /// `ctx` is cancelled. The channel is closed on every exit path.
    pub async fn read(&self, ctx: &Context) -> Result<(), Error> {
        let (ctx, span) = OperationSpan::start(ctx, "amqp.reader", "read", vec![]);

        let result = self.read_once(&ctx).await;

        span.finish(&result);
        result
    }

    async fn read_once(&self, ctx: &Context) -> Result<(), Error> {
        let channel = self
            .getter
            .channel(ctx)
            .await
            .map_err(|err| err.wrap("reader: open channel"))?;

        let result = match self.start.start(ctx, channel.as_ref()).await {
            Ok(stream) => self
                .consume
                .consume(ctx, stream)
                .await
                .map_err(|err| err.wrap("reader: consume")),
            Err(err) => Err(err.wrap("reader: start")),
        };

        if let Err(err) = channel.close().await {
            debug!(error = err.to_string(), "reader: failure to close channel");
        }

        result
    }
}

/// Runs a reader until cancellation.
#[derive(Clone)]
pub struct Runner {
    reader: Arc<Reader>,
    workers: usize,
    backoff: Duration,
    on_error: ErrorHandler,
}

impl Runner {
    pub fn new(reader: Reader) -> Self {
        Runner {
            reader: Arc::new(reader),
            workers: 1,
            backoff: DEFAULT_BACKOFF,
            on_error: errors::log_handler(),
        }
    }

    /// Number of concurrent readers started by [`Runner::run`].
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Pause between a failed read and the next one.
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Handler receiving every read failure.
    pub fn on_error(mut self, on_error: ErrorHandler) -> Self {
        self.on_error = on_error;
        self
    }

    /// Runs the configured number of workers until `ctx` is cancelled.
    pub async fn run(&self, ctx: &Context) -> Result<(), Error> {
        if self.workers == 1 {
            self.run_worker(ctx, 0).await;
            return Ok(());
        }

        let group = ctx.child();
        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            let runner = self.clone();
            let group = group.clone();
            workers.spawn(async move { runner.run_worker(&group, worker).await });
        }

        let mut result = Ok(());
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(error = err.to_string(), "reader worker aborted");
                group.cancel();
                result = Err(Error::from(err).wrap(Kind::InternalError.to_string()));
            }
        }
        result
    }

    async fn run_worker(&self, ctx: &Context, worker: usize) {
        loop {
            if ctx.is_done() {
                debug!(worker, "reader worker stopping");
                return;
            }

            let result = self.reader.read(ctx).await;
            if ctx.is_done() {
                debug!(worker, "reader worker stopping");
                return;
            }

            match result {
                Ok(()) => continue,
                Err(err) => {
                    (self.on_error)(err.value("worker", worker).tag("component", "amqp.reader"));
                }
            }

            if ctx.sleep(self.backoff).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChannel, FakeGetter};
    use lapin::types::FieldTable;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    struct ConsumeStart;

    #[async_trait]
    impl Start for ConsumeStart {
        async fn start(
            &self,
            _: &Context,
            channel: &dyn Channel,
        ) -> Result<DeliveryStream, Error> {
            channel.consume("q", "", FieldTable::default()).await
        }
    }

    /// Fails the first `failures` reads, then waits for cancellation.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Consume for Flaky {
        async fn consume(&self, ctx: &Context, _: DeliveryStream) -> Result<(), Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::msg("ack failed"));
            }
            ctx.done().await;
            Ok(())
        }
    }

    fn channels(n: usize) -> Vec<Arc<FakeChannel>> {
        (0..n).map(|_| FakeChannel::with_deliveries(1).0).collect()
    }

    #[tokio::test]
    async fn read_closes_the_channel() {
        let channel = FakeChannel::with_deliveries(1).0;
        let getter = FakeGetter::with(vec![channel.clone()]);
        let consume = Arc::new(Flaky {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let reader = Reader::new(getter, Arc::new(ConsumeStart), consume);

        let err = reader.read(&Context::background()).await.unwrap_err();

        assert_eq!(err.to_string(), "reader: consume: ack failed");
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn start_failures_are_wrapped() {
        // no deliveries configured: consume fails
        let getter = FakeGetter::with(vec![FakeChannel::new()]);
        let consume = Arc::new(Flaky {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let reader = Reader::new(getter.clone(), Arc::new(ConsumeStart), consume.clone());

        let err = reader.read(&Context::background()).await.unwrap_err();

        assert_eq!(err.kind(), Some(&Kind::ConsumerDeclarationError("q".to_owned())));
        assert!(err.to_string().starts_with("reader: start"));
        assert_eq!(consume.calls.load(Ordering::SeqCst), 0);
        assert!(getter.opened()[0].is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn runner_reports_and_rebuilds_until_cancelled() {
        let getter = FakeGetter::with(channels(3));
        let consume = Arc::new(Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let reader = Reader::new(getter.clone(), Arc::new(ConsumeStart), consume.clone());

        let reported = Arc::new(Mutex::new(vec![]));
        let sink = reported.clone();
        let runner = Runner::new(reader)
            .backoff(Duration::from_millis(10))
            .on_error(Arc::new(move |err| sink.lock().unwrap().push(err.to_string())));

        let ctx = Context::background();
        let task = tokio::spawn({
            let ctx = ctx.clone();
            async move { runner.run(&ctx).await }
        });

        while consume.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ctx.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(reported.lock().unwrap().len(), 2);
        assert_eq!(getter.opened().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn each_worker_owns_a_channel() {
        let getter = FakeGetter::with(channels(3));
        let consume = Arc::new(Flaky {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let reader = Reader::new(getter.clone(), Arc::new(ConsumeStart), consume.clone());
        let runner = Runner::new(reader).workers(3);

        let ctx = Context::background();
        let task = tokio::spawn({
            let ctx = ctx.clone();
            async move { runner.run(&ctx).await }
        });

        while consume.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ctx.cancel();
        task.await.unwrap().unwrap();

        let opened = getter.opened();
        assert_eq!(opened.len(), 3);
        assert!(opened.iter().all(|channel| channel.is_closed()));
    }
}
