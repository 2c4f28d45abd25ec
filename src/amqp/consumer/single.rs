// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Single-Message Consumer
//!
//! Each delivery is processed on a fresh background context under its own root span,
//! so cancelling the reader never interrupts in-flight work. The outcome is turned
//! into exactly one acknowledgement; processor failures are reported to the error
//! handler and never end the loop. Only acknowledgement failures and a closed stream
//! are returned to the reader.

use super::Processor;
use crate::{
    acknowledger::{self, Decision},
    amqp::{channel::DeliveryStream, message::Delivery, reader::Consume},
    context::Context,
    errors::{self, Error, ErrorHandler, Kind},
    otel::{self, OperationSpan},
};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::debug;

pub struct SingleConsumer {
    processor: Arc<dyn Processor>,
    on_error: ErrorHandler,
}

impl SingleConsumer {
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        SingleConsumer {
            processor,
            on_error: errors::log_handler(),
        }
    }

    /// Handler receiving processor failures.
    pub fn on_error(mut self, on_error: ErrorHandler) -> Self {
        self.on_error = on_error;
        self
    }

    /// Processes one delivery and applies the resulting acknowledger.
    pub async fn handle(&self, mut delivery: Delivery) -> Result<(), Error> {
        let acker = delivery.take_acker();

        let remote = otel::extract_amqp(delivery.headers());
        let (ctx, span) = OperationSpan::consumer(
            &remote,
            "amqp.consumer",
            "process",
            vec![
                KeyValue::new("exchange", delivery.exchange.clone()),
                KeyValue::new("routing_key", delivery.routing_key.clone()),
            ],
        );

        debug!(
            delivery_tag = delivery.delivery_tag,
            exchange = delivery.exchange,
            "received delivery"
        );

        let Decision {
            acknowledger,
            report,
        } = acknowledger::decide(self.processor.process(&ctx, &delivery).await);

        span.label(KeyValue::new("acknowledger", acknowledger.label()));

        let report = report.map(|err| delivery.annotate(err.wrap("consumer: process")));
        span.finish_with(report.as_ref());
        if let Some(err) = report {
            (self.on_error)(err);
        }

        let Some(acker) = acker else {
            return Err(delivery.annotate(
                Error::from(Kind::InternalError).wrap("consumer: delivery without ack handle"),
            ));
        };

        acknowledger
            .apply(acker.as_ref(), false)
            .await
            .map_err(|err| delivery.annotate(err.wrap("consumer: acknowledge")))
    }
}

#[async_trait]
impl Consume for SingleConsumer {
    async fn consume(&self, ctx: &Context, stream: DeliveryStream) -> Result<(), Error> {
        loop {
            let next = tokio::select! {
                _ = ctx.done() => return Ok(()),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.handle(delivery).await?,
                Some(Err(err)) => return Err(err.wrap("consumer: receive")),
                None => return Err(Error::from(Kind::StreamClosed).wrap("consumer: receive")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        acknowledger::Acknowledger,
        amqp::consumer::processor_fn,
        testing::{delivery, AckCall, FakeChannel, RecordingAcker},
    };
    use std::sync::Mutex;

    fn collecting() -> (ErrorHandler, Arc<Mutex<Vec<Error>>>) {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        (Arc::new(move |err| sink.lock().unwrap().push(err)), seen)
    }

    async fn run_one(
        processor: Arc<dyn Processor>,
        body: &str,
    ) -> (Arc<RecordingAcker>, Vec<Error>) {
        let (handler, seen) = collecting();
        let consumer = SingleConsumer::new(processor).on_error(handler);

        let (channel, tx) = FakeChannel::with_deliveries(1);
        let stream = crate::amqp::channel::Channel::consume(
            channel.as_ref(),
            "q",
            "",
            Default::default(),
        )
        .await
        .unwrap();

        let (delivery, acker) = delivery(1, body);
        tx.send(delivery).await.unwrap();
        drop(tx);

        let err = consumer
            .consume(&Context::background(), stream)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(&Kind::StreamClosed));

        let seen = std::mem::take(&mut *seen.lock().unwrap());
        (acker, seen)
    }

    #[tokio::test]
    async fn success_acks_once() {
        let bodies = Arc::new(Mutex::new(vec![]));
        let recorded = bodies.clone();
        let processor = processor_fn(move |_, delivery: Delivery| {
            let recorded = recorded.clone();
            async move {
                assert!(delivery.acker().is_none());
                recorded.lock().unwrap().push(delivery.body().to_vec());
                Ok(())
            }
        });

        let (acker, reported) = run_one(Arc::new(processor), "test").await;

        assert_eq!(bodies.lock().unwrap().clone(), vec![b"test".to_vec()]);
        assert_eq!(acker.calls(), vec![AckCall::Ack { multiple: false }]);
        assert!(reported.is_empty());
    }

    #[tokio::test]
    async fn temporary_failures_requeue_and_report() {
        let processor = processor_fn(|_, _| async { Err(Error::msg("db down")) });

        let (acker, reported) = run_one(Arc::new(processor), "test").await;

        assert_eq!(
            acker.calls(),
            vec![AckCall::Nack {
                multiple: false,
                requeue: true
            }]
        );
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].to_string(), "consumer: process: db down");
        assert_eq!(
            errors::acknowledger(&reported[0]),
            Some(Acknowledger::NackRequeue)
        );
        assert_eq!(errors::values(&reported[0])["body"], serde_json::json!("test"));
    }

    #[tokio::test]
    async fn permanent_failures_discard() {
        let processor = processor_fn(|_, _| async { Err(Error::msg("bad input").permanent()) });

        let (acker, reported) = run_one(Arc::new(processor), "test").await;

        assert_eq!(
            acker.calls(),
            vec![AckCall::Nack {
                multiple: false,
                requeue: false
            }]
        );
        assert_eq!(reported.len(), 1);
    }

    #[tokio::test]
    async fn ignored_failures_apply_their_hint_silently() {
        let processor = processor_fn(|_, _| async {
            Err(Error::from(Kind::Forwarded)
                .with_acknowledger(Acknowledger::Ack)
                .ignored())
        });

        let (acker, reported) = run_one(Arc::new(processor), "test").await;

        assert_eq!(acker.calls(), vec![AckCall::Ack { multiple: false }]);
        assert!(reported.is_empty());
    }

    #[tokio::test]
    async fn ack_failures_end_the_loop() {
        let consumer = SingleConsumer::new(Arc::new(processor_fn(|_, _| async { Ok(()) })));

        let acker = Arc::new(RecordingAcker::failing());
        let delivery = Delivery::new(1, "", "q", Default::default()).with_acker(acker.clone());

        let err = consumer.handle(delivery).await.unwrap_err();
        assert!(err.to_string().starts_with("consumer: acknowledge: failure to ack message"));
        assert_eq!(acker.calls().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_is_a_clean_exit() {
        let consumer = SingleConsumer::new(Arc::new(processor_fn(|_, _| async { Ok(()) })));
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let ctx = Context::background();
        ctx.cancel();

        consumer
            .consume(&ctx, DeliveryStream::from_receiver(rx))
            .await
            .unwrap();
    }
}
