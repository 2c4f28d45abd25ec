// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker fakes shared by the unit tests.

use crate::{
    amqp::{
        channel::{Channel, ChannelGetter, Confirmation, Connection, DeliveryStream, Dial},
        message::{AckHandle, Delivery, Envelope, Publishing},
    },
    context::Context,
    errors::{Error, Kind, ProtocolError},
    kafka::{
        client::{MessageReader, MessageWriter},
        message::Message as KafkaMessage,
    },
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueDeclareOptions},
    types::FieldTable,
    ExchangeKind,
};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCall {
    Ack { multiple: bool },
    Nack { multiple: bool, requeue: bool },
}

/// Ack handle recording every call.
#[derive(Default)]
pub struct RecordingAcker {
    calls: Mutex<Vec<AckCall>>,
    fail: bool,
}

impl RecordingAcker {
    pub fn failing() -> Self {
        RecordingAcker {
            calls: Mutex::default(),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<AckCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: AckCall) -> Result<(), Error> {
        self.calls.lock().unwrap().push(call);
        if self.fail {
            return Err(Error::msg("channel closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl AckHandle for RecordingAcker {
    async fn ack(&self, multiple: bool) -> Result<(), Error> {
        self.record(AckCall::Ack { multiple })
    }

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), Error> {
        self.record(AckCall::Nack { multiple, requeue })
    }
}

/// A delivery wired to a fresh recording ack handle.
pub fn delivery(tag: u64, body: &str) -> (Delivery, Arc<RecordingAcker>) {
    delivery_with(tag, Publishing::new(body))
}

pub fn delivery_with(tag: u64, publishing: Publishing) -> (Delivery, Arc<RecordingAcker>) {
    let acker = Arc::new(RecordingAcker::default());
    let delivery = Delivery::new(tag, "", "q", publishing).with_acker(acker.clone());
    (delivery, acker)
}

/// Scripted publish outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Confirm(Confirmation),
    Fail,
    ProtocolFail,
}

#[derive(Default)]
pub struct FakeChannel {
    pub declared_exchanges: Mutex<Vec<(String, ExchangeKind, ExchangeDeclareOptions)>>,
    pub declared_queues: Mutex<Vec<(String, QueueDeclareOptions, FieldTable)>>,
    pub queue_bindings: Mutex<Vec<(String, String, String)>>,
    pub exchange_bindings: Mutex<Vec<(String, String, String)>>,
    pub qos: Mutex<Option<u16>>,
    pub consumes: Mutex<Vec<(String, String, FieldTable)>>,
    pub published: Mutex<Vec<Envelope>>,
    confirm_mode: AtomicBool,
    closed: AtomicBool,
    outcomes: Mutex<VecDeque<PublishOutcome>>,
    deliveries: Mutex<Option<mpsc::Receiver<Delivery>>>,
    fail_declare: AtomicBool,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeChannel::default())
    }

    /// A channel whose consume returns a stream fed by the returned sender.
    pub fn with_deliveries(capacity: usize) -> (Arc<Self>, mpsc::Sender<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        let channel = FakeChannel::default();
        *channel.deliveries.lock().unwrap() = Some(rx);
        (Arc::new(channel), tx)
    }

    /// Queues outcomes for the next publishes; afterwards publishes succeed.
    pub fn script(&self, outcomes: &[PublishOutcome]) {
        self.outcomes.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn fail_declarations(&self) {
        self.fail_declare.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn confirm_mode(&self) -> bool {
        self.confirm_mode.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<Envelope> {
        self.published.lock().unwrap().clone()
    }

    fn declare_result(&self, what: &str) -> Result<(), Error> {
        if self.fail_declare.load(Ordering::SeqCst) {
            return Err(Error::from(ProtocolError {
                code: 406,
                reason: format!("PRECONDITION_FAILED - {what}"),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for FakeChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        _args: FieldTable,
    ) -> Result<(), Error> {
        self.declare_result(name)?;
        self.declared_exchanges
            .lock()
            .unwrap()
            .push((name.to_owned(), kind, options));
        Ok(())
    }

    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        _args: FieldTable,
    ) -> Result<(), Error> {
        self.declare_result(destination)?;
        self.exchange_bindings.lock().unwrap().push((
            destination.to_owned(),
            source.to_owned(),
            routing_key.to_owned(),
        ));
        Ok(())
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        args: FieldTable,
    ) -> Result<(), Error> {
        self.declare_result(name)?;
        self.declared_queues
            .lock()
            .unwrap()
            .push((name.to_owned(), options, args));
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _args: FieldTable,
    ) -> Result<(), Error> {
        self.declare_result(queue)?;
        self.queue_bindings.lock().unwrap().push((
            queue.to_owned(),
            exchange.to_owned(),
            routing_key.to_owned(),
        ));
        Ok(())
    }

    async fn qos(&self, prefetch: u16) -> Result<(), Error> {
        *self.qos.lock().unwrap() = Some(prefetch);
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        args: FieldTable,
    ) -> Result<DeliveryStream, Error> {
        self.consumes
            .lock()
            .unwrap()
            .push((queue.to_owned(), consumer_tag.to_owned(), args));

        let receiver = self.deliveries.lock().unwrap().take();
        match receiver {
            Some(rx) => Ok(DeliveryStream::from_receiver(rx)),
            None => Err(Error::from(Kind::ConsumerDeclarationError(queue.to_owned()))),
        }
    }

    async fn confirm_select(&self) -> Result<(), Error> {
        self.confirm_mode.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, envelope: &Envelope) -> Result<Confirmation, Error> {
        if self.is_closed() {
            return Err(Error::msg("channel closed"));
        }

        let outcome = self.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(PublishOutcome::Fail) => Err(Error::msg("connection reset")),
            Some(PublishOutcome::ProtocolFail) => Err(Error::from(ProtocolError {
                code: 404,
                reason: "NOT_FOUND - no exchange".to_owned(),
            })),
            Some(PublishOutcome::Confirm(confirmation)) => {
                self.published.lock().unwrap().push(envelope.clone());
                Ok(confirmation)
            }
            None => {
                self.published.lock().unwrap().push(envelope.clone());
                Ok(if self.confirm_mode() {
                    Confirmation::Ack
                } else {
                    Confirmation::NotRequested
                })
            }
        }
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Channel getter handing out queued channels, then fresh ones.
#[derive(Default)]
pub struct FakeGetter {
    queued: Mutex<VecDeque<Arc<FakeChannel>>>,
    opened: Mutex<Vec<Arc<FakeChannel>>>,
    fail: AtomicBool,
}

impl FakeGetter {
    pub fn with(channels: Vec<Arc<FakeChannel>>) -> Arc<Self> {
        Arc::new(FakeGetter {
            queued: Mutex::new(channels.into()),
            ..Default::default()
        })
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn opened(&self) -> Vec<Arc<FakeChannel>> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelGetter for FakeGetter {
    async fn channel(&self, ctx: &Context) -> Result<Arc<dyn Channel>, Error> {
        if let Some(kind) = ctx.err() {
            return Err(kind.into());
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::from(Kind::ChannelError));
        }

        let channel = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(FakeChannel::new);
        self.opened.lock().unwrap().push(channel.clone());
        Ok(channel)
    }
}

#[derive(Default)]
pub struct FakeConnection {
    opened: AtomicUsize,
    fail: AtomicBool,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn channels_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn fail_channels(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn channel(&self) -> Result<Arc<dyn Channel>, Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::msg("channel limit reached"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeChannel::new())
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Dial function failing for a fixed set of URLs.
#[derive(Default)]
pub struct FakeDial {
    failing: Vec<String>,
    attempts: Mutex<Vec<String>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeDial {
    pub fn failing_for(urls: &[&str]) -> Self {
        FakeDial {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dial for FakeDial {
    async fn dial(&self, _ctx: &Context, url: &str) -> Result<Arc<dyn Connection>, Error> {
        self.attempts.lock().unwrap().push(url.to_owned());
        if self.failing.iter().any(|u| u == url) {
            return Err(Error::from(Kind::ConnectionError).value("url", url));
        }

        let conn = Arc::new(FakeConnection::default());
        self.connections.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}

/// In-memory Kafka topic: written messages get sequential offsets and become
/// readable; commits are recorded by offset.
#[derive(Default)]
pub struct MemoryTopic {
    pending: Mutex<VecDeque<KafkaMessage>>,
    written: Mutex<Vec<KafkaMessage>>,
    committed: Mutex<Vec<i64>>,
    notify: tokio::sync::Notify,
}

impl MemoryTopic {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(messages: Vec<KafkaMessage>) -> Arc<Self> {
        let topic = Self::new();
        topic.append(messages);
        topic
    }

    fn append(&self, messages: Vec<KafkaMessage>) {
        let mut written = self.written.lock().unwrap();
        let mut pending = self.pending.lock().unwrap();
        for mut message in messages {
            message.offset = written.len() as i64;
            message.time = Some(chrono::Utc::now());
            written.push(message.clone());
            pending.push_back(message);
        }
        self.notify.notify_waiters();
    }

    pub fn written(&self) -> Vec<KafkaMessage> {
        self.written.lock().unwrap().clone()
    }

    pub fn committed(&self) -> Vec<i64> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageReader for MemoryTopic {
    async fn fetch_message(&self, ctx: &Context) -> Result<KafkaMessage, Error> {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.pending.lock().unwrap().pop_front() {
                return Ok(message);
            }
            tokio::select! {
                kind = ctx.done() => return Err(kind.into()),
                _ = notified => {}
            }
        }
    }

    async fn commit_messages(&self, _: &Context, messages: &[KafkaMessage]) -> Result<(), Error> {
        self.committed
            .lock()
            .unwrap()
            .extend(messages.iter().map(|m| m.offset));
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl MessageWriter for MemoryTopic {
    async fn write_messages(&self, _: &Context, messages: Vec<KafkaMessage>) -> Result<(), Error> {
        self.append(messages);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
