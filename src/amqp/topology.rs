// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module provides functionality for defining and installing RabbitMQ topology
//! components: exchanges, queues, and the bindings between them. It supports Dead
//! Letter Queues (DLQs) and retry queues.
//!
//! A [`Topology`] is a plain value. Installing it is idempotent, so readers and
//! forwarders apply it on every fresh channel before consuming or publishing.

use crate::{
    amqp::{
        channel::Channel,
        exchange::ExchangeDefinition,
        message::Headers,
        queue::{QueueBinding, QueueDefinition},
    },
    context::Context,
    errors::{Error, Kind},
    otel::OperationSpan,
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
};
use opentelemetry::KeyValue;
use tracing::{debug, error};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Exchanges, queues and bindings required by a service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queue_bindings: Vec<QueueBinding>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exchange definition.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition; a later definition with the same name replaces it.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.retain(|q| q.name != def.name);
        self.queues.push(def);
        self
    }

    /// Adds a standalone queue-to-exchange binding.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queue_bindings.push(binding);
        self
    }

    /// Appends every definition of `other`.
    pub fn merge(mut self, other: Topology) -> Self {
        self.exchanges.extend(other.exchanges);
        for queue in other.queues {
            self = self.queue(queue);
        }
        self.queue_bindings.extend(other.queue_bindings);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty() && self.queues.is_empty() && self.queue_bindings.is_empty()
    }

    /// Installs the topology on `channel`.
    ///
    /// Operations run in order:
    /// 1. Creates all exchanges
    /// 2. Creates all queues (including DLQs and retry queues if configured)
    /// 3. Sets up exchange-to-exchange bindings
    /// 4. Sets up queue-to-exchange bindings
    pub async fn install(&self, ctx: &Context, channel: &dyn Channel) -> Result<(), Error> {
        let (_, span) = OperationSpan::start(
            ctx,
            "amqp.topology",
            "install",
            vec![
                KeyValue::new("exchanges", self.exchanges.len() as i64),
                KeyValue::new("queues", self.queues.len() as i64),
            ],
        );

        let result = self.install_all(channel).await;
        span.finish(&result);
        result
    }

    async fn install_all(&self, channel: &dyn Channel) -> Result<(), Error> {
        self.install_exchanges(channel).await?;
        self.install_queues(channel).await?;
        self.binding_exchanges(channel).await?;
        self.binding_queues(channel).await
    }

    async fn install_exchanges(&self, channel: &dyn Channel) -> Result<(), Error> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            channel
                .exchange_declare(
                    &exch.name,
                    (&exch.kind).into(),
                    ExchangeDeclareOptions {
                        passive: exch.passive,
                        durable: exch.durable,
                        auto_delete: exch.delete,
                        internal: exch.internal,
                        nowait: exch.no_wait,
                    },
                    FieldTable::from(exch.params.clone()),
                )
                .await
                .map_err(|err| {
                    error!(
                        error = err.to_string(),
                        name = exch.name,
                        "error to declare the exchange"
                    );
                    err.wrap(Kind::DeclareExchangeError(exch.name.clone()).to_string())
                        .value("exchange", exch.name.as_str())
                })?;

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queues(&self, channel: &dyn Channel) -> Result<(), Error> {
        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            let mut queue_args = def.args.clone();

            if def.retry_name.is_some() {
                self.declare_retry(channel, def, &mut queue_args).await?;
            }

            if def.dlq_name.is_some() {
                self.declare_dlq(channel, def, &mut queue_args).await?;
            }

            if let Some(ttl) = def.ttl {
                queue_args.insert(
                    ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                    AMQPValue::LongInt(LongInt::from(ttl)),
                );
            }

            if let Some(max) = def.max_length {
                queue_args.insert(
                    ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                    AMQPValue::LongInt(LongInt::from(max)),
                );
            }

            if let Some(max_bytes) = def.max_length_bytes {
                queue_args.insert(
                    ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES),
                    AMQPValue::LongInt(LongInt::from(max_bytes)),
                );
            }

            declare_queue(channel, &def.name, def, queue_args).await?;
            debug!("queue: {} was created", def.name);
        }

        Ok(())
    }

    /// Declares `<queue>-retry`, whose expired messages dead-letter back to the queue,
    /// and points the queue's dead-lettering at it.
    async fn declare_retry(
        &self,
        channel: &dyn Channel,
        def: &QueueDefinition,
        queue_args: &mut Headers,
    ) -> Result<(), Error> {
        let (Some(retry_name), Some(retry_ttl)) = (def.retry_name.clone(), def.retry_ttl) else {
            return Ok(());
        };

        let mut args = Headers::new();
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from("")),
        );
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(def.name.clone())),
        );
        args.insert(
            ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
            AMQPValue::LongInt(LongInt::from(retry_ttl)),
        );

        declare_queue(channel, &retry_name, def, args).await?;

        queue_args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from("")),
        );
        queue_args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(retry_name)),
        );
        Ok(())
    }

    /// Declares `<queue>-dlq`. Without a retry queue, the queue dead-letters straight
    /// into it.
    async fn declare_dlq(
        &self,
        channel: &dyn Channel,
        def: &QueueDefinition,
        queue_args: &mut Headers,
    ) -> Result<(), Error> {
        let Some(dlq_name) = def.dlq_name.clone() else {
            return Ok(());
        };

        declare_queue(channel, &dlq_name, def, Headers::new()).await?;

        if def.retry_name.is_none() {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from("")),
            );
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                AMQPValue::LongString(LongString::from(dlq_name)),
            );
        }
        Ok(())
    }

    async fn binding_exchanges(&self, channel: &dyn Channel) -> Result<(), Error> {
        for exch in &self.exchanges {
            for binding in &exch.bindings {
                debug!(
                    "binding exchange: {} to the exchange: {} with the key: {}",
                    exch.name, binding.source, binding.routing_key
                );

                channel
                    .exchange_bind(
                        &exch.name,
                        &binding.source,
                        &binding.routing_key,
                        FieldTable::from(binding.args.clone()),
                    )
                    .await
                    .map_err(|err| {
                        error!(error = err.to_string(), "error to bind exchange to exchange");
                        err.wrap(
                            Kind::BindingError(exch.name.clone(), binding.source.clone())
                                .to_string(),
                        )
                    })?;
            }
        }

        Ok(())
    }

    async fn binding_queues(&self, channel: &dyn Channel) -> Result<(), Error> {
        let bindings = self
            .queues
            .iter()
            .flat_map(|q| q.bindings.iter())
            .chain(self.queue_bindings.iter());

        for binding in bindings {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    FieldTable::from(binding.args.clone()),
                )
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), "error to bind queue to exchange");
                    err.wrap(
                        Kind::BindingError(
                            binding.queue_name.clone(),
                            binding.exchange_name.clone(),
                        )
                        .to_string(),
                    )
                    .value("routing_key", binding.routing_key.as_str())
                })?;
        }

        Ok(())
    }
}

async fn declare_queue(
    channel: &dyn Channel,
    name: &str,
    def: &QueueDefinition,
    args: Headers,
) -> Result<(), Error> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                passive: def.passive,
                durable: def.durable,
                exclusive: def.exclusive,
                auto_delete: def.delete,
                nowait: def.no_wait,
            },
            FieldTable::from(args),
        )
        .await
        .map_err(|err| {
            error!(error = err.to_string(), name, "failure to declare queue");
            err.wrap(Kind::DeclareQueueError(name.to_owned()).to_string())
                .value("queue", name)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        amqp::exchange::ExchangeBinding,
        testing::FakeChannel,
    };

    fn queue_arg<'a>(args: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        args.inner().get(key)
    }

    #[tokio::test]
    async fn installs_in_dependency_order() {
        let topology = Topology::new()
            .exchange(
                ExchangeDefinition::new("events")
                    .topic()
                    .durable()
                    .bind(ExchangeBinding::new("upstream", "#")),
            )
            .queue(QueueDefinition::new("orders").durable().bind("events", "orders.*"))
            .queue_binding(QueueBinding::new("orders").exchange("events").routing_key("legacy"));

        let channel = FakeChannel::new();
        topology
            .install(&Context::background(), channel.as_ref())
            .await
            .unwrap();

        let exchanges = channel.declared_exchanges.lock().unwrap().clone();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].0, "events");
        assert!(exchanges[0].2.durable);

        assert_eq!(
            channel.exchange_bindings.lock().unwrap().clone(),
            vec![("events".to_owned(), "upstream".to_owned(), "#".to_owned())]
        );
        assert_eq!(
            channel.queue_bindings.lock().unwrap().clone(),
            vec![
                ("orders".to_owned(), "events".to_owned(), "orders.*".to_owned()),
                ("orders".to_owned(), "events".to_owned(), "legacy".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn retry_and_dlq_queues_are_wired() {
        let topology = Topology::new().queue(
            QueueDefinition::new("orders")
                .with_retry(1_000, 3)
                .with_dlq()
                .ttl(60_000)
                .max_length(10),
        );

        let channel = FakeChannel::new();
        topology
            .install(&Context::background(), channel.as_ref())
            .await
            .unwrap();

        let queues = channel.declared_queues.lock().unwrap().clone();
        let names: Vec<_> = queues.iter().map(|q| q.0.as_str()).collect();
        assert_eq!(names, vec!["orders-retry", "orders-dlq", "orders"]);

        let retry_args = &queues[0].2;
        assert_eq!(
            queue_arg(retry_args, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from("orders")))
        );
        assert_eq!(
            queue_arg(retry_args, AMQP_HEADERS_MESSAGE_TTL),
            Some(&AMQPValue::LongInt(1_000))
        );

        let main_args = &queues[2].2;
        assert_eq!(
            queue_arg(main_args, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from("orders-retry")))
        );
        assert_eq!(
            queue_arg(main_args, AMQP_HEADERS_MAX_LENGTH),
            Some(&AMQPValue::LongInt(10))
        );
    }

    #[tokio::test]
    async fn dlq_without_retry_dead_letters_into_the_dlq() {
        let topology = Topology::new().queue(QueueDefinition::new("orders").with_dlq());

        let channel = FakeChannel::new();
        topology
            .install(&Context::background(), channel.as_ref())
            .await
            .unwrap();

        let queues = channel.declared_queues.lock().unwrap().clone();
        assert_eq!(
            queue_arg(&queues[1].2, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from("orders-dlq")))
        );
    }

    #[tokio::test]
    async fn declaration_failures_keep_the_broker_error_at_the_root() {
        let channel = FakeChannel::new();
        channel.fail_declarations();

        let err = Topology::new()
            .queue(QueueDefinition::new("orders"))
            .install(&Context::background(), channel.as_ref())
            .await
            .unwrap_err();

        assert!(err.is_protocol_error());
        assert!(err.to_string().starts_with("failure to declare a queue `orders`"));
    }

    #[test]
    fn merge_replaces_queues_by_name() {
        let merged = Topology::new()
            .queue(QueueDefinition::new("a"))
            .merge(Topology::new().queue(QueueDefinition::new("a").durable()));

        assert_eq!(merged.queues.len(), 1);
        assert!(merged.queues[0].durable);
        assert!(!merged.is_empty());
    }
}
