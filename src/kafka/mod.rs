// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Kafka
//!
//! Kafka counterpart of the AMQP layers: a message model, reader/writer seams over
//! a client, producers, a commit-driven consume loop and time-deferred dispatch.
//! `rdkafka` adapters are available behind the `rdkafka` feature.

pub mod client;
pub mod consumer;
pub mod message;
pub mod producer;
#[cfg(feature = "rdkafka")]
pub mod rdkafka;
pub mod wait;

pub use client::{MessageReader, MessageWriter, WriteErrors};
pub use consumer::{processor_fn, Consumer, Processor};
pub use message::{Header, Message};
pub use producer::{Producer, TimeoutProducer, WriterProducer};
pub use wait::{WaitConsumer, WaitProducer};
