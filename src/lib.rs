// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Courier
//!
//! Message-processing core for AMQP and Kafka: connection management, channel
//! pooling, topology, producers, consumer loops with acknowledgement routing, bounded
//! retry, tenant skip/forward and time-deferred dispatch.

pub mod acknowledger;
pub mod amqp;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod errors;
pub mod kafka;
pub mod otel;

#[cfg(test)]
mod testing;
