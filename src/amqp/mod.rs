// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP
//!
//! Layers over an AMQP 0-9-1 broker, bottom-up: connections and channels, topology,
//! producers, the reader loop, consumers, retry and skip/forward. The broker is
//! reached through the traits in [`channel`]; [`lapin`] implements them.

pub mod channel;
pub mod connection;
pub mod consumer;
pub mod dialer;
pub mod exchange;
pub mod headers;
pub mod lapin;
pub mod message;
pub mod pool;
pub mod producer;
pub mod queue;
pub mod reader;
pub mod retry;
pub mod skip;
pub mod topology;
