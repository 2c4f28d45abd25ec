// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Reader and writer seams over a Kafka client.

use super::message::Message;
use crate::{context::Context, errors::Error};
use async_trait::async_trait;
use std::fmt;

/// Consumer-group reader with explicit commits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageReader: Send + Sync {
    /// Blocks until a message is available or the context finishes.
    async fn fetch_message(&self, ctx: &Context) -> Result<Message, Error>;

    /// Commits the offsets of `messages`.
    async fn commit_messages(&self, ctx: &Context, messages: &[Message]) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Writes every message; partial failures are reported as [`WriteErrors`].
    async fn write_messages(&self, ctx: &Context, messages: Vec<Message>) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// Per-message outcome of a partially failed write, in input order.
#[derive(Debug)]
pub struct WriteErrors(pub Vec<Option<Error>>);

impl WriteErrors {
    /// Number of messages that failed.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl fmt::Display for WriteErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kafka write errors ({}/{})", self.count(), self.0.len())
    }
}

impl std::error::Error for WriteErrors {}
