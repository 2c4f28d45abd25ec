// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! This module provides the error model shared by every messaging component.
//!
//! Failures start from a root cause (a [`Kind`], a [`ProtocolError`] reported by the
//! broker, or any foreign error) and are then decorated while they bubble up. Each
//! decoration is a [`Layer`]: a wrap message, tags, values, a temporary flag, an
//! "ignored" marker, an acknowledger hint, a severity or a captured stack. Layers
//! compose by wrapping, and extraction walks the chain from the outermost layer down
//! to the root cause, stopping at the first match.

mod classify;
mod extract;
mod format;

pub use classify::{is_permanent, is_temporary, register_permanent, Predicate};
pub use extract::{acknowledger, is_ignored, severity, stack, tags, values};
pub use format::{single_line, verbose};

use crate::acknowledger::Acknowledger;
use std::{
    backtrace::Backtrace,
    collections::BTreeMap,
    error::Error as StdError,
    fmt,
    sync::Arc,
};
use thiserror::Error;
use tracing::Level;

/// Boxed, thread-safe error used as the root cause of an [`Error`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Root failure kinds raised by the messaging components.
///
/// Kinds describe *what* failed. Every other piece of context (exchange, routing key,
/// tenant, acknowledger decision) is attached with layers on the wrapping [`Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    #[error("internal error")]
    InternalError,

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("no urls configured")]
    NoUrls,

    #[error("failure to connect")]
    ConnectionError,

    #[error("failure to create a channel")]
    ChannelError,

    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    #[error("failure to bind `{0}` to `{1}`")]
    BindingError(String, String),

    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    #[error("failure to publish")]
    PublishingError,

    #[error("publish not confirmed by the broker")]
    PublishNotConfirmed,

    #[error("confirmation channel closed")]
    ConfirmationClosed,

    #[error("failure to ack message")]
    AckMessageError,

    #[error("failure to nack message")]
    NackMessageError,

    #[error("delivery stream closed")]
    StreamClosed,

    #[error("producer queue is full")]
    QueueFull,

    #[error("producer closed")]
    ProducerClosed,

    #[error("missing header `{0}`")]
    MissingHeader(String),

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    #[error("failure to decode message: {0}")]
    Decode(String),

    #[error("max retry attempts reached")]
    MaxAttemptsReached,

    #[error("message retried")]
    Retried,

    #[error("organization not found")]
    OrganizationNotFound,

    #[error("message forwarded")]
    Forwarded,

    #[error("failure to fetch message")]
    FetchError,

    #[error("failure to commit messages")]
    CommitError,

    #[error("failure to write messages")]
    WriteError,
}

/// Structured error reported by the AMQP broker (a channel or connection exception).
///
/// A channel whose failure has a `ProtocolError` as root cause is unusable and is
/// never handed back to a [`ChannelPool`](crate::amqp::pool::ChannelPool).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("broker protocol error {code}: {reason}")]
pub struct ProtocolError {
    pub code: u16,
    pub reason: String,
}

/// Plain message used as root cause by [`Error::msg`].
#[derive(Error, Debug)]
#[error("{0}")]
struct Message(String);

/// A single decoration on an [`Error`].
#[derive(Debug, Clone)]
pub enum Layer {
    Message(String),
    Tags(BTreeMap<String, String>),
    Values(BTreeMap<String, serde_json::Value>),
    Temporary(bool),
    Ignored,
    Acknowledger(Acknowledger),
    Severity(Level),
    Stack(Arc<Backtrace>),
}

/// One link visited while walking an error chain: either a layer or a cause in the
/// root's `source()` chain.
#[derive(Debug, Clone, Copy)]
pub enum Link<'a> {
    Layer(&'a Layer),
    Cause(&'a (dyn StdError + 'static)),
}

/// Annotated error carried through every messaging component.
pub struct Error {
    // innermost first
    layers: Vec<Layer>,
    root: BoxError,
}

impl Error {
    /// Creates an error whose root cause is a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::from_boxed(Box::new(Message(message.into())))
    }

    /// Creates an error from a boxed root cause, keeping the layers of a boxed [`Error`].
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<Chained>() {
            Ok(chained) => chained.0,
            Err(root) => Error {
                layers: vec![],
                root,
            },
        }
    }

    /// Wraps the error with a message, rendered as `message: inner`.
    pub fn wrap(self, message: impl Into<String>) -> Self {
        self.layer(Layer::Message(message.into()))
    }

    /// Attaches a string tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(Layer::Tags(tags)) = self.layers.last_mut() {
            tags.insert(key.into(), value.into());
            return self;
        }

        let mut tags = BTreeMap::new();
        tags.insert(key.into(), value.into());
        self.layer(Layer::Tags(tags))
    }

    /// Attaches a structured value.
    pub fn value(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        if let Some(Layer::Values(values)) = self.layers.last_mut() {
            values.insert(key.into(), value.into());
            return self;
        }

        let mut values = BTreeMap::new();
        values.insert(key.into(), value.into());
        self.layer(Layer::Values(values))
    }

    /// Marks the error as temporary (`true`) or permanent (`false`).
    pub fn temporary(self, temporary: bool) -> Self {
        self.layer(Layer::Temporary(temporary))
    }

    /// Shorthand for `temporary(false)`.
    pub fn permanent(self) -> Self {
        self.temporary(false)
    }

    /// Marks the error as a control signal that must not be reported.
    pub fn ignored(self) -> Self {
        self.layer(Layer::Ignored)
    }

    /// Attaches the acknowledger the consumer must apply to the delivery.
    pub fn with_acknowledger(self, acknowledger: Acknowledger) -> Self {
        self.layer(Layer::Acknowledger(acknowledger))
    }

    /// Attaches a reporting severity.
    pub fn severity(self, level: Level) -> Self {
        self.layer(Layer::Severity(level))
    }

    /// Captures the current stack, honouring `RUST_BACKTRACE`.
    pub fn with_stack(self) -> Self {
        self.layer(Layer::Stack(Arc::new(Backtrace::capture())))
    }

    fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Walks the chain from the outermost layer to the deepest cause.
    pub fn chain(&self) -> impl Iterator<Item = Link<'_>> {
        self.layers
            .iter()
            .rev()
            .map(Link::Layer)
            .chain(self.causes().map(Link::Cause))
    }

    /// Iterates over the layers, outermost first.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().rev()
    }

    /// Iterates over the root and its `source()` chain.
    pub fn causes(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        let root: &(dyn StdError + 'static) = self.root.as_ref();
        std::iter::successors(Some(root), |&err| err.source())
    }

    /// The error this chain was built from.
    pub fn root(&self) -> &(dyn StdError + 'static) {
        self.root.as_ref()
    }

    /// The deepest cause in the root's `source()` chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        self.causes().last().unwrap_or(self.root.as_ref())
    }

    /// Finds the first cause of type `T`.
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.causes().find_map(|err| err.downcast_ref::<T>())
    }

    /// Returns `true` when a cause of type `T` is present.
    pub fn is<T: StdError + 'static>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    /// The first [`Kind`] found in the cause chain.
    pub fn kind(&self) -> Option<&Kind> {
        self.downcast_ref::<Kind>()
    }

    /// Returns `true` when the root cause is a broker [`ProtocolError`].
    pub fn is_protocol_error(&self) -> bool {
        self.root_cause().downcast_ref::<ProtocolError>().is_some()
    }

    /// Converts into a boxed std error; [`Error::from_boxed`] restores the layers.
    pub fn into_boxed(self) -> BoxError {
        Box::new(Chained(self))
    }
}

impl<E> From<E> for Error
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Error::from_boxed(Box::new(err))
    }
}

impl From<Error> for BoxError {
    fn from(err: Error) -> Self {
        err.into_boxed()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.write_str(&verbose(self))
        } else {
            f.write_str(&single_line(self))
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("message", &single_line(self))
            .field("layers", &self.layers)
            .field("root", &self.root)
            .finish()
    }
}

/// Adapter that lets an [`Error`] travel through APIs expecting a std error.
struct Chained(Error);

impl fmt::Debug for Chained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Chained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for Chained {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.root.source()
    }
}

/// Callback receiving errors that cannot be returned to a caller.
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Handler logging every error through [`report`].
pub fn log_handler() -> ErrorHandler {
    Arc::new(|err| report(&err))
}

/// Logs an error at its severity, with its tags and values as fields.
pub fn report(err: &Error) {
    let tags = serde_json::to_string(&tags(err)).unwrap_or_default();
    let values = serde_json::to_string(&values(err)).unwrap_or_default();

    match severity(err) {
        Level::TRACE => tracing::trace!(error = %err, %tags, %values, "messaging error"),
        Level::DEBUG => tracing::debug!(error = %err, %tags, %values, "messaging error"),
        Level::INFO => tracing::info!(error = %err, %tags, %values, "messaging error"),
        Level::WARN => tracing::warn!(error = %err, %tags, %values, "messaging error"),
        _ => tracing::error!(error = %err, %tags, %values, "messaging error"),
    }
}

/// Layering helpers for results.
pub trait ResultExt<T> {
    /// Wraps the error with a message.
    fn wrap_err(self, message: impl Into<String>) -> Result<T>;

    /// Wraps the error with a lazily built message.
    fn wrap_err_with<M, F>(self, f: F) -> Result<T>
    where
        M: Into<String>,
        F: FnOnce() -> M;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn wrap_err(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|err| err.into().wrap(message))
    }

    fn wrap_err_with<M, F>(self, f: F) -> Result<T>
    where
        M: Into<String>,
        F: FnOnce() -> M,
    {
        self.map_err(|err| err.into().wrap(f()))
    }
}
