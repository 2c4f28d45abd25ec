// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! This module provides integration with OpenTelemetry for distributed tracing.
//! It includes utilities for propagating trace context through AMQP and Kafka message
//! headers, and the start/finish pair every broker-touching operation wraps itself in.

use crate::{
    amqp::message::Headers,
    context::Context,
    errors::{self, Error},
    kafka::message::Header,
};
use lapin::types::{AMQPValue, ShortString};
use opentelemetry::{
    global::{self, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Status, TraceContextExt, Tracer},
    KeyValue,
};
use std::borrow::Cow;
use tracing::error;

const TRACER_NAME: &str = "courier";

fn tracer() -> BoxedTracer {
    global::tracer(TRACER_NAME)
}

/// An adapter for injecting OpenTelemetry context into AMQP headers.
pub(crate) struct AmqpHeaderInjector<'a> {
    headers: &'a mut Headers,
}

impl<'a> AmqpHeaderInjector<'a> {
    /// Creates an injector writing into `headers`.
    ///
    /// # Parameters
    /// * `headers` - Mutable reference to the publishing headers
    pub(crate) fn new(headers: &'a mut Headers) -> Self {
        Self { headers }
    }
}

impl Injector for AmqpHeaderInjector<'_> {
    /// Sets a trace context value as a long string header.
    ///
    /// # Parameters
    /// * `key` - Header key, stored lowercased
    /// * `value` - Header value
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            ShortString::from(key.to_lowercase()),
            AMQPValue::LongString(value.into()),
        );
    }
}

/// An adapter for extracting OpenTelemetry context from AMQP headers.
pub(crate) struct AmqpHeaderExtractor<'a> {
    headers: &'a Headers,
}

impl<'a> AmqpHeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a Headers) -> Self {
        Self { headers }
    }
}

impl Extractor for AmqpHeaderExtractor<'_> {
    /// Gets a trace context value from AMQP message headers.
    ///
    /// # Parameters
    /// * `key` - The header key to retrieve
    ///
    /// # Returns
    /// The header value as a string slice, or None if missing or not a string
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| match header_value {
            AMQPValue::LongString(value) => std::str::from_utf8(value.as_bytes())
                .map_err(|e| error!("error decoding header value {:?}", e))
                .ok(),
            AMQPValue::ShortString(value) => Some(value.as_str()),
            _ => None,
        })
    }

    /// Gets all keys in the AMQP message headers.
    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Injects and extracts OpenTelemetry context through Kafka byte headers.
pub(crate) struct KafkaHeaderPropagator<'a> {
    headers: &'a mut Vec<Header>,
}

impl<'a> KafkaHeaderPropagator<'a> {
    pub(crate) fn new(headers: &'a mut Vec<Header>) -> Self {
        Self { headers }
    }
}

impl Injector for KafkaHeaderPropagator<'_> {
    /// Sets a trace context value, replacing any header with the same key.
    ///
    /// # Parameters
    /// * `key` - Header key, stored lowercased
    /// * `value` - Header value, stored as UTF-8 bytes
    fn set(&mut self, key: &str, value: String) {
        let key = key.to_lowercase();
        self.headers.retain(|h| h.key != key);
        self.headers.push(Header::new(key, value.into_bytes()));
    }
}

/// Read-only extractor over Kafka headers.
pub(crate) struct KafkaHeaderExtractor<'a> {
    headers: &'a [Header],
}

impl<'a> KafkaHeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a [Header]) -> Self {
        Self { headers }
    }
}

impl Extractor for KafkaHeaderExtractor<'_> {
    /// Gets a trace context value from Kafka headers.
    ///
    /// # Returns
    /// The first header with `key` whose value is valid UTF-8
    fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .and_then(|h| std::str::from_utf8(&h.value).ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.iter().map(|h| h.key.as_str()).collect()
    }
}

/// Writes the trace context of `ctx` into AMQP headers.
pub(crate) fn inject_amqp(ctx: &Context, headers: &mut Headers) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx.trace(), &mut AmqpHeaderInjector::new(headers))
    });
}

/// Reads a remote trace context from AMQP headers.
///
/// # Returns
/// The extracted context, empty when the headers carry no trace
pub(crate) fn extract_amqp(headers: &Headers) -> opentelemetry::Context {
    global::get_text_map_propagator(|propagator| {
        propagator.extract(&AmqpHeaderExtractor::new(headers))
    })
}

/// Writes the trace context of `ctx` into Kafka headers.
pub(crate) fn inject_kafka(ctx: &Context, headers: &mut Vec<Header>) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx.trace(), &mut KafkaHeaderPropagator::new(headers))
    });
}

/// Reads a remote trace context from Kafka headers.
pub(crate) fn extract_kafka(headers: &[Header]) -> opentelemetry::Context {
    global::get_text_map_propagator(|propagator| {
        propagator.extract(&KafkaHeaderExtractor::new(headers))
    })
}

/// Span around one public operation.
///
/// `start` returns the child [`Context`] to hand to inner calls; `finish` records the
/// outcome and ends the span. A span dropped without `finish` is ended as-is.
pub struct OperationSpan {
    trace: Option<opentelemetry::Context>,
}

impl OperationSpan {
    /// Starts a span named `component.operation` as a child of the trace in `ctx`.
    ///
    /// # Parameters
    /// * `ctx` - Caller context, parent of the span
    /// * `component` - Component name, also recorded as a label
    /// * `operation` - Operation name, also recorded as a label
    /// * `labels` - Extra span attributes
    ///
    /// # Returns
    /// The caller context carrying the new span, and the span handle
    pub fn start(
        ctx: &Context,
        component: &'static str,
        operation: &'static str,
        labels: Vec<KeyValue>,
    ) -> (Context, OperationSpan) {
        Self::start_kind(ctx, ctx.trace(), component, operation, SpanKind::Internal, labels)
    }

    /// Starts a producer span.
    pub fn producer(
        ctx: &Context,
        component: &'static str,
        operation: &'static str,
        labels: Vec<KeyValue>,
    ) -> (Context, OperationSpan) {
        Self::start_kind(ctx, ctx.trace(), component, operation, SpanKind::Producer, labels)
    }

    /// Starts a consumer span on a background context, parented by the remote trace
    /// carried in the message rather than by the caller.
    pub fn consumer(
        remote: &opentelemetry::Context,
        component: &'static str,
        operation: &'static str,
        labels: Vec<KeyValue>,
    ) -> (Context, OperationSpan) {
        Self::start_kind(
            &Context::background(),
            remote,
            component,
            operation,
            SpanKind::Consumer,
            labels,
        )
    }

    fn start_kind(
        ctx: &Context,
        parent: &opentelemetry::Context,
        component: &'static str,
        operation: &'static str,
        kind: SpanKind,
        mut labels: Vec<KeyValue>,
    ) -> (Context, OperationSpan) {
        labels.push(KeyValue::new("component", component));
        labels.push(KeyValue::new("operation", operation));

        let tracer = tracer();
        let span = tracer
            .span_builder(Cow::from(format!("{component}.{operation}")))
            .with_kind(kind)
            .with_attributes(labels)
            .start_with_context(&tracer, parent);

        let trace = parent.with_span(span);
        (
            ctx.clone().with_trace(trace.clone()),
            OperationSpan { trace: Some(trace) },
        )
    }

    /// Adds a label after the span started.
    pub fn label(&self, label: KeyValue) {
        if let Some(trace) = &self.trace {
            trace.span().set_attribute(label);
        }
    }

    /// Records the outcome and ends the span.
    ///
    /// Errors add an `exception` event with their classification. Ignored errors
    /// leave the span status untouched.
    pub fn finish<T>(self, result: &Result<T, Error>) {
        self.finish_with(result.as_ref().err());
    }

    /// Records an optional error and ends the span.
    pub fn finish_with(mut self, err: Option<&Error>) {
        if let Some(trace) = self.trace.take() {
            let span = trace.span();
            match err {
                Some(err) => {
                    let mut attributes = vec![
                        KeyValue::new("exception.message", err.to_string()),
                        KeyValue::new("error.ignored", errors::is_ignored(err)),
                        KeyValue::new("error.temporary", errors::is_temporary(err)),
                    ];
                    if let Some(ack) = errors::acknowledger(err) {
                        attributes.push(KeyValue::new("error.acknowledger", ack.label()));
                    }
                    span.add_event("exception", attributes);
                    if !errors::is_ignored(err) {
                        span.set_status(Status::error(err.to_string()));
                    }
                }
                None => span.set_status(Status::Ok),
            }
            span.end();
        }
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        if let Some(trace) = self.trace.take() {
            trace.span().end();
        }
    }
}
