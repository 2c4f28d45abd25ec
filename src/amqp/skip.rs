// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Skip / Forward
//!
//! Short-circuits deliveries of tenants excluded from processing. The tenant is read
//! from the `organization-id` header, which must be a 64-bit integer; an external
//! [`SkipOracle`] decides whether the tenant is skipped, and skipped deliveries are
//! handed to a [`Forwarder`] and acknowledged without reaching the processor.

use crate::{
    acknowledger::Acknowledger,
    amqp::{
        consumer::Processor,
        headers::{self, ORGANIZATION_ID},
        message::Delivery,
        pool::ChannelPool,
        producer::{self, Producer},
        topology::Topology,
    },
    context::Context,
    errors::{Error, Kind},
    otel::OperationSpan,
};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::debug;

/// Decides whether a tenant's deliveries are processed here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SkipOracle: Send + Sync {
    /// Returns `(skipped, found)` for the tenant and the given applications.
    async fn is_skipped(
        &self,
        ctx: &Context,
        organization_id: i64,
        applications: &[String],
    ) -> Result<(bool, bool), Error>;
}

/// Re-publishes a skipped tenant's delivery elsewhere.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        ctx: &Context,
        organization_id: i64,
        delivery: &Delivery,
    ) -> Result<(), Error>;
}

pub struct SkipFilter {
    applications: Vec<String>,
    oracle: Arc<dyn SkipOracle>,
    forwarder: Arc<dyn Forwarder>,
}

impl SkipFilter {
    pub fn new(
        applications: Vec<String>,
        oracle: Arc<dyn SkipOracle>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        SkipFilter {
            applications,
            oracle,
            forwarder,
        }
    }

    /// `Ok` lets the delivery through. Every error carries the acknowledger the
    /// consumer must apply: discard for contract violations and unknown tenants, an
    /// ignored ack once forwarded.
    pub async fn filter(&self, ctx: &Context, delivery: &Delivery) -> Result<(), Error> {
        let (ctx, span) = OperationSpan::start(ctx, "amqp.skip_filter", "filter", vec![]);
        let result = self.check(&ctx, delivery).await;
        span.finish(&result);
        result
    }

    async fn check(&self, ctx: &Context, delivery: &Delivery) -> Result<(), Error> {
        // strictly int64, producers are expected to honour the header contract
        let organization_id = headers::require_i64(delivery.headers(), ORGANIZATION_ID)
            .map_err(|err| {
                delivery.annotate(
                    err.wrap("skip filter: organization id")
                        .permanent()
                        .with_acknowledger(Acknowledger::NackDiscard),
                )
            })?;

        let (skipped, found) = self
            .oracle
            .is_skipped(ctx, organization_id, &self.applications)
            .await
            .map_err(|err| {
                err.wrap("skip filter: is skipped")
                    .value("organization_id", organization_id)
                    .value("applications", self.applications.clone())
            })?;

        if !found {
            return Err(Error::from(Kind::OrganizationNotFound)
                .wrap("skip filter")
                .tag("organization_status", "not_found")
                .value("organization_id", organization_id)
                .permanent()
                .with_acknowledger(Acknowledger::NackDiscard));
        }

        if !skipped {
            return Ok(());
        }

        debug!(organization_id, "forwarding skipped organization");
        self.forwarder
            .forward(ctx, organization_id, delivery)
            .await
            .map_err(|err| {
                err.wrap("skip filter: forward")
                    .value("organization_id", organization_id)
            })?;

        Err(Error::from(Kind::Forwarded)
            .value("organization_id", organization_id)
            .with_acknowledger(Acknowledger::Ack)
            .ignored())
    }
}

/// Runs a [`SkipFilter`] before the wrapped processor.
pub struct SkipProcessor {
    filter: Arc<SkipFilter>,
    inner: Arc<dyn Processor>,
}

impl SkipProcessor {
    pub fn new(filter: Arc<SkipFilter>, inner: Arc<dyn Processor>) -> Self {
        SkipProcessor { filter, inner }
    }
}

#[async_trait]
impl Processor for SkipProcessor {
    async fn process(&self, ctx: &Context, delivery: &Delivery) -> Result<(), Error> {
        self.filter.filter(ctx, delivery).await?;
        self.inner.process(ctx, delivery).await
    }
}

/// Where a tenant's forwarded deliveries go.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub topology: Topology,
    pub exchange: String,
    pub routing_key: String,
}

pub type RouteFn = Arc<dyn Fn(i64) -> Route + Send + Sync>;

/// Forwards to a per-tenant topology, installed on a pooled channel before
/// re-publishing through the producer.
pub struct TopologyForwarder {
    route: RouteFn,
    pool: Arc<ChannelPool>,
    producer: Arc<dyn Producer>,
}

impl TopologyForwarder {
    pub fn new(route: RouteFn, pool: Arc<ChannelPool>, producer: Arc<dyn Producer>) -> Self {
        TopologyForwarder {
            route,
            pool,
            producer,
        }
    }
}

#[async_trait]
impl Forwarder for TopologyForwarder {
    async fn forward(
        &self,
        ctx: &Context,
        organization_id: i64,
        delivery: &Delivery,
    ) -> Result<(), Error> {
        let route = (self.route)(organization_id);
        let (ctx, span) = OperationSpan::start(
            ctx,
            "amqp.forwarder",
            "forward",
            vec![
                KeyValue::new("organization_id", organization_id),
                KeyValue::new("exchange", route.exchange.clone()),
                KeyValue::new("routing_key", route.routing_key.clone()),
            ],
        );

        let result = self.deliver(&ctx, &route, delivery).await.map_err(|err| {
            err.value("organization_id", organization_id)
                .value("exchange", route.exchange.clone())
                .value("routing_key", route.routing_key.clone())
        });
        span.finish(&result);
        result
    }
}

impl TopologyForwarder {
    async fn deliver(&self, ctx: &Context, route: &Route, delivery: &Delivery) -> Result<(), Error> {
        if !route.topology.is_empty() {
            self.pool
                .with_channel(ctx, |channel| {
                    let topology = route.topology.clone();
                    let ctx = ctx.clone();
                    async move { topology.install(&ctx, channel.as_ref()).await }
                })
                .await
                .map_err(|err| err.wrap("forwarder: install topology"))?;
        }

        producer::reproduce(
            ctx,
            self.producer.as_ref(),
            delivery,
            &route.exchange,
            &route.routing_key,
        )
        .await
        .map_err(|err| err.wrap("forwarder"))
    }
}
