// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! The [`ConnectionManager`] owns at most one live connection for an endpoint group.
//! The connection is dialed lazily on the first channel request and dropped as soon
//! as opening a channel on it fails, so the next request dials again.

use crate::{
    amqp::{
        channel::{Channel, ChannelGetter, Connection},
        dialer::UrlDialer,
    },
    context::{self, Context},
    errors::{Error, Kind},
    otel::OperationSpan,
};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

pub struct ConnectionManager {
    dialer: UrlDialer,
    conn: Mutex<Option<Arc<dyn Connection>>>,
}

impl ConnectionManager {
    pub fn new(dialer: UrlDialer) -> Self {
        ConnectionManager {
            dialer,
            conn: Mutex::new(None),
        }
    }

    /// Returns `true` while a connection is cached.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Closes the cached connection, if any. Calling it twice is harmless.
    pub async fn close(&self) -> Result<(), Error> {
        let conn = self.conn.lock().await.take();

        match conn {
            Some(conn) => {
                debug!("closing amqp connection...");
                conn.close()
                    .await
                    .map_err(|err| err.wrap("connection manager: close"))
            }
            None => Ok(()),
        }
    }

    async fn open_channel(&self, ctx: &Context) -> Result<Arc<dyn Channel>, Error> {
        let mut guard = context::lock(ctx, &self.conn).await?;

        let conn = match guard.as_ref() {
            Some(conn) => conn.clone(),
            None => {
                let conn = self.dialer.dial(ctx).await?;
                *guard = Some(conn.clone());
                conn
            }
        };

        match conn.channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(channel)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                *guard = None;
                if let Err(close_err) = conn.close().await {
                    debug!(error = close_err.to_string(), "failure to close broken connection");
                }
                Err(err.wrap(Kind::ChannelError.to_string()))
            }
        }
    }
}

#[async_trait]
impl ChannelGetter for ConnectionManager {
    async fn channel(&self, ctx: &Context) -> Result<Arc<dyn Channel>, Error> {
        let (ctx, span) = OperationSpan::start(
            ctx,
            "amqp.connection_manager",
            "channel",
            vec![KeyValue::new("urls", self.dialer.urls().len() as i64)],
        );

        let result = self
            .open_channel(&ctx)
            .await
            .map_err(|err| err.wrap("connection manager").tag("component", "connection_manager"));

        span.finish(&result);
        result
    }
}
