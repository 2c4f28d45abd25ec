// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Endpoint group dialing: one connection attempt per URL, in random order.

use crate::{
    amqp::channel::{Connection, Dial},
    context::Context,
    errors::{Error, Kind},
};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, warn};

const NO_CONNECTION_AVAILABLE: &str = "no connection available";

/// Dials an ordered set of broker URLs.
pub struct UrlDialer {
    urls: Vec<String>,
    dial: Arc<dyn Dial>,
}

impl UrlDialer {
    pub fn new(urls: Vec<String>, dial: Arc<dyn Dial>) -> Self {
        UrlDialer { urls, dial }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Tries every URL in shuffled order until one connects or `ctx` finishes.
    pub async fn dial(&self, ctx: &Context) -> Result<Arc<dyn Connection>, Error> {
        let mut urls = self.urls.clone();
        urls.shuffle(&mut rand::thread_rng());

        let mut last = Error::from(Kind::NoUrls);

        for url in &urls {
            if let Some(kind) = ctx.err() {
                return Err(Error::from(kind).wrap(NO_CONNECTION_AVAILABLE));
            }

            debug!(url = redact(url), "dialing broker...");
            match self.dial.dial(ctx, url).await {
                Ok(conn) => {
                    debug!(url = redact(url), "broker connected");
                    return Ok(conn);
                }
                Err(err) => {
                    warn!(url = redact(url), error = err.to_string(), "failure to dial");
                    last = err;
                }
            }
        }

        Err(last
            .wrap(NO_CONNECTION_AVAILABLE)
            .value("urls", urls.iter().map(|u| redact(u)).collect::<Vec<_>>()))
    }
}

/// Hides the credentials part of a URL.
pub(crate) fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***@{}", &url[..scheme], &url[at + 1..])
        }
        _ => url.to_owned(),
    }
}
