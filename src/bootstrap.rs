// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Process bootstrap, invoked once by the application's `main`.

use crate::{config::LogConfig, errors::Error};
use std::panic;
use tracing::{debug, error};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level. A subscriber installed earlier is kept.
pub fn init_logging(config: &LogConfig) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|err| Error::from(err).wrap("bootstrap: log level").permanent())?,
    };

    let layer = if config.json {
        fmt::layer().with_target(true).json().with_filter(filter).boxed()
    } else {
        fmt::layer().with_target(true).with_filter(filter).boxed()
    };

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        debug!("global tracing subscriber already installed");
    }
    Ok(())
}

/// Routes panics through `tracing` before the default hook runs.
pub fn install_panic_hook() {
    let default = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();

        error!(%location, %payload, "panic");
        default(info);
    }));
}

/// Logging and panic hook.
pub fn init(config: &LogConfig) -> Result<(), Error> {
    init_logging(config)?;
    install_panic_hook();
    Ok(())
}
