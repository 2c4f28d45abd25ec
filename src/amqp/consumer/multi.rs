// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Multi Consumer
//!
//! Runs several replicas of a consumer over one shared delivery stream. The first
//! failing replica cancels the group; its error is the one returned once every
//! replica unwound.
//!
//! Consumers that need a channel of their own, such as the
//! [`BatchConsumer`](super::BatchConsumer), are refused when more than one replica is
//! requested.

use crate::{
    amqp::{channel::DeliveryStream, reader::Consume},
    context::Context,
    errors::{Error, Kind},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinSet};
use tracing::debug;

pub struct MultiConsumer {
    consumer: Arc<dyn Consume>,
    workers: usize,
}

impl MultiConsumer {
    pub fn new(consumer: Arc<dyn Consume>, workers: usize) -> Self {
        MultiConsumer {
            consumer,
            workers: workers.max(1),
        }
    }
}

#[async_trait]
impl Consume for MultiConsumer {
    async fn consume(&self, ctx: &Context, stream: DeliveryStream) -> Result<(), Error> {
        if self.workers > 1 && self.consumer.exclusive_channel() {
            return Err(Error::from(Kind::InternalError)
                .wrap("multi consumer: consumer requires its own channel per worker")
                .value("workers", self.workers)
                .permanent());
        }

        let group = ctx.child();
        let (errors, mut first) = mpsc::channel::<Error>(1);

        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            let consumer = self.consumer.clone();
            let group = group.clone();
            let stream = stream.clone();
            let errors = errors.clone();

            workers.spawn(async move {
                if let Err(err) = consumer.consume(&group, stream).await {
                    debug!(worker, error = err.to_string(), "consumer replica failed");
                    // only the first error is kept
                    let _ = errors.try_send(err.value("worker", worker));
                    group.cancel();
                }
            });
        }
        drop(errors);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                group.cancel();
                let _ = first_error(&mut first);
                return Err(Error::from(err).wrap(Kind::InternalError.to_string()));
            }
        }

        match first_error(&mut first) {
            Some(err) => Err(err.wrap("multi consumer")),
            None => Ok(()),
        }
    }

    fn exclusive_channel(&self) -> bool {
        self.consumer.exclusive_channel()
    }
}

fn first_error(rx: &mut mpsc::Receiver<Error>) -> Option<Error> {
    rx.try_recv().ok()
}
