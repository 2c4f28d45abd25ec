// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Kafka message model.

use crate::{
    amqp::{headers, message::truncate_body},
    errors::{Error, Kind},
};
use chrono::{DateTime, SecondsFormat, Utc};

/// Deferred-dispatch deadline header, shared with the AMQP side.
pub const WAIT_UNTIL: &str = headers::WAIT_UNTIL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Header {
            key: key.into(),
            value,
        }
    }
}

/// A record read from or written to a topic.
///
/// `partition`, `offset` and `time` are filled in by readers; writers ignore the
/// offset and let the broker assign it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: Vec<Header>,
    pub time: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Message {
            topic: topic.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_header(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Value of the first header named `key`.
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_slice())
    }

    /// Replaces every header named `key` with a single one.
    pub fn set_header(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.headers.retain(|h| h.key != key);
        self.headers.push(Header::new(key, value.into()));
    }

    /// Removes every header named `key`, returning the first value.
    pub fn remove_header(&mut self, key: &str) -> Option<Vec<u8>> {
        let mut removed = None;
        self.headers.retain(|h| {
            if h.key != key {
                return true;
            }
            if removed.is_none() {
                removed = Some(h.value.clone());
            }
            false
        });
        removed
    }

    /// Reads a decimal integer header.
    pub fn header_i64(&self, key: &str) -> Result<i64, Error> {
        let raw = self
            .header(key)
            .ok_or_else(|| Error::from(Kind::MissingHeader(key.to_owned())))?;

        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                Error::from(Kind::InvalidHeader(key.to_owned()))
                    .value("raw", String::from_utf8_lossy(raw).into_owned())
            })
    }

    /// Deadline carried in the `wait-until` header; `None` when missing or malformed.
    pub fn wait_until(&self) -> Option<DateTime<Utc>> {
        let raw = std::str::from_utf8(self.header(WAIT_UNTIL)?).ok()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|deadline| deadline.with_timezone(&Utc))
    }

    pub fn set_wait_until(&mut self, deadline: DateTime<Utc>) {
        self.set_header(
            WAIT_UNTIL,
            deadline.to_rfc3339_opts(SecondsFormat::Nanos, true),
        );
    }

    /// Adds the record context to `err`.
    pub(crate) fn annotate(&self, err: Error) -> Error {
        let headers: serde_json::Map<String, serde_json::Value> = self
            .headers
            .iter()
            .map(|h| {
                (
                    h.key.clone(),
                    serde_json::Value::from(String::from_utf8_lossy(&h.value).into_owned()),
                )
            })
            .collect();

        err.value("topic", self.topic.as_str())
            .value("partition", self.partition)
            .value("offset", self.offset)
            .value("key", String::from_utf8_lossy(&self.key).into_owned())
            .value("headers", serde_json::Value::Object(headers))
            .value("body", truncate_body(&self.value))
    }
}
