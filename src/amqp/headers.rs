// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Well-known delivery headers and typed accessors.

use crate::{
    amqp::message::{Delivery, Headers},
    errors::{Error, Kind},
};
use lapin::types::AMQPValue;

/// Tenant routing key for skip/forward, 64-bit signed integer.
pub const ORGANIZATION_ID: &str = "organization-id";
/// Redelivery counter, 64-bit signed integer.
pub const RETRY_ATTEMPTS: &str = "retry-attempts";
/// Deferred-dispatch deadline, RFC3339 with nanoseconds.
pub const WAIT_UNTIL: &str = "wait-until";
/// Broker-provided redelivery history.
pub const X_DEATH: &str = "x-death";
/// Consumer priority argument.
pub const X_PRIORITY: &str = "x-priority";

const X_DEATH_EXCHANGE: &str = "exchange";
const X_DEATH_ROUTING_KEYS: &str = "routing-keys";

/// Reads a header that must be a 64-bit signed integer.
///
/// Missing and wrong-typed headers are permanent failures: the message can never
/// satisfy the contract on redelivery.
pub fn require_i64(headers: &Headers, key: &str) -> Result<i64, Error> {
    match headers.get(key) {
        None => Err(Error::from(Kind::MissingHeader(key.to_owned()))),
        Some(AMQPValue::LongLongInt(value)) => Ok(*value),
        Some(other) => Err(Error::from(Kind::InvalidHeader(key.to_owned()))
            .value("type", type_name(other))),
    }
}

/// Current retry counter; absent or mis-typed means zero attempts.
pub fn retry_attempts(headers: &Headers) -> i64 {
    match headers.get(RETRY_ATTEMPTS) {
        Some(AMQPValue::LongLongInt(value)) => *value,
        _ => 0,
    }
}

/// Exchange and routing key the message was first published to.
///
/// The oldest `x-death` entry is the original publish. Malformed history falls back
/// to the current delivery's routing fields.
pub fn original_publish(delivery: &Delivery) -> (String, String) {
    let fallback = || (delivery.exchange.clone(), delivery.routing_key.clone());

    let Some(AMQPValue::FieldArray(history)) = delivery.headers().get(X_DEATH) else {
        return fallback();
    };

    let Some(AMQPValue::FieldTable(oldest)) = history.as_slice().last() else {
        return fallback();
    };

    let entry = oldest.inner();
    let exchange = match entry.get(X_DEATH_EXCHANGE) {
        Some(value) => match as_string(value) {
            Some(exchange) => exchange,
            None => return fallback(),
        },
        None => return fallback(),
    };

    let routing_key = match entry.get(X_DEATH_ROUTING_KEYS) {
        Some(AMQPValue::FieldArray(keys)) => match keys.as_slice().first().and_then(as_string) {
            Some(key) => key,
            None => return fallback(),
        },
        _ => return fallback(),
    };

    (exchange, routing_key)
}

fn as_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_owned()),
        _ => None,
    }
}

fn type_name(value: &AMQPValue) -> &'static str {
    match value {
        AMQPValue::Boolean(_) => "bool",
        AMQPValue::ShortShortInt(_) => "i8",
        AMQPValue::ShortShortUInt(_) => "u8",
        AMQPValue::ShortInt(_) => "i16",
        AMQPValue::ShortUInt(_) => "u16",
        AMQPValue::LongInt(_) => "i32",
        AMQPValue::LongUInt(_) => "u32",
        AMQPValue::LongLongInt(_) => "i64",
        AMQPValue::Float(_) => "f32",
        AMQPValue::Double(_) => "f64",
        AMQPValue::ShortString(_) | AMQPValue::LongString(_) => "string",
        AMQPValue::FieldArray(_) => "array",
        AMQPValue::FieldTable(_) => "table",
        AMQPValue::Timestamp(_) => "timestamp",
        AMQPValue::ByteArray(_) => "bytes",
        _ => "other",
    }
}

/// JSON rendering of headers, used to enrich errors.
pub fn to_json(headers: &Headers) -> serde_json::Value {
    serde_json::Value::Object(
        headers
            .iter()
            .map(|(key, value)| (key.as_str().to_owned(), value_to_json(value)))
            .collect(),
    )
}

fn value_to_json(value: &AMQPValue) -> serde_json::Value {
    use serde_json::Value;

    match value {
        AMQPValue::Boolean(v) => Value::from(*v),
        AMQPValue::ShortShortInt(v) => Value::from(*v),
        AMQPValue::ShortShortUInt(v) => Value::from(*v),
        AMQPValue::ShortInt(v) => Value::from(*v),
        AMQPValue::ShortUInt(v) => Value::from(*v),
        AMQPValue::LongInt(v) => Value::from(*v),
        AMQPValue::LongUInt(v) => Value::from(*v),
        AMQPValue::LongLongInt(v) => Value::from(*v),
        AMQPValue::Float(v) => Value::from(*v),
        AMQPValue::Double(v) => Value::from(*v),
        AMQPValue::Timestamp(v) => Value::from(*v),
        AMQPValue::ShortString(_) | AMQPValue::LongString(_) => {
            as_string(value).map(Value::from).unwrap_or(Value::Null)
        }
        AMQPValue::FieldArray(values) => {
            Value::Array(values.as_slice().iter().map(value_to_json).collect())
        }
        AMQPValue::FieldTable(table) => to_json(table.inner()),
        AMQPValue::Void => Value::Null,
        other => Value::from(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::message::Publishing;
    use lapin::types::{FieldArray, FieldTable, ShortString};
    use std::collections::BTreeMap;

    fn death(exchange: &str, key: &str) -> AMQPValue {
        let mut entry = BTreeMap::new();
        entry.insert(
            ShortString::from(X_DEATH_EXCHANGE),
            AMQPValue::LongString(exchange.into()),
        );
        entry.insert(
            ShortString::from(X_DEATH_ROUTING_KEYS),
            AMQPValue::FieldArray(FieldArray::from(vec![AMQPValue::LongString(key.into())])),
        );
        AMQPValue::FieldTable(FieldTable::from(entry))
    }

    fn delivery(history: Option<AMQPValue>) -> Delivery {
        let mut publishing = Publishing::new("x");
        if let Some(history) = history {
            publishing = publishing.with_header(X_DEATH, history);
        }
        Delivery::new(1, "retry-exchange", "retry-key", publishing)
    }

    #[test]
    fn require_i64_is_strict() {
        let mut headers = Headers::new();
        headers.insert(ShortString::from(ORGANIZATION_ID), AMQPValue::LongInt(5));

        let err = require_i64(&headers, ORGANIZATION_ID).unwrap_err();
        assert_eq!(
            err.kind(),
            Some(&Kind::InvalidHeader(ORGANIZATION_ID.to_owned()))
        );

        headers.insert(ShortString::from(ORGANIZATION_ID), AMQPValue::LongLongInt(5));
        assert_eq!(require_i64(&headers, ORGANIZATION_ID).unwrap(), 5);

        let err = require_i64(&Headers::new(), ORGANIZATION_ID).unwrap_err();
        assert_eq!(
            err.kind(),
            Some(&Kind::MissingHeader(ORGANIZATION_ID.to_owned()))
        );
    }

    #[test]
    fn retry_attempts_defaults_to_zero() {
        let mut headers = Headers::new();
        assert_eq!(retry_attempts(&headers), 0);

        headers.insert(
            ShortString::from(RETRY_ATTEMPTS),
            AMQPValue::LongString("3".into()),
        );
        assert_eq!(retry_attempts(&headers), 0);

        headers.insert(ShortString::from(RETRY_ATTEMPTS), AMQPValue::LongLongInt(3));
        assert_eq!(retry_attempts(&headers), 3);
    }

    #[test]
    fn original_publish_reads_the_oldest_death() {
        let history = AMQPValue::FieldArray(FieldArray::from(vec![
            death("retry-exchange", "retry-key"),
            death("orders", "orders.created"),
        ]));

        assert_eq!(
            original_publish(&delivery(Some(history))),
            ("orders".to_owned(), "orders.created".to_owned())
        );
    }

    #[test]
    fn original_publish_falls_back_on_malformed_history() {
        let expected = ("retry-exchange".to_owned(), "retry-key".to_owned());

        assert_eq!(original_publish(&delivery(None)), expected);
        assert_eq!(
            original_publish(&delivery(Some(AMQPValue::LongLongInt(1)))),
            expected
        );
        assert_eq!(
            original_publish(&delivery(Some(AMQPValue::FieldArray(FieldArray::from(
                vec![AMQPValue::Boolean(true)]
            ))))),
            expected
        );

        let mut entry = BTreeMap::new();
        entry.insert(
            ShortString::from(X_DEATH_EXCHANGE),
            AMQPValue::LongString("orders".into()),
        );
        let no_keys = AMQPValue::FieldArray(FieldArray::from(vec![AMQPValue::FieldTable(
            FieldTable::from(entry),
        )]));
        assert_eq!(original_publish(&delivery(Some(no_keys))), expected);
    }
}
