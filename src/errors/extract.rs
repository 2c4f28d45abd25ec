// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Chain walkers. Each extractor visits layers outermost first and stops at the
//! first match, so an outer decoration always overrides an inner one.

use super::{Error, Layer};
use crate::acknowledger::Acknowledger;
use std::{backtrace::Backtrace, collections::BTreeMap, sync::Arc};
use tracing::Level;

/// The acknowledger hint closest to the surface, if any.
pub fn acknowledger(err: &Error) -> Option<Acknowledger> {
    err.layers().find_map(|layer| match layer {
        Layer::Acknowledger(ack) => Some(*ack),
        _ => None,
    })
}

/// Returns `true` when any layer marks the error as ignored.
pub fn is_ignored(err: &Error) -> bool {
    err.layers().any(|layer| matches!(layer, Layer::Ignored))
}

/// Reporting severity, `ERROR` when none was attached.
pub fn severity(err: &Error) -> Level {
    err.layers()
        .find_map(|layer| match layer {
            Layer::Severity(level) => Some(*level),
            _ => None,
        })
        .unwrap_or(Level::ERROR)
}

/// The outermost captured stack.
pub fn stack(err: &Error) -> Option<Arc<Backtrace>> {
    err.layers().find_map(|layer| match layer {
        Layer::Stack(stack) => Some(stack.clone()),
        _ => None,
    })
}

/// All tags; outer layers win on key collisions.
pub fn tags(err: &Error) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for layer in err.layers() {
        if let Layer::Tags(tags) = layer {
            for (key, value) in tags {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    merged
}

/// All values; outer layers win on key collisions.
pub fn values(err: &Error) -> BTreeMap<String, serde_json::Value> {
    let mut merged = BTreeMap::new();
    for layer in err.layers() {
        if let Layer::Values(values) = layer {
            for (key, value) in values {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    merged
}

/// Explicit temporary flag, if a layer carries one.
pub(crate) fn temporary_flag(err: &Error) -> Option<bool> {
    err.layers().find_map(|layer| match layer {
        Layer::Temporary(temporary) => Some(*temporary),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Kind;

    #[test]
    fn outermost_acknowledger_wins() {
        let err = Error::from(Kind::MaxAttemptsReached)
            .with_acknowledger(Acknowledger::NackDiscard)
            .wrap("retry")
            .with_acknowledger(Acknowledger::Ack);

        assert_eq!(acknowledger(&err), Some(Acknowledger::Ack));
    }

    #[test]
    fn outer_values_override_inner_ones() {
        let err = Error::msg("x")
            .value("exchange", "inner")
            .wrap("w")
            .value("exchange", "outer")
            .tag("component", "producer");

        assert_eq!(values(&err)["exchange"], serde_json::json!("outer"));
        assert_eq!(tags(&err)["component"], "producer");
    }

    #[test]
    fn severity_defaults_to_error() {
        assert_eq!(severity(&Error::msg("x")), Level::ERROR);
        assert_eq!(severity(&Error::msg("x").severity(Level::WARN)), Level::WARN);
    }

    #[test]
    fn plain_errors_carry_no_hints() {
        let err = Error::msg("plain");

        assert!(!is_ignored(&err));
        assert_eq!(acknowledger(&err), None);
        assert!(stack(&err).is_none());
        assert_eq!(temporary_flag(&err), None);
    }
}
