// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Acknowledgement Policy
//!
//! The [`Acknowledger`] decides what happens to a delivery once its processor has
//! returned. Processors never acknowledge themselves: they return `Ok(())`, a plain
//! error, or an error annotated with an acknowledger hint, and [`decide`] turns that
//! outcome into exactly one broker operation.

use crate::{
    amqp::message::AckHandle,
    errors::{self, Error, Kind},
};
use std::fmt;

/// Broker-side acknowledgement applied to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Acknowledger {
    /// Positive acknowledgement, the message leaves the queue.
    Ack,
    /// Negative acknowledgement, the broker redelivers the message.
    NackRequeue,
    /// Negative acknowledgement, the message is dropped or dead-lettered.
    NackDiscard,
}

impl Acknowledger {
    pub fn label(self) -> &'static str {
        match self {
            Acknowledger::Ack => "ack",
            Acknowledger::NackRequeue => "nack-requeue",
            Acknowledger::NackDiscard => "nack-discard",
        }
    }

    /// Acknowledger applied when a retry budget is exhausted.
    pub fn for_max_reached(ack: bool) -> Self {
        if ack {
            Acknowledger::Ack
        } else {
            Acknowledger::NackDiscard
        }
    }

    /// Returns `true` when the broker keeps the message for another delivery.
    pub fn requeues(self) -> bool {
        matches!(self, Acknowledger::NackRequeue)
    }

    /// Drives the broker operation. With `multiple` set, every outstanding delivery up
    /// to and including this one is covered.
    pub async fn apply(self, handle: &dyn AckHandle, multiple: bool) -> Result<(), Error> {
        let result = match self {
            Acknowledger::Ack => handle.ack(multiple).await,
            Acknowledger::NackRequeue => handle.nack(multiple, true).await,
            Acknowledger::NackDiscard => handle.nack(multiple, false).await,
        };

        result.map_err(|err| {
            let kind = match self {
                Acknowledger::Ack => Kind::AckMessageError,
                _ => Kind::NackMessageError,
            };
            err.wrap(kind.to_string()).tag("acknowledger", self.label())
        })
    }
}

impl fmt::Display for Acknowledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What to do with a delivery after processing.
#[derive(Debug)]
pub struct Decision {
    pub acknowledger: Acknowledger,
    /// Error to hand to the user error function; `None` for successes and ignored
    /// control errors.
    pub report: Option<Error>,
}

/// Maps a processor outcome to an acknowledgement decision.
///
/// - success: ack
/// - ignored: the attached acknowledger (or the default routing below), never reported
/// - attached acknowledger: that acknowledger, reported
/// - permanent: nack-discard (attached to the reported error), reported
/// - otherwise: nack-requeue, reported
pub fn decide(result: Result<(), Error>) -> Decision {
    let err = match result {
        Ok(()) => {
            return Decision {
                acknowledger: Acknowledger::Ack,
                report: None,
            }
        }
        Err(err) => err,
    };

    let hinted = errors::acknowledger(&err);
    let acknowledger = hinted.unwrap_or_else(|| default_routing(&err));

    if errors::is_ignored(&err) {
        return Decision {
            acknowledger,
            report: None,
        };
    }

    let report = match hinted {
        Some(_) => err,
        None => err.with_acknowledger(acknowledger),
    };

    Decision {
        acknowledger,
        report: Some(report),
    }
}

fn default_routing(err: &Error) -> Acknowledger {
    if errors::is_temporary(err) {
        Acknowledger::NackRequeue
    } else {
        Acknowledger::NackDiscard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AckCall, RecordingAcker};

    #[test]
    fn success_acks_silently() {
        let decision = decide(Ok(()));

        assert_eq!(decision.acknowledger, Acknowledger::Ack);
        assert!(decision.report.is_none());
    }

    #[test]
    fn temporary_failure_requeues_and_reports() {
        let decision = decide(Err(Error::msg("downstream unavailable")));

        assert_eq!(decision.acknowledger, Acknowledger::NackRequeue);
        let report = decision.report.expect("reported");
        assert_eq!(errors::acknowledger(&report), Some(Acknowledger::NackRequeue));
    }

    #[test]
    fn permanent_failure_discards() {
        let decision = decide(Err(Error::msg("bad payload").permanent()));

        assert_eq!(decision.acknowledger, Acknowledger::NackDiscard);
        assert!(decision.report.is_some());
    }

    #[test]
    fn hint_overrides_classification() {
        let err = Error::msg("bad payload")
            .permanent()
            .with_acknowledger(Acknowledger::Ack);

        let decision = decide(Err(err));
        assert_eq!(decision.acknowledger, Acknowledger::Ack);
        assert!(decision.report.is_some());
    }

    #[test]
    fn ignored_errors_are_not_reported() {
        let err = Error::from(Kind::Forwarded)
            .with_acknowledger(Acknowledger::Ack)
            .ignored();

        let decision = decide(Err(err));
        assert_eq!(decision.acknowledger, Acknowledger::Ack);
        assert!(decision.report.is_none());
    }

    #[tokio::test]
    async fn apply_drives_the_matching_broker_call() {
        let acker = RecordingAcker::default();

        Acknowledger::Ack.apply(&acker, false).await.unwrap();
        Acknowledger::NackRequeue.apply(&acker, true).await.unwrap();
        Acknowledger::NackDiscard.apply(&acker, false).await.unwrap();

        assert_eq!(
            acker.calls(),
            vec![
                AckCall::Ack { multiple: false },
                AckCall::Nack {
                    multiple: true,
                    requeue: true
                },
                AckCall::Nack {
                    multiple: false,
                    requeue: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn apply_failure_is_annotated() {
        let acker = RecordingAcker::failing();

        let err = Acknowledger::Ack.apply(&acker, false).await.unwrap_err();
        assert!(err.to_string().starts_with("failure to ack message"));
        assert_eq!(errors::tags(&err)["acknowledger"], "ack");
    }
}
