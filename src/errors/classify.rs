// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Temporary/permanent classification.
//!
//! Errors are temporary unless a layer says otherwise or a cause matches one of the
//! permanent predicates. The built-in predicates cover decode failures, header
//! contract violations and hard broker refusals; applications register their own
//! during bootstrap with [`register_permanent`].

use super::{extract::temporary_flag, Error, Kind, ProtocolError};
use std::{error::Error as StdError, sync::RwLock};

/// Predicate deciding whether a cause makes an error permanent.
pub type Predicate = fn(&(dyn StdError + 'static)) -> bool;

// access-refused, not-found, precondition-failed
const PERMANENT_PROTOCOL_CODES: [u16; 3] = [403, 404, 406];

static PERMANENT: RwLock<Vec<Predicate>> = RwLock::new(Vec::new());

/// Registers an application predicate marking matching causes as permanent.
pub fn register_permanent(predicate: Predicate) {
    match PERMANENT.write() {
        Ok(mut predicates) => predicates.push(predicate),
        Err(poisoned) => poisoned.into_inner().push(predicate),
    }
}

/// Returns `true` when retrying the failed operation may succeed.
pub fn is_temporary(err: &Error) -> bool {
    if let Some(temporary) = temporary_flag(err) {
        return temporary;
    }

    let registered = match PERMANENT.read() {
        Ok(predicates) => predicates.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };

    !err.causes()
        .any(|cause| builtin_permanent(cause) || registered.iter().any(|p| p(cause)))
}

/// Negation of [`is_temporary`].
pub fn is_permanent(err: &Error) -> bool {
    !is_temporary(err)
}

fn builtin_permanent(cause: &(dyn StdError + 'static)) -> bool {
    if cause.is::<serde_json::Error>() || cause.is::<chrono::ParseError>() {
        return true;
    }

    if let Some(kind) = cause.downcast_ref::<Kind>() {
        return matches!(
            kind,
            Kind::MissingHeader(_) | Kind::InvalidHeader(_) | Kind::Decode(_)
        );
    }

    if let Some(protocol) = cause.downcast_ref::<ProtocolError>() {
        return PERMANENT_PROTOCOL_CODES.contains(&protocol.code);
    }

    false
}
