// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use super::{Error, Layer};
use std::{backtrace::BacktraceStatus, fmt::Write};

/// Renders `wrap message: next: ...: root`.
///
/// A cause is skipped when the previous segment already ends with its text, which
/// happens with roots that print their own source.
pub fn single_line(err: &Error) -> String {
    segments(err).join(": ")
}

/// Renders one segment per line followed by every captured stack.
pub fn verbose(err: &Error) -> String {
    let mut out = segments(err).join("\n");

    for layer in err.layers() {
        if let Layer::Stack(stack) = layer {
            if stack.status() == BacktraceStatus::Captured {
                let _ = write!(out, "\nstack:\n{stack}");
            }
        }
    }

    out
}

fn segments(err: &Error) -> Vec<String> {
    let mut parts: Vec<String> = err
        .layers()
        .filter_map(|layer| match layer {
            Layer::Message(message) => Some(message.clone()),
            _ => None,
        })
        .collect();

    for cause in err.causes() {
        let text = cause.to_string();
        if text.is_empty() || parts.last().is_some_and(|prev| prev.ends_with(&text)) {
            continue;
        }
        parts.push(text);
    }

    parts
}
