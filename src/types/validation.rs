/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Outcome of validating a header, payload, or state transition.
//!
//! Operations that can fail because of bad input (`accept_block_header`, `add_payloads`,
//! `set_state`, ...) return `bool` and record *why* they failed in a caller-provided
//! [`ValidationState`]. Every layer that observes a failure on its way out prepends its own reason
//! name, so the final [`path`](ValidationState::path) reads outermost-first, for example
//! `VBK-bad-command+duplicate`.

use std::fmt::{self, Display, Formatter};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationState {
    reasons: Vec<String>,
    debug_message: String,
}

impl ValidationState {
    pub fn new() -> ValidationState {
        ValidationState::default()
    }

    /// Mark the state invalid with the innermost `reason` and a human readable `debug_message`.
    /// Always returns `false` so that callers can write `return state.invalid(..)`.
    pub fn invalid(&mut self, reason: impl Into<String>, debug_message: impl Into<String>) -> bool {
        self.reasons.insert(0, reason.into());
        let debug_message = debug_message.into();
        if !debug_message.is_empty() {
            if self.debug_message.is_empty() {
                self.debug_message = debug_message;
            } else {
                self.debug_message = format!("{}: {}", debug_message, self.debug_message);
            }
        }
        false
    }

    /// Prepend an outer `reason` to an already-invalid state. Returns `false`.
    pub fn wrap(&mut self, reason: impl Into<String>) -> bool {
        self.invalid(reason, "")
    }

    pub fn is_valid(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn is_invalid(&self) -> bool {
        !self.is_valid()
    }

    /// Reason names joined by `+`, outermost first. Empty if valid.
    pub fn path(&self) -> String {
        self.reasons.join("+")
    }

    /// Whether any reason in the path equals `reason`.
    pub fn has_reason(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }

    pub fn debug_message(&self) -> &str {
        &self.debug_message
    }

    pub fn reset(&mut self) {
        self.reasons.clear();
        self.debug_message.clear();
    }
}

impl Display for ValidationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "VALID")
        } else {
            write!(f, "INVALID({}): {}", self.path(), self.debug_message)
        }
    }
}
