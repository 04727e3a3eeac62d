//! Capability gating for non-admin evaluations.
//!
//! The gate is a pure predicate over parsed command names, evaluated before
//! any code reaches the interpreter. Same code + same flag always yields the
//! same decision, which keeps the security boundary testable in isolation.

use crate::script::{self, Word};
use std::collections::BTreeSet;

/// Commands that mutate the environment or control the server and are
/// therefore reserved for the admin capability.
const BUILTIN_DENYLIST: &[&str] = &[
    "exec", "exit", "open", "file", "socket", "cd", "source", "load", "reset", "rename",
];

/// Outcome of a capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { command: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// The denylist predicate applied to non-admin evaluations.
#[derive(Debug, Clone)]
pub struct CapabilityGate {
    denied: BTreeSet<String>,
}

impl Default for CapabilityGate {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl CapabilityGate {
    /// Creates a gate with the built-in denylist plus any extra commands
    /// from configuration.
    pub fn new(extra_denied: &[String]) -> Self {
        let mut denied: BTreeSet<String> =
            BUILTIN_DENYLIST.iter().map(|s| s.to_string()).collect();
        denied.extend(extra_denied.iter().cloned());
        Self { denied }
    }

    /// Whether a single command name is on the denylist.
    pub fn is_denied(&self, command: &str) -> bool {
        self.denied.contains(command)
    }

    /// Checks a script against the denylist.
    ///
    /// Every command-name position is scanned, including inside brace
    /// bodies, so a privileged name cannot be smuggled through a loop or
    /// procedure body. Returns the first denied command found.
    pub fn check(&self, code: &str) -> Decision {
        self.check_script(code)
    }

    fn check_script(&self, code: &str) -> Decision {
        for command in script::split_commands(code) {
            let words = script::parse_words(&command);

            if let Some(Word::Bare(name)) = words.first() {
                if self.denied.contains(name.as_str()) {
                    return Decision::Deny {
                        command: name.clone(),
                    };
                }
            }

            // Brace bodies may themselves be scripts (proc bodies, loop
            // bodies); scan them conservatively.
            for word in &words {
                if let Word::Brace(body) = word {
                    if let Decision::Deny { command } = self.check_script(body) {
                        return Decision::Deny { command };
                    }
                }
            }
        }

        Decision::Allow
    }

    /// Human-readable denial message for a rejected command.
    pub fn denial_message(command: &str) -> String {
        format!(
            "error: command \"{}\" requires the admin capability",
            command
        )
    }
}
