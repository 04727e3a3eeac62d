//! Session domain model.
//!
//! A [`Session`] is the single live interpreter state: variable bindings and
//! procedure definitions. It is owned by the evaluator worker and mutated only
//! there; everything outside the worker sees immutable [`SessionSnapshot`]s.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A user-defined procedure: formal parameter names plus a body script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcDef {
    pub params: Vec<String>,
    pub body: String,
}

/// The mutable interpreter state for one evaluation stream.
///
/// `BTreeMap` keeps snapshots deterministically ordered, which keeps
/// serialized snapshots and on-disk layouts stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub vars: BTreeMap<String, String>,
    pub procs: BTreeMap<String, ProcDef>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures an immutable copy of the current content.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            vars: self.vars.clone(),
            procs: self.procs.clone(),
        }
    }

    /// Replaces the content wholesale with a snapshot's content.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) {
        self.vars = snapshot.vars.clone();
        self.procs = snapshot.procs.clone();
    }
}

/// Immutable copy of a [`Session`]'s content.
///
/// This is the payload handed to the history store on commit and received
/// back from checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub vars: BTreeMap<String, String>,
    pub procs: BTreeMap<String, ProcDef>,
}

impl SessionSnapshot {
    /// Finds what changed between this snapshot and a later one.
    pub fn diff(&self, after: &SessionSnapshot) -> StateChanges {
        let changed_vars = after
            .vars
            .iter()
            .filter(|(name, value)| self.vars.get(*name) != Some(value))
            .map(|(name, _)| name.clone())
            .collect();
        let deleted_vars = self
            .vars
            .keys()
            .filter(|name| !after.vars.contains_key(*name))
            .cloned()
            .collect();
        let changed_procs = after
            .procs
            .iter()
            .filter(|(name, def)| self.procs.get(*name) != Some(def))
            .map(|(name, _)| name.clone())
            .collect();
        let deleted_procs = self
            .procs
            .keys()
            .filter(|name| !after.procs.contains_key(*name))
            .cloned()
            .collect();

        StateChanges {
            changed_vars,
            deleted_vars,
            changed_procs,
            deleted_procs,
        }
    }
}

/// The difference between two session snapshots.
#[derive(Debug, Clone, Default)]
pub struct StateChanges {
    pub changed_vars: Vec<String>,
    pub deleted_vars: Vec<String>,
    pub changed_procs: Vec<String>,
    pub deleted_procs: Vec<String>,
}

impl StateChanges {
    pub fn has_changes(&self) -> bool {
        !self.changed_vars.is_empty()
            || !self.deleted_vars.is_empty()
            || !self.changed_procs.is_empty()
            || !self.deleted_procs.is_empty()
    }

    /// Generates a human-readable summary of changes for commit messages.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.changed_procs.is_empty() {
            parts.push(format!("+proc: {}", self.changed_procs.join(", ")));
        }
        if !self.deleted_procs.is_empty() {
            parts.push(format!("-proc: {}", self.deleted_procs.join(", ")));
        }
        if !self.changed_vars.is_empty() {
            parts.push(format!("+var: {}", self.changed_vars.join(", ")));
        }
        if !self.deleted_vars.is_empty() {
            parts.push(format!("-var: {}", self.deleted_vars.join(", ")));
        }

        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(" | ")
        }
    }
}
