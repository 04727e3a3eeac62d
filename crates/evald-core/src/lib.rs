//! Domain core of evald, a session execution and versioned-output service.
//!
//! The service executes submitted code under two trust tiers, buffers large
//! output for incremental retrieval, and commits every state-mutating
//! evaluation to a linear, append-only history that can be queried and
//! rolled back to.

pub mod capability;
pub mod error;
pub mod evaluator;
pub mod history;
pub mod interpreter;
pub mod pagination;
pub mod script;
pub mod service;
pub mod session;

// Re-export common error type
pub use error::EvaldError;
