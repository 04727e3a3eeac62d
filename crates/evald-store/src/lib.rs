//! Infrastructure layer: disk-backed history storage for evald.

pub mod git_store;

pub use git_store::GitHistoryStore;
