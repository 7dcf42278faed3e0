//! # Storage
//!
//! Persistent backends. The graph itself is never stored whole by default;
//! only what the retention step chooses to keep.

mod redb_store;

pub use redb_store::RetainStore;
