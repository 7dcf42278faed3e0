//! # pablo
//!
//! Library half of the Pablo binary, so integration tests can drive the
//! command functions directly.

pub mod cli;
