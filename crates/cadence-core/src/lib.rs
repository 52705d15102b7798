//! Core types and trait definitions for Cadence.
//!
//! This crate is deliberately free of HTTP, crypto and database
//! dependencies. It defines the domain model (subjects, sync policies,
//! playback snapshots) and the seams the reconciliation engine talks
//! through: the two stores, the playback source and the status sink.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod playback;
pub mod policy;
pub mod sink;
pub mod source;
pub mod store;
pub mod subject;

pub use error::{Error, Result};
