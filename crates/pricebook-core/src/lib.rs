//! Core types and algorithms for the Pricebook material catalog.
//!
//! This crate holds the domain model, the storage and suggestion traits, and
//! every pure piece of the reconciliation engine: name normalisation, alias
//! resolution, candidate scoring, and the temporal price-history planner.
//! It performs no I/O; the async engine lives in `pricebook-reconcile`.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod catalog;
pub mod error;
pub mod history;
pub mod normalize;
pub mod observation;
pub mod resolver;
pub mod scorer;
pub mod session;
pub mod store;
pub mod suggest;
pub mod unmatched;

pub use error::{Error, Result};
