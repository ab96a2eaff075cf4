//! Async retry and bounded-concurrency primitives for dlx.
//!
//! This crate provides the two generic execution building blocks the
//! download layer is built on:
//!
//! - [`retry`] - run a fallible async operation under a [`RetryPolicy`]
//!   (exponential backoff, optional jitter, retry-interception hook,
//!   cooperative cancellation)
//! - [`concurrent`] - iterate a collection with a concurrency cap,
//!   applying retry semantics independently per unit of work
//!
//! Cancellation is never an error: a canceled call resolves to "no
//! result" (`Ok(None)` for single operations, omitted units for batch
//! operations).

pub mod concurrent;
pub mod retry;

pub use concurrent::{
    RunOptions, filter_chunked, filter_concurrent, filter_concurrent_best_effort, map_chunked,
    map_concurrent,
};
pub use retry::{RetryDirective, RetryPolicy, retry};
