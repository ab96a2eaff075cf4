//! Core types and error handling for the dlx toolkit.
//!
//! This crate provides the shared foundation used by the other dlx crates:
//!
//! - [`Error`] / [`Result`] - the error taxonomy surfaced to callers
//! - [`DownloadSpec`] - the logical description of an artifact to acquire
//! - [`Platform`], [`Os`], [`Arch`] - host platform identification
//! - [`paths`] - cache-root resolution

mod error;
pub mod paths;
mod platform;
mod spec;

pub use error::{Error, Result};
pub use platform::{Arch, Os, Platform};
pub use spec::DownloadSpec;
