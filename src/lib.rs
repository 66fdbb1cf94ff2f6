//! dlx - download and execute, cached
//!
//! Fetches standalone binaries and registry packages on demand into a
//! content-addressed local cache shared by every invocation, then runs
//! them. Concurrent processes coordinate through per-entry lock files so
//! each artifact is fetched at most once.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod install;
pub mod ui;

pub use error::{DlxError, DlxResult};
