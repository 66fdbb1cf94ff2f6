//! External collaborators
//!
//! The install pipeline only needs three capabilities from the outside
//! world, each behind a trait so tests can substitute fakes:
//! - stream a URL to a file (and fetch JSON): [`Downloader`]
//! - install a registry package into a directory: [`PackageExtractor`]
//! - run an executable: [`ProcessRunner`]

pub mod http;
pub mod npm;
pub mod process;

pub use http::UreqDownloader;
pub use npm::NpmExtractor;
pub use process::{ExitInfo, TokioProcessRunner};

use crate::error::DlxResult;
use crate::install::binary::Executable;
use async_trait::async_trait;
use std::path::Path;

/// Streams remote resources
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream `url` into `dest`, returning the number of bytes written
    ///
    /// Fails with `NotFound` for missing resources, `Network` or
    /// `FetchTimeout` for transport failures.
    async fn download(&self, url: &str, dest: &Path) -> DlxResult<u64>;

    /// Fetch `url` and parse the body as JSON
    async fn fetch_json(&self, url: &str) -> DlxResult<serde_json::Value>;
}

/// Installs registry packages
#[async_trait]
pub trait PackageExtractor: Send + Sync {
    /// Install `spec` so that its root lands at
    /// `<dest_dir>/node_modules/<name>`
    async fn extract(&self, spec: &str, dest_dir: &Path) -> DlxResult<()>;
}

/// Runs resolved executables
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `executable` with `args`, inheriting stdio, and wait for it
    async fn run(&self, executable: &Executable, args: &[String]) -> DlxResult<ExitInfo>;
}
