//! HTTP downloads over ureq
//!
//! ureq is blocking, so transfers run on tokio's blocking pool.

use crate::error::{DlxError, DlxResult};
use crate::fetch::Downloader;
use async_trait::async_trait;
use std::io::{self, ErrorKind, Write};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Downloader backed by a shared ureq agent
#[derive(Clone)]
pub struct UreqDownloader {
    agent: ureq::Agent,
}

impl UreqDownloader {
    /// Create a downloader with an overall per-request timeout
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }
}

#[async_trait]
impl Downloader for UreqDownloader {
    async fn download(&self, url: &str, dest: &Path) -> DlxResult<u64> {
        let agent = self.agent.clone();
        let url = url.to_string();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || download_blocking(&agent, &url, &dest))
            .await
            .map_err(|e| DlxError::Internal(format!("download task failed: {}", e)))?
    }

    async fn fetch_json(&self, url: &str) -> DlxResult<serde_json::Value> {
        let agent = self.agent.clone();
        let url = url.to_string();

        tokio::task::spawn_blocking(move || {
            let mut response = agent
                .get(&url)
                .header("Accept", "application/json")
                .call()
                .map_err(|e| classify(&url, e))?;
            let body = response
                .body_mut()
                .read_to_string()
                .map_err(|e| classify(&url, e))?;
            Ok(serde_json::from_str(&body)?)
        })
        .await
        .map_err(|e| DlxError::Internal(format!("fetch task failed: {}", e)))?
    }
}

fn download_blocking(agent: &ureq::Agent, url: &str, dest: &Path) -> DlxResult<u64> {
    debug!("Downloading {} to {}", url, dest.display());
    let response = agent.get(url).call().map_err(|e| classify(url, e))?;
    let mut reader = response.into_body().into_reader();

    let mut file = std::fs::File::create(dest).map_err(|e| {
        DlxError::classify_io(dest, format!("creating {}", dest.display()), e)
    })?;
    let bytes = io::copy(&mut reader, &mut file).map_err(|e| classify_io_transfer(url, e))?;
    file.flush()
        .and_then(|()| file.sync_all())
        .map_err(|e| DlxError::io(format!("writing {}", dest.display()), e))?;

    debug!("Downloaded {} bytes from {}", bytes, url);
    Ok(bytes)
}

/// Map a ureq failure onto the fetch error taxonomy
fn classify(url: &str, err: ureq::Error) -> DlxError {
    match err {
        ureq::Error::StatusCode(code @ (404 | 410)) => DlxError::NotFound {
            artifact: url.to_string(),
            source_desc: format!("HTTP {}", code),
        },
        // Timeouts and throttling are worth retrying; other client errors are not
        ureq::Error::StatusCode(code @ (408 | 429)) => DlxError::Network {
            artifact: url.to_string(),
            reason: format!("HTTP {}", code),
        },
        ureq::Error::StatusCode(code @ 400..=499) => DlxError::Rejected {
            artifact: url.to_string(),
            status: code,
        },
        ureq::Error::StatusCode(code) => DlxError::Network {
            artifact: url.to_string(),
            reason: format!("HTTP {}", code),
        },
        ureq::Error::Timeout(_) => DlxError::FetchTimeout {
            artifact: url.to_string(),
        },
        ureq::Error::HostNotFound => DlxError::Network {
            artifact: url.to_string(),
            reason: "DNS lookup failed".to_string(),
        },
        ureq::Error::Io(e) => classify_io_transfer(url, e),
        other => DlxError::Network {
            artifact: url.to_string(),
            reason: other.to_string(),
        },
    }
}

fn classify_io_transfer(url: &str, err: io::Error) -> DlxError {
    if err.kind() == ErrorKind::TimedOut {
        DlxError::FetchTimeout {
            artifact: url.to_string(),
        }
    } else {
        DlxError::Network {
            artifact: url.to_string(),
            reason: err.to_string(),
        }
    }
}
