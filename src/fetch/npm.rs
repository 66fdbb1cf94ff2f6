//! Package installation through the npm CLI

use crate::error::{DlxError, DlxResult};
use crate::fetch::PackageExtractor;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Installs packages with `npm install --prefix <dir>`
#[derive(Debug, Clone)]
pub struct NpmExtractor {
    program: String,
    registry: Option<String>,
}

impl NpmExtractor {
    pub fn new() -> Self {
        let program = if cfg!(windows) { "npm.cmd" } else { "npm" };
        Self {
            program: program.to_string(),
            registry: None,
        }
    }

    /// Install from a specific registry
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    fn install_args(&self, spec: &str, dest_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            "--prefix".to_string(),
            dest_dir.display().to_string(),
            "--no-save".to_string(),
            "--no-audit".to_string(),
            "--no-fund".to_string(),
            "--no-package-lock".to_string(),
            "--loglevel=error".to_string(),
        ];
        if let Some(ref registry) = self.registry {
            args.push(format!("--registry={}", registry));
        }
        args.push(spec.to_string());
        args
    }
}

impl Default for NpmExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PackageExtractor for NpmExtractor {
    async fn extract(&self, spec: &str, dest_dir: &Path) -> DlxResult<()> {
        let args = self.install_args(spec, dest_dir);
        debug!("Running: {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| DlxError::command_failed(format!("{} install {}", self.program, spec), e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(spec, &stderr))
    }
}

/// Bucket an npm failure by the error codes it prints
fn classify_failure(spec: &str, stderr: &str) -> DlxError {
    const NOT_FOUND: &[&str] = &["E404", "ETARGET", "404 Not Found", "No matching version"];
    const NETWORK: &[&str] = &[
        "ENOTFOUND",
        "EAI_AGAIN",
        "ECONNRESET",
        "ECONNREFUSED",
        "ETIMEDOUT",
        "ESOCKETTIMEDOUT",
        "network",
    ];

    let summary = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("npm exited with an error")
        .to_string();

    if NOT_FOUND.iter().any(|p| stderr.contains(p)) {
        DlxError::NotFound {
            artifact: spec.to_string(),
            source_desc: summary,
        }
    } else if NETWORK.iter().any(|p| stderr.contains(p)) {
        DlxError::Network {
            artifact: spec.to_string(),
            reason: summary,
        }
    } else {
        DlxError::ExtractFailed {
            spec: spec.to_string(),
            reason: summary,
        }
    }
}
