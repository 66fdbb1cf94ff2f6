//! Binary resolution
//!
//! Turns a published payload into something [`ProcessRunner`] can start.
//! Downloaded files are executed directly; packages are resolved through
//! the `bin` declaration of their `package.json`.
//!
//! [`ProcessRunner`]: crate::fetch::ProcessRunner

use crate::error::{DlxError, DlxResult};
use crate::install::spec::unscoped;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// Wrapper suffixes tried on Windows, highest priority first
const WINDOWS_SUFFIXES: &[&str] = &[".cmd", ".bat", ".ps1", ".exe", ""];

/// Target platform family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

/// Interpreter needed to start a script wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpreter {
    /// `cmd.exe` for `.cmd` and `.bat`
    Cmd,
    /// PowerShell for `.ps1`
    PowerShell,
}

/// A resolved executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub path: PathBuf,
    pub interpreter: Option<Interpreter>,
}

impl Executable {
    pub fn native(path: PathBuf) -> Self {
        Self {
            path,
            interpreter: None,
        }
    }

    /// Command that starts this executable, ready for arguments
    pub fn command(&self) -> Command {
        match self.interpreter {
            None => Command::new(&self.path),
            Some(Interpreter::Cmd) => {
                let mut cmd = Command::new("cmd");
                cmd.args(["/d", "/s", "/c"]).arg(&self.path);
                cmd
            }
            Some(Interpreter::PowerShell) => {
                let mut cmd = Command::new("powershell");
                cmd.args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
                    .arg(&self.path);
                cmd
            }
        }
    }
}

/// Interpreter required for `path` on `platform`, if any
fn interpreter_for(path: &Path, platform: Platform) -> Option<Interpreter> {
    if platform != Platform::Windows {
        return None;
    }
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "cmd" | "bat" => Some(Interpreter::Cmd),
        "ps1" => Some(Interpreter::PowerShell),
        _ => None,
    }
}

/// Executable for a downloaded single-file payload
pub fn resolve_downloaded(path: PathBuf, platform: Platform) -> Executable {
    let interpreter = interpreter_for(&path, platform);
    Executable { path, interpreter }
}

/// Declared binaries of a manifest, in declaration order
fn declared_binaries(package_name: &str, manifest: &serde_json::Value) -> Vec<(String, String)> {
    match manifest.get("bin") {
        Some(serde_json::Value::String(path)) => {
            vec![(unscoped(package_name).to_string(), path.clone())]
        }
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .filter_map(|(name, path)| Some((name.clone(), path.as_str()?.to_string())))
            .collect(),
        _ => vec![],
    }
}

/// Pick one of several declared binaries
///
/// Order: the requested name, the last path segment of the package name,
/// the unscoped package name, then the first declaration.
pub fn select_binary<'a>(
    binaries: &'a [(String, String)],
    package_name: &str,
    requested: Option<&str>,
) -> Option<&'a (String, String)> {
    if binaries.len() == 1 {
        return binaries.first();
    }

    let last_segment = package_name.rsplit('/').next().unwrap_or(package_name);
    let candidates = requested
        .into_iter()
        .chain([last_segment, unscoped(package_name)]);

    for wanted in candidates {
        if let Some(found) = binaries.iter().find(|(name, _)| name == wanted) {
            return Some(found);
        }
    }
    binaries.first()
}

/// Resolve the executable of an installed package rooted at `root`
pub async fn resolve_package_binary(
    root: &Path,
    package_name: &str,
    requested: Option<&str>,
    platform: Platform,
) -> DlxResult<Executable> {
    let manifest_path = root.join("package.json");
    let content = fs::read(&manifest_path)
        .await
        .map_err(|e| DlxError::io(format!("reading {}", manifest_path.display()), e))?;
    let manifest: serde_json::Value = serde_json::from_slice(&content)?;

    let binaries = declared_binaries(package_name, &manifest);
    let (bin_name, rel_path) =
        select_binary(&binaries, package_name, requested).ok_or_else(|| DlxError::NoBinaries {
            package: package_name.to_string(),
        })?;
    debug!("Resolved binary {} -> {} for {}", bin_name, rel_path, package_name);

    let candidate = root.join(rel_path);
    match platform {
        Platform::Unix => {
            if fs::try_exists(&candidate).await.unwrap_or(false) {
                Ok(Executable::native(candidate))
            } else {
                Err(DlxError::BinaryNotFound {
                    package: package_name.to_string(),
                    path: candidate,
                })
            }
        }
        Platform::Windows => {
            for suffix in WINDOWS_SUFFIXES {
                let mut with_suffix = OsString::from(candidate.as_os_str());
                with_suffix.push(suffix);
                let with_suffix = PathBuf::from(with_suffix);
                if fs::try_exists(&with_suffix).await.unwrap_or(false) {
                    return Ok(resolve_downloaded(with_suffix, platform));
                }
            }
            Err(DlxError::BinaryNotFound {
                package: package_name.to_string(),
                path: candidate,
            })
        }
    }
}
