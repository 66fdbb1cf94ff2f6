//! Turning specifications into runnable payloads
//!
//! - [`spec`]: package spec parsing and the range/force policy
//! - [`pipeline`]: acquire, fetch, verify and publish cache entries
//! - [`binary`]: locate the executable inside a published payload
//! - [`update`]: newer-version notices for cached packages

pub mod binary;
pub mod pipeline;
pub mod spec;
pub mod update;

pub use binary::{resolve_downloaded, resolve_package_binary, Executable, Interpreter, Platform};
pub use pipeline::{BinaryRequest, Installed, Installer, PackageRequest};
pub use spec::{resolve_force, PackageSpec};
pub use update::UpdateChecker;
