//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// dlx - download and execute, cached
///
/// Fetches a binary or registry package once, keeps it in a shared local
/// cache, and runs it.
#[derive(Parser, Debug)]
#[command(name = "dlx")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DLX_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download a binary from a URL and run it
    Run(RunArgs),

    /// Install a registry package and run its binary
    Pkg(PkgArgs),

    /// Inspect and clean the local cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// URL of the binary
    pub url: String,

    /// File name to store the binary under (defaults to the last URL segment)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Expected SHA-256 of the download
    #[arg(long)]
    pub sha256: Option<String>,

    /// Re-download even if a fresh copy is cached
    #[arg(short, long)]
    pub force: bool,

    /// Arguments passed to the binary
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Arguments for the pkg command
#[derive(Parser, Debug)]
pub struct PkgArgs {
    /// Package spec: name, name@version, name@range, @scope/name@version
    pub spec: String,

    /// Binary to run when the package declares several
    #[arg(short, long)]
    pub bin: Option<String>,

    /// Reinstall even if cached (default for version ranges)
    #[arg(short, long, conflicts_with = "no_force")]
    pub force: bool,

    /// Reuse a cached install even for version ranges
    #[arg(long)]
    pub no_force: bool,

    /// Expected package manifest digest
    #[arg(long)]
    pub integrity: Option<String>,

    /// Arguments passed to the binary
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl PkgArgs {
    /// Explicit force choice, if any
    pub fn force_override(&self) -> Option<bool> {
        match (self.force, self.no_force) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print the cache root directory
    Path,

    /// Print the cache key of a specification string
    Key {
        /// Specification, e.g. `cowsay@1.6.0` or `<url>:<name>`
        spec: String,
    },

    /// List cache entries
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove expired and abandoned entries
    Gc {
        /// Remove entries older than N days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove one entry
    Rm {
        /// Cache key of the entry
        key: String,
    },

    /// Remove every entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
