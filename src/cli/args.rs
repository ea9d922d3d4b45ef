//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Kiln - Staged Artifact Build Pipeline
///
/// Bakes a source tree and its pinned dependency manifest into a minimal
/// runtime image, reusing dependency and compilation caches across builds.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
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
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .kiln.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline: fetch, build, assemble
    Build(BuildArgs),

    /// Run only the fetch stage to prime the dependency cache
    Fetch(FetchArgs),

    /// Initialize a project-local .kiln.toml config
    Init(InitArgs),

    /// Check toolchain availability and cache health
    Status,

    /// Show or inspect configuration
    Config(ConfigArgs),

    /// Manage cache volumes
    Cache(CacheArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Source tree to compile (defaults to configuration, then cwd)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Lockfile path (defaults to the configured name inside the source tree)
    #[arg(long)]
    pub lockfile: Option<PathBuf>,

    /// Build-time secret value
    #[arg(long, env = "KILN_BUILD_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Read the build-time secret from a file
    #[arg(long, conflicts_with = "secret")]
    pub secret_file: Option<PathBuf>,

    /// Output directory for the finalized image
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Project name overriding the configured one (keys the compilation cache)
    #[arg(long)]
    pub project: Option<String>,
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Source tree holding the lockfile (defaults to configuration, then cwd)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Lockfile path (defaults to the configured name inside the source tree)
    #[arg(long)]
    pub lockfile: Option<PathBuf>,
}

/// Arguments for the init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite existing .kiln.toml
    #[arg(short, long)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config action to perform
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the config file path
    Path,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Cache action to perform
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache volumes
    List,
    /// Remove cache volumes
    Clear {
        /// Volume id to clear
        id: Option<String>,

        /// Clear every volume
        #[arg(long, conflicts_with = "id")]
        all: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
