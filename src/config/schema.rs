//! Configuration schema for Kiln
//!
//! Configuration is stored at `~/.config/kiln/config.toml`, with optional
//! project-local overrides in `.kiln.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pipeline-wide settings
    pub pipeline: PipelineConfig,

    /// Fetch stage settings
    pub fetch: FetchConfig,

    /// Build stage settings
    pub build: BuildConfig,

    /// Runtime assembly settings
    pub runtime: RuntimeConfig,

    /// Cache registry settings
    pub cache: CacheConfig,
}

/// Pipeline-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Project name; keys the compilation cache volume
    pub project: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project: "svc".to_string(),
        }
    }
}

/// Fetch stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Lockfile path, relative to the source tree
    pub lockfile: PathBuf,

    /// Command that downloads all pinned dependencies
    ///
    /// Runs in the scratch project directory with `CARGO_HOME` and
    /// `KILN_DEP_CACHE` pointing into the dependency registry volume and
    /// `KILN_LOCKFILE` at the scratch lockfile copy.
    pub command: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            lockfile: PathBuf::from("Cargo.lock"),
            command: vec![
                "cargo".to_string(),
                "fetch".to_string(),
                "--locked".to_string(),
            ],
        }
    }
}

/// Build stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Source tree to compile (defaults to the current directory)
    pub source: PathBuf,

    /// Command that compiles and installs the artifact
    ///
    /// Runs in the source tree with `CARGO_HOME`/`KILN_DEP_CACHE`,
    /// `CARGO_TARGET_DIR`/`KILN_TARGET_CACHE`, and
    /// `CARGO_INSTALL_ROOT`/`KILN_ARTIFACT_OUT` set. Must install exactly
    /// one binary under `bin/` of the install root.
    pub command: Vec<String>,

    /// Name of the binary the build command installs
    pub artifact: String,

    /// Environment variable the build secret is exposed under
    pub secret_env: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            command: vec![
                "cargo".to_string(),
                "install".to_string(),
                "--locked".to_string(),
                "--path".to_string(),
                ".".to_string(),
            ],
            artifact: "svc".to_string(),
            secret_env: "KILN_BUILD_SECRET".to_string(),
        }
    }
}

/// A runtime toolchain component installed into the image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Component name (recorded in the image manifest)
    pub name: String,

    /// Install command, run with `KILN_IMAGE_ROOT` set
    pub command: Vec<String>,
}

/// Unprivileged execution identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// User name
    pub name: String,

    /// Numeric user id
    pub uid: u32,

    /// Numeric group id
    pub gid: u32,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            uid: 65532,
            gid: 65532,
        }
    }
}

/// Runtime assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default listening port baked into the image
    pub port: u16,

    /// Environment variable carrying the port
    pub port_env: String,

    /// Default log verbosity baked into the image
    pub log_level: String,

    /// Environment variable carrying the log verbosity
    pub log_env: String,

    /// Artifact install directory, relative to the image root
    pub install_dir: String,

    /// Where the finalized image lands (defaults to `./image`)
    pub output_dir: Option<PathBuf>,

    /// Execution identity
    pub user: UserConfig,

    /// Runtime toolchain components needed by the artifact at run time
    pub components: Vec<ComponentConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            port_env: "PORT".to_string(),
            log_level: "info".to_string(),
            log_env: "RUST_LOG".to_string(),
            install_dir: "usr/local/bin".to_string(),
            output_dir: None,
            user: UserConfig::default(),
            components: vec![
                ComponentConfig {
                    name: "sandbox-target".to_string(),
                    command: vec![
                        "rustup".to_string(),
                        "target".to_string(),
                        "add".to_string(),
                        "wasm32-unknown-unknown".to_string(),
                    ],
                },
                ComponentConfig {
                    name: "formatter".to_string(),
                    command: vec![
                        "rustup".to_string(),
                        "component".to_string(),
                        "add".to_string(),
                        "rustfmt".to_string(),
                    ],
                },
            ],
        }
    }
}

/// Cache registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root directory (defaults to the state directory's `cache/`)
    pub root: Option<PathBuf>,
}

impl CacheConfig {
    /// Configured root or the default under the state directory
    pub fn root_or_default(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(crate::config::ConfigManager::cache_dir)
    }
}
