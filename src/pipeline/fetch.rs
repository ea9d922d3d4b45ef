//! Fetch stage: populate the dependency cache from the lockfile
//!
//! Resolution is driven from a scratch project containing only a stub
//! manifest and a copy of the lockfile, so the cache identity depends on the
//! lockfile alone: source tree edits never invalidate this stage.

use crate::cache::{CacheRegistry, Lockfile, SharingMode, DEPENDENCY_REGISTRY, DEPENDENCY_VCS};
use crate::config::schema::FetchConfig;
use crate::error::{KilnError, KilnResult};
use crate::exec::{CommandRunner, CommandSpec};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

/// Stub manifest written into the scratch project
const SCRATCH_MANIFEST: &str = r#"[package]
name = "kiln-fetch-scratch"
version = "0.0.0"
edition = "2021"
"#;

/// Output of the fetch stage, consumed by the build stage
#[derive(Debug)]
pub struct DependencyCache {
    /// Data directory of the dependency registry volume
    pub registry_dir: PathBuf,
    /// Data directory of the version-control checkout volume
    pub vcs_dir: PathBuf,
    /// The lockfile resolution was driven from
    pub lockfile: Lockfile,
}

/// The fetch stage
pub struct FetchStage<'a> {
    registry: &'a CacheRegistry,
    runner: &'a dyn CommandRunner,
    config: &'a FetchConfig,
    workspace: PathBuf,
}

impl<'a> FetchStage<'a> {
    /// Create a fetch stage operating in the given per-run workspace
    pub fn new(
        registry: &'a CacheRegistry,
        runner: &'a dyn CommandRunner,
        config: &'a FetchConfig,
        workspace: PathBuf,
    ) -> Self {
        Self {
            registry,
            runner,
            config,
            workspace,
        }
    }

    /// Download all pinned dependencies into the dependency cache volumes
    pub async fn run(&self, lockfile: Lockfile) -> KilnResult<DependencyCache> {
        let scratch = self.prepare_scratch(&lockfile).await?;

        // Fixed stable ids shared by every invocation: all fetches of the
        // same environment serialize on these volumes.
        let registry_guard = self
            .registry
            .acquire(DEPENDENCY_REGISTRY, SharingMode::Locked)
            .await?;
        let vcs_guard = self
            .registry
            .acquire(DEPENDENCY_VCS, SharingMode::Locked)
            .await?;

        let spec = CommandSpec::from_command_line(&self.config.command)?
            .with_cwd(&scratch)
            .with_env("CARGO_HOME", registry_guard.data_dir().display().to_string())
            .with_env(
                "KILN_DEP_CACHE",
                registry_guard.data_dir().display().to_string(),
            )
            .with_env("KILN_VCS_CACHE", vcs_guard.data_dir().display().to_string())
            .with_env(
                "KILN_LOCKFILE",
                scratch.join(lockfile.file_name()).display().to_string(),
            );

        info!("Fetching dependencies pinned by {}", lockfile.path.display());
        let output = self.runner.run(&spec).await?;

        if !output.success() {
            // The volume is left unspecified but uncorrupted; retry is safe
            return Err(KilnError::Resolution {
                reason: failure_reason(&output.stderr, output.code),
            });
        }

        registry_guard.mark_populated(Some(&lockfile.hash)).await?;
        vcs_guard.mark_populated(Some(&lockfile.hash)).await?;
        debug!("Dependency cache populated for lockfile {}", lockfile.hash);

        Ok(DependencyCache {
            registry_dir: registry_guard.data_dir(),
            vcs_dir: vcs_guard.data_dir(),
            lockfile,
        })
    }

    /// Write the scratch project: stub manifest plus the lockfile copy
    async fn prepare_scratch(&self, lockfile: &Lockfile) -> KilnResult<PathBuf> {
        let scratch = self.workspace.join("fetch-scratch");

        fs::create_dir_all(&scratch)
            .await
            .map_err(|e| KilnError::io(format!("creating {}", scratch.display()), e))?;

        fs::write(scratch.join("Cargo.toml"), SCRATCH_MANIFEST)
            .await
            .map_err(|e| KilnError::io("writing scratch manifest", e))?;

        fs::write(scratch.join(lockfile.file_name()), &lockfile.contents)
            .await
            .map_err(|e| KilnError::io("writing scratch lockfile", e))?;

        Ok(scratch)
    }
}

pub(crate) fn failure_reason(stderr: &str, code: i32) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exit code {}", code)
    } else {
        stderr.to_string()
    }
}
