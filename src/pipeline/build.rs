//! Build stage: compile the source tree into one installable artifact
//!
//! Reuses the dependency cache populated by the fetch stage and a locked
//! compilation cache keyed per project. Resolution is `--locked`: the build
//! must fail rather than silently deviate from the lockfile.

use crate::cache::{compilation_volume_id, CacheRegistry, SharingMode};
use crate::config::schema::BuildConfig;
use crate::error::{KilnError, KilnResult};
use crate::exec::{CommandRunner, CommandSpec};
use crate::pipeline::fetch::{failure_reason, DependencyCache};
use crate::pipeline::secret::BuildSecret;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Stderr markers that distinguish lockfile drift from an ordinary compile
/// failure (cargo's `--locked` refusal message names the lock file)
const LOCK_DRIFT_MARKERS: &[&str] = &["--locked", "lock file"];

/// The single binary produced by the build stage
///
/// Owned by the build stage until runtime assembly copies it into the image
/// and discards the stage directory.
#[derive(Debug)]
pub struct CompiledArtifact {
    /// Installed binary path
    pub path: PathBuf,
    /// Binary name
    pub name: String,
    /// Stage directory holding the install root
    pub stage_dir: PathBuf,
}

/// The build stage
pub struct BuildStage<'a> {
    registry: &'a CacheRegistry,
    runner: &'a dyn CommandRunner,
    config: &'a BuildConfig,
    project: &'a str,
    source: &'a Path,
    workspace: PathBuf,
}

impl<'a> BuildStage<'a> {
    /// Create a build stage for a source tree
    pub fn new(
        registry: &'a CacheRegistry,
        runner: &'a dyn CommandRunner,
        config: &'a BuildConfig,
        project: &'a str,
        source: &'a Path,
        workspace: PathBuf,
    ) -> Self {
        Self {
            registry,
            runner,
            config,
            project,
            source,
            workspace,
        }
    }

    /// Compile the source tree and install the artifact
    pub async fn run(
        &self,
        deps: &DependencyCache,
        secret: Option<&BuildSecret>,
    ) -> KilnResult<CompiledArtifact> {
        let install_root = self.workspace.join("install");
        fs::create_dir_all(&install_root)
            .await
            .map_err(|e| KilnError::io(format!("creating {}", install_root.display()), e))?;

        // Concurrent builds of the same project must not interleave partial
        // object writes, so the compilation cache serializes on the project id.
        let target_guard = self
            .registry
            .acquire(&compilation_volume_id(self.project), SharingMode::Locked)
            .await?;

        let mut spec = CommandSpec::from_command_line(&self.config.command)?
            .with_cwd(self.source)
            .with_env("CARGO_HOME", deps.registry_dir.display().to_string())
            .with_env("KILN_DEP_CACHE", deps.registry_dir.display().to_string())
            .with_env(
                "CARGO_TARGET_DIR",
                target_guard.data_dir().display().to_string(),
            )
            .with_env(
                "KILN_TARGET_CACHE",
                target_guard.data_dir().display().to_string(),
            )
            .with_env("CARGO_INSTALL_ROOT", install_root.display().to_string())
            .with_env("KILN_ARTIFACT_OUT", install_root.display().to_string());

        match secret {
            Some(secret) if !secret.is_empty() => {
                spec = spec.with_env(self.config.secret_env.clone(), secret.expose());
            }
            _ => {
                // Absence is not an error: whether the resulting binary can
                // serve protected workloads is the service's policy.
                warn!("Building without a build secret");
            }
        }

        info!("Compiling {} from {}", self.project, self.source.display());
        let output = self.runner.run(&spec).await?;

        if !output.success() {
            let reason = failure_reason(&output.stderr, output.code);
            if LOCK_DRIFT_MARKERS.iter().any(|m| output.stderr.contains(m)) {
                return Err(KilnError::LockMismatch { reason });
            }
            return Err(KilnError::Compile { reason });
        }

        let artifact_path = install_root.join("bin").join(&self.config.artifact);
        if !artifact_path.is_file() {
            return Err(KilnError::Compile {
                reason: format!(
                    "build command succeeded but produced no artifact at {}",
                    artifact_path.display()
                ),
            });
        }

        target_guard.mark_populated(None).await?;
        debug!("Installed artifact at {}", artifact_path.display());

        Ok(CompiledArtifact {
            path: artifact_path,
            name: self.config.artifact.clone(),
            stage_dir: self.workspace.clone(),
        })
    }
}
