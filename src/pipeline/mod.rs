//! The staged build pipeline
//!
//! Three stages consumed in strict dependency order, each stage's output
//! type being the next stage's sole input:
//!
//! ```text
//! Lockfile ──fetch──▶ DependencyCache ──build──▶ CompiledArtifact ──assemble──▶ RuntimeImage
//! ```
//!
//! Data flows strictly forward; no stage reads back from a later one. The
//! only reuse across pipeline runs is through the cache registry, and a
//! failed stage aborts the run with no partial promotion.

pub mod assemble;
pub mod build;
pub mod fetch;
pub mod image;
pub mod secret;

pub use assemble::RuntimeAssembly;
pub use build::{BuildStage, CompiledArtifact};
pub use fetch::{DependencyCache, FetchStage};
pub use image::{ImageManifest, RuntimeImage, RuntimeUser};
pub use secret::BuildSecret;

use crate::cache::{CacheRegistry, Lockfile};
use crate::config::Config;
use crate::error::KilnResult;
use crate::exec::CommandRunner;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Fully resolved inputs for one pipeline run
#[derive(Debug)]
pub struct PipelineRequest {
    /// Source tree to compile
    pub source: PathBuf,
    /// Lockfile path
    pub lockfile: PathBuf,
    /// Where the finalized image lands
    pub output: PathBuf,
    /// Optional build-time secret
    pub secret: Option<BuildSecret>,
}

/// Orchestrates one run of the three-stage pipeline
pub struct Pipeline<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    registry: &'a CacheRegistry,
    build_id: Uuid,
    workspace: PathBuf,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline run with a fresh build id
    pub fn new(
        config: &'a Config,
        runner: &'a dyn CommandRunner,
        registry: &'a CacheRegistry,
        workspace_root: PathBuf,
    ) -> Self {
        let build_id = Uuid::new_v4();
        let workspace = workspace_root.join(build_id.to_string());
        Self {
            config,
            runner,
            registry,
            build_id,
            workspace,
        }
    }

    /// The run's unique build id
    pub fn build_id(&self) -> Uuid {
        self.build_id
    }

    /// Run the fetch stage alone (CI cache priming)
    pub async fn fetch(&self, lockfile_path: &std::path::Path) -> KilnResult<DependencyCache> {
        // Lockfile validation happens before any cache volume is touched
        let lockfile = Lockfile::load(lockfile_path)?;

        FetchStage::new(
            self.registry,
            self.runner,
            &self.config.fetch,
            self.workspace.clone(),
        )
        .run(lockfile)
        .await
    }

    /// Run the build stage against a populated dependency cache
    pub async fn build(
        &self,
        deps: &DependencyCache,
        request: &PipelineRequest,
    ) -> KilnResult<CompiledArtifact> {
        BuildStage::new(
            self.registry,
            self.runner,
            &self.config.build,
            &self.config.pipeline.project,
            &request.source,
            self.workspace.join("build"),
        )
        .run(deps, request.secret.as_ref())
        .await
    }

    /// Run runtime assembly, consuming the compiled artifact
    pub async fn assemble(
        &self,
        deps: &DependencyCache,
        artifact: CompiledArtifact,
        request: &PipelineRequest,
    ) -> KilnResult<RuntimeImage> {
        RuntimeAssembly::new(self.runner, &self.config.runtime, request.output.clone())
            .run(
                artifact,
                request.secret.as_ref(),
                self.build_id,
                &deps.lockfile.hash,
            )
            .await
    }

    /// Remove the per-run scratch workspace
    ///
    /// Called after a successful run; a failed run keeps its workspace for
    /// post-mortems.
    pub async fn cleanup(&self) {
        if self.workspace.exists() {
            let _ = fs::remove_dir_all(&self.workspace).await;
            debug!("Removed build workspace {}", self.workspace.display());
        }
    }

    /// Run all three stages and return the finalized image
    pub async fn run(&self, request: &PipelineRequest) -> KilnResult<RuntimeImage> {
        info!("Starting build {}", self.build_id);

        let deps = self.fetch(&request.lockfile).await?;
        let artifact = self.build(&deps, request).await?;
        let image = self.assemble(&deps, artifact, request).await?;

        self.cleanup().await;
        Ok(image)
    }
}
