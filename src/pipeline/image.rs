//! Runtime image representation and manifest persistence

use crate::error::{KilnError, KilnResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Unprivileged identity the service runs as
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeUser {
    /// User name
    pub name: String,
    /// Numeric user id
    pub uid: u32,
    /// Numeric group id
    pub gid: u32,
    /// Home directory inside the image
    pub home: String,
}

/// Manifest describing a finalized runtime image
///
/// Written as `manifest.json` at the image root once every assembly step has
/// completed. Its presence marks the image as valid; a tree without it is a
/// discarded partial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Build run that produced this image
    pub build_id: Uuid,
    /// Installed artifact path, relative to the image root
    pub artifact: String,
    /// Default process entry point (the artifact itself, no arguments)
    pub entrypoint: Vec<String>,
    /// Environment defaults, overridable at deploy time
    pub env: BTreeMap<String, String>,
    /// Execution identity
    pub user: RuntimeUser,
    /// Names of installed runtime toolchain components
    pub components: Vec<String>,
    /// Hash of the lockfile the build resolved against
    pub lockfile_hash: String,
    /// When assembly finished
    pub created_at: DateTime<Utc>,
}

/// A finalized runtime image on disk
#[derive(Debug, Clone)]
pub struct RuntimeImage {
    /// Image root directory
    pub root: PathBuf,
    /// Parsed manifest
    pub manifest: ImageManifest,
}

impl RuntimeImage {
    /// Manifest path for an image root
    pub fn manifest_path(root: &Path) -> PathBuf {
        root.join("manifest.json")
    }

    /// Write the manifest into an image root
    pub async fn write_manifest(root: &Path, manifest: &ImageManifest) -> KilnResult<()> {
        let path = Self::manifest_path(root);
        let content = serde_json::to_string_pretty(manifest)?;
        fs::write(&path, content)
            .await
            .map_err(|e| KilnError::io(format!("writing {}", path.display()), e))
    }

    /// Load an image from a finalized root directory
    pub async fn load(root: &Path) -> KilnResult<Self> {
        let path = Self::manifest_path(root);
        if !path.exists() {
            return Err(KilnError::PathNotFound(path));
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;
        let manifest: ImageManifest = serde_json::from_str(&content)?;

        Ok(Self {
            root: root.to_path_buf(),
            manifest,
        })
    }

    /// Absolute path of the installed artifact
    pub fn artifact_path(&self) -> PathBuf {
        self.root.join(&self.manifest.artifact)
    }
}
