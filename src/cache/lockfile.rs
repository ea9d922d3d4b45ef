//! Lockfile loading and content hashing
//!
//! The lockfile is the sole input to the fetch stage: byte-identical content
//! means an identical dependency cache identity, independent of any source
//! tree changes.

use crate::error::{KilnError, KilnResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A loaded, validated dependency lockfile
#[derive(Debug, Clone)]
pub struct Lockfile {
    /// Path the lockfile was loaded from
    pub path: PathBuf,
    /// Raw lockfile contents
    pub contents: String,
    /// SHA256 of the contents (first 12 hex chars)
    pub hash: String,
}

impl Lockfile {
    /// Load a lockfile from disk
    ///
    /// Fails with a manifest error if the file is missing or not
    /// syntactically valid TOML. Validation is deliberately shallow: the
    /// pinned dependency format belongs to the toolchain, not this pipeline.
    pub fn load(path: &Path) -> KilnResult<Self> {
        if !path.is_file() {
            return Err(KilnError::Manifest {
                path: path.to_path_buf(),
                reason: "lockfile not found".to_string(),
            });
        }

        let contents = fs::read_to_string(path).map_err(|e| KilnError::Manifest {
            path: path.to_path_buf(),
            reason: format!("unreadable: {}", e),
        })?;

        if let Err(e) = contents.parse::<toml::Value>() {
            return Err(KilnError::Manifest {
                path: path.to_path_buf(),
                reason: format!("invalid syntax: {}", e),
            });
        }

        let hash = hash_contents(contents.as_bytes());
        debug!("Loaded lockfile {} (hash {})", path.display(), hash);

        Ok(Self {
            path: path.to_path_buf(),
            contents,
            hash,
        })
    }

    /// File name of the lockfile (e.g. `Cargo.lock`)
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Cargo.lock".to_string())
    }
}

/// Hash lockfile contents using SHA256, returning first 12 hex chars
fn hash_contents(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let result = hasher.finalize();
    hex::encode(&result[..6])
}
