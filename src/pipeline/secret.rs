//! Build-time secret handling
//!
//! The secret parameterizes compilation (e.g. decrypting embedded source)
//! and exists only for the duration of the build stage. It is injected into
//! the build command's environment, never written to a cache volume, and a
//! post-assembly scan asserts it is absent from the runtime image.

use crate::error::{KilnError, KilnResult};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// An ephemeral build-time secret
///
/// Debug and Display are redacted so the value cannot reach logs or error
/// messages by accident.
#[derive(Clone)]
pub struct BuildSecret(String);

impl BuildSecret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read a secret from a file, trimming a trailing newline
    pub fn from_file(path: &Path) -> KilnResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| KilnError::io(format!("reading secret file {}", path.display()), e))?;
        Ok(Self(content.trim_end_matches('\n').to_string()))
    }

    /// Expose the raw value for environment injection
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty (treated as absent)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for BuildSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BuildSecret([redacted])")
    }
}

impl fmt::Display for BuildSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

/// Scan a directory tree for the secret's bytes
///
/// Returns the first file containing the secret, or None if the tree is
/// clean. Used after runtime assembly to prove the secret never leaked into
/// the image filesystem.
pub fn scan_for_leak(root: &Path, secret: &BuildSecret) -> KilnResult<Option<PathBuf>> {
    if secret.is_empty() {
        return Ok(None);
    }

    scan_dir(root, secret.expose().as_bytes())
}

fn scan_dir(dir: &Path, needle: &[u8]) -> KilnResult<Option<PathBuf>> {
    let entries =
        fs::read_dir(dir).map_err(|e| KilnError::io(format!("scanning {}", dir.display()), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| KilnError::io(format!("scanning {}", dir.display()), e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| KilnError::io(format!("scanning {}", path.display()), e))?;

        if file_type.is_dir() {
            if let Some(hit) = scan_dir(&path, needle)? {
                return Ok(Some(hit));
            }
        } else if file_type.is_file() {
            let contents = fs::read(&path)
                .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;
            if contains(&contents, needle) {
                return Ok(Some(path));
            }
        }
        // Symlinks are skipped: their targets are scanned where they live
    }

    Ok(None)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
