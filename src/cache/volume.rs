//! Cache volume identity and metadata
//!
//! A volume is a directory under the cache root: `data/` holds the cached
//! byproducts and `meta.json` records lifecycle metadata. Advisory lock
//! files live separately under `<root>/.locks/` so that removing a volume
//! never unlinks a lock another build holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Sharing discipline for a cache volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingMode {
    /// Concurrent writers may race; safe only for content-addressed data
    Unlocked,
    /// At most one writer at a time, keyed by the volume id
    Locked,
}

impl fmt::Display for SharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// Lifecycle state of a cache volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    /// Created but never finalized by a successful stage
    Building,
    /// A stage completed against this volume at least once
    Populated,
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Populated => write!(f, "populated"),
        }
    }
}

/// Metadata sidecar persisted next to a volume's data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMeta {
    /// Current state
    pub state: VolumeState,
    /// When the volume was first created
    pub created_at: DateTime<Utc>,
    /// When a build last touched the volume
    pub last_used: DateTime<Utc>,
    /// Lockfile hash the volume was last populated for (fetch caches only)
    pub lockfile_hash: Option<String>,
}

impl VolumeMeta {
    /// Metadata for a freshly created volume
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            state: VolumeState::Building,
            created_at: now,
            last_used: now,
            lockfile_hash: None,
        }
    }
}

impl Default for VolumeMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a cache volume within a registry
#[derive(Debug, Clone)]
pub struct CacheVolume {
    /// Stable volume identifier (e.g. "dependency-registry")
    pub id: String,
    /// Declared sharing mode
    pub sharing: SharingMode,
    /// Cache registry root this volume lives under
    pub root: PathBuf,
}

impl CacheVolume {
    /// Create a volume identity
    pub fn new(id: impl Into<String>, sharing: SharingMode, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            sharing,
            root: root.into(),
        }
    }

    /// Volume directory under the registry root
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.id)
    }

    /// Directory holding the cached byproducts
    pub fn data_dir(&self) -> PathBuf {
        self.dir().join("data")
    }

    /// Metadata sidecar path
    pub fn meta_path(&self) -> PathBuf {
        self.dir().join("meta.json")
    }

    /// Advisory lock file path
    ///
    /// Lock files live outside the volume directory: the mutual-exclusion
    /// domain is the lock file's inode, and it must survive the volume being
    /// cleared and recreated while a writer still holds it.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".locks").join(format!("{}.lock", self.id))
    }
}

/// Total size of a directory tree in bytes
pub(crate) fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };

    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => dir_size(&path),
                Ok(meta) => meta.len(),
                Err(_) => 0,
            }
        })
        .sum()
}
