//! Cache volume registry with acquire/release semantics
//!
//! The registry owns the cache root directory and hands out RAII guards for
//! volumes. Locked volumes take an exclusive advisory file lock keyed by the
//! volume id, which serializes writers across processes: concurrent builds
//! sharing an id block on each other instead of interleaving writes.

use crate::cache::volume::{dir_size, CacheVolume, SharingMode, VolumeMeta, VolumeState};
use crate::error::{KilnError, KilnResult};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Volume id for the downloaded dependency registry cache
pub const DEPENDENCY_REGISTRY: &str = "dependency-registry";

/// Volume id for version-control dependency checkouts
pub const DEPENDENCY_VCS: &str = "dependency-vcs";

/// Volume id for a project's compilation output cache
///
/// Keyed per project: builds of the same project serialize on it, builds of
/// different projects never contend.
pub fn compilation_volume_id(project: &str) -> String {
    format!("compilation-target-{}", project)
}

/// Summary of a volume for listing
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    /// Volume id
    pub id: String,
    /// Lifecycle state
    pub state: VolumeState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last build that touched the volume
    pub last_used: DateTime<Utc>,
    /// On-disk size of the data directory
    pub size_bytes: u64,
}

/// Registry of cache volumes under a single root directory
pub struct CacheRegistry {
    root: PathBuf,
}

impl CacheRegistry {
    /// Create a registry rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Registry root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Volume identity for an id and sharing mode
    pub fn volume(&self, id: &str, sharing: SharingMode) -> CacheVolume {
        CacheVolume::new(id, sharing, &self.root)
    }

    /// Acquire a volume, blocking on the lock for locked sharing
    ///
    /// Creates the volume directories on first use. The returned guard holds
    /// the lock until dropped; process exit releases it implicitly.
    pub async fn acquire(&self, id: &str, sharing: SharingMode) -> KilnResult<VolumeGuard> {
        let volume = self.volume(id, sharing);

        let lock = match sharing {
            SharingMode::Unlocked => None,
            SharingMode::Locked => Some(lock_volume(&volume, id).await?),
        };

        // Directories are created under the lock: a clear racing this
        // acquire either completes before the lock is granted or waits,
        // never leaving a half-deleted volume behind the guard.
        fs::create_dir_all(volume.data_dir())
            .await
            .map_err(|e| KilnError::CacheVolumeCreate {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        let mut meta = read_meta(&volume).await?;
        meta.last_used = Utc::now();
        write_meta(&volume, &meta).await?;

        debug!("Acquired cache volume {} ({})", id, sharing);
        Ok(VolumeGuard { volume, lock })
    }

    /// List all volumes under the registry root
    pub async fn list(&self) -> KilnResult<Vec<VolumeInfo>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }

        let mut infos = vec![];
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| KilnError::io("reading cache registry", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KilnError::io("reading cache registry entry", e))?
        {
            let path = entry.path();
            if !path.is_dir() || !path.join("meta.json").exists() {
                continue;
            }

            let id = entry.file_name().to_string_lossy().into_owned();
            let volume = self.volume(&id, SharingMode::Unlocked);
            let meta = read_meta(&volume).await?;

            infos.push(VolumeInfo {
                id,
                state: meta.state,
                created_at: meta.created_at,
                last_used: meta.last_used,
                size_bytes: dir_size(&volume.data_dir()),
            });
        }

        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos)
    }

    /// Remove a volume entirely
    ///
    /// Refuses to clear a volume that another build currently holds.
    pub async fn clear(&self, id: &str) -> KilnResult<()> {
        let volume = self.volume(id, SharingMode::Locked);

        if !volume.dir().exists() {
            return Err(KilnError::CacheVolumeNotFound(id.to_string()));
        }

        // Hold the lock while deleting so a concurrent build cannot race us
        let file = open_lock_file(&volume, id)?;
        file.try_lock_exclusive()
            .map_err(|_| KilnError::CacheVolumeBusy(id.to_string()))?;

        // The lock file itself stays behind under .locks/: it is the
        // mutual-exclusion domain and must outlive the volume directory.
        fs::remove_dir_all(volume.dir())
            .await
            .map_err(|e| KilnError::io(format!("removing cache volume {}", id), e))?;

        let _ = file.unlock();
        debug!("Cleared cache volume {}", id);
        Ok(())
    }

    /// Remove every volume, returning the number cleared
    pub async fn clear_all(&self) -> KilnResult<u32> {
        let mut cleared = 0;
        for info in self.list().await? {
            self.clear(&info.id).await?;
            cleared += 1;
        }
        Ok(cleared)
    }
}

/// RAII guard over an acquired cache volume
///
/// Dropping the guard releases the advisory lock. Aborting mid-build leaves
/// the data directory in an unspecified state, which the sharing discipline
/// makes safe to retry.
pub struct VolumeGuard {
    volume: CacheVolume,
    lock: Option<File>,
}

impl VolumeGuard {
    /// Directory the stage should read and write cached byproducts in
    pub fn data_dir(&self) -> PathBuf {
        self.volume.data_dir()
    }

    /// Volume id
    pub fn id(&self) -> &str {
        &self.volume.id
    }

    /// Record that a stage completed successfully against this volume
    pub async fn mark_populated(&self, lockfile_hash: Option<&str>) -> KilnResult<()> {
        let mut meta = read_meta(&self.volume).await?;
        meta.state = VolumeState::Populated;
        meta.last_used = Utc::now();
        if let Some(hash) = lockfile_hash {
            meta.lockfile_hash = Some(hash.to_string());
        }
        write_meta(&self.volume, &meta).await
    }
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        if let Some(file) = self.lock.take() {
            let _ = file.unlock();
        }
    }
}

fn open_lock_file(volume: &CacheVolume, id: &str) -> KilnResult<File> {
    let path = volume.lock_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| KilnError::CacheLock {
            id: id.to_string(),
            source: e,
        })?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| KilnError::CacheLock {
            id: id.to_string(),
            source: e,
        })
}

/// Take the exclusive lock without blocking the async runtime
async fn lock_volume(volume: &CacheVolume, id: &str) -> KilnResult<File> {
    let file = open_lock_file(volume, id)?;
    let id_owned = id.to_string();

    tokio::task::spawn_blocking(move || file.lock_exclusive().map(|_| file))
        .await
        .map_err(|e| KilnError::io("waiting for cache volume lock", std::io::Error::other(e)))?
        .map_err(|e| KilnError::CacheLock {
            id: id_owned,
            source: e,
        })
}

async fn read_meta(volume: &CacheVolume) -> KilnResult<VolumeMeta> {
    let path = volume.meta_path();
    if !path.exists() {
        return Ok(VolumeMeta::new());
    }

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;

    Ok(serde_json::from_str(&content)?)
}

async fn write_meta(volume: &CacheVolume, meta: &VolumeMeta) -> KilnResult<()> {
    let path = volume.meta_path();
    let content = serde_json::to_string_pretty(meta)?;

    fs::write(&path, content)
        .await
        .map_err(|e| KilnError::io(format!("writing {}", path.display()), e))
}
