//! Persistent cache registry for build byproducts
//!
//! Cache volumes are the only channel of reuse across pipeline runs, and the
//! only mutable state shared between concurrent builds. Each volume is a
//! named directory under the cache root with a declared sharing mode.
//!
//! # Sharing modes
//!
//! | Mode | Discipline | Safe for |
//! |------|-----------|----------|
//! | unlocked | concurrent writers may race | content-addressed, read-mostly data |
//! | locked | exclusive advisory lock per id | mutable caches (compilation output) |
//!
//! A locked volume's id uniquely determines its mutual-exclusion domain:
//! builds sharing an id serialize on it, builds with different ids never
//! contend. Locks release on guard drop or process exit, so an aborted build
//! leaves the volume unspecified but uncorrupted and safe to retry.

pub mod lockfile;
pub mod registry;
pub mod volume;

pub use lockfile::Lockfile;
pub use registry::{compilation_volume_id, CacheRegistry, VolumeGuard, VolumeInfo};
pub use registry::{DEPENDENCY_REGISTRY, DEPENDENCY_VCS};
pub use volume::{format_bytes, CacheVolume, SharingMode, VolumeMeta, VolumeState};
