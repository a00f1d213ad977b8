//! # Volume lifecycle and mount references
//!
//! [`VolumeManager`] maps Docker's create/mount/unmount/remove requests onto
//! directories inside CephFS, mounted locally under a single root, with a
//! reference count per volume so concurrent containers share one entry.
//!
//! ## Mountpoints
//!
//! Every volume name is normalized by [`name::canonical_path`] into one key
//! that is used everywhere:
//!
//! ```text
//!   "  /team/cache "  ──►  /team/cache
//!                            │
//!        ┌───────────────────┼────────────────────────┐
//!        ▼                   ▼                        ▼
//!   registry key      CephFS directory      {local_root}/team/cache
//! ```
//!
//! ## Reference counting
//!
//! Mount and Unmount each issue a real `mount`/`umount` on every call, not
//! only on the first and last reference. Mount increments a live record or
//! installs a fresh one at 1 (a stale record at 0 is reset, not bumped);
//! Unmount refuses a record below 1. Remove only destroys data when the count
//! is exactly 1 (clear the mounted contents) or 0 (mount the CephFS root and
//! delete the subtree); with more references the data is kept.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cephfs_volume::volume::{VolumeManager, VolumePaths};
//!
//! let manager = VolumeManager::new(VolumePaths::from_global_config(), probe, executor);
//! manager.create("cache").await?;
//! let mountpoint = manager.mount("cache").await?;
//! manager.unmount("cache").await?;
//! manager.remove("cache").await?;
//! ```

pub mod name;
pub mod registry;

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;

use crate::{
    cluster::{DirectoryProbe, MountExecutor},
    error::{Result, VolumeError},
    util::config,
};

pub use registry::{VolumeRecord, VolumeRegistry};

/// Mode for directories created inside CephFS.
pub const VOLUME_DIR_MODE: u32 = 0o755;

/// Local paths used to place mountpoints.
#[derive(Debug, Clone)]
pub struct VolumePaths {
    /// Directory under which every volume is mounted.
    pub local_root: PathBuf,
}

impl VolumePaths {
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
        }
    }

    /// Build paths using global config (`{mount_base}/{plugin_name}`).
    pub fn from_global_config() -> Self {
        Self::new(config::local_root())
    }

    /// Local mountpoint for a canonical path.
    pub fn mountpoint(&self, path: &str) -> PathBuf {
        self.local_root.join(path.trim_start_matches('/'))
    }
}

/// Volume as reported by Get and List.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: PathBuf,
}

/// Scope advertised to Docker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeScope {
    /// Volumes are visible from every host in the cluster.
    Global,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub scope: VolumeScope,
}

/// Manager responsible for the lifecycle of CephFS-backed volumes.
pub struct VolumeManager {
    paths: VolumePaths,
    registry: VolumeRegistry,
    probe: Arc<dyn DirectoryProbe>,
    executor: Arc<dyn MountExecutor>,
}

impl VolumeManager {
    pub fn new(
        paths: VolumePaths,
        probe: Arc<dyn DirectoryProbe>,
        executor: Arc<dyn MountExecutor>,
    ) -> Self {
        tracing::info!(
            "volume manager: base mount dir={}",
            paths.local_root.display()
        );
        Self {
            paths,
            registry: VolumeRegistry::new(),
            probe,
            executor,
        }
    }

    pub fn paths(&self) -> &VolumePaths {
        &self.paths
    }

    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    /// Ensure the backing CephFS directory exists. Never mounts or registers.
    pub async fn create(&self, name: &str) -> Result<()> {
        let path = name::canonical_path(name)?;
        let _guard = self.registry.lock(&path).await;
        self.ensure_backing_dir(&path).await
    }

    /// Mount a volume and take a reference on it.
    ///
    /// The subtree is mounted on every call, even when the volume is already
    /// registered; the executor treats an existing mount as success.
    pub async fn mount(&self, name: &str) -> Result<PathBuf> {
        let path = name::canonical_path(name)?;
        let _guard = self.registry.lock(&path).await;
        let start = std::time::Instant::now();
        let mountpoint = self.paths.mountpoint(&path);

        ensure_local_dir(&mountpoint).await?;
        self.ensure_backing_dir(&path).await?;
        self.executor
            .mount(&path, &mountpoint)
            .await
            .map_err(|source| VolumeError::MountFailed {
                source_path: path.clone(),
                target: mountpoint.clone(),
                source,
            })?;

        let connections = self.registry.acquire(&path);
        tracing::info!(
            "mount done volume={} mountpoint={} connections={} elapsed={:.2}s",
            path,
            mountpoint.display(),
            connections,
            start.elapsed().as_secs_f64()
        );
        Ok(mountpoint)
    }

    /// Drop a reference, unmounting the mountpoint on every call.
    ///
    /// Callers must not expect the mount to survive until the last reference
    /// is released.
    pub async fn unmount(&self, name: &str) -> Result<()> {
        let path = name::canonical_path(name)?;
        let _guard = self.registry.lock(&path).await;
        let mountpoint = self.paths.mountpoint(&path);

        match self.registry.get(&path) {
            Some(record) if record.connections >= 1 => {}
            _ => return Err(VolumeError::NotMounted(mountpoint)),
        }

        self.physical_unmount(&mountpoint).await?;
        let remaining = self.registry.release(&path).unwrap_or_default();
        info!("volume {} connections {}", path, remaining);
        Ok(())
    }

    /// Forget a volume, deleting its data when at most one reference is known.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let path = name::canonical_path(name)?;
        let _guard = self.registry.lock(&path).await;
        let mountpoint = self.paths.mountpoint(&path);

        let Some(record) = self.registry.get(&path) else {
            return Ok(());
        };

        match record.connections {
            1 => {
                tracing::info!("remove {}: clearing {}", path, mountpoint.display());
                clear_dir_contents(&mountpoint).await?;
            }
            0 => {
                tracing::info!("remove {}: deleting subtree through root mount", path);
                self.executor
                    .mount("/", &mountpoint)
                    .await
                    .map_err(|source| VolumeError::MountFailed {
                        source_path: "/".to_string(),
                        target: mountpoint.clone(),
                        source,
                    })?;
                // The root is mounted on the volume's own mountpoint.
                let subtree = mountpoint.join(path.trim_start_matches('/'));
                if let Err(e) = remove_tree(&subtree).await {
                    if let Err(unmount_err) = self.physical_unmount(&mountpoint).await {
                        tracing::warn!("remove {}: root left mounted: {}", path, unmount_err);
                    }
                    return Err(e);
                }
            }
            n => {
                tracing::warn!(
                    "remove {}: {} references outstanding, keeping data",
                    path,
                    n
                );
            }
        }

        self.physical_unmount(&mountpoint).await?;
        self.registry.remove(&path);
        Ok(())
    }

    /// Look up a volume by probing CephFS; evicts stale records.
    pub async fn get(&self, name: &str) -> Result<VolumeInfo> {
        let path = name::canonical_path(name)?;
        let _guard = self.registry.lock(&path).await;

        let exists = self
            .probe
            .exists(&path)
            .await
            .map_err(|source| VolumeError::ProbeFailed {
                path: path.clone(),
                source,
            })?;
        if !exists {
            tracing::warn!("dir {} does not exist", path);
            self.registry.remove(&path);
            return Err(VolumeError::NotFound(path));
        }

        let mountpoint = self.paths.mountpoint(&path);
        Ok(VolumeInfo {
            name: path,
            mountpoint,
        })
    }

    /// Every registered volume with its display name.
    pub fn list(&self) -> Vec<VolumeInfo> {
        self.registry
            .list()
            .into_iter()
            .map(|(path, record)| VolumeInfo {
                name: record.name,
                mountpoint: self.paths.mountpoint(&path),
            })
            .collect()
    }

    /// Mountpoint for a name, whether or not it is mounted.
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        let path = name::canonical_path(name)?;
        Ok(self.paths.mountpoint(&path))
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: VolumeScope::Global,
        }
    }

    async fn ensure_backing_dir(&self, path: &str) -> Result<()> {
        let exists = self
            .probe
            .exists(path)
            .await
            .map_err(|source| VolumeError::ProbeFailed {
                path: path.to_string(),
                source,
            })?;
        if !exists {
            self.probe
                .make_dir(path, VOLUME_DIR_MODE)
                .await
                .map_err(|source| VolumeError::CreateDirFailed {
                    path: path.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn physical_unmount(&self, mountpoint: &Path) -> Result<()> {
        self.executor
            .unmount(mountpoint)
            .await
            .map_err(|source| VolumeError::UnmountFailed {
                target: mountpoint.to_path_buf(),
                source,
            })
    }
}

/// Create `dir` if missing; refuse anything that is not a directory.
async fn ensure_local_dir(dir: &Path) -> Result<()> {
    let io_err = |source| VolumeError::LocalIo {
        path: dir.to_path_buf(),
        source,
    };
    match tokio::fs::symlink_metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(VolumeError::LocalPathConflict(dir.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tokio::fs::DirBuilder::new()
                .recursive(true)
                .mode(VOLUME_DIR_MODE)
                .create(dir)
                .await
                .map_err(io_err)
        }
        Err(e) => Err(io_err(e)),
    }
}

/// Remove every entry beneath `dir`, keeping `dir` itself.
async fn clear_dir_contents(dir: &Path) -> Result<()> {
    let io_err = |path: &Path, source| VolumeError::LocalIo {
        path: path.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| io_err(dir, e))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(dir, e))? {
        let child = entry.path();
        let file_type = entry.file_type().await.map_err(|e| io_err(&child, e))?;
        let removed = if file_type.is_dir() {
            tokio::fs::remove_dir_all(&child).await
        } else {
            tokio::fs::remove_file(&child).await
        };
        removed.map_err(|e| io_err(&child, e))?;
    }
    Ok(())
}

/// Remove `dir` recursively; a missing tree is not an error.
async fn remove_tree(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(VolumeError::LocalIo {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
