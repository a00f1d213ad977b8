//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use cephfs_volume::{
    cluster::{ClusterError, DirectoryProbe, MountExecutor},
    volume::{VolumeManager, VolumePaths},
};
use tokio::sync::Barrier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Mount { source: String, target: PathBuf },
    Unmount { target: PathBuf },
}

/// Directory probe backed by a set of existing CephFS paths.
#[derive(Default)]
pub struct FakeProbe {
    pub dirs: Mutex<HashSet<String>>,
    pub probes: Mutex<Vec<String>>,
    pub fail_probe: Mutex<bool>,
}

impl FakeProbe {
    pub fn has(&self, path: &str) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }

    pub fn forget(&self, path: &str) {
        self.dirs.lock().unwrap().remove(path);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.lock().unwrap().len()
    }
}

#[async_trait]
impl DirectoryProbe for FakeProbe {
    async fn exists(&self, path: &str) -> io::Result<bool> {
        self.probes.lock().unwrap().push(path.to_string());
        if *self.fail_probe.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mds unreachable"));
        }
        Ok(self.has(path))
    }

    async fn make_dir(&self, path: &str, mode: u32) -> io::Result<()> {
        assert_eq!(mode, 0o755);
        self.dirs.lock().unwrap().insert(path.to_string());
        Ok(())
    }
}

/// Mount executor that records every call.
#[derive(Default)]
pub struct FakeExecutor {
    pub calls: Mutex<Vec<MountCall>>,
    pub fail_mount: Mutex<bool>,
    pub fail_unmount: Mutex<bool>,
    /// When set, every mount waits here before returning.
    pub mount_barrier: Option<Arc<Barrier>>,
}

impl FakeExecutor {
    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn unmounts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MountCall::Unmount { .. }))
            .count()
    }

    pub fn mounts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MountCall::Mount { .. }))
            .count()
    }
}

#[async_trait]
impl MountExecutor for FakeExecutor {
    async fn mount(&self, source: &str, target: &Path) -> Result<(), ClusterError> {
        if let Some(barrier) = &self.mount_barrier {
            barrier.wait().await;
        }
        if *self.fail_mount.lock().unwrap() {
            return Err(ClusterError::MdsUnavailable(String::new()));
        }
        self.calls.lock().unwrap().push(MountCall::Mount {
            source: source.to_string(),
            target: target.to_path_buf(),
        });
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), ClusterError> {
        if *self.fail_unmount.lock().unwrap() {
            return Err(ClusterError::NotConnected("ceph".to_string()));
        }
        self.calls.lock().unwrap().push(MountCall::Unmount {
            target: target.to_path_buf(),
        });
        Ok(())
    }
}

pub struct Harness {
    pub root: tempfile::TempDir,
    pub probe: Arc<FakeProbe>,
    pub executor: Arc<FakeExecutor>,
    pub manager: Arc<VolumeManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_executor(FakeExecutor::default())
    }

    pub fn with_executor(executor: FakeExecutor) -> Self {
        let root = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeProbe::default());
        let executor = Arc::new(executor);
        let manager = Arc::new(VolumeManager::new(
            VolumePaths::new(root.path().join("cephfs")),
            probe.clone(),
            executor.clone(),
        ));
        Self {
            root,
            probe,
            executor,
            manager,
        }
    }

    pub fn local_root(&self) -> PathBuf {
        self.root.path().join("cephfs")
    }

    pub fn connections(&self, path: &str) -> Option<u32> {
        self.manager.registry().get(path).map(|r| r.connections)
    }
}
