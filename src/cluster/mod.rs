//! # Cluster collaborators
//!
//! The volume manager never talks to Ceph directly. It goes through two
//! narrow seams:
//!
//! - [`DirectoryProbe`]: existence check and creation of a directory inside
//!   the CephFS tree.
//! - [`MountExecutor`]: kernel mount/unmount of a CephFS subtree onto a local
//!   path.
//!
//! Production implementations live in [`ceph`] and [`probe`]; both reach the
//! cluster through a [`ClusterConnection`] that can be rebuilt in place on a
//! reload signal.

pub mod ceph;
pub mod connection;
pub mod probe;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use ceph::{CephMountExecutor, MountOptions};
pub use connection::{ClusterConnection, ClusterHandle, ClusterSettings};
pub use probe::MountedFsProbe;

/// Errors raised while talking to the cluster or the OS mount table.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("unable to read keyring {path}: {source}")]
    Keyring {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no key entry found in keyring {0}")]
    MissingKey(String),

    #[error("unable to determine MDS address from {0:?}")]
    MdsUnavailable(String),

    #[error("cluster config {0} not found")]
    MissingConfig(String),

    #[error("not connected to cluster {0}")]
    NotConnected(String),
}

/// Existence check and creation of directories inside the distributed
/// filesystem. Paths are canonical volume paths such as `/foo/bar`.
#[async_trait]
pub trait DirectoryProbe: Send + Sync {
    async fn exists(&self, path: &str) -> std::io::Result<bool>;

    async fn make_dir(&self, path: &str, mode: u32) -> std::io::Result<()>;
}

/// Kernel mount and unmount of CephFS subtrees.
///
/// Implementations must tolerate mounting a target that is already mounted:
/// the volume manager mounts on every Mount request.
#[async_trait]
pub trait MountExecutor: Send + Sync {
    async fn mount(&self, source: &str, target: &Path) -> Result<(), ClusterError>;

    async fn unmount(&self, target: &Path) -> Result<(), ClusterError>;
}
