//! Error types for volume lifecycle operations.
//!
//! Every variant renders to the single-line message that is handed back to
//! Docker in the `Err` field of a plugin response.

use std::path::PathBuf;

use thiserror::Error;

use crate::cluster::ClusterError;

/// Errors produced by [`VolumeManager`](crate::volume::VolumeManager).
#[derive(Error, Debug)]
pub enum VolumeError {
    /// Empty or whitespace-only identifier (after stripping leading `/`).
    #[error("unable to parse volume name {0:?}")]
    InvalidName(String),

    /// The directory probe could not tell whether the volume exists.
    #[error("unable to check directory {path}: {source}")]
    ProbeFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to create directory {path}: {source}")]
    CreateDirFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Mounting failed, including MDS lookup and keyring errors.
    #[error("unable to mount {source_path} on {}: {source}", target.display())]
    MountFailed {
        source_path: String,
        target: PathBuf,
        #[source]
        source: ClusterError,
    },

    #[error("unable to unmount {}: {source}", target.display())]
    UnmountFailed {
        target: PathBuf,
        #[source]
        source: ClusterError,
    },

    #[error("unable to find volume mounted on {}", .0.display())]
    NotMounted(PathBuf),

    #[error("dir {0} does not exist")]
    NotFound(String),

    #[error("{} already exists and it's not a directory", .0.display())]
    LocalPathConflict(PathBuf),

    /// Local filesystem failure while preparing or clearing a mountpoint.
    #[error("{}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, VolumeError>;
