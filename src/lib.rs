//! # CephFS Volume Plugin Library
//!
//! `cephfs-volume` backs a Docker volume plugin with CephFS. Each volume is a
//! directory inside the shared filesystem, kernel-mounted on the host under a
//! single root, with a reference count so containers using the same volume
//! share one mountpoint.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cephfs_volume::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     cephfs_volume::util::config::init_config("cephfs-volume.toml")?;
//!     let cfg = cephfs_volume::util::config::get_config();
//!
//!     // Connect to the cluster
//!     let conn = Arc::new(
//!         ClusterConnection::connect(ClusterSettings::new(&cfg.cluster, cfg.ceph_config.clone()))
//!             .await?,
//!     );
//!
//!     // Wire the collaborators into the manager
//!     let executor = Arc::new(CephMountExecutor::new(conn, MountOptions::default()));
//!     let probe = Arc::new(MountedFsProbe::new(&cfg.fs_root));
//!     let manager = Arc::new(VolumeManager::new(
//!         VolumePaths::from_global_config(),
//!         probe,
//!         executor,
//!     ));
//!
//!     // Serve the Docker plugin socket
//!     PluginDaemon::new(manager)
//!         .serve(cephfs_volume::util::config::socket_path())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Using the Manager Directly
//!
//! ```rust,ignore
//! let mountpoint = manager.mount("team/cache").await?;   // {local_root}/team/cache
//! manager.mount("team/cache").await?;                    // connections == 2
//! manager.unmount("team/cache").await?;                  // umount, connections == 1
//! manager.remove("team/cache").await?;                   // clears data, unmounts, forgets
//! ```
//!
//! ## Core Components
//!
//! - [`volume`]: name normalization, registry, lifecycle state machine
//! - [`cluster`]: directory probe, kernel mount executor, cluster connection
//! - [`daemon`]: Docker plugin protocol over a Unix socket
//! - [`util::config`]: configuration management
//! - [`logging`]: log file sink with reopen on reload

#[macro_use]
extern crate log;

pub mod cluster;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod util;
pub mod volume;

/// Commonly used types and traits.
///
/// ```rust,ignore
/// use cephfs_volume::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cluster::{
        CephMountExecutor, ClusterConnection, ClusterError, ClusterHandle, ClusterSettings,
        DirectoryProbe, MountExecutor, MountOptions, MountedFsProbe,
    };

    pub use crate::daemon::{PluginDaemon, PluginResponse, PluginVolume, VolumeRequest};

    pub use crate::error::{Result, VolumeError};

    pub use crate::volume::{
        Capabilities, VolumeInfo, VolumeManager, VolumePaths, VolumeRecord, VolumeRegistry,
        VolumeScope,
    };
}

// Re-export key volume types at crate root for convenience
pub use error::VolumeError;
pub use volume::{VolumeManager, VolumePaths};
