//! Kernel CephFS mounts via `mount -t ceph` and `umount`.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::process::Command;

use super::{ClusterConnection, ClusterError, MountExecutor};

/// Parameters for the kernel client.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Ceph client id, passed as `name=`.
    pub client_name: String,
    /// Keyring holding the client's secret.
    pub keyring: PathBuf,
    /// Monitor port appended to the MDS host.
    pub monitor_port: u16,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            client_name: "admin".to_string(),
            keyring: PathBuf::from("/etc/ceph/ceph.client.admin.keyring"),
            monitor_port: 6789,
        }
    }
}

pub struct CephMountExecutor {
    connection: Arc<ClusterConnection>,
    options: MountOptions,
}

impl CephMountExecutor {
    pub fn new(connection: Arc<ClusterConnection>, options: MountOptions) -> Self {
        Self {
            connection,
            options,
        }
    }

    /// Ask the cluster for the active MDS host.
    async fn mds_host(&self) -> Result<String, ClusterError> {
        let handle = self.connection.handle().await?;
        let stat = handle.ceph(&["mds", "stat"]).await?;
        parse_mds_host(&stat).ok_or(ClusterError::MdsUnavailable(stat))
    }

    async fn secret(&self) -> Result<String, ClusterError> {
        let path = self.options.keyring.display().to_string();
        let content = tokio::fs::read_to_string(&self.options.keyring)
            .await
            .map_err(|source| ClusterError::Keyring {
                path: path.clone(),
                source,
            })?;
        parse_keyring_secret(&content).ok_or(ClusterError::MissingKey(path))
    }
}

#[async_trait]
impl MountExecutor for CephMountExecutor {
    async fn mount(&self, source: &str, target: &Path) -> Result<(), ClusterError> {
        let mds = self.mds_host().await?;
        let secret = self.secret().await?;
        let device = mount_device(&mds, self.options.monitor_port, source);
        tracing::info!(
            "mount -t ceph {} {} -o name={},secret=<redacted>",
            device,
            target.display(),
            self.options.client_name
        );

        let output = Command::new("mount")
            .arg("-t")
            .arg("ceph")
            .arg(&device)
            .arg(target)
            .arg("-o")
            .arg(mount_options(&self.options.client_name, &secret))
            .output()
            .await
            .map_err(|source| ClusterError::Spawn {
                program: "mount".to_string(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("already mounted") || stderr.contains("busy") {
            tracing::warn!(
                "{} already mounted on {}, reusing: {}",
                device,
                target.display(),
                stderr.trim()
            );
            return Ok(());
        }
        Err(ClusterError::CommandFailed {
            program: "mount".to_string(),
            status: output.status,
            stderr: stderr.trim().to_string(),
        })
    }

    async fn unmount(&self, target: &Path) -> Result<(), ClusterError> {
        tracing::info!("umount {}", target.display());
        let output = Command::new("umount")
            .arg(target)
            .output()
            .await
            .map_err(|source| ClusterError::Spawn {
                program: "umount".to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(ClusterError::CommandFailed {
                program: "umount".to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// `<mds>:<port>:<source>` device spec for the kernel client.
pub fn mount_device(mds: &str, port: u16, source: &str) -> String {
    format!("{mds}:{port}:{source}")
}

pub fn mount_options(client_name: &str, secret: &str) -> String {
    format!("name={client_name},secret={secret}")
}

/// Extract the MDS host from `ceph mds stat` output.
///
/// The host is the second `=`-separated field of the first line, e.g.
/// `e5: 1/1/1 up {0=ubuntu-1=up:active}` yields `ubuntu-1`.
pub fn parse_mds_host(stat: &str) -> Option<String> {
    let line = stat.lines().next()?;
    let host = line.split('=').nth(1)?.trim();
    (!host.is_empty()).then(|| host.to_string())
}

/// Extract the secret from a keyring file.
///
/// Takes the first line whose trimmed text starts with `key` followed by
/// `=`, and returns everything after the `=` with whitespace trimmed.
pub fn parse_keyring_secret(keyring: &str) -> Option<String> {
    keyring.lines().find_map(|line| {
        let value = line.trim().strip_prefix("key")?.trim_start().strip_prefix('=')?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
