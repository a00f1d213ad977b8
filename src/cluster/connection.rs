//! Owned connection to the Ceph cluster.
//!
//! The connection is a single resource that is torn down and rebuilt under
//! its own lock. It is independent from the per-volume locks, so a reconnect
//! may swap the handle while a mount is in flight; callers clone the current
//! [`ClusterHandle`] once per command.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use tokio::{process::Command, sync::Mutex};

use super::ClusterError;

/// Static parameters used to (re)build a connection.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// Cluster name passed as `--cluster`.
    pub cluster: String,
    /// Explicit `ceph.conf`; `None` means `/etc/ceph/<cluster>.conf`.
    pub config_file: Option<PathBuf>,
    /// The `ceph` CLI binary.
    pub ceph_bin: String,
}

impl ClusterSettings {
    pub fn new(cluster: impl Into<String>, config_file: Option<PathBuf>) -> Self {
        Self {
            cluster: cluster.into(),
            config_file,
            ceph_bin: "ceph".to_string(),
        }
    }

    pub fn resolved_config(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/etc/ceph/{}.conf", self.cluster)))
    }
}

/// A live view of the cluster, replaced wholesale on reconnect.
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    pub cluster: String,
    pub config_file: PathBuf,
    pub fsid: String,
    pub connected_at: SystemTime,
    ceph_bin: String,
}

impl ClusterHandle {
    /// Build a `ceph` command scoped to this cluster.
    pub fn ceph_command(&self) -> Command {
        let mut cmd = Command::new(&self.ceph_bin);
        cmd.arg("--cluster")
            .arg(&self.cluster)
            .arg("--conf")
            .arg(&self.config_file);
        cmd
    }

    /// Run a `ceph` subcommand and return trimmed stdout.
    pub async fn ceph(&self, args: &[&str]) -> Result<String, ClusterError> {
        let output = self
            .ceph_command()
            .args(args)
            .output()
            .await
            .map_err(|source| ClusterError::Spawn {
                program: self.ceph_bin.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ClusterError::CommandFailed {
                program: format!("{} {}", self.ceph_bin, args.join(" ")),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

pub struct ClusterConnection {
    settings: ClusterSettings,
    handle: Mutex<Option<Arc<ClusterHandle>>>,
}

impl ClusterConnection {
    pub fn new(settings: ClusterSettings) -> Self {
        Self {
            settings,
            handle: Mutex::new(None),
        }
    }

    /// Connect once at startup.
    pub async fn connect(settings: ClusterSettings) -> Result<Self, ClusterError> {
        let conn = Self::new(settings);
        conn.reconnect().await?;
        Ok(conn)
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    /// Build a fresh handle and swap it in.
    ///
    /// On failure the previous handle, if any, stays in place.
    pub async fn reconnect(&self) -> Result<Arc<ClusterHandle>, ClusterError> {
        let mut slot = self.handle.lock().await;
        let handle = Arc::new(self.open().await?);
        if let Some(old) = slot.replace(handle.clone()) {
            tracing::info!(cluster = %old.cluster, fsid = %old.fsid, "dropped cluster connection");
        }
        Ok(handle)
    }

    async fn open(&self) -> Result<ClusterHandle, ClusterError> {
        let config_file = self.settings.resolved_config();
        if !Path::new(&config_file).exists() {
            return Err(ClusterError::MissingConfig(
                config_file.display().to_string(),
            ));
        }

        let mut handle = ClusterHandle {
            cluster: self.settings.cluster.clone(),
            config_file,
            fsid: String::new(),
            connected_at: SystemTime::now(),
            ceph_bin: self.settings.ceph_bin.clone(),
        };
        handle.fsid = handle.ceph(&["fsid"]).await?;
        tracing::info!(
            cluster = %handle.cluster,
            fsid = %handle.fsid,
            config = %handle.config_file.display(),
            "connected to ceph"
        );
        Ok(handle)
    }

    /// Current handle, or [`ClusterError::NotConnected`].
    pub async fn handle(&self) -> Result<Arc<ClusterHandle>, ClusterError> {
        self.handle
            .lock()
            .await
            .clone()
            .ok_or_else(|| ClusterError::NotConnected(self.settings.cluster.clone()))
    }
}
