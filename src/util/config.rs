//! Process-wide plugin configuration.
//!
//! Loaded once at startup from a TOML file (every field optional) and/or the
//! command line, then read through the accessor functions below.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::Deserialize;

static CONFIG: OnceCell<PluginConfig> = OnceCell::new();

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PluginConfig {
    /// Docker plugin name used with `--volume-driver`.
    pub plugin_name: String,
    /// Ceph cluster name.
    pub cluster: String,
    /// Host directory holding one subdirectory per plugin.
    pub mount_base: PathBuf,
    /// Directory where Docker looks for plugin sockets.
    pub plugin_dir: PathBuf,
    pub log_dir: PathBuf,
    /// `ceph.conf` path; defaults to `/etc/ceph/<cluster>.conf`.
    pub ceph_config: Option<PathBuf>,
    pub keyring: PathBuf,
    pub client_name: String,
    pub monitor_port: u16,
    /// Local mount of the CephFS root used for directory probes.
    pub fs_root: PathBuf,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plugin_name: "cephfs".to_string(),
            cluster: "ceph".to_string(),
            mount_base: PathBuf::from("/var/lib/docker-volumes"),
            plugin_dir: PathBuf::from("/run/docker/plugins"),
            log_dir: PathBuf::from("/var/log"),
            ceph_config: None,
            keyring: PathBuf::from("/etc/ceph/ceph.client.admin.keyring"),
            client_name: "admin".to_string(),
            monitor_port: 6789,
            fs_root: PathBuf::from("/run/cephfs-volume/root"),
        }
    }
}

impl PluginConfig {
    /// Parse a TOML file; missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("read config {}: {e}", path.display()))?;
        toml::from_str(&content).map_err(|e| format!("parse config {}: {e}", path.display()))
    }

    /// `{mount_base}/{plugin_name}`.
    pub fn local_root(&self) -> PathBuf {
        self.mount_base.join(&self.plugin_name)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.plugin_dir.join(format!("{}.sock", self.plugin_name))
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir
            .join(format!("{}-docker-cephfs.log", self.plugin_name))
    }
}

/// Load `path` and install it as the global config.
pub fn init_config(path: impl AsRef<Path>) -> Result<(), String> {
    init_config_with(PluginConfig::load(path)?)
}

pub fn init_config_with(config: PluginConfig) -> Result<(), String> {
    CONFIG
        .set(config)
        .map_err(|_| "config already initialized".to_string())
}

/// Global config, or defaults when nothing was installed.
pub fn get_config() -> &'static PluginConfig {
    CONFIG.get_or_init(PluginConfig::default)
}

pub fn plugin_name() -> String {
    get_config().plugin_name.clone()
}

pub fn local_root() -> PathBuf {
    get_config().local_root()
}

pub fn socket_path() -> PathBuf {
    get_config().socket_path()
}

pub fn log_file() -> PathBuf {
    get_config().log_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plugin.toml");
        std::fs::write(&file, "plugin_name = \"shared\"\nmonitor_port = 3300\n").unwrap();

        let config = PluginConfig::load(&file).unwrap();
        assert_eq!(config.plugin_name, "shared");
        assert_eq!(config.monitor_port, 3300);
        assert_eq!(config.cluster, "ceph");
        assert_eq!(config.ceph_config, None);
    }

    #[test]
    fn derived_paths() {
        let config = PluginConfig::default();
        assert_eq!(
            config.local_root(),
            PathBuf::from("/var/lib/docker-volumes/cephfs")
        );
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/run/docker/plugins/cephfs.sock")
        );
        assert_eq!(
            config.log_file(),
            PathBuf::from("/var/log/cephfs-docker-cephfs.log")
        );
    }

    #[test]
    fn bad_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plugin.toml");
        std::fs::write(&file, "monitor_port = \"not a port\"").unwrap();
        let err = PluginConfig::load(&file).unwrap_err();
        assert!(err.contains("parse config"));
    }
}
