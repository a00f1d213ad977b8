use std::{path::PathBuf, sync::Arc};

use cephfs_volume::{
    cluster::{
        CephMountExecutor, ClusterConnection, ClusterSettings, MountExecutor, MountOptions,
        MountedFsProbe,
    },
    daemon::PluginDaemon,
    logging::{self, LogSink},
    util::config::{self, PluginConfig},
    volume::{VolumeManager, VolumePaths},
};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser, Debug)]
#[command(
    name = "cephfs-volume",
    version,
    about = "Docker volume plugin backed by CephFS"
)]
struct Cli {
    /// TOML settings file; flags below override its values
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Docker plugin name for use on --volume-driver option
    #[arg(long)]
    name: Option<String>,

    /// Ceph cluster
    #[arg(long)]
    cluster: Option<String>,

    /// Mount directory for volumes on host
    #[arg(long)]
    mount: Option<PathBuf>,

    /// Docker plugin directory for socket
    #[arg(long)]
    plugins: Option<PathBuf>,

    /// Logfile directory
    #[arg(long)]
    logdir: Option<PathBuf>,

    /// Ceph cluster config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Client keyring holding the mount secret
    #[arg(long)]
    keyring: Option<PathBuf>,

    /// Local mountpoint for the CephFS root, used to probe volume directories
    #[arg(long)]
    fs_root: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<PluginConfig, String> {
        let mut cfg = match &self.settings {
            Some(path) => PluginConfig::load(path)?,
            None => PluginConfig::default(),
        };
        if let Some(v) = self.name {
            cfg.plugin_name = v;
        }
        if let Some(v) = self.cluster {
            cfg.cluster = v;
        }
        if let Some(v) = self.mount {
            cfg.mount_base = v;
        }
        if let Some(v) = self.plugins {
            cfg.plugin_dir = v;
        }
        if let Some(v) = self.logdir {
            cfg.log_dir = v;
        }
        if let Some(v) = self.config {
            cfg.ceph_config = Some(v);
        }
        if let Some(v) = self.keyring {
            cfg.keyring = v;
        }
        if let Some(v) = self.fs_root {
            cfg.fs_root = v;
        }
        Ok(cfg)
    }
}

/// Terminate on SIGTERM/SIGINT; on SIGHUP reopen the log and reconnect.
async fn handle_signals(sink: LogSink, conn: Arc<ClusterConnection>) -> std::io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut hup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = term.recv() => shutdown(&sink, "TERM"),
            _ = int.recv() => shutdown(&sink, "INT"),
            _ = hup.recv() => {
                tracing::info!("received HUP signal, reloading");
                if let Err(e) = sink.reopen() {
                    tracing::error!("unable to reload log: {e}");
                }
                if let Err(e) = conn.reconnect().await {
                    tracing::error!("reconnect to cluster failed: {e}");
                }
            }
        }
    }
}

fn shutdown(sink: &LogSink, sig: &str) -> ! {
    tracing::info!("received {sig} signal, closing log file");
    let _ = sink.flush();
    std::process::exit(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Cli::parse().into_config()?;
    config::init_config_with(cfg)?;
    let cfg = config::get_config();

    let sink = logging::init(&cfg.log_file())?;
    if unsafe { libc::geteuid() } != 0 {
        tracing::warn!("not running as root, mount and umount will likely fail");
    }

    let conn = Arc::new(
        ClusterConnection::connect(ClusterSettings::new(&cfg.cluster, cfg.ceph_config.clone()))
            .await?,
    );
    let executor = Arc::new(CephMountExecutor::new(
        conn.clone(),
        MountOptions {
            client_name: cfg.client_name.clone(),
            keyring: cfg.keyring.clone(),
            monitor_port: cfg.monitor_port,
        },
    ));

    // Directory probes run against a local mount of the whole tree.
    tokio::fs::create_dir_all(&cfg.fs_root).await?;
    executor.mount("/", &cfg.fs_root).await?;
    let probe = Arc::new(MountedFsProbe::new(&cfg.fs_root));

    let manager = Arc::new(VolumeManager::new(
        VolumePaths::from_global_config(),
        probe,
        executor,
    ));

    tokio::spawn(async move {
        if let Err(e) = handle_signals(sink, conn).await {
            tracing::error!("signal handler failed: {e}");
        }
    });

    let socket = config::socket_path();
    tracing::info!("opening socket for docker to connect: {}", socket.display());
    PluginDaemon::new(manager).serve(socket).await?;
    Ok(())
}
