//! Directory probe over a local mount of the CephFS root.

use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs;

use super::DirectoryProbe;

/// Resolves canonical volume paths beneath `fs_root`, where the whole CephFS
/// tree is mounted.
#[derive(Debug, Clone)]
pub struct MountedFsProbe {
    fs_root: PathBuf,
}

impl MountedFsProbe {
    pub fn new(fs_root: impl Into<PathBuf>) -> Self {
        Self {
            fs_root: fs_root.into(),
        }
    }

    pub fn fs_root(&self) -> &Path {
        &self.fs_root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{path} escapes {}", self.fs_root.display()),
            ));
        }
        Ok(self.fs_root.join(relative))
    }
}

#[async_trait]
impl DirectoryProbe for MountedFsProbe {
    async fn exists(&self, path: &str) -> io::Result<bool> {
        match fs::metadata(self.resolve(path)?).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn make_dir(&self, path: &str, mode: u32) -> io::Result<()> {
        let dir = self.resolve(path)?;
        tracing::debug!("creating {} mode {:o}", dir.display(), mode);
        fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(dir)
            .await
    }
}
