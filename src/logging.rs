//! Log output with reopen support for rotation.
//!
//! Output goes to `{log_dir}/{plugin}-docker-cephfs.log` unless
//! `CEPHFS_DOCKER_DEBUG=1` is set, in which case it stays on stderr. A
//! permission error opening the file also falls back to stderr.

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing_subscriber::{fmt::MakeWriter, EnvFilter};

pub const DEBUG_ENV: &str = "CEPHFS_DOCKER_DEBUG";

pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV).as_deref() == Ok("1")
}

/// Shared log destination: a file that can be reopened, or stderr.
#[derive(Clone, Default)]
pub struct LogSink {
    path: Option<PathBuf>,
    file: Arc<Mutex<Option<File>>>,
}

impl LogSink {
    pub fn stderr() -> Self {
        Self::default()
    }

    /// Open `path` for appending.
    ///
    /// A permission error degrades to stderr; any other error is returned.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        match open_append(&path) {
            Ok(file) => Ok(Self {
                path: Some(path),
                file: Arc::new(Mutex::new(Some(file))),
            }),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("WARN: logging fallback to STDERR: {e}");
                Ok(Self::stderr())
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close and reopen the log file, picking up a rotated path.
    pub fn reopen(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut slot = self.lock();
        if let Some(old) = slot.as_mut() {
            old.flush()?;
            old.sync_all()?;
        }
        *slot = Some(open_append(path)?);
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        match self.lock().as_mut() {
            Some(file) => {
                file.flush()?;
                file.sync_all()
            }
            None => io::stderr().flush(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

pub struct LogWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut slot = self.file.lock().unwrap_or_else(|p| p.into_inner());
        match slot.as_mut() {
            Some(file) => file.write(buf),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = self.file.lock().unwrap_or_else(|p| p.into_inner());
        match slot.as_mut() {
            Some(file) => file.flush(),
            None => io::stderr().flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            file: self.file.clone(),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init(log_file: &Path) -> io::Result<LogSink> {
    let sink = if debug_enabled() {
        LogSink::stderr()
    } else {
        LogSink::open(log_file)?
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(sink.clone())
        .with_ansi(sink.path().is_none())
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| io::Error::other(format!("install subscriber: {e}")))?;

    if let Some(path) = sink.path() {
        tracing::info!("setting log file: {}", path.display());
    }
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_survive_reopen_after_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.log");
        let sink = LogSink::open(&path).unwrap();

        sink.make_writer().write_all(b"before\n").unwrap();
        std::fs::rename(&path, dir.path().join("plugin.log.1")).unwrap();
        sink.reopen().unwrap();
        sink.make_writer().write_all(b"after\n").unwrap();
        sink.flush().unwrap();

        let rotated = std::fs::read_to_string(dir.path().join("plugin.log.1")).unwrap();
        let current = std::fs::read_to_string(&path).unwrap();
        assert_eq!(rotated, "before\n");
        assert_eq!(current, "after\n");
    }

    #[test]
    fn stderr_sink_reopen_is_noop() {
        let sink = LogSink::stderr();
        assert!(sink.path().is_none());
        sink.reopen().unwrap();
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LogSink::open(dir.path().join("nope/plugin.log"));
        assert!(err.is_err());
    }
}
