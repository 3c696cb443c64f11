//! Shared logging utilities for VPO binaries.
//!
//! Two layers: an env-filtered stderr layer for the console and a
//! size-capped rolling file under the VPO home directory.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "vpo=info,vpo_worker=info,vpo_db=info,vpo_engine=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Get the VPO home directory: ~/.vpo (override with VPO_HOME).
pub fn vpo_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("VPO_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vpo")
}

/// Get the logs directory: ~/.vpo/logs
pub fn logs_dir() -> PathBuf {
    vpo_home().join("logs")
}

/// Get the default job store path: ~/.vpo/jobs.db
pub fn default_db_path() -> PathBuf {
    vpo_home().join("jobs.db")
}

/// Get the scratch directory for in-flight job artifacts.
pub fn scratch_dir() -> PathBuf {
    vpo_home().join("scratch")
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(app_name: &str, verbose: bool) -> Result<()> {
    let log_dir = logs_dir();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let writer = RollingWriter::open(log_dir, app_name)
        .context("Failed to initialize rolling log writer")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// Size-capped appender shared across layers. Rotation keeps
/// `MAX_LOG_FILES` files: app.log, app.log.1, ...
#[derive(Clone)]
pub struct RollingWriter {
    inner: Arc<Mutex<Appender>>,
}

impl RollingWriter {
    fn open(dir: PathBuf, base_name: &str) -> io::Result<Self> {
        let appender = Appender::open(dir, sanitize(base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut appender = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        appender.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut appender = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        appender.flush()
    }
}

struct Appender {
    dir: PathBuf,
    base_name: String,
    file: File,
    written: u64,
}

impl Appender {
    fn open(dir: PathBuf, base_name: String) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.log", base_name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir,
            base_name,
            file,
            written,
        })
    }

    fn path_for(&self, index: usize) -> PathBuf {
        if index == 0 {
            self.dir.join(format!("{}.log", self.base_name))
        } else {
            self.dir.join(format!("{}.log.{}", self.base_name, index))
        }
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let oldest = self.path_for(MAX_LOG_FILES - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (0..MAX_LOG_FILES - 1).rev() {
            let src = self.path_for(index);
            if src.exists() {
                fs::rename(&src, self.path_for(index + 1))?;
            }
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(0))?;
        self.written = 0;
        Ok(())
    }
}

impl Write for Appender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
