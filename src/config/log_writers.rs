//! Log Destinations
//!
//! Opens the configured log files. Standard output always comes first.

use super::error::ConfigError;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// A writable log destination
#[derive(Debug)]
pub enum LogWriter {
    Stdout(io::Stdout),
    File { path: PathBuf, file: File },
}

impl LogWriter {
    pub fn is_stdout(&self) -> bool {
        matches!(self, Self::Stdout(_))
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Stdout(_) => None,
            Self::File { path, .. } => Some(path),
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(out) => out.write(buf),
            Self::File { file, .. } => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(out) => out.flush(),
            Self::File { file, .. } => file.flush(),
        }
    }
}

/// Some log files could not be opened
///
/// `writers` still holds standard output and every file that did open.
#[derive(Debug, Error)]
#[error("failed to open {} log file(s): {}", .failures.len(), summary(.failures))]
pub struct LogWritersError {
    pub writers: Vec<LogWriter>,
    pub failures: Vec<ConfigError>,
}

fn summary(failures: &[ConfigError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Standard output followed by one append-mode handle per path, in order
pub fn open_log_writers<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<LogWriter>, LogWritersError> {
    let mut writers = vec![LogWriter::Stdout(io::stdout())];
    let mut failures = Vec::new();

    for path in paths {
        let path = path.as_ref();
        match open_append(path) {
            Ok(file) => {
                debug!("Opened log file {}", path.display());
                writers.push(LogWriter::File {
                    path: path.to_path_buf(),
                    file,
                });
            }
            Err(source) => failures.push(ConfigError::LogFileOpen {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    if failures.is_empty() {
        Ok(writers)
    } else {
        Err(LogWritersError { writers, failures })
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.append(true).create(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    options.open(path)
}
