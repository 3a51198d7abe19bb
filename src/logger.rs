use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tracing::Level;
use tracing_subscriber::fmt::writer::{MakeWriter, MakeWriterExt};

use crate::config::LogConfig;
use crate::error::{AppError, AppResult};

const LOG_PREFIX: &str = "engine-";
const LOG_EXTENSION: &str = "log";

/// Daily log files under a single directory. The open handle is swapped
/// when the date changes.
pub struct LogManager {
    file: Mutex<Option<(String, File)>>,
    log_dir: PathBuf,
}

impl LogManager {
    pub fn new(log_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;

        Ok(Self {
            file: Mutex::new(None),
            log_dir,
        })
    }

    fn current_file_name() -> String {
        let now = chrono::Local::now();
        format!("{}{}.{}", LOG_PREFIX, now.format("%Y-%m-%d"), LOG_EXTENSION)
    }

    pub fn append(&self, bytes: &[u8]) -> io::Result<()> {
        let name = Self::current_file_name();
        let mut file_lock = self
            .file
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Lock error: {}", e)))?;

        let needs_new_file = match file_lock.as_ref() {
            Some((open_name, _)) => *open_name != name,
            None => true,
        };

        if needs_new_file {
            let new_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.log_dir.join(&name))?;
            *file_lock = Some((name, new_file));
        }

        if let Some((_, ref mut file)) = *file_lock {
            file.write_all(bytes)?;
            file.flush()?;
        }

        Ok(())
    }

    pub fn list_log_files(&self) -> AppResult<Vec<String>> {
        let entries = fs::read_dir(&self.log_dir)?;

        let mut log_files: Vec<String> = entries
            .filter_map(|entry| {
                entry.ok().and_then(|e| {
                    let path = e.path();
                    if is_log_file(&path) {
                        path.file_name()
                            .and_then(|n| n.to_str())
                            .map(|s| s.to_string())
                    } else {
                        None
                    }
                })
            })
            .collect();

        log_files.sort_by(|a, b| b.cmp(a)); // Most recent first
        Ok(log_files)
    }

    pub fn read_log_file(&self, filename: &str) -> AppResult<String> {
        let path = self.log_dir.join(filename);

        if !path.exists() || !path.is_file() {
            return Err(AppError::Other("Log file not found".to_string()));
        }

        Ok(fs::read_to_string(path)?)
    }

    pub fn clear_all_logs(&self) -> AppResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.log_dir)?.flatten() {
            let path = entry.path();
            if is_log_file(&path) {
                fs::remove_file(path)?;
                removed += 1;
            }
        }
        if let Ok(mut file_lock) = self.file.lock() {
            *file_lock = None;
        }
        Ok(removed)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

fn is_log_file(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|s| s.to_str()) == Some(LOG_EXTENSION)
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(LOG_PREFIX))
            .unwrap_or(false)
}

#[derive(Clone)]
pub struct FileSink(Arc<LogManager>);

pub struct FileSinkWriter(Arc<LogManager>);

impl Write for FileSinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for FileSink {
    type Writer = FileSinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FileSinkWriter(self.0.clone())
    }
}

/// Installs the global `tracing` subscriber. Output always goes to stderr
/// and additionally to daily files when `config.dir` is set. Returns the
/// file manager so hosts can list or read the logs.
///
/// Calling this twice is harmless: the second install fails quietly and
/// the already-installed subscriber stays active.
pub fn init_logging(config: &LogConfig) -> AppResult<Option<Arc<LogManager>>> {
    let level = Level::from_str(&config.level).unwrap_or(Level::INFO);

    let Some(dir) = config.dir.as_ref() else {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(io::stderr)
            .try_init();
        return Ok(None);
    };

    let manager = Arc::new(LogManager::new(dir)?);
    let writer = io::stderr.and(FileSink(manager.clone()));
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(dir = %manager.log_dir().display(), "file logging initialized");
    }

    Ok(Some(manager))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_lists_daily_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::new(dir.path()).unwrap();

        manager.append(b"first line\n").unwrap();
        manager.append(b"second line\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a log").unwrap();

        let files = manager.list_log_files().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with(LOG_PREFIX));

        let content = manager.read_log_file(&files[0]).unwrap();
        assert_eq!(content, "first line\nsecond line\n");

        assert_eq!(manager.clear_all_logs().unwrap(), 1);
        assert!(manager.list_log_files().unwrap().is_empty());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn reading_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::new(dir.path()).unwrap();
        assert!(manager.read_log_file("engine-1999-01-01.log").is_err());
    }
}
