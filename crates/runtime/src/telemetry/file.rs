//! Size-rotated JSON-lines event log.
//!
//! `events.log` is the live file; on rotation it becomes `events.log.1`, the
//! previous `.1` becomes `.2`, and so on up to `backup_count`. The oldest
//! backup is discarded.

use super::{EventSink, TelemetryError, TelemetryEvent};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

struct LogFile {
    file: File,
    size: u64,
}

/// Appends one JSON object per event and rotates by size.
pub struct RotatingFileSink {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    state: Mutex<LogFile>,
}

impl RotatingFileSink {
    /// Open (or create) the log, ensuring the parent directory exists.
    pub fn new(
        path: impl AsRef<Path>,
        max_bytes: u64,
        backup_count: usize,
    ) -> Result<Self, TelemetryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    TelemetryError::ConfigError(format!(
                        "Failed to create event log directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let state = open_append(&path)?;
        Ok(Self {
            path,
            max_bytes,
            backup_count,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&self, state: &mut LogFile) -> Result<(), TelemetryError> {
        state.file.flush()?;

        if self.backup_count > 0 {
            let oldest = self.backup_path(self.backup_count);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..self.backup_count).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
            *state = open_append(&self.path)?;
        } else {
            let file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .create(true)
                .open(&self.path)?;
            *state = LogFile { file, size: 0 };
        }

        tracing::debug!("Rotated event log {}", self.path.display());
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<LogFile, TelemetryError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok(LogFile { file, size })
}

impl EventSink for RotatingFileSink {
    fn record(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let len = line.len() as u64;

        let mut state = self.state.lock();
        if state.size > 0 && state.size + len > self.max_bytes {
            self.rotate(&mut state)?;
        }
        state.file.write_all(line.as_bytes())?;
        state.size += len;
        Ok(())
    }

    fn flush(&self) -> Result<(), TelemetryError> {
        self.state.lock().file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> TelemetryEvent {
        TelemetryEvent::new("inference").with("attempt", n as u64)
    }

    #[test]
    fn test_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let sink = RotatingFileSink::new(&path, 1024 * 1024, 5).unwrap();

        sink.record(&event(1)).unwrap();
        sink.record(&event(2)).unwrap();
        sink.flush().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: TelemetryEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.event_type, "inference");
        assert_eq!(parsed.payload["attempt"], 2);
    }

    #[test]
    fn test_rotation_keeps_bounded_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        // Every event exceeds the limit, so each record after the first rotates.
        let sink = RotatingFileSink::new(&path, 10, 2).unwrap();

        for n in 0..5 {
            sink.record(&event(n)).unwrap();
        }
        sink.flush().unwrap();

        assert!(path.exists());
        assert!(sink.backup_path(1).exists());
        assert!(sink.backup_path(2).exists());
        assert!(!sink.backup_path(3).exists());

        let live = fs::read_to_string(&path).unwrap();
        assert!(live.contains("\"attempt\":4"));
        let newest_backup = fs::read_to_string(sink.backup_path(1)).unwrap();
        assert!(newest_backup.contains("\"attempt\":3"));
    }

    #[test]
    fn test_zero_backups_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let sink = RotatingFileSink::new(&path, 10, 0).unwrap();

        sink.record(&event(1)).unwrap();
        sink.record(&event(2)).unwrap();
        sink.flush().unwrap();

        let live = fs::read_to_string(&path).unwrap();
        assert_eq!(live.lines().count(), 1);
        assert!(!sink.backup_path(1).exists());
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("events.log");
        let sink = RotatingFileSink::new(&path, 1024, 1).unwrap();
        sink.record(&event(1)).unwrap();
        assert!(sink.path().exists());
    }
}
