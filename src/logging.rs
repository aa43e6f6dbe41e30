use std::fs::{self, create_dir_all, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use structured_logger::json::new_writer;
use structured_logger::Builder;

use crate::config::LogConfig;
use crate::error::Result;

/// Copies every log line to stderr and to the pipeline log file, rolling the
/// file over to `<file>.1` .. `<file>.<backups>` once it passes `max_bytes`.
pub struct TeeWriter {
    console: io::Stderr,
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    backups: u32,
}

impl TeeWriter {
    pub fn open(log_path: &Path, max_bytes: u64, backups: u32) -> Result<Self> {
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = open_append(log_path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            console: io::stderr(),
            path: log_path.to_path_buf(),
            file,
            size,
            max_bytes,
            backups,
        })
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    // Shift <file>.N-1 to <file>.N, the live file to <file>.1, reopen empty
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        } else {
            for index in (1..self.backups).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
            self.file = open_append(&self.path)?;
        }
        self.size = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size > 0 && self.size + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        self.console.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.console.flush()
    }
}

/// Install the JSON-lines logger. Each line carries timestamp, level,
/// target, message and any key-value fields.
pub fn setup_logging(log_path: &Path, log: &LogConfig) -> Result<()> {
    let writer = TeeWriter::open(log_path, log.max_bytes, log.backups)?;
    Builder::with_level(&log.level)
        .with_target_writer("*", new_writer(writer))
        .init();
    Ok(())
}
