//! Structured logger setup: a terminal drain chosen the way the teacher's
//! `bin/podcore/main.rs` chooses one (sync `CompactFormat` for a TTY,
//! `slog-async` over `FullFormat` otherwise), duplicated into a size-rotated
//! file drain so a batch's history survives past its process's stdout.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use isatty::stdout_isatty;
use slog::{Drain, Logger};
use slog_async;
use slog_term;

/// Above this size, `daemon.log` rotates to `.1`, pushing older generations
/// down and dropping the oldest.
const MAX_LOG_SIZE_BYTES: u64 = 10 * 1024 * 1024;

const MAX_ROTATED_GENERATIONS: u32 = 5;

pub fn build(log_dir: &Path, log_async: bool) -> Logger {
    let file_writer = RotatingFileWriter::new(log_dir.join("ppe.log"));
    let file_decorator = slog_term::PlainDecorator::new(file_writer);
    let file_drain = slog_term::FullFormat::new(file_decorator).build().fuse();
    let file_drain = slog_async::Async::new(file_drain).build().fuse();

    let term_decorator = slog_term::PlainSyncDecorator::new(io::stdout());
    if log_async || !stdout_isatty() {
        let term_drain = slog_term::FullFormat::new(term_decorator).build().fuse();
        let term_drain = slog_async::Async::new(term_drain).build().fuse();
        let drain = slog::Duplicate::new(term_drain, file_drain).fuse();
        Logger::root(drain, o!())
    } else {
        let term_drain = slog_term::CompactFormat::new(term_decorator).build().fuse();
        let term_drain = std::sync::Mutex::new(term_drain).fuse();
        let drain = slog::Duplicate::new(term_drain, file_drain).fuse();
        Logger::root(drain, o!())
    }
}

/// A `Write` implementation that rotates the underlying file once it crosses
/// [`MAX_LOG_SIZE_BYTES`], shifting `ppe.log` -> `ppe.log.1` -> ... and
/// dropping the oldest generation. Rotation failures are logged to stderr and
/// otherwise ignored -- a daemon should never fail to start because its old
/// logs couldn't be shuffled around.
struct RotatingFileWriter {
    path:         PathBuf,
    file:         File,
    bytes_written: u64,
}

impl RotatingFileWriter {
    fn new(path: PathBuf) -> RotatingFileWriter {
        let bytes_written = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let file = open_append(&path);
        RotatingFileWriter { path, file, bytes_written }
    }

    fn rotate(&mut self) {
        let path_str = self.path.display().to_string();
        for i in (1..MAX_ROTATED_GENERATIONS).rev() {
            let from = format!("{}.{}", path_str, i);
            let to = format!("{}.{}", path_str, i + 1);
            let _ = fs::rename(&from, &to);
        }
        let _ = fs::rename(&self.path, format!("{}.1", path_str));

        self.file = open_append(&self.path);
        self.bytes_written = 0;
    }
}

fn open_append(path: &Path) -> File {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap_or_else(|e| panic!("unable to open log file at {}: {}", path.display(), e))
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.bytes_written >= MAX_LOG_SIZE_BYTES {
            self.rotate();
        }
        let written = self.file.write(buf)?;
        self.bytes_written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
