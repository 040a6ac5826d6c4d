/// File persistence for log output
///
/// Appends plain-text log lines to a per-day file under the logs directory.
/// Writes are buffered behind a mutex and flushed on demand during shutdown.
use crate::paths;
use chrono::Local;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};

struct LogFile {
    writer: BufWriter<File>,
    day: String,
}

static LOG_FILE: Lazy<Mutex<Option<LogFile>>> = Lazy::new(|| Mutex::new(None));

fn open_for_today() -> Option<LogFile> {
    let day = Local::now().format("%Y-%m-%d").to_string();
    let path = paths::get_logs_directory().join(format!("agentbus_{}.log", day));

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(LogFile {
            writer: BufWriter::new(file),
            day,
        }),
        Err(e) => {
            eprintln!("Logger: failed to open {}: {}", path.display(), e);
            None
        }
    }
}

/// Initialize file logging (opens today's log file)
pub fn init_file_logging() {
    let mut guard = LOG_FILE.lock();
    if guard.is_none() {
        *guard = open_for_today();
    }
}

/// Append one line to the current log file, rotating at midnight
pub fn write_to_file(line: &str) {
    let mut guard = LOG_FILE.lock();

    let today = Local::now().format("%Y-%m-%d").to_string();
    let needs_rotate = match guard.as_ref() {
        Some(lf) => lf.day != today,
        None => true,
    };
    if needs_rotate {
        if let Some(lf) = guard.as_mut() {
            let _ = lf.writer.flush();
        }
        *guard = open_for_today();
    }

    if let Some(lf) = guard.as_mut() {
        let _ = writeln!(lf.writer, "{}", line);
    }
}

/// Flush pending writes to disk
pub fn flush_file_logging() {
    if let Some(lf) = LOG_FILE.lock().as_mut() {
        let _ = lf.writer.flush();
    }
}
