//! Pid file persistence
//!
//! The pid file is the only record that survives between invocations. Its
//! sole content is the decimal pid of the active forward. Writes go through a
//! temp file and a rename so a reader never observes a half-written pid.

use crate::{CoreError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Parse pid file content. Surrounding whitespace is ignored; the value must
/// be a positive integer that fits a `pid_t`.
pub fn parse_pid(content: &str) -> Result<u32> {
    let trimmed = content.trim();
    match trimmed.parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid as u32),
        Ok(pid) => Err(CoreError::PidFile(format!(
            "pid must be positive, found {}",
            pid
        ))),
        Err(e) => Err(CoreError::PidFile(format!(
            "invalid pid {:?}: {}",
            trimmed, e
        ))),
    }
}

/// Read the pid recorded at `path`.
///
/// Returns `Ok(None)` if the file does not exist. Unreadable or malformed
/// content is an error; callers treat it as stale.
pub fn read_pid(path: impl AsRef<Path>) -> Result<Option<u32>> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CoreError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to read pid file {}: {}", path.display(), e),
            )))
        }
    };
    parse_pid(&content)
        .map(Some)
        .map_err(|e| CoreError::PidFile(format!("{}: {}", path.display(), e)))
}

/// Atomically record `pid` at `path`.
///
/// Steps:
/// - Ensure the parent directory exists
/// - Write the pid to a temp file in the same directory, then `sync_all`
/// - `rename` the temp file over the destination
/// - Best-effort fsync of the directory to persist the rename
pub fn write_pid_atomic(path: impl AsRef<Path>, pid: u32) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            CoreError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create pid file dir {}: {}", parent.display(), e),
            ))
        })?;
    }

    let tmp_path = temp_path_for(path);
    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| {
                CoreError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("Failed to open temp pid file {}: {}", tmp_path.display(), e),
                ))
            })?;
        f.write_all(pid.to_string().as_bytes()).map_err(|e| {
            CoreError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to write temp pid file {}: {}", tmp_path.display(), e),
            ))
        })?;
        let _ = f.sync_all();
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(CoreError::IoError(std::io::Error::new(
            e.kind(),
            format!(
                "Failed to replace pid file {} with {}: {}",
                path.display(),
                tmp_path.display(),
                e
            ),
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    debug!("Recorded pid {} in {}", pid, path.display());
    Ok(())
}

/// Remove the pid file. Returns whether a file was actually removed; a file
/// that is already gone is not an error.
pub fn remove_pid_file(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed pid file {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CoreError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to remove pid file {}: {}", path.display(), e),
        ))),
    }
}

/// Remove the pid file, logging instead of failing
pub fn discard_pid_file(path: impl AsRef<Path>) {
    if let Err(e) = remove_pid_file(path) {
        warn!("{}", e);
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
