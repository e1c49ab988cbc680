//! Test utilities for kforward_core integration tests.
#![allow(missing_docs, dead_code)]

use std::path::Path;
use std::time::{Duration, Instant};

/// Process state letter and process group from `/proc/<pid>/stat`
pub fn proc_stat(pid: u32) -> Option<(char, u32)> {
    let raw = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let rest = &raw[raw.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some((state, pgrp))
}

/// Whether the process exists and is not a zombie
pub fn is_running(pid: u32) -> bool {
    matches!(proc_stat(pid), Some((state, _)) if state != 'Z')
}

/// Non-zombie processes whose process group is `pgid`
pub fn running_in_group(pgid: u32) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok()?.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            matches!(proc_stat(*pid), Some((state, pgrp)) if pgrp == pgid && state != 'Z')
        })
        .collect()
}

/// Where fd `fd` of `pid` points
pub fn fd_target(pid: u32, fd: u32) -> Option<std::path::PathBuf> {
    let link = Path::new("/proc")
        .join(pid.to_string())
        .join("fd")
        .join(fd.to_string());
    std::fs::read_link(link).ok()
}

/// Poll `cond` every 20ms until it holds or `timeout` elapses
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
