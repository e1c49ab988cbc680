//! Unix process management with detached spawn and process-group signalling
//!
//! ## Process Groups
//!
//! When a process calls `setsid()`, it:
//! - Creates a new session and becomes the session leader
//! - Creates a new process group and becomes the process group leader
//! - Has no controlling terminal
//!
//! The group id therefore equals the pid, and a later invocation holding
//! only the pid can reach every process in the forward's tree with
//! `killpg`.
//!
//! ## Error Handling
//!
//! `ESRCH` (no such process) is an expected outcome everywhere in this module
//! and is reported as a value, never as an error. `EPERM` on signal delivery
//! means the pid now belongs to somebody else and is surfaced as an error.

// setsid() has to run between fork and exec
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, Pid};
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, error};

/// Signals used to take down a forward's process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    /// SIGTERM, allows the process to clean up
    Terminate,
    /// SIGKILL, cannot be caught
    Kill,
}

impl GroupSignal {
    fn as_nix(self) -> Signal {
        match self {
            GroupSignal::Terminate => Signal::SIGTERM,
            GroupSignal::Kill => Signal::SIGKILL,
        }
    }
}

impl std::fmt::Display for GroupSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_nix())
    }
}

/// What happened when a signal was sent to a process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    /// At least one process in the group received the signal
    Delivered,
    /// The group no longer exists
    NoSuchProcess,
}

/// A detached child process leading its own process group
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    child: Child,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Get the process group ID (same as PID for session leaders)
    pub fn pgid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit and return its exit status
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::ProcessWait(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Try to collect the exit status without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().map_err(|e| {
            CoreError::ProcessWait(format!(
                "Failed to try_wait for process {}: {}",
                self.pid, e
            ))
        })
    }
}

/// Spawn a process in a new session with all standard streams on `/dev/null`
///
/// The forward is long-lived and unattended: nothing reads its output, so a
/// piped stream would eventually fill and block it. The child is not killed
/// when the returned handle is dropped.
///
/// ## Example
///
/// ```rust,no_run
/// # async fn demo() -> kforward_core::Result<()> {
/// use kforward_core::process::unix::spawn_detached;
///
/// let child = spawn_detached("sleep", &["30"])?;
/// println!("Spawned process with PID: {}", child.pid());
/// # Ok(())
/// # }
/// ```
pub fn spawn_detached<S: AsRef<str>>(cmd: &str, args: &[S]) -> Result<ChildProcess> {
    let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
    debug!("Spawning detached process: {} {:?}", cmd, args);

    let mut command = Command::new(cmd);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);

    // Safety: setsid() is async-signal-safe and appropriate for use in pre_exec
    #[deny(unsafe_op_in_unsafe_fn)]
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn process '{}': {}", cmd, e);
        CoreError::ProcessSpawn(format!("Failed to spawn '{}': {}", cmd, e))
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::ProcessSpawn("Spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Spawned process {} in new process group", pid);

    Ok(ChildProcess { pid, child })
}

/// Probe whether a pid names an existing process (`kill(pid, 0)`)
///
/// `EPERM` means the process exists but belongs to another user, so it
/// counts as alive.
pub fn process_alive(pid: u32) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };
    match kill(pid, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            debug!("Liveness probe for {} failed: {}", pid, e);
            false
        }
    }
}

/// Resolve the process group of a pid, `None` if the process is gone
pub fn process_group_of(pid: u32) -> Result<Option<u32>> {
    let Some(pid) = to_pid(pid) else {
        return Ok(None);
    };
    match getpgid(Some(pid)) {
        Ok(pgid) => Ok(Some(pgid.as_raw() as u32)),
        Err(Errno::ESRCH) => {
            debug!("Process {} not found while resolving its group", pid);
            Ok(None)
        }
        Err(e) => Err(CoreError::ProcessSignal(format!(
            "Failed to resolve process group of {}: {}",
            pid, e
        ))),
    }
}

/// Send a signal to every process in a group
pub fn signal_group(pgid: u32, signal: GroupSignal) -> Result<SignalDelivery> {
    let Some(group) = to_pid(pgid) else {
        return Ok(SignalDelivery::NoSuchProcess);
    };
    debug!("Sending {} to process group {}", signal, group);

    match killpg(group, signal.as_nix()) {
        Ok(()) => {
            debug!("Sent {} to process group {}", signal, group);
            Ok(SignalDelivery::Delivered)
        }
        Err(Errno::ESRCH) => {
            debug!("Process group {} already exited", group);
            Ok(SignalDelivery::NoSuchProcess)
        }
        Err(e) => {
            error!("Failed to send {} to process group {}: {}", signal, group, e);
            Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to process group {}: {}",
                signal, group, e
            )))
        }
    }
}

/// Send SIGTERM to the process group of a spawned child
pub fn signal_term_group(child: &ChildProcess) -> Result<SignalDelivery> {
    signal_group(child.pgid(), GroupSignal::Terminate)
}

/// Send SIGKILL to the process group of a spawned child
pub fn signal_kill_group(child: &ChildProcess) -> Result<SignalDelivery> {
    signal_group(child.pgid(), GroupSignal::Kill)
}

// pid 0 and negative values address groups, never a single process
fn to_pid(raw: u32) -> Option<Pid> {
    i32::try_from(raw).ok().filter(|p| *p > 0).map(Pid::from_raw)
}
