//! Process adapters for abstracting process management
//!
//! The supervisor never touches the OS process table directly. Launching the
//! forwarding command goes through [`ForwardLauncher`], and liveness probes
//! and group signals go through [`ProcessTable`]. Both have a Unix
//! implementation and a mock that keeps an in-memory process table, so the
//! reconciliation logic can be tested without real processes.

use crate::process::{GroupSignal, SignalDelivery};
use crate::{CoreError, Result};
use async_trait::async_trait;
use schema::ForwardSpec;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// How a forwarding process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardExit {
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// Signal that terminated the process
    pub signal: Option<i32>,
}

impl fmt::Display for ForwardExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.exit_code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => write!(f, "killed by signal {}", sig),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

impl From<std::process::ExitStatus> for ForwardExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            exit_code: status.code(),
            signal,
        }
    }
}

/// Starts the external forwarding command
#[async_trait]
pub trait ForwardLauncher: Send + Sync {
    /// Spawn the forwarding command for `spec` as a new process-group leader
    /// with its output discarded
    async fn launch(&self, spec: &ForwardSpec) -> Result<Box<dyn ForwardProcess>>;
}

/// Handle to a freshly launched forwarding process
///
/// Only held for the settle delay; afterwards the process is tracked through
/// the pid file alone.
pub trait ForwardProcess: Send {
    /// Get the process ID
    fn pid(&self) -> u32;

    /// Exit status if the process has already exited
    fn try_wait(&mut self) -> Result<Option<ForwardExit>>;
}

/// Liveness probes and group signalling against the process table
pub trait ProcessTable: Send + Sync {
    /// Whether `pid` names an existing process
    fn is_alive(&self, pid: u32) -> bool;

    /// Process group of `pid`, `None` when the process is gone
    fn process_group(&self, pid: u32) -> Result<Option<u32>>;

    /// Signal every process in group `pgid`
    fn signal_group(&self, pgid: u32, signal: GroupSignal) -> Result<SignalDelivery>;
}

/// Launches `<program> [base_args..] port-forward -n <ns> <pod> <l>:<r>`
///
/// The program defaults to the descriptor's `kubectl` field. Tests substitute a stand-in
/// program (e.g. `sh -c '...'`) through [`CommandLauncher::with_program`].
#[cfg(unix)]
#[derive(Clone, Debug, Default)]
pub struct CommandLauncher {
    program: Option<String>,
    base_args: Vec<String>,
}

#[cfg(unix)]
impl CommandLauncher {
    /// Launcher that runs the binary named by each spec
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher that runs `program` with `base_args` ahead of the forward arguments
    pub fn with_program(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: Some(program.into()),
            base_args,
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl ForwardLauncher for CommandLauncher {
    async fn launch(&self, spec: &ForwardSpec) -> Result<Box<dyn ForwardProcess>> {
        use crate::process::unix;

        let program = self.program.as_deref().unwrap_or(&spec.kubectl);
        let mut args = self.base_args.clone();
        args.extend(spec.command_args());
        debug!("Launching forward: {} {:?}", program, args);

        let child = unix::spawn_detached(program, &args)?;
        Ok(Box::new(UnixForwardProcess { child }))
    }
}

#[cfg(unix)]
struct UnixForwardProcess {
    child: crate::process::unix::ChildProcess,
}

#[cfg(unix)]
impl ForwardProcess for UnixForwardProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn try_wait(&mut self) -> Result<Option<ForwardExit>> {
        Ok(self.child.try_wait()?.map(ForwardExit::from))
    }
}

/// Process table backed by `kill(2)`, `getpgid(2)` and `killpg(2)`
#[cfg(unix)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixProcessTable;

#[cfg(unix)]
impl UnixProcessTable {
    /// Create a new Unix process table
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl ProcessTable for UnixProcessTable {
    fn is_alive(&self, pid: u32) -> bool {
        crate::process::unix::process_alive(pid)
    }

    fn process_group(&self, pid: u32) -> Result<Option<u32>> {
        crate::process::unix::process_group_of(pid)
    }

    fn signal_group(&self, pgid: u32, signal: GroupSignal) -> Result<SignalDelivery> {
        crate::process::unix::signal_group(pgid, signal)
    }
}

/// A process known to the mock table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockProcess {
    /// Process group the process belongs to
    pub pgid: u32,
    /// Whether SIGTERM is ignored (only SIGKILL removes it)
    pub ignores_term: bool,
}

#[derive(Debug, Default)]
struct MockTableState {
    processes: HashMap<u32, MockProcess>,
    signals: Vec<(u32, GroupSignal)>,
    denied_groups: Vec<u32>,
}

/// In-memory process table for tests
///
/// Clones share state, so a [`MockLauncher`] built from a table registers the
/// processes it "spawns" in that same table.
#[derive(Debug, Clone, Default)]
pub struct MockProcessTable {
    state: Arc<Mutex<MockTableState>>,
}

impl MockProcessTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTableState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a live process leading its own group
    pub fn insert(&self, pid: u32) {
        self.insert_process(
            pid,
            MockProcess {
                pgid: pid,
                ignores_term: false,
            },
        );
    }

    /// Register a live process with explicit behaviour
    pub fn insert_process(&self, pid: u32, process: MockProcess) {
        self.lock().processes.insert(pid, process);
    }

    /// Remove a process as if it exited on its own
    pub fn remove(&self, pid: u32) {
        self.lock().processes.remove(&pid);
    }

    /// Refuse signals to `pgid` with a permission error
    pub fn deny_signals_to(&self, pgid: u32) {
        self.lock().denied_groups.push(pgid);
    }

    /// Signals delivered so far, in order
    pub fn signals(&self) -> Vec<(u32, GroupSignal)> {
        self.lock().signals.clone()
    }

    /// Number of live processes
    pub fn live_count(&self) -> usize {
        self.lock().processes.len()
    }
}

impl ProcessTable for MockProcessTable {
    fn is_alive(&self, pid: u32) -> bool {
        self.lock().processes.contains_key(&pid)
    }

    fn process_group(&self, pid: u32) -> Result<Option<u32>> {
        Ok(self.lock().processes.get(&pid).map(|p| p.pgid))
    }

    fn signal_group(&self, pgid: u32, signal: GroupSignal) -> Result<SignalDelivery> {
        let mut state = self.lock();
        if state.denied_groups.contains(&pgid) {
            return Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to process group {}: EPERM: Operation not permitted",
                signal, pgid
            )));
        }
        state.signals.push((pgid, signal));

        let members: Vec<u32> = state
            .processes
            .iter()
            .filter(|(_, p)| p.pgid == pgid)
            .map(|(pid, _)| *pid)
            .collect();
        if members.is_empty() {
            return Ok(SignalDelivery::NoSuchProcess);
        }
        for pid in members {
            let ignores = state.processes[&pid].ignores_term;
            if signal == GroupSignal::Kill || !ignores {
                debug!("Mock process {} exits on {}", pid, signal);
                state.processes.remove(&pid);
            }
        }
        Ok(SignalDelivery::Delivered)
    }
}

/// Instructions for the next mock launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockInstruction {
    /// Process keeps running
    Runs {
        /// Whether the process ignores SIGTERM
        ignores_term: bool,
    },
    /// Process exits right after starting
    ExitsImmediately {
        /// Exit code reported
        exit_code: i32,
    },
    /// The binary cannot be executed at all
    SpawnFails,
    /// Process keeps running but its status cannot be collected
    WaitFails,
}

impl Default for MockInstruction {
    fn default() -> Self {
        MockInstruction::Runs { ignores_term: false }
    }
}

/// Mock launcher for testing
#[derive(Debug, Clone)]
pub struct MockLauncher {
    table: MockProcessTable,
    instructions: Arc<Mutex<VecDeque<MockInstruction>>>,
    launched: Arc<Mutex<Vec<(u32, Vec<String>)>>>,
    next_pid: Arc<AtomicU32>,
}

impl MockLauncher {
    /// Launcher registering its processes in `table`
    pub fn new(table: MockProcessTable) -> Self {
        Self {
            table,
            instructions: Arc::new(Mutex::new(VecDeque::new())),
            launched: Arc::new(Mutex::new(Vec::new())),
            next_pid: Arc::new(AtomicU32::new(40_000)),
        }
    }

    /// Queue instructions for the next launch; launches beyond the queue
    /// use [`MockInstruction::default`]
    pub fn add_instruction(&self, instruction: MockInstruction) {
        self.instructions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(instruction);
    }

    /// Pid and argument list of each launch so far
    pub fn launched(&self) -> Vec<(u32, Vec<String>)> {
        self.launched.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl ForwardLauncher for MockLauncher {
    async fn launch(&self, spec: &ForwardSpec) -> Result<Box<dyn ForwardProcess>> {
        let instruction = self
            .instructions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_default();

        if instruction == MockInstruction::SpawnFails {
            return Err(CoreError::ProcessSpawn(format!(
                "Failed to spawn '{}': No such file or directory (os error 2)",
                spec.kubectl
            )));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        debug!("Spawning mock forward {} for {}", pid, spec.port_mapping());
        self.launched
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((pid, spec.command_args()));

        let exit = match instruction {
            MockInstruction::Runs { ignores_term } => {
                self.table.insert_process(
                    pid,
                    MockProcess {
                        pgid: pid,
                        ignores_term,
                    },
                );
                None
            }
            MockInstruction::WaitFails => {
                self.table.insert(pid);
                None
            }
            MockInstruction::ExitsImmediately { exit_code } => Some(ForwardExit {
                exit_code: Some(exit_code),
                signal: None,
            }),
            MockInstruction::SpawnFails => None,
        };

        Ok(Box::new(MockForwardProcess {
            pid,
            exit,
            wait_fails: instruction == MockInstruction::WaitFails,
            table: self.table.clone(),
        }))
    }
}

struct MockForwardProcess {
    pid: u32,
    exit: Option<ForwardExit>,
    wait_fails: bool,
    table: MockProcessTable,
}

impl ForwardProcess for MockForwardProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<ForwardExit>> {
        if self.wait_fails {
            return Err(CoreError::ProcessWait(format!(
                "Failed to check status of process {}: Interrupted system call (os error 4)",
                self.pid
            )));
        }
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        if self.table.is_alive(self.pid) {
            Ok(None)
        } else {
            Ok(Some(ForwardExit {
                exit_code: None,
                signal: Some(libc::SIGKILL),
            }))
        }
    }
}
