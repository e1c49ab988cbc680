//! Forward supervisor implementation
//!
//! Reconciles the process recorded in a pid file with the desired state of a
//! forward. Each call runs to completion; nothing is kept in memory between
//! calls, so the pid file plus the OS process table are the whole state:
//!
//! ```text
//! Absent → Starting → Active → Stopping → Absent
//!             ↓
//!           Failed
//! ```
//!
//! ## Components
//!
//! - [`ForwardSupervisor`]: the reconciliation entry point
//! - [`ForwardLauncher`]: capability to start the forwarding command
//! - [`ProcessTable`]: capability to probe and signal processes
//!
//! Two invocations racing on the same pid file are not serialised; both may
//! pass the staleness check and spawn.

use crate::process::{GroupSignal, SignalDelivery};
use crate::{pidfile, CoreError, Result};
use schema::{DesiredState, ForwardReport, ForwardSpec, ForwardState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod adapters;

#[cfg(test)]
mod reconcile_tests;

pub use adapters::*;

/// Wait after spawning before deciding whether the forward survived
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Wait between SIGTERM and SIGKILL when stopping
pub const DEFAULT_ESCALATION_DELAY: Duration = Duration::from_secs(1);

/// Timing knobs for the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Delay between spawn and the survival check
    pub settle_delay: Duration,
    /// Delay between the graceful and the forced group signal
    pub escalation_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            escalation_delay: DEFAULT_ESCALATION_DELAY,
        }
    }
}

/// Result of one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Document handed back to the caller
    pub report: ForwardReport,
    /// State the forward was left in (or, under dry-run, found in)
    pub state: ForwardState,
}

/// Drives a forward towards its desired state
#[derive(Clone)]
pub struct ForwardSupervisor {
    launcher: Arc<dyn ForwardLauncher>,
    table: Arc<dyn ProcessTable>,
    config: SupervisorConfig,
}

impl std::fmt::Debug for ForwardSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardSupervisor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ForwardSupervisor {
    /// Create a supervisor over the given capabilities
    pub fn new(
        launcher: Arc<dyn ForwardLauncher>,
        table: Arc<dyn ProcessTable>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            launcher,
            table,
            config,
        }
    }

    /// Supervisor acting on real processes with the default delays
    #[cfg(unix)]
    pub fn unix() -> Self {
        Self::new(
            Arc::new(CommandLauncher::new()),
            Arc::new(UnixProcessTable::new()),
            SupervisorConfig::default(),
        )
    }

    /// Timing in effect
    pub fn config(&self) -> SupervisorConfig {
        self.config
    }

    /// Reconcile the forward described by `spec` with its desired state.
    ///
    /// With `dry_run` set nothing is spawned, signalled, written, or
    /// removed. A live forward is still reported, and a stop that would
    /// signal a live group reports `changed`.
    pub async fn reconcile(&self, spec: &ForwardSpec, dry_run: bool) -> Result<Reconciliation> {
        info!(
            "Reconciling forward {}/{} {} -> {} (pid file {}, dry_run={})",
            spec.namespace,
            spec.pod,
            spec.port_mapping(),
            spec.state,
            spec.pid_file.display(),
            dry_run
        );
        match spec.state {
            DesiredState::Started => self.ensure_started(spec, dry_run).await,
            DesiredState::Stopped => self.ensure_stopped(spec, dry_run).await,
        }
    }

    async fn ensure_started(&self, spec: &ForwardSpec, dry_run: bool) -> Result<Reconciliation> {
        let mut report = ForwardReport::unchanged(spec);

        match pidfile::read_pid(&spec.pid_file) {
            Ok(Some(pid)) if self.table.is_alive(pid) => {
                info!("Forward already active with pid {}", pid);
                report.pid = Some(pid);
                return Ok(Reconciliation {
                    report,
                    state: ForwardState::Active,
                });
            }
            Ok(Some(pid)) => {
                debug!("Pid file names {} which is not running", pid);
                self.discard_stale(&spec.pid_file, dry_run);
            }
            Ok(None) => {}
            Err(e) => {
                debug!("Unusable pid file: {}", e);
                self.discard_stale(&spec.pid_file, dry_run);
            }
        }

        if dry_run {
            info!("Dry run: would start {} {:?}", spec.kubectl, spec.command_args());
            return Ok(Reconciliation {
                report,
                state: ForwardState::Absent,
            });
        }

        debug!(
            "Startup timeout {:?} accepted; survival is judged after {:?}",
            spec.startup_timeout(),
            self.config.settle_delay
        );
        let mut process = self.launcher.launch(spec).await?;
        let pid = process.pid();
        debug!("Forward {} is {}", pid, ForwardState::Starting);

        tokio::time::sleep(self.config.settle_delay).await;

        let exited = match process.try_wait() {
            Ok(exited) => exited,
            Err(e) => {
                error!("Could not check forward {}: {}; stopping it", pid, e);
                self.kill_untracked(pid);
                return Err(e);
            }
        };
        if let Some(exit) = exited {
            error!(
                "Forward {} {} during the settle delay ({})",
                pid,
                ForwardState::Failed,
                exit
            );
            return Err(CoreError::ForwardDied {
                pid,
                exit: exit.to_string(),
            });
        }

        if let Err(e) = pidfile::write_pid_atomic(&spec.pid_file, pid) {
            error!("Could not record forward {}: {}; stopping it", pid, e);
            self.kill_untracked(pid);
            return Err(e);
        }

        info!("Forward started with pid {}", pid);
        report.pid = Some(pid);
        report.changed = true;
        Ok(Reconciliation {
            report,
            state: ForwardState::Active,
        })
    }

    async fn ensure_stopped(&self, spec: &ForwardSpec, dry_run: bool) -> Result<Reconciliation> {
        let mut report = ForwardReport::unchanged(spec);
        let absent = |report| Reconciliation {
            report,
            state: ForwardState::Absent,
        };

        let pid = match pidfile::read_pid(&spec.pid_file) {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                debug!("No pid file at {}; nothing to stop", spec.pid_file.display());
                return Ok(absent(report));
            }
            Err(e) => {
                warn!("Unusable pid file, treating as nothing to stop: {}", e);
                self.discard_stale(&spec.pid_file, dry_run);
                return Ok(absent(report));
            }
        };

        let group = self.table.process_group(pid)?;

        if dry_run {
            let state = match group {
                Some(pgid) => {
                    info!("Dry run: would stop process group {} of forward {}", pgid, pid);
                    report.changed = true;
                    ForwardState::Active
                }
                None => ForwardState::Absent,
            };
            return Ok(Reconciliation { report, state });
        }

        match group {
            Some(pgid) => {
                debug!("Forward {} is {}", pid, ForwardState::Stopping);
                report.changed = self.terminate_group(pgid).await?;
            }
            None => debug!("Forward {} already exited", pid),
        }

        pidfile::discard_pid_file(&spec.pid_file);
        if report.changed {
            info!("Forward {} stopped", pid);
        }
        Ok(absent(report))
    }

    /// SIGTERM the group, wait, then SIGKILL it. Returns whether the group
    /// was still there to receive the graceful signal.
    async fn terminate_group(&self, pgid: u32) -> Result<bool> {
        match self.table.signal_group(pgid, GroupSignal::Terminate)? {
            SignalDelivery::NoSuchProcess => {
                debug!("Process group {} vanished before SIGTERM", pgid);
                return Ok(false);
            }
            SignalDelivery::Delivered => {}
        }

        tokio::time::sleep(self.config.escalation_delay).await;

        match self.table.signal_group(pgid, GroupSignal::Kill)? {
            SignalDelivery::Delivered => debug!("Sent SIGKILL to process group {}", pgid),
            SignalDelivery::NoSuchProcess => {
                debug!("Process group {} exited after SIGTERM", pgid)
            }
        }
        Ok(true)
    }

    /// SIGKILL a freshly spawned group that will not be tracked by a pid file
    fn kill_untracked(&self, pgid: u32) {
        if let Err(e) = self.table.signal_group(pgid, GroupSignal::Kill) {
            warn!("Failed to stop unrecorded forward {}: {}", pgid, e);
        }
    }

    fn discard_stale(&self, path: &Path, dry_run: bool) {
        if dry_run {
            debug!("Dry run: leaving stale pid file {}", path.display());
            return;
        }
        info!("Removing stale pid file {}", path.display());
        pidfile::discard_pid_file(path);
    }
}
