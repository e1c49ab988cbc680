//! Forward descriptor and lifecycle state types
//!
//! A forward is identified by its pid file. Every invocation is handed a
//! [`ForwardSpec`] and reconciles the process recorded in that file against
//! the [`DesiredState`].
//!
//! ## Forward Lifecycle
//!
//! ```text
//! Absent → Starting → Active → Stopping → Absent
//!             ↓
//!           Failed
//! ```
//!
//! `Active → Active` (revalidation of a live forward) and `Absent → Absent`
//! (stopping a forward that is not running) are no-op self-loops.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// State the caller wants the forward to be in
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// A forwarding process should be running
    #[default]
    Started,
    /// No forwarding process should be running
    Stopped,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesiredState::Started => write!(f, "started"),
            DesiredState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Observed lifecycle state of a forward, keyed by its pid file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ForwardState {
    /// No pid file, or nothing live behind it
    Absent,
    /// Process spawned, waiting out the settle delay
    Starting,
    /// Pid file names a live forwarding process
    Active,
    /// Termination signals are being delivered
    Stopping,
    /// The spawned process exited during the settle delay
    Failed,
}

impl fmt::Display for ForwardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ForwardState::Absent => "absent",
            ForwardState::Starting => "starting",
            ForwardState::Active => "active",
            ForwardState::Stopping => "stopping",
            ForwardState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Complete description of one port-forward
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ForwardSpec {
    /// Namespace of the target pod
    pub namespace: String,

    /// Name of the target pod
    pub pod: String,

    /// Port to listen on locally
    pub local_port: u16,

    /// Port on the pod to forward to
    pub remote_port: u16,

    /// Desired state of the forward
    #[serde(default)]
    pub state: DesiredState,

    /// Startup timeout in seconds. Accepted for compatibility; the supervisor
    /// waits a fixed settle delay instead of polling up to this deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,

    /// File recording the pid of the active forwarding process
    pub pid_file: PathBuf,

    /// Forwarding binary to invoke
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
}

impl ForwardSpec {
    /// `<local>:<remote>` mapping as passed to `kubectl port-forward`
    pub fn port_mapping(&self) -> String {
        format!("{}:{}", self.local_port, self.remote_port)
    }

    /// Arguments following the binary name
    pub fn command_args(&self) -> Vec<String> {
        vec![
            "port-forward".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
            self.pod.clone(),
            self.port_mapping(),
        ]
    }

    /// Get the startup timeout as a Duration
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Default startup timeout in seconds
pub const fn default_timeout_secs() -> u64 {
    300
}

/// Default forwarding binary
pub fn default_kubectl() -> String {
    "kubectl".to_string()
}

/// Arguments document as written by a configuration-management framework
///
/// Carries the forward descriptor plus the framework's dry-run flag. Unknown
/// keys (other framework-internal settings) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ForwardArgs {
    /// Forward descriptor
    #[serde(flatten)]
    pub spec: ForwardSpec,

    /// Dry-run: report what would happen without spawning, killing, or
    /// touching the pid file
    #[serde(default, alias = "_ansible_check_mode")]
    pub check_mode: bool,
}
