//! Result documents returned to the caller
//!
//! A successful reconciliation produces a [`ForwardReport`]; an unrecoverable
//! failure produces a [`FailureReport`]. [`ModuleOutput`] wraps either and
//! serializes without a tag, so callers see exactly one of the two shapes.

use crate::ForwardSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Outcome of a successful reconciliation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ForwardReport {
    /// Whether a process was spawned or terminated
    pub changed: bool,
    /// Pid of the active forward, if any
    pub pid: Option<u32>,
    /// Echo of the requested local port
    pub local_port: u16,
    /// Echo of the requested remote port
    pub remote_port: u16,
}

impl ForwardReport {
    /// Unchanged report with no pid for the given forward
    pub fn unchanged(spec: &ForwardSpec) -> Self {
        Self {
            changed: false,
            pid: None,
            local_port: spec.local_port,
            remote_port: spec.remote_port,
        }
    }
}

/// Outcome of a failed reconciliation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct FailureReport {
    /// Always `true`
    pub failed: bool,
    /// Always `false`; nothing is left changed after a failure
    pub changed: bool,
    /// Human-readable diagnostic
    pub msg: String,
    /// Echo of the requested local port, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    /// Echo of the requested remote port, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

impl FailureReport {
    /// Failure not tied to a particular forward (e.g. unusable arguments)
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            failed: true,
            changed: false,
            msg: msg.into(),
            local_port: None,
            remote_port: None,
        }
    }

    /// Failure while reconciling the given forward
    pub fn for_forward(spec: &ForwardSpec, msg: impl Into<String>) -> Self {
        Self {
            local_port: Some(spec.local_port),
            remote_port: Some(spec.remote_port),
            ..Self::new(msg)
        }
    }
}

/// Either result document
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum ModuleOutput {
    /// Failure document. Listed first so `failed` discriminates on input.
    Failure(FailureReport),
    /// Success document
    Success(ForwardReport),
}

impl ModuleOutput {
    /// Whether this output signals failure to the caller
    pub fn is_failure(&self) -> bool {
        matches!(self, ModuleOutput::Failure(_))
    }
}

impl From<ForwardReport> for ModuleOutput {
    fn from(report: ForwardReport) -> Self {
        ModuleOutput::Success(report)
    }
}

impl From<FailureReport> for ModuleOutput {
    fn from(report: FailureReport) -> Self {
        ModuleOutput::Failure(report)
    }
}
