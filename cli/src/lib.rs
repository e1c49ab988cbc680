//! Command-line surface for kforward
//!
//! Turns flags and/or an arguments file into a forward descriptor, runs one
//! reconciliation, and produces the result document.

#![allow(unused_crate_dependencies)]

pub mod error;

pub use error::{CliError, Result};

use clap::{Parser, ValueEnum};
use kforward_core::config::{load_forward_args_from_path, validate_spec};
use kforward_core::ForwardSupervisor;
use schema::{
    default_kubectl, default_timeout_secs, DesiredState, FailureReport, ForwardArgs, ForwardSpec,
    ModuleOutput,
};
use std::path::PathBuf;
use tracing::{debug, error};

/// Keep a `kubectl port-forward` running in the background, tracked by a pid file
#[derive(Parser, Debug, Clone)]
#[command(name = "kforward")]
#[command(version)]
pub struct Cli {
    /// Arguments file (JSON, or TOML with a .toml extension). Flags given
    /// alongside it override its fields.
    #[arg(long, value_name = "FILE")]
    pub args_file: Option<PathBuf>,

    /// Namespace of the target pod
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,

    /// Name of the target pod
    #[arg(long)]
    pub pod: Option<String>,

    /// Local port to listen on
    #[arg(long)]
    pub local_port: Option<u16>,

    /// Pod port to forward to
    #[arg(long)]
    pub remote_port: Option<u16>,

    /// Desired state [default: started]
    #[arg(long, value_enum)]
    pub state: Option<StateArg>,

    /// Startup timeout in seconds [default: 300]
    #[arg(long)]
    pub timeout: Option<u64>,

    /// File recording the pid of the forward
    #[arg(long, value_name = "FILE")]
    pub pid_file: Option<PathBuf>,

    /// Forwarding binary [default: kubectl]
    #[arg(long, env = "KFORWARD_KUBECTL")]
    pub kubectl: Option<String>,

    /// Report what would happen without spawning, killing, or writing anything
    #[arg(long)]
    pub check: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Print the JSON Schema of the arguments file and exit
    #[arg(long)]
    pub print_schema: bool,
}

/// `--state` values
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateArg {
    /// Forward should be running
    Started,
    /// Forward should not be running
    Stopped,
}

impl From<StateArg> for DesiredState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::Started => DesiredState::Started,
            StateArg::Stopped => DesiredState::Stopped,
        }
    }
}

/// A fully resolved request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Forward descriptor
    pub spec: ForwardSpec,
    /// Whether to run without side effects
    pub dry_run: bool,
}

/// Merge the arguments file (if any) with the flags and validate the result
pub fn resolve_invocation(cli: &Cli) -> Result<Invocation> {
    let (spec, file_dry_run) = match &cli.args_file {
        Some(path) => {
            let args = load_forward_args_from_path(path)?;
            debug!("Loaded arguments from {}", path.display());
            let mut spec = args.spec;
            apply_overrides(&mut spec, cli);
            (spec, args.check_mode)
        }
        None => (spec_from_flags(cli)?, false),
    };
    validate_spec(&spec)?;

    Ok(Invocation {
        spec,
        dry_run: cli.check || file_dry_run,
    })
}

fn apply_overrides(spec: &mut ForwardSpec, cli: &Cli) {
    if let Some(namespace) = &cli.namespace {
        spec.namespace = namespace.clone();
    }
    if let Some(pod) = &cli.pod {
        spec.pod = pod.clone();
    }
    if let Some(port) = cli.local_port {
        spec.local_port = port;
    }
    if let Some(port) = cli.remote_port {
        spec.remote_port = port;
    }
    if let Some(state) = cli.state {
        spec.state = state.into();
    }
    if let Some(timeout) = cli.timeout {
        spec.timeout = timeout;
    }
    if let Some(pid_file) = &cli.pid_file {
        spec.pid_file = pid_file.clone();
    }
    if let Some(kubectl) = &cli.kubectl {
        spec.kubectl = kubectl.clone();
    }
}

fn spec_from_flags(cli: &Cli) -> Result<ForwardSpec> {
    fn required<T: Clone>(value: &Option<T>, flag: &str) -> Result<T> {
        value
            .clone()
            .ok_or_else(|| CliError::InvalidArgument(format!("missing required argument {}", flag)))
    }

    Ok(ForwardSpec {
        namespace: required(&cli.namespace, "--namespace")?,
        pod: required(&cli.pod, "--pod")?,
        local_port: required(&cli.local_port, "--local-port")?,
        remote_port: required(&cli.remote_port, "--remote-port")?,
        state: cli.state.map(DesiredState::from).unwrap_or_default(),
        timeout: cli.timeout.unwrap_or_else(default_timeout_secs),
        pid_file: required(&cli.pid_file, "--pid-file")?,
        kubectl: cli.kubectl.clone().unwrap_or_else(default_kubectl),
    })
}

/// JSON Schema of the arguments file
pub fn arguments_schema() -> Result<String> {
    let schema = schemars::schema_for!(ForwardArgs);
    Ok(serde_json::to_string_pretty(&schema)?)
}

/// Resolve the invocation and reconcile it against real processes
pub async fn execute(cli: &Cli) -> ModuleOutput {
    match resolve_invocation(cli) {
        Ok(invocation) => run(&ForwardSupervisor::unix(), &invocation).await,
        Err(e) => {
            error!("Rejected arguments [{}]: {}", e.code(), e);
            FailureReport::new(e.to_string()).into()
        }
    }
}

/// Reconcile one invocation with the given supervisor
pub async fn run(supervisor: &ForwardSupervisor, invocation: &Invocation) -> ModuleOutput {
    match supervisor.reconcile(&invocation.spec, invocation.dry_run).await {
        Ok(outcome) => {
            debug!("Forward left {}", outcome.state);
            outcome.report.into()
        }
        Err(e) => {
            error!("Reconciliation failed [{}]: {}", e.code(), e);
            FailureReport::for_forward(&invocation.spec, e.to_string()).into()
        }
    }
}
