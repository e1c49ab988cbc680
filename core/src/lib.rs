//! Core functionality for kforward
//!
//! This crate keeps a `kubectl port-forward` running (or stopped) across
//! independent, run-to-completion invocations. The only state shared between
//! invocations is a pid file; see [`supervisor`] for the reconciliation rules.

pub mod config;
pub mod error;
pub mod pidfile;
#[cfg(unix)]
pub mod process;
#[cfg(unix)]
pub mod supervisor;


// Re-export schema types for convenience
pub use schema::*;

pub use error::{CoreError, Result};
#[cfg(unix)]
pub use supervisor::{ForwardSupervisor, Reconciliation, SupervisorConfig};

/// Core utilities and helper functions
pub mod utils {
    use tracing::debug;

    /// Initialize tracing for the application
    ///
    /// `RUST_LOG` wins over `level` when set. Output goes to stderr so stdout
    /// stays free for the result document.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        debug!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
