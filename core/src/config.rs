//! Arguments loading and validation for a forward invocation
//!
//! A configuration-management framework hands the invocation its arguments
//! as a file. This module parses that file into `schema::ForwardArgs` (JSON
//! by default, TOML when the file has a `.toml` extension), applies defaults
//! via serde, and validates with field-named error messages.

use crate::{CoreError, Result};
use schema::{ForwardArgs, ForwardSpec};
use std::fs;
use std::path::Path;

/// Load forward arguments from a file path
pub fn load_forward_args_from_path(path: impl AsRef<Path>) -> Result<ForwardArgs> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read arguments {:?}: {}", path, e))
    })?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        load_forward_args_from_toml_str(&data)
    } else {
        load_forward_args_from_json_str(&data)
    }
}

/// Load forward arguments from a JSON string
pub fn load_forward_args_from_json_str(input: &str) -> Result<ForwardArgs> {
    let args: ForwardArgs = serde_json::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("JSON parse error: {}", e)))?;
    validate_spec(&args.spec)?;
    Ok(args)
}

/// Load forward arguments from a TOML string
pub fn load_forward_args_from_toml_str(input: &str) -> Result<ForwardArgs> {
    let args: ForwardArgs = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    validate_spec(&args.spec)?;
    Ok(args)
}

/// Validate a forward descriptor
pub fn validate_spec(spec: &ForwardSpec) -> Result<()> {
    if spec.namespace.trim().is_empty() {
        return Err(CoreError::ValidationError("namespace: cannot be empty".to_string()));
    }
    if spec.pod.trim().is_empty() {
        return Err(CoreError::ValidationError("pod: cannot be empty".to_string()));
    }
    if spec.local_port == 0 {
        return Err(CoreError::ValidationError("local_port: must be 1..=65535".to_string()));
    }
    if spec.remote_port == 0 {
        return Err(CoreError::ValidationError("remote_port: must be 1..=65535".to_string()));
    }
    if spec.pid_file.as_os_str().is_empty() {
        return Err(CoreError::ValidationError("pid_file: cannot be empty".to_string()));
    }
    if spec.pid_file.file_name().is_none() {
        return Err(CoreError::ValidationError(format!(
            "pid_file: {} does not name a file",
            spec.pid_file.display()
        )));
    }
    if spec.kubectl.trim().is_empty() {
        return Err(CoreError::ValidationError("kubectl: cannot be empty".to_string()));
    }
    Ok(())
}
