//! Schema definitions for kforward
//!
//! This crate contains the data structures shared between the supervisor
//! core and the command-line entry point: the forward descriptor received
//! from the caller and the result document handed back. All types here
//! implement JSON Schema generation for external consumption.

pub mod forward;
pub mod report;


pub use forward::*;
pub use report::*;
