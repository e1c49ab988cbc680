//! Process management utilities for kforward
//!
//! The forwarding command is detached into its own session so it outlives
//! the invocation that started it, and so that it and any helpers it forks
//! can be signalled as one process group by a later invocation that only
//! knows its pid.
//!
//! ## Platform Support
//!
//! - **Unix**: full support via `setsid()`, `kill(2)`, `killpg(2)` and
//!   `getpgid(2)`

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
