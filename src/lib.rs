//! ttlfw - Time-limited firewall rules
//!
//! Applies rules to an external packet-filter control program (`ufw` by default)
//! with a time-to-live, and sweeps them away once they expire. The sweep is meant
//! to run from a scheduler such as cron.
//!
//! # Architecture
//!
//! - [`core`] - Rule lifecycle: ledger, process lock, enforcer executor, sweeper, adder
//! - [`audit`] - Audit logging for every privileged enforcer mutation
//! - [`validators`] - Input validation for rule text and positions
//! - [`config`] - Configuration file loading and overrides
//! - [`elevation`] - Privilege escalation for the enforcer command
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Safety Features
//!
//! - Every enforcer mutation is validated with `--dry-run` before it is committed
//! - The rules ledger is only ever replaced atomically (temp file → rename)
//! - A PID lock keeps concurrent sweeps apart and heals itself when stale
//! - External commands are bounded by a timeout

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::ledger::{Expiry, Ledger, MatchPolicy, RuleRecord};

/// Default location of the rules ledger, overridable at build time by packagers.
pub const SYSTEM_LEDGER_PATH: &str = match option_env!("TTLFW_SYSTEM_LEDGER_PATH") {
    Some(path) => path,
    None => "/usr/local/share/ttlfw/rules",
};

/// Default location of the sweep PID lock, overridable at build time by packagers.
pub const SYSTEM_LOCK_PATH: &str = match option_env!("TTLFW_SYSTEM_LOCK_PATH") {
    Some(path) => path,
    None => "/run/ttlfw.pid",
};
