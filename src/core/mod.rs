//! Core rule lifecycle functionality
//!
//! This module contains the types and logic for time-limited firewall rules.
//! It provides:
//!
//! - [`ledger`]: The on-disk rules ledger (load, upsert, atomic commit, partition)
//! - [`lock`]: PID-file mutual exclusion between sweeps
//! - [`executor`]: Two-phase (dry-run, then commit) enforcer invocations
//! - [`ttl`]: Resolution of TTL expressions into expiration instants
//! - [`sweep`]: The expiration sweep
//! - [`add`]: The insert path
//! - [`error`]: Error types for rule lifecycle operations

pub mod add;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod lock;
pub mod sweep;
pub mod ttl;

#[cfg(test)]
pub mod test_helpers;
