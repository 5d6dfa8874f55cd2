//! Privilege elevation for enforcer commands
//!
//! ufw refuses to run without root. Scheduled sweeps normally run as root and
//! execute the enforcer directly; an operator adding a rule from a normal shell
//! gets the command wrapped in an elevation helper.
//!
//! # Elevation Strategy
//!
//! - **Root**: run the program directly
//! - **Preferred**: `run0` when available (systemd v256+, no SUID)
//! - **Terminal fallback**: `sudo`
//!
//! # Environment Variables
//!
//! - `TTLFW_ELEVATION_METHOD`: Force a specific method (`sudo`, `run0`, `pkexec`, or
//!   `none`). Useful with sudoers NOPASSWD rules.
//! - `TTLFW_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! - Arguments are passed as argv, never through a shell
//! - Helper binaries are checked for availability before use

use std::io;
use tokio::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `TTLFW_ELEVATION_METHOD`
    #[error("Invalid TTLFW_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec, none")]
    InvalidMethod(String),

    /// Not root, no run0, and no terminal to prompt on
    #[error("Root privileges required: run as root or set TTLFW_ELEVATION_METHOD")]
    NoInteractiveElevation,

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped(helper: &str, program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(helper);
    cmd.arg(program).args(args);
    cmd
}

fn direct(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Builds a command that runs `program` with root privileges.
///
/// # Errors
///
/// Returns `Err` if the forced method is unknown or missing, or if no
/// non-interactive route to root exists.
pub fn create_elevated_command(program: &str, args: &[&str]) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    // 1. Strict Test Mode Override (Highest Priority)
    if std::env::var("TTLFW_TEST_NO_ELEVATION").is_ok() {
        return Ok(direct(program, args));
    }

    // 2. Explicit elevation method override
    if let Ok(method) = std::env::var("TTLFW_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "none" => Ok(direct(program, args)),
                "sudo" | "run0" | "pkexec" => {
                    if !binary_exists(&method) {
                        return Err(ElevationError::MethodNotAvailable(method));
                    }
                    Ok(wrapped(&method, program, args))
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 3. Direct Root Execution (cron, systemd timers)
    if nix::unistd::getuid().is_root() {
        return Ok(direct(program, args));
    }

    // 4. Automatic detection
    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if is_atty && binary_exists("sudo") {
        Ok(wrapped("sudo", program, args))
    } else {
        Err(ElevationError::NoInteractiveElevation)
    }
}
