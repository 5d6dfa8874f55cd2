//! PID-file lock between concurrent sweeps
//!
//! The lock file holds the decimal PID of the sweep that owns it. The PID is
//! written to a temporary file first and linked into place without replacing an
//! existing lock, so two sweeps racing for an absent lock cannot both win and
//! the lock is never visible without its owner.
//! Recovering a stale lock is still check-then-act: the owner is checked, and if it
//! is gone the caller removes the file and leaves the sweep to the next run. This
//! is a cooperative, best-effort lock sized for cron-style invocation.

use crate::core::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Answers whether a PID belongs to a running instance of this program.
pub trait ProcessLiveness {
    fn is_running(&self, pid: i32) -> bool;
}

/// Checks liveness with `kill(pid, 0)` and identity with `/proc/<pid>/cmdline`.
#[derive(Debug, Clone)]
pub struct ProcfsLiveness {
    identity: String,
}

impl ProcfsLiveness {
    /// `identity` must appear in the owner's command line for the lock to count as held.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

impl Default for ProcfsLiveness {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

impl ProcessLiveness for ProcfsLiveness {
    fn is_running(&self, pid: i32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if pid <= 0 {
            return false;
        }

        // EPERM still means the process exists
        match kill(Pid::from_raw(pid), None) {
            Ok(()) | Err(Errno::EPERM) => {}
            Err(_) => return false,
        }

        // Without procfs there is no identity to check; liveness has to do
        if !Path::new("/proc").is_dir() {
            return true;
        }

        match fs::read(format!("/proc/{pid}/cmdline")) {
            Ok(cmdline) => String::from_utf8_lossy(&cmdline).contains(&self.identity),
            Err(_) => false,
        }
    }
}

/// The sweep's PID lock.
#[derive(Debug)]
pub struct ProcessLock<P: ProcessLiveness> {
    path: PathBuf,
    liveness: P,
    pid: i32,
}

impl<P: ProcessLiveness> ProcessLock<P> {
    pub fn new(path: impl Into<PathBuf>, liveness: P) -> Self {
        Self {
            path: path.into(),
            liveness,
            pid: nix::unistd::getpid().as_raw(),
        }
    }

    /// Overrides the PID written on acquisition.
    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the lock for this process.
    ///
    /// # Errors
    ///
    /// - [`Error::LockHeld`] if a running instance owns the lock
    /// - [`Error::LockStale`] if the recorded owner is gone or unreadable; the
    ///   file is left in place for the caller to [`release`](Self::release)
    /// - [`Error::Io`] if the lock file cannot be created
    pub fn acquire(&self) -> Result<LockGuard> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        // The PID is written before the file gets its name, so a competing
        // sweep never reads an empty lock
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(self.pid.to_string().as_bytes())?;
        staged.as_file().sync_all()?;

        match staged.persist_noclobber(&self.path) {
            Ok(_) => {
                debug!("Lock {} acquired by pid {}", self.path.display(), self.pid);
                Ok(LockGuard {
                    path: self.path.clone(),
                    released: false,
                })
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(self.inspect_owner())
            }
            Err(e) => Err(Error::Io(e.error)),
        }
    }

    /// Removes the lock file. Absent is fine.
    pub fn release(&self) -> Result<()> {
        remove_lock_file(&self.path)
    }

    fn inspect_owner(&self) -> Error {
        let owner = fs::read_to_string(&self.path)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        match owner.parse::<i32>() {
            Ok(pid) if self.liveness.is_running(pid) => {
                info!("Sweep already running as pid {pid}");
                Error::LockHeld { pid }
            }
            _ => {
                warn!(
                    "Lock {} found but owner '{owner}' is not running",
                    self.path.display()
                );
                Error::LockStale {
                    path: self.path.clone(),
                    owner,
                }
            }
        }
    }
}

/// Releases the lock when dropped, so every exit path gives it back.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Releases explicitly, surfacing any removal error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_lock_file(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = remove_lock_file(&self.path)
        {
            warn!("Failed to release lock {}: {e}", self.path.display());
        }
    }
}

fn remove_lock_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Lock {} released", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
