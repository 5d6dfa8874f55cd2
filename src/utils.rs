//! Utility functions for directory management and system integration
//!
//! The ledger and lock live at fixed system paths (see [`crate::SYSTEM_LEDGER_PATH`]).
//! Per-user files follow the XDG Base Directory specification:
//!
//! - Config: `~/.config/ttlfw/config.json`
//! - State: `~/.local/state/ttlfw/` - audit log

use chrono::{DateTime, Local};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "ttlfw", "ttlfw")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(Path::to_path_buf))
}

/// Creates `dir` and its parents; new directories get `mode` on Unix.
pub fn ensure_dir(dir: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        DirBuilder::new().mode(mode).recursive(true).create(dir)
    }

    #[cfg(not(unix))]
    {
        let _ = mode;
        std::fs::create_dir_all(dir)
    }
}

pub fn is_root() -> bool {
    nix::unistd::getuid().is_root()
}

/// Formats an instant the way `status` shows it.
pub fn format_local(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
