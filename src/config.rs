//! Configuration file loading
//!
//! The config is an optional JSON file; every field has a default, so an empty
//! object (or no file at all) is a valid configuration. Search order:
//!
//! 1. `--config <PATH>` on the command line
//! 2. `TTLFW_CONFIG`
//! 3. `/etc/ttlfw/config.json`
//! 4. `~/.config/ttlfw/config.json`
//!
//! An explicitly named file must exist. `TTLFW_FIREWALL_COMMAND` overrides
//! `firewall_command` after loading.

use crate::core::error::{Error, Result};
use crate::core::ledger::MatchPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/ttlfw/config.json";

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
    /// Enforcer program followed by fixed leading arguments
    #[serde(default = "default_firewall_command")]
    pub firewall_command: Vec<String>,
    /// Wrap the enforcer in sudo/run0 when not running as root
    #[serde(default = "default_true")]
    pub elevate: bool,
    /// Upper bound for each enforcer invocation (clamped to 1..=3600)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub match_policy: MatchPolicy,
    #[serde(default = "default_position")]
    pub default_position: u32,
    #[serde(default = "default_ttl")]
    pub default_ttl: String,
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    /// Defaults to `audit.log` in the XDG state directory
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,
    /// Must appear in a lock owner's command line for the lock to count as held
    #[serde(default = "default_lock_identity")]
    pub lock_identity: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            lock_path: default_lock_path(),
            firewall_command: default_firewall_command(),
            elevate: true,
            command_timeout_secs: default_command_timeout(),
            match_policy: MatchPolicy::default(),
            default_position: default_position(),
            default_ttl: default_ttl(),
            audit_enabled: true,
            audit_log_path: None,
            lock_identity: default_lock_identity(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(crate::SYSTEM_LEDGER_PATH)
}

fn default_lock_path() -> PathBuf {
    PathBuf::from(crate::SYSTEM_LOCK_PATH)
}

fn default_firewall_command() -> Vec<String> {
    vec!["ufw".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    30
}

fn default_position() -> u32 {
    1
}

fn default_ttl() -> String {
    "30 days".to_string()
}

fn default_lock_identity() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

impl AppConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.clamp(1, 3600))
    }

    pub fn audit_log_path(&self) -> Option<PathBuf> {
        self.audit_log_path
            .clone()
            .or_else(|| crate::utils::get_state_dir().map(|dir| dir.join("audit.log")))
    }

    /// Applies environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        if let Ok(command) = std::env::var("TTLFW_FIREWALL_COMMAND") {
            let command: Vec<String> = command.split_whitespace().map(String::from).collect();
            if !command.is_empty() {
                self.firewall_command = command;
            }
        }
    }
}

/// Parses a config file. Unknown fields are ignored.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&json).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Candidate config locations, highest priority first.
pub fn config_search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    if let Ok(path) = std::env::var("TTLFW_CONFIG")
        && !path.is_empty()
    {
        return vec![PathBuf::from(path)];
    }

    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
    if let Some(dir) = crate::utils::get_config_dir() {
        paths.push(dir.join("config.json"));
    }
    paths
}

/// Loads the first config found, or defaults when none exists.
///
/// # Errors
///
/// Returns `Error::Config` if an explicit file is missing or any found file is malformed.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let explicit_given =
        explicit.is_some() || std::env::var("TTLFW_CONFIG").is_ok_and(|p| !p.is_empty());

    let mut config = None;
    for path in config_search_paths(explicit) {
        if explicit_given || path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            config = Some(load_config_from(&path)?);
            break;
        }
    }

    let mut config = config.unwrap_or_default();
    config.apply_env();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    #[test]
    fn test_empty_object_is_default() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.firewall_command, vec!["ufw"]);
        assert_eq!(config.default_ttl, "30 days");
        assert_eq!(config.default_position, 1);
        assert_eq!(config.match_policy, MatchPolicy::Substring);
    }

    #[test]
    fn test_partial_config() {
        let config: AppConfig = serde_json::from_str(
            r#"{"ledger_path": "/var/lib/ttlfw/rules", "match_policy": "exact", "command_timeout_secs": 0}"#,
        )
        .unwrap();
        assert_eq!(config.ledger_path, PathBuf::from("/var/lib/ttlfw/rules"));
        assert_eq!(config.match_policy, MatchPolicy::Exact);
        assert_eq!(config.command_timeout(), Duration::from_secs(1));
        assert!(config.audit_enabled);
    }

    #[test]
    fn test_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"lock_path": "/tmp/ttlfw-test.pid"}"#).unwrap();

        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.lock_path, PathBuf::from("/tmp/ttlfw-test.pid"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        let result = load_config(Some(Path::new("/nonexistent/ttlfw/config.json")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_firewall_command_env_override() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("TTLFW_FIREWALL_COMMAND", "/usr/sbin/ufw --force");
        }

        let mut config = AppConfig::default();
        config.apply_env();

        unsafe {
            std::env::remove_var("TTLFW_FIREWALL_COMMAND");
        }
        assert_eq!(config.firewall_command, vec!["/usr/sbin/ufw", "--force"]);
    }
}
