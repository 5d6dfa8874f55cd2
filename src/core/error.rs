use std::path::PathBuf;
use thiserror::Error;

/// Core error types for ttlfw
#[derive(Debug, Error)]
pub enum Error {
    /// The TTL expression could not be turned into an expiration instant
    #[error("unable to resolve TTL '{expression}': {reason}")]
    UnresolvableTtl { expression: String, reason: String },

    /// The rules ledger exists but could not be read or parsed
    #[error("unable to read from the rules file {}: {reason}", .path.display())]
    LedgerUnreadable { path: PathBuf, reason: String },

    /// Writing the rules ledger failed; the previous contents are intact
    #[error("unable to write to the rules file {}: {source}", .path.display())]
    LedgerWriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The enforcer rejected a command in either the dry-run or the commit phase
    #[error("{command}: {}", one_line(.output))]
    FirewallCommandFailed {
        command: String,
        output: String,
        exit_code: Option<i32>,
    },

    /// Another live sweep owns the lock
    #[error("already running (pid {pid})")]
    LockHeld { pid: i32 },

    /// The lock file was left behind by a process that is gone
    #[error(
        "lock file {} is held by '{owner}' but that process is not running; lock removed, will run on the next invocation",
        .path.display()
    )]
    LockStale { path: PathBuf, owner: String },

    /// Rule text violates the ledger invariants
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// Insertion position out of range
    #[error("invalid position {0}: positions start at 1")]
    InvalidPosition(u32),

    /// Configuration file could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// Privilege escalation failed
    #[error("elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Collapses multi-line enforcer output into a single diagnostic line.
fn one_line(output: &str) -> String {
    let joined = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    if joined.is_empty() {
        "no output".to_string()
    } else {
        joined
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of ufw error patterns and their translations
pub struct UfwErrorPattern;

impl UfwErrorPattern {
    /// Matches enforcer output against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("you need to be root")
            || lower.contains("permission denied")
            || lower.contains("operation not permitted")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run ttlfw as root (cron jobs usually do)")
                .with_suggestion("Or set TTLFW_ELEVATION_METHOD=sudo for sudoers NOPASSWD setups");
        }

        // Missing enforcer binary
        if lower.contains("failed to spawn")
            || lower.contains("no such file")
            || lower.contains("command not found")
        {
            return ErrorTranslation::new("The firewall program is not installed or not in PATH")
                .with_suggestion("Install ufw: sudo apt install ufw  (Debian/Ubuntu)")
                .with_suggestion("Or point firewall_command in the config at the right binary");
        }

        // Inserting into an empty rule set
        if lower.contains("invalid position") {
            return ErrorTranslation::new("Rule position is outside the current rule set")
                .with_suggestion("Check the numbered rules: sudo ufw status numbered")
                .with_suggestion("Position 1 on an empty rule set falls back to a plain append");
        }

        // Deleting something ufw doesn't know about
        if lower.contains("non-existent rule") {
            return ErrorTranslation::new("The rule is no longer present in the firewall")
                .with_suggestion("It may have been removed by hand: sudo ufw status")
                .with_suggestion("The ledger entry stays and is retried on the next sweep");
        }

        // Syntax errors
        if lower.contains("invalid syntax") || lower.contains("wrong number of arguments") {
            return ErrorTranslation::new("Invalid firewall rule syntax")
                .with_suggestion("Rule text is passed to ufw verbatim, e.g. 'allow from 10.0.0.1'")
                .with_suggestion("Try the rule by hand first: sudo ufw --dry-run <rule>");
        }

        if lower.contains("bad port") || lower.contains("bad destination port") {
            return ErrorTranslation::new("Invalid port in firewall rule")
                .with_suggestion("Port numbers must be between 1 and 65535");
        }

        if lower.contains("could not find a profile") {
            return ErrorTranslation::new("Unknown application profile")
                .with_suggestion("List known profiles: sudo ufw app list");
        }

        // Firewall disabled / backend problems
        if lower.contains("problem running") || lower.contains("iptables") {
            return ErrorTranslation::new("The firewall backend failed to apply the rule")
                .with_suggestion("Check the backend state: sudo ufw status verbose")
                .with_suggestion("Look for conflicting firewall managers: systemctl status firewalld");
        }

        // Timeout errors
        if lower.contains("timed out") {
            return ErrorTranslation::new("Firewall command timed out")
                .with_suggestion("Another process may be holding the xtables lock")
                .with_suggestion("Raise command_timeout_secs in the config if the host is slow");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {}", one_line(msg)))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify ufw is working: sudo ufw status")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
