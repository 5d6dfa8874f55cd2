//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::error::{Error, Result};
use crate::core::executor::{Enforcer, FirewallExecutor, InsertOutcome};
use crate::core::ledger::{Expiry, Ledger, RuleRecord};
use crate::core::lock::ProcessLiveness;
use crate::core::ttl::TtlResolver;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("TTLFW_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("TTLFW_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Builds a record, panicking on invalid input.
pub fn record(secs: f64, rule_text: &str) -> RuleRecord {
    RuleRecord::new(rule_text, Expiry::from_secs(secs).unwrap()).unwrap()
}

/// A ledger path inside a fresh temporary directory. The file does not exist yet.
///
/// Keep the `TempDir` alive for the duration of the test.
pub fn scratch_ledger() -> (TempDir, Ledger) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::new(dir.path().join("rules"));
    (dir, ledger)
}

/// Liveness check with a fixed set of live PIDs.
#[derive(Debug, Clone, Default)]
pub struct FakeLiveness {
    alive: Vec<i32>,
}

impl FakeLiveness {
    pub fn alive(pids: &[i32]) -> Self {
        Self {
            alive: pids.to_vec(),
        }
    }
}

impl ProcessLiveness for FakeLiveness {
    fn is_running(&self, pid: i32) -> bool {
        self.alive.contains(&pid)
    }
}

/// Resolver that ignores the expression and returns a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver(pub f64);

impl TtlResolver for FixedResolver {
    fn resolve(&self, _expression: &str, _now: DateTime<Local>) -> Result<Expiry> {
        Ok(Expiry::from_secs(self.0).unwrap())
    }
}

/// In-memory enforcer that records calls and rejects chosen rules.
#[derive(Debug, Default)]
pub struct FakeEnforcer {
    failing: Vec<String>,
    inserted: Mutex<Vec<(u32, String)>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeEnforcer {
    /// Makes every insert and delete of `rule_text` fail.
    pub fn failing_on(mut self, rule_text: &str) -> Self {
        self.failing.push(rule_text.to_string());
        self
    }

    pub fn inserted(&self) -> Vec<(u32, String)> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn check(&self, command: String, rule_text: &str, output: &str) -> Result<()> {
        if self.failing.iter().any(|r| r == rule_text) {
            return Err(Error::FirewallCommandFailed {
                command,
                output: output.to_string(),
                exit_code: Some(1),
            });
        }
        Ok(())
    }
}

impl Enforcer for FakeEnforcer {
    async fn insert(&self, position: u32, rule_text: &str) -> Result<InsertOutcome> {
        self.check(
            format!("ufw --dry-run insert {position} {rule_text}"),
            rule_text,
            "ERROR: Bad port\n",
        )?;
        self.inserted
            .lock()
            .unwrap()
            .push((position, rule_text.to_string()));
        Ok(InsertOutcome::Inserted { position })
    }

    async fn delete(&self, rule_text: &str) -> Result<()> {
        self.check(
            format!("ufw --dry-run delete {rule_text}"),
            rule_text,
            "ERROR: Could not delete non-existent rule\n",
        )?;
        self.deleted.lock().unwrap().push(rule_text.to_string());
        Ok(())
    }
}

/// Path of the shell mock standing in for ufw.
pub fn mock_ufw_script() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("mock_ufw.sh")
}

/// A private instance of `tests/mock_ufw.sh` with its own rule state.
///
/// The script keeps the enforcer's rule set in `<dir>/state`, logs every
/// invocation to `state.log`, fails with the contents of `state.fail` when that
/// file exists, and hangs when `state.hang` exists.
pub struct MockUfw {
    dir: TempDir,
}

impl MockUfw {
    pub fn new() -> Self {
        Self::with_rules(&[])
    }

    pub fn with_rules(rules: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut state = String::new();
        for rule in rules {
            state.push_str(rule);
            state.push('\n');
        }
        std::fs::write(dir.path().join("state"), state).unwrap();
        Self { dir }
    }

    pub fn command(&self) -> Vec<String> {
        vec![
            "sh".to_string(),
            mock_ufw_script().to_string_lossy().into_owned(),
            self.dir.path().join("state").to_string_lossy().into_owned(),
        ]
    }

    pub fn executor(&self) -> FirewallExecutor {
        FirewallExecutor::new(self.command()).with_elevation(false)
    }

    pub fn rules(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("state"))
    }

    pub fn invocations(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("state.log"))
    }

    pub fn fail_with(&self, output: &str) {
        std::fs::write(self.dir.path().join("state.fail"), output).unwrap();
    }

    pub fn hang(&self) {
        std::fs::write(self.dir.path().join("state.hang"), "").unwrap();
    }
}

fn read_lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}
