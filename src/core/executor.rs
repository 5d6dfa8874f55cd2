//! Two-phase enforcer invocations
//!
//! Every mutation is first run with `--dry-run`; the real command only runs if the
//! dry run exits 0. The one recovery path: inserting at position 1 into an empty
//! rule set is rejected by ufw ("Invalid position '1'"), so that insert is retried
//! once as a plain append.

use crate::core::error::{Error, Result, UfwErrorPattern};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on a single enforcer invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// What an insert ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { position: u32 },
    /// The rule set was empty, so the rule was appended instead
    Appended,
}

/// The external program that actually enforces rules.
#[allow(async_fn_in_trait)]
pub trait Enforcer {
    async fn insert(&self, position: u32, rule_text: &str) -> Result<InsertOutcome>;

    async fn delete(&self, rule_text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum Phase {
    Validate,
    Commit,
}

/// Runs the enforcer command line (`ufw` by default).
#[derive(Debug, Clone)]
pub struct FirewallExecutor {
    command: Vec<String>,
    timeout: Duration,
    elevate: bool,
}

impl FirewallExecutor {
    /// `command` is the program followed by any fixed leading arguments.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            elevate: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disables wrapping the command in sudo/run0.
    pub fn with_elevation(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    /// Validates `args` with a dry run, then commits them.
    pub async fn apply(&self, args: &[String]) -> Result<()> {
        for phase in [Phase::Validate, Phase::Commit] {
            self.run(phase, args).await?;
        }
        Ok(())
    }

    async fn run(&self, phase: Phase, args: &[String]) -> Result<()> {
        let (program, fixed) = self
            .command
            .split_first()
            .ok_or_else(|| Error::Config("firewall_command is empty".to_string()))?;

        let mut argv: Vec<&str> = fixed.iter().map(String::as_str).collect();
        if phase == Phase::Validate {
            argv.push("--dry-run");
        }
        argv.extend(args.iter().map(String::as_str));

        let command_line = std::iter::once(program.as_str())
            .chain(argv.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        let failed = |output: String, exit_code: Option<i32>| Error::FirewallCommandFailed {
            command: command_line.clone(),
            output,
            exit_code,
        };

        let mut cmd = if self.elevate {
            crate::elevation::create_elevated_command(program, &argv)?
        } else {
            let mut cmd = tokio::process::Command::new(program);
            cmd.args(&argv);
            cmd
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {phase} phase: {command_line}");

        let child = cmd
            .spawn()
            .map_err(|e| failed(format!("failed to spawn: {e}"), None))?;

        // Dropping the wait future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| failed(format!("failed to wait: {e}"), None))?,
            Err(_) => {
                let limit = humantime::format_duration(self.timeout);
                warn!("{command_line} timed out after {limit}");
                return Err(failed(format!("timed out after {limit}"), None));
            }
        };

        if output.status.success() {
            debug!("{phase} phase passed: {command_line}");
            return Ok(());
        }

        // Same stream order the tool prints in: stdout, then stderr
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let translation = UfwErrorPattern::match_error(&combined);
        warn!("{phase} phase failed: {command_line}: {}", translation.user_message);
        for suggestion in &translation.suggestions {
            info!("hint: {suggestion}");
        }

        Err(failed(combined, output.status.code()))
    }
}

impl Default for FirewallExecutor {
    fn default() -> Self {
        Self::new(vec!["ufw".to_string()])
    }
}

impl Enforcer for FirewallExecutor {
    async fn insert(&self, position: u32, rule_text: &str) -> Result<InsertOutcome> {
        crate::validators::validate_position(position)
            .map_err(|_| Error::InvalidPosition(position))?;
        let rule_args = split_rule(rule_text)?;

        let mut args = vec!["insert".to_string(), position.to_string()];
        args.extend(rule_args.iter().cloned());

        match self.apply(&args).await {
            Ok(()) => {
                info!("Inserted rule at position {position}: {rule_text}");
                Ok(InsertOutcome::Inserted { position })
            }
            Err(Error::FirewallCommandFailed { output, .. })
                if position == 1 && is_empty_ruleset_rejection(&output) =>
            {
                info!("Rule set is empty, appending instead: {rule_text}");
                self.apply(&rule_args).await?;
                Ok(InsertOutcome::Appended)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, rule_text: &str) -> Result<()> {
        let mut args = vec!["delete".to_string()];
        args.extend(split_rule(rule_text)?);
        self.apply(&args).await?;
        info!("Deleted rule: {rule_text}");
        Ok(())
    }
}

/// Splits opaque rule text into arguments with POSIX shell quoting rules.
///
/// The text is never interpreted beyond word splitting; no shell is involved.
pub fn split_rule(rule_text: &str) -> Result<Vec<String>> {
    let args = shlex::split(rule_text)
        .ok_or_else(|| Error::InvalidRule(format!("unbalanced quotes in '{rule_text}'")))?;
    if args.is_empty() {
        return Err(Error::InvalidRule("Rule cannot be empty".to_string()));
    }
    Ok(args)
}

fn is_empty_ruleset_rejection(output: &str) -> bool {
    output.to_lowercase().contains("invalid position '1'")
}
