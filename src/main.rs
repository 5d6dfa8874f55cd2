//! ttlfw - Time-limited firewall rules
//!
//! Adds a rule to `ufw` with a time-to-live and removes it again once a later
//! `ttlfw clean` finds it expired.
//!
//! # Usage
//!
//! ```bash
//! ttlfw add "deny from 9.9.9.9"              # Insert at position 1 for 30 days
//! ttlfw add "allow 22/tcp" -t "2h" -p 3      # Custom TTL and position
//! ttlfw add "allow 80" -t "2030-01-01 12:00" # Absolute expiration
//! ttlfw status                               # List tracked rules
//! ttlfw status --format json
//! ttlfw clean                                # Sweep expired rules (run from cron)
//! ```

use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use ttlfw::audit::AuditLog;
use ttlfw::config::{self, AppConfig};
use ttlfw::core::add::Adder;
use ttlfw::core::executor::{FirewallExecutor, InsertOutcome};
use ttlfw::core::ledger::UpsertOutcome;
use ttlfw::core::lock::{ProcessLock, ProcfsLiveness};
use ttlfw::core::sweep::Sweeper;
use ttlfw::core::ttl::HumanTtlResolver;
use ttlfw::utils::format_local;
use ttlfw::{Error, Expiry, Ledger, MatchPolicy};

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "ttlfw", version = build::CLAP_LONG_VERSION)]
#[command(about = "Time-limited firewall rules for ufw", long_about = None)]
struct Cli {
    /// Config file (default: /etc/ttlfw/config.json, then ~/.config/ttlfw/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Rules ledger, overriding the configured path
    #[arg(long, global = true, value_name = "PATH")]
    ledger: Option<PathBuf>,
    /// Sweep lock file, overriding the configured path
    #[arg(long, global = true, value_name = "PATH")]
    lock: Option<PathBuf>,
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tracked rules and when they expire
    Status {
        #[arg(short, long, value_enum, default_value_t = StatusFormat::Text)]
        format: StatusFormat,
    },
    /// Delete expired rules from the firewall and the ledger
    Clean,
    /// Add a rule with a time-to-live
    Add {
        /// Rule in ufw syntax, e.g. "deny from 9.9.9.9"
        rule: String,
        /// Firewall position to insert at (default from config, usually 1)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        position: Option<u32>,
        /// Relative ("30 days", "2h 30min") or absolute ("2030-01-01 12:00") expiration
        #[arg(short, long)]
        ttl: Option<String>,
        /// How an existing ledger entry is recognised (substring or exact)
        #[arg(long = "match", value_name = "POLICY")]
        match_policy: Option<MatchPolicy>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn handle_cli(cli: Cli) -> ttlfw::Result<()> {
    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(path) = cli.ledger {
        config.ledger_path = path;
    }
    if let Some(path) = cli.lock {
        config.lock_path = path;
    }
    let audit = AuditLog::from_config(&config);

    match cli.command {
        Commands::Status { format } => status(&config, format),
        Commands::Clean => clean(&config, audit.as_ref()).await,
        Commands::Add {
            rule,
            position,
            ttl,
            match_policy,
        } => {
            let position = position.unwrap_or(config.default_position);
            let ttl = ttl.unwrap_or_else(|| config.default_ttl.clone());
            let policy = match_policy.unwrap_or(config.match_policy);
            add(&config, audit.as_ref(), &rule, position, &ttl, policy).await
        }
    }
}

fn executor(config: &AppConfig) -> FirewallExecutor {
    if config.elevate && !ttlfw::utils::is_root() {
        eprintln!("Note: Not running as root. Will use run0/sudo for firewall changes.");
    }
    FirewallExecutor::new(config.firewall_command.clone())
        .with_timeout(config.command_timeout())
        .with_elevation(config.elevate)
}

fn describe_expiry(expires_at: Expiry) -> String {
    expires_at
        .to_local()
        .map_or_else(|| expires_at.to_string(), |at| format_local(&at))
}

fn status(config: &AppConfig, format: StatusFormat) -> ttlfw::Result<()> {
    let records = Ledger::new(config.ledger_path.clone()).load()?;

    match format {
        StatusFormat::Json => {
            let json = serde_json::to_string_pretty(&records).map_err(std::io::Error::from)?;
            println!("{json}");
        }
        StatusFormat::Text => {
            if records.is_empty() {
                println!("No rules to display");
                return Ok(());
            }
            println!("Expiration\t\tRule");
            println!("{}", "=".repeat(80));
            for record in &records {
                println!("{}\t{}", describe_expiry(record.expires_at), record.rule_text);
            }
        }
    }
    Ok(())
}

async fn clean(config: &AppConfig, audit: Option<&AuditLog>) -> ttlfw::Result<()> {
    let lock = ProcessLock::new(
        config.lock_path.clone(),
        ProcfsLiveness::new(config.lock_identity.clone()),
    );
    let sweeper = Sweeper::new(
        Ledger::new(config.ledger_path.clone()),
        executor(config),
        lock,
    );

    let report = match sweeper.run(Expiry::now()).await {
        Ok(report) => report,
        Err(Error::LockStale { path, owner }) => {
            if let Some(audit) = audit {
                audit.log_stale_lock(&owner).await;
            }
            return Err(Error::LockStale { path, owner });
        }
        Err(e) => return Err(e),
    };

    let stamp = format_local(&Local::now());
    for record in &report.deleted {
        println!("{stamp}\tdeleted rule\t{}", record.rule_text);
    }
    for record in &report.kept {
        println!("{stamp}\tskipped rule\t{}", record.rule_text);
    }
    for failed in &report.failed {
        println!(
            "{stamp}\tfailed to delete rule\t{}\t{}",
            failed.record.rule_text, failed.reason
        );
    }

    // Idle sweeps are not worth an audit entry
    if let Some(audit) = audit
        && !(report.deleted.is_empty() && report.failed.is_empty())
    {
        audit.log_sweep(&report).await;
    }
    Ok(())
}

async fn add(
    config: &AppConfig,
    audit: Option<&AuditLog>,
    rule: &str,
    position: u32,
    ttl: &str,
    policy: MatchPolicy,
) -> ttlfw::Result<()> {
    let adder = Adder::new(
        Ledger::new(config.ledger_path.clone()),
        executor(config),
        HumanTtlResolver,
    )
    .with_policy(policy);

    let result = adder.add(rule, position, ttl, Local::now()).await;
    if let Some(audit) = audit {
        match &result {
            Ok(report) => audit.log_insert(rule, position, Ok(report)).await,
            // Anything else failed before the enforcer was touched
            Err(e @ Error::FirewallCommandFailed { .. }) => {
                audit.log_insert(rule, position, Err(e.to_string())).await;
            }
            Err(_) => {}
        }
    }
    let report = result?;

    if let UpsertOutcome::Updated { count } = report.upsert {
        println!("Updated expiration of {count} tracked rule(s)");
    }
    if report.insert == InsertOutcome::Appended && position == 1 {
        println!("Firewall has no rules yet, appended instead of inserting");
    }
    println!(
        "Added '{}' until {}",
        report.record.rule_text,
        describe_expiry(report.record.expires_at)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_position_zero_is_usage_error() {
        let Err(err) = Cli::try_parse_from(["ttlfw", "add", "allow 22", "-p", "0"]) else {
            panic!("position 0 was accepted");
        };
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_add_arguments() {
        let cli = Cli::try_parse_from([
            "ttlfw", "add", "deny from 9.9.9.9", "-p", "3", "-t", "2h", "--match", "exact",
        ])
        .unwrap_or_else(|e| panic!("{e}"));

        match cli.command {
            Commands::Add {
                rule,
                position,
                ttl,
                match_policy,
            } => {
                assert_eq!(rule, "deny from 9.9.9.9");
                assert_eq!(position, Some(3));
                assert_eq!(ttl.as_deref(), Some("2h"));
                assert_eq!(match_policy, Some(MatchPolicy::Exact));
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_missing_subcommand_is_usage_error() {
        let Err(err) = Cli::try_parse_from(["ttlfw"]) else {
            panic!("no subcommand was accepted");
        };
        assert_eq!(err.exit_code(), 2);
    }
}
