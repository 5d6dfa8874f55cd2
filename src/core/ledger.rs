//! The rules ledger
//!
//! A plain text file holding one record per line:
//!
//! ```text
//! 1700000000.0 allow from 10.0.0.1
//! 1700086400.5 deny from 9.9.9.9 to any port 22
//! ```
//!
//! The first space separates the expiration instant (seconds since the Unix
//! epoch, fractional precision allowed) from the rule text, which is handed to
//! the enforcer verbatim. Record order is file order; updates keep position.
//!
//! The file is never edited in place. Every change goes through
//! [`Ledger::commit`], which writes a temporary file next to the ledger and
//! renames it over the original.

use crate::core::error::{Error, Result};
use crate::validators;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Absolute expiration instant in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Expiry(f64);

impl Expiry {
    /// Returns `None` for NaN and infinities, which have no place in the ledger.
    pub fn from_secs(secs: f64) -> Option<Self> {
        secs.is_finite().then_some(Self(secs))
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self(at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) / 1e9)
    }

    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Expired means `expires_at <= now`.
    pub fn is_expired_at(self, now: Expiry) -> bool {
        self.0 <= now.0
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_local(self) -> Option<DateTime<Local>> {
        let secs = self.0.floor();
        let nanos = ((self.0 - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
            .map(|at| at.with_timezone(&Local))
    }
}

impl fmt::Display for Expiry {
    // Whole seconds keep a trailing ".0" so existing ledgers stay byte-compatible
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{:.1}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for Expiry {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let secs: f64 = s
            .parse()
            .map_err(|_| format!("invalid expiration timestamp '{s}'"))?;
        Self::from_secs(secs).ok_or_else(|| format!("expiration timestamp '{s}' is not finite"))
    }
}

/// One time-limited rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleRecord {
    pub expires_at: Expiry,
    pub rule_text: String,
}

impl RuleRecord {
    /// Builds a record from operator input, enforcing the single-line invariant.
    pub fn new(rule_text: &str, expires_at: Expiry) -> Result<Self> {
        let rule_text = validators::validate_rule_text(rule_text).map_err(Error::InvalidRule)?;
        Ok(Self {
            expires_at,
            rule_text: rule_text.to_string(),
        })
    }

    pub fn to_line(&self) -> String {
        format!("{} {}", self.expires_at, self.rule_text)
    }

    fn parse_line(line: &str) -> std::result::Result<Self, String> {
        let (timestamp, rule_text) = line
            .split_once(' ')
            .ok_or_else(|| "expected '<expiration> <rule>'".to_string())?;
        let expires_at = timestamp.parse()?;
        if rule_text.trim().is_empty() {
            return Err("missing rule text".to_string());
        }
        Ok(Self {
            expires_at,
            rule_text: rule_text.to_string(),
        })
    }
}

/// How an inserted rule is matched against records already in the ledger.
///
/// `Substring` is the historical behaviour and stays the default for
/// compatibility with existing deployments. It is fragile: a short rule such as
/// `allow 22` also matches `allow 2222/tcp`, and every matching record gets the
/// new expiration. `Exact` compares whitespace-normalized rule text instead.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchPolicy {
    #[default]
    Substring,
    Exact,
}

impl MatchPolicy {
    pub fn matches(self, stored: &str, candidate: &str) -> bool {
        match self {
            MatchPolicy::Substring => stored.contains(candidate),
            MatchPolicy::Exact => normalize(stored) == normalize(candidate),
        }
    }
}

fn normalize(rule_text: &str) -> String {
    rule_text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// What [`upsert_records`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Existing records had their expiration replaced in place
    Updated { count: usize },
    /// No record matched; the rule was appended
    Appended,
}

/// Updates the expiration of every matching record, or appends a new one.
pub fn upsert_records(
    records: &mut Vec<RuleRecord>,
    record: RuleRecord,
    policy: MatchPolicy,
) -> UpsertOutcome {
    let mut count = 0;
    for existing in records
        .iter_mut()
        .filter(|r| policy.matches(&r.rule_text, &record.rule_text))
    {
        debug!("Rule found, updating expiration of '{}'", existing.rule_text);
        existing.expires_at = record.expires_at;
        count += 1;
    }

    if count == 0 {
        records.push(record);
        UpsertOutcome::Appended
    } else {
        UpsertOutcome::Updated { count }
    }
}

/// A committed [`Ledger::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub outcome: UpsertOutcome,
    /// Ledger contents the upsert replaced
    pub previous: Vec<RuleRecord>,
}

/// Records split by expiry, each side in original ledger order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub expired: Vec<RuleRecord>,
    pub live: Vec<RuleRecord>,
}

pub fn partition(records: Vec<RuleRecord>, now: Expiry) -> Partition {
    let (expired, live) = records
        .into_iter()
        .partition(|r| r.expires_at.is_expired_at(now));
    Partition { expired, live }
}

/// Parses the full ledger text. Any malformed line fails the whole parse.
pub fn parse_records(content: &str) -> std::result::Result<Vec<RuleRecord>, String> {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| {
            RuleRecord::parse_line(line).map_err(|reason| format!("line {}: {reason}", idx + 1))
        })
        .collect()
}

pub fn serialize_records(records: &[RuleRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_line());
        out.push('\n');
    }
    out
}

/// Handle on the ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads every record. An absent ledger is an empty one.
    pub fn load(&self) -> Result<Vec<RuleRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.unreadable(e.to_string())),
        };
        let records = parse_records(&content).map_err(|reason| self.unreadable(reason))?;
        debug!("Loaded {} records from {}", records.len(), self.path.display());
        Ok(records)
    }

    /// Loads, upserts and commits in one step.
    pub fn upsert(&self, record: RuleRecord, policy: MatchPolicy) -> Result<Upserted> {
        let previous = self.load()?;
        let mut records = previous.clone();
        let outcome = upsert_records(&mut records, record, policy);
        self.commit(&records)?;
        Ok(Upserted { outcome, previous })
    }

    /// Atomically replaces the ledger contents with `records`.
    pub fn commit(&self, records: &[RuleRecord]) -> Result<()> {
        self.stage(records)?.persist()
    }

    /// Writes `records` to a temporary file beside the ledger without touching it.
    ///
    /// Dropping the returned [`StagedCommit`] discards the temporary file and
    /// leaves the ledger exactly as it was.
    pub fn stage(&self, records: &[RuleRecord]) -> Result<StagedCommit> {
        let dir = self.dir();
        crate::utils::ensure_dir(dir, 0o755).map_err(|e| self.write_failed(e))?;

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| self.write_failed(e))?;
        temp.write_all(serialize_records(records).as_bytes())
            .map_err(|e| self.write_failed(e))?;
        temp.as_file().sync_all().map_err(|e| self.write_failed(e))?;

        // NamedTempFile is created 0o600; keep whatever mode the ledger had
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let permissions = fs::metadata(&self.path)
                .map(|m| m.permissions())
                .unwrap_or_else(|_| fs::Permissions::from_mode(0o644));
            temp.as_file()
                .set_permissions(permissions)
                .map_err(|e| self.write_failed(e))?;
        }

        Ok(StagedCommit {
            temp,
            target: self.path.clone(),
        })
    }

    /// Deletes the ledger file; absent is fine.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.write_failed(e)),
        }
    }

    fn dir(&self) -> &Path {
        parent_dir(&self.path)
    }

    fn unreadable(&self, reason: String) -> Error {
        Error::LedgerUnreadable {
            path: self.path.clone(),
            reason,
        }
    }

    fn write_failed(&self, source: std::io::Error) -> Error {
        Error::LedgerWriteFailed {
            path: self.path.clone(),
            source,
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Makes a rename inside `dir` durable.
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

/// A fully written ledger replacement waiting for its rename.
#[derive(Debug)]
pub struct StagedCommit {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedCommit {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Renames the staged file over the ledger.
    pub fn persist(self) -> Result<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| Error::LedgerWriteFailed {
                path: target.clone(),
                source: e.error,
            })?;

        // Make the rename itself durable
        let dir = parent_dir(&target);
        if let Err(e) = sync_dir(dir) {
            warn!("Failed to sync directory {}: {e}", dir.display());
        }

        info!("Committed rules ledger {}", target.display());
        Ok(())
    }
}
