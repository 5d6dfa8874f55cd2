//! TTL expressions → expiration instants
//!
//! Relative expressions ("30 days", "2h 30min", "in 1 week") are parsed by
//! `humantime`; absolute local dates ("2026-12-31", "2026-12-31 18:00") by
//! `chrono`. Resolution is pure: the caller supplies `now`.

use crate::core::error::{Error, Result};
use crate::core::ledger::Expiry;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

/// Turns an operator TTL expression into an absolute expiration instant.
pub trait TtlResolver {
    fn resolve(&self, expression: &str, now: DateTime<Local>) -> Result<Expiry>;
}

/// Default resolver for human-written durations and local dates.
#[derive(Debug, Clone, Copy, Default)]
pub struct HumanTtlResolver;

impl TtlResolver for HumanTtlResolver {
    fn resolve(&self, expression: &str, now: DateTime<Local>) -> Result<Expiry> {
        let unresolvable = |reason: String| Error::UnresolvableTtl {
            expression: expression.to_string(),
            reason,
        };

        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(unresolvable("empty expression".to_string()));
        }

        if let Some(at) = parse_absolute(trimmed) {
            return Ok(Expiry::from_datetime(&at));
        }

        let relative = trimmed
            .strip_prefix("in ")
            .or_else(|| trimmed.strip_prefix('+'))
            .unwrap_or(trimmed)
            .trim();

        let duration = humantime::parse_duration(relative).map_err(|e| unresolvable(e.to_string()))?;
        let delta = chrono::Duration::from_std(duration)
            .map_err(|_| unresolvable("duration out of range".to_string()))?;
        let at = now
            .checked_add_signed(delta)
            .ok_or_else(|| unresolvable("expiration out of range".to_string()))?;

        Ok(Expiry::from_datetime(&at))
    }
}

fn parse_absolute(s: &str) -> Option<DateTime<Local>> {
    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    // Skipped local times (DST gaps) have no instant
    Local.from_local_datetime(&naive).earliest()
}
