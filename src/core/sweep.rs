//! The expiration sweep
//!
//! One pass: take the PID lock, load the ledger, delete every expired rule from
//! the enforcer, commit the surviving records, give the lock back. A failed
//! delete does not stop the pass; the record stays in the ledger and is retried
//! on the next sweep.
//!
//! A stale lock (owner gone) is removed and the pass ends there. The next
//! scheduled run sweeps normally.

use crate::core::error::{Error, Result};
use crate::core::executor::Enforcer;
use crate::core::ledger::{Expiry, Ledger, RuleRecord, partition};
use crate::core::lock::{ProcessLock, ProcessLiveness};
use tracing::{debug, info, warn};

/// An expired rule the enforcer refused to delete.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedDeletion {
    pub record: RuleRecord,
    pub reason: String,
}

/// What one sweep did, each list in ledger order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub deleted: Vec<RuleRecord>,
    pub kept: Vec<RuleRecord>,
    pub failed: Vec<FailedDeletion>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Sweeper<E: Enforcer, P: ProcessLiveness> {
    ledger: Ledger,
    enforcer: E,
    lock: ProcessLock<P>,
}

impl<E: Enforcer, P: ProcessLiveness> Sweeper<E, P> {
    pub fn new(ledger: Ledger, enforcer: E, lock: ProcessLock<P>) -> Self {
        Self {
            ledger,
            enforcer,
            lock,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn enforcer(&self) -> &E {
        &self.enforcer
    }

    /// Runs one sweep against `now`.
    ///
    /// # Errors
    ///
    /// - [`Error::LockHeld`] if another sweep is running; nothing was touched
    /// - [`Error::LockStale`] after removing a dead owner's lock; nothing was swept
    /// - Ledger errors, after which the lock is still released
    pub async fn run(&self, now: Expiry) -> Result<SweepReport> {
        let guard = match self.lock.acquire() {
            Ok(guard) => guard,
            Err(Error::LockStale { path, owner }) => {
                warn!("Removing stale lock {} (owner '{owner}')", path.display());
                self.lock.release()?;
                return Err(Error::LockStale { path, owner });
            }
            Err(e) => return Err(e),
        };

        let result = self.sweep_locked(now).await;
        let released = guard.release();
        let report = result?;
        released?;
        Ok(report)
    }

    async fn sweep_locked(&self, now: Expiry) -> Result<SweepReport> {
        if !self.ledger.exists() {
            debug!("No ledger at {}, nothing to sweep", self.ledger.path().display());
            return Ok(SweepReport::default());
        }

        let records = self.ledger.load()?;
        let split = partition(records, now);
        info!(
            "Sweeping {} expired of {} rules",
            split.expired.len(),
            split.expired.len() + split.live.len()
        );

        let mut report = SweepReport {
            kept: split.live,
            ..SweepReport::default()
        };

        for record in split.expired {
            match self.enforcer.delete(&record.rule_text).await {
                Ok(()) => report.deleted.push(record),
                Err(e) => {
                    warn!("Keeping '{}' for the next sweep: {e}", record.rule_text);
                    report.failed.push(FailedDeletion {
                        record,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let survivors: Vec<RuleRecord> = report
            .kept
            .iter()
            .chain(report.failed.iter().map(|f| &f.record))
            .cloned()
            .collect();
        self.ledger.commit(&survivors)?;

        info!(
            "Sweep done: {} deleted, {} kept, {} failed",
            report.deleted.len(),
            report.kept.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
