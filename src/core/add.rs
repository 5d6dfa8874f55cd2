//! The insert path: resolve the TTL, record the rule, apply it.
//!
//! The ledger is written before the enforcer is touched, so an applied rule always
//! has a record that will expire it. If the enforcer then rejects the rule, the
//! previous ledger contents are restored and the error is returned; no record is
//! left behind for a rule that was never applied.

use crate::core::error::{Error, Result};
use crate::core::executor::{Enforcer, InsertOutcome};
use crate::core::ledger::{Expiry, Ledger, MatchPolicy, RuleRecord, UpsertOutcome, Upserted};
use crate::core::ttl::TtlResolver;
use chrono::{DateTime, Local};
use tracing::{error, info, warn};

/// Result of a successful add.
#[derive(Debug, Clone, PartialEq)]
pub struct AddReport {
    pub record: RuleRecord,
    pub upsert: UpsertOutcome,
    pub insert: InsertOutcome,
}

pub struct Adder<E: Enforcer, R: TtlResolver> {
    ledger: Ledger,
    enforcer: E,
    resolver: R,
    policy: MatchPolicy,
}

impl<E: Enforcer, R: TtlResolver> Adder<E, R> {
    pub fn new(ledger: Ledger, enforcer: E, resolver: R) -> Self {
        Self {
            ledger,
            enforcer,
            resolver,
            policy: MatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn enforcer(&self) -> &E {
        &self.enforcer
    }

    /// Adds `rule_text` at `position`, expiring `ttl` after `now`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRule`] / [`Error::InvalidPosition`] before anything is touched
    /// - [`Error::UnresolvableTtl`] before the ledger is touched
    /// - Ledger errors
    /// - [`Error::FirewallCommandFailed`] after the ledger has been rolled back
    pub async fn add(
        &self,
        rule_text: &str,
        position: u32,
        ttl: &str,
        now: DateTime<Local>,
    ) -> Result<AddReport> {
        crate::validators::validate_position(position)
            .map_err(|_| Error::InvalidPosition(position))?;
        let expires_at: Expiry = self.resolver.resolve(ttl, now)?;
        let record = RuleRecord::new(rule_text, expires_at)?;

        let existed = self.ledger.exists();
        let Upserted {
            outcome: upsert,
            previous,
        } = self.ledger.upsert(record.clone(), self.policy)?;
        if let UpsertOutcome::Updated { count } = upsert {
            info!("Rule found, updating expiration of {count} existing record(s)");
        }

        match self.enforcer.insert(position, &record.rule_text).await {
            Ok(insert) => {
                info!("Added '{}' until {}", record.rule_text, record.expires_at);
                Ok(AddReport {
                    record,
                    upsert,
                    insert,
                })
            }
            Err(e) => {
                warn!("Enforcer rejected '{}', rolling back ledger", record.rule_text);
                if let Err(rollback) = self.rollback(existed, &previous) {
                    error!("Ledger rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    fn rollback(&self, existed: bool, previous: &[RuleRecord]) -> Result<()> {
        if existed {
            self.ledger.commit(previous)
        } else {
            self.ledger.remove()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::{FakeEnforcer, FixedResolver, record, scratch_ledger};
    use crate::core::ttl::HumanTtlResolver;
    use std::fs;

    fn at(secs: i64) -> DateTime<Local> {
        DateTime::from_timestamp(secs, 0).unwrap().with_timezone(&Local)
    }

    #[tokio::test]
    async fn test_add_one_day() {
        let (_dir, ledger) = scratch_ledger();
        let adder = Adder::new(ledger, FakeEnforcer::default(), HumanTtlResolver);

        let report = adder
            .add("deny from 9.9.9.9", 1, "1 day", at(1_000_000))
            .await
            .unwrap();

        assert_eq!(report.upsert, UpsertOutcome::Appended);
        assert_eq!(report.insert, InsertOutcome::Inserted { position: 1 });
        assert_eq!(
            adder.ledger().load().unwrap(),
            vec![record(1_086_400.0, "deny from 9.9.9.9")]
        );
        assert_eq!(
            adder.enforcer().inserted(),
            vec![(1, "deny from 9.9.9.9".to_string())]
        );
    }

    #[tokio::test]
    async fn test_add_existing_rule_extends_ttl() {
        let (_dir, ledger) = scratch_ledger();
        ledger
            .commit(&[record(500.0, "allow 80"), record(100.0, "deny from 9.9.9.9")])
            .unwrap();
        let adder = Adder::new(ledger, FakeEnforcer::default(), FixedResolver(9_000.0));

        let report = adder.add("deny from 9.9.9.9", 3, "ignored", at(0)).await.unwrap();

        assert_eq!(report.upsert, UpsertOutcome::Updated { count: 1 });
        assert_eq!(
            adder.ledger().load().unwrap(),
            vec![record(500.0, "allow 80"), record(9_000.0, "deny from 9.9.9.9")]
        );
        assert_eq!(adder.enforcer().inserted(), vec![(3, "deny from 9.9.9.9".to_string())]);
    }

    #[tokio::test]
    async fn test_exact_policy_does_not_touch_longer_rule() {
        let (_dir, ledger) = scratch_ledger();
        ledger.commit(&[record(100.0, "allow 2222/tcp")]).unwrap();
        let adder = Adder::new(ledger, FakeEnforcer::default(), FixedResolver(9_000.0))
            .with_policy(MatchPolicy::Exact);

        let report = adder.add("allow 22", 1, "x", at(0)).await.unwrap();

        assert_eq!(report.upsert, UpsertOutcome::Appended);
        assert_eq!(
            adder.ledger().load().unwrap(),
            vec![record(100.0, "allow 2222/tcp"), record(9_000.0, "allow 22")]
        );
    }

    #[tokio::test]
    async fn test_bad_ttl_touches_nothing() {
        let (_dir, ledger) = scratch_ledger();
        let adder = Adder::new(ledger, FakeEnforcer::default(), HumanTtlResolver);

        let err = adder.add("allow 22", 1, "someday", at(0)).await.unwrap_err();

        assert!(matches!(err, Error::UnresolvableTtl { .. }));
        assert!(!adder.ledger().exists());
        assert!(adder.enforcer().inserted().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_rule_touches_nothing() {
        let (_dir, ledger) = scratch_ledger();
        let adder = Adder::new(ledger, FakeEnforcer::default(), FixedResolver(1.0));

        let err = adder.add("allow 22\nallow 23", 1, "x", at(0)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRule(_)));

        let err = adder.add("allow 22", 0, "x", at(0)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPosition(0)));

        assert!(!adder.ledger().exists());
    }

    #[tokio::test]
    async fn test_enforcer_failure_rolls_back_new_ledger() {
        let (_dir, ledger) = scratch_ledger();
        let enforcer = FakeEnforcer::default().failing_on("allow 99999");
        let adder = Adder::new(ledger, enforcer, FixedResolver(9_000.0));

        let err = adder.add("allow 99999", 1, "x", at(0)).await.unwrap_err();

        assert!(matches!(err, Error::FirewallCommandFailed { .. }));
        assert!(!adder.ledger().exists());
    }

    #[tokio::test]
    async fn test_enforcer_failure_restores_previous_ledger() {
        let (_dir, ledger) = scratch_ledger();
        ledger
            .commit(&[record(100.0, "allow 80"), record(200.0, "allow 99999")])
            .unwrap();
        let before = fs::read(ledger.path()).unwrap();
        let enforcer = FakeEnforcer::default().failing_on("allow 99999");
        let adder = Adder::new(ledger, enforcer, FixedResolver(9_000.0));

        assert!(adder.add("allow 99999", 1, "x", at(0)).await.is_err());
        assert_eq!(fs::read(adder.ledger().path()).unwrap(), before);
    }
}
