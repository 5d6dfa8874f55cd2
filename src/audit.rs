/// Audit logging for enforcer mutations
///
/// Every rule insert, every sweep deletion and every stale-lock recovery is
/// appended to a JSON-lines audit trail. Audit failures never fail the
/// operation; they are logged as warnings.
use crate::core::add::AddReport;
use crate::core::executor::InsertOutcome;
use crate::core::sweep::SweepReport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InsertRule,
    DeleteRule,
    Sweep,
    ClearStaleLock,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Builds the writer configured in `config`, if auditing is on and a path is known.
    pub fn from_config(config: &crate::config::AppConfig) -> Option<Self> {
        if !config.audit_enabled {
            return None;
        }
        config.audit_log_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Appends an event as one JSON line.
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        if let Some(dir) = self.log_path.parent() {
            crate::utils::ensure_dir(dir, 0o700)?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event).await {
            tracing::warn!("Failed to write audit log {}: {}", self.log_path.display(), e);
        }
    }

    /// Logs an add, successful or not
    pub async fn log_insert(
        &self,
        rule_text: &str,
        position: u32,
        result: std::result::Result<&AddReport, String>,
    ) {
        let event = match result {
            Ok(report) => AuditEvent::new(
                EventType::InsertRule,
                true,
                serde_json::json!({
                    "rule": report.record.rule_text,
                    "position": position,
                    "expires_at": report.record.expires_at,
                    "appended": report.insert == InsertOutcome::Appended,
                }),
                None,
            ),
            Err(error) => AuditEvent::new(
                EventType::InsertRule,
                false,
                serde_json::json!({ "rule": rule_text, "position": position }),
                Some(error),
            ),
        };
        self.record(event).await;
    }

    /// Logs each deletion attempt of a sweep, then a summary
    pub async fn log_sweep(&self, report: &SweepReport) {
        for record in &report.deleted {
            let event = AuditEvent::new(
                EventType::DeleteRule,
                true,
                serde_json::json!({ "rule": record.rule_text, "expires_at": record.expires_at }),
                None,
            );
            self.record(event).await;
        }
        for failed in &report.failed {
            let event = AuditEvent::new(
                EventType::DeleteRule,
                false,
                serde_json::json!({
                    "rule": failed.record.rule_text,
                    "expires_at": failed.record.expires_at,
                }),
                Some(failed.reason.clone()),
            );
            self.record(event).await;
        }

        let summary = AuditEvent::new(
            EventType::Sweep,
            report.is_clean(),
            serde_json::json!({
                "deleted": report.deleted.len(),
                "kept": report.kept.len(),
                "failed": report.failed.len(),
            }),
            None,
        );
        self.record(summary).await;
    }

    /// Logs removal of a dead sweep's lock
    pub async fn log_stale_lock(&self, owner: &str) {
        let event = AuditEvent::new(
            EventType::ClearStaleLock,
            true,
            serde_json::json!({ "owner": owner }),
            None,
        );
        self.record(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::UpsertOutcome;
    use crate::core::sweep::FailedDeletion;
    use crate::core::test_helpers::record;

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(
            EventType::DeleteRule,
            false,
            serde_json::json!({"rule": "allow 22"}),
            Some("Could not delete non-existent rule".to_string()),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("delete_rule"));
        assert!(json.contains("non-existent"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","event_type":"clear_stale_lock","success":true,"details":{},"error":null}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();

        assert!(event.success);
        assert_eq!(event.event_type, EventType::ClearStaleLock);
    }

    #[tokio::test]
    async fn test_insert_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("state/audit.log"));
        let report = AddReport {
            record: record(86_400.0, "deny from 9.9.9.9"),
            upsert: UpsertOutcome::Appended,
            insert: InsertOutcome::Appended,
        };

        audit.log_insert("deny from 9.9.9.9", 1, Ok(&report)).await;
        audit
            .log_insert("allow 99999", 1, Err("ERROR: Bad port".to_string()))
            .await;

        let events = audit.read_recent(10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(!events[0].success);
        assert_eq!(events[0].error.as_deref(), Some("ERROR: Bad port"));
        assert!(events[1].success);
        assert_eq!(events[1].details["rule"], "deny from 9.9.9.9");
        assert_eq!(events[1].details["expires_at"], 86_400.0);
        assert_eq!(events[1].details["appended"], true);
    }

    #[tokio::test]
    async fn test_sweep_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("audit.log"));
        let report = SweepReport {
            deleted: vec![record(100.0, "allow 22")],
            kept: vec![record(900.0, "allow 80")],
            failed: vec![FailedDeletion {
                record: record(150.0, "allow 23"),
                reason: "non-existent rule".to_string(),
            }],
        };

        audit.log_sweep(&report).await;

        let events = audit.read_recent(10).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, EventType::Sweep);
        assert!(!events[0].success);
        assert_eq!(events[0].details["deleted"], 1);
        assert_eq!(events[1].event_type, EventType::DeleteRule);
        assert!(!events[1].success);
        assert!(events[2].success);
    }

    #[test]
    fn test_disabled_audit() {
        let config = crate::config::AppConfig {
            audit_enabled: false,
            ..Default::default()
        };
        assert!(AuditLog::from_config(&config).is_none());

        let config = crate::config::AppConfig {
            audit_log_path: Some(PathBuf::from("/tmp/ttlfw-audit.log")),
            ..Default::default()
        };
        let audit = AuditLog::from_config(&config).unwrap();
        assert_eq!(audit.path(), Path::new("/tmp/ttlfw-audit.log"));
    }
}
