// 🧾 Audit Trail - every curator decision, queryable per composite key
//
// SQLite (WAL) file next to the CSV stores. The engines never touch it:
// callers record from the reports the engines return.

use crate::error::Result;
use crate::ingest::IngestReport;
use crate::model::StoreKey;
use crate::reconciliation::ReconciliationReport;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_ACTOR: &str = "ledger-curator";

// ============================================================================
// EVENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub label: String,
    pub account: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl AuditEvent {
    pub fn new(event_type: &str, key: &StoreKey, data: serde_json::Value) -> Self {
        AuditEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            label: key.label.clone(),
            account: key.account.clone(),
            data,
            actor: DEFAULT_ACTOR.to_string(),
        }
    }

    pub fn key(&self) -> StoreKey {
        StoreKey::new(self.label.clone(), self.account.clone())
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        // Enable WAL mode for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::setup(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT UNIQUE NOT NULL,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                label TEXT NOT NULL,
                account TEXT NOT NULL,
                data TEXT NOT NULL,
                actor TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_key ON events(label, account)",
            [],
        )?;
        Ok(AuditLog { conn })
    }

    pub fn record(&self, event: &AuditEvent) -> Result<()> {
        insert_event(&self.conn, event)
    }

    /// Record every event in one transaction. Returns how many were written.
    pub fn record_all(&self, events: &[AuditEvent]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// New pending / unresolved rows created by an ingestion.
    pub fn record_ingest(&self, report: &IngestReport) -> Result<usize> {
        let mut events = Vec::new();

        for key in &report.new_pending {
            events.push(AuditEvent::new(
                "pending_match_added",
                key,
                serde_json::json!({ "source": report.source }),
            ));
        }
        for key in &report.new_unresolved {
            events.push(AuditEvent::new(
                "unresolved_added",
                key,
                serde_json::json!({ "source": report.source }),
            ));
        }
        for ambiguous in &report.ambiguous {
            events.push(AuditEvent::new(
                "ambiguous_fuzzy_match",
                &ambiguous.key,
                serde_json::to_value(ambiguous)?,
            ));
        }

        self.record_all(&events)
    }

    /// One event per reconciled key and per skipped row.
    pub fn record_reconciliation(&self, report: &ReconciliationReport) -> Result<usize> {
        let mut events = Vec::new();

        for reconciled in &report.reconciled {
            events.push(AuditEvent::new(
                reconciled.action.event_type(),
                &reconciled.key,
                serde_json::json!({
                    "changed": report.changed.as_str(),
                    "action": reconciled.action,
                    "ledger": reconciled.ledger,
                }),
            ));
        }
        for skipped in &report.skipped {
            events.push(AuditEvent::new(
                "row_skipped",
                &skipped.key,
                serde_json::json!({
                    "changed": report.changed.as_str(),
                    "reason": skipped.reason,
                }),
            ));
        }

        self.record_all(&events)
    }

    /// Events for one (label, account), oldest first.
    pub fn events_for_key(&self, key: &StoreKey) -> Result<Vec<AuditEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, timestamp, event_type, label, account, data, actor
             FROM events
             WHERE label = ?1 AND account = ?2
             ORDER BY id ASC",
        )?;

        let events = stmt
            .query_map(params![key.label, key.account], |row| {
                let timestamp_str: String = row.get(1)?;
                let data_json: String = row.get(5)?;

                Ok(AuditEvent {
                    event_id: row.get(0)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                        })?
                        .with_timezone(&Utc),
                    event_type: row.get(2)?,
                    label: row.get(3)?,
                    account: row.get(4)?,
                    data: serde_json::from_str(&data_json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                    })?,
                    actor: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn insert_event(conn: &Connection, event: &AuditEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, label, account, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.label,
            event.account,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CuratorConfig;
    use crate::ingest::ingest;
    use crate::model::ParsedRow;
    use crate::reconciliation::{ChangedStore, ReconciliationEngine};
    use crate::stores::{MappingRow, MatchStatus, Stores};
    use chrono::NaiveDate;

    fn scenario() -> (Stores, IngestReport) {
        let mut stores = Stores::new();
        stores
            .confirmed
            .push(MappingRow::new(&StoreKey::new("coffee shop", "acc1"), "dining"));
        let date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let rows = vec![
            ParsedRow::new(date, "Coffe Shp", -3.0),
            ParsedRow::new(date, "Council Tax", -140.0),
        ];
        let report = ingest(&mut stores, "acc1", "feb.csv", rows, &CuratorConfig::default()).unwrap();
        (stores, report)
    }

    #[test]
    fn test_record_and_query() {
        let log = AuditLog::in_memory().unwrap();
        let key = StoreKey::new("gym", "acc2");
        log.record(&AuditEvent::new("unresolved_added", &key, serde_json::json!({"n": 1})))
            .unwrap();
        log.record(&AuditEvent::new("unknown_promoted", &key, serde_json::json!({"n": 2})))
            .unwrap();

        let events = log.events_for_key(&key).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "unresolved_added");
        assert_eq!(events[1].data["n"], 2);
        assert_eq!(events[1].key(), key);
        assert!(log.events_for_key(&StoreKey::new("gym", "acc1")).unwrap().is_empty());
    }

    #[test]
    fn test_record_ingest() {
        let (_, report) = scenario();
        let log = AuditLog::in_memory().unwrap();

        assert_eq!(log.record_ingest(&report).unwrap(), 2);
        let events = log.events_for_key(&StoreKey::new("coffe shp", "acc1")).unwrap();
        assert_eq!(events[0].event_type, "pending_match_added");
        assert_eq!(events[0].data["source"], "feb.csv");
    }

    #[test]
    fn test_record_reconciliation() {
        let (mut stores, _) = scenario();
        stores.pending.rows_mut()[0].status = MatchStatus::Rejected;
        let report = ReconciliationEngine::new()
            .reconcile(ChangedStore::Pending, &mut stores)
            .unwrap();

        let log = AuditLog::in_memory().unwrap();
        assert_eq!(log.record_reconciliation(&report).unwrap(), 1);

        let events = log.events_for_key(&StoreKey::new("coffe shp", "acc1")).unwrap();
        assert_eq!(events[0].event_type, "fuzzy_rejected");
        assert_eq!(events[0].data["changed"], "pending");
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn test_skipped_rows_are_recorded_when_nothing_moves() {
        let (mut stores, _) = scenario();
        let row = &mut stores.pending.rows_mut()[0];
        row.status = MatchStatus::Rejected;
        row.override_category = Some("work".to_string());
        let report = ReconciliationEngine::new()
            .reconcile(ChangedStore::Pending, &mut stores)
            .unwrap();
        assert!(report.is_noop() && report.has_skipped());

        let log = AuditLog::in_memory().unwrap();
        assert_eq!(log.record_reconciliation(&report).unwrap(), 1);
        let events = log.events_for_key(&StoreKey::new("coffe shp", "acc1")).unwrap();
        assert_eq!(events[0].event_type, "row_skipped");
    }

    #[test]
    fn test_on_disk_log_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let key = StoreKey::new("rent", "acc1");

        {
            let log = AuditLog::open(&path).unwrap();
            log.record(&AuditEvent::new("unresolved_added", &key, serde_json::Value::Null))
                .unwrap();
        }

        let log = AuditLog::open(&path).unwrap();
        assert_eq!(log.count().unwrap(), 1);
    }
}
