// 🗄️ SQLite store - the four ledger relations plus an audit trail
//
// Tables:
//   members        (id, display_name)
//   payments       (member_id, period, paid)   one row per period entry
//   config         (key, value)                due_day, saved_at
//   auto_pay       (member_id)
//   account_links  (secondary_id, primary_id)
//   events         audit trail, append-only
//
// A save replaces the four relations inside one transaction, so a crash
// mid-save leaves the previous ledger intact.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use super::{LedgerEvent, PersistencePort};
use crate::entities::Member;
use crate::error::PersistenceError;
use crate::ledger::{LedgerConfig, LedgerSnapshot};
use crate::period::PeriodId;

pub struct SqliteStore {
    conn: Connection,
    label: String,
    quarantined: usize,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let label = format!("sqlite:{}", path.as_ref().display());
        let conn = Connection::open(path)?;
        // WAL for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn, label)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?, "sqlite::memory:".to_string())
    }

    fn with_connection(conn: Connection, label: String) -> Result<Self, PersistenceError> {
        setup_schema(&conn)?;
        Ok(SqliteStore {
            conn,
            label,
            quarantined: 0,
        })
    }

    /// Audit events for one billing identity, newest first
    pub fn events_for(&self, entity_id: &str) -> Result<Vec<LedgerEvent>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_id, data, actor
             FROM events
             WHERE entity_id = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;

        let rows = stmt
            .query_map(params![entity_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(event_id, timestamp, event_type, entity_id, data, actor)| {
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| PersistenceError::malformed(format!("event {event_id}: {e}")))?
                    .with_timezone(&Utc);
                Ok(LedgerEvent {
                    event_id,
                    timestamp,
                    event_type,
                    entity_id,
                    data: serde_json::from_str(&data)?,
                    actor,
                })
            })
            .collect()
    }
}

fn setup_schema(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS members (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payments (
            member_id TEXT NOT NULL,
            period TEXT NOT NULL,
            paid INTEGER NOT NULL,
            PRIMARY KEY (member_id, period)
        );

        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS auto_pay (
            member_id TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS account_links (
            secondary_id TEXT PRIMARY KEY,
            primary_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_id);",
    )?;
    Ok(())
}

impl PersistencePort for SqliteStore {
    fn load(&mut self) -> Result<Option<LedgerSnapshot>, PersistenceError> {
        let due_day: Option<String> = self
            .conn
            .query_row("SELECT value FROM config WHERE key = 'due_day'", [], |row| row.get(0))
            .optional()?;

        // Never saved
        let Some(due_day) = due_day else {
            return Ok(None);
        };
        let due_day: u32 = due_day
            .trim()
            .parse()
            .map_err(|_| PersistenceError::malformed(format!("due_day '{due_day}' is not a number")))?;

        let mut members: BTreeMap<String, Member> = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT id, display_name FROM members ORDER BY id")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                let (id, name) = row?;
                members.insert(id.clone(), Member::new(id, name));
            }
        }

        let mut quarantined = 0;
        {
            let mut stmt = self
                .conn
                .prepare("SELECT member_id, period, paid FROM payments ORDER BY member_id, period")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            for row in rows {
                let (member_id, period, paid) = row?;
                let parsed = period.parse::<PeriodId>();
                match (members.get_mut(&member_id), parsed) {
                    (Some(member), Ok(period)) => {
                        member.mark(period, paid != 0);
                    }
                    (None, _) => {
                        warn!(%member_id, %period, "payment row for unknown member quarantined");
                        quarantined += 1;
                    }
                    (_, Err(e)) => {
                        warn!(%member_id, error = %e, "payment row quarantined");
                        quarantined += 1;
                    }
                }
            }
        }

        let auto_pay = {
            let mut stmt = self.conn.prepare("SELECT member_id FROM auto_pay ORDER BY member_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let links = {
            let mut stmt = self
                .conn
                .prepare("SELECT secondary_id, primary_id FROM account_links")?;
            let edges = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            edges
        };

        self.quarantined = quarantined;
        debug!(members = members.len(), quarantined, "ledger loaded from sqlite");

        Ok(Some(LedgerSnapshot {
            members: members.into_values().collect(),
            config: LedgerConfig { due_day },
            auto_pay,
            links,
        }))
    }

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM payments", [])?;
        tx.execute("DELETE FROM members", [])?;
        tx.execute("DELETE FROM auto_pay", [])?;
        tx.execute("DELETE FROM account_links", [])?;

        for member in &snapshot.members {
            tx.execute(
                "INSERT INTO members (id, display_name) VALUES (?1, ?2)",
                params![member.id, member.display_name],
            )?;
            for (period, paid) in &member.payments {
                tx.execute(
                    "INSERT INTO payments (member_id, period, paid) VALUES (?1, ?2, ?3)",
                    params![member.id, period.to_string(), if *paid { 1_i64 } else { 0_i64 }],
                )?;
            }
        }

        for id in &snapshot.auto_pay {
            tx.execute("INSERT OR IGNORE INTO auto_pay (member_id) VALUES (?1)", params![id])?;
        }

        for (secondary, primary) in &snapshot.links {
            tx.execute(
                "INSERT INTO account_links (secondary_id, primary_id) VALUES (?1, ?2)",
                params![secondary, primary],
            )?;
        }

        tx.execute(
            "INSERT INTO config (key, value) VALUES ('due_day', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![snapshot.config.due_day.to_string()],
        )?;
        tx.execute(
            "INSERT INTO config (key, value) VALUES ('saved_at', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn record_event(&mut self, event: &LedgerEvent) -> Result<(), PersistenceError> {
        let data_json = serde_json::to_string(&event.data)?;

        self.conn.execute(
            "INSERT INTO events (event_id, timestamp, event_type, entity_id, data, actor)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.event_id,
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.entity_id,
                data_json,
                event.actor,
            ],
        )?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn quarantined_rows(&self) -> usize {
        self.quarantined
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> LedgerSnapshot {
        let mut alice = Member::new("1", "alice");
        alice.mark("2025-01".parse().unwrap(), true);
        alice.mark("2025-02".parse().unwrap(), false);
        let bob = Member::new("2", "bob");

        let mut links = BTreeMap::new();
        links.insert("3".to_string(), "1".to_string());

        LedgerSnapshot {
            members: vec![alice, bob],
            config: LedgerConfig { due_day: 15 },
            auto_pay: vec!["2".to_string()],
            links,
        }
    }

    #[test]
    fn test_fresh_database_loads_as_none() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_all_relations() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let snapshot = sample_snapshot();

        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded, snapshot);
        assert_eq!(store.quarantined_rows(), 0);
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.save(&sample_snapshot()).unwrap();

        let smaller = LedgerSnapshot {
            members: vec![Member::new("9", "zed")],
            ..Default::default()
        };
        store.save(&smaller).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.members.len(), 1);
        assert!(loaded.links.is_empty());
        assert!(loaded.auto_pay.is_empty());
        assert_eq!(loaded.config.due_day, 10);
    }

    #[test]
    fn test_malformed_payment_rows_are_quarantined() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.save(&sample_snapshot()).unwrap();

        store
            .conn
            .execute(
                "INSERT INTO payments (member_id, period, paid) VALUES ('1', 'not-a-month', 1)",
                [],
            )
            .unwrap();
        store
            .conn
            .execute(
                "INSERT INTO payments (member_id, period, paid) VALUES ('ghost', '2025-01', 1)",
                [],
            )
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(store.quarantined_rows(), 2);
        assert_eq!(loaded.members[0].payments.len(), 2);
    }

    #[test]
    fn test_event_log() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let event = LedgerEvent::new(
            "payment_registered",
            "1",
            serde_json::json!({"period": "2025-02"}),
            "1",
        );
        store.record_event(&event).unwrap();

        let events = store.events_for("1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "payment_registered");
        assert_eq!(events[0].data["period"], "2025-02");
        assert!(store.events_for("2").unwrap().is_empty());
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.save(&sample_snapshot()).unwrap();
        }

        let mut reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap().unwrap(), sample_snapshot());
    }
}
