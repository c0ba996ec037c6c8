// 🗄️ SQLite Backend - profiles, patient records and the audit trail
//
// Plays the external backend locally: reads for both sources, partial
// account updates, and a change event after every successful write.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::entities::{AccountRow, AccountUpdate, RecordRow};
use crate::realtime::{ChangeEvent, ChangeHub};
use crate::sources::{AccountsSource, AccountsWriter, RecordsSource};

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases stay "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Profiles (login-capable accounts)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            name TEXT,
            email TEXT,
            status TEXT,
            status_changed_at TEXT,
            inactivated_at TEXT,
            auto_eval_enabled INTEGER,
            role TEXT,
            created_at TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Patient records (entered by the studio, may have no account)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS patient_records (
            id TEXT PRIMARY KEY,
            name TEXT,
            email TEXT,
            created_at TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profiles_email ON profiles(lower(trim(email)))",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_created ON patient_records(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Load rows from a CSV file with a header line
pub fn load_csv<T: DeserializeOwned>(csv_path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let row: T = result.with_context(|| format!("Failed to deserialize row {}", line + 1))?;
        rows.push(row);
    }

    Ok(rows)
}

// ============================================================================
// TIMESTAMP COLUMNS (RFC 3339 text)
// ============================================================================

fn ts_to_sql(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

/// Nullable timestamp column; unparseable text is an error, not a NULL
fn ts_from_sql(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn account_from_row(row: &Row) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        status: row.get(3)?,
        status_changed_at: ts_from_sql(row, 4)?,
        inactivated_at: ts_from_sql(row, 5)?,
        auto_eval_enabled: row.get(6)?,
        role: row.get(7)?,
        created_at: ts_from_sql(row, 8)?,
    })
}

fn record_from_row(row: &Row) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: ts_from_sql(row, 3)?,
    })
}

fn write_event(conn: &Connection, event: &Event) -> Result<()> {
    conn.execute(
        "INSERT INTO events (event_id, timestamp, event_type, entity_type, entity_id, data, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            event.data.to_string(),
            event.actor,
        ],
    )
    .with_context(|| format!("Failed to record {} event", event.event_type))?;
    Ok(())
}

/// Insert or update a patient record, keeping the stored creation time when
/// the incoming row has none
fn write_record(conn: &Connection, record: &RecordRow) -> Result<()> {
    conn.execute(
        "INSERT INTO patient_records (id, name, email, created_at)
         VALUES (?1, ?2, ?3, COALESCE(?4, ?5))
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            email = excluded.email,
            created_at = COALESCE(?4, patient_records.created_at)",
        params![
            record.id,
            record.name,
            record.email,
            ts_to_sql(record.created_at),
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to write patient record {}", record.id))?;
    Ok(())
}

const RECORD_COLUMNS: &str = "id, name, email, created_at";

fn read_record(conn: &Connection, id: &str) -> Result<RecordRow> {
    conn.query_row(
        &format!("SELECT {} FROM patient_records WHERE id = ?1", RECORD_COLUMNS),
        params![id],
        record_from_row,
    )
    .with_context(|| format!("Failed to read patient record {}", id))
}

const ACCOUNT_COLUMNS: &str = "id, name, email, status, status_changed_at, inactivated_at, \
                               auto_eval_enabled, role, created_at";

// ============================================================================
// BACKEND
// ============================================================================

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    hub: Option<ChangeHub>,
}

impl SqliteBackend {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteBackend {
            conn: Mutex::new(conn),
            hub: None,
        })
    }

    /// Publish a change event to `hub` after every successful write
    pub fn with_change_hub(mut self, hub: ChangeHub) -> Self {
        self.hub = Some(hub);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(hub) = &self.hub {
            hub.publish(event);
        }
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    /// Insert or overwrite a profile row. A row without `created_at` keeps
    /// the stored creation time (new rows are stamped now).
    pub fn upsert_account(&self, account: &AccountRow) -> Result<()> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO profiles (id, name, email, status, status_changed_at,
                    inactivated_at, auto_eval_enabled, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, COALESCE(?9, ?10))
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    status = excluded.status,
                    status_changed_at = excluded.status_changed_at,
                    inactivated_at = excluded.inactivated_at,
                    auto_eval_enabled = excluded.auto_eval_enabled,
                    role = excluded.role,
                    created_at = COALESCE(?9, profiles.created_at)",
                params![
                    account.id,
                    account.name,
                    account.email,
                    account.status,
                    ts_to_sql(account.status_changed_at),
                    ts_to_sql(account.inactivated_at),
                    account.auto_eval_enabled,
                    account.role,
                    ts_to_sql(account.created_at),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to write profile {}", account.id))?;
        }

        if let Some(stored) = self.get_account(&account.id)? {
            self.publish(ChangeEvent::AccountUpserted(stored));
        }
        Ok(())
    }

    pub fn get_account(&self, id: &str) -> Result<Option<AccountRow>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM profiles WHERE id = ?1", ACCOUNT_COLUMNS),
                params![id],
                account_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to read profile {}", id))?;
        Ok(row)
    }

    pub fn delete_account(&self, id: &str) -> Result<bool> {
        let deleted = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM profiles WHERE id = ?1", params![id])?
        };
        if deleted > 0 {
            self.publish(ChangeEvent::AccountRemoved {
                account_id: id.to_string(),
            });
        }
        Ok(deleted > 0)
    }

    fn all_accounts(&self) -> Result<Vec<AccountRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM profiles ORDER BY name",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read profiles")?;
        Ok(rows)
    }

    fn role_of(&self, id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let role: Option<Option<String>> = conn
            .query_row(
                "SELECT role FROM profiles WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(role.flatten())
    }

    fn apply_update(&self, account_id: &str, update: &AccountUpdate, actor: &str) -> Result<()> {
        if update.is_empty() {
            debug!(account_id, "empty account update, nothing to write");
            return Ok(());
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(changed_at) = update.status_changed_at {
            sets.push("status_changed_at = ?");
            values.push(Value::Text(changed_at.to_rfc3339()));
        }
        if let Some(inactivated_at) = update.inactivated_at {
            sets.push("inactivated_at = ?");
            values.push(match inactivated_at {
                Some(ts) => Value::Text(ts.to_rfc3339()),
                None => Value::Null,
            });
        }
        if let Some(enabled) = update.auto_eval_enabled {
            sets.push("auto_eval_enabled = ?");
            values.push(Value::Integer(enabled as i64));
        }
        values.push(Value::Text(account_id.to_string()));

        let sql = format!("UPDATE profiles SET {} WHERE id = ?", sets.join(", "));
        let event = Event::new(
            "account_updated",
            "account",
            account_id,
            serde_json::to_value(update)?,
            actor,
        );

        // Profile change and its audit event commit together or not at all
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let changed = tx
                .execute(&sql, params_from_iter(values.iter()))
                .with_context(|| format!("Failed to update profile {}", account_id))?;
            if changed == 0 {
                return Err(anyhow!("profile {} not found", account_id));
            }
            write_event(&tx, &event)?;
            tx.commit()
                .with_context(|| format!("Failed to commit update of profile {}", account_id))?;
        }

        if let Some(stored) = self.get_account(account_id)? {
            self.publish(ChangeEvent::AccountUpserted(stored));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Patient records
    // ------------------------------------------------------------------------

    /// Insert or update a patient record; blank ids get a fresh UUID.
    /// Returns the row as stored.
    pub fn upsert_record(&self, record: &RecordRow) -> Result<RecordRow> {
        let mut record = record.clone();
        if record.id.trim().is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }

        let stored = {
            let conn = self.lock()?;
            write_record(&conn, &record)?;
            read_record(&conn, &record.id)?
        };

        self.publish(ChangeEvent::RecordUpserted(stored.clone()));
        Ok(stored)
    }

    /// Register a new patient record on behalf of `actor`
    pub fn register_record(
        &self,
        name: Option<String>,
        email: Option<String>,
        actor: &str,
    ) -> Result<RecordRow> {
        let record = RecordRow::register(name, email);
        let event = Event::new(
            "record_registered",
            "record",
            &record.id,
            serde_json::to_value(&record)?,
            actor,
        );

        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            write_record(&tx, &record)?;
            write_event(&tx, &event)?;
            tx.commit()
                .with_context(|| format!("Failed to commit patient record {}", record.id))?;
        }

        self.publish(ChangeEvent::RecordUpserted(record.clone()));
        info!(record_id = %record.id, actor, "patient record registered");
        Ok(record)
    }

    pub fn delete_record(&self, id: &str) -> Result<bool> {
        let deleted = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM patient_records WHERE id = ?1", params![id])?
        };
        if deleted > 0 {
            self.publish(ChangeEvent::RecordRemoved {
                record_id: id.to_string(),
            });
        }
        Ok(deleted > 0)
    }

    fn all_records(&self) -> Result<Vec<RecordRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM patient_records ORDER BY created_at DESC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read patient records")?;
        Ok(rows)
    }

    // ------------------------------------------------------------------------
    // Bulk import
    // ------------------------------------------------------------------------

    pub fn import_accounts(&self, accounts: &[AccountRow]) -> Result<usize> {
        for account in accounts {
            self.upsert_account(account)?;
        }
        info!(count = accounts.len(), "imported profiles");
        Ok(accounts.len())
    }

    pub fn import_records(&self, records: &[RecordRow]) -> Result<usize> {
        for record in records {
            self.upsert_record(record)?;
        }
        info!(count = records.len(), "imported patient records");
        Ok(records.len())
    }

    // ------------------------------------------------------------------------
    // Audit trail
    // ------------------------------------------------------------------------

    pub fn get_events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![entity_type, entity_id], |row| {
            let timestamp: String = row.get(1)?;
            let data: String = row.get(5)?;
            Ok((
                row.get::<_, String>(0)?,
                timestamp,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                data,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (event_id, timestamp, event_type, entity_type, entity_id, data, actor) = row?;
            events.push(Event {
                event_id,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .context("Invalid event timestamp")?
                    .with_timezone(&Utc),
                event_type,
                entity_type,
                entity_id,
                data: serde_json::from_str(&data).context("Invalid event payload")?,
                actor,
            });
        }
        Ok(events)
    }
}

#[async_trait]
impl AccountsSource for SqliteBackend {
    async fn list_accounts(&self) -> Result<Vec<AccountRow>> {
        self.all_accounts()
    }

    async fn find_role(&self, account_id: &str) -> Result<Option<String>> {
        self.role_of(account_id)
    }
}

#[async_trait]
impl RecordsSource for SqliteBackend {
    async fn list_records(&self) -> Result<Vec<RecordRow>> {
        self.all_records()
    }
}

#[async_trait]
impl AccountsWriter for SqliteBackend {
    async fn update_account(
        &self,
        account_id: &str,
        update: &AccountUpdate,
        actor: &str,
    ) -> Result<()> {
        self.apply_update(account_id, update, actor)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryAggregator;
    use crate::entities::{Identity, StudentStatus};
    use crate::session::SessionContext;
    use std::io::Write;
    use std::sync::Arc;

    fn seeded() -> SqliteBackend {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .upsert_account(&AccountRow {
                id: "admin-1".into(),
                name: Some("Paula".into()),
                email: Some("paula@studio.com".into()),
                role: Some("admin".into()),
                ..Default::default()
            })
            .unwrap();
        backend
            .upsert_account(&AccountRow {
                id: "1".into(),
                name: Some("Ana".into()),
                email: Some("a@x.com".into()),
                status: Some("Ativo".into()),
                ..Default::default()
            })
            .unwrap();
        backend
    }

    #[test]
    fn test_account_round_trip() {
        let backend = seeded();
        let row = backend.get_account("1").unwrap().unwrap();
        assert_eq!(row.name.as_deref(), Some("Ana"));
        assert_eq!(row.status.as_deref(), Some("Ativo"));
        assert!(row.created_at.is_some());
        assert!(row.auto_eval_enabled.is_none());
        assert!(backend.get_account("missing").unwrap().is_none());
    }

    #[test]
    fn test_partial_update_touches_only_given_columns() {
        let backend = seeded();
        let now = Utc::now();

        backend
            .apply_update("1", &AccountUpdate::status_change(StudentStatus::Inactive, now), "admin-1")
            .unwrap();
        backend
            .apply_update("1", &AccountUpdate::self_eval(true), "admin-1")
            .unwrap();

        let row = backend.get_account("1").unwrap().unwrap();
        assert_eq!(row.status.as_deref(), Some("Inativo"));
        assert_eq!(row.auto_eval_enabled, Some(true));
        assert!(row.inactivated_at.is_some());
        assert_eq!(row.name.as_deref(), Some("Ana"));

        backend
            .apply_update("1", &AccountUpdate::status_change(StudentStatus::Active, now), "admin-1")
            .unwrap();
        let row = backend.get_account("1").unwrap().unwrap();
        assert!(row.inactivated_at.is_none());
        assert_eq!(row.auto_eval_enabled, Some(true));
    }

    #[test]
    fn test_update_missing_profile_fails() {
        let backend = seeded();
        let err = backend
            .apply_update("404", &AccountUpdate::self_eval(true), "admin-1")
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_updates_are_audited() {
        let backend = seeded();
        backend
            .apply_update("1", &AccountUpdate::self_eval(true), "admin-1")
            .unwrap();

        let events = backend.get_events_for_entity("account", "1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "account_updated");
        assert_eq!(events[0].actor, "admin-1");
        assert_eq!(events[0].data["auto_eval_enabled"], true);
    }

    #[test]
    fn test_failed_audit_rolls_back_profile_update() {
        let backend = seeded();
        backend
            .lock()
            .unwrap()
            .execute("DROP TABLE events", [])
            .unwrap();

        let result = backend.apply_update(
            "1",
            &AccountUpdate::status_change(StudentStatus::Inactive, Utc::now()),
            "admin-1",
        );
        assert!(result.is_err());

        let row = backend.get_account("1").unwrap().unwrap();
        assert_eq!(row.status.as_deref(), Some("Ativo"));
        assert!(row.status_changed_at.is_none());
        assert!(row.inactivated_at.is_none());
    }

    #[test]
    fn test_failed_audit_rolls_back_record_registration() {
        let backend = seeded();
        backend
            .lock()
            .unwrap()
            .execute("DROP TABLE events", [])
            .unwrap();

        assert!(backend
            .register_record(Some("Bea".into()), None, "admin-1")
            .is_err());
        assert!(backend.all_records().unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_timestamp_is_an_error() {
        let backend = seeded();
        backend
            .lock()
            .unwrap()
            .execute("UPDATE profiles SET created_at = 'março' WHERE id = '1'", [])
            .unwrap();

        let err = backend.all_accounts().unwrap_err();
        assert!(err.to_string().contains("Failed to read profiles"));
        assert!(backend.get_account("1").is_err());
    }

    #[test]
    fn test_reimport_keeps_creation_time() {
        let backend = SqliteBackend::in_memory().unwrap();
        let created = DateTime::parse_from_rfc3339("2024-02-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        backend
            .upsert_account(&AccountRow {
                id: "1".into(),
                name: Some("Ana".into()),
                created_at: Some(created),
                ..Default::default()
            })
            .unwrap();
        backend
            .upsert_account(&AccountRow {
                id: "1".into(),
                name: Some("Ana Lima".into()),
                ..Default::default()
            })
            .unwrap();

        let row = backend.get_account("1").unwrap().unwrap();
        assert_eq!(row.name.as_deref(), Some("Ana Lima"));
        assert_eq!(row.created_at, Some(created));

        backend
            .upsert_record(&RecordRow {
                id: "9".into(),
                created_at: Some(created),
                ..Default::default()
            })
            .unwrap();
        let stored = backend
            .upsert_record(&RecordRow {
                id: "9".into(),
                name: Some("Bea".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(stored.created_at, Some(created));
        assert_eq!(stored.name.as_deref(), Some("Bea"));
    }

    #[test]
    fn test_register_record_assigns_id() {
        let backend = seeded();
        let record = backend
            .register_record(Some("Bea".into()), Some("b@x.com".into()), "admin-1")
            .unwrap();

        assert!(!record.id.is_empty());
        let records = backend.all_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, record.id);
        assert_eq!(
            backend.get_events_for_entity("record", &record.id).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_writes_publish_change_events() {
        let hub = ChangeHub::default();
        let mut sub = hub.subscribe();
        let backend = SqliteBackend::in_memory().unwrap().with_change_hub(hub);

        backend
            .upsert_account(&AccountRow {
                id: "1".into(),
                ..Default::default()
            })
            .unwrap();
        backend.delete_account("1").unwrap();
        let record = backend
            .upsert_record(&RecordRow {
                id: "9".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(backend.delete_record("9").unwrap());
        assert!(!backend.delete_record("9").unwrap());

        assert!(matches!(sub.next().await, Some(ChangeEvent::AccountUpserted(ref row)) if row.id == "1"));
        assert_eq!(
            sub.next().await,
            Some(ChangeEvent::AccountRemoved { account_id: "1".into() })
        );
        assert_eq!(sub.next().await, Some(ChangeEvent::RecordUpserted(record)));
        assert_eq!(
            sub.next().await,
            Some(ChangeEvent::RecordRemoved { record_id: "9".into() })
        );
        assert!(backend.all_records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_aggregator_over_sqlite() {
        let backend = Arc::new(seeded());
        backend
            .upsert_record(&RecordRow {
                id: "9".into(),
                name: Some("Ana (ficha)".into()),
                email: Some(" A@X.COM ".into()),
                created_at: None,
            })
            .unwrap();
        backend
            .upsert_record(&RecordRow {
                id: "10".into(),
                name: Some("Bea".into()),
                email: None,
                created_at: None,
            })
            .unwrap();

        let agg = DirectoryAggregator::from_backend(backend.clone());
        let session = SessionContext::resolve(agg.accounts(), "admin-1").await.unwrap();
        assert!(session.is_admin());

        let snapshot = agg.load(&session).await.unwrap();
        let ids: Vec<String> = snapshot.entries.iter().map(|e| e.identity.to_string()).collect();
        assert_eq!(ids, vec!["account:1", "record:10"]);

        let id = Identity::Account("1".into());
        let next = agg
            .apply_status_change(&session, &snapshot, &id, StudentStatus::Paused)
            .await
            .unwrap();
        assert_eq!(next.get(&id).unwrap().status, StudentStatus::Paused);

        let stored = backend.get_account("1").unwrap().unwrap();
        assert_eq!(stored.status.as_deref(), Some("Pausado"));
        assert!(stored.status_changed_at.is_some());
    }

    #[tokio::test]
    async fn test_student_session_is_denied() {
        let backend = Arc::new(seeded());
        let agg = DirectoryAggregator::from_backend(backend);

        let session = SessionContext::resolve(agg.accounts(), "1").await.unwrap();
        assert!(!session.is_admin());
        assert!(agg.load(&session).await.is_err());
    }

    #[test]
    fn test_load_csv_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name,email,created_at").unwrap();
        writeln!(file, "9,Bea,b@x.com,2025-03-01T10:00:00Z").unwrap();
        writeln!(file, ",Caio,,").unwrap();

        let rows: Vec<RecordRow> = load_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].email.as_deref(), Some("b@x.com"));
        assert!(rows[0].created_at.is_some());
        assert!(rows[1].email.is_none());

        let backend = SqliteBackend::in_memory().unwrap();
        assert_eq!(backend.import_records(&rows).unwrap(), 2);
        let stored = backend.all_records().unwrap();
        assert!(stored.iter().all(|r| !r.id.is_empty() && r.created_at.is_some()));
    }
}
