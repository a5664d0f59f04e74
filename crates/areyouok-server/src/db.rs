//! SQLite persistence layer.
//!
//! Implements [`RegistryStore`] so the registry survives restarts. Each
//! commit runs in one transaction. Amounts are stored as decimal TEXT since
//! they exceed SQLite's 64-bit integers; events are stored as JSON.

use areyouok_core::{
    Amount, EventRecord, Identity, RegistryEntry, RegistryStore, StoreError, StoredRegistry,
    SwitchId, SwitchSnapshot,
};
use rusqlite::{params, Connection, Result as SqlResult, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid column {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Sqlite(e) => StoreError::Backend(e.to_string()),
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

/// Open (or create) the database at `path` and run migrations.
pub fn open_db(path: &Path) -> SqlResult<Connection> {
    let conn = Connection::open(path)?;

    // WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS registry_entries (
            position    INTEGER PRIMARY KEY,
            switch_id   TEXT NOT NULL UNIQUE,
            owner       TEXT NOT NULL,
            beneficiary TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS switches (
            switch_id         TEXT PRIMARY KEY,
            owner             TEXT NOT NULL,
            beneficiary       TEXT NOT NULL,
            balance           TEXT NOT NULL,
            last_check_in     INTEGER NOT NULL,
            check_in_interval INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            seq       INTEGER PRIMARY KEY,
            switch_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            kind      TEXT NOT NULL,
            payload   TEXT NOT NULL
        );
        ",
    )?;

    migrate_indexes(&conn)?;

    Ok(conn)
}

/// Lookup indexes for per-switch event history.
fn migrate_indexes(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS events_by_switch ON events (switch_id, seq);",
    )
}

// Timestamps and intervals are u64; the cast to i64 and back is lossless.
fn to_sql_int(v: u64) -> i64 {
    v as i64
}

fn from_sql_int(v: i64) -> u64 {
    v as u64
}

fn parse_identity(column: &'static str, value: String) -> Result<Identity, DbError> {
    value
        .parse()
        .map_err(|_| DbError::InvalidColumn { column, value })
}

fn parse_switch_id(column: &'static str, value: String) -> Result<SwitchId, DbError> {
    value
        .parse()
        .map_err(|_| DbError::InvalidColumn { column, value })
}

fn parse_amount(value: String) -> Result<Amount, DbError> {
    value.parse().map_err(|_| DbError::InvalidColumn {
        column: "balance",
        value,
    })
}

// ============================================================================
// Row helpers
// ============================================================================

fn insert_entry(tx: &Transaction<'_>, position: i64, entry: &RegistryEntry) -> SqlResult<()> {
    tx.execute(
        "INSERT INTO registry_entries (position, switch_id, owner, beneficiary, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            position,
            entry.switch_id.to_string(),
            entry.owner.to_string(),
            entry.beneficiary.to_string(),
            to_sql_int(entry.created_at)
        ],
    )?;
    Ok(())
}

fn upsert_switch(tx: &Transaction<'_>, switch_id: SwitchId, state: &SwitchSnapshot) -> SqlResult<()> {
    tx.execute(
        "INSERT INTO switches (switch_id, owner, beneficiary, balance, last_check_in, check_in_interval)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(switch_id) DO UPDATE SET
            owner = excluded.owner,
            beneficiary = excluded.beneficiary,
            balance = excluded.balance,
            last_check_in = excluded.last_check_in,
            check_in_interval = excluded.check_in_interval",
        params![
            switch_id.to_string(),
            state.owner.to_string(),
            state.beneficiary.to_string(),
            state.balance.to_string(),
            to_sql_int(state.last_check_in),
            to_sql_int(state.check_in_interval)
        ],
    )?;
    Ok(())
}

fn insert_event(tx: &Transaction<'_>, record: &EventRecord) -> Result<(), DbError> {
    let payload = serde_json::to_string(&record.event)?;
    tx.execute(
        "INSERT INTO events (seq, switch_id, timestamp, kind, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            to_sql_int(record.seq),
            record.switch_id.to_string(),
            to_sql_int(record.timestamp),
            record.event.kind(),
            payload
        ],
    )?;
    Ok(())
}

fn load_entries(conn: &Connection) -> Result<Vec<RegistryEntry>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT switch_id, owner, beneficiary, created_at
         FROM registry_entries ORDER BY position",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (switch_id, owner, beneficiary, created_at) = row?;
        entries.push(RegistryEntry {
            switch_id: parse_switch_id("registry_entries.switch_id", switch_id)?,
            owner: parse_identity("registry_entries.owner", owner)?,
            beneficiary: parse_identity("registry_entries.beneficiary", beneficiary)?,
            created_at: from_sql_int(created_at),
        });
    }
    Ok(entries)
}

fn load_switches(conn: &Connection) -> Result<HashMap<SwitchId, SwitchSnapshot>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT switch_id, owner, beneficiary, balance, last_check_in, check_in_interval
         FROM switches",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;

    let mut switches = HashMap::new();
    for row in rows {
        let (switch_id, owner, beneficiary, balance, last_check_in, interval) = row?;
        switches.insert(
            parse_switch_id("switches.switch_id", switch_id)?,
            SwitchSnapshot {
                owner: parse_identity("switches.owner", owner)?,
                beneficiary: parse_identity("switches.beneficiary", beneficiary)?,
                balance: parse_amount(balance)?,
                last_check_in: from_sql_int(last_check_in),
                check_in_interval: from_sql_int(interval),
            },
        );
    }
    Ok(switches)
}

fn load_last_seq(conn: &Connection) -> Result<u64, DbError> {
    let seq: i64 = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM events", [], |row| {
        row.get(0)
    })?;
    Ok(from_sql_int(seq))
}

fn load_events_since(conn: &Connection, cursor: u64) -> Result<Vec<EventRecord>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT seq, switch_id, timestamp, payload FROM events WHERE seq > ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![to_sql_int(cursor)], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (seq, switch_id, timestamp, payload) = row?;
        events.push(EventRecord {
            seq: from_sql_int(seq),
            switch_id: parse_switch_id("events.switch_id", switch_id)?,
            timestamp: from_sql_int(timestamp),
            event: serde_json::from_str(&payload)?,
        });
    }
    Ok(events)
}

// ============================================================================
// Store
// ============================================================================

/// [`RegistryStore`] backed by a SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        Ok(Self {
            conn: Mutex::new(open_db(path)?),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_all(&self) -> Result<StoredRegistry, DbError> {
        let conn = self.conn();
        Ok(StoredRegistry {
            entries: load_entries(&conn)?,
            switches: load_switches(&conn)?,
            last_seq: load_last_seq(&conn)?,
        })
    }

    fn write_creation(
        &self,
        entry: &RegistryEntry,
        state: &SwitchSnapshot,
        events: &[EventRecord],
    ) -> Result<(), DbError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let position: i64 =
            tx.query_row("SELECT COUNT(*) FROM registry_entries", [], |row| row.get(0))?;
        insert_entry(&tx, position, entry)?;
        upsert_switch(&tx, entry.switch_id, state)?;
        for record in events {
            insert_event(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn write_commit(
        &self,
        switch_id: SwitchId,
        state: &SwitchSnapshot,
        event: &EventRecord,
    ) -> Result<(), DbError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let known: i64 = tx.query_row(
            "SELECT COUNT(*) FROM switches WHERE switch_id = ?1",
            params![switch_id.to_string()],
            |row| row.get(0),
        )?;
        if known == 0 {
            return Err(DbError::InvalidColumn {
                column: "switches.switch_id",
                value: format!("{} not stored", switch_id),
            });
        }
        upsert_switch(&tx, switch_id, state)?;
        insert_event(&tx, event)?;
        tx.commit()?;
        Ok(())
    }
}

impl RegistryStore for SqliteStore {
    fn load(&self) -> Result<StoredRegistry, StoreError> {
        Ok(self.load_all()?)
    }

    fn events_since(&self, cursor: u64) -> Result<Vec<EventRecord>, StoreError> {
        Ok(load_events_since(&self.conn(), cursor)?)
    }

    fn commit_creation(
        &self,
        entry: &RegistryEntry,
        state: &SwitchSnapshot,
        events: &[EventRecord],
    ) -> Result<(), StoreError> {
        Ok(self.write_creation(entry, state, events)?)
    }

    fn commit(
        &self,
        switch_id: SwitchId,
        state: &SwitchSnapshot,
        event: &EventRecord,
    ) -> Result<(), StoreError> {
        Ok(self.write_commit(switch_id, state, event)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
