//! SQLite-based store implementation

use chrono::{DateTime, Local, NaiveDate};
use curfew_util::{PackageId, day_key, parse_day_key};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{AuditEvent, Store, StoreError, StoreResult, WalletRecord};

const LAST_RESET_KEY: &str = "last_reset_date";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Usage ledger
            CREATE TABLE IF NOT EXISTS usage (
                package_id TEXT NOT NULL,
                day TEXT NOT NULL,
                used_ms INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (package_id, day)
            );

            -- Wallets (remaining_ms NULL marks an exhausted tombstone)
            CREATE TABLE IF NOT EXISTS wallets (
                package_id TEXT PRIMARY KEY,
                remaining_ms INTEGER,
                last_remote_ms INTEGER NOT NULL DEFAULT 0
            );

            -- Cached daily limits
            CREATE TABLE IF NOT EXISTS limits (
                package_id TEXT PRIMARY KEY,
                limit_ms INTEGER NOT NULL
            );

            -- Selected-package set
            CREATE TABLE IF NOT EXISTS selection (
                package_id TEXT PRIMARY KEY
            );

            -- Key/value metadata
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_usage_day ON usage(day);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn to_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn from_ms(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| curfew_util::now());
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn get_usage(&self, package: &PackageId, day: NaiveDate) -> StoreResult<Duration> {
        let conn = self.conn()?;

        let ms: Option<i64> = conn
            .query_row(
                "SELECT used_ms FROM usage WHERE package_id = ? AND day = ?",
                params![package.as_str(), day_key(day)],
                |row| row.get(0),
            )
            .optional()?;

        Ok(from_ms(ms.unwrap_or(0)))
    }

    fn set_usage(&self, package: &PackageId, day: NaiveDate, used: Duration) -> StoreResult<()> {
        let conn = self.conn()?;
        let day_str = day_key(day);
        let ms = to_ms(used);

        conn.execute(
            r#"
            INSERT INTO usage (package_id, day, used_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(package_id, day)
            DO UPDATE SET used_ms = excluded.used_ms
            "#,
            params![package.as_str(), day_str, ms],
        )?;

        debug!(package = %package, day = %day_str, used_ms = ms, "Usage saved");
        Ok(())
    }

    fn load_usage(&self, day: NaiveDate) -> StoreResult<HashMap<PackageId, Duration>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare("SELECT package_id, used_ms FROM usage WHERE day = ?")?;
        let rows = stmt.query_map([day_key(day)], |row| {
            let id: String = row.get(0)?;
            let ms: i64 = row.get(1)?;
            Ok((PackageId::new(id), from_ms(ms)))
        })?;

        let mut usage = HashMap::new();
        for row in rows {
            let (id, used) = row?;
            usage.insert(id, used);
        }
        Ok(usage)
    }

    fn get_last_reset_day(&self) -> StoreResult<Option<NaiveDate>> {
        let conn = self.conn()?;

        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?",
                [LAST_RESET_KEY],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value.and_then(|s| {
            let day = parse_day_key(&s);
            if day.is_none() {
                warn!(value = %s, "Ignoring unparseable last reset date");
            }
            day
        }))
    }

    fn commit_reset(&self, day: NaiveDate) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let day_str = day_key(day);

        let tx = conn.transaction()?;
        // Day keys are ISO dates, so string order is calendar order
        let pruned = tx.execute("DELETE FROM usage WHERE day < ?", [&day_str])?;
        let tombstones = tx.execute("DELETE FROM wallets WHERE remaining_ms IS NULL", [])?;
        tx.execute(
            r#"
            INSERT INTO meta (key, value)
            VALUES (?, ?)
            ON CONFLICT(key)
            DO UPDATE SET value = excluded.value
            "#,
            params![LAST_RESET_KEY, day_str],
        )?;
        tx.commit()?;

        debug!(
            day = %day_str,
            pruned_rows = pruned,
            tombstones,
            "Daily reset committed"
        );
        Ok(())
    }

    fn load_wallets(&self) -> StoreResult<HashMap<PackageId, WalletRecord>> {
        let conn = self.conn()?;

        let mut stmt =
            conn.prepare("SELECT package_id, remaining_ms, last_remote_ms FROM wallets")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let ms: Option<i64> = row.get(1)?;
            let last_remote_ms: i64 = row.get(2)?;
            Ok((id, ms, last_remote_ms))
        })?;

        let mut wallets = HashMap::new();
        for row in rows {
            let (id, ms, last_remote_ms) = row?;
            let record = match ms {
                Some(ms) => WalletRecord::Remaining(from_ms(ms)),
                None => WalletRecord::Exhausted {
                    last_remote: from_ms(last_remote_ms),
                },
            };
            wallets.insert(PackageId::new(id), record);
        }
        Ok(wallets)
    }

    fn save_wallet(&self, package: &PackageId, record: &WalletRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        let (ms, last_remote_ms) = match record {
            WalletRecord::Remaining(d) => (Some(to_ms(*d)), 0),
            WalletRecord::Exhausted { last_remote } => (None, to_ms(*last_remote)),
        };

        conn.execute(
            r#"
            INSERT INTO wallets (package_id, remaining_ms, last_remote_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(package_id)
            DO UPDATE SET remaining_ms = excluded.remaining_ms,
                          last_remote_ms = excluded.last_remote_ms
            "#,
            params![package.as_str(), ms, last_remote_ms],
        )?;

        Ok(())
    }

    fn delete_wallet(&self, package: &PackageId) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM wallets WHERE package_id = ?", [package.as_str()])?;
        Ok(())
    }

    fn load_limits(&self) -> StoreResult<HashMap<PackageId, Duration>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare("SELECT package_id, limit_ms FROM limits")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let ms: i64 = row.get(1)?;
            Ok((PackageId::new(id), from_ms(ms)))
        })?;

        let mut limits = HashMap::new();
        for row in rows {
            let (id, limit) = row?;
            limits.insert(id, limit);
        }
        Ok(limits)
    }

    fn save_limit(&self, package: &PackageId, limit: Duration) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO limits (package_id, limit_ms)
            VALUES (?, ?)
            ON CONFLICT(package_id)
            DO UPDATE SET limit_ms = excluded.limit_ms
            "#,
            params![package.as_str(), to_ms(limit)],
        )?;

        Ok(())
    }

    fn load_selection(&self) -> StoreResult<Vec<PackageId>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare("SELECT package_id FROM selection ORDER BY package_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut packages = Vec::new();
        for row in rows {
            packages.push(PackageId::new(row?));
        }
        Ok(packages)
    }

    fn save_selection(&self, packages: &[PackageId]) -> StoreResult<()> {
        let mut conn = self.conn()?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM selection", [])?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO selection (package_id) VALUES (?)")?;
            for package in packages {
                stmt.execute([package.as_str()])?;
            }
        }
        tx.commit()?;

        debug!(count = packages.len(), "Selection saved");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
