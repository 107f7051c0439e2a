//! SQLite-based store implementation

use chrono::{DateTime, Local};
use galley_api::{Order, TimerKey};
use galley_util::OrderId;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{AuditEvent, Store, StoreError, StoreResult, TimerSnapshot};

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

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Latest known copy of each order
            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                order_json TEXT NOT NULL
            );

            -- Running timers
            CREATE TABLE IF NOT EXISTS timers (
                timer_key TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                timer_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
            CREATE INDEX IF NOT EXISTS idx_timers_order ON timers(order_id);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.lock()?;
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
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
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
                .unwrap_or_else(|_| galley_util::now());
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn load_orders(&self) -> StoreResult<Vec<Order>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT order_json FROM orders ORDER BY order_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut orders = Vec::new();
        for row in rows {
            let json = row?;
            match serde_json::from_str::<Order>(&json) {
                Ok(order) => orders.push(order),
                Err(e) => warn!(error = %e, "Skipping unreadable stored order"),
            }
        }

        debug!(count = orders.len(), "Orders loaded from store");
        Ok(orders)
    }

    fn get_order(&self, order_id: &OrderId) -> StoreResult<Option<Order>> {
        let conn = self.lock()?;

        let json: Option<String> = conn
            .query_row(
                "SELECT order_json FROM orders WHERE order_id = ?",
                [order_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn save_order(&self, order: &Order) -> StoreResult<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(order)?;
        let version = order.version as i64;

        let changed = conn.execute(
            r#"
            INSERT INTO orders (order_id, version, status, updated_at, order_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(order_id)
            DO UPDATE SET
                version = excluded.version,
                status = excluded.status,
                updated_at = excluded.updated_at,
                order_json = excluded.order_json
            WHERE orders.version < excluded.version
            "#,
            params![
                order.id.as_str(),
                version,
                order.status.as_str(),
                galley_util::now().to_rfc3339(),
                json
            ],
        )?;

        if changed == 0 {
            let stored: i64 = conn.query_row(
                "SELECT version FROM orders WHERE order_id = ?",
                [order.id.as_str()],
                |row| row.get(0),
            )?;
            return Err(StoreError::Conflict {
                order_id: order.id.to_string(),
                stored: stored as u64,
                attempted: order.version,
            });
        }

        debug!(order_id = %order.id, version = order.version, "Order saved");
        Ok(())
    }

    fn delete_order(&self, order_id: &OrderId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM orders WHERE order_id = ?", [order_id.as_str()])?;
        Ok(())
    }

    fn load_timers(&self) -> StoreResult<Vec<TimerSnapshot>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT timer_json FROM timers ORDER BY timer_key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut timers = Vec::new();
        for row in rows {
            let json = row?;
            match serde_json::from_str::<TimerSnapshot>(&json) {
                Ok(timer) => timers.push(timer),
                Err(e) => warn!(error = %e, "Skipping unreadable stored timer"),
            }
        }

        debug!(count = timers.len(), "Timers loaded from store");
        Ok(timers)
    }

    fn save_timer(&self, snapshot: &TimerSnapshot) -> StoreResult<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(snapshot)?;

        conn.execute(
            r#"
            INSERT INTO timers (timer_key, order_id, timer_json)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(timer_key)
            DO UPDATE SET timer_json = excluded.timer_json
            "#,
            params![
                snapshot.key.to_string(),
                snapshot.key.order_id.as_str(),
                json
            ],
        )?;

        debug!(timer = %snapshot.key, "Timer saved");
        Ok(())
    }

    fn delete_timer(&self, key: &TimerKey) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM timers WHERE timer_key = ?", [key.to_string()])?;
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
