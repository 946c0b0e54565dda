//! SQLite-backed bucket store: single file `data.db` under the data
//! directory, WAL journal, all access serialized by one internal mutex.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{info, warn};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use portwatch_api::protocol::DayStats;

use super::{hour_bucket, HourlyRow, StatDelta, StatsStore, StoreError};

const SCHEMA_VERSION: &str = "1";

const SCHEMA: &str = "
-- Hourly aggregated statistics
CREATE TABLE IF NOT EXISTS hourly_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    port INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,  -- unix seconds, hour granularity
    rx_bytes INTEGER DEFAULT 0,
    tx_bytes INTEGER DEFAULT 0,
    rx_packets INTEGER DEFAULT 0,
    tx_packets INTEGER DEFAULT 0,
    connections INTEGER DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    UNIQUE(port, timestamp)
);

-- Daily aggregated statistics
CREATE TABLE IF NOT EXISTS daily_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    port INTEGER NOT NULL,
    date TEXT NOT NULL,  -- YYYY-MM-DD
    rx_bytes INTEGER DEFAULT 0,
    tx_bytes INTEGER DEFAULT 0,
    rx_packets INTEGER DEFAULT 0,
    tx_packets INTEGER DEFAULT 0,
    connections INTEGER DEFAULT 0,
    peak_rx_rate INTEGER DEFAULT 0,
    peak_tx_rate INTEGER DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    UNIQUE(port, date)
);

-- Active connections (ephemeral, cleared on startup)
CREATE TABLE IF NOT EXISTS active_connections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    port INTEGER NOT NULL,
    remote_addr TEXT NOT NULL,
    remote_port INTEGER NOT NULL,
    state TEXT NOT NULL,
    rx_bytes INTEGER DEFAULT 0,
    tx_bytes INTEGER DEFAULT 0,
    started_at INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
);

-- Metadata
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_hourly_port_ts ON hourly_stats(port, timestamp);
CREATE INDEX IF NOT EXISTS idx_daily_port_date ON daily_stats(port, date);
CREATE INDEX IF NOT EXISTS idx_active_port ON active_connections(port);
";

pub(crate) struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the database under `data_dir`, apply the schema, and
    /// truncate the ephemeral connections table.
    pub(crate) fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join("data.db");

        let conn = Connection::open(&path)?;
        // journal_mode returns the resulting mode as a row, so it cannot go
        // through execute()
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        if let Err(e) = conn.execute("DELETE FROM active_connections", []) {
            warn!("failed to clear active connections: {e}");
        }

        conn.execute(
            "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![SCHEMA_VERSION],
        )?;

        info!("database opened at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub(crate) fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

impl StatsStore for SqliteStore {
    fn upsert_hourly(
        &self,
        port: u16,
        at: DateTime<Local>,
        delta: &StatDelta,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hourly_stats
                 (port, timestamp, rx_bytes, tx_bytes, rx_packets, tx_packets, connections)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(port, timestamp) DO UPDATE SET
                 rx_bytes = rx_bytes + excluded.rx_bytes,
                 tx_bytes = tx_bytes + excluded.tx_bytes,
                 rx_packets = rx_packets + excluded.rx_packets,
                 tx_packets = tx_packets + excluded.tx_packets,
                 connections = connections + excluded.connections",
            params![
                port,
                hour_bucket(at),
                delta.rx_bytes as i64,
                delta.tx_bytes as i64,
                delta.rx_packets as i64,
                delta.tx_packets as i64,
                delta.connections as i64,
            ],
        )?;
        Ok(())
    }

    fn upsert_daily(
        &self,
        port: u16,
        date: &str,
        delta: &StatDelta,
        peak_rx: u64,
        peak_tx: u64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO daily_stats
                 (port, date, rx_bytes, tx_bytes, rx_packets, tx_packets, connections,
                  peak_rx_rate, peak_tx_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(port, date) DO UPDATE SET
                 rx_bytes = rx_bytes + excluded.rx_bytes,
                 tx_bytes = tx_bytes + excluded.tx_bytes,
                 rx_packets = rx_packets + excluded.rx_packets,
                 tx_packets = tx_packets + excluded.tx_packets,
                 connections = connections + excluded.connections,
                 peak_rx_rate = MAX(peak_rx_rate, excluded.peak_rx_rate),
                 peak_tx_rate = MAX(peak_tx_rate, excluded.peak_tx_rate)",
            params![
                port,
                date,
                delta.rx_bytes as i64,
                delta.tx_bytes as i64,
                delta.rx_packets as i64,
                delta.tx_packets as i64,
                delta.connections as i64,
                peak_rx as i64,
                peak_tx as i64,
            ],
        )?;
        Ok(())
    }

    fn query_hourly(
        &self,
        port: u16,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<HourlyRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT port, timestamp, rx_bytes, tx_bytes, rx_packets, tx_packets, connections
             FROM hourly_stats
             WHERE port = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![port, start_ts, end_ts], |row| {
            Ok(HourlyRow {
                port: row.get(0)?,
                timestamp: row.get(1)?,
                rx_bytes: row.get::<_, i64>(2)? as u64,
                tx_bytes: row.get::<_, i64>(3)? as u64,
                rx_packets: row.get::<_, i64>(4)? as u64,
                tx_packets: row.get::<_, i64>(5)? as u64,
                connections: row.get::<_, i64>(6)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn query_daily(
        &self,
        port: u16,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<DayStats>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date, rx_bytes, tx_bytes, rx_packets, tx_packets, connections,
                    peak_rx_rate, peak_tx_rate
             FROM daily_stats
             WHERE port = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date",
        )?;
        let rows = stmt.query_map(params![port, start_date, end_date], |row| {
            Ok(DayStats {
                date: row.get(0)?,
                rx_bytes: row.get::<_, i64>(1)? as u64,
                tx_bytes: row.get::<_, i64>(2)? as u64,
                rx_packets: row.get::<_, i64>(3)? as u64,
                tx_packets: row.get::<_, i64>(4)? as u64,
                connections: row.get::<_, i64>(5)? as u64,
                peak_rx_rate: row.get::<_, i64>(6)? as u64,
                peak_tx_rate: row.get::<_, i64>(7)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn delete_old_data(&self, retention_days: u32) -> Result<u64, StoreError> {
        let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);
        let cutoff_ts = cutoff.timestamp();
        let cutoff_date = cutoff.format("%Y-%m-%d").to_string();

        let conn = self.conn.lock();
        let mut deleted = conn.execute(
            "DELETE FROM hourly_stats WHERE timestamp < ?1",
            params![cutoff_ts],
        )? as u64;
        deleted += conn.execute(
            "DELETE FROM daily_stats WHERE date < ?1",
            params![cutoff_date],
        )? as u64;

        if deleted > 0 {
            info!("cleaned up {deleted} rows older than {retention_days} days");
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn delta(rx: u64, tx: u64) -> StatDelta {
        StatDelta {
            rx_bytes: rx,
            tx_bytes: tx,
            rx_packets: rx / 100,
            tx_packets: tx / 100,
            connections: 1,
        }
    }

    #[test]
    fn hourly_upserts_add_within_the_same_hour() {
        let (_dir, store) = open_store();
        let at = Local.with_ymd_and_hms(2025, 1, 15, 10, 5, 0).unwrap();

        store.upsert_hourly(5000, at, &delta(1000, 500)).unwrap();
        store
            .upsert_hourly(5000, at + chrono::Duration::minutes(30), &delta(2000, 1000))
            .unwrap();

        let rows = store
            .query_hourly(5000, 0, i64::MAX)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].port, 5000);
        assert_eq!(rows[0].rx_bytes, 3000);
        assert_eq!(rows[0].tx_bytes, 1500);
        assert_eq!(rows[0].rx_packets, 30);
        assert_eq!(rows[0].tx_packets, 15);
        assert_eq!(rows[0].connections, 2);
        assert_eq!(rows[0].timestamp % 3600, 0);
    }

    #[test]
    fn hourly_buckets_split_on_the_hour() {
        let (_dir, store) = open_store();
        let at = Local.with_ymd_and_hms(2025, 1, 15, 10, 59, 0).unwrap();

        store.upsert_hourly(80, at, &delta(100, 0)).unwrap();
        store
            .upsert_hourly(80, at + chrono::Duration::minutes(2), &delta(200, 0))
            .unwrap();

        let rows = store.query_hourly(80, 0, i64::MAX).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].rx_bytes, 100);
        assert_eq!(rows[1].rx_bytes, 200);
    }

    #[test]
    fn daily_upserts_add_counters_and_max_peaks() {
        let (_dir, store) = open_store();

        store
            .upsert_daily(443, "2025-01-15", &delta(1000, 500), 900, 450)
            .unwrap();
        store
            .upsert_daily(443, "2025-01-15", &delta(2000, 1000), 700, 800)
            .unwrap();

        let days = store.query_daily(443, "2025-01-15", "2025-01-15").unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].rx_bytes, 3000);
        assert_eq!(days[0].tx_bytes, 1500);
        // peaks never go down
        assert_eq!(days[0].peak_rx_rate, 900);
        assert_eq!(days[0].peak_tx_rate, 800);
    }

    #[test]
    fn period_summary_folds_rows() {
        let (_dir, store) = open_store();

        store
            .upsert_daily(22, "2025-01-10", &delta(100, 10), 50, 5)
            .unwrap();
        store
            .upsert_daily(22, "2025-01-11", &delta(200, 20), 80, 3)
            .unwrap();
        store
            .upsert_daily(22, "2025-02-01", &delta(999, 999), 999, 999)
            .unwrap();

        let summary = store.period_summary(22, "2025-01-01", "2025-01-31").unwrap();
        assert_eq!(summary.days.len(), 2);
        assert_eq!(summary.total_rx, 300);
        assert_eq!(summary.total_tx, 30);
        assert_eq!(summary.total_rx_packets, 3);
        assert_eq!(summary.total_tx_packets, 0);
        assert_eq!(summary.total_connections, 2);
        assert_eq!(summary.peak_rx_rate, 80);
        assert_eq!(summary.peak_tx_rate, 5);
    }

    #[test]
    fn retention_removes_only_old_rows() {
        let (_dir, store) = open_store();
        let now = Local::now();
        let old = now - chrono::Duration::days(10);

        store.upsert_hourly(8080, old, &delta(111, 0)).unwrap();
        store.upsert_hourly(8080, now, &delta(222, 0)).unwrap();
        store
            .upsert_daily(8080, &old.format("%Y-%m-%d").to_string(), &delta(111, 0), 0, 0)
            .unwrap();
        store
            .upsert_daily(8080, &now.format("%Y-%m-%d").to_string(), &delta(222, 0), 0, 0)
            .unwrap();

        let deleted = store.delete_old_data(7).unwrap();
        assert_eq!(deleted, 2);

        let cutoff_ts = (now - chrono::Duration::days(7)).timestamp();
        let hourly = store.query_hourly(8080, 0, i64::MAX).unwrap();
        assert_eq!(hourly.len(), 1);
        assert!(hourly[0].timestamp >= cutoff_ts - 3600);

        let daily = store.query_daily(8080, "0000-01-01", "9999-12-31").unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].rx_bytes, 222);
    }

    #[test]
    fn schema_version_is_stamped_at_open() {
        let (_dir, store) = open_store();
        assert_eq!(
            store.get_metadata("schema_version").unwrap().as_deref(),
            Some(SCHEMA_VERSION)
        );
        assert_eq!(store.get_metadata("missing").unwrap(), None);
    }

    #[test]
    fn metadata_upserts_overwrite() {
        let (_dir, store) = open_store();
        store.set_metadata("probe_state", "attached").unwrap();
        store.set_metadata("probe_state", "detached").unwrap();
        assert_eq!(
            store.get_metadata("probe_state").unwrap().as_deref(),
            Some("detached")
        );
    }

    #[test]
    fn reopen_preserves_history() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SqliteStore::open(dir.path()).unwrap();
            store
                .upsert_daily(3306, "2025-01-15", &delta(4096, 2048), 100, 50)
                .unwrap();
        }
        let store = SqliteStore::open(dir.path()).unwrap();
        let days = store.query_daily(3306, "2025-01-15", "2025-01-15").unwrap();
        assert_eq!(days[0].rx_bytes, 4096);
        assert!(store.path().ends_with("data.db"));
    }
}
