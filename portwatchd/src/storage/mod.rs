//! Durable bucket storage for aggregated traffic history.

pub(crate) mod sqlite;

#[cfg(test)]
pub(crate) mod memory;

use chrono::{DateTime, Local};
use thiserror::Error;

use portwatch_api::protocol::DayStats;

/// A non-negative per-tick contribution to the time buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StatDelta {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub connections: u64,
}

/// One persisted hourly bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct HourlyRow {
    pub port: u16,
    /// Unix seconds of the enclosing hour.
    pub timestamp: i64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub connections: u64,
}

/// Daily rows over a date range plus their folded totals.
#[derive(Debug, Clone, Default)]
pub(crate) struct PeriodSummary {
    pub total_rx: u64,
    pub total_tx: u64,
    pub total_rx_packets: u64,
    pub total_tx_packets: u64,
    pub total_connections: u64,
    pub peak_rx_rate: u64,
    pub peak_tx_rate: u64,
    pub days: Vec<DayStats>,
}

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("creating data directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability contract of the bucket store. Upserts add counters into the
/// unique `(port, bucket)` row and MAX-combine peak rates, so replaying a
/// contribution never subtracts and re-observing a peak never lowers it.
pub(crate) trait StatsStore: Send + Sync {
    /// Add a delta into the hourly bucket enclosing `at`.
    fn upsert_hourly(
        &self,
        port: u16,
        at: DateTime<Local>,
        delta: &StatDelta,
    ) -> Result<(), StoreError>;

    /// Add a delta into the daily bucket for `date` (`YYYY-MM-DD`), raising
    /// the stored peaks to at least `peak_rx`/`peak_tx`.
    fn upsert_daily(
        &self,
        port: u16,
        date: &str,
        delta: &StatDelta,
        peak_rx: u64,
        peak_tx: u64,
    ) -> Result<(), StoreError>;

    /// Hourly rows with `start_ts <= timestamp <= end_ts`, ascending.
    fn query_hourly(&self, port: u16, start_ts: i64, end_ts: i64)
        -> Result<Vec<HourlyRow>, StoreError>;

    /// Daily rows with `start_date <= date <= end_date`, ascending.
    fn query_daily(
        &self,
        port: u16,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<DayStats>, StoreError>;

    /// Delete hourly rows older than `retention_days` days and daily rows
    /// before the cutoff date. Returns the number of rows removed.
    fn delete_old_data(&self, retention_days: u32) -> Result<u64, StoreError>;

    /// Daily rows over a date range together with summed byte/packet totals
    /// and MAX-combined peaks.
    fn period_summary(
        &self,
        port: u16,
        start_date: &str,
        end_date: &str,
    ) -> Result<PeriodSummary, StoreError> {
        let days = self.query_daily(port, start_date, end_date)?;
        let mut summary = PeriodSummary::default();
        for day in &days {
            summary.total_rx += day.rx_bytes;
            summary.total_tx += day.tx_bytes;
            summary.total_rx_packets += day.rx_packets;
            summary.total_tx_packets += day.tx_packets;
            summary.total_connections += day.connections;
            summary.peak_rx_rate = summary.peak_rx_rate.max(day.peak_rx_rate);
            summary.peak_tx_rate = summary.peak_tx_rate.max(day.peak_tx_rate);
        }
        summary.days = days;
        Ok(summary)
    }
}

/// Floor a wall-clock instant to its enclosing hour, in unix seconds.
pub(crate) fn hour_bucket(at: DateTime<Local>) -> i64 {
    let ts = at.timestamp();
    ts - ts.rem_euclid(3600)
}
