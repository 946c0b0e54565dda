//! In-memory store with the same upsert/query contract as the SQLite store.
//! Backs the aggregator and IPC tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use portwatch_api::protocol::DayStats;

use super::{hour_bucket, HourlyRow, StatDelta, StatsStore, StoreError};

#[derive(Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<Buckets>,
}

#[derive(Default)]
struct Buckets {
    hourly: BTreeMap<(u16, i64), HourlyRow>,
    daily: BTreeMap<(u16, String), DayStats>,
}

impl StatsStore for MemoryStore {
    fn upsert_hourly(
        &self,
        port: u16,
        at: DateTime<Local>,
        delta: &StatDelta,
    ) -> Result<(), StoreError> {
        let ts = hour_bucket(at);
        let mut inner = self.inner.lock();
        let row = inner.hourly.entry((port, ts)).or_insert_with(|| HourlyRow {
            port,
            timestamp: ts,
            ..HourlyRow::default()
        });
        row.rx_bytes += delta.rx_bytes;
        row.tx_bytes += delta.tx_bytes;
        row.rx_packets += delta.rx_packets;
        row.tx_packets += delta.tx_packets;
        row.connections += delta.connections;
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
        let mut inner = self.inner.lock();
        let row = inner
            .daily
            .entry((port, date.to_string()))
            .or_insert_with(|| DayStats {
                date: date.to_string(),
                ..DayStats::default()
            });
        row.rx_bytes += delta.rx_bytes;
        row.tx_bytes += delta.tx_bytes;
        row.rx_packets += delta.rx_packets;
        row.tx_packets += delta.tx_packets;
        row.connections += delta.connections;
        row.peak_rx_rate = row.peak_rx_rate.max(peak_rx);
        row.peak_tx_rate = row.peak_tx_rate.max(peak_tx);
        Ok(())
    }

    fn query_hourly(
        &self,
        port: u16,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<HourlyRow>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .hourly
            .range((port, start_ts)..=(port, end_ts))
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn query_daily(
        &self,
        port: u16,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<DayStats>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .daily
            .range((port, start_date.to_string())..=(port, end_date.to_string()))
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn delete_old_data(&self, retention_days: u32) -> Result<u64, StoreError> {
        let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);
        let cutoff_ts = cutoff.timestamp();
        let cutoff_date = cutoff.format("%Y-%m-%d").to_string();

        let mut inner = self.inner.lock();
        let before = inner.hourly.len() + inner.daily.len();
        inner.hourly.retain(|(_, ts), _| *ts >= cutoff_ts);
        inner.daily.retain(|(_, date), _| date.as_str() >= cutoff_date.as_str());
        Ok((before - inner.hourly.len() - inner.daily.len()) as u64)
    }
}
