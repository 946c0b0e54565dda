//! Folds collector snapshots into hourly and daily buckets at a fixed
//! interval, tracking per-day peak rates along the way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time;

use portwatch_api::protocol::PortSample;

use crate::collector::SharedSnapshot;
use crate::storage::{StatDelta, StatsStore};

/// Cloneable handle; all clones share the persistence shadow and the peak
/// trackers.
#[derive(Clone)]
pub(crate) struct Aggregator {
    snapshot: SharedSnapshot,
    store: Arc<dyn StatsStore>,
    interval: Duration,
    state: Arc<Mutex<AggState>>,
}

#[derive(Default)]
struct AggState {
    /// Counters as of the last persist, per port. Distinct from the
    /// collector's rate shadow.
    shadow: HashMap<u16, Shadow>,
    peaks: HashMap<u16, PeakTracker>,
}

#[derive(Clone, Copy, Default)]
struct Shadow {
    rx_bytes: u64,
    tx_bytes: u64,
    rx_packets: u64,
    tx_packets: u64,
    connections: u64,
}

struct PeakTracker {
    date: String,
    rx_rate: u64,
    tx_rate: u64,
}

impl Aggregator {
    pub(crate) fn new(
        snapshot: SharedSnapshot,
        store: Arc<dyn StatsStore>,
        interval: Duration,
    ) -> Self {
        Self {
            snapshot,
            store,
            interval,
            state: Arc::new(Mutex::new(AggState::default())),
        }
    }

    pub(crate) async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.interval);
        info!("aggregator started (interval {:?})", self.interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    // final persist before exit
                    self.persist();
                    info!("aggregator stopped");
                    return;
                }
                _ = ticker.tick() => self.persist(),
            }
        }
    }

    /// One synchronous delta-persist pass; also the `flush_stats` entry.
    pub(crate) fn flush(&self) {
        self.persist();
        debug!("aggregator flushed on demand");
    }

    fn persist(&self) {
        let samples = self.snapshot.read().clone();
        self.persist_samples(&samples, Local::now());
    }

    /// Fold one snapshot taken at `now` into the store.
    fn persist_samples(&self, samples: &HashMap<u16, PortSample>, now: DateTime<Local>) {
        let today = now.format("%Y-%m-%d").to_string();
        let mut state = self.state.lock();

        for (&port, sample) in samples {
            let delta = match state.shadow.get(&port).copied() {
                Some(prev) => StatDelta {
                    rx_bytes: monotonic_delta(sample.rx_bytes, prev.rx_bytes),
                    tx_bytes: monotonic_delta(sample.tx_bytes, prev.tx_bytes),
                    rx_packets: monotonic_delta(sample.rx_packets, prev.rx_packets),
                    tx_packets: monotonic_delta(sample.tx_packets, prev.tx_packets),
                    connections: monotonic_delta(sample.connections, prev.connections),
                },
                // First persist for this port: the whole counter is the delta.
                None => StatDelta {
                    rx_bytes: sample.rx_bytes,
                    tx_bytes: sample.tx_bytes,
                    rx_packets: sample.rx_packets,
                    tx_packets: sample.tx_packets,
                    connections: sample.connections,
                },
            };

            if delta.rx_bytes == 0 && delta.tx_bytes == 0 {
                continue;
            }

            if let Err(e) = self.store.upsert_hourly(port, now, &delta) {
                error!("failed to upsert hourly stats for port {port}: {e}");
            }

            let peak = state.peaks.entry(port).or_insert_with(|| PeakTracker {
                date: today.clone(),
                rx_rate: 0,
                tx_rate: 0,
            });
            if peak.date != today {
                peak.date = today.clone();
                peak.rx_rate = 0;
                peak.tx_rate = 0;
            }
            peak.rx_rate = peak.rx_rate.max(sample.rx_rate as u64);
            peak.tx_rate = peak.tx_rate.max(sample.tx_rate as u64);
            let (peak_rx, peak_tx) = (peak.rx_rate, peak.tx_rate);

            if let Err(e) = self.store.upsert_daily(port, &today, &delta, peak_rx, peak_tx) {
                error!("failed to upsert daily stats for port {port}: {e}");
            }

            // The shadow advances even past a failed upsert: losing one delta
            // beats double-counting every later tick.
            state.shadow.insert(
                port,
                Shadow {
                    rx_bytes: sample.rx_bytes,
                    tx_bytes: sample.tx_bytes,
                    rx_packets: sample.rx_packets,
                    tx_packets: sample.tx_packets,
                    connections: sample.connections,
                },
            );

            debug!(
                "persisted stats for port {port}: delta_rx={} delta_tx={}",
                delta.rx_bytes, delta.tx_bytes
            );
        }
    }
}

/// `current - previous`, reading a regression (kernel-side reset) as zero.
fn monotonic_delta(current: u64, previous: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        0
    }
}
