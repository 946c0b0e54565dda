//! Fixed-interval sampler of the kernel tables. Publishes one consistent
//! per-tick snapshot with derived byte rates for the IPC server and the
//! aggregator to read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::time;

use portwatch_api::protocol::PortSample;
use portwatch_common::PortStats;

use crate::errors::LoaderError;

/// Read access to the kernel tables, abstracted so tests can feed synthetic
/// counters through the same pipeline.
pub(crate) trait StatsSource: Send + Sync {
    fn port_totals(&self) -> Result<HashMap<u16, PortStats>, LoaderError>;
    fn active_connections(&self) -> Result<HashMap<u16, u64>, LoaderError>;
}

/// The published snapshot: replaced whole by the collector each tick, read
/// concurrently by IPC workers and the aggregator.
pub(crate) type SharedSnapshot = Arc<RwLock<HashMap<u16, PortSample>>>;

pub(crate) struct Collector<S> {
    source: Arc<S>,
    interval: Duration,
    snapshot: SharedSnapshot,
    state: Mutex<RateState>,
}

#[derive(Default)]
struct RateState {
    last: HashMap<u16, PortStats>,
    last_at: Option<Instant>,
}

impl<S: StatsSource> Collector<S> {
    pub(crate) fn new(source: Arc<S>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            snapshot: Arc::new(RwLock::new(HashMap::new())),
            state: Mutex::new(RateState::default()),
        }
    }

    /// Handle to the published snapshot for other components.
    pub(crate) fn snapshot(&self) -> SharedSnapshot {
        self.snapshot.clone()
    }

    pub(crate) async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.interval);
        info!("stats collector started (interval {:?})", self.interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("stats collector stopped");
                    return;
                }
                _ = ticker.tick() => self.collect(),
            }
        }
    }

    fn collect(&self) {
        let totals = match self.source.port_totals() {
            Ok(totals) => totals,
            Err(e) => {
                error!("failed to read port stats: {e}");
                return;
            }
        };
        let active = self.source.active_connections().unwrap_or_else(|e| {
            debug!("failed to count active connections: {e}");
            HashMap::new()
        });
        self.ingest(totals, &active, Instant::now());
    }

    /// Fold one raw sample into the snapshot, deriving rates against the
    /// previous sample.
    fn ingest(&self, totals: HashMap<u16, PortStats>, active: &HashMap<u16, u64>, now: Instant) {
        let mut state = self.state.lock();
        let elapsed = state
            .last_at
            .map(|t| now.duration_since(t).as_secs_f64())
            .unwrap_or(0.0);

        let mut fresh = HashMap::with_capacity(totals.len());
        for (&port, current) in &totals {
            let mut sample = PortSample {
                port,
                rx_bytes: current.rx_bytes,
                tx_bytes: current.tx_bytes,
                rx_packets: current.rx_packets,
                tx_packets: current.tx_packets,
                connections: active.get(&port).copied().unwrap_or(0),
                rx_rate: 0.0,
                tx_rate: 0.0,
            };
            if let Some(prev) = state.last.get(&port) {
                sample.rx_rate = rate(current.rx_bytes, prev.rx_bytes, elapsed);
                sample.tx_rate = rate(current.tx_bytes, prev.tx_bytes, elapsed);
            }
            fresh.insert(port, sample);
        }

        state.last = totals;
        state.last_at = Some(now);
        drop(state);

        *self.snapshot.write() = fresh;
    }
}

/// Bytes per second between two cumulative readings. A regression means the
/// counter was reset kernel-side and reads as zero, not as a negative rate.
fn rate(current: u64, previous: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 || current < previous {
        return 0.0;
    }
    (current - previous) as f64 / elapsed_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource;

    impl StatsSource for FakeSource {
        fn port_totals(&self) -> Result<HashMap<u16, PortStats>, LoaderError> {
            Ok(HashMap::new())
        }

        fn active_connections(&self) -> Result<HashMap<u16, u64>, LoaderError> {
            Ok(HashMap::new())
        }
    }

    fn totals(port: u16, rx: u64, tx: u64) -> HashMap<u16, PortStats> {
        let mut m = HashMap::new();
        m.insert(
            port,
            PortStats {
                rx_bytes: rx,
                tx_bytes: tx,
                rx_packets: rx / 100,
                tx_packets: tx / 100,
                connections: 1,
            },
        );
        m
    }

    #[test]
    fn rate_matches_delta_over_elapsed() {
        assert_eq!(rate(3000, 1000, 2.0), 1000.0);
        assert_eq!(rate(1000, 1000, 1.0), 0.0);
        assert!((rate(1_000_001, 1, 1.0) - 1_000_000.0).abs() < 1.0);
    }

    #[test]
    fn rate_is_zero_on_regression_or_no_elapsed() {
        assert_eq!(rate(500, 1000, 1.0), 0.0);
        assert_eq!(rate(1000, 0, 0.0), 0.0);
    }

    #[test]
    fn first_sample_has_zero_rates() {
        let collector = Collector::new(Arc::new(FakeSource), Duration::from_millis(100));
        collector.ingest(totals(5000, 1000, 500), &HashMap::new(), Instant::now());

        let snap = collector.snapshot();
        let sample = snap.read()[&5000];
        assert_eq!(sample.rx_bytes, 1000);
        assert_eq!(sample.rx_rate, 0.0);
        assert_eq!(sample.tx_rate, 0.0);
    }

    #[test]
    fn derives_rates_between_samples() {
        let collector = Collector::new(Arc::new(FakeSource), Duration::from_millis(100));
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);

        collector.ingest(totals(5000, 1000, 500), &HashMap::new(), t0);
        collector.ingest(totals(5000, 3000, 1500), &HashMap::new(), t1);

        let snap = collector.snapshot();
        let sample = snap.read()[&5000];
        assert!((sample.rx_rate - 2000.0).abs() < 1.0);
        assert!((sample.tx_rate - 1000.0).abs() < 1.0);
        assert_eq!(sample.rx_bytes, 3000);
    }

    #[test]
    fn counter_reset_reads_as_zero_rate() {
        let collector = Collector::new(Arc::new(FakeSource), Duration::from_millis(100));
        let t0 = Instant::now();

        collector.ingest(totals(443, 10_000, 4_000), &HashMap::new(), t0);
        collector.ingest(
            totals(443, 100, 50),
            &HashMap::new(),
            t0 + Duration::from_secs(1),
        );

        let snap = collector.snapshot();
        let sample = snap.read()[&443];
        assert_eq!(sample.rx_rate, 0.0);
        assert_eq!(sample.tx_rate, 0.0);
        assert_eq!(sample.rx_bytes, 100);
    }

    #[test]
    fn snapshot_carries_active_connection_counts() {
        let collector = Collector::new(Arc::new(FakeSource), Duration::from_millis(100));
        let mut active = HashMap::new();
        active.insert(8080u16, 7u64);

        collector.ingest(totals(8080, 1, 1), &active, Instant::now());

        let snap = collector.snapshot();
        assert_eq!(snap.read()[&8080].connections, 7);
    }
}
