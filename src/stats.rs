use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval_at};

use crate::shutdown::ShutdownSignal;

/// Counters shared by listeners and the dispatcher.
#[derive(Debug, Default)]
pub struct IngestStats {
    received_udp: AtomicU64,
    received_tcp: AtomicU64,
    received_bytes: AtomicU64,

    connections_accepted: AtomicU64,
    connections_active: AtomicU64,

    stored: AtomicU64,
    store_failures: AtomicU64,
    store_retries: AtomicU64,
    dropped: AtomicU64,

    alerts_triggered: AtomicU64,
}

impl IngestStats {
    #[inline]
    pub fn datagram_received(&self, size: usize) {
        self.received_udp.fetch_add(1, Ordering::Relaxed);
        self.received_bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn frame_received(&self, size: usize) {
        self.received_tcp.fetch_add(1, Ordering::Relaxed);
        self.received_bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn store_failed(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn store_retried(&self) {
        self.store_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn alert_triggered(&self) {
        self.alerts_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received_udp: self.received_udp.load(Ordering::Relaxed),
            received_tcp: self.received_tcp.load(Ordering::Relaxed),
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatsSnapshot {
    pub received_udp: u64,
    pub received_tcp: u64,
    pub received_bytes: u64,
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub stored: u64,
    pub store_failures: u64,
    pub store_retries: u64,
    pub dropped: u64,
    pub alerts_triggered: u64,
}

impl StatsSnapshot {
    /// Every message accepted by a listener, whatever transport it came from.
    pub fn received(&self) -> u64 {
        self.received_udp + self.received_tcp
    }

    pub fn log(&self, message: &'static str) {
        info!(
            message = message,
            received = self.received(),
            received_udp = self.received_udp,
            received_tcp = self.received_tcp,
            received_bytes = self.received_bytes,
            connections_accepted = self.connections_accepted,
            connections_active = self.connections_active,
            stored = self.stored,
            store_failures = self.store_failures,
            store_retries = self.store_retries,
            dropped = self.dropped,
            alerts_triggered = self.alerts_triggered,
        );
    }
}

/// Logs a snapshot every `period` until shutdown.
pub async fn report(stats: Arc<IngestStats>, period: Duration, mut shutdown: ShutdownSignal) {
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            _ = ticker.tick() => stats.snapshot().log("ingest stats"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters() {
        let stats = IngestStats::default();

        stats.datagram_received(10);
        stats.frame_received(5);
        stats.frame_received(7);
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.record_stored();
        stats.store_retried();
        stats.store_failed();
        stats.record_dropped();
        stats.alert_triggered();

        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot,
            StatsSnapshot {
                received_udp: 1,
                received_tcp: 2,
                received_bytes: 22,
                connections_accepted: 2,
                connections_active: 1,
                stored: 1,
                store_failures: 1,
                store_retries: 1,
                dropped: 1,
                alerts_triggered: 1,
            }
        );
        assert_eq!(snapshot.received(), 3);
    }
}
