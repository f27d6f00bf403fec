//! Lock-free gateway counters.
//!
//! Every counter is a relaxed atomic so the hot row-event path never
//! contends on a lock. Per-topic publish counts live in a [`DashMap`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Process-wide gateway counters.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    connection_attempts: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
    frame_pumps_running: AtomicU64,
    dropped_sink_commands: AtomicU64,
    mapping_failures: AtomicU64,
    sink_failures: AtomicU64,
    discarded_events: AtomicU64,
    published: DashMap<String, u64>,
}

impl GatewayMetrics {
    /// Create a zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection attempt started.
    pub fn record_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// A handshake completed.
    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    /// An established session ended.
    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame pump task started.
    pub fn pump_started(&self) {
        self.frame_pumps_running.fetch_add(1, Ordering::SeqCst);
    }

    /// A frame pump task finished its teardown.
    pub fn pump_stopped(&self) {
        let _ = self
            .frame_pumps_running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Number of frame pumps currently running.
    pub fn frame_pumps_running(&self) -> u64 {
        self.frame_pumps_running.load(Ordering::SeqCst)
    }

    /// A cache or publish command was dropped because the queue was full.
    pub fn record_dropped(&self) {
        self.dropped_sink_commands.fetch_add(1, Ordering::Relaxed);
    }

    /// A source row could not be mapped.
    pub fn record_mapping_failure(&self) {
        self.mapping_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A cache or publish round trip failed.
    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Row events held for an epoch that ended before activation.
    pub fn record_discarded(&self, n: usize) {
        self.discarded_events
            .fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// An event was published on `topic`.
    pub fn record_published(&self, topic: &str) {
        if let Some(mut count) = self.published.get_mut(topic) {
            *count = count.saturating_add(1);
            return;
        }
        self.published
            .entry(topic.to_owned())
            .and_modify(|c| *c = c.saturating_add(1))
            .or_insert(1);
    }

    /// Events published on `topic` so far.
    pub fn published(&self, topic: &str) -> u64 {
        self.published.get(topic).map_or(0, |c| *c)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            frame_pumps_running: self.frame_pumps_running.load(Ordering::SeqCst),
            dropped_sink_commands: self.dropped_sink_commands.load(Ordering::Relaxed),
            mapping_failures: self.mapping_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            discarded_events: self.discarded_events.load(Ordering::Relaxed),
            published: self
                .published
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}

/// Copy of [`GatewayMetrics`] at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Connection attempts started.
    pub connection_attempts: u64,
    /// Handshakes completed.
    pub connects: u64,
    /// Established sessions that ended.
    pub disconnects: u64,
    /// Frame pumps running at snapshot time.
    pub frame_pumps_running: u64,
    /// Cache/publish commands dropped on a full queue.
    pub dropped_sink_commands: u64,
    /// Rows that failed to map.
    pub mapping_failures: u64,
    /// Failed cache/publish round trips.
    pub sink_failures: u64,
    /// Held row events discarded because their epoch ended first.
    pub discarded_events: u64,
    /// Published events per topic.
    pub published: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Total events published across every topic.
    pub fn total_published(&self) -> u64 {
        self.published.values().fold(0, |acc, n| acc.saturating_add(*n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_topic_counts_accumulate() {
        let metrics = GatewayMetrics::new();
        metrics.record_published("world.item.insert");
        metrics.record_published("world.item.insert");
        metrics.record_published("system.HeartbeatEvent");

        let snap = metrics.snapshot();
        assert_eq!(snap.published.get("world.item.insert"), Some(&2));
        assert_eq!(snap.total_published(), 3);
        assert_eq!(metrics.published("world.nothing"), 0);
    }

    #[test]
    fn pump_gauge_never_underflows() {
        let metrics = GatewayMetrics::new();
        metrics.pump_stopped();
        assert_eq!(metrics.frame_pumps_running(), 0);
        metrics.pump_started();
        metrics.pump_started();
        metrics.pump_stopped();
        assert_eq!(metrics.frame_pumps_running(), 1);
    }
}
