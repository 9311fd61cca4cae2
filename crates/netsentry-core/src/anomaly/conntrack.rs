// ── Connection-table deltas ──
//
// Connection-tracking rows carry lifetime byte and packet totals. Between
// two reads of the same table only the growth of each connection is new
// traffic, so the engine scores that growth and never a row's history.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::model::{DeviceId, Protocol, TrafficFlow};

type ConnectionKey = ((IpAddr, u16), (IpAddr, u16), Protocol);

fn key(flow: &TrafficFlow) -> ConnectionKey {
    (
        (flow.source_addr, flow.source_port),
        (flow.dest_addr, flow.dest_port),
        flow.protocol,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counters {
    bytes: u64,
    packets: u64,
}

#[derive(Debug)]
struct TableRead {
    at: DateTime<Utc>,
    connections: HashMap<ConnectionKey, Counters>,
}

/// Last connection-table read per device.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    reads: DashMap<DeviceId, TableRead>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn one full table read into the flows worth scoring.
    ///
    /// A connection seen for the first time (or whose counters went
    /// backwards, i.e. the tuple was reused) is kept as an event with zero
    /// volume. An unchanged connection is dropped. A grown one carries its
    /// growth, prorated to `window` when the reads are further apart than
    /// that. Connections missing from this read are forgotten.
    pub fn deltas(
        &self,
        device_id: DeviceId,
        flows: Vec<TrafficFlow>,
        observed_at: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Vec<TrafficFlow> {
        let mut current = HashMap::with_capacity(flows.len());
        let mut fresh = Vec::new();

        let mut entry = self.reads.entry(device_id).or_insert_with(|| TableRead {
            at: observed_at,
            connections: HashMap::new(),
        });
        let elapsed = observed_at - entry.at;

        for mut flow in flows {
            let counters = Counters {
                bytes: flow.byte_count,
                packets: flow.packet_count,
            };
            let conn = key(&flow);
            if current.insert(conn, counters).is_some() {
                continue;
            }
            match entry.connections.get(&conn) {
                Some(prev) if *prev == counters => continue,
                Some(prev) if counters.bytes >= prev.bytes && counters.packets >= prev.packets => {
                    flow.byte_count = prorate(counters.bytes - prev.bytes, elapsed, window);
                    flow.packet_count = prorate(counters.packets - prev.packets, elapsed, window);
                }
                _ => {
                    flow.byte_count = 0;
                    flow.packet_count = 0;
                }
            }
            fresh.push(flow);
        }

        entry.at = observed_at;
        entry.connections = current;
        fresh
    }

    /// Forget a device's last read.
    pub fn reset(&self, device_id: DeviceId) {
        self.reads.remove(&device_id);
    }

    pub fn tracked_devices(&self) -> usize {
        self.reads.len()
    }
}

/// Share of `delta` that falls inside the last `window` of `elapsed`.
fn prorate(delta: u64, elapsed: chrono::Duration, window: chrono::Duration) -> u64 {
    let elapsed_ms = u128::try_from(elapsed.num_milliseconds()).unwrap_or(0);
    let window_ms = u128::try_from(window.num_milliseconds()).unwrap_or(0);
    if elapsed_ms <= window_ms || window_ms == 0 {
        return delta;
    }
    u64::try_from(u128::from(delta) * window_ms / elapsed_ms).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn download(bytes: u64, at: DateTime<Utc>) -> TrafficFlow {
        TrafficFlow {
            source_addr: "192.168.88.20".parse().unwrap(),
            dest_addr: "151.101.1.1".parse().unwrap(),
            source_port: 51_544,
            dest_port: 443,
            protocol: Protocol::Tcp,
            byte_count: bytes,
            packet_count: bytes / 1_000,
            duration_ms: 86_398_000,
            timestamp: at,
            device_id: DeviceId::new(1),
        }
    }

    #[test]
    fn first_sighting_has_no_volume() {
        let tracker = ConnectionTracker::new();
        let t0 = Utc::now();
        let window = chrono::Duration::seconds(10);
        let out = tracker.deltas(DeviceId::new(1), vec![download(150_000_000, t0)], t0, window);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].byte_count, 0);
        assert_eq!(out[0].packet_count, 0);
    }

    #[test]
    fn unchanged_rows_are_dropped_and_growth_is_scored() {
        let tracker = ConnectionTracker::new();
        let id = DeviceId::new(1);
        let window = chrono::Duration::seconds(10);
        let t0 = Utc::now();
        tracker.deltas(id, vec![download(150_000_000, t0)], t0, window);

        let t1 = t0 + chrono::Duration::seconds(5);
        assert!(tracker.deltas(id, vec![download(150_000_000, t1)], t1, window).is_empty());

        let t2 = t1 + chrono::Duration::seconds(5);
        let out = tracker.deltas(id, vec![download(150_040_000, t2)], t2, window);
        assert_eq!(out[0].byte_count, 40_000);
        assert_eq!(out[0].packet_count, 40);
    }

    #[test]
    fn long_gaps_are_prorated_to_the_window() {
        let tracker = ConnectionTracker::new();
        let id = DeviceId::new(1);
        let window = chrono::Duration::seconds(10);
        let t0 = Utc::now();
        tracker.deltas(id, vec![download(1_000_000, t0)], t0, window);

        let t1 = t0 + chrono::Duration::seconds(60);
        let out = tracker.deltas(id, vec![download(7_000_000, t1)], t1, window);
        assert_eq!(out[0].byte_count, 1_000_000);
    }

    #[test]
    fn reused_tuple_and_vanished_rows_rebaseline() {
        let tracker = ConnectionTracker::new();
        let id = DeviceId::new(1);
        let window = chrono::Duration::seconds(10);
        let t0 = Utc::now();
        tracker.deltas(id, vec![download(5_000_000, t0)], t0, window);

        let t1 = t0 + chrono::Duration::seconds(1);
        let out = tracker.deltas(id, vec![download(2_000, t1)], t1, window);
        assert_eq!(out[0].byte_count, 0);

        let t2 = t1 + chrono::Duration::seconds(1);
        assert!(tracker.deltas(id, Vec::new(), t2, window).is_empty());
        let t3 = t2 + chrono::Duration::seconds(1);
        let out = tracker.deltas(id, vec![download(9_000, t3)], t3, window);
        assert_eq!(out[0].byte_count, 0);

        tracker.reset(id);
        assert_eq!(tracker.tracked_devices(), 0);
    }
}
