// ── Flow-group windows and detectors ──
//
// Each detector owns a map of flow groups. A group is a sliding,
// event-time window of recent flows under the detector's key; it is
// updated and evaluated under its map shard lock, so one key's
// read-modify-write never interleaves while other keys stay unblocked.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::{BruteForceConfig, DosConfig, PortScanConfig};
use crate::model::{AttackType, TrafficFlow};

/// A detector's opinion about one flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub attack_type: AttackType,
    pub probability: f64,
    pub confidence: f64,
    pub description: String,
}

/// `0.75` just over threshold, rising linearly to `1.0` at 1.5x.
pub fn probability_over(observed: f64, threshold: f64) -> Option<f64> {
    if threshold <= 0.0 || observed <= threshold {
        return None;
    }
    let excess = (observed / threshold - 1.0) / 0.5;
    Some(0.75 + 0.25 * excess.min(1.0))
}

/// Evidence relative to twice the threshold, capped at 1.
pub fn confidence(observed: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    (observed / (2.0 * threshold)).clamp(0.0, 1.0)
}

fn to_chrono(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX)
}

/// Oldest timestamp still inside `window` of `latest`.
fn horizon(latest: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    latest
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn as_f64(value: usize) -> f64 {
    value as f64
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn u64_as_f64(value: u64) -> f64 {
    value as f64
}

// ── Windows ────────────────────────────────────────────────────────

/// Common eviction bookkeeping.
trait FlowWindow {
    fn last_event(&self) -> DateTime<Utc>;
}

#[derive(Debug)]
struct PortWindow {
    events: VecDeque<(DateTime<Utc>, u16)>,
    ports: HashMap<u16, usize>,
    last_event: DateTime<Utc>,
}

impl PortWindow {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            events: VecDeque::new(),
            ports: HashMap::new(),
            last_event: at,
        }
    }

    fn push(&mut self, at: DateTime<Utc>, port: u16, window: chrono::Duration) {
        self.events.push_back((at, port));
        *self.ports.entry(port).or_insert(0) += 1;
        self.last_event = self.last_event.max(at);

        let horizon = horizon(self.last_event, window);
        while let Some(&(ts, old)) = self.events.front() {
            if ts >= horizon {
                break;
            }
            self.events.pop_front();
            if let Some(count) = self.ports.get_mut(&old) {
                *count -= 1;
                if *count == 0 {
                    self.ports.remove(&old);
                }
            }
        }
    }

    fn distinct_ports(&self) -> usize {
        self.ports.len()
    }
}

impl FlowWindow for PortWindow {
    fn last_event(&self) -> DateTime<Utc> {
        self.last_event
    }
}

#[derive(Debug)]
struct VolumeWindow {
    events: VecDeque<(DateTime<Utc>, u64, u64)>,
    bytes: u64,
    packets: u64,
    last_event: DateTime<Utc>,
}

impl VolumeWindow {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            events: VecDeque::new(),
            bytes: 0,
            packets: 0,
            last_event: at,
        }
    }

    fn push(&mut self, at: DateTime<Utc>, bytes: u64, packets: u64, window: chrono::Duration) {
        self.events.push_back((at, bytes, packets));
        self.bytes = self.bytes.saturating_add(bytes);
        self.packets = self.packets.saturating_add(packets);
        self.last_event = self.last_event.max(at);

        let horizon = horizon(self.last_event, window);
        while let Some(&(ts, b, p)) = self.events.front() {
            if ts >= horizon {
                break;
            }
            self.events.pop_front();
            self.bytes = self.bytes.saturating_sub(b);
            self.packets = self.packets.saturating_sub(p);
        }
    }
}

impl FlowWindow for VolumeWindow {
    fn last_event(&self) -> DateTime<Utc> {
        self.last_event
    }
}

#[derive(Debug)]
struct AttemptWindow {
    events: VecDeque<DateTime<Utc>>,
    last_event: DateTime<Utc>,
}

impl AttemptWindow {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            events: VecDeque::new(),
            last_event: at,
        }
    }

    fn push(&mut self, at: DateTime<Utc>, window: chrono::Duration) {
        self.events.push_back(at);
        self.last_event = self.last_event.max(at);
        let horizon = horizon(self.last_event, window);
        while self.events.front().is_some_and(|&ts| ts < horizon) {
            self.events.pop_front();
        }
    }
}

impl FlowWindow for AttemptWindow {
    fn last_event(&self) -> DateTime<Utc> {
        self.last_event
    }
}

fn evict<K, W>(groups: &DashMap<K, W>, now: DateTime<Utc>, idle: chrono::Duration) -> usize
where
    K: Eq + std::hash::Hash,
    W: FlowWindow,
{
    let before = groups.len();
    groups.retain(|_, w| now - w.last_event() <= idle);
    before.saturating_sub(groups.len())
}

// ── Detectors ──────────────────────────────────────────────────────

/// Many distinct destination ports from one source.
#[derive(Debug)]
pub struct PortScanDetector {
    config: PortScanConfig,
    groups: DashMap<IpAddr, PortWindow>,
}

impl PortScanDetector {
    pub fn new(config: PortScanConfig) -> Self {
        Self {
            config,
            groups: DashMap::new(),
        }
    }

    pub fn observe(&self, flow: &TrafficFlow) -> Option<Verdict> {
        let window = to_chrono(self.config.window);
        let distinct = {
            let mut group = self
                .groups
                .entry(flow.source_addr)
                .or_insert_with(|| PortWindow::new(flow.timestamp));
            group.push(flow.timestamp, flow.dest_port, window);
            group.distinct_ports()
        };

        let threshold = as_f64(self.config.distinct_port_threshold);
        let observed = as_f64(distinct);
        let probability = probability_over(observed, threshold)?;
        Some(Verdict {
            attack_type: AttackType::PortScan,
            probability,
            confidence: confidence(observed, threshold),
            description: format!(
                "{} contacted {distinct} distinct ports within {}s",
                flow.source_addr,
                self.config.window.as_secs()
            ),
        })
    }

    pub fn evict_idle(&self, now: DateTime<Utc>, idle: chrono::Duration) -> usize {
        evict(&self.groups, now, idle)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Aggregate byte or packet rate towards one destination endpoint.
#[derive(Debug)]
pub struct DosDetector {
    config: DosConfig,
    groups: DashMap<(IpAddr, u16), VolumeWindow>,
}

impl DosDetector {
    pub fn new(config: DosConfig) -> Self {
        Self {
            config,
            groups: DashMap::new(),
        }
    }

    pub fn observe(&self, flow: &TrafficFlow) -> Option<Verdict> {
        let window = to_chrono(self.config.window);
        let (bytes, packets) = {
            let mut group = self
                .groups
                .entry((flow.dest_addr, flow.dest_port))
                .or_insert_with(|| VolumeWindow::new(flow.timestamp));
            group.push(flow.timestamp, flow.byte_count, flow.packet_count, window);
            (group.bytes, group.packets)
        };

        let secs = self.config.window.as_secs_f64().max(f64::EPSILON);
        let byte_rate = u64_as_f64(bytes) / secs;
        let packet_rate = u64_as_f64(packets) / secs;
        let byte_threshold = u64_as_f64(self.config.bytes_per_sec_threshold);
        let packet_threshold = u64_as_f64(self.config.packets_per_sec_threshold);

        // Judge by whichever rate is further over its threshold.
        let bytes_ratio = byte_rate / byte_threshold;
        let packets_ratio = packet_rate / packet_threshold;
        let (observed, threshold, unit) = if bytes_ratio >= packets_ratio {
            (byte_rate, byte_threshold, "B/s")
        } else {
            (packet_rate, packet_threshold, "pkt/s")
        };
        let probability = probability_over(observed, threshold)?;
        Some(Verdict {
            attack_type: AttackType::DosAttack,
            probability,
            confidence: confidence(observed, threshold),
            description: format!(
                "{}:{} receiving {observed:.0} {unit} (threshold {threshold:.0})",
                flow.dest_addr, flow.dest_port
            ),
        })
    }

    pub fn evict_idle(&self, now: DateTime<Utc>, idle: chrono::Duration) -> usize {
        evict(&self.groups, now, idle)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Repeated short connections from one source to one auth-sensitive port.
#[derive(Debug)]
pub struct BruteForceDetector {
    config: BruteForceConfig,
    groups: DashMap<(IpAddr, u16), AttemptWindow>,
}

impl BruteForceDetector {
    pub fn new(config: BruteForceConfig) -> Self {
        Self {
            config,
            groups: DashMap::new(),
        }
    }

    pub fn observe(&self, flow: &TrafficFlow) -> Option<Verdict> {
        if !self.config.auth_ports.contains(&flow.dest_port) {
            return None;
        }
        let max_ms =
            u64::try_from(self.config.max_attempt_duration.as_millis()).unwrap_or(u64::MAX);
        if flow.duration_ms > max_ms {
            return None;
        }

        let window = to_chrono(self.config.window);
        let attempts = {
            let mut group = self
                .groups
                .entry((flow.source_addr, flow.dest_port))
                .or_insert_with(|| AttemptWindow::new(flow.timestamp));
            group.push(flow.timestamp, window);
            group.events.len()
        };

        let threshold = as_f64(self.config.attempt_threshold);
        let observed = as_f64(attempts);
        let probability = probability_over(observed, threshold)?;
        Some(Verdict {
            attack_type: AttackType::BruteForce,
            probability,
            confidence: confidence(observed, threshold),
            description: format!(
                "{} made {attempts} short connections to port {} within {}s",
                flow.source_addr,
                flow.dest_port,
                self.config.window.as_secs()
            ),
        })
    }

    pub fn evict_idle(&self, now: DateTime<Utc>, idle: chrono::Duration) -> usize {
        evict(&self.groups, now, idle)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
