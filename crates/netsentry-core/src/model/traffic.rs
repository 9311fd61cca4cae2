// ── Traffic domain types ──
//
// `TrafficRecord` is what the strategy selector hands back per device per
// poll. `TrafficFlow` is the anomaly engine's input: one observed
// conversation between two endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::entity_id::DeviceId;

/// One way of obtaining traffic counters from a device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum MethodKind {
    MetricsPoll,
    FirewallPoll,
    DhcpPoll,
    WirelessStatsPoll,
    CapsmanPoll,
    ArpPresencePoll,
    TrafficEstimate,
}

/// Rates produced by one collection method, in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub download: u64,
    pub upload: u64,
}

impl TrafficSample {
    pub fn new(download: u64, upload: u64) -> Self {
        Self { download, upload }
    }

    /// A sample only counts as a successful collection if at least one
    /// counter moved.
    pub fn has_traffic(&self) -> bool {
        self.download > 0 || self.upload > 0
    }
}

/// How much to trust a record: the role's primary method answered, or a
/// fallback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RecordConfidence {
    Primary,
    Partial,
}

/// Normalized traffic measurement. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub device_id: DeviceId,
    /// Bytes per second towards the device / its clients.
    pub download: u64,
    /// Bytes per second away from the device / its clients.
    pub upload: u64,
    pub timestamp: DateTime<Utc>,
    pub source_method: MethodKind,
    pub confidence: RecordConfidence,
}

/// Transport protocol of a flow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    #[serde(other)]
    Other,
}

impl Protocol {
    /// Lenient parse used at the device boundary: anything unrecognized
    /// becomes `Other` rather than failing the whole record.
    pub fn from_raw(raw: &str) -> Self {
        raw.trim().parse().unwrap_or(Self::Other)
    }
}

/// One observed flow. Immutable, append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficFlow {
    pub source_addr: IpAddr,
    pub dest_addr: IpAddr,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: Protocol,
    pub byte_count: u64,
    pub packet_count: u64,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub device_id: DeviceId,
}
