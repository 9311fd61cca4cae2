// ── Interface domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::DeviceId;

/// Cumulative counters read from one interface of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub name: String,
    pub running: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_drops: u64,
    pub tx_drops: u64,
    /// Negotiated link speed in bits per second, when the device reports it.
    pub link_speed_bps: Option<u64>,
}

impl InterfaceCounters {
    pub fn total_bytes(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }

    pub fn total_packets(&self) -> u64 {
        self.rx_packets.saturating_add(self.tx_packets)
    }

    pub fn total_errors(&self) -> u64 {
        self.rx_errors.saturating_add(self.tx_errors)
    }

    pub fn total_drops(&self) -> u64 {
        self.rx_drops.saturating_add(self.tx_drops)
    }
}

/// A stored interface: last counters plus the last computed health score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub device_id: DeviceId,
    pub counters: InterfaceCounters,
    pub health_score: Option<u8>,
    pub updated_at: DateTime<Utc>,
}

impl Interface {
    pub fn name(&self) -> &str {
        &self.counters.name
    }
}
