// ── Neighbor observations ──
//
// Raw sightings of hosts in a router's ARP table, DHCP leases, or
// neighbor-discovery table, after parsing but before they become devices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::entity_id::{DeviceId, MacAddress};

/// Which table a sighting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ObservationSource {
    Arp,
    Dhcp,
    Neighbor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborObservation {
    pub address: IpAddr,
    pub mac: Option<MacAddress>,
    pub hostname: Option<String>,
    pub source: ObservationSource,
    /// Platform string advertised over a neighbor protocol (e.g. "MikroTik").
    pub platform: Option<String>,
    /// Capabilities advertised over a neighbor protocol (e.g. "bridge,router").
    pub advertised_capabilities: Vec<String>,
    pub interface: Option<String>,
    /// Router whose table contained the entry.
    pub reported_by: DeviceId,
    pub observed_at: DateTime<Utc>,
}
