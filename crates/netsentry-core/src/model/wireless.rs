// ── Wireless domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::{DeviceId, MacAddress};

/// One station in an access point's registration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirelessClient {
    pub mac: MacAddress,
    pub interface: Option<String>,
    pub signal_dbm: Option<i32>,
    /// Cumulative bytes sent to the station.
    pub download: u64,
    /// Cumulative bytes received from the station.
    pub upload: u64,
}

/// Snapshot of an access point's associated stations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirelessStats {
    pub device_id: DeviceId,
    pub clients: Vec<WirelessClient>,
    pub collected_at: DateTime<Utc>,
}

impl WirelessStats {
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Mean signal over stations that report one.
    pub fn average_signal_dbm(&self) -> Option<i32> {
        let signals: Vec<i64> = self
            .clients
            .iter()
            .filter_map(|c| c.signal_dbm)
            .map(i64::from)
            .collect();
        if signals.is_empty() {
            return None;
        }
        let count = i64::try_from(signals.len()).ok()?;
        i32::try_from(signals.iter().sum::<i64>() / count).ok()
    }
}
