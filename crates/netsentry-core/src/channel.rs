// ── Device command channel ──
//
// The management-protocol client lives outside this crate. The engine
// only needs "run this command path on that device and give me the rows
// back"; any failure underneath is a `CoreError::Connectivity`.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::DeviceId;

/// One row returned by a device command: field name → raw string value.
pub type RawRecord = BTreeMap<String, String>;

/// Abstract command execution against a managed device.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn execute_command(
        &self,
        device_id: DeviceId,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<RawRecord>, CoreError>;
}

/// Build a `RawRecord` from literal pairs.
pub fn raw_record<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> RawRecord {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

// ── Command paths ───────────────────────────────────────────────────

pub mod paths {
    pub const INTERFACES: &str = "/interface/print";
    pub const CONNECTIONS: &str = "/ip/firewall/connection/print";
    pub const SIMPLE_QUEUES: &str = "/queue/simple/print";
    pub const WIRELESS_REGISTRATIONS: &str = "/interface/wireless/registration-table/print";
    pub const CAPSMAN_REGISTRATIONS: &str = "/caps-man/registration-table/print";
    pub const ARP: &str = "/ip/arp/print";
    pub const DHCP_LEASES: &str = "/ip/dhcp-server/lease/print";
    pub const NEIGHBORS: &str = "/ip/neighbor/print";
    pub const WIRELESS_INTERFACES: &str = "/interface/wireless/print";
    pub const CAPSMAN_MANAGER: &str = "/caps-man/manager/print";
    pub const ROUTES: &str = "/ip/route/print";
}
