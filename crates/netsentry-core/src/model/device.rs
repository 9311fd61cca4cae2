// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::entity_id::{DeviceId, MacAddress};

/// Functional role of a device. Determines which collection methods apply.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
pub enum DeviceRole {
    Router,
    AccessPoint,
    Client,
    #[default]
    Unknown,
}

/// Capability flags advertised by (or probed on) a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub has_wireless: bool,
    /// Centralized wireless controller (CAPsMAN-style) control plane.
    pub has_capsman: bool,
}

/// Evidence gathered by identification, persisted so that
/// reclassification can be re-run without touching the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct IdentificationSignals {
    /// Device advertises a routing control plane (routes, neighbor
    /// protocol "router" capability).
    pub advertises_routing: bool,
    /// Wireless-specific evidence (radios, registration tables, wireless
    /// neighbor platform).
    pub wireless: bool,
    /// Seen in an ARP table.
    pub arp_present: bool,
    /// Holds (or held) a DHCP lease.
    pub dhcp_present: bool,
    pub vendor: Option<String>,
    pub platform: Option<String>,
    /// Well-known service ports observed open / advertised.
    pub open_services: Vec<u16>,
}

impl IdentificationSignals {
    /// Fold another set of signals into this one. Flags are sticky.
    pub fn absorb(&mut self, other: &IdentificationSignals) {
        self.advertises_routing |= other.advertises_routing;
        self.wireless |= other.wireless;
        self.arp_present |= other.arp_present;
        self.dhcp_present |= other.dhcp_present;
        if other.vendor.is_some() {
            self.vendor.clone_from(&other.vendor);
        }
        if other.platform.is_some() {
            self.platform.clone_from(&other.platform);
        }
        for port in &other.open_services {
            if !self.open_services.contains(port) {
                self.open_services.push(*port);
            }
        }
        self.open_services.sort_unstable();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The canonical Device record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub address: IpAddr,
    /// Hardware identifier; absent for neighbor-protocol-only sightings.
    pub mac: Option<MacAddress>,
    pub hostname: Option<String>,
    pub role: DeviceRole,
    pub capabilities: Capabilities,
    /// Reachable over the command channel (managed), as opposed to inferred.
    pub managed: bool,
    /// Router through which an inferred device was discovered.
    pub parent_id: Option<DeviceId>,
    pub signals: IdentificationSignals,
    pub identified_at: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    pub fn is_identified(&self) -> bool {
        self.identified_at.is_some()
    }

    /// Device to route commands through: managed devices answer for
    /// themselves, inferred ones through the router that saw them.
    pub fn command_target(&self) -> DeviceId {
        if self.managed {
            self.id
        } else {
            self.parent_id.unwrap_or(self.id)
        }
    }

    /// Human-facing label for logs.
    pub fn label(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

/// Fields required to create a device; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDevice {
    pub address: IpAddr,
    pub mac: Option<MacAddress>,
    pub hostname: Option<String>,
    pub role: DeviceRole,
    pub capabilities: Capabilities,
    pub managed: bool,
    pub parent_id: Option<DeviceId>,
    pub signals: IdentificationSignals,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl NewDevice {
    /// A device created by discovery: role unknown, online, seen now.
    pub fn discovered(address: IpAddr, mac: Option<MacAddress>, seen_at: DateTime<Utc>) -> Self {
        Self {
            address,
            mac,
            hostname: None,
            role: DeviceRole::Unknown,
            capabilities: Capabilities::default(),
            managed: false,
            parent_id: None,
            signals: IdentificationSignals::default(),
            is_online: true,
            last_seen: Some(seen_at),
        }
    }

    /// A managed device registered by an operator.
    pub fn managed(address: IpAddr, role: DeviceRole) -> Self {
        Self {
            address,
            mac: None,
            hostname: None,
            role,
            capabilities: Capabilities::default(),
            managed: true,
            parent_id: None,
            signals: IdentificationSignals::default(),
            is_online: true,
            last_seen: None,
        }
    }

    pub(crate) fn into_device(self, id: DeviceId) -> Device {
        Device {
            id,
            address: self.address,
            mac: self.mac,
            hostname: self.hostname,
            role: self.role,
            capabilities: self.capabilities,
            managed: self.managed,
            parent_id: self.parent_id,
            signals: self.signals,
            identified_at: None,
            is_online: self.is_online,
            last_seen: self.last_seen,
        }
    }
}

/// Partial device update. Only `Some` fields are written, so concurrent
/// writers touching different fields (discovery refreshing liveness,
/// classifier setting the role) never clobber each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePatch {
    pub role: Option<DeviceRole>,
    pub capabilities: Option<Capabilities>,
    pub hostname: Option<String>,
    pub mac: Option<MacAddress>,
    pub signals: Option<IdentificationSignals>,
    pub identified_at: Option<DateTime<Utc>>,
    pub is_online: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl DevicePatch {
    pub fn liveness(is_online: bool) -> Self {
        Self {
            is_online: Some(is_online),
            ..Self::default()
        }
    }

    pub fn seen(at: DateTime<Utc>) -> Self {
        Self {
            is_online: Some(true),
            last_seen: Some(at),
            ..Self::default()
        }
    }

    pub fn role(role: DeviceRole) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    /// Apply this patch in place.
    pub fn apply(&self, device: &mut Device) {
        if let Some(role) = self.role {
            device.role = role;
        }
        if let Some(caps) = self.capabilities {
            device.capabilities = caps;
        }
        if let Some(ref hostname) = self.hostname {
            device.hostname = Some(hostname.clone());
        }
        if let Some(ref mac) = self.mac {
            device.mac = Some(mac.clone());
        }
        if let Some(ref signals) = self.signals {
            device.signals = signals.clone();
        }
        if let Some(at) = self.identified_at {
            device.identified_at = Some(at);
        }
        if let Some(online) = self.is_online {
            device.is_online = online;
        }
        if let Some(at) = self.last_seen {
            device.last_seen = Some(at);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Device {
        NewDevice::discovered("10.0.0.5".parse().unwrap(), None, Utc::now())
            .into_device(DeviceId::new(5))
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("accesspoint".parse::<DeviceRole>().unwrap(), DeviceRole::AccessPoint);
        assert_eq!(DeviceRole::AccessPoint.to_string(), "accessPoint");
    }

    #[test]
    fn patch_only_touches_some_fields() {
        let mut device = sample();
        device.role = DeviceRole::Router;
        DevicePatch::liveness(false).apply(&mut device);
        assert!(!device.is_online);
        assert_eq!(device.role, DeviceRole::Router);
    }

    #[test]
    fn signals_absorb_is_sticky() {
        let mut base = IdentificationSignals {
            arp_present: true,
            open_services: vec![80],
            ..IdentificationSignals::default()
        };
        base.absorb(&IdentificationSignals {
            wireless: true,
            open_services: vec![22, 80],
            ..IdentificationSignals::default()
        });
        assert!(base.arp_present && base.wireless);
        assert_eq!(base.open_services, vec![22, 80]);
    }

    #[test]
    fn inferred_devices_route_through_parent() {
        let mut device = sample();
        device.parent_id = Some(DeviceId::new(1));
        assert_eq!(device.command_target(), DeviceId::new(1));
        device.managed = true;
        assert_eq!(device.command_target(), DeviceId::new(5));
    }
}
