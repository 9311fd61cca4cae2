// ── Discovery & identification pipeline ──
//
// Discovery turns router neighbor tables into Device records. A novel
// address+MAC pair becomes an `unknown` device; a known one only has its
// liveness refreshed. Identification gathers vendor, probe and neighbor
// evidence into persisted signals, then hands off to the classifier.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{CommandChannel, RawRecord, paths};
use crate::classify::DeviceClassifier;
use crate::convert;
use crate::error::CoreError;
use crate::model::{
    Capabilities, Device, DeviceId, DevicePatch, DeviceRole, IdentificationSignals, MacAddress,
    NeighborObservation, NewDevice, ObservationSource,
};
use crate::notify::{self, Notifier, topics};
use crate::store::Repository;

// ── Subnet filter ──────────────────────────────────────────────────

/// IPv4 network used to restrict a manual discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    pub fn new(host: Ipv4Addr, prefix: u8) -> Result<Self, CoreError> {
        if prefix > 32 {
            return Err(CoreError::validation(
                "subnet",
                format!("IPv4 prefix length must be <= 32, got {prefix}"),
            ));
        }
        let network = Ipv4Addr::from(u32::from(host) & Self::mask(prefix));
        Ok(Self { network, prefix })
    }

    fn mask(prefix: u8) -> u32 {
        u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        match address {
            IpAddr::V4(v4) => u32::from(v4) & Self::mask(self.prefix) == u32::from(self.network),
            IpAddr::V6(_) => false,
        }
    }
}

impl FromStr for Subnet {
    type Err = CoreError;

    fn from_str(cidr: &str) -> Result<Self, Self::Err> {
        let (host, prefix) = cidr.trim().split_once('/').ok_or_else(|| {
            CoreError::validation("subnet", format!("invalid IPv4 network/prefix value '{cidr}'"))
        })?;
        let host: Ipv4Addr = host.parse().map_err(|_| {
            CoreError::validation("subnet", format!("invalid IPv4 address '{host}'"))
        })?;
        let prefix: u8 = prefix.parse().map_err(|_| {
            CoreError::validation("subnet", format!("invalid IPv4 prefix length '{prefix}'"))
        })?;
        Self::new(host, prefix)
    }
}

impl TryFrom<String> for Subnet {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(subnet: Subnet) -> Self {
        subnet.to_string()
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

// ── Vendor lookup ──────────────────────────────────────────────────

const BUILTIN_OUI: &[(&str, &str)] = &[
    ("00:0c:42", "MikroTik"),
    ("2c:c8:1b", "MikroTik"),
    ("48:8f:5a", "MikroTik"),
    ("4c:5e:0c", "MikroTik"),
    ("64:d1:54", "MikroTik"),
    ("6c:3b:6b", "MikroTik"),
    ("b8:69:f4", "MikroTik"),
    ("cc:2d:e0", "MikroTik"),
    ("d4:ca:6d", "MikroTik"),
    ("dc:2c:6e", "MikroTik"),
    ("e4:8d:8c", "MikroTik"),
    ("18:e8:29", "Ubiquiti"),
    ("24:a4:3c", "Ubiquiti"),
    ("78:8a:20", "Ubiquiti"),
    ("f0:9f:c2", "Ubiquiti"),
    ("fc:ec:da", "Ubiquiti"),
    ("50:c7:bf", "TP-Link"),
    ("98:da:c4", "TP-Link"),
    ("00:1b:54", "Cisco"),
    ("00:50:56", "VMware"),
    ("b8:27:eb", "Raspberry Pi"),
    ("dc:a6:32", "Raspberry Pi"),
    ("3c:22:fb", "Apple"),
    ("f0:18:98", "Apple"),
    ("8c:85:90", "Apple"),
    ("3c:97:0e", "Intel"),
    ("a4:c3:f0", "Intel"),
    ("00:15:5d", "Microsoft"),
    ("ac:bc:32", "Samsung"),
];

/// MAC prefix → vendor name.
#[derive(Debug, Clone)]
pub struct OuiTable {
    vendors: HashMap<String, String>,
}

impl OuiTable {
    pub fn builtin() -> Self {
        Self {
            vendors: BUILTIN_OUI
                .iter()
                .map(|&(prefix, vendor)| (prefix.to_owned(), vendor.to_owned()))
                .collect(),
        }
    }

    /// Add or override entries. Prefixes are normalized like MAC addresses.
    pub fn with_entries(mut self, entries: impl IntoIterator<Item = (String, String)>) -> Self {
        for (prefix, vendor) in entries {
            let normalized = MacAddress::new(prefix);
            self.vendors.insert(normalized.as_str().to_owned(), vendor);
        }
        self
    }

    pub fn lookup_vendor(&self, mac: &MacAddress) -> Option<&str> {
        mac.oui()
            .and_then(|oui| self.vendors.get(oui))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }
}

impl Default for OuiTable {
    fn default() -> Self {
        Self::builtin()
    }
}

// ── Reports ────────────────────────────────────────────────────────

/// Outcome of one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub routers_scanned: usize,
    pub routers_failed: usize,
    pub observations: usize,
    pub created: usize,
    pub refreshed: usize,
    /// Observations dropped by the subnet filter.
    pub filtered: usize,
    pub subnet: Option<Subnet>,
}

impl DiscoveryReport {
    fn absorb(&mut self, other: &Self) {
        self.routers_scanned += other.routers_scanned;
        self.routers_failed += other.routers_failed;
        self.observations += other.observations;
        self.created += other.created;
        self.refreshed += other.refreshed;
        self.filtered += other.filtered;
    }
}

/// Outcome of an identification pass over pending devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationReport {
    pub attempted: usize,
    pub identified: usize,
    pub failed: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceEvent<'a> {
    device_id: DeviceId,
    address: IpAddr,
    role: DeviceRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    vendor: Option<&'a str>,
}

// ── Pipeline ───────────────────────────────────────────────────────

type ObservationParser = fn(&RawRecord, DeviceId, DateTime<Utc>) -> Option<NeighborObservation>;

/// Discovery and identification over a repository and command channel.
#[derive(Clone)]
pub struct DiscoveryPipeline {
    store: Arc<dyn Repository>,
    channel: Arc<dyn CommandChannel>,
    notifier: Arc<dyn Notifier>,
    classifier: DeviceClassifier,
    oui: Arc<OuiTable>,
}

impl DiscoveryPipeline {
    pub fn new(
        store: Arc<dyn Repository>,
        channel: Arc<dyn CommandChannel>,
        notifier: Arc<dyn Notifier>,
        oui: OuiTable,
    ) -> Self {
        let classifier = DeviceClassifier::new(Arc::clone(&store), Arc::clone(&notifier));
        Self {
            store,
            channel,
            notifier,
            classifier,
            oui: Arc::new(oui),
        }
    }

    pub fn classifier(&self) -> &DeviceClassifier {
        &self.classifier
    }

    pub fn lookup_vendor(&self, mac: &MacAddress) -> Option<&str> {
        self.oui.lookup_vendor(mac)
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Scan every managed router, optionally keeping only hosts in `subnet`.
    ///
    /// A router that cannot be reached is skipped; the run fails only when
    /// every router failed.
    pub async fn scan(&self, subnet: Option<Subnet>) -> Result<DiscoveryReport, CoreError> {
        let routers: Vec<Device> = self
            .store
            .list_devices()
            .await?
            .into_iter()
            .filter(|d| d.managed && d.role == DeviceRole::Router)
            .collect();

        let mut report = DiscoveryReport {
            subnet,
            ..DiscoveryReport::default()
        };
        let mut last_error = None;
        for router in &routers {
            match self.scan_router(router, subnet.as_ref()).await {
                Ok(partial) => report.absorb(&partial),
                Err(e) => {
                    warn!(device_id = %router.id, error = %e, "router scan failed");
                    report.routers_scanned += 1;
                    report.routers_failed += 1;
                    last_error = Some(e);
                }
            }
        }

        if report.routers_failed == routers.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        info!(
            routers = report.routers_scanned,
            created = report.created,
            refreshed = report.refreshed,
            "discovery scan complete"
        );
        Ok(report)
    }

    /// Discover hosts behind a single managed router.
    pub async fn discover_router(&self, id: DeviceId) -> Result<DiscoveryReport, CoreError> {
        let router = self
            .store
            .get_device(id)
            .await?
            .ok_or(CoreError::DeviceNotFound { device_id: id })?;
        if !router.managed {
            return Err(CoreError::validation(
                "device_id",
                format!("device {id} is not reachable over the command channel"),
            ));
        }
        self.scan_router(&router, None).await
    }

    async fn scan_router(
        &self,
        router: &Device,
        subnet: Option<&Subnet>,
    ) -> Result<DiscoveryReport, CoreError> {
        let observations = self.collect_observations(router).await?;
        let mut report = self.ingest(&observations, subnet).await?;
        report.routers_scanned = 1;
        Ok(report)
    }

    /// Read the ARP table (required) plus DHCP leases and neighbor-protocol
    /// entries (best effort) from a router.
    pub async fn collect_observations(
        &self,
        router: &Device,
    ) -> Result<Vec<NeighborObservation>, CoreError> {
        let now = Utc::now();
        let arp = self.run(router.id, paths::ARP).await?;
        let mut observations: Vec<NeighborObservation> = arp
            .iter()
            .filter_map(|r| convert::arp_observation(r, router.id, now))
            .collect();

        for (path, parse) in [
            (paths::DHCP_LEASES, convert::dhcp_observation as ObservationParser),
            (paths::NEIGHBORS, convert::neighbor_observation),
        ] {
            match self.run(router.id, path).await {
                Ok(records) => {
                    observations.extend(records.iter().filter_map(|r| parse(r, router.id, now)));
                }
                Err(e) => debug!(device_id = %router.id, path, error = %e, "optional table unavailable"),
            }
        }
        Ok(observations)
    }

    /// Merge observations into the device table.
    pub async fn ingest(
        &self,
        observations: &[NeighborObservation],
        subnet: Option<&Subnet>,
    ) -> Result<DiscoveryReport, CoreError> {
        let mut report = DiscoveryReport {
            observations: observations.len(),
            subnet: subnet.copied(),
            ..DiscoveryReport::default()
        };

        // One host often appears in several tables; fold them first.
        let mut hosts: BTreeMap<IpAddr, Vec<&NeighborObservation>> = BTreeMap::new();
        for obs in observations {
            if subnet.is_some_and(|s| !s.contains(obs.address)) {
                report.filtered += 1;
                continue;
            }
            hosts.entry(obs.address).or_default().push(obs);
        }

        for (address, sightings) in hosts {
            let mac = sightings.iter().find_map(|o| o.mac.clone());
            let seen_at = sightings
                .iter()
                .map(|o| o.observed_at)
                .max()
                .unwrap_or_else(Utc::now);

            if let Some(existing) = self.store.find_device(address, mac.as_ref()).await? {
                self.refresh(&existing, seen_at).await?;
                report.refreshed += 1;
                continue;
            }

            let mut new = NewDevice::discovered(address, mac, seen_at);
            new.parent_id = sightings.first().map(|o| o.reported_by);
            new.hostname = sightings.iter().find_map(|o| o.hostname.clone());
            new.signals = observation_signals(&sightings);
            let device = self.store.create_device(new).await?;
            report.created += 1;
            info!(device_id = %device.id, address = %device.address, "device discovered");
            notify::publish_json(
                self.notifier.as_ref(),
                topics::DEVICE_DISCOVERED,
                &DeviceEvent {
                    device_id: device.id,
                    address: device.address,
                    role: device.role,
                    vendor: None,
                },
            );
        }
        Ok(report)
    }

    async fn refresh(&self, device: &Device, seen_at: DateTime<Utc>) -> Result<(), CoreError> {
        let newer = device.last_seen.is_none_or(|last| seen_at > last);
        if newer || !device.is_online {
            self.store
                .update_device(device.id, DevicePatch::seen(seen_at))
                .await?;
        }
        if !device.is_online {
            info!(device_id = %device.id, "device seen again");
            notify::publish_json(
                self.notifier.as_ref(),
                topics::DEVICE_ONLINE,
                &serde_json::json!({ "deviceId": device.id }),
            );
        }
        Ok(())
    }

    // ── Identification ───────────────────────────────────────────────

    /// Gather evidence for one device, persist it, then classify.
    pub async fn identify(&self, id: DeviceId) -> Result<Device, CoreError> {
        let device = self
            .store
            .get_device(id)
            .await?
            .ok_or(CoreError::DeviceNotFound { device_id: id })?;

        let mut signals = device.signals.clone();
        let vendor = device
            .mac
            .as_ref()
            .and_then(|mac| self.oui.lookup_vendor(mac))
            .map(str::to_owned);
        let mut patch = DevicePatch {
            identified_at: Some(Utc::now()),
            ..DevicePatch::default()
        };

        if device.managed {
            let (probed, caps) = self.probe_managed(&device).await?;
            signals.absorb(&probed);
            patch.capabilities = Some(caps);
        } else if let Some(parent) = device.parent_id {
            let (observed, hostname) = self.probe_via_parent(&device, parent).await?;
            signals.absorb(&observed);
            if device.hostname.is_none() {
                patch.hostname = hostname;
            }
        }
        if vendor.is_some() {
            signals.vendor.clone_from(&vendor);
        }
        patch.signals = Some(signals);

        self.store.update_device(id, patch).await?;
        let role = self.classifier.classify_device(id).await?;
        let device = self
            .store
            .get_device(id)
            .await?
            .ok_or(CoreError::DeviceNotFound { device_id: id })?;

        info!(device_id = %id, %role, vendor = ?vendor, "device identified");
        notify::publish_json(
            self.notifier.as_ref(),
            topics::DEVICE_IDENTIFIED,
            &DeviceEvent {
                device_id: id,
                address: device.address,
                role,
                vendor: vendor.as_deref(),
            },
        );
        Ok(device)
    }

    /// Identify every device that has not been identified yet.
    pub async fn identify_pending(&self) -> Result<IdentificationReport, CoreError> {
        let pending: Vec<DeviceId> = self
            .store
            .list_devices()
            .await?
            .into_iter()
            .filter(|d| !d.is_identified())
            .map(|d| d.id)
            .collect();

        let mut report = IdentificationReport {
            attempted: pending.len(),
            ..IdentificationReport::default()
        };
        for id in pending {
            match self.identify(id).await {
                Ok(_) => report.identified += 1,
                Err(e) => {
                    warn!(device_id = %id, error = %e, "identification failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Probe a managed device's wireless, controller and routing tables.
    ///
    /// Missing packages answer with errors, so a single failed probe only
    /// means "absent"; all three failing means the device is unreachable.
    async fn probe_managed(
        &self,
        device: &Device,
    ) -> Result<(IdentificationSignals, Capabilities), CoreError> {
        let wireless = self.run(device.id, paths::WIRELESS_INTERFACES).await;
        let capsman = self.run(device.id, paths::CAPSMAN_MANAGER).await;
        let routes = self.run(device.id, paths::ROUTES).await;

        if let (Err(e), Err(_), Err(_)) = (&wireless, &capsman, &routes) {
            return Err(e.clone());
        }

        let has_wireless = wireless.as_ref().is_ok_and(|rows| !rows.is_empty());
        let has_capsman = capsman.as_ref().is_ok_and(|rows| {
            rows.iter()
                .any(|r| r.get("enabled").is_some_and(|v| v == "true" || v == "yes"))
        });
        let connected_networks = routes.as_ref().map_or(0, |rows| {
            rows.iter()
                .filter(|r| {
                    r.get("connect").is_some_and(|v| v == "true")
                        || r.get("flags").is_some_and(|f| f.contains('C'))
                })
                .count()
        });

        let signals = IdentificationSignals {
            advertises_routing: connected_networks >= 2,
            wireless: has_wireless,
            ..IdentificationSignals::default()
        };
        debug!(
            device_id = %device.id,
            has_wireless,
            has_capsman,
            connected_networks,
            "managed probe complete"
        );
        Ok((
            signals,
            Capabilities {
                has_wireless,
                has_capsman,
            },
        ))
    }

    /// Look an inferred device up in its parent router's tables.
    async fn probe_via_parent(
        &self,
        device: &Device,
        parent: DeviceId,
    ) -> Result<(IdentificationSignals, Option<String>), CoreError> {
        let Some(router) = self.store.get_device(parent).await? else {
            debug!(device_id = %device.id, parent = %parent, "parent router gone");
            return Ok((IdentificationSignals::default(), None));
        };
        let sightings: Vec<NeighborObservation> = self
            .collect_observations(&router)
            .await?
            .into_iter()
            .filter(|o| o.address == device.address)
            .collect();
        let refs: Vec<&NeighborObservation> = sightings.iter().collect();
        let hostname = sightings.iter().find_map(|o| o.hostname.clone());
        Ok((observation_signals(&refs), hostname))
    }

    async fn run(&self, device_id: DeviceId, path: &str) -> Result<Vec<RawRecord>, CoreError> {
        self.channel.execute_command(device_id, path, &[]).await
    }
}

/// Signals implied by where (and how) a host was seen.
fn observation_signals(sightings: &[&NeighborObservation]) -> IdentificationSignals {
    let mut signals = IdentificationSignals::default();
    for obs in sightings {
        match obs.source {
            ObservationSource::Arp => signals.arp_present = true,
            ObservationSource::Dhcp => signals.dhcp_present = true,
            ObservationSource::Neighbor => {
                for cap in &obs.advertised_capabilities {
                    match cap.as_str() {
                        "router" => signals.advertises_routing = true,
                        "wlan" | "wlan-ap" | "wireless" => signals.wireless = true,
                        _ => {}
                    }
                }
                if obs.platform.is_some() {
                    signals.platform.clone_from(&obs.platform);
                }
            }
        }
    }
    signals
}
