// ── Role classification ──
//
// `classify` and `methods_for_role` are pure. `DeviceClassifier` applies
// them to stored devices: it reads a snapshot and writes each changed
// role as its own atomic patch, so it can run alongside discovery.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{Device, DeviceId, DevicePatch, DeviceRole, IdentificationSignals, MethodKind};
use crate::notify::{self, Notifier, topics};
use crate::store::Repository;

/// Assign a role from capability flags and identification evidence.
///
/// First match wins: a routing or wireless-controller control plane makes
/// a router; wireless evidence without routing makes an access point; ARP
/// or DHCP presence makes a client; anything else stays unknown.
pub fn classify(device: &Device, signals: &IdentificationSignals) -> DeviceRole {
    let caps = device.capabilities;
    if caps.has_capsman || signals.advertises_routing {
        DeviceRole::Router
    } else if caps.has_wireless || signals.wireless {
        DeviceRole::AccessPoint
    } else if signals.arp_present || signals.dhcp_present {
        DeviceRole::Client
    } else {
        DeviceRole::Unknown
    }
}

/// Collection methods for a role, most preferred first.
pub fn methods_for_role(role: DeviceRole) -> &'static [MethodKind] {
    match role {
        DeviceRole::Router => &[
            MethodKind::MetricsPoll,
            MethodKind::FirewallPoll,
            MethodKind::DhcpPoll,
        ],
        DeviceRole::AccessPoint => &[MethodKind::WirelessStatsPoll, MethodKind::CapsmanPoll],
        DeviceRole::Client => &[MethodKind::ArpPresencePoll, MethodKind::TrafficEstimate],
        DeviceRole::Unknown => &[],
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoleChanged {
    device_id: DeviceId,
    previous: DeviceRole,
    role: DeviceRole,
}

/// Applies classification to devices held by a repository.
#[derive(Clone)]
pub struct DeviceClassifier {
    store: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
}

impl DeviceClassifier {
    pub fn new(store: Arc<dyn Repository>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Classify one device from its stored signals, persisting a change.
    pub async fn classify_device(&self, id: DeviceId) -> Result<DeviceRole, CoreError> {
        let device = self
            .store
            .get_device(id)
            .await?
            .ok_or(CoreError::DeviceNotFound { device_id: id })?;
        let role = classify(&device, &device.signals);
        self.apply(&device, role).await?;
        Ok(role)
    }

    /// Re-run classification over every identified device.
    ///
    /// Returns how many roles changed; a second pass with no intervening
    /// change returns zero.
    pub async fn reclassify_all_devices(&self) -> Result<usize, CoreError> {
        let snapshot = self.store.list_devices().await?;
        let mut changed = 0;
        for device in snapshot.iter().filter(|d| d.is_identified()) {
            let role = classify(device, &device.signals);
            if self.apply(device, role).await? {
                changed += 1;
            }
        }
        info!(changed, total = snapshot.len(), "reclassification complete");
        Ok(changed)
    }

    async fn apply(&self, device: &Device, role: DeviceRole) -> Result<bool, CoreError> {
        if device.role == role {
            debug!(device_id = %device.id, %role, "role unchanged");
            return Ok(false);
        }
        self.store
            .update_device(device.id, DevicePatch::role(role))
            .await?;
        info!(
            device_id = %device.id,
            device = %device.label(),
            previous = %device.role,
            %role,
            "device role changed"
        );
        notify::publish_json(
            self.notifier.as_ref(),
            topics::DEVICE_ROLE_CHANGED,
            &RoleChanged {
                device_id: device.id,
                previous: device.role,
                role,
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::NewDevice;
    use crate::notify::NullNotifier;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn device() -> Device {
        NewDevice::discovered("10.0.0.7".parse().unwrap(), None, Utc::now())
            .into_device(DeviceId::new(7))
    }

    #[test]
    fn routing_beats_wireless() {
        let d = device();
        let signals = IdentificationSignals {
            advertises_routing: true,
            wireless: true,
            arp_present: true,
            ..IdentificationSignals::default()
        };
        assert_eq!(classify(&d, &signals), DeviceRole::Router);
    }

    #[test]
    fn controller_capability_makes_router() {
        let mut d = device();
        d.capabilities.has_capsman = true;
        assert_eq!(classify(&d, &IdentificationSignals::default()), DeviceRole::Router);
    }

    #[test]
    fn wireless_without_routing_is_access_point() {
        let mut d = device();
        d.capabilities.has_wireless = true;
        let signals = IdentificationSignals {
            dhcp_present: true,
            ..IdentificationSignals::default()
        };
        assert_eq!(classify(&d, &signals), DeviceRole::AccessPoint);
    }

    #[test]
    fn presence_only_is_client_and_nothing_is_unknown() {
        let d = device();
        let arp = IdentificationSignals {
            arp_present: true,
            ..IdentificationSignals::default()
        };
        assert_eq!(classify(&d, &arp), DeviceRole::Client);
        assert_eq!(classify(&d, &IdentificationSignals::default()), DeviceRole::Unknown);
        assert_eq!(classify(&d, &arp), classify(&d, &arp));
    }

    #[test]
    fn method_lists_follow_role() {
        assert_eq!(
            methods_for_role(DeviceRole::Router),
            &[MethodKind::MetricsPoll, MethodKind::FirewallPoll, MethodKind::DhcpPoll]
        );
        assert_eq!(
            methods_for_role(DeviceRole::Client),
            &[MethodKind::ArpPresencePoll, MethodKind::TrafficEstimate]
        );
        assert!(methods_for_role(DeviceRole::Unknown).is_empty());
    }

    #[tokio::test]
    async fn reclassify_twice_reports_zero_second_time() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for (addr, routing) in [("10.0.0.1", true), ("10.0.0.2", false)] {
            let mut new = NewDevice::discovered(addr.parse().unwrap(), None, now);
            new.signals = IdentificationSignals {
                advertises_routing: routing,
                arp_present: true,
                ..IdentificationSignals::default()
            };
            let created = store.create_device(new).await.unwrap();
            store
                .update_device(
                    created.id,
                    DevicePatch {
                        identified_at: Some(now),
                        ..DevicePatch::default()
                    },
                )
                .await
                .unwrap();
        }
        // Not identified yet: skipped.
        store
            .create_device(NewDevice::discovered("10.0.0.3".parse().unwrap(), None, now))
            .await
            .unwrap();

        let classifier = DeviceClassifier::new(store.clone(), Arc::new(NullNotifier));
        assert_eq!(classifier.reclassify_all_devices().await.unwrap(), 2);
        assert_eq!(classifier.reclassify_all_devices().await.unwrap(), 0);

        let roles: Vec<DeviceRole> = store
            .list_devices()
            .await
            .unwrap()
            .iter()
            .map(|d| d.role)
            .collect();
        assert_eq!(
            roles,
            vec![DeviceRole::Router, DeviceRole::Client, DeviceRole::Unknown]
        );
    }

    #[tokio::test]
    async fn classify_missing_device_fails() {
        let classifier =
            DeviceClassifier::new(Arc::new(MemoryStore::new()), Arc::new(NullNotifier));
        let err = classifier.classify_device(DeviceId::new(3)).await.unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotFound { .. }));
    }
}
