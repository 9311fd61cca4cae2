// ── In-memory repository ──
//
// Devices and interfaces live in reactive entity collections; traffic
// records and anomalies are append-only logs bounded by `Retention`,
// pruned oldest-first on every write.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::trace;

use super::Repository;
use super::collection::EntityCollection;
use crate::error::CoreError;
use crate::model::{
    AnomalyRecord, Device, DeviceId, DevicePatch, Interface, MacAddress, NewDevice, TrafficRecord,
};

/// Bounds on each of the traffic and anomaly logs. Age is measured back
/// from the newest record written, in record time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub max_age: chrono::Duration,
    pub max_entries: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            max_age: chrono::Duration::hours(24),
            max_entries: 100_000,
        }
    }
}

/// Append `item` and drop entries from the front until both bounds hold.
fn append<T>(
    log: &mut VecDeque<T>,
    item: T,
    retention: Retention,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> usize {
    let cutoff = timestamp(&item).checked_sub_signed(retention.max_age);
    log.push_back(item);
    let before = log.len();
    while log.len() > retention.max_entries
        || cutoff.is_some_and(|cutoff| log.front().is_some_and(|oldest| timestamp(oldest) < cutoff))
    {
        log.pop_front();
    }
    before - log.len()
}

/// Thread-safe in-process `Repository`.
pub struct MemoryStore {
    devices: EntityCollection<DeviceId, Device>,
    interfaces: EntityCollection<(DeviceId, String), Interface>,
    metrics: Mutex<VecDeque<TrafficRecord>>,
    anomalies: Mutex<VecDeque<AnomalyRecord>>,
    retention: Retention,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_retention(Retention::default())
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            devices: EntityCollection::new(),
            interfaces: EntityCollection::new(),
            metrics: Mutex::new(VecDeque::new()),
            anomalies: Mutex::new(VecDeque::new()),
            retention,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Subscribe to device snapshot changes.
    pub fn subscribe_devices(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.devices.subscribe()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    fn poisoned() -> CoreError {
        CoreError::Store {
            message: "in-memory log lock poisoned".into(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, CoreError> {
        Ok(self.devices.get(&id).map(|d| Device::clone(&d)))
    }

    async fn list_devices(&self) -> Result<Vec<Device>, CoreError> {
        let mut devices: Vec<Device> = self
            .devices
            .snapshot()
            .iter()
            .map(|d| Device::clone(d))
            .collect();
        devices.sort_by_key(|d| d.id);
        Ok(devices)
    }

    async fn find_device(
        &self,
        address: IpAddr,
        mac: Option<&MacAddress>,
    ) -> Result<Option<Device>, CoreError> {
        let snapshot = self.devices.snapshot();
        let found = snapshot.iter().find(|d| {
            d.address == address
                && match (d.mac.as_ref(), mac) {
                    (Some(stored), Some(seen)) => stored == seen,
                    _ => true,
                }
        });
        Ok(found.map(|d| Device::clone(d)))
    }

    async fn create_device(&self, device: NewDevice) -> Result<Device, CoreError> {
        let id = DeviceId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let device = device.into_device(id);
        self.devices.upsert(id, device.clone());
        Ok(device)
    }

    async fn update_device(&self, id: DeviceId, patch: DevicePatch) -> Result<Device, CoreError> {
        self.devices
            .update(&id, |device| patch.apply(device))
            .map(|d| Device::clone(&d))
            .ok_or(CoreError::DeviceNotFound { device_id: id })
    }

    async fn get_interfaces(&self, device_id: DeviceId) -> Result<Vec<Interface>, CoreError> {
        let mut interfaces: Vec<Interface> = self
            .interfaces
            .snapshot()
            .iter()
            .filter(|i| i.device_id == device_id)
            .map(|i| Interface::clone(i))
            .collect();
        interfaces.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(interfaces)
    }

    async fn update_interface(&self, interface: Interface) -> Result<(), CoreError> {
        let key = (interface.device_id, interface.counters.name.clone());
        self.interfaces.upsert(key, interface);
        Ok(())
    }

    async fn get_metrics(
        &self,
        device_id: DeviceId,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrafficRecord>, CoreError> {
        let metrics = self.metrics.lock().map_err(|_| Self::poisoned())?;
        Ok(metrics
            .iter()
            .filter(|r| r.device_id == device_id && r.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn save_traffic_data(&self, record: &TrafficRecord) -> Result<(), CoreError> {
        let mut metrics = self.metrics.lock().map_err(|_| Self::poisoned())?;
        let pruned = append(&mut metrics, record.clone(), self.retention, |r| r.timestamp);
        if pruned > 0 {
            trace!(pruned, "traffic log pruned");
        }
        Ok(())
    }

    async fn create_anomaly_record(&self, record: &AnomalyRecord) -> Result<(), CoreError> {
        let mut anomalies = self.anomalies.lock().map_err(|_| Self::poisoned())?;
        let pruned = append(&mut anomalies, record.clone(), self.retention, |a| a.timestamp);
        if pruned > 0 {
            trace!(pruned, "anomaly log pruned");
        }
        Ok(())
    }

    async fn get_anomalies(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnomalyRecord>, CoreError> {
        let anomalies = self.anomalies.lock().map_err(|_| Self::poisoned())?;
        Ok(anomalies
            .iter()
            .filter(|a| a.timestamp >= start && a.timestamp <= end)
            .cloned()
            .collect())
    }
}
