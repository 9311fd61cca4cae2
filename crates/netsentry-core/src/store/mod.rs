// ── Persistence boundary ──
//
// The engine never assumes a storage engine: everything it persists or
// reads goes through `Repository`. `MemoryStore` is the in-process
// implementation used by the binary and the test suite.

mod collection;
mod memory;

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::model::{
    AnomalyRecord, Device, DeviceId, DevicePatch, Interface, MacAddress, NewDevice, TrafficRecord,
};

pub use memory::{MemoryStore, Retention};

/// Opaque CRUD repository consumed by the engine.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, CoreError>;

    async fn list_devices(&self) -> Result<Vec<Device>, CoreError>;

    /// Find a device by address and hardware identifier. A device recorded
    /// without a MAC matches on address alone.
    async fn find_device(
        &self,
        address: IpAddr,
        mac: Option<&MacAddress>,
    ) -> Result<Option<Device>, CoreError>;

    async fn create_device(&self, device: NewDevice) -> Result<Device, CoreError>;

    /// Atomically merge `patch` into the stored device.
    async fn update_device(&self, id: DeviceId, patch: DevicePatch) -> Result<Device, CoreError>;

    async fn get_interfaces(&self, device_id: DeviceId) -> Result<Vec<Interface>, CoreError>;

    async fn update_interface(&self, interface: Interface) -> Result<(), CoreError>;

    async fn get_metrics(
        &self,
        device_id: DeviceId,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrafficRecord>, CoreError>;

    async fn save_traffic_data(&self, record: &TrafficRecord) -> Result<(), CoreError>;

    async fn create_anomaly_record(&self, record: &AnomalyRecord) -> Result<(), CoreError>;

    async fn get_anomalies(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnomalyRecord>, CoreError>;
}
