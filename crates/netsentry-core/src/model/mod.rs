// ── Domain model ──

pub mod anomaly;
pub mod device;
pub mod entity_id;
pub mod interface;
pub mod observation;
pub mod traffic;
pub mod wireless;

pub use anomaly::{AnomalyRecord, AttackType};
pub use device::{
    Capabilities, Device, DevicePatch, DeviceRole, IdentificationSignals, NewDevice,
};
pub use entity_id::{DeviceId, MacAddress};
pub use interface::{Interface, InterfaceCounters};
pub use observation::{NeighborObservation, ObservationSource};
pub use traffic::{MethodKind, Protocol, RecordConfidence, TrafficFlow, TrafficRecord, TrafficSample};
pub use wireless::{WirelessClient, WirelessStats};
