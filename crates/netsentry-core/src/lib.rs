//! Monitoring orchestration and anomaly detection for managed network
//! fleets.
//!
//! - **[`Scheduler`]**: Long-lived polling service. Keeps a job calendar
//!   per device (metrics, wireless stats, router-side discovery) plus
//!   network-wide discovery and identification, and runs due jobs under a
//!   resizable concurrency bound. Manual triggers coalesce onto runs
//!   already in flight.
//!
//! - **[`StrategySelector`]**: Role-driven fallback chain over the
//!   [`TrafficCollector`] methods with a short per-device cache.
//!
//! - **[`DiscoveryPipeline`]** / **[`DeviceClassifier`]**: Turn router
//!   neighbor tables into devices, identify them, and assign roles with
//!   the pure [`classify`] function.
//!
//! - **[`AnomalyEngine`]**: Streaming port-scan, DoS and brute-force
//!   detectors over [`TrafficFlow`]s, plus a synthetic scenario harness.
//!
//! - **[`HealthScorer`]**: Weighted 0-100 interface health scores.
//!
//! Collaborators are injected as traits: [`Repository`] for persistence
//! ([`MemoryStore`] ships in-crate), [`CommandChannel`] for device
//! commands, and [`Notifier`] for fire-and-forget events.

pub mod anomaly;
pub mod channel;
pub mod classify;
pub mod config;
pub mod convert;
pub mod discovery;
pub mod error;
pub mod health;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod strategy;

// ── Primary re-exports ──────────────────────────────────────────────
pub use anomaly::{AnomalyEngine, BatchAnalysis, Scenario, ScenarioOptions, ScenarioSummary};
pub use channel::{CommandChannel, RawRecord};
pub use classify::{DeviceClassifier, classify, methods_for_role};
pub use config::{
    AnomalyConfig, BruteForceConfig, CollectionSettings, DosConfig, PortScanConfig,
    SchedulerSettings,
};
pub use discovery::{DiscoveryPipeline, DiscoveryReport, IdentificationReport, OuiTable, Subnet};
pub use error::CoreError;
pub use health::{HealthInputs, HealthScorer, HealthStatus, InterfaceHealth, health_score};
pub use notify::{BroadcastNotifier, Notification, Notifier, NullNotifier};
pub use scheduler::{
    DevicePollingStatus, JobKey, JobKind, JobReport, JobState, JobStatus, JobTarget, Scheduler,
    SchedulerBuilder, SchedulerStatus,
};
pub use store::{MemoryStore, Repository, Retention};
pub use strategy::{StrategySelector, TrafficCollector};

pub use model::{
    AnomalyRecord, AttackType, Capabilities, Device, DeviceId, DevicePatch, DeviceRole,
    IdentificationSignals, Interface, InterfaceCounters, MacAddress, MethodKind, NewDevice,
    NeighborObservation, ObservationSource, Protocol, RecordConfidence, TrafficFlow,
    TrafficRecord, TrafficSample, WirelessClient, WirelessStats,
};
