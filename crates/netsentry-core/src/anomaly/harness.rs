// ── Synthetic attack scenarios ──
//
// Deterministic traffic for exercising the detectors end to end. All
// addresses come from the documentation ranges so generated flows can
// never be mistaken for real hosts.

use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AnomalyEngine;
use crate::error::CoreError;
use crate::model::{AnomalyRecord, DeviceId, Protocol, TrafficFlow};

const TARGET: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));
const ATTACKER: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 50));

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(ascii_case_insensitive)]
pub enum Scenario {
    #[strum(to_string = "portScan", serialize = "port-scan", serialize = "port_scan")]
    PortScan,
    #[strum(to_string = "dosAttack", serialize = "dos", serialize = "dos-attack", serialize = "dos_attack")]
    DosAttack,
    #[strum(to_string = "bruteForce", serialize = "brute-force", serialize = "brute_force")]
    BruteForce,
}

impl Scenario {
    pub const ALL: [Self; 3] = [Self::PortScan, Self::DosAttack, Self::BruteForce];
}

/// Where generated traffic is anchored.
#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    pub start: DateTime<Utc>,
    pub device_id: DeviceId,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            start: Utc::now(),
            device_id: DeviceId::new(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub scenario: Scenario,
    pub sample_count: usize,
    pub anomaly_count: usize,
    /// Percentage of generated flows that produced an anomaly.
    pub detection_rate: f64,
    pub anomalies: Vec<AnomalyRecord>,
}

fn at(start: DateTime<Utc>, offset_ms: i64) -> DateTime<Utc> {
    start + chrono::Duration::milliseconds(offset_ms)
}

/// Generate the flows for `scenario`. Same options, same flows.
pub fn generate_scenario(scenario: Scenario, options: &ScenarioOptions) -> Vec<TrafficFlow> {
    let base = TrafficFlow {
        source_addr: ATTACKER,
        dest_addr: TARGET,
        source_port: 40_000,
        dest_port: 0,
        protocol: Protocol::Tcp,
        byte_count: 0,
        packet_count: 0,
        duration_ms: 0,
        timestamp: options.start,
        device_id: options.device_id,
    };

    match scenario {
        // One source sweeping ports 1..=50, 100 ms apart.
        Scenario::PortScan => (1_u16..=50)
            .map(|port| TrafficFlow {
                dest_port: port,
                byte_count: 60,
                packet_count: 1,
                duration_ms: 10,
                timestamp: at(options.start, i64::from(port - 1) * 100),
                ..base.clone()
            })
            .collect(),
        // Fifty sources flooding one web endpoint, 10 ms apart.
        Scenario::DosAttack => (0_u16..100)
            .map(|i| TrafficFlow {
                source_addr: IpAddr::V4(Ipv4Addr::new(
                    198,
                    51,
                    100,
                    u8::try_from(i % 50 + 1).unwrap_or(1),
                )),
                source_port: 30_000 + i,
                dest_port: 80,
                protocol: Protocol::Udp,
                byte_count: 5_000_000,
                packet_count: 3_500,
                duration_ms: 1_000,
                timestamp: at(options.start, i64::from(i) * 10),
                ..base.clone()
            })
            .collect(),
        // Short SSH sessions once a second.
        Scenario::BruteForce => (0_u16..30)
            .map(|i| TrafficFlow {
                source_port: 50_000 + i,
                dest_port: 22,
                byte_count: 2_400,
                packet_count: 18,
                duration_ms: 800,
                timestamp: at(options.start, i64::from(i) * 1_000),
                ..base.clone()
            })
            .collect(),
    }
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

impl AnomalyEngine {
    /// Generate a scenario and push every flow through the engine. The
    /// resulting records are persisted like any other, flagged synthetic.
    pub async fn run_scenario(
        &self,
        scenario: Scenario,
        options: &ScenarioOptions,
    ) -> Result<ScenarioSummary, CoreError> {
        let flows = generate_scenario(scenario, options);
        let sample_count = flows.len();
        let mut anomalies = Vec::new();
        for flow in flows {
            if let Some(record) = self.ingest(flow, true).await? {
                anomalies.push(record);
            }
        }
        let summary = ScenarioSummary {
            scenario,
            sample_count,
            anomaly_count: anomalies.len(),
            detection_rate: rate(anomalies.len(), sample_count),
            anomalies,
        };
        info!(
            scenario = %scenario,
            samples = summary.sample_count,
            anomalies = summary.anomaly_count,
            "scenario complete"
        );
        Ok(summary)
    }
}
