// ── Anomaly domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::traffic::TrafficFlow;

/// Kind of attack a detector attributes a flow to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum AttackType {
    PortScan,
    DosAttack,
    BruteForce,
    Unknown,
}

/// A scored anomaly. Derived from exactly one flow and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyRecord {
    pub id: Uuid,
    pub flow: TrafficFlow,
    /// Likelihood that the flow is part of an attack, in `[0, 1]`.
    pub probability: f64,
    pub attack_type: AttackType,
    pub timestamp: DateTime<Utc>,
    /// How much window evidence backed the verdict, in `[0, 1]`.
    pub confidence: f64,
    pub description: String,
    /// Produced from a generated scenario rather than observed traffic.
    #[serde(default)]
    pub synthetic: bool,
}
