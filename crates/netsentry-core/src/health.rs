// ── Interface health scoring ──
//
// Score = 100 minus three capped deductions:
//
//   errors       8 points per percent of packets errored,   at most 40
//   drops        6 points per percent of packets dropped,   at most 30
//   utilization  1 point per percent above 70% of link,     at most 30
//
// Rates come from counter deltas against the previously stored reading
// when one exists, otherwise from lifetime totals. Utilization needs a
// previous reading and a known link speed; without them it is zero.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::model::{DeviceId, Interface, InterfaceCounters};
use crate::store::Repository;

const ERROR_WEIGHT: f64 = 8.0;
const ERROR_CAP: f64 = 40.0;
const DROP_WEIGHT: f64 = 6.0;
const DROP_CAP: f64 = 30.0;
const UTILIZATION_KNEE: f64 = 70.0;
const UTILIZATION_WEIGHT: f64 = 1.0;
const UTILIZATION_CAP: f64 = 30.0;

/// Percentages feeding the score, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInputs {
    pub error_rate: f64,
    pub drop_rate: f64,
    pub utilization: f64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => Self::Excellent,
            75..=89 => Self::Good,
            50..=74 => Self::Fair,
            25..=49 => Self::Poor,
            _ => Self::Critical,
        }
    }
}

fn clamp_pct(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Deterministic 0-100 health score.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
pub fn health_score(inputs: HealthInputs) -> u8 {
    let errors = (clamp_pct(inputs.error_rate) * ERROR_WEIGHT).min(ERROR_CAP);
    let drops = (clamp_pct(inputs.drop_rate) * DROP_WEIGHT).min(DROP_CAP);
    let over = (clamp_pct(inputs.utilization) - UTILIZATION_KNEE).max(0.0);
    let utilization = (over * UTILIZATION_WEIGHT).min(UTILIZATION_CAP);
    (100.0 - errors - drops - utilization).round().clamp(0.0, 100.0) as u8
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Derive inputs for `current`, using `previous` for deltas when the
/// counters did not reset in between.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
pub fn health_inputs(
    previous: Option<(&InterfaceCounters, DateTime<Utc>)>,
    current: &InterfaceCounters,
    now: DateTime<Utc>,
) -> HealthInputs {
    let monotonic = previous.filter(|(prev, _)| {
        current.total_bytes() >= prev.total_bytes()
            && current.total_packets() >= prev.total_packets()
            && current.total_errors() >= prev.total_errors()
            && current.total_drops() >= prev.total_drops()
    });

    match monotonic {
        Some((prev, at)) => {
            let packets = current.total_packets() - prev.total_packets();
            let elapsed = (now - at).num_milliseconds();
            let utilization = match (current.link_speed_bps, elapsed > 0) {
                (Some(speed), true) if speed > 0 => {
                    let bits = (current.total_bytes() - prev.total_bytes()) as f64 * 8.0;
                    let bps = bits / (elapsed as f64 / 1000.0);
                    bps / speed as f64 * 100.0
                }
                _ => 0.0,
            };
            HealthInputs {
                error_rate: percent(current.total_errors() - prev.total_errors(), packets),
                drop_rate: percent(current.total_drops() - prev.total_drops(), packets),
                utilization: clamp_pct(utilization),
            }
        }
        None => HealthInputs {
            error_rate: percent(current.total_errors(), current.total_packets()),
            drop_rate: percent(current.total_drops(), current.total_packets()),
            utilization: 0.0,
        },
    }
}

/// Scored interface, as returned by a batch pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceHealth {
    pub device_id: DeviceId,
    pub interface: String,
    /// `None` for interfaces that are not running.
    pub score: Option<u8>,
    pub status: Option<HealthStatus>,
    pub inputs: HealthInputs,
}

/// Batch health pass over all interfaces of a device.
#[derive(Clone)]
pub struct HealthScorer {
    store: Arc<dyn Repository>,
}

impl HealthScorer {
    pub fn new(store: Arc<dyn Repository>) -> Self {
        Self { store }
    }

    /// Score fresh counters against the stored interfaces and persist
    /// counters plus score through `update_interface`.
    pub async fn refresh_device(
        &self,
        device_id: DeviceId,
        counters: Vec<InterfaceCounters>,
    ) -> Result<Vec<InterfaceHealth>, CoreError> {
        let now = Utc::now();
        let stored = self.store.get_interfaces(device_id).await?;
        let mut results = Vec::with_capacity(counters.len());

        for current in counters {
            let previous = stored
                .iter()
                .find(|i| i.name() == current.name)
                .map(|i| (&i.counters, i.updated_at));
            let inputs = health_inputs(previous, &current, now);
            let score = current.running.then(|| health_score(inputs));
            results.push(InterfaceHealth {
                device_id,
                interface: current.name.clone(),
                score,
                status: score.map(HealthStatus::from_score),
                inputs,
            });
            self.store
                .update_interface(Interface {
                    device_id,
                    counters: current,
                    health_score: score,
                    updated_at: now,
                })
                .await?;
        }
        debug!(device_id = %device_id, interfaces = results.len(), "interface health refreshed");
        Ok(results)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn counters(name: &str, bytes: u64, packets: u64, errors: u64, drops: u64) -> InterfaceCounters {
        InterfaceCounters {
            name: name.into(),
            running: true,
            rx_bytes: bytes,
            rx_packets: packets,
            rx_errors: errors,
            rx_drops: drops,
            link_speed_bps: Some(1_000_000),
            ..InterfaceCounters::default()
        }
    }

    #[test]
    fn clean_interface_scores_full() {
        assert_eq!(health_score(HealthInputs::default()), 100);
    }

    #[test]
    fn deductions_are_weighted_and_capped() {
        let one_pct_errors = HealthInputs {
            error_rate: 1.0,
            ..HealthInputs::default()
        };
        assert_eq!(health_score(one_pct_errors), 92);

        let everything = HealthInputs {
            error_rate: 50.0,
            drop_rate: 50.0,
            utilization: 100.0,
        };
        assert_eq!(health_score(everything), 0);

        let busy = HealthInputs {
            utilization: 85.0,
            ..HealthInputs::default()
        };
        assert_eq!(health_score(busy), 85);
    }

    #[test]
    fn bands_follow_thresholds() {
        assert_eq!(HealthStatus::from_score(100), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(90), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(75), HealthStatus::Good);
        assert_eq!(HealthStatus::from_score(50), HealthStatus::Fair);
        assert_eq!(HealthStatus::from_score(25), HealthStatus::Poor);
        assert_eq!(HealthStatus::from_score(24), HealthStatus::Critical);
    }

    #[test]
    fn nan_inputs_do_not_poison_score() {
        let inputs = HealthInputs {
            error_rate: f64::NAN,
            drop_rate: f64::INFINITY,
            utilization: -3.0,
        };
        assert_eq!(health_score(inputs), 100);
    }

    #[test]
    fn deltas_drive_utilization() {
        let t0 = Utc::now();
        let prev = counters("ether1", 0, 0, 0, 0);
        // 1 Mbit/s link, 100_000 bytes in one second = 80%.
        let cur = counters("ether1", 100_000, 1_000, 10, 0);
        let inputs = health_inputs(Some((&prev, t0)), &cur, t0 + chrono::Duration::seconds(1));
        assert!((inputs.utilization - 80.0).abs() < 1e-9);
        assert!((inputs.error_rate - 1.0).abs() < 1e-9);
        assert_eq!(health_score(inputs), 82);
    }

    #[test]
    fn counter_reset_uses_lifetime_totals() {
        let t0 = Utc::now();
        let prev = counters("ether1", 5_000_000, 9_000, 0, 0);
        let cur = counters("ether1", 1_000, 100, 0, 5);
        let inputs = health_inputs(Some((&prev, t0)), &cur, t0 + chrono::Duration::seconds(1));
        assert!((inputs.utilization).abs() < f64::EPSILON);
        assert!((inputs.drop_rate - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn batch_pass_persists_scores() {
        let store = Arc::new(MemoryStore::new());
        let scorer = HealthScorer::new(store.clone());
        let device = DeviceId::new(1);
        let mut down = counters("ether2", 0, 0, 0, 0);
        down.running = false;

        let results = scorer
            .refresh_device(device, vec![counters("ether1", 10, 100, 0, 0), down])
            .await
            .unwrap();
        assert_eq!(results[0].score, Some(100));
        assert_eq!(results[1].score, None);

        let stored = store.get_interfaces(device).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].health_score, Some(100));
    }
}
