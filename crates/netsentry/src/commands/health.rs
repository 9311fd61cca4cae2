//! `health` handler: interface health scores from counter readings, or a
//! single score from rates given on the command line.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use netsentry_core::health::health_inputs;
use netsentry_core::{
    DeviceId, HealthInputs, HealthStatus, InterfaceCounters, InterfaceHealth, health_score,
};

use crate::cli::{GlobalOpts, HealthArgs};
use crate::commands::util;
use crate::config;
use crate::error::CliError;
use crate::output;

/// One interface: its current counters and, optionally, the counters read
/// `interval_ms` earlier.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reading {
    current: InterfaceCounters,
    previous: Option<InterfaceCounters>,
    #[serde(default)]
    interval_ms: u64,
    #[serde(default)]
    device_id: Option<DeviceId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Score {
    score: u8,
    status: HealthStatus,
    inputs: HealthInputs,
}

#[derive(Tabled)]
struct HealthRow {
    #[tabled(rename = "Interface")]
    interface: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Errors %")]
    errors: String,
    #[tabled(rename = "Drops %")]
    drops: String,
    #[tabled(rename = "Util %")]
    utilization: String,
}

impl From<&InterfaceHealth> for HealthRow {
    fn from(h: &InterfaceHealth) -> Self {
        Self {
            interface: h.interface.clone(),
            score: output::or_dash(h.score),
            status: h.status.map_or_else(|| "down".into(), |s| s.to_string()),
            errors: output::fixed(h.inputs.error_rate, 2),
            drops: output::fixed(h.inputs.drop_rate, 2),
            utilization: output::fixed(h.inputs.utilization, 1),
        }
    }
}

fn score_reading(reading: Reading) -> InterfaceHealth {
    let now = Utc::now();
    let interval = i64::try_from(reading.interval_ms).unwrap_or(i64::MAX);
    let at = now - Duration::milliseconds(interval);
    let inputs = health_inputs(reading.previous.as_ref().map(|p| (p, at)), &reading.current, now);
    // Interfaces that are not running get no score.
    let score = reading.current.running.then(|| health_score(inputs));
    InterfaceHealth {
        device_id: reading.device_id.unwrap_or(DeviceId::new(0)),
        interface: reading.current.name,
        score,
        status: score.map(HealthStatus::from_score),
        inputs,
    }
}

pub fn handle(args: HealthArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (cfg, _) = config::load(global)?;
    let format = config::output_format(global, &cfg);

    let Some(source) = args.input else {
        let inputs = HealthInputs {
            error_rate: args.error_rate,
            drop_rate: args.drop_rate,
            utilization: args.utilization,
        };
        let score = health_score(inputs);
        let report = Score {
            score,
            status: HealthStatus::from_score(score),
            inputs,
        };
        let out = output::render_single(
            format,
            &report,
            |r| format!("Score:  {}\nStatus: {}", r.score, r.status),
            |r| r.score.to_string(),
        )?;
        output::print_output(&out, global.quiet);
        return Ok(());
    };

    let input = util::read_input(&source)?;
    let readings: Vec<Reading> = input.json_array()?;
    let scored: Vec<InterfaceHealth> = readings.into_iter().map(score_reading).collect();
    let out = output::render_list(format, &scored, |h| HealthRow::from(h), |h| {
        format!("{} {}", h.interface, output::or_dash(h.score))
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn counters(name: &str, running: bool, packets: u64, errors: u64) -> InterfaceCounters {
        InterfaceCounters {
            name: name.into(),
            running,
            rx_packets: packets,
            rx_errors: errors,
            ..InterfaceCounters::default()
        }
    }

    #[test]
    fn lifetime_totals_without_previous_reading() {
        let health = score_reading(Reading {
            current: counters("ether1", true, 1_000, 10),
            previous: None,
            interval_ms: 0,
            device_id: None,
        });
        // 1% errors costs 8 points.
        assert_eq!(health.score, Some(92));
        assert_eq!(health.status, Some(HealthStatus::Excellent));
    }

    #[test]
    fn deltas_against_previous_reading() {
        let health = score_reading(Reading {
            current: counters("ether2", true, 2_000, 110),
            previous: Some(counters("ether2", true, 1_000, 10)),
            interval_ms: 60_000,
            device_id: Some(DeviceId::new(7)),
        });
        // 100 errors over 1000 new packets: 10%, capped at 40 points.
        assert_eq!(health.score, Some(60));
        assert_eq!(health.device_id, DeviceId::new(7));
    }

    #[test]
    fn stopped_interface_is_unscored() {
        let health = score_reading(Reading {
            current: counters("wlan1", false, 0, 0),
            previous: None,
            interval_ms: 0,
            device_id: None,
        });
        assert_eq!(health.score, None);
        assert_eq!(health.status, None);
    }
}
