//! `simulate` handler: synthetic attack scenarios, one fresh engine each
//! so windows from one scenario never leak into the next.

use std::sync::Arc;

use chrono::Utc;
use tabled::Tabled;

use netsentry_core::{
    AnomalyEngine, DeviceId, MemoryStore, Repository, Scenario, ScenarioOptions, ScenarioSummary,
};

use crate::cli::{GlobalOpts, SimulateArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ScenarioRow {
    #[tabled(rename = "Scenario")]
    scenario: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Anomalies")]
    anomalies: usize,
    #[tabled(rename = "Detection Rate")]
    rate: String,
}

impl From<&ScenarioSummary> for ScenarioRow {
    fn from(s: &ScenarioSummary) -> Self {
        Self {
            scenario: s.scenario.to_string(),
            samples: s.sample_count,
            anomalies: s.anomaly_count,
            rate: format!("{}%", output::fixed(s.detection_rate, 1)),
        }
    }
}

pub async fn handle(args: SimulateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (cfg, path) = config::load_validated(global)?;
    let format = config::output_format(global, &cfg);
    let anomaly = cfg
        .anomaly_config()
        .map_err(|e| CliError::config(&path, e))?;

    let scenarios = if args.scenarios.is_empty() {
        Scenario::ALL.to_vec()
    } else {
        args.scenarios
    };
    let options = ScenarioOptions {
        start: args.start.unwrap_or_else(Utc::now),
        device_id: DeviceId::new(args.device),
    };

    let mut summaries = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let store: Arc<dyn Repository> = Arc::new(MemoryStore::default());
        let engine = AnomalyEngine::new(anomaly.clone(), store)?;
        summaries.push(engine.run_scenario(scenario, &options).await?);
    }

    let out = output::render_list(format, &summaries, |s| ScenarioRow::from(s), |s| {
        format!("{} {}/{}", s.scenario, s.anomaly_count, s.sample_count)
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
