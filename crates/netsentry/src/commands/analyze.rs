//! `analyze` handler: run a file of flows or a raw connection table
//! through a fresh anomaly engine.

use std::sync::Arc;

use tabled::Tabled;
use tracing::debug;

use netsentry_core::{
    AnomalyEngine, AnomalyRecord, BatchAnalysis, DeviceId, MemoryStore, RawRecord, Repository,
    TrafficFlow,
};

use crate::cli::{AnalyzeArgs, GlobalOpts};
use crate::commands::util::{self, Input};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
pub(crate) struct AnomalyRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Type")]
    attack_type: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Destination")]
    destination: String,
    #[tabled(rename = "Probability")]
    probability: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
}

impl From<&AnomalyRecord> for AnomalyRow {
    fn from(r: &AnomalyRecord) -> Self {
        Self {
            time: r.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            attack_type: r.attack_type.to_string(),
            source: format!("{}:{}", r.flow.source_addr, r.flow.source_port),
            destination: format!("{}:{}", r.flow.dest_addr, r.flow.dest_port),
            probability: output::fixed(r.probability, 2),
            confidence: output::fixed(r.confidence, 2),
        }
    }
}

pub(crate) fn anomaly_line(r: &AnomalyRecord) -> String {
    format!(
        "{} {}:{} -> {}:{} p={}",
        r.attack_type,
        r.flow.source_addr,
        r.flow.source_port,
        r.flow.dest_addr,
        r.flow.dest_port,
        output::fixed(r.probability, 2)
    )
}

// ── Input detection ─────────────────────────────────────────────────

enum Batch {
    Flows(Vec<TrafficFlow>),
    Connections(Vec<RawRecord>),
}

/// Connection rows are recognized by their `src-address` key; anything
/// else must deserialize as typed flows.
fn parse_batch(input: &Input) -> Result<Batch, CliError> {
    let value: serde_json::Value =
        serde_json::from_str(&input.contents).map_err(|e| input.invalid(e.to_string()))?;
    let Some(items) = value.as_array() else {
        return Err(input.invalid("expected a JSON array"));
    };
    let connections = !items.is_empty() && items.iter().all(|i| i.get("src-address").is_some());
    if connections {
        serde_json::from_value(value)
            .map(Batch::Connections)
            .map_err(|e| input.invalid(format!("connection row: {e}")))
    } else {
        serde_json::from_value(value)
            .map(Batch::Flows)
            .map_err(|e| input.invalid(format!("flow: {e}")))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: AnalyzeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (cfg, path) = config::load_validated(global)?;
    let format = config::output_format(global, &cfg);
    let anomaly = cfg
        .anomaly_config()
        .map_err(|e| CliError::config(&path, e))?;

    let input = util::read_input(&args.input)?;
    let batch = parse_batch(&input)?;

    let store: Arc<dyn Repository> = Arc::new(MemoryStore::default());
    let engine = AnomalyEngine::new(anomaly, store)?;
    let analysis = match batch {
        Batch::Flows(flows) => {
            debug!(source = %input.name, flows = flows.len(), "analyzing flows");
            engine.analyze_flows(flows.len(), flows).await?
        }
        Batch::Connections(rows) => {
            debug!(source = %input.name, rows = rows.len(), "analyzing connection table");
            engine
                .analyze_connections(DeviceId::new(args.device), &rows)
                .await?
        }
    };

    let out = output::render_single(format, &analysis, detail, |a| {
        a.anomalies
            .iter()
            .map(anomaly_line)
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    output::print_output(&out, global.quiet);

    if args.fail_on_anomaly && analysis.anomaly_count > 0 {
        return Err(CliError::AnomaliesDetected {
            count: analysis.anomaly_count,
        });
    }
    Ok(())
}

fn detail(a: &BatchAnalysis) -> String {
    let mut out = format!(
        "Connections: {}\nAnalyzed:    {}\nAnomalies:   {}",
        a.connection_count, a.analyzed_count, a.anomaly_count
    );
    if !a.anomalies.is_empty() {
        let rows: Vec<AnomalyRow> = a.anomalies.iter().map(AnomalyRow::from).collect();
        out.push('\n');
        out.push_str(&output::render_table(&rows));
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn input(contents: &str) -> Input {
        Input {
            name: "test".into(),
            contents: contents.into(),
        }
    }

    #[test]
    fn connection_rows_are_detected_by_key() {
        let batch = parse_batch(&input(
            r#"[{"src-address":"10.0.0.2:5000","dst-address":"10.0.0.1:22","protocol":"tcp"}]"#,
        ))
        .unwrap();
        assert!(matches!(batch, Batch::Connections(ref rows) if rows.len() == 1));
    }

    #[test]
    fn empty_array_is_an_empty_flow_batch() {
        assert!(matches!(parse_batch(&input("[]")).unwrap(), Batch::Flows(ref f) if f.is_empty()));
    }

    #[test]
    fn non_array_is_rejected() {
        let err = parse_batch(&input(r#"{"flows":[]}"#)).err().unwrap();
        assert!(err.to_string().contains("expected a JSON array"));
    }
}
