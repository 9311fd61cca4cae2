// ── Anomaly detection engine ──
//
// Streams flows one at a time through three independent detectors. When
// more than one fires, the verdict with the highest probability becomes
// the flow's `AnomalyRecord`, which is persisted and published. Connection
// tables are reduced to per-connection growth before scoring.

mod conntrack;
mod detector;
mod harness;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::RawRecord;
use crate::config::AnomalyConfig;
use crate::convert;
use crate::error::CoreError;
use crate::model::{AnomalyRecord, DeviceId, TrafficFlow};
use crate::notify::{self, Notifier, NullNotifier, topics};
use crate::store::Repository;

pub use conntrack::ConnectionTracker;
pub use detector::{
    BruteForceDetector, DosDetector, PortScanDetector, Verdict, confidence, probability_over,
};
pub use harness::{Scenario, ScenarioOptions, ScenarioSummary, generate_scenario};

/// Result of analyzing a whole connection table. `analyzed_count` is the
/// number of flows scored: rows whose counters did not move since the
/// previous read of the same device's table are not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAnalysis {
    pub connection_count: usize,
    pub analyzed_count: usize,
    pub anomaly_count: usize,
    pub anomalies: Vec<AnomalyRecord>,
}

/// Threshold-based streaming detector over `TrafficFlow`s.
pub struct AnomalyEngine {
    config: AnomalyConfig,
    port_scan: PortScanDetector,
    dos: DosDetector,
    brute_force: BruteForceDetector,
    connections: ConnectionTracker,
    store: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
    ingested: AtomicU64,
}

impl AnomalyEngine {
    /// Fails with `CoreError::Validation` on an invalid config.
    pub fn new(config: AnomalyConfig, store: Arc<dyn Repository>) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            port_scan: PortScanDetector::new(config.port_scan.clone()),
            dos: DosDetector::new(config.dos.clone()),
            brute_force: BruteForceDetector::new(config.brute_force.clone()),
            connections: ConnectionTracker::new(),
            config,
            store,
            notifier: Arc::new(NullNotifier),
            ingested: AtomicU64::new(0),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Feed one flow through every detector and return the strongest
    /// verdict, without persisting anything.
    pub fn evaluate(&self, flow: &TrafficFlow) -> Option<Verdict> {
        let verdicts = [
            self.port_scan.observe(flow),
            self.dos.observe(flow),
            self.brute_force.observe(flow),
        ];

        let count = self.ingested.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.config.sweep_every == 0 {
            self.evict_idle(flow.timestamp);
        }

        // Ties go to the earlier detector.
        verdicts.into_iter().flatten().reduce(|best, next| {
            if next.probability.total_cmp(&best.probability).is_gt() {
                next
            } else {
                best
            }
        })
    }

    /// Single ingestion entry point: score a flow and persist the anomaly,
    /// if any.
    pub async fn analyze_traffic(
        &self,
        flow: TrafficFlow,
    ) -> Result<Option<AnomalyRecord>, CoreError> {
        self.ingest(flow, false).await
    }

    pub(crate) async fn ingest(
        &self,
        flow: TrafficFlow,
        synthetic: bool,
    ) -> Result<Option<AnomalyRecord>, CoreError> {
        let Some(verdict) = self.evaluate(&flow) else {
            return Ok(None);
        };

        let record = AnomalyRecord {
            id: Uuid::new_v4(),
            probability: verdict.probability,
            attack_type: verdict.attack_type,
            timestamp: flow.timestamp,
            confidence: verdict.confidence,
            description: verdict.description,
            synthetic,
            flow,
        };
        self.store.create_anomaly_record(&record).await?;
        debug!(
            attack = %record.attack_type,
            probability = record.probability,
            source = %record.flow.source_addr,
            synthetic,
            "anomaly detected"
        );
        notify::publish_json(self.notifier.as_ref(), topics::ANOMALY_DETECTED, &record);
        Ok(Some(record))
    }

    /// Persisted anomalies in `[start, end]`, newest first.
    pub async fn get_anomalies(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnomalyRecord>, CoreError> {
        let mut records = self.store.get_anomalies(start, end).await?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Analyze a raw connection-tracking table read from `device_id`.
    /// Rows that fail to parse are counted but not analyzed. Only growth
    /// since the device's previous table read is scored.
    pub async fn analyze_connections(
        &self,
        device_id: DeviceId,
        records: &[RawRecord],
    ) -> Result<BatchAnalysis, CoreError> {
        let now = Utc::now();
        let flows = convert::connection_flows(records, device_id, now);
        let window = chrono::Duration::from_std(self.config.dos.window)
            .unwrap_or(chrono::Duration::MAX);
        let fresh = self.connections.deltas(device_id, flows, now, window);
        self.analyze_flows(records.len(), fresh).await
    }

    /// Drop the stored connection-table read of a removed device.
    pub fn forget_device(&self, device_id: DeviceId) {
        self.connections.reset(device_id);
    }

    /// Analyze already-typed flows.
    pub async fn analyze_flows(
        &self,
        connection_count: usize,
        flows: Vec<TrafficFlow>,
    ) -> Result<BatchAnalysis, CoreError> {
        let analyzed_count = flows.len();
        let mut anomalies = Vec::new();
        for flow in flows {
            if let Some(record) = self.analyze_traffic(flow).await? {
                anomalies.push(record);
            }
        }
        if !anomalies.is_empty() {
            info!(
                connections = connection_count,
                anomalies = anomalies.len(),
                "batch analysis flagged anomalies"
            );
        }
        Ok(BatchAnalysis {
            connection_count,
            analyzed_count,
            anomaly_count: anomalies.len(),
            anomalies,
        })
    }

    /// Drop flow groups idle for longer than the configured TTL, measured
    /// against `now` in event time. Returns how many groups were dropped.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let Ok(idle) = chrono::Duration::from_std(self.config.idle_ttl) else {
            warn!("idle TTL out of range, skipping eviction");
            return 0;
        };
        let evicted = self.port_scan.evict_idle(now, idle)
            + self.dos.evict_idle(now, idle)
            + self.brute_force.evict_idle(now, idle);
        if evicted > 0 {
            debug!(evicted, "evicted idle flow groups");
        }
        evicted
    }

    /// Live flow groups across all detectors.
    pub fn group_count(&self) -> usize {
        self.port_scan.group_count() + self.dos.group_count() + self.brute_force.group_count()
    }
}
