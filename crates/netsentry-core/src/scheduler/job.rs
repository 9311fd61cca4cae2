// ── Polling job model ──

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::discovery::{DiscoveryReport, IdentificationReport};
use crate::model::{DeviceId, TrafficRecord, WirelessStats};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum JobKind {
    Metrics,
    WirelessStats,
    Discovery,
    Identification,
    RouterDiscovery,
}

/// What a job runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "id")]
pub enum JobTarget {
    Device(DeviceId),
    Network,
}

impl JobTarget {
    pub fn device_id(self) -> Option<DeviceId> {
        match self {
            Self::Device(id) => Some(id),
            Self::Network => None,
        }
    }
}

impl fmt::Display for JobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(id) => write!(f, "device:{id}"),
            Self::Network => f.write_str("network"),
        }
    }
}

/// Identity of a job. At most one run per key is ever in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobKey {
    pub target: JobTarget,
    pub kind: JobKind,
}

impl JobKey {
    pub fn device(id: DeviceId, kind: JobKind) -> Self {
        Self {
            target: JobTarget::Device(id),
            kind,
        }
    }

    pub fn network(kind: JobKind) -> Self {
        Self {
            target: JobTarget::Network,
            kind,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.target)
    }
}

/// Idle → Scheduled → Running → Idle, or → Backoff → Scheduled on failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum JobState {
    Idle,
    Scheduled,
    Running,
    Backoff,
}

/// A recurring job in the scheduler's calendar.
#[derive(Debug, Clone)]
pub struct PollingJob {
    pub key: JobKey,
    pub next_run_at: Instant,
    pub state: JobState,
    pub consecutive_failures: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PollingJob {
    pub(crate) fn new(key: JobKey, next_run_at: Instant) -> Self {
        Self {
            key,
            next_run_at,
            state: JobState::Idle,
            consecutive_failures: 0,
            last_run_at: None,
            last_error: None,
        }
    }

    /// Waiting for its turn, whether after success or after a failure.
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, JobState::Idle | JobState::Backoff)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.is_waiting() && self.next_run_at <= now
    }

    pub(crate) fn status(&self, interval: Duration, now: Instant) -> JobStatus {
        JobStatus {
            kind: self.key.kind,
            state: self.state,
            interval_ms: duration_ms(interval),
            next_run_in_ms: duration_ms(self.next_run_at.saturating_duration_since(now)),
            consecutive_failures: self.consecutive_failures,
            last_run_at: self.last_run_at,
            last_error: self.last_error.clone(),
        }
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ── Results ────────────────────────────────────────────────────────

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "report")]
pub enum JobReport {
    Metrics(TrafficRecord),
    WirelessStats(WirelessStats),
    Discovery(DiscoveryReport),
    Identification(IdentificationReport),
}

// ── Status snapshots ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub kind: JobKind,
    pub state: JobState,
    pub interval_ms: u64,
    pub next_run_in_ms: u64,
    pub consecutive_failures: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Every job currently scheduled for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePollingStatus {
    pub device_id: DeviceId,
    pub jobs: Vec<JobStatus>,
}

impl DevicePollingStatus {
    pub fn job(&self, kind: JobKind) -> Option<&JobStatus> {
        self.jobs.iter().find(|j| j.kind == kind)
    }
}

/// Scheduler-wide snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub polling_interval_ms: u64,
    pub discovery_interval_ms: u64,
    pub identification_interval_ms: u64,
    pub router_discovery_interval_ms: u64,
    pub max_concurrent_devices: usize,
    /// Runs currently holding a concurrency slot.
    pub active_jobs: usize,
    /// Jobs that are due and waiting for a slot.
    pub queue_depth: usize,
    pub job_count: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn keys_render_kind_and_target() {
        assert_eq!(
            JobKey::device(DeviceId::new(4), JobKind::WirelessStats).to_string(),
            "wirelessStats@device:4"
        );
        assert_eq!(JobKey::network(JobKind::Discovery).to_string(), "discovery@network");
    }

    #[tokio::test(start_paused = true)]
    async fn only_waiting_jobs_become_due() {
        let now = Instant::now();
        let mut job = PollingJob::new(JobKey::network(JobKind::Identification), now);
        assert!(job.is_due(now));
        job.state = JobState::Running;
        assert!(!job.is_due(now));
        job.state = JobState::Backoff;
        job.next_run_at = now + Duration::from_secs(5);
        assert!(!job.is_due(now));
        assert!(job.is_due(now + Duration::from_secs(5)));
    }

    #[test]
    fn report_is_tagged_by_kind() {
        let json = serde_json::to_value(JobReport::Identification(IdentificationReport {
            attempted: 2,
            identified: 1,
            failed: 1,
        }))
        .unwrap();
        assert_eq!(json["kind"], "identification");
        assert_eq!(json["report"]["identified"], 1);
    }
}
