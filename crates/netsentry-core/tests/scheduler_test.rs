#![allow(clippy::unwrap_used)]
// Integration tests for the polling scheduler using the in-memory store,
// a scripted command channel and scripted collectors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_test::{assert_err, assert_ok};

use netsentry_core::channel::{paths, raw_record};
use netsentry_core::notify::topics;
use netsentry_core::{
    AnomalyConfig, AnomalyEngine, BroadcastNotifier, CommandChannel, CoreError, Device, DeviceId,
    DeviceRole, JobKey, JobKind, JobState, MemoryStore, MethodKind, NewDevice, RawRecord,
    RecordConfidence, Repository, Scheduler, SchedulerSettings, TrafficCollector, TrafficSample,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// Answers configured paths, optionally holding a path until released.
#[derive(Default)]
struct ScriptedChannel {
    tables: HashMap<&'static str, Vec<RawRecord>>,
    gates: HashMap<&'static str, Arc<Semaphore>>,
    calls: std::sync::Mutex<HashMap<String, usize>>,
}

impl ScriptedChannel {
    fn table(mut self, path: &'static str, rows: Vec<RawRecord>) -> Self {
        self.tables.insert(path, rows);
        self
    }

    fn gate(mut self, path: &'static str, gate: Arc<Semaphore>) -> Self {
        self.gates.insert(path, gate);
        self
    }

    fn calls(&self, path: &str) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn execute_command(
        &self,
        device_id: DeviceId,
        path: &str,
        _params: &[(&str, &str)],
    ) -> Result<Vec<RawRecord>, CoreError> {
        *self.calls.lock().unwrap().entry(path.to_owned()).or_insert(0) += 1;
        if let Some(gate) = self.gates.get(path) {
            let _permit = gate.acquire().await.unwrap();
        }
        self.tables
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::Connectivity {
                device_id,
                reason: format!("{path} not scripted"),
            })
    }
}

/// Blocks every collection until the gate is opened.
struct GatedCollector {
    kind: MethodKind,
    gate: Arc<Semaphore>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedCollector {
    fn new(kind: MethodKind, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            gate,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TrafficCollector for GatedCollector {
    fn kind(&self) -> MethodKind {
        self.kind
    }

    async fn collect(
        &self,
        _device: &Device,
        _channel: &dyn CommandChannel,
    ) -> Result<TrafficSample, CoreError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(TrafficSample::new(1, 1))
    }
}

/// Fails while `failing` is set, otherwise returns a fixed sample.
struct FlakyCollector {
    kind: MethodKind,
    failing: AtomicBool,
    sample: TrafficSample,
    calls: AtomicUsize,
}

impl FlakyCollector {
    fn new(kind: MethodKind, failing: bool, sample: TrafficSample) -> Arc<Self> {
        Arc::new(Self {
            kind,
            failing: AtomicBool::new(failing),
            sample,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TrafficCollector for FlakyCollector {
    fn kind(&self) -> MethodKind {
        self.kind
    }

    async fn collect(
        &self,
        device: &Device,
        _channel: &dyn CommandChannel,
    ) -> Result<TrafficSample, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Connectivity {
                device_id: device.id,
                reason: "timed out".into(),
            });
        }
        Ok(self.sample)
    }
}

async fn add_client(store: &MemoryStore, last_octet: u8) -> Device {
    let address = format!("192.168.88.{last_octet}").parse().unwrap();
    store
        .create_device(NewDevice {
            role: DeviceRole::Client,
            ..NewDevice::discovered(address, None, Utc::now())
        })
        .await
        .unwrap()
}

async fn add_router(store: &MemoryStore) -> Device {
    store
        .create_device(NewDevice::managed(
            "192.168.88.1".parse().unwrap(),
            DeviceRole::Router,
        ))
        .await
        .unwrap()
}

fn metrics_states(scheduler: &Scheduler) -> Vec<JobState> {
    scheduler
        .device_polling_status()
        .iter()
        .filter_map(|device| device.job(JobKind::Metrics).map(|job| job.state))
        .collect()
}

fn count(states: &[JobState], state: JobState) -> usize {
    states.iter().filter(|s| **s == state).count()
}

async fn is_online(store: &MemoryStore, id: DeviceId) -> bool {
    store.get_device(id).await.unwrap().unwrap().is_online
}

// ── Concurrency ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound_admits_exactly_limit() {
    let store = Arc::new(MemoryStore::new());
    for octet in 10..15 {
        add_client(&store, octet).await;
    }
    let gate = Arc::new(Semaphore::new(0));
    let collector = GatedCollector::new(MethodKind::ArpPresencePoll, Arc::clone(&gate));

    let scheduler = Scheduler::builder()
        .repository(store.clone())
        .channel(Arc::new(ScriptedChannel::default()))
        .collector(collector.clone())
        .settings(SchedulerSettings {
            max_concurrent_devices: 2,
            ..SchedulerSettings::default()
        })
        .build()
        .unwrap();
    assert_ok!(scheduler.initialize().await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let states = metrics_states(&scheduler);
    assert_eq!(states.len(), 5);
    assert_eq!(count(&states, JobState::Running), 2);
    assert_eq!(count(&states, JobState::Scheduled), 3);
    let status = scheduler.status();
    assert_eq!(status.active_jobs, 2);
    assert_eq!(status.queue_depth, 3);

    gate.add_permits(5);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let states = metrics_states(&scheduler);
    assert_eq!(count(&states, JobState::Idle), 5);
    assert_eq!(collector.peak.load(Ordering::SeqCst), 2);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_raising_limit_admits_waiting_jobs() {
    let store = Arc::new(MemoryStore::new());
    for octet in 10..14 {
        add_client(&store, octet).await;
    }
    let gate = Arc::new(Semaphore::new(0));
    let collector = GatedCollector::new(MethodKind::ArpPresencePoll, Arc::clone(&gate));
    let scheduler = Scheduler::builder()
        .repository(store.clone())
        .channel(Arc::new(ScriptedChannel::default()))
        .collector(collector.clone())
        .settings(SchedulerSettings {
            max_concurrent_devices: 1,
            ..SchedulerSettings::default()
        })
        .build()
        .unwrap();
    scheduler.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count(&metrics_states(&scheduler), JobState::Running), 1);

    scheduler.set_max_concurrent_devices(3).unwrap();
    // Admission happens on the next tick.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(count(&metrics_states(&scheduler), JobState::Running), 3);
    assert_eq!(collector.peak.load(Ordering::SeqCst), 3);

    gate.add_permits(4);
    scheduler.shutdown().await;
}

// ── Failure handling ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_device_goes_offline_on_third_failure() {
    let store = Arc::new(MemoryStore::new());
    let client = add_client(&store, 20).await;
    let notifier = Arc::new(BroadcastNotifier::new());
    let mut events = notifier.subscribe();
    let collector = FlakyCollector::new(MethodKind::ArpPresencePoll, true, TrafficSample::new(1, 1));

    let scheduler = Scheduler::builder()
        .repository(store.clone())
        .channel(Arc::new(ScriptedChannel::default()))
        .notifier(notifier.clone())
        .collector(collector.clone())
        .settings(SchedulerSettings {
            tick: Duration::from_millis(100),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
            ..SchedulerSettings::default()
        })
        .build()
        .unwrap();
    scheduler.initialize().await.unwrap();

    // Failures land at 0s, 1s (backoff 1s) and 3s (backoff 2s).
    tokio::time::sleep(Duration::from_millis(500)).await;
    let job = &scheduler.device_polling_status()[0].jobs[0];
    assert_eq!(job.consecutive_failures, 1);
    assert_eq!(job.state, JobState::Backoff);
    assert!(is_online(&store, client.id).await);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(
        scheduler.device_polling_status()[0].jobs[0].consecutive_failures,
        2
    );
    assert!(is_online(&store, client.id).await);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(
        scheduler.device_polling_status()[0].jobs[0].consecutive_failures,
        3
    );
    assert!(!is_online(&store, client.id).await);

    let mut offline = 0;
    while let Ok(event) = events.try_recv() {
        if event.topic == topics::DEVICE_OFFLINE {
            offline += 1;
            assert_eq!(event.payload["deviceId"], serde_json::json!(client.id));
        }
    }
    assert_eq!(offline, 1);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_success_restores_liveness() {
    let store = Arc::new(MemoryStore::new());
    let client = add_client(&store, 21).await;
    let collector = FlakyCollector::new(MethodKind::ArpPresencePoll, true, TrafficSample::new(4, 2));
    let scheduler = Scheduler::builder()
        .repository(store.clone())
        .channel(Arc::new(ScriptedChannel::default()))
        .collector(collector.clone())
        .settings(SchedulerSettings {
            tick: Duration::from_millis(100),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(1),
            failure_threshold: 1,
            ..SchedulerSettings::default()
        })
        .build()
        .unwrap();
    scheduler.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!is_online(&store, client.id).await);

    collector.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(is_online(&store, client.id).await);
    let job = &scheduler.device_polling_status()[0].jobs[0];
    assert_eq!(job.consecutive_failures, 0);
    assert_eq!(job.state, JobState::Idle);
    assert_eq!(job.last_error, None);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failures_count_across_a_devices_jobs() {
    let store = Arc::new(MemoryStore::new());
    let ap = store
        .create_device(NewDevice::managed(
            "192.168.88.2".parse().unwrap(),
            DeviceRole::AccessPoint,
        ))
        .await
        .unwrap();
    // Metrics fails through the scripted collector, wireless stats through
    // the unscripted registration table.
    let collector =
        FlakyCollector::new(MethodKind::WirelessStatsPoll, true, TrafficSample::new(8, 8));
    let scheduler = Scheduler::builder()
        .repository(store.clone())
        .channel(Arc::new(ScriptedChannel::default()))
        .collector(collector.clone())
        .settings(SchedulerSettings {
            tick: Duration::from_millis(100),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
            failure_threshold: 2,
            ..SchedulerSettings::default()
        })
        .build()
        .unwrap();
    scheduler.initialize().await.unwrap();

    // One failure per job is two for the device.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = &scheduler.device_polling_status()[0];
    assert_eq!(status.job(JobKind::Metrics).unwrap().consecutive_failures, 1);
    assert_eq!(status.job(JobKind::WirelessStats).unwrap().consecutive_failures, 1);
    assert!(!is_online(&store, ap.id).await);

    // A metrics success brings the device back while wireless stats still fail.
    collector.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(is_online(&store, ap.id).await);
    let status = &scheduler.device_polling_status()[0];
    assert_eq!(status.job(JobKind::Metrics).unwrap().consecutive_failures, 0);
    assert_eq!(status.job(JobKind::WirelessStats).unwrap().consecutive_failures, 2);
    scheduler.shutdown().await;
}

// ── Collection through the scheduler ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_fallback_method_supplies_record() {
    let store = Arc::new(MemoryStore::new());
    let router = add_router(&store).await;
    let primary = FlakyCollector::new(MethodKind::MetricsPoll, true, TrafficSample::default());
    let fallback = FlakyCollector::new(
        MethodKind::FirewallPoll,
        false,
        TrafficSample::new(1_000, 500),
    );
    let scheduler = Scheduler::builder()
        .repository(store.clone())
        .channel(Arc::new(ScriptedChannel::default()))
        .collector(primary)
        .collector(fallback.clone())
        .build()
        .unwrap();

    let record = scheduler.run_manual_collection(router.id).await.unwrap();
    assert_eq!(record.source_method, MethodKind::FirewallPoll);
    assert_eq!(record.download, 1_000);
    assert_eq!(record.upload, 500);
    assert_eq!(record.confidence, RecordConfidence::Partial);

    let since = Utc::now() - chrono::Duration::minutes(1);
    let stored = store.get_metrics(router.id, since).await.unwrap();
    assert_eq!(stored, vec![record.clone()]);

    // Within the TTL the cached record comes back untouched.
    let again = scheduler.run_manual_collection(router.id).await.unwrap();
    assert_eq!(again, record);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);

    assert!(scheduler.selector().clear_cache(router.id));
    scheduler.run_manual_collection(router.id).await.unwrap();
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_router_poll_feeds_anomalies_and_health() {
    let store = Arc::new(MemoryStore::new());
    let router = add_router(&store).await;

    let connections = (1..=25)
        .map(|port| {
            let dst = format!("192.168.88.1:{port}");
            raw_record([
                ("src-address", "203.0.113.66:51000"),
                ("dst-address", dst.as_str()),
                ("protocol", "tcp"),
                ("orig-bytes", "60"),
                ("repl-bytes", "0"),
            ])
        })
        .collect();
    let interfaces = vec![raw_record([
        ("name", "ether1"),
        ("running", "true"),
        ("rx-byte", "1000"),
        ("tx-byte", "1000"),
        ("rx-packet", "100"),
        ("tx-packet", "100"),
    ])];
    let channel = ScriptedChannel::default()
        .table(paths::CONNECTIONS, connections)
        .table(paths::INTERFACES, interfaces);

    let engine = Arc::new(AnomalyEngine::new(AnomalyConfig::default(), store.clone()).unwrap());
    let scheduler = Scheduler::builder()
        .repository(store.clone())
        .channel(Arc::new(channel))
        .collector(FlakyCollector::new(
            MethodKind::MetricsPoll,
            false,
            TrafficSample::new(10, 10),
        ))
        .anomaly_engine(engine.clone())
        .build()
        .unwrap();

    scheduler.run_manual_collection(router.id).await.unwrap();

    let hour = chrono::Duration::hours(1);
    let now = Utc::now();
    let anomalies = engine.get_anomalies(now - hour, now + hour).await.unwrap();
    assert_eq!(anomalies.len(), 5);
    assert!(anomalies.iter().all(|a| a.flow.device_id == router.id));

    let stored = store.get_interfaces(router.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].health_score, Some(100));
}

// ── Manual triggers ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_manual_router_discovery_coalesces() {
    let store = Arc::new(MemoryStore::new());
    let router = add_router(&store).await;
    let gate = Arc::new(Semaphore::new(0));
    let channel = Arc::new(
        ScriptedChannel::default()
            .table(
                paths::ARP,
                vec![raw_record([
                    ("address", "192.168.88.40"),
                    ("mac-address", "4C:5E:0C:11:22:33"),
                ])],
            )
            .gate(paths::ARP, Arc::clone(&gate)),
    );
    let scheduler = Scheduler::builder()
        .repository(store.clone())
        .channel(channel.clone())
        .build()
        .unwrap();

    let release = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.add_permits(1);
    };
    let (first, second, ()) = futures::join!(
        scheduler.run_manual_router_discovery(router.id),
        scheduler.run_manual_router_discovery(router.id),
        release,
    );

    let first = first.unwrap();
    assert_eq!(first, second.unwrap());
    assert_eq!(first.created, 1);
    assert_eq!(channel.calls(paths::ARP), 1);
    assert_eq!(store.device_count(), 2);

    // Once finished, the next trigger runs again.
    gate.add_permits(1);
    let third = scheduler.run_manual_router_discovery(router.id).await.unwrap();
    assert_eq!(third.refreshed, 1);
    assert_eq!(channel.calls(paths::ARP), 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_joins_scheduled_run() {
    let store = Arc::new(MemoryStore::new());
    let router = add_router(&store).await;
    let gate = Arc::new(Semaphore::new(0));
    let channel = Arc::new(
        ScriptedChannel::default()
            .table(
                paths::ARP,
                vec![raw_record([
                    ("address", "192.168.88.40"),
                    ("mac-address", "4C:5E:0C:11:22:33"),
                ])],
            )
            .gate(paths::ARP, Arc::clone(&gate)),
    );
    let scheduler = Scheduler::builder()
        .repository(store.clone())
        .channel(channel.clone())
        .settings(SchedulerSettings {
            tick: Duration::from_millis(100),
            ..SchedulerSettings::default()
        })
        .build()
        .unwrap();
    scheduler.initialize().await.unwrap();

    let key = JobKey::device(router.id, JobKind::RouterDiscovery);
    for _ in 0..20 {
        if scheduler
            .job_status(key)
            .is_some_and(|job| job.state == JobState::Running)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(scheduler.job_status(key).unwrap().state, JobState::Running);
    assert_eq!(channel.calls(paths::ARP), 1);

    let release = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.add_permits(1);
    };
    let (report, ()) = futures::join!(scheduler.run_manual_router_discovery(router.id), release);

    let report = report.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(channel.calls(paths::ARP), 1);
    assert_eq!(store.device_count(), 2);
    assert_eq!(scheduler.job_status(key).unwrap().state, JobState::Idle);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_validation_keeps_previous_value() {
    let scheduler = Scheduler::builder()
        .repository(Arc::new(MemoryStore::new()))
        .channel(Arc::new(ScriptedChannel::default()))
        .build()
        .unwrap();
    assert_ok!(scheduler.set_polling_interval(Duration::from_secs(30)));
    assert_err!(scheduler.set_polling_interval(Duration::from_millis(1_000)));
    assert_err!(scheduler.set_router_discovery_interval(Duration::ZERO));
    let status = scheduler.status();
    assert_eq!(status.polling_interval_ms, 30_000);
    assert_eq!(status.router_discovery_interval_ms, 600_000);
}
