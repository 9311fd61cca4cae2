// ── Polling scheduler ──
//
// One dispatch loop owns the job calendar. Every tick it marks due jobs
// Scheduled and admits as many as the concurrency limiter allows; the
// rest wait for the next tick or for a running job to finish. A job that
// cannot be admitted never holds up jobs for other devices.
//
// Runs are claimed per `JobKey` through the in-flight map. Whoever claims
// a key first owns the run; manual triggers arriving while it is in flight
// wait on the same `watch` channel and receive the same result.

mod builder;
mod job;
mod limiter;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::json;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::anomaly::AnomalyEngine;
use crate::channel::{CommandChannel, paths};
use crate::config::{SchedulerSettings, validate_interval};
use crate::convert;
use crate::discovery::{DiscoveryPipeline, DiscoveryReport, IdentificationReport, Subnet};
use crate::error::CoreError;
use crate::health::HealthScorer;
use crate::model::{
    Device, DeviceId, DevicePatch, DeviceRole, TrafficRecord, WirelessStats,
};
use crate::notify::{self, Notifier, topics};
use crate::store::Repository;
use crate::strategy::{StrategySelector, collect_wireless_stats};

pub use builder::SchedulerBuilder;
pub use job::{
    DevicePollingStatus, JobKey, JobKind, JobReport, JobState, JobStatus, JobTarget, PollingJob,
    SchedulerStatus,
};

use job::duration_ms;
use limiter::{ConcurrencyLimiter, Slot};

type RunResult = Result<JobReport, CoreError>;
type RunReceiver = watch::Receiver<Option<RunResult>>;
type RunSender = watch::Sender<Option<RunResult>>;

enum Claim {
    Owner(RunSender),
    Joined(RunReceiver),
}

fn interval_for(kind: JobKind, settings: &SchedulerSettings) -> Duration {
    match kind {
        JobKind::Metrics | JobKind::WirelessStats => settings.polling_interval,
        JobKind::Discovery => settings.discovery_interval,
        JobKind::Identification => settings.identification_interval,
        JobKind::RouterDiscovery => settings.router_discovery_interval,
    }
}

/// Recurring device-scoped jobs implied by a device's role.
fn device_job_kinds(device: &Device) -> Vec<JobKind> {
    let mut kinds = Vec::with_capacity(2);
    match device.role {
        DeviceRole::Unknown => {}
        DeviceRole::Client => kinds.push(JobKind::Metrics),
        DeviceRole::AccessPoint => {
            kinds.push(JobKind::Metrics);
            kinds.push(JobKind::WirelessStats);
        }
        DeviceRole::Router => {
            kinds.push(JobKind::Metrics);
            if device.managed {
                kinds.push(JobKind::RouterDiscovery);
            }
        }
    }
    kinds
}

fn unexpected(key: JobKey, report: &JobReport) -> CoreError {
    CoreError::Internal(format!("{key} produced an unexpected report: {report:?}"))
}

/// Long-lived polling service. Cheaply cloneable.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
    selector: StrategySelector,
    discovery: DiscoveryPipeline,
    health: HealthScorer,
    anomaly: Option<Arc<AnomalyEngine>>,
    settings: ArcSwap<SchedulerSettings>,
    limiter: ConcurrencyLimiter,
    jobs: DashMap<JobKey, PollingJob>,
    /// Consecutive failed device-scoped jobs per device, any kind.
    device_failures: DashMap<DeviceId, u32>,
    in_flight: DashMap<JobKey, RunReceiver>,
    running: AtomicBool,
    cancel: CancellationToken,
    /// Child token for the current run; replaced on every `initialize`.
    cancel_child: Mutex<CancellationToken>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    fn assemble(
        builder: SchedulerBuilder,
        store: Arc<dyn Repository>,
        channel: Arc<dyn CommandChannel>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let mut selector = StrategySelector::new(Arc::clone(&channel), builder.collection);
        for collector in builder.collectors {
            selector.register(collector);
        }
        let discovery = DiscoveryPipeline::new(
            Arc::clone(&store),
            channel,
            Arc::clone(&notifier),
            builder.oui.unwrap_or_default(),
        );
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(SchedulerInner {
                health: HealthScorer::new(Arc::clone(&store)),
                limiter: ConcurrencyLimiter::new(builder.settings.max_concurrent_devices),
                settings: ArcSwap::from_pointee(builder.settings),
                store,
                notifier,
                selector,
                discovery,
                anomaly: builder.anomaly,
                jobs: DashMap::new(),
                device_failures: DashMap::new(),
                in_flight: DashMap::new(),
                running: AtomicBool::new(false),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> Arc<SchedulerSettings> {
        self.inner.settings.load_full()
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.inner.selector
    }

    pub fn discovery(&self) -> &DiscoveryPipeline {
        &self.inner.discovery
    }

    pub fn anomaly_engine(&self) -> Option<&Arc<AnomalyEngine>> {
        self.inner.anomaly.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Load the job table and start the dispatch loop. A no-op while the
    /// loop is already running.
    pub async fn initialize(&self) -> Result<(), CoreError> {
        let mut handle = self.inner.loop_handle.lock().await;
        if handle.is_some() {
            debug!("scheduler already running");
            return Ok(());
        }

        self.seed_network_jobs();
        self.sync_jobs().await?;

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();
        *handle = Some(tokio::spawn(self.clone().dispatch_loop(child)));
        self.inner.running.store(true, Ordering::SeqCst);

        info!(
            jobs = self.inner.jobs.len(),
            max_concurrent = self.inner.limiter.limit(),
            "scheduler started"
        );
        Ok(())
    }

    /// Stop the dispatch loop and wait for running jobs to finish. The
    /// scheduler can be initialized again afterwards.
    pub async fn shutdown(&self) {
        let Some(handle) = self.inner.loop_handle.lock().await.take() else {
            debug!("scheduler not running");
            return;
        };
        self.inner.cancel_child.lock().await.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "dispatch loop ended abnormally");
        }
        self.inner.running.store(false, Ordering::SeqCst);
        info!("scheduler stopped");
    }

    // ── Settings ─────────────────────────────────────────────────────

    fn update_settings(&self, apply: impl Fn(&mut SchedulerSettings)) {
        self.inner.settings.rcu(|current| {
            let mut next = SchedulerSettings::clone(current);
            apply(&mut next);
            next
        });
    }

    /// Bring idle jobs of `kinds` forward so a shorter interval applies
    /// from the next tick instead of after the old one elapses.
    fn pull_forward(&self, kinds: &[JobKind], interval: Duration) {
        let deadline = Instant::now() + interval;
        for mut job in self.inner.jobs.iter_mut() {
            if kinds.contains(&job.key.kind) && job.state == JobState::Idle {
                job.next_run_at = job.next_run_at.min(deadline);
            }
        }
    }

    fn set_interval(
        &self,
        field: &str,
        kinds: &[JobKind],
        interval: Duration,
        apply: impl Fn(&mut SchedulerSettings, Duration),
    ) -> Result<(), CoreError> {
        validate_interval(field, interval)?;
        self.update_settings(|settings| apply(settings, interval));
        self.pull_forward(kinds, interval);
        info!(field, interval_ms = duration_ms(interval), "interval updated");
        Ok(())
    }

    /// Interval of per-device metrics and wireless-stats jobs.
    pub fn set_polling_interval(&self, interval: Duration) -> Result<(), CoreError> {
        self.set_interval(
            "polling_interval",
            &[JobKind::Metrics, JobKind::WirelessStats],
            interval,
            |s, d| s.polling_interval = d,
        )
    }

    pub fn set_discovery_scan_interval(&self, interval: Duration) -> Result<(), CoreError> {
        self.set_interval(
            "discovery_interval",
            &[JobKind::Discovery],
            interval,
            |s, d| s.discovery_interval = d,
        )
    }

    pub fn set_identification_scan_interval(&self, interval: Duration) -> Result<(), CoreError> {
        self.set_interval(
            "identification_interval",
            &[JobKind::Identification],
            interval,
            |s, d| s.identification_interval = d,
        )
    }

    pub fn set_router_discovery_interval(&self, interval: Duration) -> Result<(), CoreError> {
        self.set_interval(
            "router_discovery_interval",
            &[JobKind::RouterDiscovery],
            interval,
            |s, d| s.router_discovery_interval = d,
        )
    }

    /// New bound applies to the next admission. Running jobs are never
    /// preempted; a lower bound is reached as they finish.
    pub fn set_max_concurrent_devices(&self, limit: usize) -> Result<(), CoreError> {
        if limit < 1 {
            return Err(CoreError::validation(
                "max_concurrent_devices",
                "must be at least 1",
            ));
        }
        self.inner.limiter.resize(limit);
        self.update_settings(|s| s.max_concurrent_devices = limit);
        info!(limit, "concurrency limit updated");
        Ok(())
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Job states for every device with at least one scheduled job.
    pub fn device_polling_status(&self) -> Vec<DevicePollingStatus> {
        let settings = self.settings();
        let now = Instant::now();
        let mut by_device: BTreeMap<DeviceId, Vec<JobStatus>> = BTreeMap::new();
        for job in self.inner.jobs.iter() {
            if let Some(device_id) = job.key.target.device_id() {
                by_device
                    .entry(device_id)
                    .or_default()
                    .push(job.status(interval_for(job.key.kind, &settings), now));
            }
        }
        by_device
            .into_iter()
            .map(|(device_id, mut jobs)| {
                jobs.sort_by_key(|j| j.kind);
                DevicePollingStatus { device_id, jobs }
            })
            .collect()
    }

    pub fn job_status(&self, key: JobKey) -> Option<JobStatus> {
        let settings = self.settings();
        self.inner
            .jobs
            .get(&key)
            .map(|job| job.status(interval_for(key.kind, &settings), Instant::now()))
    }

    pub fn status(&self) -> SchedulerStatus {
        let settings = self.settings();
        let queue_depth = self
            .inner
            .jobs
            .iter()
            .filter(|job| job.state == JobState::Scheduled)
            .count();
        SchedulerStatus {
            running: self.is_running(),
            polling_interval_ms: duration_ms(settings.polling_interval),
            discovery_interval_ms: duration_ms(settings.discovery_interval),
            identification_interval_ms: duration_ms(settings.identification_interval),
            router_discovery_interval_ms: duration_ms(settings.router_discovery_interval),
            max_concurrent_devices: settings.max_concurrent_devices,
            active_jobs: self.inner.limiter.active(),
            queue_depth,
            job_count: self.inner.jobs.len(),
        }
    }

    // ── Manual triggers ──────────────────────────────────────────────

    /// Run network discovery now, or join the run already in flight.
    pub async fn run_manual_discovery(
        &self,
        subnet: Option<Subnet>,
    ) -> Result<DiscoveryReport, CoreError> {
        let key = JobKey::network(JobKind::Discovery);
        match self.run_now(key, subnet).await? {
            JobReport::Discovery(report) => Ok(report),
            other => Err(unexpected(key, &other)),
        }
    }

    /// Scan one router's neighbor tables now, or join the run in flight.
    pub async fn run_manual_router_discovery(
        &self,
        device_id: DeviceId,
    ) -> Result<DiscoveryReport, CoreError> {
        let key = JobKey::device(device_id, JobKind::RouterDiscovery);
        match self.run_now(key, None).await? {
            JobReport::Discovery(report) => Ok(report),
            other => Err(unexpected(key, &other)),
        }
    }

    pub async fn run_manual_identification(&self) -> Result<IdentificationReport, CoreError> {
        let key = JobKey::network(JobKind::Identification);
        match self.run_now(key, None).await? {
            JobReport::Identification(report) => Ok(report),
            other => Err(unexpected(key, &other)),
        }
    }

    /// Collect traffic for one device now, or join the poll in flight.
    pub async fn run_manual_collection(
        &self,
        device_id: DeviceId,
    ) -> Result<TrafficRecord, CoreError> {
        let key = JobKey::device(device_id, JobKind::Metrics);
        match self.run_now(key, None).await? {
            JobReport::Metrics(record) => Ok(record),
            other => Err(unexpected(key, &other)),
        }
    }

    /// Re-classify identified devices and resync the job table so role
    /// changes pick up their new jobs.
    pub async fn reclassify_all_devices(&self) -> Result<usize, CoreError> {
        let changed = self
            .inner
            .discovery
            .classifier()
            .reclassify_all_devices()
            .await?;
        if changed > 0 {
            self.sync_jobs().await?;
        }
        Ok(changed)
    }

    pub async fn classify_device(&self, device_id: DeviceId) -> Result<DeviceRole, CoreError> {
        let role = self
            .inner
            .discovery
            .classifier()
            .classify_device(device_id)
            .await?;
        self.sync_jobs().await?;
        Ok(role)
    }

    // ── Job table ────────────────────────────────────────────────────

    fn seed_network_jobs(&self) {
        let settings = self.settings();
        let now = Instant::now();
        for kind in [JobKind::Discovery, JobKind::Identification] {
            let key = JobKey::network(kind);
            self.inner
                .jobs
                .entry(key)
                .or_insert_with(|| PollingJob::new(key, now + interval_for(kind, &settings)));
        }
    }

    /// Reconcile device-scoped jobs with the repository. New jobs are due
    /// immediately; jobs whose device disappeared or changed role are
    /// dropped unless running. Returns how many jobs were added.
    pub async fn sync_jobs(&self) -> Result<usize, CoreError> {
        let devices = self.inner.store.list_devices().await?;
        let known: HashSet<DeviceId> = devices.iter().map(|d| d.id).collect();
        let desired: HashSet<JobKey> = devices
            .iter()
            .flat_map(|device| {
                device_job_kinds(device)
                    .into_iter()
                    .map(move |kind| JobKey::device(device.id, kind))
            })
            .collect();

        let now = Instant::now();
        let mut added = 0_usize;
        for key in &desired {
            if let Entry::Vacant(slot) = self.inner.jobs.entry(*key) {
                slot.insert(PollingJob::new(*key, now));
                added += 1;
            }
        }

        let mut removed = Vec::new();
        self.inner.jobs.retain(|key, job| {
            let keep = key.target == JobTarget::Network
                || desired.contains(key)
                || job.state == JobState::Running;
            if !keep {
                removed.push(*key);
            }
            keep
        });
        for device_id in removed.iter().filter_map(|key| key.target.device_id()) {
            if !known.contains(&device_id) {
                self.inner.selector.forget(device_id);
                self.inner.device_failures.remove(&device_id);
                if let Some(engine) = self.inner.anomaly.as_ref() {
                    engine.forget_device(device_id);
                }
            }
        }

        if added > 0 || !removed.is_empty() {
            debug!(added, removed = removed.len(), "job table synced");
        }
        Ok(added)
    }

    fn set_state(&self, key: JobKey, state: JobState) {
        if let Some(mut job) = self.inner.jobs.get_mut(&key) {
            job.state = state;
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    async fn dispatch_loop(self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.settings().tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sync = Instant::now();
        let mut runs: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "job task ended abnormally");
                    }
                }
                _ = tick.tick() => {
                    if last_sync.elapsed() >= self.settings().sync_interval {
                        if let Err(e) = self.sync_jobs().await {
                            warn!(error = %e, "job table sync failed");
                        }
                        last_sync = Instant::now();
                    }
                    self.promote_due();
                }
            }
            self.admit(&mut runs);
        }

        if !runs.is_empty() {
            debug!(pending = runs.len(), "waiting for running jobs");
        }
        while runs.join_next().await.is_some() {}
    }

    fn promote_due(&self) {
        let now = Instant::now();
        for mut job in self.inner.jobs.iter_mut() {
            if job.is_due(now) {
                job.state = JobState::Scheduled;
            }
        }
    }

    /// Admit Scheduled jobs, oldest due first, while slots are free.
    fn admit(&self, runs: &mut JoinSet<()>) {
        let mut queued: Vec<(Instant, JobKey)> = self
            .inner
            .jobs
            .iter()
            .filter(|job| job.state == JobState::Scheduled)
            .map(|job| (job.next_run_at, job.key))
            .collect();
        if queued.is_empty() {
            return;
        }
        queued.sort_unstable();

        for (_, key) in queued {
            // A manual run owns this key; its completion reschedules the job.
            if self.inner.in_flight.contains_key(&key) {
                continue;
            }
            let Some(slot) = self.inner.limiter.try_acquire() else {
                debug!(limit = self.inner.limiter.limit(), "concurrency limit reached");
                break;
            };
            let Claim::Owner(tx) = self.claim(key) else {
                continue;
            };
            self.set_state(key, JobState::Running);
            let this = self.clone();
            runs.spawn(async move { this.execute(key, None, slot, tx).await });
        }
    }

    /// Atomically become the owner of `key`'s run, or join the one in
    /// flight.
    fn claim(&self, key: JobKey) -> Claim {
        match self.inner.in_flight.entry(key) {
            Entry::Occupied(mut entry) => {
                // A run whose owner vanished without reporting is stale.
                if entry.get().has_changed().is_err() && entry.get().borrow().is_none() {
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx);
                    Claim::Owner(tx)
                } else {
                    Claim::Joined(entry.get().clone())
                }
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                Claim::Owner(tx)
            }
        }
    }

    async fn run_now(&self, key: JobKey, subnet: Option<Subnet>) -> RunResult {
        let rx = match self.claim(key) {
            Claim::Joined(rx) => {
                debug!(job = %key, "joining in-flight run");
                rx
            }
            Claim::Owner(tx) => {
                let rx = tx.subscribe();
                let this = self.clone();
                tokio::spawn(async move {
                    match this.inner.limiter.acquire().await {
                        Ok(slot) => this.execute(key, subnet, slot, tx).await,
                        Err(e) => this.finish(key, &tx, Err(e)),
                    }
                });
                rx
            }
        };
        await_run(rx).await
    }

    async fn execute(&self, key: JobKey, subnet: Option<Subnet>, slot: Slot, tx: RunSender) {
        self.set_state(key, JobState::Running);
        let timeout = self.settings().job_timeout;
        let started = Instant::now();

        let result = match tokio::time::timeout(timeout, self.run_job(key, subnet)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout {
                timeout_ms: duration_ms(timeout),
            }),
        };

        self.complete(key, &result).await;
        drop(slot);
        debug!(
            job = %key,
            ok = result.is_ok(),
            elapsed_ms = duration_ms(started.elapsed()),
            "job finished"
        );
        self.finish(key, &tx, result);
    }

    fn finish(&self, key: JobKey, tx: &RunSender, result: RunResult) {
        tx.send_replace(Some(result));
        self.inner.in_flight.remove(&key);
    }

    // ── Job bodies ───────────────────────────────────────────────────

    async fn run_job(&self, key: JobKey, subnet: Option<Subnet>) -> RunResult {
        match (key.kind, key.target) {
            (JobKind::Metrics, JobTarget::Device(id)) => {
                self.collect_metrics(id).await.map(JobReport::Metrics)
            }
            (JobKind::WirelessStats, JobTarget::Device(id)) => {
                self.collect_wireless(id).await.map(JobReport::WirelessStats)
            }
            (JobKind::RouterDiscovery, JobTarget::Device(id)) => {
                let report = self.inner.discovery.discover_router(id).await?;
                self.resync_after(key).await;
                Ok(JobReport::Discovery(report))
            }
            (JobKind::Discovery, _) => {
                let report = self.inner.discovery.scan(subnet).await?;
                self.resync_after(key).await;
                Ok(JobReport::Discovery(report))
            }
            (JobKind::Identification, _) => {
                let report = self.inner.discovery.identify_pending().await?;
                self.resync_after(key).await;
                Ok(JobReport::Identification(report))
            }
            (kind, JobTarget::Network) => Err(CoreError::Internal(format!(
                "{kind} jobs need a device target"
            ))),
        }
    }

    async fn resync_after(&self, key: JobKey) {
        if let Err(e) = self.sync_jobs().await {
            warn!(job = %key, error = %e, "job table sync failed");
        }
    }

    async fn device(&self, id: DeviceId) -> Result<Device, CoreError> {
        self.inner
            .store
            .get_device(id)
            .await?
            .ok_or(CoreError::DeviceNotFound { device_id: id })
    }

    async fn collect_metrics(&self, id: DeviceId) -> Result<TrafficRecord, CoreError> {
        let device = self.device(id).await?;
        let record = self.inner.selector.collect(&device).await?;
        self.inner.store.save_traffic_data(&record).await?;
        notify::publish_json(
            self.inner.notifier.as_ref(),
            topics::TRAFFIC_COLLECTED,
            &record,
        );

        if device.role == DeviceRole::Router && device.managed {
            self.refresh_interface_health(&device).await;
            self.analyze_connections(&device).await;
        }
        Ok(record)
    }

    async fn collect_wireless(&self, id: DeviceId) -> Result<WirelessStats, CoreError> {
        let device = self.device(id).await?;
        let stats = collect_wireless_stats(&device, self.inner.selector.channel().as_ref()).await?;
        notify::publish_json(
            self.inner.notifier.as_ref(),
            topics::WIRELESS_COLLECTED,
            &stats,
        );
        Ok(stats)
    }

    /// Re-score the router's interfaces. Failures are logged only.
    async fn refresh_interface_health(&self, device: &Device) {
        let rows = match self
            .inner
            .selector
            .channel()
            .execute_command(device.command_target(), paths::INTERFACES, &[])
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "interface read failed");
                return;
            }
        };
        let counters = rows
            .iter()
            .filter_map(|row| match convert::interface_counters(row) {
                Ok(counters) => Some(counters),
                Err(e) => {
                    debug!(device_id = %device.id, error = %e, "skipping interface row");
                    None
                }
            })
            .collect();
        if let Err(e) = self.inner.health.refresh_device(device.id, counters).await {
            warn!(device_id = %device.id, error = %e, "interface health refresh failed");
        }
    }

    /// Feed the router's connection table to the anomaly engine, if one is
    /// attached. Failures are logged only.
    async fn analyze_connections(&self, device: &Device) {
        let Some(engine) = self.inner.anomaly.as_ref() else {
            return;
        };
        let rows = match self
            .inner
            .selector
            .channel()
            .execute_command(device.command_target(), paths::CONNECTIONS, &[])
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "connection table read failed");
                return;
            }
        };
        match engine.analyze_connections(device.id, &rows).await {
            Ok(batch) if batch.anomaly_count > 0 => {
                info!(
                    device_id = %device.id,
                    anomalies = batch.anomaly_count,
                    "anomalies in connection table"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(device_id = %device.id, error = %e, "connection analysis failed"),
        }
    }

    // ── Completion ───────────────────────────────────────────────────

    /// Reschedule the job and apply liveness changes. Runs before the
    /// slot is released.
    ///
    /// Backoff follows the job's own failure count. Liveness follows the
    /// device's: any successful job resets it, and the device goes offline
    /// once that many jobs in a row have failed across all its kinds.
    async fn complete(&self, key: JobKey, result: &RunResult) {
        let settings = self.settings();
        let now = Instant::now();
        let failures = {
            let Some(mut job) = self.inner.jobs.get_mut(&key) else {
                return;
            };
            job.last_run_at = Some(Utc::now());
            match result {
                Ok(_) => {
                    job.consecutive_failures = 0;
                    job.last_error = None;
                    job.state = JobState::Idle;
                    job.next_run_at = now + interval_for(key.kind, &settings);
                }
                Err(e) => {
                    job.consecutive_failures = job.consecutive_failures.saturating_add(1);
                    job.last_error = Some(e.to_string());
                    if e.is_retryable() {
                        job.state = JobState::Backoff;
                        job.next_run_at = now + settings.backoff_delay(job.consecutive_failures);
                    } else {
                        job.state = JobState::Idle;
                        job.next_run_at = now + interval_for(key.kind, &settings);
                    }
                }
            }
            job.consecutive_failures
        };

        let Err(e) = result else {
            if let Some(device_id) = key.target.device_id() {
                self.inner.device_failures.remove(&device_id);
                self.set_liveness(device_id, true).await;
            }
            return;
        };

        warn!(job = %key, failures, error = %e, "job failed");
        self.inner.notifier.publish(
            topics::JOB_FAILED,
            json!({
                "job": key,
                "failures": failures,
                "error": e.to_string(),
            }),
        );
        if let Some(device_id) = key.target.device_id() {
            let device_failures = {
                let mut count = self.inner.device_failures.entry(device_id).or_insert(0);
                *count = count.saturating_add(1);
                *count
            };
            if device_failures >= settings.failure_threshold {
                self.set_liveness(device_id, false).await;
            }
        }
    }

    /// Flip a device's online flag if it differs, publishing the change.
    async fn set_liveness(&self, device_id: DeviceId, online: bool) {
        let device = match self.inner.store.get_device(device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => return,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "liveness lookup failed");
                return;
            }
        };
        if device.is_online == online {
            return;
        }
        if let Err(e) = self
            .inner
            .store
            .update_device(device_id, DevicePatch::liveness(online))
            .await
        {
            warn!(device_id = %device_id, error = %e, "liveness update failed");
            return;
        }

        let topic = if online {
            info!(device_id = %device_id, device = %device.label(), "device back online");
            topics::DEVICE_ONLINE
        } else {
            info!(device_id = %device_id, device = %device.label(), "device marked offline");
            topics::DEVICE_OFFLINE
        };
        self.inner
            .notifier
            .publish(topic, json!({ "deviceId": device_id, "address": device.address }));
    }
}

async fn await_run(mut rx: RunReceiver) -> RunResult {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(value) => Option::clone(&value),
        Err(_) => None,
    };
    outcome.unwrap_or_else(|| Err(CoreError::Internal("job run ended without a result".into())))
}
