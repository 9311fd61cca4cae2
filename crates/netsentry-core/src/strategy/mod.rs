// ── Collection strategy selection ──
//
// Produces one `TrafficRecord` per device per poll. The role decides the
// ordered method chain; the first method that yields traffic wins and is
// tagged as the record's source. Results are cached per device for a
// short TTL so repeated polls inside the window never touch the device.

mod builtin;
mod rate;
mod wireless;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::channel::CommandChannel;
use crate::classify::methods_for_role;
use crate::config::CollectionSettings;
use crate::error::CoreError;
use crate::model::{Device, DeviceId, MethodKind, RecordConfidence, TrafficRecord, TrafficSample};

pub use builtin::BuiltinCollector;
pub use rate::RateTracker;
pub use wireless::collect_wireless_stats;

const ALL_METHODS: [MethodKind; 7] = [
    MethodKind::MetricsPoll,
    MethodKind::FirewallPoll,
    MethodKind::DhcpPoll,
    MethodKind::WirelessStatsPoll,
    MethodKind::CapsmanPoll,
    MethodKind::ArpPresencePoll,
    MethodKind::TrafficEstimate,
];

/// One way of measuring a device's traffic.
#[async_trait]
pub trait TrafficCollector: Send + Sync {
    fn kind(&self) -> MethodKind;

    /// Current rates for `device`. An `Ok` sample with no traffic counts
    /// as a miss, and the selector moves on to the next method.
    async fn collect(
        &self,
        device: &Device,
        channel: &dyn CommandChannel,
    ) -> Result<TrafficSample, CoreError>;
}

struct CachedRecord {
    record: TrafficRecord,
    stored_at: Instant,
}

/// Role-driven fallback chain with a per-device TTL cache.
pub struct StrategySelector {
    channel: Arc<dyn CommandChannel>,
    collectors: HashMap<MethodKind, Arc<dyn TrafficCollector>>,
    cache: DashMap<DeviceId, CachedRecord>,
    rates: Arc<RateTracker>,
    settings: CollectionSettings,
}

impl StrategySelector {
    /// Selector with the built-in collector registered for every method.
    pub fn new(channel: Arc<dyn CommandChannel>, settings: CollectionSettings) -> Self {
        let rates = Arc::new(RateTracker::new());
        let collectors = ALL_METHODS
            .into_iter()
            .map(|kind| {
                let collector: Arc<dyn TrafficCollector> =
                    Arc::new(BuiltinCollector::new(kind, Arc::clone(&rates)));
                (kind, collector)
            })
            .collect();
        Self {
            channel,
            collectors,
            cache: DashMap::new(),
            rates,
            settings,
        }
    }

    /// Replace the collector for the method it reports.
    pub fn with_collector(mut self, collector: Arc<dyn TrafficCollector>) -> Self {
        self.register(collector);
        self
    }

    pub fn register(&mut self, collector: Arc<dyn TrafficCollector>) {
        self.collectors.insert(collector.kind(), collector);
    }

    pub fn settings(&self) -> &CollectionSettings {
        &self.settings
    }

    /// Collect through the device's role chain, serving from cache within
    /// the TTL.
    pub async fn collect(&self, device: &Device) -> Result<TrafficRecord, CoreError> {
        self.collect_with(device, methods_for_role(device.role)).await
    }

    /// Collect through an explicit method chain.
    pub async fn collect_with(
        &self,
        device: &Device,
        methods: &[MethodKind],
    ) -> Result<TrafficRecord, CoreError> {
        if let Some(record) = self.cached(device.id) {
            debug!(device_id = %device.id, "serving cached traffic record");
            return Ok(record);
        }
        if methods.is_empty() {
            return Err(CoreError::Collection {
                device_id: device.id,
                reason: format!("no collection methods for role {}", device.role),
            });
        }

        let mut failures = Vec::with_capacity(methods.len());
        for (position, &kind) in methods.iter().enumerate() {
            let Some(collector) = self.collectors.get(&kind) else {
                failures.push(format!("{kind}: no collector registered"));
                continue;
            };
            match collector.collect(device, self.channel.as_ref()).await {
                Ok(sample) if sample.has_traffic() => {
                    let confidence = if position == 0 {
                        RecordConfidence::Primary
                    } else {
                        info!(device_id = %device.id, method = %kind, "fallback method supplied traffic");
                        RecordConfidence::Partial
                    };
                    let record = TrafficRecord {
                        device_id: device.id,
                        download: sample.download,
                        upload: sample.upload,
                        timestamp: Utc::now(),
                        source_method: kind,
                        confidence,
                    };
                    self.cache.insert(
                        device.id,
                        CachedRecord {
                            record: record.clone(),
                            stored_at: Instant::now(),
                        },
                    );
                    return Ok(record);
                }
                Ok(_) => {
                    debug!(device_id = %device.id, method = %kind, "method returned no traffic");
                    failures.push(format!("{kind}: no traffic"));
                }
                Err(e) => {
                    debug!(device_id = %device.id, method = %kind, error = %e, "method failed");
                    failures.push(format!("{kind}: {e}"));
                }
            }
        }

        Err(CoreError::Collection {
            device_id: device.id,
            reason: failures.join("; "),
        })
    }

    /// Cached record for a device if still within the TTL.
    pub fn cached(&self, device_id: DeviceId) -> Option<TrafficRecord> {
        let ttl = self.settings.cache_ttl;
        let entry = self.cache.get(&device_id)?;
        (entry.stored_at.elapsed() < ttl).then(|| entry.record.clone())
    }

    /// Drop a device's cached record so the next call collects afresh.
    pub fn clear_cache(&self, device_id: DeviceId) -> bool {
        self.cache.remove(&device_id).is_some()
    }

    /// Forget everything known about a device: cache and rate baselines.
    pub fn forget(&self, device_id: DeviceId) {
        self.cache.remove(&device_id);
        self.rates.reset(device_id);
    }

    pub fn channel(&self) -> &Arc<dyn CommandChannel> {
        &self.channel
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::channel::RawRecord;
    use crate::model::{DeviceRole, NewDevice};

    struct NoChannel;

    #[async_trait]
    impl CommandChannel for NoChannel {
        async fn execute_command(
            &self,
            device_id: DeviceId,
            _path: &str,
            _params: &[(&str, &str)],
        ) -> Result<Vec<RawRecord>, CoreError> {
            Err(CoreError::Connectivity {
                device_id,
                reason: "offline".into(),
            })
        }
    }

    struct Fixed {
        kind: MethodKind,
        result: Result<TrafficSample, CoreError>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(kind: MethodKind, result: Result<TrafficSample, CoreError>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TrafficCollector for Fixed {
        fn kind(&self) -> MethodKind {
            self.kind
        }

        async fn collect(
            &self,
            _device: &Device,
            _channel: &dyn CommandChannel,
        ) -> Result<TrafficSample, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn router() -> Device {
        NewDevice::managed("10.0.0.1".parse().unwrap(), DeviceRole::Router)
            .into_device(DeviceId::new(1))
    }

    fn selector(ttl: Duration) -> StrategySelector {
        StrategySelector::new(Arc::new(NoChannel), CollectionSettings { cache_ttl: ttl })
    }

    #[tokio::test(start_paused = true)]
    async fn first_successful_method_wins() {
        let primary = Fixed::new(MethodKind::MetricsPoll, Ok(TrafficSample::new(10, 20)));
        let fallback = Fixed::new(MethodKind::FirewallPoll, Ok(TrafficSample::new(1, 1)));
        let selector = selector(Duration::from_secs(30))
            .with_collector(primary.clone())
            .with_collector(fallback.clone());

        let record = selector.collect(&router()).await.unwrap();
        assert_eq!(record.source_method, MethodKind::MetricsPoll);
        assert_eq!(record.confidence, RecordConfidence::Primary);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_traffic_falls_through() {
        let primary = Fixed::new(MethodKind::MetricsPoll, Ok(TrafficSample::default()));
        let fallback = Fixed::new(MethodKind::FirewallPoll, Ok(TrafficSample::new(7, 0)));
        let selector = selector(Duration::from_secs(30))
            .with_collector(primary)
            .with_collector(fallback);

        let record = selector.collect(&router()).await.unwrap();
        assert_eq!(record.source_method, MethodKind::FirewallPoll);
        assert_eq!(record.confidence, RecordConfidence::Partial);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chain_is_collection_error() {
        // Built-in collectors hit the failing channel.
        let err = selector(Duration::from_secs(30))
            .collect(&router())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Collection { .. }));
        assert!(err.to_string().contains("metricsPoll"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_role_has_nothing_to_try() {
        let mut device = router();
        device.role = DeviceRole::Unknown;
        let err = selector(Duration::from_secs(30))
            .collect(&device)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Collection { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expires_after_ttl() {
        let primary = Fixed::new(MethodKind::MetricsPoll, Ok(TrafficSample::new(5, 5)));
        let selector = selector(Duration::from_secs(10)).with_collector(primary.clone());
        let device = router();

        let first = selector.collect(&device).await.unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(selector.collect(&device).await.unwrap(), first);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        selector.collect(&device).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cache_forces_fresh_collection() {
        let primary = Fixed::new(MethodKind::MetricsPoll, Ok(TrafficSample::new(5, 5)));
        let selector = selector(Duration::from_secs(60)).with_collector(primary.clone());
        let device = router();

        selector.collect(&device).await.unwrap();
        assert!(selector.clear_cache(device.id));
        assert!(!selector.clear_cache(device.id));
        selector.collect(&device).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }
}
