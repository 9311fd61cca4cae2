// ── Counter-to-rate conversion ──
//
// Devices report cumulative byte counters. Rates are the measured delta
// over the measured elapsed time between two readings, nothing else.

use dashmap::DashMap;
use tokio::time::Instant;

use crate::model::{DeviceId, MethodKind, TrafficSample};

#[derive(Debug, Clone, Copy)]
struct Baseline {
    download: u64,
    upload: u64,
    at: Instant,
}

/// Last counter reading per (device, method).
#[derive(Debug, Default)]
pub struct RateTracker {
    baselines: DashMap<(DeviceId, MethodKind), Baseline>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record cumulative totals and return bytes/second since the previous
    /// reading.
    ///
    /// The first reading only sets the baseline and yields a zero sample.
    /// A counter that went backwards (device reboot, table flush) is
    /// treated the same way.
    pub fn observe(
        &self,
        device_id: DeviceId,
        method: MethodKind,
        download_total: u64,
        upload_total: u64,
    ) -> TrafficSample {
        self.observe_at(device_id, method, download_total, upload_total, Instant::now())
    }

    fn observe_at(
        &self,
        device_id: DeviceId,
        method: MethodKind,
        download_total: u64,
        upload_total: u64,
        now: Instant,
    ) -> TrafficSample {
        let current = Baseline {
            download: download_total,
            upload: upload_total,
            at: now,
        };
        let previous = self.baselines.insert((device_id, method), current);

        let Some(previous) = previous else {
            return TrafficSample::default();
        };
        if download_total < previous.download || upload_total < previous.upload {
            return TrafficSample::default();
        }
        let elapsed = now.saturating_duration_since(previous.at).as_secs_f64();
        if elapsed <= 0.0 {
            return TrafficSample::default();
        }
        TrafficSample::new(
            per_second(download_total - previous.download, elapsed),
            per_second(upload_total - previous.upload, elapsed),
        )
    }

    /// Forget a device's baselines.
    pub fn reset(&self, device_id: DeviceId) {
        self.baselines.retain(|(id, _), _| *id != device_id);
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
fn per_second(delta: u64, elapsed_secs: f64) -> u64 {
    (delta as f64 / elapsed_secs).round() as u64
}
