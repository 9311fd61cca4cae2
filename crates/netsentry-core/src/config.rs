// ── Runtime engine configuration ──
//
// These types describe how the engine schedules, caches and scores.
// They never touch disk: the binary (or an embedding service) builds
// them, usually from `netsentry-config`, and hands them in.

use std::time::Duration;

use crate::error::CoreError;

/// Smallest accepted interval for any recurring job kind.
pub const MIN_INTERVAL: Duration = Duration::from_millis(5_000);

/// Reject an interval below [`MIN_INTERVAL`].
pub fn validate_interval(field: &str, interval: Duration) -> Result<(), CoreError> {
    if interval < MIN_INTERVAL {
        return Err(CoreError::validation(
            field,
            format!(
                "must be at least {}ms, got {}ms",
                MIN_INTERVAL.as_millis(),
                interval.as_millis()
            ),
        ));
    }
    Ok(())
}

// ── Scheduler ──────────────────────────────────────────────────────

/// Timing and concurrency knobs for the polling scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Interval of per-device metrics and wireless-stats jobs.
    pub polling_interval: Duration,
    pub discovery_interval: Duration,
    pub identification_interval: Duration,
    pub router_discovery_interval: Duration,
    /// Upper bound on simultaneously running jobs.
    pub max_concurrent_devices: usize,
    /// Hard limit on a single job run, device round-trips included.
    pub job_timeout: Duration,
    /// Dispatch loop wake-up period.
    pub tick: Duration,
    /// How often the job table is re-synced with the device list.
    pub sync_interval: Duration,
    /// First retry delay after a failure; doubles per consecutive failure.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive failed jobs, of any kind, after which a device is
    /// marked offline.
    pub failure_threshold: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(60),
            discovery_interval: Duration::from_secs(3_600),
            identification_interval: Duration::from_secs(900),
            router_discovery_interval: Duration::from_secs(600),
            max_concurrent_devices: 5,
            job_timeout: Duration::from_secs(30),
            tick: Duration::from_millis(500),
            sync_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            failure_threshold: 3,
        }
    }
}

impl SchedulerSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_interval("polling_interval", self.polling_interval)?;
        validate_interval("discovery_interval", self.discovery_interval)?;
        validate_interval("identification_interval", self.identification_interval)?;
        validate_interval("router_discovery_interval", self.router_discovery_interval)?;
        if self.max_concurrent_devices < 1 {
            return Err(CoreError::validation(
                "max_concurrent_devices",
                "must be at least 1",
            ));
        }
        if self.failure_threshold < 1 {
            return Err(CoreError::validation("failure_threshold", "must be at least 1"));
        }
        if self.tick.is_zero() || self.job_timeout.is_zero() || self.sync_interval.is_zero() {
            return Err(CoreError::validation(
                "tick",
                "tick, job_timeout and sync_interval must be non-zero",
            ));
        }
        if self.backoff_base > self.backoff_max {
            return Err(CoreError::validation(
                "backoff_base",
                "must not exceed backoff_max",
            ));
        }
        Ok(())
    }

    /// Retry delay after `consecutive_failures` failures in a row:
    /// `base * 2^(n-1)`, capped at `backoff_max`.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        self.backoff_base
            .checked_mul(1_u32 << exponent)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }
}

// ── Collection ─────────────────────────────────────────────────────

/// Strategy selector tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSettings {
    /// How long a collected record is served from cache.
    pub cache_ttl: Duration,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
        }
    }
}

// ── Anomaly detection ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortScanConfig {
    pub window: Duration,
    /// Distinct destination ports per source that must be exceeded.
    pub distinct_port_threshold: usize,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            distinct_port_threshold: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DosConfig {
    pub window: Duration,
    /// Aggregate bytes per second towards one destination endpoint.
    pub bytes_per_sec_threshold: u64,
    /// Aggregate packets per second towards one destination endpoint.
    pub packets_per_sec_threshold: u64,
}

impl Default for DosConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            bytes_per_sec_threshold: 10_000_000,
            packets_per_sec_threshold: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BruteForceConfig {
    pub window: Duration,
    /// Short connections from one source to one port that must be exceeded.
    pub attempt_threshold: usize,
    /// Connections lasting longer than this are not counted as attempts.
    pub max_attempt_duration: Duration,
    /// Ports considered authentication-sensitive.
    pub auth_ports: Vec<u16>,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            attempt_threshold: 10,
            max_attempt_duration: Duration::from_secs(5),
            auth_ports: vec![
                21, 22, 23, 25, 110, 143, 389, 445, 993, 995, 1433, 3306, 3389, 5432, 5900, 8291,
                8728, 8729,
            ],
        }
    }
}

/// Detector windows and thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyConfig {
    pub port_scan: PortScanConfig,
    pub dos: DosConfig,
    pub brute_force: BruteForceConfig,
    /// Flow groups with no event for this long are dropped.
    pub idle_ttl: Duration,
    /// Run an eviction sweep every this many ingested flows.
    pub sweep_every: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            port_scan: PortScanConfig::default(),
            dos: DosConfig::default(),
            brute_force: BruteForceConfig::default(),
            idle_ttl: Duration::from_secs(300),
            sweep_every: 1_024,
        }
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        let windows = [
            ("port_scan.window", self.port_scan.window),
            ("dos.window", self.dos.window),
            ("brute_force.window", self.brute_force.window),
        ];
        for (field, window) in windows {
            if window.is_zero() {
                return Err(CoreError::validation(field, "must be non-zero"));
            }
            if window > self.idle_ttl {
                return Err(CoreError::validation(
                    "idle_ttl",
                    format!("must be at least as long as {field}"),
                ));
            }
        }
        if self.port_scan.distinct_port_threshold == 0 {
            return Err(CoreError::validation(
                "port_scan.distinct_port_threshold",
                "must be at least 1",
            ));
        }
        if self.dos.bytes_per_sec_threshold == 0 || self.dos.packets_per_sec_threshold == 0 {
            return Err(CoreError::validation("dos", "thresholds must be at least 1"));
        }
        if self.brute_force.attempt_threshold == 0 {
            return Err(CoreError::validation(
                "brute_force.attempt_threshold",
                "must be at least 1",
            ));
        }
        if self.sweep_every == 0 {
            return Err(CoreError::validation("sweep_every", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SchedulerSettings::default().validate().is_ok());
        assert!(AnomalyConfig::default().validate().is_ok());
    }

    #[test]
    fn short_interval_is_rejected() {
        let err = validate_interval("polling_interval", Duration::from_millis(4_999)).unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref field, .. } if field == "polling_interval"));
        assert!(validate_interval("polling_interval", MIN_INTERVAL).is_ok());
    }

    #[test]
    fn backoff_doubles_until_ceiling() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.backoff_delay(1), Duration::from_secs(5));
        assert_eq!(settings.backoff_delay(2), Duration::from_secs(10));
        assert_eq!(settings.backoff_delay(3), Duration::from_secs(20));
        assert_eq!(settings.backoff_delay(10), Duration::from_secs(300));
        assert_eq!(settings.backoff_delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let settings = SchedulerSettings {
            max_concurrent_devices: 0,
            ..SchedulerSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
