//! Configuration for netsentry.
//!
//! TOML file + `NETSENTRY_` environment layering, validation, and
//! translation into the runtime settings `netsentry_core` consumes.
//! Durations are milliseconds on disk (`*_ms` keys).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use netsentry_core::{
    AnomalyConfig, BruteForceConfig, CollectionSettings, CoreError, DosConfig, OuiTable,
    PortScanConfig, SchedulerSettings, Subnet,
};

/// Output formats the binary accepts for `defaults.output`.
pub const OUTPUT_FORMATS: &[&str] = &["table", "json", "json-compact", "yaml", "plain"];

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<CoreError> for ConfigError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Validation {
                field: "config".into(),
                reason: other.to_string(),
            },
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub scheduler: SchedulerSection,
    pub collection: CollectionSection,
    pub discovery: DiscoverySection,
    pub anomaly: AnomalySection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    /// Default `--output` format.
    pub output: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: "table".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub polling_interval_ms: u64,
    pub discovery_interval_ms: u64,
    pub identification_interval_ms: u64,
    pub router_discovery_interval_ms: u64,
    pub max_concurrent_devices: usize,
    pub job_timeout_ms: u64,
    pub tick_ms: u64,
    pub sync_interval_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub failure_threshold: u32,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let s = SchedulerSettings::default();
        Self {
            polling_interval_ms: millis(s.polling_interval),
            discovery_interval_ms: millis(s.discovery_interval),
            identification_interval_ms: millis(s.identification_interval),
            router_discovery_interval_ms: millis(s.router_discovery_interval),
            max_concurrent_devices: s.max_concurrent_devices,
            job_timeout_ms: millis(s.job_timeout),
            tick_ms: millis(s.tick),
            sync_interval_ms: millis(s.sync_interval),
            backoff_base_ms: millis(s.backoff_base),
            backoff_max_ms: millis(s.backoff_max),
            failure_threshold: s.failure_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectionSection {
    pub cache_ttl_ms: u64,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            cache_ttl_ms: millis(CollectionSettings::default().cache_ttl),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Subnet used when a manual discovery names none (`a.b.c.d/n`).
    pub default_subnet: Option<String>,

    /// Extra MAC prefix → vendor entries, layered over the built-in table.
    pub oui: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnomalySection {
    pub idle_ttl_ms: u64,
    pub sweep_every: u64,
    pub port_scan: PortScanSection,
    pub dos: DosSection,
    pub brute_force: BruteForceSection,
}

impl Default for AnomalySection {
    fn default() -> Self {
        let a = AnomalyConfig::default();
        Self {
            idle_ttl_ms: millis(a.idle_ttl),
            sweep_every: a.sweep_every,
            port_scan: PortScanSection::default(),
            dos: DosSection::default(),
            brute_force: BruteForceSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PortScanSection {
    pub window_ms: u64,
    pub distinct_port_threshold: usize,
}

impl Default for PortScanSection {
    fn default() -> Self {
        let c = PortScanConfig::default();
        Self {
            window_ms: millis(c.window),
            distinct_port_threshold: c.distinct_port_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DosSection {
    pub window_ms: u64,
    pub bytes_per_sec_threshold: u64,
    pub packets_per_sec_threshold: u64,
}

impl Default for DosSection {
    fn default() -> Self {
        let c = DosConfig::default();
        Self {
            window_ms: millis(c.window),
            bytes_per_sec_threshold: c.bytes_per_sec_threshold,
            packets_per_sec_threshold: c.packets_per_sec_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BruteForceSection {
    pub window_ms: u64,
    pub attempt_threshold: usize,
    pub max_attempt_duration_ms: u64,
    pub auth_ports: Vec<u16>,
}

impl Default for BruteForceSection {
    fn default() -> Self {
        let c = BruteForceConfig::default();
        Self {
            window_ms: millis(c.window),
            attempt_threshold: c.attempt_threshold,
            max_attempt_duration_ms: millis(c.max_attempt_duration),
            auth_ports: c.auth_ports,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Translation to runtime settings ─────────────────────────────────

impl Config {
    /// Check every section. Loading never validates implicitly so that
    /// `config show` can display a broken file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !OUTPUT_FORMATS.contains(&self.defaults.output.as_str()) {
            return Err(invalid(
                "defaults.output",
                format!(
                    "unknown format '{}', expected one of {}",
                    self.defaults.output,
                    OUTPUT_FORMATS.join(", ")
                ),
            ));
        }
        self.scheduler_settings()?;
        self.collection_settings()?;
        self.anomaly_config()?;
        self.default_subnet()?;
        Ok(())
    }

    pub fn scheduler_settings(&self) -> Result<SchedulerSettings, ConfigError> {
        let s = &self.scheduler;
        let settings = SchedulerSettings {
            polling_interval: Duration::from_millis(s.polling_interval_ms),
            discovery_interval: Duration::from_millis(s.discovery_interval_ms),
            identification_interval: Duration::from_millis(s.identification_interval_ms),
            router_discovery_interval: Duration::from_millis(s.router_discovery_interval_ms),
            max_concurrent_devices: s.max_concurrent_devices,
            job_timeout: Duration::from_millis(s.job_timeout_ms),
            tick: Duration::from_millis(s.tick_ms),
            sync_interval: Duration::from_millis(s.sync_interval_ms),
            backoff_base: Duration::from_millis(s.backoff_base_ms),
            backoff_max: Duration::from_millis(s.backoff_max_ms),
            failure_threshold: s.failure_threshold,
        };
        settings.validate().map_err(|e| scoped("scheduler", e))?;
        Ok(settings)
    }

    pub fn collection_settings(&self) -> Result<CollectionSettings, ConfigError> {
        if self.collection.cache_ttl_ms == 0 {
            return Err(invalid("collection.cache_ttl_ms", "must be non-zero"));
        }
        Ok(CollectionSettings {
            cache_ttl: Duration::from_millis(self.collection.cache_ttl_ms),
        })
    }

    pub fn anomaly_config(&self) -> Result<AnomalyConfig, ConfigError> {
        let a = &self.anomaly;
        let config = AnomalyConfig {
            port_scan: PortScanConfig {
                window: Duration::from_millis(a.port_scan.window_ms),
                distinct_port_threshold: a.port_scan.distinct_port_threshold,
            },
            dos: DosConfig {
                window: Duration::from_millis(a.dos.window_ms),
                bytes_per_sec_threshold: a.dos.bytes_per_sec_threshold,
                packets_per_sec_threshold: a.dos.packets_per_sec_threshold,
            },
            brute_force: BruteForceConfig {
                window: Duration::from_millis(a.brute_force.window_ms),
                attempt_threshold: a.brute_force.attempt_threshold,
                max_attempt_duration: Duration::from_millis(a.brute_force.max_attempt_duration_ms),
                auth_ports: a.brute_force.auth_ports.clone(),
            },
            idle_ttl: Duration::from_millis(a.idle_ttl_ms),
            sweep_every: a.sweep_every,
        };
        config.validate().map_err(|e| scoped("anomaly", e))?;
        Ok(config)
    }

    pub fn default_subnet(&self) -> Result<Option<Subnet>, ConfigError> {
        self.discovery
            .default_subnet
            .as_deref()
            .map(str::parse::<Subnet>)
            .transpose()
            .map_err(|e| scoped("discovery", e))
    }

    /// Built-in vendor table plus `[discovery.oui]` additions.
    pub fn oui_table(&self) -> OuiTable {
        OuiTable::builtin().with_entries(self.discovery.oui.clone())
    }
}

/// Prefix a core validation field with its TOML section.
fn scoped(section: &str, err: CoreError) -> ConfigError {
    match ConfigError::from(err) {
        ConfigError::Validation { field, reason } => ConfigError::Validation {
            field: format!("{section}.{field}"),
            reason,
        },
        other => other,
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "netsentry", "netsentry").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("netsentry");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path` (if present), then
/// `NETSENTRY_*` variables with `__` separating nested keys.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NETSENTRY_").split("__"))
}

/// Load from the canonical config path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn defaults_match_core_settings() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduler_settings().unwrap(), SchedulerSettings::default());
        assert_eq!(cfg.collection_settings().unwrap(), CollectionSettings::default());
        assert_eq!(cfg.anomaly_config().unwrap(), AnomalyConfig::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.defaults, Defaults::default());
        assert_eq!(cfg.scheduler, SchedulerSection::default());
    }

    #[test]
    fn file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
[scheduler]
polling_interval_ms = 15000
max_concurrent_devices = 12

[anomaly.port_scan]
distinct_port_threshold = 40

[discovery]
default_subnet = "10.0.0.0/24"

[discovery.oui]
"AA-BB-CC" = "Lab Vendor"
"#,
        );
        let cfg = load_config_from(&path).unwrap();

        let settings = cfg.scheduler_settings().unwrap();
        assert_eq!(settings.polling_interval, Duration::from_secs(15));
        assert_eq!(settings.max_concurrent_devices, 12);
        assert_eq!(settings.discovery_interval, SchedulerSettings::default().discovery_interval);

        let anomaly = cfg.anomaly_config().unwrap();
        assert_eq!(anomaly.port_scan.distinct_port_threshold, 40);
        assert_eq!(anomaly.dos, DosConfig::default());

        assert_eq!(cfg.default_subnet().unwrap().unwrap().to_string(), "10.0.0.0/24");
        let mac = netsentry_core::MacAddress::new("aa:bb:cc:01:02:03");
        assert_eq!(cfg.oui_table().lookup_vendor(&mac), Some("Lab Vendor"));
    }

    #[test]
    fn short_polling_interval_is_rejected_with_section_path() {
        let cfg = Config {
            scheduler: SchedulerSection {
                polling_interval_ms: 1_000,
                ..SchedulerSection::default()
            },
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "scheduler.polling_interval"),
            "got {err}"
        );
    }

    #[test]
    fn unknown_output_format_is_rejected() {
        let cfg = Config {
            defaults: Defaults {
                output: "xml".into(),
            },
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("defaults.output"));
    }

    #[test]
    fn malformed_subnet_is_rejected() {
        let cfg = Config {
            discovery: DiscoverySection {
                default_subnet: Some("10.0.0.0/40".into()),
                ..DiscoverySection::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            cfg.default_subnet(),
            Err(ConfigError::Validation { ref field, .. }) if field == "discovery.subnet"
        ));
    }

    #[test]
    fn malformed_toml_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[scheduler\npolling_interval_ms = ");
        assert!(matches!(load_config_from(&path), Err(ConfigError::Figment(_))));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.defaults.output = "yaml".into();
        cfg.collection.cache_ttl_ms = 10_000;
        cfg.discovery.oui.insert("00:11:22".into(), "Acme".into());

        save_config_to(&cfg, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }
}
