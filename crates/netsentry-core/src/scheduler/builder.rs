// ── Scheduler builder ──

use std::sync::Arc;

use crate::anomaly::AnomalyEngine;
use crate::channel::CommandChannel;
use crate::config::{CollectionSettings, SchedulerSettings};
use crate::discovery::OuiTable;
use crate::error::CoreError;
use crate::notify::{Notifier, NullNotifier};
use crate::store::Repository;
use crate::strategy::TrafficCollector;

use super::Scheduler;

/// Collects the scheduler's collaborators. A repository and a command
/// channel are required; everything else has a default.
#[derive(Default)]
pub struct SchedulerBuilder {
    pub(super) store: Option<Arc<dyn Repository>>,
    pub(super) channel: Option<Arc<dyn CommandChannel>>,
    pub(super) notifier: Option<Arc<dyn Notifier>>,
    pub(super) anomaly: Option<Arc<AnomalyEngine>>,
    pub(super) collectors: Vec<Arc<dyn TrafficCollector>>,
    pub(super) settings: SchedulerSettings,
    pub(super) collection: CollectionSettings,
    pub(super) oui: Option<OuiTable>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repository(mut self, store: Arc<dyn Repository>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn channel(mut self, channel: Arc<dyn CommandChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Feed router connection tables to this engine after each metrics run.
    pub fn anomaly_engine(mut self, engine: Arc<AnomalyEngine>) -> Self {
        self.anomaly = Some(engine);
        self
    }

    /// Override the built-in collector for the method `collector` reports.
    pub fn collector(mut self, collector: Arc<dyn TrafficCollector>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn collection(mut self, collection: CollectionSettings) -> Self {
        self.collection = collection;
        self
    }

    pub fn oui_table(mut self, oui: OuiTable) -> Self {
        self.oui = Some(oui);
        self
    }

    /// Validate and assemble. Nothing runs until `initialize`.
    pub fn build(self) -> Result<Scheduler, CoreError> {
        let Some(store) = self.store.clone() else {
            return Err(CoreError::Config {
                message: "scheduler requires a repository".into(),
            });
        };
        let Some(channel) = self.channel.clone() else {
            return Err(CoreError::Config {
                message: "scheduler requires a command channel".into(),
            });
        };
        self.settings.validate()?;
        let notifier = self
            .notifier
            .clone()
            .unwrap_or_else(|| Arc::new(NullNotifier));
        Ok(Scheduler::assemble(self, store, channel, notifier))
    }
}
