use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters;
use crate::config::AppConfig;
use crate::core::archive::{ArchivePackager, ContentFetcher};
use crate::core::destination::AdapterResolver;
use crate::core::dispatcher::Dispatcher;
use crate::core::endpoint::EndpointPolicy;
use crate::core::notifications::{Notifier, ToastFeed, create_notifier};
use crate::core::orchestrator::{BatchDeps, BatchSettings};
use crate::core::store::RecordStore;
use crate::core::validator::Validator;

/// How many recent toasts are kept for polling clients.
const TOAST_HISTORY: usize = 50;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RecordStore>,
    pub policy: EndpointPolicy,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn AdapterResolver>,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Result<Self> {
        let policy = adapters::endpoint_policy(&config)?;
        let notifier = Notifier::new(ToastFeed::new(TOAST_HISTORY), create_notifier(&config.notifications));

        let deps = BatchDeps {
            resolver,
            store: Arc::clone(&store),
            notifier,
            settings: BatchSettings::from_config(&config),
        };
        let packager = ArchivePackager::new(fetcher, Duration::from_secs(config.archive_fetch_timeout_secs));
        let dispatcher = Dispatcher::new(
            deps,
            Validator::from_config(&config.validation),
            packager,
            config.builtin_store.display_name.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            policy,
            dispatcher: Arc::new(dispatcher),
        })
    }
}
