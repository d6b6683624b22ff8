use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::destination::{AdapterResolver, DestinationAdapter};
use crate::core::endpoint::EndpointPolicy;
use crate::core::error::TransferError;
use crate::core::models::{Destination, DestinationKind};

pub mod builtin;
pub mod s3;
pub mod simulated;

pub use builtin::BuiltinAdapter;
pub use s3::S3Adapter;
pub use simulated::{SimulatedAdapter, SimulatedBehavior, SimulatedResolver};

/// Picks the real adapter for each destination kind.
pub struct Registry {
    policy: EndpointPolicy,
    builtin_upload_url: Option<String>,
    builtin_api_key: Option<String>,
    part_size: usize,
}

impl Registry {
    pub fn new(
        policy: EndpointPolicy,
        builtin_upload_url: Option<String>,
        builtin_api_key: Option<String>,
        part_size: usize,
    ) -> Self {
        Self {
            policy,
            builtin_upload_url,
            builtin_api_key,
            part_size,
        }
    }
}

impl AdapterResolver for Registry {
    fn resolve(&self, destination: &Destination) -> Result<Arc<dyn DestinationAdapter>, TransferError> {
        match &destination.kind {
            DestinationKind::BuiltIn => Ok(Arc::new(BuiltinAdapter::new(
                self.builtin_upload_url.as_deref(),
                self.builtin_api_key.as_deref(),
            )?)),
            DestinationKind::External(account) => {
                Ok(Arc::new(S3Adapter::new(account, &self.policy, self.part_size)?))
            }
        }
    }
}

/// Endpoint allow-list compiled from config.
pub fn endpoint_policy(config: &AppConfig) -> Result<EndpointPolicy> {
    EndpointPolicy::from_patterns(&config.endpoint_allow_list).context("Invalid endpoint_allow_list pattern")
}

pub fn get_resolver(config: &AppConfig) -> Result<Arc<dyn AdapterResolver>> {
    let policy = endpoint_policy(config)?;

    if config.simulation {
        return Ok(Arc::new(
            SimulatedResolver::new(SimulatedBehavior::default()).with_policy(policy),
        ));
    }

    Ok(Arc::new(Registry::new(
        policy,
        config.builtin_store.upload_url.clone(),
        config.builtin_store.api_key.clone(),
        config.multipart_part_size_mb * 1024 * 1024,
    )))
}
