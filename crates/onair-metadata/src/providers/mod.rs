//! External now-playing providers, keyed by the provider type a station
//! carries in its catalog entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use onair_proto::config::MetadataConfig;
use onair_proto::protocol::MetadataRecord;

use crate::error::Result;

pub mod bbc;
pub mod nova;
pub mod radio_france;

pub use bbc::BbcProvider;
pub use nova::NovaProvider;
pub use radio_france::RadioFranceProvider;

/// One upstream now-playing API.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Current item for the channel identified by `param`.
    /// `Ok(None)` means the API answered but has nothing on air to report.
    async fn fetch_metadata(&self, param: &str) -> Result<Option<MetadataRecord>>;
}

/// Provider type → implementation.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn MetadataProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `bbc_rms`, `radio_france` and `nova`, sharing one client.
    pub fn with_defaults(client: reqwest::Client, config: &MetadataConfig) -> Self {
        let mut registry = Self::new();
        registry.register(
            "bbc_rms",
            Arc::new(BbcProvider::new(client.clone(), &config.bbc_url)),
        );
        registry.register(
            "radio_france",
            Arc::new(RadioFranceProvider::new(client.clone(), &config.radio_france_url)),
        );
        registry.register("nova", Arc::new(NovaProvider::new(client, &config.nova_url)));
        registry
    }

    pub fn register(&mut self, provider_type: &str, provider: Arc<dyn MetadataProvider>) {
        self.providers.insert(provider_type.to_string(), provider);
    }

    pub fn get(&self, provider_type: &str) -> Option<Arc<dyn MetadataProvider>> {
        self.providers.get(provider_type).cloned()
    }
}
