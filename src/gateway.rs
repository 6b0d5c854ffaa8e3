//! Assembly of channels, providers and the shared transport.
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::provider::{Adapter, Channel, ProviderOptions, ProviderRegistry};
use crate::transport::HttpTransport;

/// Every configured channel, ready to serve requests.
#[derive(Debug)]
pub struct Gateway {
    adapters: FxHashMap<String, Arc<Adapter>>,
    order: Vec<String>,
    transport: Arc<HttpTransport>,
}

impl Gateway {
    /// Build one shared transport and one adapter per configured channel.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AdapterNotFound`] when a channel names a
    /// provider missing from `registry`, or the error from building the
    /// transport or a channel.
    pub fn from_config(config: &AppConfig, registry: &ProviderRegistry) -> Result<Self, GatewayError> {
        let transport = Arc::new(HttpTransport::with_proxies(
            &config.transport,
            config
                .channels
                .iter()
                .filter_map(|channel| channel.proxy.as_deref()),
        )?);

        let mut adapters = FxHashMap::default();
        let mut order = Vec::with_capacity(config.channels.len());
        for channel_config in &config.channels {
            let options = ProviderOptions {
                api_version: channel_config.api_version.clone(),
            };
            let provider = registry
                .create(&channel_config.provider, &options)
                .map_err(|err| err.with_context("channel", channel_config.name.clone()))?;
            let channel = Channel::from_config(channel_config)?;
            tracing::debug!(
                channel = %channel.name,
                provider = provider.name(),
                base_url = %channel.base_url,
                "channel ready"
            );
            let adapter = Adapter::new(channel, provider, Arc::clone(&transport));
            order.push(channel_config.name.clone());
            adapters.insert(channel_config.name.clone(), Arc::new(adapter));
        }

        Ok(Self {
            adapters,
            order,
            transport,
        })
    }

    /// The adapter serving channel `name`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AdapterNotFound`] for an unknown channel.
    pub fn adapter(&self, name: &str) -> Result<Arc<Adapter>, GatewayError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::adapter_not_found(name))
    }

    /// Channel names in configuration order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// The first configured channel.
    #[must_use]
    pub fn default_adapter(&self) -> Option<Arc<Adapter>> {
        self.order
            .first()
            .and_then(|name| self.adapters.get(name))
            .cloned()
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }
}
