use crate::config::{ProxyConfig, Settings};
use crate::proxy::{ForwardingEngine, HttpClient};
use crate::routing::RoutingTable;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Shared proxy state, cheaply cloneable.
///
/// Everything here is built once at startup and read-only afterwards, so
/// request tasks share it without locking.
#[derive(Clone)]
pub struct ProxyState {
    pub settings: Arc<Settings>,
    pub routing: Arc<RoutingTable>,
    pub engine: ForwardingEngine,
}

impl ProxyState {
    pub fn new(settings: Settings, routing: RoutingTable, engine: ForwardingEngine) -> Self {
        Self {
            settings: Arc::new(settings),
            routing: Arc::new(routing),
            engine,
        }
    }

    /// Load and compile the routing document named by `settings` and build
    /// the pooled upstream client.
    pub fn load(settings: Settings) -> Result<Self> {
        let config = ProxyConfig::load(&settings.routing_config_path)?;
        let routing = RoutingTable::from_config(&config).with_context(|| {
            format!(
                "failed to compile routing config {}",
                settings.routing_config_path.display()
            )
        })?;
        let client = HttpClient::new(&settings.upstream)?;
        info!(
            "server: state ready, routers={}, hide_error_message={}, allowed_hosts={:?}",
            routing.len(),
            settings.hide_error_message,
            settings.allowed_hosts
        );
        Ok(Self::new(settings, routing, ForwardingEngine::new(Arc::new(client))))
    }
}
