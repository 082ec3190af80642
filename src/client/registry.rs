//! Token → client registry

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::TelemetryResult;
use crate::flush::{HttpTransport, Transport};

use super::Client;

/// Process-wide registry (created on first use)
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Explicit map from project token to its client
#[derive(Default)]
pub struct Registry {
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client for `config.token`, creating and starting it if needed
    ///
    /// An existing client is returned as-is; `config` is then ignored.
    pub fn initialize(&self, config: ClientConfig) -> TelemetryResult<Arc<Client>> {
        if let Some(existing) = self.get(&config.token) {
            return Ok(existing);
        }
        let transport = HttpTransport::from_config(&config)?;
        self.initialize_with_transport(config, Arc::new(transport))
    }

    pub fn initialize_with_transport(
        &self,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> TelemetryResult<Arc<Client>> {
        let mut clients = self.clients.lock();
        if let Some(existing) = clients.get(&config.token) {
            return Ok(existing.clone());
        }

        let token = config.token.clone();
        let client = Arc::new(Client::with_transport(config, transport)?);
        if Handle::try_current().is_ok() {
            client.start();
        } else {
            warn!(token = %token, "Initialized outside a tokio runtime, call start() later");
        }

        clients.insert(token.clone(), client.clone());
        info!(token = %token, "Client registered");
        Ok(client)
    }

    pub fn get(&self, token: &str) -> Option<Arc<Client>> {
        self.clients.lock().get(token).cloned()
    }

    /// Remove the client for `token`, suspending it and archiving its state
    pub fn teardown(&self, token: &str) -> Option<Arc<Client>> {
        let client = self.clients.lock().remove(token)?;
        client.scheduler().suspend();
        if let Err(e) = client.archive() {
            warn!(token, error = %e, "Failed to archive client state on teardown");
        }
        info!(token, "Client torn down");
        Some(client)
    }

    /// Registered tokens, sorted
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.clients.lock().keys().cloned().collect();
        tokens.sort();
        tokens
    }
}
